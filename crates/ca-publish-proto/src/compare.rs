//! Set membership helpers for multi-valued directory attributes
//!
//! Binary attribute values (certificates, CRLs, pairs) are compared byte for
//! byte. String values (object class names, attribute names) are compared
//! ASCII case-insensitively, matching directory matching rules for those
//! syntaxes.

/// Whether `candidate` is byte-identical to any of `values`
pub fn contains_bytes<V: AsRef<[u8]>>(values: &[V], candidate: &[u8]) -> bool {
    values.iter().any(|v| v.as_ref() == candidate)
}

/// Whether `candidate` matches any of `values`, ignoring ASCII case
pub fn contains_ignore_case<V: AsRef<str>>(values: &[V], candidate: &str) -> bool {
    find_ignore_case(values, candidate).is_some()
}

/// The stored spelling of `candidate` within `values`, ignoring ASCII case
pub fn find_ignore_case<'a, V: AsRef<str>>(values: &'a [V], candidate: &str) -> Option<&'a str> {
    values
        .iter()
        .map(|v| v.as_ref())
        .find(|v| v.trim().eq_ignore_ascii_case(candidate.trim()))
}

/// Drop case-insensitive duplicates while keeping first-seen order
pub fn dedup_ignore_case(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        if !contains_ignore_case(&out, &value) {
            out.push(value);
        }
    }
    out
}
