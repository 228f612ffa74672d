//! Base64 and PEM helpers shared by the file and OCSP publishers

use crate::error::ArtifactError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Line width used for wrapped base64 output
pub const BASE64_LINE_WIDTH: usize = 64;

/// Base64 encode `der`, wrapped at 64 columns with `\n` line breaks
///
/// No trailing newline is emitted.
pub fn base64_lines(der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / BASE64_LINE_WIDTH);
    for (i, chunk) in encoded.as_bytes().chunks(BASE64_LINE_WIDTH).enumerate() {
        if i > 0 {
            out.push('\n');
        }
        // base64 output is pure ASCII
        out.push_str(&String::from_utf8_lossy(chunk));
    }
    out
}

/// Wrap `der` in PEM armor with the given label
pub fn pem_armor(label: &str, der: &[u8]) -> String {
    format!(
        "-----BEGIN {label}-----\n{}\n-----END {label}-----",
        base64_lines(der)
    )
}

/// Accept either PEM or DER input and return DER
///
/// Input starting with `-----BEGIN` is treated as PEM; anything else is
/// returned unchanged.
pub fn decode_pem_or_der(input: &[u8]) -> Result<Vec<u8>, ArtifactError> {
    let trimmed = trim_ascii_start(input);
    if !trimmed.starts_with(b"-----BEGIN") {
        return Ok(input.to_vec());
    }

    let (_, pem) = x509_parser::pem::parse_x509_pem(trimmed)
        .map_err(|e| ArtifactError::Pem(e.to_string()))?;
    Ok(pem.contents)
}

fn trim_ascii_start(input: &[u8]) -> &[u8] {
    let start = input
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(input.len());
    &input[start..]
}
