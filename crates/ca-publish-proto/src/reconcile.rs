//! Directory entry reconciliation planning
//!
//! Given a fresh snapshot of a directory entry, an adapter profile, the
//! artifact's wire value and the configured object classes, compute the
//! smallest list of modifications that brings the entry into the desired
//! state. Applying the list is the caller's job; this module never touches
//! the network.
//!
//! # Publish
//!
//! 1. Value step: multi-valued attributes get an `Add` only when no stored
//!    value is byte-identical. Single-valued attributes get a `Replace`
//!    unless the stored value already equals the new one. An attribute that
//!    holds nothing but seeded empty placeholders is replaced.
//! 2. Class step: every desired class missing from the entry is added. If any
//!    of them is an authority class, the profile's companion attributes that
//!    are absent are seeded once with an empty placeholder.
//! 3. Removal step: classes listed as removed are deleted when present,
//!    unless they are also desired.
//!
//! An entry that is already reconciled yields an empty list.
//!
//! # Unpublish
//!
//! The value is deleted when present. When it was the last real value of a
//! multi-valued attribute and the profile asks for it, the authority classes
//! and their placeholder-only companions are stripped as well, provided no
//! companion attribute still carries real data.

use crate::artifact::certificate_not_after;
use crate::compare::{contains_bytes, contains_ignore_case, dedup_ignore_case, find_ignore_case};
use crate::profile::AdapterProfile;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Name of the object class attribute
pub const OBJECT_CLASS: &str = "objectClass";

/// Point-in-time view of a directory entry
///
/// Attribute names are matched case-insensitively. A lookup of
/// `cACertificate;binary` falls back to `cACertificate` and vice versa, since
/// servers differ in whether they echo the transfer option.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntrySnapshot {
    dn: String,
    attributes: BTreeMap<String, Vec<Vec<u8>>>,
}

impl EntrySnapshot {
    pub fn new(dn: impl Into<String>) -> Self {
        EntrySnapshot {
            dn: dn.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// Builder form of [`EntrySnapshot::insert`]
    pub fn with_values(mut self, attribute: &str, values: Vec<Vec<u8>>) -> Self {
        self.insert(attribute, values);
        self
    }

    pub fn with_object_classes(mut self, classes: &[&str]) -> Self {
        self.insert(
            OBJECT_CLASS,
            classes.iter().map(|c| c.as_bytes().to_vec()).collect(),
        );
        self
    }

    /// Append values to an attribute
    pub fn insert(&mut self, attribute: &str, values: Vec<Vec<u8>>) {
        self.attributes
            .entry(attribute.to_ascii_lowercase())
            .or_default()
            .extend(values);
    }

    /// Overwrite an attribute's values; an empty list removes the attribute
    pub fn set_values(&mut self, attribute: &str, values: Vec<Vec<u8>>) {
        let key = self.resolve_key(attribute);
        if values.is_empty() {
            self.attributes.remove(&key);
        } else {
            self.attributes.insert(key, values);
        }
    }

    /// Stored values of an attribute; empty when absent
    pub fn values(&self, attribute: &str) -> &[Vec<u8>] {
        self.lookup(attribute).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Whether the attribute exists with at least one value
    pub fn has_attribute(&self, attribute: &str) -> bool {
        !self.values(attribute).is_empty()
    }

    /// Whether the attribute holds at least one non-empty value
    pub fn has_real_value(&self, attribute: &str) -> bool {
        self.values(attribute).iter().any(|v| !v.is_empty())
    }

    pub fn object_classes(&self) -> Vec<String> {
        self.values(OBJECT_CLASS)
            .iter()
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .collect()
    }

    pub fn has_object_class(&self, class: &str) -> bool {
        contains_ignore_case(&self.object_classes(), class)
    }

    /// Attribute names present on the entry (lowercased)
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(|k| k.as_str())
    }

    fn resolve_key(&self, attribute: &str) -> String {
        let key = attribute.to_ascii_lowercase();
        if self.attributes.contains_key(&key) {
            return key;
        }
        let alternate = match key.split_once(';') {
            Some((base, _)) => base.to_string(),
            None => format!("{};binary", key),
        };
        if self.attributes.contains_key(&alternate) {
            alternate
        } else {
            key
        }
    }

    fn lookup(&self, attribute: &str) -> Option<&Vec<Vec<u8>>> {
        let key = attribute.to_ascii_lowercase();
        if let Some(values) = self.attributes.get(&key) {
            return Some(values);
        }
        match key.split_once(';') {
            Some((base, _)) => self.attributes.get(base),
            None => self.attributes.get(&format!("{};binary", key)),
        }
    }
}

/// Modification operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModOp {
    Add,
    Replace,
    /// With no values, removes the whole attribute
    Delete,
}

/// One attribute modification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub op: ModOp,
    pub attribute: String,
    pub values: Vec<Vec<u8>>,
}

impl Modification {
    pub fn add(attribute: impl Into<String>, values: Vec<Vec<u8>>) -> Self {
        Modification {
            op: ModOp::Add,
            attribute: attribute.into(),
            values,
        }
    }

    pub fn replace(attribute: impl Into<String>, values: Vec<Vec<u8>>) -> Self {
        Modification {
            op: ModOp::Replace,
            attribute: attribute.into(),
            values,
        }
    }

    pub fn delete(attribute: impl Into<String>, values: Vec<Vec<u8>>) -> Self {
        Modification {
            op: ModOp::Delete,
            attribute: attribute.into(),
            values,
        }
    }

    fn targets(&self, op: ModOp, attribute: &str) -> bool {
        self.op == op && self.attribute.eq_ignore_ascii_case(attribute)
    }
}

/// Ordered batch of modifications applied as one operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModificationList {
    mods: Vec<Modification>,
}

impl ModificationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, modification: Modification) {
        self.mods.push(modification);
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mods.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Modification> {
        self.mods.iter()
    }

    pub fn as_slice(&self) -> &[Modification] {
        &self.mods
    }

    /// Whether the list adds the given object class
    pub fn adds_class(&self, class: &str) -> bool {
        self.class_op(ModOp::Add, class)
    }

    /// Whether the list deletes the given object class
    pub fn deletes_class(&self, class: &str) -> bool {
        self.class_op(ModOp::Delete, class)
    }

    fn class_op(&self, op: ModOp, class: &str) -> bool {
        self.mods.iter().any(|m| {
            m.targets(op, OBJECT_CLASS)
                && m.values
                    .iter()
                    .any(|v| String::from_utf8_lossy(v).eq_ignore_ascii_case(class))
        })
    }
}

impl IntoIterator for ModificationList {
    type Item = Modification;
    type IntoIter = std::vec::IntoIter<Modification>;

    fn into_iter(self) -> Self::IntoIter {
        self.mods.into_iter()
    }
}

impl<'a> IntoIterator for &'a ModificationList {
    type Item = &'a Modification;
    type IntoIter = std::slice::Iter<'a, Modification>;

    fn into_iter(self) -> Self::IntoIter {
        self.mods.iter()
    }
}

/// Object classes to reconcile
///
/// `added` and `removed` are the one-shot markers recorded when the
/// configured class list changed since the last successful apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassPlan {
    pub desired: Vec<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ClassPlan {
    pub fn new(desired: Vec<String>) -> Self {
        ClassPlan {
            desired,
            added: vec![],
            removed: vec![],
        }
    }

    pub fn with_pending(mut self, added: Vec<String>, removed: Vec<String>) -> Self {
        self.added = added;
        self.removed = removed;
        self
    }

    /// Split a comma separated class list, dropping blanks
    pub fn parse_list(list: &str) -> Vec<String> {
        dedup_ignore_case(
            list.split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect(),
        )
    }

    /// Desired classes plus those recorded as newly added
    pub fn effective_desired(&self) -> Vec<String> {
        dedup_ignore_case(self.desired.iter().chain(self.added.iter()).cloned().collect())
    }

    pub fn has_pending(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Plan the modifications that publish `value` on `entry`
pub fn plan_publish(
    entry: &EntrySnapshot,
    profile: &AdapterProfile,
    value: &[u8],
    classes: &ClassPlan,
) -> ModificationList {
    let mut mods = ModificationList::new();
    let attribute = profile.value_attribute.as_str();
    let existing = entry.values(attribute);

    if profile.multi_valued {
        if !contains_bytes(existing, value) {
            if !existing.is_empty() && !entry.has_real_value(attribute) {
                mods.push(Modification::replace(attribute, vec![value.to_vec()]));
            } else {
                mods.push(Modification::add(attribute, vec![value.to_vec()]));
            }
        }
    } else if existing.len() != 1 || existing[0].as_slice() != value {
        mods.push(Modification::replace(attribute, vec![value.to_vec()]));
    }

    let present = entry.object_classes();
    let desired = classes.effective_desired();
    let mut trigger_added = false;

    for class in &desired {
        if contains_ignore_case(&present, class) {
            continue;
        }
        mods.push(Modification::add(OBJECT_CLASS, vec![class.as_bytes().to_vec()]));
        if let Some(seed) = &profile.seed {
            trigger_added |= contains_ignore_case(&seed.trigger_classes, class);
        }
    }

    if trigger_added {
        if let Some(seed) = &profile.seed {
            for aux in &seed.attributes {
                if same_attribute(aux, attribute) || entry.has_attribute(aux) {
                    continue;
                }
                mods.push(Modification::add(aux.as_str(), vec![Vec::new()]));
            }
        }
    }

    let mut deleted: Vec<String> = Vec::new();
    for class in &classes.removed {
        if contains_ignore_case(&desired, class) || contains_ignore_case(&deleted, class) {
            continue;
        }
        if let Some(stored) = find_ignore_case(&present, class) {
            mods.push(Modification::delete(
                OBJECT_CLASS,
                vec![stored.as_bytes().to_vec()],
            ));
            deleted.push(stored.to_string());
        }
    }

    mods
}

/// Plan deletion of expired certificates from the profile's attribute
///
/// Only used by profiles with `retire_expired`. `keep` is never retired;
/// values that do not parse as certificates are left alone.
pub fn plan_retirements(
    entry: &EntrySnapshot,
    profile: &AdapterProfile,
    keep: &[u8],
    now: DateTime<Utc>,
) -> Option<Modification> {
    if !profile.retire_expired {
        return None;
    }

    let expired: Vec<Vec<u8>> = entry
        .values(&profile.value_attribute)
        .iter()
        .filter(|v| !v.is_empty() && v.as_slice() != keep)
        .filter(|v| matches!(certificate_not_after(v), Some(not_after) if not_after < now))
        .cloned()
        .collect();

    if expired.is_empty() {
        None
    } else {
        Some(Modification::delete(profile.value_attribute.as_str(), expired))
    }
}

/// Plan the modifications that withdraw `value` from `entry`
pub fn plan_unpublish(
    entry: &EntrySnapshot,
    profile: &AdapterProfile,
    value: &[u8],
    classes: &ClassPlan,
) -> ModificationList {
    let mut mods = ModificationList::new();
    let attribute = profile.value_attribute.as_str();
    let existing = entry.values(attribute);

    if !contains_bytes(existing, value) {
        return mods;
    }

    let last_real_value = existing
        .iter()
        .all(|v| v.is_empty() || v.as_slice() == value);

    if !(profile.multi_valued && profile.strip_classes_on_last_value && last_real_value) {
        mods.push(Modification::delete(attribute, vec![value.to_vec()]));
        return mods;
    }

    let companions: Vec<&str> = profile
        .seed
        .as_ref()
        .map(|seed| {
            seed.attributes
                .iter()
                .map(|a| a.as_str())
                .filter(|a| !same_attribute(a, attribute))
                .collect()
        })
        .unwrap_or_default();

    if companions.iter().any(|a| entry.has_real_value(a)) {
        mods.push(Modification::delete(attribute, vec![value.to_vec()]));
        return mods;
    }

    if existing.len() > 1 {
        // placeholders remain next to the value; drop the attribute whole
        mods.push(Modification::delete(attribute, vec![]));
    } else {
        mods.push(Modification::delete(attribute, vec![value.to_vec()]));
    }

    for companion in companions {
        if entry.has_attribute(companion) {
            mods.push(Modification::delete(companion, vec![]));
        }
    }

    let present = entry.object_classes();
    let desired = classes.effective_desired();
    for class in profile.support_classes(&desired) {
        if let Some(stored) = find_ignore_case(&present, class) {
            mods.push(Modification::delete(
                OBJECT_CLASS,
                vec![stored.as_bytes().to_vec()],
            ));
        }
    }

    mods
}

fn same_attribute(a: &str, b: &str) -> bool {
    let base = |s: &str| s.split(';').next().unwrap_or(s).to_ascii_lowercase();
    base(a) == base(b)
}
