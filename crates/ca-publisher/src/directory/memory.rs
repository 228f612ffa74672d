//! In-memory directory
//!
//! Stands in for an LDAP server in tests and dry runs. Modifications follow
//! LDAP semantics closely enough to catch planning mistakes: adding a value
//! that already exists or deleting one that does not fails the whole batch,
//! and nothing is applied.

use super::{DirectoryConnection, DirectoryConnector};
use crate::error::{PublishError, PublishResult};
use ca_publish_proto::compare::{contains_bytes, contains_ignore_case};
use ca_publish_proto::{EntrySnapshot, ModOp, Modification, ModificationList, OBJECT_CLASS};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

const ATTRIBUTE_OR_VALUE_EXISTS: u32 = 20;
const NO_SUCH_ATTRIBUTE: u32 = 16;

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<String, EntrySnapshot>,
    reads: usize,
    writes: usize,
    opened: usize,
    closed: usize,
    unreachable: bool,
    fail_next_modify: Option<String>,
}

/// Shared in-memory directory; clones see the same entries
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    state: Arc<Mutex<State>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or overwrite an entry
    pub fn add_entry(&self, entry: EntrySnapshot) {
        self.lock()
            .entries
            .insert(entry.dn().to_ascii_lowercase(), entry);
    }

    pub fn entry(&self, dn: &str) -> Option<EntrySnapshot> {
        self.lock().entries.get(&dn.to_ascii_lowercase()).cloned()
    }

    /// Number of successful modify operations
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    pub fn read_count(&self) -> usize {
        self.lock().reads
    }

    /// Connections opened and not yet closed
    pub fn open_connections(&self) -> usize {
        let state = self.lock();
        state.opened - state.closed
    }

    pub fn connections_opened(&self) -> usize {
        self.lock().opened
    }

    /// Make `connect` fail as if the server were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Reject the next modify with a directory error
    pub fn fail_next_modify(&self, message: impl Into<String>) {
        self.lock().fail_next_modify = Some(message.into());
    }
}

impl DirectoryConnector for MemoryDirectory {
    fn connect(&self) -> PublishResult<Box<dyn DirectoryConnection>> {
        let mut state = self.lock();
        if state.unreachable {
            return Err(PublishError::Unreachable(
                "memory directory is unreachable".to_string(),
            ));
        }
        state.opened += 1;
        Ok(Box::new(MemoryConnection {
            directory: self.clone(),
        }))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

struct MemoryConnection {
    directory: MemoryDirectory,
}

impl DirectoryConnection for MemoryConnection {
    fn read_entry(&mut self, dn: &str, attributes: &[&str]) -> PublishResult<EntrySnapshot> {
        let mut state = self.directory.lock();
        if state.unreachable {
            return Err(PublishError::Unreachable("connection lost".to_string()));
        }
        state.reads += 1;

        let stored = state
            .entries
            .get(&dn.to_ascii_lowercase())
            .ok_or_else(|| PublishError::Directory(format!("Entry not found: {}", dn)))?;

        let mut snapshot = EntrySnapshot::new(stored.dn());
        for attribute in attributes {
            let values = stored.values(attribute);
            if !values.is_empty() {
                snapshot.insert(attribute, values.to_vec());
            }
        }
        Ok(snapshot)
    }

    fn modify(&mut self, dn: &str, mods: &ModificationList) -> PublishResult<()> {
        let mut state = self.directory.lock();
        if state.unreachable {
            return Err(PublishError::Unreachable("connection lost".to_string()));
        }
        if let Some(message) = state.fail_next_modify.take() {
            return Err(PublishError::Directory(message));
        }

        let key = dn.to_ascii_lowercase();
        let mut entry = state
            .entries
            .get(&key)
            .cloned()
            .ok_or_else(|| PublishError::Directory(format!("Entry not found: {}", dn)))?;

        for modification in mods {
            apply(&mut entry, modification)?;
        }

        state.entries.insert(key, entry);
        state.writes += 1;
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.directory.lock().closed += 1;
    }
}

fn apply(entry: &mut EntrySnapshot, m: &Modification) -> PublishResult<()> {
    let is_class = m.attribute.eq_ignore_ascii_case(OBJECT_CLASS);
    let mut values = entry.values(&m.attribute).to_vec();

    match m.op {
        ModOp::Add => {
            for value in &m.values {
                if holds(&values, value, is_class) {
                    return Err(rejected(ATTRIBUTE_OR_VALUE_EXISTS, &m.attribute));
                }
                values.push(value.clone());
            }
        }
        ModOp::Replace => values = m.values.clone(),
        ModOp::Delete if m.values.is_empty() => {
            if values.is_empty() {
                return Err(rejected(NO_SUCH_ATTRIBUTE, &m.attribute));
            }
            values.clear();
        }
        ModOp::Delete => {
            for value in &m.values {
                if !holds(&values, value, is_class) {
                    return Err(rejected(NO_SUCH_ATTRIBUTE, &m.attribute));
                }
                values.retain(|v| !same_value(v, value, is_class));
            }
        }
    }

    entry.set_values(&m.attribute, values);
    Ok(())
}

fn holds(values: &[Vec<u8>], value: &[u8], is_class: bool) -> bool {
    if is_class {
        let names: Vec<String> = values
            .iter()
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .collect();
        contains_ignore_case(&names, &String::from_utf8_lossy(value))
    } else {
        contains_bytes(values, value)
    }
}

fn same_value(a: &[u8], b: &[u8], is_class: bool) -> bool {
    if is_class {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

fn rejected(rc: u32, attribute: &str) -> PublishError {
    PublishError::Directory(format!("LDAP modify failed: rc={} on {}", rc, attribute))
}
