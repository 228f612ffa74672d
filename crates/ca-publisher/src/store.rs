//! Persistent key/value configuration store
//!
//! Publishers keep a small amount of state between runs: the object class
//! list each directory target was last configured with, and the one-shot
//! "classes added / removed" markers derived from changes to that list.
//!
//! Keys for a directory target share a prefix (`ldap.<target>`):
//!
//! ```text
//! ldap.ca-cert.objectClass         pkiCA,certificationAuthority
//! ldap.ca-cert.objectClassAdded    certificationAuthority
//! ldap.ca-cert.objectClassRemoved  deltaCRL
//! ```

use crate::config::ConfigError;
use ca_publish_proto::compare::{contains_ignore_case, dedup_ignore_case};
use ca_publish_proto::ClassPlan;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Typed get/put access to persisted settings
pub trait ConfigStore: Send + Sync {
    fn get_string(&self, key: &str, default: &str) -> String;

    fn put_string(&self, key: &str, value: &str);

    fn remove(&self, key: &str);

    /// Persist pending puts and removes
    fn commit(&self) -> Result<(), ConfigError>;

    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get_string(key, "").trim() {
            "" => default,
            v => v.eq_ignore_ascii_case("true"),
        }
    }

    fn put_bool(&self, key: &str, value: bool) {
        self.put_string(key, if value { "true" } else { "false" });
    }

    fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get_string(key, "").trim().parse().unwrap_or(default)
    }

    fn put_u64(&self, key: &str, value: u64) {
        self.put_string(key, &value.to_string());
    }
}

/// In-memory store
///
/// Commits always succeed unless failure is injected with
/// [`MemoryConfigStore::fail_commits`].
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    values: RwLock<BTreeMap<String, String>>,
    commits: AtomicUsize,
    fail_commits: AtomicBool,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful commits
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get_string(&self, key: &str, default: &str) -> String {
        self.values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    fn put_string(&self, key: &str, value: &str) {
        self.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    fn commit(&self) -> Result<(), ConfigError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(ConfigError::Invalid("commit failure injected".to_string()));
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Store persisted as a flat JSON object
///
/// `commit` writes `<path>.tmp` and renames it over `<path>`. Commits are
/// serialized so concurrent callers never share the temporary file.
#[derive(Debug)]
pub struct JsonConfigStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
    commit_lock: Mutex<()>,
}

impl JsonConfigStore {
    /// Open the store, starting empty when the file does not exist yet
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), keys = values.len(), "Opened state store");
        Ok(JsonConfigStore {
            path,
            values: RwLock::new(values),
            commit_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for JsonConfigStore {
    fn get_string(&self, key: &str, default: &str) -> String {
        self.values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    fn put_string(&self, key: &str, value: &str) {
        self.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    fn commit(&self) -> Result<(), ConfigError> {
        let _guard = self.commit_lock.lock().unwrap_or_else(|e| e.into_inner());
        let contents = {
            let values = self.values.read().unwrap_or_else(|e| e.into_inner());
            serde_json::to_string_pretty(&*values)?
        };
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);
        fs::write(&temp, contents)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

/// One-shot object class markers of a directory target
///
/// Loaded before a publish, folded into the [`ClassPlan`], and consumed
/// after the modification that used them succeeded. A failed consume only
/// means the markers are applied again next time, which is harmless.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingClassChanges {
    prefix: String,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl PendingClassChanges {
    pub fn load(store: &dyn ConfigStore, prefix: &str) -> Self {
        PendingClassChanges {
            prefix: prefix.to_string(),
            added: ClassPlan::parse_list(&store.get_string(&added_key(prefix), "")),
            removed: ClassPlan::parse_list(&store.get_string(&removed_key(prefix), "")),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Class plan for the configured `desired` classes plus these markers
    pub fn plan(&self, desired: Vec<String>) -> ClassPlan {
        ClassPlan::new(desired).with_pending(self.added.clone(), self.removed.clone())
    }

    /// Clear the markers and commit
    pub fn consume(self, store: &dyn ConfigStore) -> Result<(), ConfigError> {
        if self.is_empty() {
            return Ok(());
        }
        store.remove(&added_key(&self.prefix));
        store.remove(&removed_key(&self.prefix));
        store.commit()
    }

    /// Record a change of the configured class list
    ///
    /// Compares `configured` with the list stored under `<prefix>.objectClass`
    /// and merges the difference into the pending markers. The first call for
    /// a prefix only records the list.
    pub fn note_reconfiguration(
        store: &dyn ConfigStore,
        prefix: &str,
        configured: &[String],
    ) -> Result<(), ConfigError> {
        let list_key = class_list_key(prefix);
        let previous = store.get_string(&list_key, "");
        let joined = configured.join(",");

        if previous.is_empty() {
            if !joined.is_empty() {
                store.put_string(&list_key, &joined);
                store.commit()?;
            }
            return Ok(());
        }

        let previous = ClassPlan::parse_list(&previous);
        let newly_added: Vec<String> = configured
            .iter()
            .filter(|c| !contains_ignore_case(&previous, c))
            .cloned()
            .collect();
        let newly_removed: Vec<String> = previous
            .iter()
            .filter(|c| !contains_ignore_case(configured, c))
            .cloned()
            .collect();

        if newly_added.is_empty() && newly_removed.is_empty() {
            return Ok(());
        }

        let mut pending = Self::load(store, prefix);
        pending.added.retain(|c| !contains_ignore_case(&newly_removed, c));
        pending.removed.retain(|c| !contains_ignore_case(&newly_added, c));
        pending.added = dedup_ignore_case(pending.added.into_iter().chain(newly_added).collect());
        pending.removed =
            dedup_ignore_case(pending.removed.into_iter().chain(newly_removed).collect());

        debug!(
            prefix = %prefix,
            added = %pending.added.join(","),
            removed = %pending.removed.join(","),
            "Object class list changed"
        );

        write_list(store, &added_key(prefix), &pending.added);
        write_list(store, &removed_key(prefix), &pending.removed);
        store.put_string(&list_key, &joined);
        store.commit()
    }
}

/// Consume markers, logging instead of failing
pub(crate) fn consume_or_warn(pending: PendingClassChanges, store: &dyn ConfigStore) {
    let prefix = pending.prefix.clone();
    if let Err(e) = pending.consume(store) {
        warn!(
            prefix = %prefix,
            error = %e,
            "Failed to clear object class markers; they will be reapplied"
        );
    }
}

fn write_list(store: &dyn ConfigStore, key: &str, values: &[String]) {
    if values.is_empty() {
        store.remove(key);
    } else {
        store.put_string(key, &values.join(","));
    }
}

fn class_list_key(prefix: &str) -> String {
    format!("{}.objectClass", prefix)
}

fn added_key(prefix: &str) -> String {
    format!("{}.objectClassAdded", prefix)
}

fn removed_key(prefix: &str) -> String {
    format!("{}.objectClassRemoved", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_typed_access_with_defaults() {
        let store = MemoryConfigStore::new();
        assert_eq!(store.get_string("missing", "dflt"), "dflt");
        assert!(store.get_bool("flag", true));
        assert_eq!(store.get_u64("level", 9), 9);

        store.put_bool("flag", false);
        store.put_u64("level", 3);
        assert!(!store.get_bool("flag", true));
        assert_eq!(store.get_u64("level", 9), 3);

        store.put_string("level", "not a number");
        assert_eq!(store.get_u64("level", 9), 9);
    }

    #[test]
    fn test_json_store_persists_on_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = JsonConfigStore::open(&path).unwrap();
        store.put_string("ldap.ca.objectClass", "pkiCA");
        assert!(!path.exists());
        store.commit().unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("state.json.tmp").exists());

        let reopened = JsonConfigStore::open(&path).unwrap();
        assert_eq!(reopened.get_string("ldap.ca.objectClass", ""), "pkiCA");
    }

    #[test]
    fn test_json_store_concurrent_commits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = JsonConfigStore::open(&path).unwrap();

        std::thread::scope(|s| {
            for n in 0..8 {
                let store = &store;
                s.spawn(move || {
                    for round in 0..20 {
                        store.put_u64(&format!("target{}.round", n), round);
                        store.commit().unwrap();
                    }
                });
            }
        });

        assert!(!dir.path().join("state.json.tmp").exists());
        let reopened = JsonConfigStore::open(&path).unwrap();
        for n in 0..8 {
            assert_eq!(reopened.get_u64(&format!("target{}.round", n), 0), 19);
        }
    }

    #[test]
    fn test_pending_load_and_consume() {
        let store = MemoryConfigStore::new();
        store.put_string("ldap.ca.objectClassAdded", "pkiCA, certificationAuthority");
        store.put_string("ldap.ca.objectClassRemoved", "deltaCRL");

        let pending = PendingClassChanges::load(&store, "ldap.ca");
        assert_eq!(pending.added, classes(&["pkiCA", "certificationAuthority"]));
        assert_eq!(pending.removed, classes(&["deltaCRL"]));

        let plan = pending.plan(classes(&["pkiCA"]));
        assert_eq!(plan.removed, classes(&["deltaCRL"]));

        pending.consume(&store).unwrap();
        assert!(PendingClassChanges::load(&store, "ldap.ca").is_empty());
        assert_eq!(store.commit_count(), 1);
    }

    #[test]
    fn test_consume_empty_does_not_commit() {
        let store = MemoryConfigStore::new();
        PendingClassChanges::load(&store, "ldap.x").consume(&store).unwrap();
        assert_eq!(store.commit_count(), 0);
    }

    #[test]
    fn test_consume_failure_keeps_markers() {
        let store = MemoryConfigStore::new();
        store.put_string("ldap.ca.objectClassRemoved", "deltaCRL");
        store.fail_commits(true);

        let pending = PendingClassChanges::load(&store, "ldap.ca");
        consume_or_warn(pending, &store);
        assert_eq!(store.commit_count(), 0);
    }

    #[test]
    fn test_note_reconfiguration() {
        let store = MemoryConfigStore::new();

        PendingClassChanges::note_reconfiguration(&store, "ldap.ca", &classes(&["pkiCA", "deltaCRL"]))
            .unwrap();
        assert!(PendingClassChanges::load(&store, "ldap.ca").is_empty());

        PendingClassChanges::note_reconfiguration(
            &store,
            "ldap.ca",
            &classes(&["pkiCA", "certificationAuthority"]),
        )
        .unwrap();
        let pending = PendingClassChanges::load(&store, "ldap.ca");
        assert_eq!(pending.added, classes(&["certificationAuthority"]));
        assert_eq!(pending.removed, classes(&["deltaCRL"]));
        assert_eq!(
            store.get_string("ldap.ca.objectClass", ""),
            "pkiCA,certificationAuthority"
        );

        // unchanged list leaves markers alone
        PendingClassChanges::note_reconfiguration(
            &store,
            "ldap.ca",
            &classes(&["PKICA", "certificationAuthority"]),
        )
        .unwrap();
        assert_eq!(PendingClassChanges::load(&store, "ldap.ca"), pending);

        // re-adding a removed class cancels its removal marker
        PendingClassChanges::note_reconfiguration(
            &store,
            "ldap.ca",
            &classes(&["pkiCA", "certificationAuthority", "deltaCRL"]),
        )
        .unwrap();
        let pending = PendingClassChanges::load(&store, "ldap.ca");
        assert!(pending.removed.is_empty());
        assert_eq!(pending.added, classes(&["certificationAuthority", "deltaCRL"]));
    }
}
