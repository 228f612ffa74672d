//! Fan-out of one artifact to every configured target
//!
//! Each target gets its own publisher call and its own outcome. A failing
//! target never stops the others; callers inspect the outcomes.

use crate::audit::AuditSink;
use crate::config::{Config, ConfigError, LdapTargetConfig, TargetConfig};
use crate::directory::publisher::state_prefix;
use crate::directory::{ConnectionResolver, DirectoryPublisher, DirectoryTarget};
use crate::error::{PublishError, PublishReport, PublishResult};
use crate::file::FilePublisher;
use crate::ocsp::OcspPublisher;
use crate::policy::CallContext;
use crate::publisher::Publisher;
use crate::store::{ConfigStore, PendingClassChanges};
use ca_publish_proto::{AdapterProfile, Artifact, ClassPlan};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of one target in a sweep
#[derive(Debug)]
pub struct TargetOutcome {
    pub target: String,
    pub kind: &'static str,
    pub result: PublishResult<PublishReport>,
}

impl TargetOutcome {
    pub fn is_failure(&self) -> bool {
        self.result.is_err()
    }
}

/// Which targets a sweep runs against
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Target names; empty selects every target
    pub targets: Vec<String>,
    /// Entry DN used instead of each directory target's mapping
    pub dn: Option<String>,
}

impl Selection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only(mut self, name: impl Into<String>) -> Self {
        self.targets.push(name.into());
        self
    }

    pub fn with_dn(mut self, dn: impl Into<String>) -> Self {
        self.dn = Some(dn.into());
        self
    }

    fn includes(&self, name: &str) -> bool {
        self.targets.is_empty() || self.targets.iter().any(|t| t == name)
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Publish,
    Unpublish,
}

/// Publishers for every configured target
pub struct PublishSweep {
    targets: Vec<TargetConfig>,
    directory: DirectoryPublisher,
    file: FilePublisher,
    ocsp: OcspPublisher,
}

impl PublishSweep {
    /// Sweep whose directory targets use LDAP connections from `config`
    pub fn from_config(
        config: &Config,
        store: Arc<dyn ConfigStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, ConfigError> {
        let resolver = ConnectionResolver::from_config(config.directory.as_ref());
        Self::build(config, resolver, store, audit)
    }

    /// Sweep with an explicit connection resolver
    ///
    /// Records any change of a directory target's configured object classes
    /// so the next publish to it migrates the entry.
    pub fn build(
        config: &Config,
        resolver: ConnectionResolver,
        store: Arc<dyn ConfigStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, ConfigError> {
        for target in &config.targets {
            if let TargetConfig::Ldap(ldap) = target {
                PendingClassChanges::note_reconfiguration(
                    store.as_ref(),
                    &state_prefix(&ldap.name),
                    &configured_classes(ldap, &profile_for(ldap)),
                )?;
            }
        }

        Ok(PublishSweep {
            targets: config.targets.clone(),
            directory: DirectoryPublisher::new(resolver)
                .with_store(store)
                .with_audit(audit.clone()),
            file: FilePublisher::new().with_audit(audit.clone()),
            ocsp: OcspPublisher::new().with_audit(audit),
        })
    }

    pub fn publish(
        &self,
        artifact: &Artifact,
        selection: &Selection,
        ctx: &CallContext,
    ) -> Vec<TargetOutcome> {
        self.run(Direction::Publish, artifact, selection, ctx)
    }

    pub fn unpublish(
        &self,
        artifact: &Artifact,
        selection: &Selection,
        ctx: &CallContext,
    ) -> Vec<TargetOutcome> {
        self.run(Direction::Unpublish, artifact, selection, ctx)
    }

    fn run(
        &self,
        direction: Direction,
        artifact: &Artifact,
        selection: &Selection,
        ctx: &CallContext,
    ) -> Vec<TargetOutcome> {
        let mut outcomes = Vec::new();

        for name in &selection.targets {
            if !self.targets.iter().any(|t| t.name() == name) {
                warn!(target = %name, "Unknown publishing target");
                outcomes.push(TargetOutcome {
                    target: name.clone(),
                    kind: "unknown",
                    result: Err(PublishError::InvalidTarget(format!(
                        "no target named '{}'",
                        name
                    ))),
                });
            }
        }

        for target in self.targets.iter().filter(|t| selection.includes(t.name())) {
            let result = match target {
                TargetConfig::Ldap(ldap) => {
                    self.directory_call(direction, artifact, ldap, selection, ctx)
                }
                TargetConfig::File(file) => match direction {
                    Direction::Publish => self.file.publish(artifact, file, ctx),
                    Direction::Unpublish => self.file.unpublish(artifact, file, ctx),
                },
                TargetConfig::Ocsp(ocsp) => match direction {
                    Direction::Publish => self.ocsp.publish(artifact, ocsp, ctx),
                    Direction::Unpublish => self.ocsp.unpublish(artifact, ocsp, ctx),
                },
            };
            outcomes.push(TargetOutcome {
                target: target.name().to_string(),
                kind: target.kind(),
                result,
            });
        }

        let failed = outcomes.iter().filter(|o| o.is_failure()).count();
        info!(
            artifact = %artifact.describe(),
            targets = outcomes.len(),
            failed,
            "Sweep finished"
        );
        outcomes
    }

    fn directory_call(
        &self,
        direction: Direction,
        artifact: &Artifact,
        config: &LdapTargetConfig,
        selection: &Selection,
        ctx: &CallContext,
    ) -> PublishResult<PublishReport> {
        let profile = profile_for(config);
        // Checked before DN resolution: a subject mapping cannot resolve a CRL
        if !profile.accepts(artifact) {
            return Ok(PublishReport::Skipped(format!(
                "{} profile does not take this {}",
                profile.kind,
                artifact.kind()
            )));
        }

        let dn = match &selection.dn {
            Some(dn) => dn.clone(),
            None => config.dn.resolve(artifact)?,
        };
        let classes = configured_classes(config, &profile);
        let mut target = DirectoryTarget::new(&config.name, dn, profile).with_classes(classes);
        if let Some(alt) = &config.alt_connection {
            target = target.with_connection(alt.clone());
        }

        match direction {
            Direction::Publish => self.directory.publish(artifact, &target, ctx),
            Direction::Unpublish => self.directory.unpublish(artifact, &target, ctx),
        }
    }
}

fn profile_for(config: &LdapTargetConfig) -> AdapterProfile {
    let profile = AdapterProfile::for_kind(config.profile);
    match &config.value_attribute {
        Some(attribute) => profile.with_value_attribute(attribute),
        None => profile,
    }
}

fn configured_classes(config: &LdapTargetConfig, profile: &AdapterProfile) -> Vec<String> {
    match &config.object_classes {
        Some(list) => ClassPlan::parse_list(list),
        None => profile.default_classes.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::config::{DnMapping, FileTargetConfig};
    use crate::directory::{DirectoryConnector, MemoryDirectory};
    use crate::store::MemoryConfigStore;
    use ca_publish_proto::{CrlArtifact, EntrySnapshot, ProfileKind};
    use chrono::Utc;

    const CA_DN: &str = "cn=Example CA,dc=example,dc=com";

    fn ldap_target(name: &str, profile: ProfileKind) -> TargetConfig {
        TargetConfig::Ldap(LdapTargetConfig {
            name: name.to_string(),
            profile,
            dn: DnMapping::Subject,
            value_attribute: None,
            object_classes: None,
            alt_connection: None,
        })
    }

    fn sweep(config: &Config, dir: &MemoryDirectory) -> PublishSweep {
        let connector: Arc<dyn DirectoryConnector> = Arc::new(dir.clone());
        PublishSweep::build(
            config,
            ConnectionResolver::new(Some(connector)),
            Arc::new(MemoryConfigStore::new()),
            Arc::new(MemoryAuditSink::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_crl_skips_certificate_targets_without_resolving_dn() {
        let dir = MemoryDirectory::new();
        let config = Config {
            targets: vec![ldap_target("users", ProfileKind::UserCert)],
            ..Default::default()
        };
        let crl = Artifact::Crl(CrlArtifact::new(vec![1], Utc::now()));

        let outcomes = sweep(&config, &dir).publish(&crl, &Selection::all(), &CallContext::new());
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].result, Ok(PublishReport::Skipped(_))));
    }

    #[test]
    fn test_one_failure_does_not_stop_others() {
        let dir = MemoryDirectory::new();
        dir.add_entry(EntrySnapshot::new(CA_DN).with_object_classes(&["top"]));
        let files = tempfile::tempdir().unwrap();

        let config = Config {
            targets: vec![
                // Subject mapping cannot resolve a CRL entry
                TargetConfig::Ldap(LdapTargetConfig {
                    name: "broken".to_string(),
                    profile: ProfileKind::Crl,
                    dn: DnMapping::Subject,
                    value_attribute: None,
                    object_classes: None,
                    alt_connection: None,
                }),
                TargetConfig::File(FileTargetConfig::new(
                    "mirror",
                    files.path().to_string_lossy(),
                )),
            ],
            ..Default::default()
        };
        let crl = Artifact::Crl(CrlArtifact::new(vec![1], Utc::now()));

        let outcomes = sweep(&config, &dir).publish(&crl, &Selection::all(), &CallContext::new());
        assert!(outcomes[0].is_failure());
        assert!(outcomes[1].result.as_ref().unwrap().is_applied());
    }

    #[test]
    fn test_selection_and_dn_override() {
        let dir = MemoryDirectory::new();
        dir.add_entry(EntrySnapshot::new(CA_DN).with_object_classes(&["top"]));
        let config = Config {
            targets: vec![
                ldap_target("crl", ProfileKind::Crl),
                ldap_target("delta", ProfileKind::DeltaCrl),
            ],
            ..Default::default()
        };
        let crl = Artifact::Crl(CrlArtifact::new(vec![7], Utc::now()));
        let selection = Selection::all().only("crl").only("missing").with_dn(CA_DN);

        let outcomes = sweep(&config, &dir).publish(&crl, &selection, &CallContext::new());
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0].result, Err(PublishError::InvalidTarget(_))));
        assert_eq!(outcomes[1].target, "crl");
        assert!(outcomes[1].result.as_ref().unwrap().is_applied());
        assert_eq!(dir.write_count(), 1);
    }

    #[test]
    fn test_build_records_class_list() {
        let dir = MemoryDirectory::new();
        let store = Arc::new(MemoryConfigStore::new());
        let config = Config {
            targets: vec![ldap_target("ca", ProfileKind::CaCert)],
            ..Default::default()
        };
        let connector: Arc<dyn DirectoryConnector> = Arc::new(dir);

        PublishSweep::build(
            &config,
            ConnectionResolver::new(Some(connector)),
            store.clone(),
            Arc::new(MemoryAuditSink::new()),
        )
        .unwrap();
        assert!(store.contains("ldap.ca.objectClass"));
    }
}
