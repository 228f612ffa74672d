//! Directory entry reconciler
//!
//! One publisher serves every directory profile. Each call re-reads the
//! entry, plans the minimal modification list with
//! [`ca_publish_proto::plan_publish`] / [`ca_publish_proto::plan_unpublish`],
//! and applies it in a single modify. An already reconciled entry costs one
//! read and no writes.

use super::resolver::ConnectionResolver;
use super::DirectoryConnection;
use crate::audit::{AuditSink, NullAuditSink, Operation};
use crate::config::LdapConnectionConfig;
use crate::error::{PublishReport, PublishResult};
use crate::policy::{CallContext, FailurePolicy};
use crate::publisher::{conclude, Publisher};
use crate::store::{consume_or_warn, ConfigStore, MemoryConfigStore, PendingClassChanges};
use ca_publish_proto::{
    plan_publish, plan_retirements, plan_unpublish, AdapterProfile, Artifact, ModificationList,
    OBJECT_CLASS,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

/// A resolved directory entry to publish into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryTarget {
    /// Target name; keys the persisted class markers
    pub name: String,
    pub dn: String,
    pub profile: AdapterProfile,
    /// Object classes the entry should carry
    pub classes: Vec<String>,
    /// Connection used instead of the default one
    pub connection: Option<LdapConnectionConfig>,
}

impl DirectoryTarget {
    /// Target with the profile's default classes
    pub fn new(name: impl Into<String>, dn: impl Into<String>, profile: AdapterProfile) -> Self {
        let classes = profile.default_classes.clone();
        DirectoryTarget {
            name: name.into(),
            dn: dn.into(),
            profile,
            classes,
            connection: None,
        }
    }

    pub fn with_classes(mut self, classes: Vec<String>) -> Self {
        self.classes = classes;
        self
    }

    pub fn with_connection(mut self, connection: LdapConnectionConfig) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Key prefix of this target's entries in the config store
    pub fn state_prefix(&self) -> String {
        state_prefix(&self.name)
    }

    fn read_attributes(&self) -> Vec<&str> {
        let mut attributes = vec![self.profile.value_attribute.as_str(), OBJECT_CLASS];
        if let Some(seed) = &self.profile.seed {
            for attribute in &seed.attributes {
                if !attributes.iter().any(|a| a.eq_ignore_ascii_case(attribute)) {
                    attributes.push(attribute.as_str());
                }
            }
        }
        attributes
    }
}

/// Config store prefix for a directory target name
pub fn state_prefix(target_name: &str) -> String {
    format!("ldap.{}", target_name)
}

/// Publishes artifacts into directory entries
pub struct DirectoryPublisher {
    resolver: ConnectionResolver,
    store: Arc<dyn ConfigStore>,
    audit: Arc<dyn AuditSink>,
    policy: FailurePolicy,
}

impl DirectoryPublisher {
    pub fn new(resolver: ConnectionResolver) -> Self {
        DirectoryPublisher {
            resolver,
            store: Arc::new(MemoryConfigStore::new()),
            audit: Arc::new(NullAuditSink),
            policy: FailurePolicy::FailClosed,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    fn label(target: &DirectoryTarget) -> String {
        format!("ldap:{}", target.profile.kind)
    }

    fn reconcile(
        &self,
        artifact: &Artifact,
        target: &DirectoryTarget,
        ctx: &CallContext,
    ) -> PublishResult<PublishReport> {
        ctx.check()?;
        if !target.profile.accepts(artifact) {
            return Ok(PublishReport::Skipped(format!(
                "{} profile does not take this {}",
                target.profile.kind,
                artifact.kind()
            )));
        }
        let value = target.profile.value_for(artifact)?;

        let pending = PendingClassChanges::load(self.store.as_ref(), &target.state_prefix());
        let classes = pending.plan(target.classes.clone());

        let mut conn = self.resolver.connect(target.connection.as_ref())?;
        let entry = conn.read_entry(&target.dn, &target.read_attributes())?;

        let mut mods = plan_publish(&entry, &target.profile, &value, &classes);
        if let Some(retire) = plan_retirements(&entry, &target.profile, &value, Utc::now()) {
            debug!(
                dn = %target.dn,
                expired = retire.values.len(),
                "Retiring expired certificates"
            );
            mods.push(retire);
        }

        let report = self.apply(conn.as_mut(), target, &mods, ctx)?;
        consume_or_warn(pending, self.store.as_ref());
        Ok(report)
    }

    fn withdraw(
        &self,
        artifact: &Artifact,
        target: &DirectoryTarget,
        ctx: &CallContext,
    ) -> PublishResult<PublishReport> {
        ctx.check()?;
        if !target.profile.accepts(artifact) {
            return Ok(PublishReport::Skipped(format!(
                "{} profile does not take this {}",
                target.profile.kind,
                artifact.kind()
            )));
        }
        let value = target.profile.value_for(artifact)?;

        let pending = PendingClassChanges::load(self.store.as_ref(), &target.state_prefix());
        let classes = pending.plan(target.classes.clone());

        let mut conn = self.resolver.connect(target.connection.as_ref())?;
        let entry = conn.read_entry(&target.dn, &target.read_attributes())?;
        let mods = plan_unpublish(&entry, &target.profile, &value, &classes);

        self.apply(conn.as_mut(), target, &mods, ctx)
    }

    fn apply(
        &self,
        conn: &mut dyn DirectoryConnection,
        target: &DirectoryTarget,
        mods: &ModificationList,
        ctx: &CallContext,
    ) -> PublishResult<PublishReport> {
        if mods.is_empty() {
            debug!(dn = %target.dn, "Entry already reconciled");
            return Ok(PublishReport::Unchanged);
        }
        ctx.check()?;
        debug!(
            dn = %target.dn,
            endpoint = %self.resolver.describe(target.connection.as_ref()),
            modifications = mods.len(),
            "Applying directory modifications"
        );
        conn.modify(&target.dn, mods)?;
        Ok(PublishReport::Applied {
            changes: mods.len(),
        })
    }
}

impl Publisher for DirectoryPublisher {
    type Target = DirectoryTarget;

    fn name(&self) -> String {
        "ldap".to_string()
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    fn publish(
        &self,
        artifact: &Artifact,
        target: &DirectoryTarget,
        ctx: &CallContext,
    ) -> PublishResult<PublishReport> {
        let result = self.reconcile(artifact, target, ctx);
        conclude(
            self.policy,
            self.audit.as_ref(),
            Operation::Publish,
            &Self::label(target),
            &target.dn,
            artifact,
            result,
        )
    }

    fn unpublish(
        &self,
        artifact: &Artifact,
        target: &DirectoryTarget,
        ctx: &CallContext,
    ) -> PublishResult<PublishReport> {
        let result = self.withdraw(artifact, target, ctx);
        conclude(
            self.policy,
            self.audit.as_ref(),
            Operation::Unpublish,
            &Self::label(target),
            &target.dn,
            artifact,
            result,
        )
    }
}
