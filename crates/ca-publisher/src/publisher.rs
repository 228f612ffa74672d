//! Common publisher interface

use crate::audit::{AuditEntry, AuditSink, Operation};
use crate::error::{PublishReport, PublishResult};
use crate::policy::{CallContext, FailurePolicy};
use ca_publish_proto::Artifact;
use tracing::{debug, error, info, warn};

/// A publisher for one kind of external store
///
/// Calls are synchronous and independent; implementations tolerate
/// concurrent invocation from several threads.
pub trait Publisher: Send + Sync {
    /// Descriptor of a concrete store location
    type Target;

    /// Short name used in logs and audit records
    fn name(&self) -> String;

    fn failure_policy(&self) -> FailurePolicy;

    fn publish(
        &self,
        artifact: &Artifact,
        target: &Self::Target,
        ctx: &CallContext,
    ) -> PublishResult<PublishReport>;

    fn unpublish(
        &self,
        artifact: &Artifact,
        target: &Self::Target,
        ctx: &CallContext,
    ) -> PublishResult<PublishReport>;
}

/// Log, audit and apply the failure policy to a finished call
pub(crate) fn conclude(
    policy: FailurePolicy,
    audit: &dyn AuditSink,
    operation: Operation,
    publisher: &str,
    target: &str,
    artifact: &Artifact,
    result: PublishResult<PublishReport>,
) -> PublishResult<PublishReport> {
    let result = match result {
        Err(e) if policy.is_fail_open() => {
            warn!(
                publisher = %publisher,
                target = %target,
                artifact = %artifact.describe(),
                error = %e,
                "{} failed, continuing",
                operation.as_str()
            );
            Ok(PublishReport::Absorbed(e.to_string()))
        }
        Err(e) => {
            error!(
                publisher = %publisher,
                target = %target,
                artifact = %artifact.describe(),
                error = %e,
                "{} failed",
                operation.as_str()
            );
            Err(e)
        }
        Ok(report) => {
            match &report {
                PublishReport::Applied { changes } => info!(
                    publisher = %publisher,
                    target = %target,
                    artifact = %artifact.describe(),
                    changes = *changes,
                    "{} applied",
                    operation.as_str()
                ),
                other => debug!(
                    publisher = %publisher,
                    target = %target,
                    artifact = %artifact.describe(),
                    outcome = %other,
                    "{} complete",
                    operation.as_str()
                ),
            }
            Ok(report)
        }
    };

    audit.record(AuditEntry::for_outcome(
        operation,
        publisher,
        target,
        artifact,
        result.as_ref(),
    ));
    result
}
