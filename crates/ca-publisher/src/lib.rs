//! CA Artifact Publisher
//!
//! Publishes certificates and CRLs to the stores relying parties read them
//! from, built on the planning logic in `ca-publish-proto`.
//!
//! # Publishers
//!
//! - [`DirectoryPublisher`]: reconciles one LDAP entry per call, writing the
//!   minimal modification list and migrating object classes
//! - [`FilePublisher`]: atomic file mirror with an optional zip copy and a
//!   "latest" CRL link that never disappears
//! - [`OcspPublisher`]: best-effort CRL push to OCSP responders with host
//!   failover
//!
//! [`PublishSweep`] fans an artifact out to every configured target.
//!
//! # Example
//!
//! ```rust,no_run
//! use ca_publisher::{CallContext, Config, JsonConfigStore, NullAuditSink, PublishSweep, Selection};
//! use ca_publish_proto::{Artifact, CrlArtifact};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file("publish.json")?;
//! let store = Arc::new(JsonConfigStore::open("publish-state.json")?);
//! let sweep = PublishSweep::from_config(&config, store, Arc::new(NullAuditSink))?;
//!
//! let crl = CrlArtifact::from_der(&std::fs::read("master.crl")?)?;
//! for outcome in sweep.publish(&Artifact::Crl(crl), &Selection::all(), &CallContext::new()) {
//!     println!("{}: {:?}", outcome.target, outcome.result);
//! }
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod config;
pub mod directory;
pub mod error;
pub mod file;
pub mod ocsp;
pub mod policy;
pub mod publisher;
pub mod store;
pub mod sweep;

pub use audit::{AuditEntry, AuditEventType, AuditLogger, AuditSink, MemoryAuditSink, NullAuditSink};
pub use config::{
    Config, ConfigError, DnMapping, FileTargetConfig, LdapConnectionConfig, LdapTargetConfig,
    OcspTargetConfig, RetentionConfig, TargetConfig,
};
pub use directory::{
    ConnectionResolver, DirectoryConnection, DirectoryConnector, DirectoryPublisher,
    DirectoryTarget, LdapConnector, MemoryDirectory,
};
pub use error::{PublishError, PublishReport, PublishResult};
pub use file::FilePublisher;
pub use ocsp::{OcspPublisher, ResponderEndpoint};
pub use policy::{CallContext, FailurePolicy, RetryPolicy};
pub use publisher::Publisher;
pub use store::{ConfigStore, JsonConfigStore, MemoryConfigStore, PendingClassChanges};
pub use sweep::{PublishSweep, Selection, TargetOutcome};
