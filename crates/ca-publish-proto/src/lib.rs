//! CA Publishing Protocol Layer
//!
//! This crate holds the side-effect free half of the CA artifact publisher:
//! everything that can be decided without touching a directory server, a
//! filesystem or a socket.
//!
//! # Features
//!
//! - Artifact model for certificates, CRLs and cross-certificate pairs
//! - DER parsing of certificates and CRLs via `x509-parser`
//! - Byte-exact / case-insensitive set comparison for multi-valued attributes
//! - Adapter profiles describing each directory publisher variant
//! - Minimal modification planning for directory entries
//! - File naming for the filesystem mirror
//! - Wire codec for pushing CRLs to an OCSP responder agent
//!
//! # Example
//!
//! ```rust
//! use ca_publish_proto::{
//!     plan_publish, AdapterProfile, Artifact, CertificateArtifact, ClassPlan, EntrySnapshot,
//!     ProfileKind,
//! };
//!
//! let cert = Artifact::Certificate(CertificateArtifact::new(vec![0x30, 0x03, 0x02, 0x01, 0x07], "7"));
//! let profile = AdapterProfile::for_kind(ProfileKind::CaCert);
//! let value = profile.value_for(&cert).unwrap();
//!
//! let entry = EntrySnapshot::new("cn=Issuer,dc=example,dc=com")
//!     .with_object_classes(&["top", "device"]);
//! let classes = ClassPlan::new(profile.default_classes.clone());
//!
//! let mods = plan_publish(&entry, &profile, &value, &classes);
//! assert!(!mods.is_empty());
//! ```

pub mod artifact;
pub mod compare;
pub mod encoding;
pub mod error;
pub mod naming;
pub mod ocsp_push;
pub mod profile;
pub mod reconcile;

pub use artifact::{
    Artifact, ArtifactKind, CertificateArtifact, CertificatePairArtifact, CrlArtifact, KeyUsageClass,
};
pub use compare::{contains_bytes, contains_ignore_case};
pub use error::ArtifactError;
pub use naming::{ParsedCrlName, TimestampZone};
pub use ocsp_push::{PushStatus, ResponseScanner};
pub use profile::{AdapterProfile, AuxSeed, ProfileKind};
pub use reconcile::{
    plan_publish, plan_retirements, plan_unpublish, ClassPlan, EntrySnapshot, ModOp, Modification,
    ModificationList, OBJECT_CLASS,
};
