//! Artifact error types

use crate::artifact::ArtifactKind;
use crate::profile::ProfileKind;

/// Errors raised while decoding or encoding a publishable artifact
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArtifactError {
    /// Certificate DER could not be parsed
    #[error("Certificate parse error: {0}")]
    CertificateParse(String),

    /// CRL DER could not be parsed
    #[error("CRL parse error: {0}")]
    CrlParse(String),

    /// PEM armor was present but malformed
    #[error("PEM decode error: {0}")]
    Pem(String),

    /// The artifact has no wire form for this profile
    #[error("{profile} publisher cannot encode a {kind}")]
    Unsupported {
        profile: ProfileKind,
        kind: ArtifactKind,
    },
}
