//! Directory adapter profiles
//!
//! Every directory publisher is the same reconciler driven by a different
//! [`AdapterProfile`]. A profile says which attribute carries the artifact,
//! whether that attribute accumulates values or holds exactly one, which
//! object classes the entry should carry, and which companion attributes must
//! be seeded when an authority class is first added.

use crate::artifact::{Artifact, ArtifactKind};
use crate::error::ArtifactError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Authority object classes whose schema requires companion attributes
pub const AUTHORITY_CLASSES: [&str; 2] = ["pkiCA", "certificationAuthority"];

/// Companion MUST-attributes of the authority classes
pub const AUTHORITY_MUST_ATTRIBUTES: [&str; 3] = [
    "cACertificate;binary",
    "authorityRevocationList;binary",
    "certificateRevocationList;binary",
];

/// Which publisher variant a profile describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    /// CA signing certificate into `cACertificate`
    CaCert,
    /// Full CRL into `certificateRevocationList`
    Crl,
    /// Delta CRL into `deltaRevocationList`
    DeltaCrl,
    /// Cross-certificate pair into `crossCertificatePair`
    CrossCertPair,
    /// End-entity certificate into `userCertificate`
    UserCert,
    /// Encryption certificate into `userCertificate`, retiring expired values
    EncryptionCert,
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProfileKind::CaCert => "ca_cert",
            ProfileKind::Crl => "crl",
            ProfileKind::DeltaCrl => "delta_crl",
            ProfileKind::CrossCertPair => "cross_cert_pair",
            ProfileKind::UserCert => "user_cert",
            ProfileKind::EncryptionCert => "encryption_cert",
        };
        f.write_str(name)
    }
}

/// Companion attributes seeded with placeholder values when a trigger class
/// is added to an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxSeed {
    pub trigger_classes: Vec<String>,
    pub attributes: Vec<String>,
}

impl AuxSeed {
    /// Seed used by every profile that may add an authority class
    pub fn authority() -> Self {
        AuxSeed {
            trigger_classes: AUTHORITY_CLASSES.iter().map(|s| s.to_string()).collect(),
            attributes: AUTHORITY_MUST_ATTRIBUTES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Parameters of one directory publisher variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterProfile {
    pub kind: ProfileKind,
    /// Attribute that receives the artifact
    pub value_attribute: String,
    /// `true`: values accumulate; `false`: the single value is replaced
    pub multi_valued: bool,
    /// Object classes the entry should carry when nothing is configured
    pub default_classes: Vec<String>,
    pub seed: Option<AuxSeed>,
    /// Strip authority classes when unpublish removes the last real value
    pub strip_classes_on_last_value: bool,
    /// Delete expired certificates from the attribute on publish
    pub retire_expired: bool,
}

impl AdapterProfile {
    pub fn for_kind(kind: ProfileKind) -> Self {
        match kind {
            ProfileKind::CaCert => AdapterProfile {
                kind,
                value_attribute: "cACertificate;binary".to_string(),
                multi_valued: true,
                default_classes: vec!["pkiCA".to_string()],
                seed: Some(AuxSeed::authority()),
                strip_classes_on_last_value: true,
                retire_expired: false,
            },
            ProfileKind::Crl => AdapterProfile {
                kind,
                value_attribute: "certificateRevocationList;binary".to_string(),
                multi_valued: false,
                default_classes: vec!["pkiCA".to_string()],
                seed: Some(AuxSeed::authority()),
                strip_classes_on_last_value: false,
                retire_expired: false,
            },
            ProfileKind::DeltaCrl => AdapterProfile {
                kind,
                value_attribute: "deltaRevocationList;binary".to_string(),
                multi_valued: false,
                default_classes: vec!["deltaCRL".to_string()],
                seed: None,
                strip_classes_on_last_value: false,
                retire_expired: false,
            },
            ProfileKind::CrossCertPair => AdapterProfile {
                kind,
                value_attribute: "crossCertificatePair;binary".to_string(),
                multi_valued: true,
                default_classes: vec!["pkiCA".to_string()],
                seed: Some(AuxSeed::authority()),
                strip_classes_on_last_value: true,
                retire_expired: false,
            },
            ProfileKind::UserCert => AdapterProfile {
                kind,
                value_attribute: "userCertificate;binary".to_string(),
                multi_valued: true,
                default_classes: vec![],
                seed: None,
                strip_classes_on_last_value: false,
                retire_expired: false,
            },
            ProfileKind::EncryptionCert => AdapterProfile {
                kind,
                value_attribute: "userCertificate;binary".to_string(),
                multi_valued: true,
                default_classes: vec![],
                seed: None,
                strip_classes_on_last_value: false,
                retire_expired: true,
            },
        }
    }

    /// Override the value attribute (e.g. a site-specific CRL attribute)
    pub fn with_value_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.value_attribute = attribute.into();
        self
    }

    /// Whether this profile publishes the given artifact
    ///
    /// Artifacts of a foreign kind are skipped, not failed: a sweep offers
    /// every artifact to every target.
    pub fn accepts(&self, artifact: &Artifact) -> bool {
        match (self.kind, artifact) {
            (ProfileKind::CaCert, Artifact::Certificate(_)) => true,
            (ProfileKind::UserCert, Artifact::Certificate(_)) => true,
            (ProfileKind::EncryptionCert, Artifact::Certificate(cert)) => cert.is_encryption_cert(),
            (ProfileKind::Crl, Artifact::Crl(crl)) => !crl.is_delta(),
            (ProfileKind::DeltaCrl, Artifact::Crl(crl)) => crl.is_delta(),
            (ProfileKind::CrossCertPair, Artifact::CertificatePair(_)) => true,
            _ => false,
        }
    }

    /// Artifact kind this profile expects
    pub fn artifact_kind(&self) -> ArtifactKind {
        match self.kind {
            ProfileKind::CaCert | ProfileKind::UserCert | ProfileKind::EncryptionCert => {
                ArtifactKind::Certificate
            }
            ProfileKind::Crl | ProfileKind::DeltaCrl => ArtifactKind::Crl,
            ProfileKind::CrossCertPair => ArtifactKind::CertificatePair,
        }
    }

    /// Wire form of the artifact for the value attribute
    pub fn value_for(&self, artifact: &Artifact) -> Result<Vec<u8>, ArtifactError> {
        if artifact.kind() != self.artifact_kind() {
            return Err(ArtifactError::Unsupported {
                profile: self.kind,
                kind: artifact.kind(),
            });
        }
        Ok(artifact.encoded().to_vec())
    }

    /// Authority classes this profile may strip, restricted to `desired`
    pub fn support_classes<'a>(&self, desired: &'a [String]) -> Vec<&'a str> {
        match &self.seed {
            Some(seed) => desired
                .iter()
                .map(|c| c.as_str())
                .filter(|c| crate::compare::contains_ignore_case(&seed.trigger_classes, c))
                .collect(),
            None => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{CertificateArtifact, CertificatePairArtifact, CrlArtifact, KeyUsageClass};
    use chrono::Utc;

    #[test]
    fn test_profile_defaults() {
        let ca = AdapterProfile::for_kind(ProfileKind::CaCert);
        assert_eq!(ca.value_attribute, "cACertificate;binary");
        assert!(ca.multi_valued);
        assert!(ca.seed.is_some());

        let crl = AdapterProfile::for_kind(ProfileKind::Crl);
        assert!(!crl.multi_valued);
        assert_eq!(crl.value_attribute, "certificateRevocationList;binary");

        let user = AdapterProfile::for_kind(ProfileKind::UserCert);
        assert!(user.default_classes.is_empty());
        assert!(user.seed.is_none());
    }

    #[test]
    fn test_accepts() {
        let signing = Artifact::Certificate(CertificateArtifact::new(vec![1], "1"));
        let encryption = Artifact::Certificate(CertificateArtifact::new(vec![2], "2").with_usage(
            KeyUsageClass {
                encryption: true,
                signing: false,
            },
        ));
        let full = Artifact::Crl(CrlArtifact::new(vec![3], Utc::now()));
        let delta = Artifact::Crl(CrlArtifact::new(vec![4], Utc::now()).delta(true));
        let pair = Artifact::CertificatePair(CertificatePairArtifact::new(vec![5]));

        let enc = AdapterProfile::for_kind(ProfileKind::EncryptionCert);
        assert!(!enc.accepts(&signing));
        assert!(enc.accepts(&encryption));

        let crl = AdapterProfile::for_kind(ProfileKind::Crl);
        assert!(crl.accepts(&full));
        assert!(!crl.accepts(&delta));
        assert!(AdapterProfile::for_kind(ProfileKind::DeltaCrl).accepts(&delta));

        let pairs = AdapterProfile::for_kind(ProfileKind::CrossCertPair);
        assert!(pairs.accepts(&pair));
        assert!(!pairs.accepts(&signing));
    }

    #[test]
    fn test_value_for_rejects_wrong_kind() {
        let profile = AdapterProfile::for_kind(ProfileKind::CrossCertPair);
        let crl = Artifact::Crl(CrlArtifact::new(vec![1], Utc::now()));
        let err = profile.value_for(&crl).unwrap_err();
        assert_eq!(
            err,
            ArtifactError::Unsupported {
                profile: ProfileKind::CrossCertPair,
                kind: ArtifactKind::Crl,
            }
        );
        assert_eq!(err.to_string(), "cross_cert_pair publisher cannot encode a CRL");
    }

    #[test]
    fn test_support_classes_only_authority() {
        let profile = AdapterProfile::for_kind(ProfileKind::CaCert);
        let desired = vec!["top".to_string(), "PKICA".to_string(), "device".to_string()];
        assert_eq!(profile.support_classes(&desired), vec!["PKICA"]);
    }
}
