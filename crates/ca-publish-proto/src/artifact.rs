//! Publishable artifacts
//!
//! An [`Artifact`] is what the CA hands to a publisher: a certificate, a CRL
//! or a raw cross-certificate pair. Artifacts are immutable once built; the
//! publisher only ever reads them.
//!
//! Certificates and CRLs can be built directly (when the caller already knows
//! the metadata) or parsed from DER with [`CertificateArtifact::from_der`] and
//! [`CrlArtifact::from_der`].

use crate::error::ArtifactError;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use x509_parser::oid_registry::asn1_rs::oid;
use x509_parser::prelude::*;

/// Artifact discriminant, used in logs, audit entries and profile checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Certificate,
    Crl,
    CertificatePair,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Certificate => write!(f, "certificate"),
            ArtifactKind::Crl => write!(f, "CRL"),
            ArtifactKind::CertificatePair => write!(f, "certificate pair"),
        }
    }
}

/// Something the CA wants published
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Certificate(CertificateArtifact),
    Crl(CrlArtifact),
    CertificatePair(CertificatePairArtifact),
}

impl Artifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Artifact::Certificate(_) => ArtifactKind::Certificate,
            Artifact::Crl(_) => ArtifactKind::Crl,
            Artifact::CertificatePair(_) => ArtifactKind::CertificatePair,
        }
    }

    /// Raw encoded bytes (DER for certificates and CRLs)
    pub fn encoded(&self) -> &[u8] {
        match self {
            Artifact::Certificate(cert) => cert.der(),
            Artifact::Crl(crl) => crl.der(),
            Artifact::CertificatePair(pair) => pair.bytes(),
        }
    }

    /// Short human readable identity for logs and audit records
    pub fn describe(&self) -> String {
        match self {
            Artifact::Certificate(cert) => format!("certificate serial={}", cert.serial()),
            Artifact::Crl(crl) => format!(
                "{} issuing_point={} this_update={}",
                if crl.is_delta() { "delta CRL" } else { "CRL" },
                crl.issuing_point().unwrap_or("-"),
                crl.this_update().to_rfc3339()
            ),
            Artifact::CertificatePair(pair) => {
                format!("certificate pair sha256={}", &pair.fingerprint()[..16])
            }
        }
    }

    /// Hex SHA-256 of the encoded bytes
    pub fn fingerprint(&self) -> String {
        sha256_hex(self.encoded())
    }
}

/// Key usage classification of a certificate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyUsageClass {
    /// keyEncipherment, dataEncipherment or keyAgreement is asserted
    pub encryption: bool,
    /// digitalSignature or nonRepudiation is asserted
    pub signing: bool,
}

/// A single end-entity or CA certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateArtifact {
    der: Vec<u8>,
    serial: String,
    subject: String,
    issuer: String,
    usage: KeyUsageClass,
    not_after: Option<DateTime<Utc>>,
}

impl CertificateArtifact {
    /// Build a certificate artifact from known metadata
    ///
    /// `serial` is the decimal serial number, as used in file names.
    pub fn new(der: Vec<u8>, serial: impl Into<String>) -> Self {
        CertificateArtifact {
            der,
            serial: serial.into(),
            subject: String::new(),
            issuer: String::new(),
            usage: KeyUsageClass::default(),
            not_after: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    pub fn with_usage(mut self, usage: KeyUsageClass) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_not_after(mut self, not_after: DateTime<Utc>) -> Self {
        self.not_after = Some(not_after);
        self
    }

    /// Parse a DER-encoded X.509 certificate
    pub fn from_der(der: &[u8]) -> Result<Self, ArtifactError> {
        let (_, cert) = parse_x509_certificate(der)
            .map_err(|e| ArtifactError::CertificateParse(e.to_string()))?;

        let usage = match cert.key_usage() {
            Ok(Some(ext)) => {
                let ku = ext.value;
                KeyUsageClass {
                    encryption: ku.key_encipherment() || ku.data_encipherment() || ku.key_agreement(),
                    signing: ku.digital_signature() || ku.non_repudiation(),
                }
            }
            Ok(None) => KeyUsageClass::default(),
            Err(e) => return Err(ArtifactError::CertificateParse(e.to_string())),
        };

        Ok(CertificateArtifact {
            der: der.to_vec(),
            serial: cert.serial.to_string(),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            usage,
            not_after: asn1_time_to_chrono(&cert.validity().not_after),
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Decimal serial number
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn usage(&self) -> KeyUsageClass {
        self.usage
    }

    pub fn is_encryption_cert(&self) -> bool {
        self.usage.encryption
    }

    pub fn is_signing_cert(&self) -> bool {
        self.usage.signing
    }

    pub fn not_after(&self) -> Option<DateTime<Utc>> {
        self.not_after
    }
}

/// A full or delta certificate revocation list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrlArtifact {
    der: Vec<u8>,
    this_update: DateTime<Utc>,
    delta: bool,
    issuing_point: Option<String>,
    crl_number: Option<String>,
}

impl CrlArtifact {
    pub fn new(der: Vec<u8>, this_update: DateTime<Utc>) -> Self {
        CrlArtifact {
            der,
            this_update,
            delta: false,
            issuing_point: None,
            crl_number: None,
        }
    }

    /// Mark this CRL as a delta CRL
    pub fn delta(mut self, delta: bool) -> Self {
        self.delta = delta;
        self
    }

    /// Set the CA issuing point identifier (e.g. `MasterCRL`)
    pub fn with_issuing_point(mut self, id: impl Into<String>) -> Self {
        self.issuing_point = Some(id.into());
        self
    }

    /// Parse a DER-encoded CRL
    ///
    /// The delta flag is taken from the presence of the Delta CRL Indicator
    /// extension (2.5.29.27).
    pub fn from_der(der: &[u8]) -> Result<Self, ArtifactError> {
        let (_, crl) =
            parse_x509_crl(der).map_err(|e| ArtifactError::CrlParse(e.to_string()))?;

        let this_update = asn1_time_to_chrono(&crl.last_update())
            .ok_or_else(|| ArtifactError::CrlParse("Invalid thisUpdate time".to_string()))?;

        let delta_indicator = oid!(2.5.29.27);
        let delta = crl
            .extensions()
            .iter()
            .any(|ext| ext.oid == delta_indicator);

        Ok(CrlArtifact {
            der: der.to_vec(),
            this_update,
            delta,
            issuing_point: None,
            crl_number: crl.crl_number().map(|n| n.to_string()),
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn this_update(&self) -> DateTime<Utc> {
        self.this_update
    }

    pub fn is_delta(&self) -> bool {
        self.delta
    }

    pub fn issuing_point(&self) -> Option<&str> {
        self.issuing_point.as_deref()
    }

    pub fn crl_number(&self) -> Option<&str> {
        self.crl_number.as_deref()
    }
}

/// Raw `crossCertificatePair` value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePairArtifact {
    bytes: Vec<u8>,
}

impl CertificatePairArtifact {
    pub fn new(bytes: Vec<u8>) -> Self {
        CertificatePairArtifact { bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn fingerprint(&self) -> String {
        sha256_hex(&self.bytes)
    }
}

/// Read the notAfter of a DER certificate, if it parses
pub fn certificate_not_after(der: &[u8]) -> Option<DateTime<Utc>> {
    let (_, cert) = parse_x509_certificate(der).ok()?;
    asn1_time_to_chrono(&cert.validity().not_after)
}

fn asn1_time_to_chrono(time: &ASN1Time) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(time.timestamp(), 0).single()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
