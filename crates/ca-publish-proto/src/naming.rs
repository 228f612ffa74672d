//! File names used by the filesystem mirror
//!
//! ```text
//! <dir>/cert-<serial>.der|.b64
//! <dir>/<prefix>-<YYYYMMDD-HHMMSS>[-delta].der|.b64|.zip
//! <dir>/<prefix>[-delta].<ext>            (rotating "latest" link)
//! ```

use crate::artifact::{CertificateArtifact, CrlArtifact};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Prefix used when a CRL carries no issuing point id
pub const DEFAULT_CRL_PREFIX: &str = "crl";

/// Suffix appended to delta CRL names
pub const DELTA_SUFFIX: &str = "-delta";

/// Extensions of the data files written for one artifact
pub const DATA_EXTENSIONS: [&str; 3] = ["der", "b64", "zip"];

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
const TIMESTAMP_LEN: usize = 15;

/// Time zone used to render CRL timestamps in file names
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampZone {
    /// Host local time
    #[default]
    Local,
    /// Coordinated universal time
    Utc,
}

/// Render a timestamp as `YYYYMMDD-HHMMSS`
pub fn format_timestamp(ts: DateTime<Utc>, zone: TimestampZone) -> String {
    match zone {
        TimestampZone::Utc => ts.format(TIMESTAMP_FORMAT).to_string(),
        TimestampZone::Local => ts.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string(),
    }
}

/// Name prefix of a CRL: its issuing point id, or `crl`
pub fn crl_prefix(crl: &CrlArtifact) -> &str {
    match crl.issuing_point() {
        Some(id) if !id.trim().is_empty() => id,
        _ => DEFAULT_CRL_PREFIX,
    }
}

/// `<prefix>-<timestamp>[-delta]`
pub fn crl_base_name(crl: &CrlArtifact, zone: TimestampZone) -> String {
    format!(
        "{}-{}{}",
        crl_prefix(crl),
        format_timestamp(crl.this_update(), zone),
        if crl.is_delta() { DELTA_SUFFIX } else { "" }
    )
}

/// `cert-<serial>`
pub fn cert_base_name(cert: &CertificateArtifact) -> String {
    format!("cert-{}", cert.serial())
}

/// `<prefix>[-delta].<ext>`
pub fn link_name(prefix: &str, delta: bool, extension: &str) -> String {
    format!(
        "{}{}.{}",
        prefix,
        if delta { DELTA_SUFFIX } else { "" },
        extension
    )
}

/// Components of a CRL data file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCrlName {
    pub prefix: String,
    /// `YYYYMMDD-HHMMSS`
    pub timestamp: String,
    pub delta: bool,
    pub extension: String,
}

impl ParsedCrlName {
    /// File name without extension
    pub fn base_name(&self) -> String {
        format!(
            "{}-{}{}",
            self.prefix,
            self.timestamp,
            if self.delta { DELTA_SUFFIX } else { "" }
        )
    }
}

/// Parse a CRL data file name produced by [`crl_base_name`]
///
/// Returns `None` for links, temp files, certificates and foreign files.
pub fn parse_crl_file_name(name: &str) -> Option<ParsedCrlName> {
    let (stem, extension) = name.rsplit_once('.')?;
    if !DATA_EXTENSIONS.contains(&extension) {
        return None;
    }

    let (stem, delta) = match stem.strip_suffix(DELTA_SUFFIX) {
        Some(rest) => (rest, true),
        None => (stem, false),
    };

    if stem.len() < TIMESTAMP_LEN + 2 || !stem.is_char_boundary(stem.len() - TIMESTAMP_LEN) {
        return None;
    }
    let split = stem.len() - TIMESTAMP_LEN;
    let (head, timestamp) = stem.split_at(split);
    let prefix = head.strip_suffix('-')?;
    if prefix.is_empty() || !is_timestamp(timestamp) {
        return None;
    }

    Some(ParsedCrlName {
        prefix: prefix.to_string(),
        timestamp: timestamp.to_string(),
        delta,
        extension: extension.to_string(),
    })
}

fn is_timestamp(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == TIMESTAMP_LEN
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| if i == 8 { *b == b'-' } else { b.is_ascii_digit() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_crl() -> CrlArtifact {
        CrlArtifact::new(vec![1], Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
    }

    #[test]
    fn test_crl_base_name_utc() {
        let crl = sample_crl().with_issuing_point("masterCRL");
        assert_eq!(
            crl_base_name(&crl, TimestampZone::Utc),
            "masterCRL-20240102-030405"
        );
    }

    #[test]
    fn test_crl_base_name_defaults_and_delta() {
        let crl = sample_crl().delta(true);
        assert_eq!(
            crl_base_name(&crl, TimestampZone::Utc),
            "crl-20240102-030405-delta"
        );

        let blank = sample_crl().with_issuing_point("  ");
        assert_eq!(crl_prefix(&blank), "crl");
    }

    #[test]
    fn test_local_timestamp_matches_chrono_local() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 30, 23, 59, 59).unwrap();
        let expected = ts.with_timezone(&Local).format("%Y%m%d-%H%M%S").to_string();
        assert_eq!(format_timestamp(ts, TimestampZone::Local), expected);
    }

    #[test]
    fn test_cert_and_link_names() {
        let cert = CertificateArtifact::new(vec![], "123456789");
        assert_eq!(cert_base_name(&cert), "cert-123456789");
        assert_eq!(link_name("masterCRL", false, "der"), "masterCRL.der");
        assert_eq!(link_name("masterCRL", true, "b64"), "masterCRL-delta.b64");
    }

    #[test]
    fn test_parse_crl_file_name() {
        let parsed = parse_crl_file_name("master-CRL-20240102-030405-delta.zip").unwrap();
        assert_eq!(parsed.prefix, "master-CRL");
        assert_eq!(parsed.timestamp, "20240102-030405");
        assert!(parsed.delta);
        assert_eq!(parsed.extension, "zip");
        assert_eq!(parsed.base_name(), "master-CRL-20240102-030405-delta");

        assert!(parse_crl_file_name("masterCRL.der").is_none());
        assert!(parse_crl_file_name("masterCRL-20240102-030405.temp").is_none());
        assert!(parse_crl_file_name("cert-42.der").is_none());
        assert!(parse_crl_file_name("-20240102-030405.der").is_none());
        assert!(parse_crl_file_name("x-2024010X-030405.der").is_none());
    }

    #[test]
    fn test_timezone_serialization() {
        let json = serde_json::to_string(&TimestampZone::Utc).unwrap();
        assert_eq!(json, "\"utc\"");
        let zone: TimestampZone = serde_json::from_str("\"local\"").unwrap();
        assert_eq!(zone, TimestampZone::Local);
    }
}
