//! OCSP responder agent push codec
//!
//! The responder's agent interface accepts a CRL as an urlencoded form post
//! and answers with plain `key=value` lines:
//!
//! ```text
//! POST /ocsp/agent/ocsp/addCRL HTTP/1.0
//! Host: ocsp.example.com:8443
//! Content-Type: application/x-www-form-urlencoded
//! Content-Length: 1234
//!
//! crl=-----BEGIN+CERTIFICATE+REVOCATION+LIST-----%0A...&noui=true
//! ```
//!
//! A response containing a `status=0` line is an acceptance; `error=<text>`
//! carries the responder's diagnostic. Every other line is ignored.

use crate::encoding::pem_armor;
use url::form_urlencoded;

/// PEM label used for pushed CRLs
pub const CRL_PEM_LABEL: &str = "CERTIFICATE REVOCATION LIST";

pub const CRL_PEM_HEADER: &str = "-----BEGIN CERTIFICATE REVOCATION LIST-----";
pub const CRL_PEM_FOOTER: &str = "-----END CERTIFICATE REVOCATION LIST-----";

/// Agent path used when the target does not configure one
pub const DEFAULT_AGENT_PATH: &str = "/ocsp/agent/ocsp/addCRL";

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// PEM-wrap a DER CRL
pub fn pem_wrap_crl(der: &[u8]) -> String {
    pem_armor(CRL_PEM_LABEL, der)
}

/// Form body `crl=<urlencoded PEM>&noui=true`
pub fn request_body(der: &[u8]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .append_pair("crl", &pem_wrap_crl(der))
        .append_pair("noui", "true")
        .finish()
}

/// Full request bytes: request line, headers, blank line, body
pub fn build_request(host: &str, path: &str, der: &[u8]) -> Vec<u8> {
    let body = request_body(der);
    let path = if path.trim().is_empty() {
        DEFAULT_AGENT_PATH
    } else {
        path
    };

    let mut request = format!(
        "POST {path} HTTP/1.0\r\n\
         Host: {host}\r\n\
         Content-Type: {FORM_CONTENT_TYPE}\r\n\
         Content-Length: {}\r\n\
         \r\n",
        body.len()
    )
    .into_bytes();
    request.extend_from_slice(body.as_bytes());
    request
}

/// Outcome of a push as reported by the responder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushStatus {
    /// `status=0` seen
    Accepted,
    /// Non-zero status; carries the `error=` text when one was sent
    Rejected(String),
    /// No status line at all; carries the `error=` text when one was sent
    Unknown(Option<String>),
}

impl PushStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(self, PushStatus::Accepted)
    }
}

/// Incremental scanner over response lines
///
/// Feed lines as they arrive, then call [`ResponseScanner::finish`] once the
/// peer has closed the connection. Any line starting with `status=0`
/// accepts the push; later status lines do not revoke it.
#[derive(Debug, Default)]
pub struct ResponseScanner {
    accepted: bool,
    status: Option<String>,
    error: Option<String>,
}

impl ResponseScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed_line(&mut self, line: &str) {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.starts_with("status=0") {
            self.accepted = true;
        }
        if let Some(status) = line.strip_prefix("status=") {
            self.status = Some(status.trim().to_string());
        } else if let Some(error) = line.strip_prefix("error=") {
            self.error = Some(error.trim().to_string());
        }
    }

    /// Whether a `status=` line has been seen
    pub fn has_status(&self) -> bool {
        self.status.is_some()
    }

    /// Scan a complete response
    pub fn scan(response: &str) -> PushStatus {
        let mut scanner = Self::new();
        for line in response.lines() {
            scanner.feed_line(line);
        }
        scanner.finish()
    }

    pub fn finish(self) -> PushStatus {
        if self.accepted {
            return PushStatus::Accepted;
        }
        match self.status.as_deref() {
            Some(code) => PushStatus::Rejected(
                self.error
                    .unwrap_or_else(|| format!("responder returned status={}", code)),
            ),
            None => PushStatus::Unknown(self.error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_encoding() {
        let body = request_body(&[1, 2, 3]);
        assert_eq!(
            body,
            "crl=-----BEGIN+CERTIFICATE+REVOCATION+LIST-----%0AAQID%0A-----END+CERTIFICATE+REVOCATION+LIST-----&noui=true"
        );
    }

    #[test]
    fn test_body_decodes_to_pem() {
        let der = vec![0x30u8; 200];
        let body = request_body(&der);
        let pairs: Vec<(String, String)> = form_urlencoded::parse(body.as_bytes())
            .into_owned()
            .collect();

        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, "crl");
        assert!(pairs[0].1.starts_with(CRL_PEM_HEADER));
        assert!(pairs[0].1.ends_with(CRL_PEM_FOOTER));
        assert_eq!(pairs[1], ("noui".to_string(), "true".to_string()));
    }

    #[test]
    fn test_build_request_headers() {
        let request = build_request("ocsp.example.com:8443", "", &[1, 2, 3]);
        let text = String::from_utf8(request).unwrap();
        let (head, body) = text.split_once("\r\n\r\n").unwrap();

        let mut lines = head.split("\r\n");
        assert_eq!(lines.next(), Some("POST /ocsp/agent/ocsp/addCRL HTTP/1.0"));
        assert!(head.contains("Host: ocsp.example.com:8443"));
        assert!(head.contains("Content-Type: application/x-www-form-urlencoded"));
        assert!(head.contains(&format!("Content-Length: {}", body.len())));
        assert!(body.ends_with("&noui=true"));
    }

    #[test]
    fn test_scan_accepted() {
        let response = "HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\nstatus=0\r\n";
        assert_eq!(ResponseScanner::scan(response), PushStatus::Accepted);
    }

    #[test]
    fn test_scan_error() {
        let response = "status=1\nerror=CRL is older than the current one\n";
        assert_eq!(
            ResponseScanner::scan(response),
            PushStatus::Rejected("CRL is older than the current one".to_string())
        );

        assert_eq!(
            ResponseScanner::scan("status=7\n"),
            PushStatus::Rejected("responder returned status=7".to_string())
        );
    }

    #[test]
    fn test_accepted_status_is_not_overridden() {
        assert_eq!(
            ResponseScanner::scan("status=0\nstatus=1\nerror=late failure\n"),
            PushStatus::Accepted
        );
        assert_eq!(ResponseScanner::scan("status=0 ok\n"), PushStatus::Accepted);

        let mut scanner = ResponseScanner::new();
        assert!(!scanner.has_status());
        scanner.feed_line("status=0\r\n");
        assert!(scanner.has_status());
    }

    #[test]
    fn test_scan_without_status() {
        assert_eq!(ResponseScanner::scan("<html></html>"), PushStatus::Unknown(None));
        assert_eq!(
            ResponseScanner::scan("error=unauthorized agent"),
            PushStatus::Unknown(Some("unauthorized agent".to_string()))
        );
    }
}
