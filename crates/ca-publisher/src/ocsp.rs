//! OCSP responder CRL push
//!
//! Sends a PEM-wrapped CRL to the responder's agent endpoint as a form POST
//! and reads back the line-oriented `status=` / `error=` reply. Pushes are
//! best effort: the publisher defaults to [`FailurePolicy::FailOpen`], so a
//! failed push is logged and audited but never fails the caller.
//!
//! A target may list several `host:port` candidates separated by spaces.
//! With one host a connection failure is reported at once. With several, the
//! hosts are tried in turn with [`RetryPolicy::retry_interval`] seconds
//! between failures until one answers, `max_attempts` is reached, the retry
//! deadline passes, or the call is cancelled.
//!
//! [`RetryPolicy::retry_interval`]: crate::policy::RetryPolicy

use crate::audit::{AuditSink, NullAuditSink, Operation};
use crate::config::OcspTargetConfig;
use crate::error::{PublishError, PublishReport, PublishResult};
use crate::policy::{CallContext, FailurePolicy};
use crate::publisher::{conclude, Publisher};
use ca_publish_proto::ocsp_push::build_request;
use ca_publish_proto::{Artifact, CrlArtifact, PushStatus, ResponseScanner};
use pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

trait Transport: Read + Write {}
impl<T: Read + Write> Transport for T {}

/// One responder endpoint, ready to connect
pub struct ResponderEndpoint {
    host: String,
    port: u16,
    path: String,
    timeout: Duration,
    tls: Option<Arc<ClientConfig>>,
}

impl ResponderEndpoint {
    /// Parse `host:port`
    pub fn new(
        candidate: &str,
        path: &str,
        timeout: Duration,
        tls: Option<Arc<ClientConfig>>,
    ) -> PublishResult<Self> {
        let (host, port) = candidate
            .rsplit_once(':')
            .and_then(|(host, port)| Some((host, port.parse::<u16>().ok()?)))
            .ok_or_else(|| {
                PublishError::InvalidTarget(format!("expected host:port, got '{}'", candidate))
            })?;

        Ok(ResponderEndpoint {
            host: host.trim_matches(['[', ']']).to_string(),
            port,
            path: path.to_string(),
            timeout,
            tls,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn connect(&self, ctx: &CallContext) -> PublishResult<Box<dyn Transport>> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| self.unreachable(e))?
            .collect();

        let timeout = match ctx.remaining() {
            Some(left) => self.timeout.min(left.max(Duration::from_millis(1))),
            None => self.timeout,
        };

        let mut last_error = io::Error::new(io::ErrorKind::NotFound, "no addresses resolved");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(timeout))
                        .map_err(|e| self.unreachable(e))?;
                    stream
                        .set_write_timeout(Some(timeout))
                        .map_err(|e| self.unreachable(e))?;
                    return self.wrap(stream);
                }
                Err(e) => last_error = e,
            }
        }
        Err(self.unreachable(last_error))
    }

    fn wrap(&self, stream: TcpStream) -> PublishResult<Box<dyn Transport>> {
        let config = match &self.tls {
            Some(config) => config.clone(),
            None => return Ok(Box::new(stream)),
        };

        let server_name = ServerName::try_from(self.host.clone()).map_err(|e| {
            PublishError::InvalidTarget(format!("invalid responder name '{}': {}", self.host, e))
        })?;
        let conn = ClientConnection::new(config, server_name)
            .map_err(|e| PublishError::Config(format!("TLS setup failed: {}", e)))?;
        Ok(Box::new(StreamOwned::new(conn, stream)))
    }

    /// Push one CRL and read the responder's verdict
    pub fn push(&self, crl: &CrlArtifact, ctx: &CallContext) -> PublishResult<PushStatus> {
        let mut stream = self.connect(ctx)?;

        let request = build_request(&self.host, &self.path, crl.der());
        stream
            .write_all(&request)
            .and_then(|_| stream.flush())
            .map_err(|e| self.unreachable(e))?;
        debug!(
            responder = %self.address(),
            bytes = request.len(),
            "Sent CRL to OCSP responder"
        );

        let mut reader = BufReader::new(stream);
        let mut scanner = ResponseScanner::new();
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => scanner.feed_line(&String::from_utf8_lossy(&line)),
                // Responders often close without a TLS close_notify
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                // Some responders keep the socket open after replying
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    if !line.is_empty() {
                        scanner.feed_line(&String::from_utf8_lossy(&line));
                    }
                    if !scanner.has_status() {
                        return Err(self.unreachable(e));
                    }
                    debug!(responder = %self.address(), "Responder kept connection open after status");
                    break;
                }
                Err(e) => return Err(self.unreachable(e)),
            }
        }
        Ok(scanner.finish())
    }

    fn unreachable(&self, err: io::Error) -> PublishError {
        PublishError::Unreachable(format!("{}: {}", self.address(), err))
    }
}

/// Build the TLS client configuration for a target
///
/// Trust anchors come from `ca_cert_path`; a client certificate and key, when
/// both are configured, authenticate the agent.
pub fn client_config(target: &OcspTargetConfig) -> PublishResult<ClientConfig> {
    let ca_path = target.ca_cert_path.as_deref().ok_or_else(|| {
        PublishError::Config(format!("OCSP target {}: tls requires ca_cert_path", target.name))
    })?;

    let mut roots = RootCertStore::empty();
    for cert in load_certificates(ca_path)? {
        roots
            .add(cert)
            .map_err(|e| PublishError::Config(format!("Invalid CA certificate: {}", e)))?;
    }

    let builder = ClientConfig::builder().with_root_certificates(roots);
    let config = match (&target.client_cert_path, &target.client_key_path) {
        (Some(cert_path), Some(key_path)) => builder
            .with_client_auth_cert(load_certificates(cert_path)?, load_private_key(key_path)?)
            .map_err(|e| PublishError::Config(format!("Invalid client certificate: {}", e)))?,
        _ => builder.with_no_client_auth(),
    };
    Ok(config)
}

fn load_certificates(path: &str) -> PublishResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        PublishError::Config(format!("Failed to open certificate file '{}': {}", path, e))
    })?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| PublishError::Config(format!("Failed to parse certificates: {}", e)))?;

    if certs.is_empty() {
        return Err(PublishError::Config(format!(
            "No certificates found in '{}'",
            path
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &str) -> PublishResult<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| PublishError::Config(format!("Failed to open key file '{}': {}", path, e)))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| PublishError::Config(format!("Failed to parse private key: {}", e)))?
        .ok_or_else(|| PublishError::Config(format!("No private key found in '{}'", path)))
}

/// Pushes CRLs to OCSP responders
pub struct OcspPublisher {
    audit: Arc<dyn AuditSink>,
    policy: FailurePolicy,
}

impl Default for OcspPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl OcspPublisher {
    pub fn new() -> Self {
        OcspPublisher {
            audit: Arc::new(NullAuditSink),
            policy: FailurePolicy::FailOpen,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    fn endpoints(&self, target: &OcspTargetConfig) -> PublishResult<Vec<ResponderEndpoint>> {
        let tls = if target.tls {
            Some(Arc::new(client_config(target)?))
        } else {
            None
        };
        let timeout = Duration::from_secs(target.timeout);

        let endpoints = target
            .hosts()
            .iter()
            .map(|host| ResponderEndpoint::new(host, &target.path, timeout, tls.clone()))
            .collect::<PublishResult<Vec<_>>>()?;
        if endpoints.is_empty() {
            return Err(PublishError::InvalidTarget(format!(
                "OCSP target {} has no responder host",
                target.name
            )));
        }
        Ok(endpoints)
    }

    fn push(
        &self,
        crl: &CrlArtifact,
        target: &OcspTargetConfig,
        ctx: &CallContext,
    ) -> PublishResult<PublishReport> {
        ctx.check()?;
        let endpoints = self.endpoints(target)?;

        let status = if let [endpoint] = endpoints.as_slice() {
            endpoint.push(crl, ctx)?
        } else {
            self.push_with_failover(crl, &endpoints, target, ctx)?
        };

        match status {
            PushStatus::Accepted => Ok(PublishReport::Applied { changes: 1 }),
            PushStatus::Rejected(reason) => Err(PublishError::Rejected(reason)),
            PushStatus::Unknown(Some(reason)) => Err(PublishError::Rejected(reason)),
            PushStatus::Unknown(None) => Err(PublishError::Rejected(
                "responder sent no status".to_string(),
            )),
        }
    }

    fn push_with_failover(
        &self,
        crl: &CrlArtifact,
        endpoints: &[ResponderEndpoint],
        target: &OcspTargetConfig,
        ctx: &CallContext,
    ) -> PublishResult<PushStatus> {
        let ctx = ctx.bounded_by(target.retry.deadline_from_now());
        let mut attempts = 0;
        let mut last = String::new();

        for endpoint in endpoints.iter().cycle() {
            if attempts >= target.retry.max_attempts {
                break;
            }
            if attempts > 0 {
                ctx.sleep(target.retry.interval())?;
            }
            attempts += 1;

            match endpoint.push(crl, &ctx) {
                Ok(status) => {
                    if attempts > 1 {
                        info!(
                            responder = %endpoint.address(),
                            attempts,
                            "OCSP responder reached after failover"
                        );
                    }
                    return Ok(status);
                }
                Err(e) if e.is_unreachable() => {
                    warn!(responder = %endpoint.address(), error = %e, "OCSP responder unreachable");
                    last = e.to_string();
                }
                Err(e) => return Err(e),
            }
        }

        Err(PublishError::RetriesExhausted { attempts, last })
    }
}

impl Publisher for OcspPublisher {
    type Target = OcspTargetConfig;

    fn name(&self) -> String {
        "ocsp".to_string()
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    fn publish(
        &self,
        artifact: &Artifact,
        target: &OcspTargetConfig,
        ctx: &CallContext,
    ) -> PublishResult<PublishReport> {
        let result = match artifact {
            Artifact::Crl(crl) => self.push(crl, target, ctx),
            other => Ok(PublishReport::Skipped(format!(
                "OCSP responders only take CRLs, not a {}",
                other.kind()
            ))),
        };
        conclude(
            self.policy,
            self.audit.as_ref(),
            Operation::Publish,
            "ocsp",
            &target.host,
            artifact,
            result,
        )
    }

    /// Responders drop superseded CRLs on their own
    fn unpublish(
        &self,
        artifact: &Artifact,
        target: &OcspTargetConfig,
        _ctx: &CallContext,
    ) -> PublishResult<PublishReport> {
        conclude(
            self.policy,
            self.audit.as_ref(),
            Operation::Unpublish,
            "ocsp",
            &target.host,
            artifact,
            Ok(PublishReport::Skipped(
                "OCSP responders have no unpublish".to_string(),
            )),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::net::TcpListener;

    fn closed_port() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    }

    #[test]
    fn test_endpoint_parsing() {
        let ep = ResponderEndpoint::new("ocsp.example.com:8443", "/p", Duration::from_secs(1), None)
            .unwrap();
        assert_eq!(ep.address(), "ocsp.example.com:8443");

        assert!(matches!(
            ResponderEndpoint::new("no-port", "/p", Duration::from_secs(1), None),
            Err(PublishError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_single_host_fails_immediately() {
        let target = OcspTargetConfig::new("ocsp", closed_port());
        let crl = CrlArtifact::new(vec![1, 2, 3], Utc::now());

        let err = OcspPublisher::new()
            .push(&crl, &target, &CallContext::new())
            .unwrap_err();
        assert!(err.is_unreachable());
    }

    #[test]
    fn test_failover_bounded_by_attempts() {
        let mut target = OcspTargetConfig::new("ocsp", format!("{} {}", closed_port(), closed_port()));
        target.retry.retry_interval = 0;
        target.retry.max_attempts = 3;
        let crl = CrlArtifact::new(vec![1, 2, 3], Utc::now());

        let err = OcspPublisher::new()
            .push(&crl, &target, &CallContext::new())
            .unwrap_err();
        assert!(matches!(err, PublishError::RetriesExhausted { attempts: 3, .. }));
    }

    #[test]
    fn test_tls_requires_ca() {
        let mut target = OcspTargetConfig::new("ocsp", "localhost:443");
        target.tls = true;
        assert!(matches!(client_config(&target), Err(PublishError::Config(_))));
    }

    #[test]
    fn test_non_crl_skipped() {
        let target = OcspTargetConfig::new("ocsp", closed_port());
        let cert = Artifact::Certificate(ca_publish_proto::CertificateArtifact::new(vec![1], "1"));
        let report = OcspPublisher::new()
            .publish(&cert, &target, &CallContext::new())
            .unwrap();
        assert!(matches!(report, PublishReport::Skipped(_)));
    }
}
