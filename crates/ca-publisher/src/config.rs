use crate::error::{PublishError, PublishResult};
use crate::policy::RetryPolicy;
use ca_publish_proto::naming::DATA_EXTENSIONS;
use ca_publish_proto::ocsp_push::DEFAULT_AGENT_PATH;
use ca_publish_proto::{Artifact, ProfileKind, TimestampZone};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// LDAP connection settings
///
/// Used for the default directory connection and for per-target alternate
/// connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LdapConnectionConfig {
    pub host: String,

    #[serde(default = "default_ldap_port")]
    pub port: u16,

    /// Connect with LDAPS instead of plain LDAP
    #[serde(default)]
    pub secure: bool,

    /// Upgrade a plain connection with StartTLS
    #[serde(default)]
    pub starttls: bool,

    /// LDAP protocol version; only version 3 is supported
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u8,

    /// Bind DN; anonymous bind when absent and no client certificate is set
    #[serde(default)]
    pub bind_dn: Option<String>,

    #[serde(default)]
    pub bind_password: Option<String>,

    /// PEM client certificate for TLS client authentication (SASL EXTERNAL)
    #[serde(default)]
    pub client_cert_path: Option<String>,

    /// PEM PKCS#8 key matching `client_cert_path`
    #[serde(default)]
    pub client_key_path: Option<String>,

    /// Connection timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Require a valid server certificate for TLS connections
    #[serde(default = "default_true")]
    pub verify_tls: bool,
}

fn default_ldap_port() -> u16 {
    389
}

fn default_protocol_version() -> u8 {
    3
}

fn default_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl LdapConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        LdapConnectionConfig {
            host: host.into(),
            port,
            secure: false,
            starttls: false,
            protocol_version: default_protocol_version(),
            bind_dn: None,
            bind_password: None,
            client_cert_path: None,
            client_key_path: None,
            timeout: default_timeout(),
            verify_tls: true,
        }
    }

    /// `ldap://host:port` or `ldaps://host:port`
    pub fn url(&self) -> String {
        format!(
            "{}://{}:{}",
            if self.secure { "ldaps" } else { "ldap" },
            self.host,
            self.port
        )
    }

    fn validate(&self, context: &str) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("{}: LDAP host is empty", context)));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid(format!("{}: LDAP port cannot be 0", context)));
        }
        if self.protocol_version != 3 {
            return Err(ConfigError::Invalid(format!(
                "{}: unsupported LDAP protocol version {}",
                context, self.protocol_version
            )));
        }
        if self.secure && self.starttls {
            return Err(ConfigError::Invalid(format!(
                "{}: secure and starttls are mutually exclusive",
                context
            )));
        }
        if self.client_cert_path.is_some() != self.client_key_path.is_some() {
            return Err(ConfigError::Invalid(format!(
                "{}: client_cert_path and client_key_path must be set together",
                context
            )));
        }
        if self.bind_dn.is_some() && self.bind_password.is_none() {
            return Err(ConfigError::Invalid(format!(
                "{}: bind_dn set without bind_password",
                context
            )));
        }
        Ok(())
    }
}

/// How a directory target finds the entry for an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DnMapping {
    /// Always the same entry (CA entries, CRL distribution points)
    Fixed { dn: String },
    /// The certificate subject, RDNs in directory order
    Subject,
}

impl Default for DnMapping {
    fn default() -> Self {
        DnMapping::Subject
    }
}

impl DnMapping {
    /// Resolve the entry DN for `artifact`
    pub fn resolve(&self, artifact: &Artifact) -> PublishResult<String> {
        match self {
            DnMapping::Fixed { dn } => Ok(dn.clone()),
            DnMapping::Subject => match artifact {
                Artifact::Certificate(cert) if !cert.subject().trim().is_empty() => {
                    Ok(subject_to_dn(cert.subject()))
                }
                _ => Err(PublishError::InvalidTarget(format!(
                    "cannot derive a DN from a {} without a subject",
                    artifact.kind()
                ))),
            },
        }
    }
}

/// Reverse an X.509 subject (`C=US, O=Example, CN=alice`) into an LDAP DN
/// (`CN=alice,O=Example,C=US`)
pub fn subject_to_dn(subject: &str) -> String {
    let rdns: Vec<&str> = subject
        .split(',')
        .map(|rdn| rdn.trim())
        .filter(|rdn| !rdn.is_empty())
        .collect();
    rdns.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Directory target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LdapTargetConfig {
    /// Unique target name, also the key for persisted class markers
    pub name: String,

    pub profile: ProfileKind,

    #[serde(default)]
    pub dn: DnMapping,

    /// Override of the profile's value attribute
    #[serde(default)]
    pub value_attribute: Option<String>,

    /// Comma separated object classes; profile default when absent
    #[serde(default)]
    pub object_classes: Option<String>,

    /// Connection used instead of the default directory connection
    #[serde(default)]
    pub alt_connection: Option<LdapConnectionConfig>,
}

/// CRL retention limits for a file target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Full CRL generations to keep
    #[serde(default)]
    pub max_full_crls: Option<usize>,

    /// Delta CRL generations to keep
    #[serde(default)]
    pub max_delta_crls: Option<usize>,

    /// Purge generations older than this many hours
    #[serde(default)]
    pub max_age_hours: Option<u64>,
}

impl RetentionConfig {
    pub fn is_enabled(&self) -> bool {
        self.max_full_crls.is_some() || self.max_delta_crls.is_some() || self.max_age_hours.is_some()
    }
}

/// Filesystem mirror target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTargetConfig {
    pub name: String,

    /// Directory the files are written to
    pub directory: String,

    #[serde(default = "default_true")]
    pub write_der: bool,

    #[serde(default)]
    pub write_base64: bool,

    /// Time zone for CRL timestamps in file names
    #[serde(default)]
    pub timezone: TimestampZone,

    /// Maintain a `<prefix>[-delta].<ext>` link to the newest CRL
    #[serde(default)]
    pub latest_link: bool,

    #[serde(default = "default_link_extension")]
    pub link_extension: String,

    /// Also write `<base>.zip` holding `<base>.der`
    #[serde(default)]
    pub zip: bool,

    /// 0 stores the entry uncompressed, 1-9 deflate levels
    #[serde(default = "default_zip_level")]
    pub zip_level: u32,

    #[serde(default)]
    pub retention: RetentionConfig,
}

fn default_link_extension() -> String {
    "der".to_string()
}

fn default_zip_level() -> u32 {
    9
}

impl FileTargetConfig {
    pub fn new(name: impl Into<String>, directory: impl Into<String>) -> Self {
        FileTargetConfig {
            name: name.into(),
            directory: directory.into(),
            write_der: true,
            write_base64: false,
            timezone: TimestampZone::default(),
            latest_link: false,
            link_extension: default_link_extension(),
            zip: false,
            zip_level: default_zip_level(),
            retention: RetentionConfig::default(),
        }
    }

    /// Whether a data file with this extension is produced for CRLs
    pub fn writes_extension(&self, extension: &str) -> bool {
        match extension {
            "der" => self.write_der,
            "b64" => self.write_base64,
            "zip" => self.zip,
            _ => false,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.directory.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "File target {}: directory is empty",
                self.name
            )));
        }
        if self.zip_level > 9 {
            return Err(ConfigError::Invalid(format!(
                "File target {}: zip_level must be 0-9, got {}",
                self.name, self.zip_level
            )));
        }
        if self.latest_link {
            if !DATA_EXTENSIONS.contains(&self.link_extension.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "File target {}: link_extension must be one of der, b64, zip",
                    self.name
                )));
            }
            if !self.writes_extension(&self.link_extension) {
                return Err(ConfigError::Invalid(format!(
                    "File target {}: link points at .{} files that are not written",
                    self.name, self.link_extension
                )));
            }
        }
        Ok(())
    }
}

/// OCSP responder target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcspTargetConfig {
    pub name: String,

    /// `host:port`, or several separated by spaces for failover
    pub host: String,

    #[serde(default = "default_agent_path")]
    pub path: String,

    /// Connect with TLS
    #[serde(default)]
    pub tls: bool,

    /// PEM trust anchors for the responder certificate
    #[serde(default)]
    pub ca_cert_path: Option<String>,

    /// PEM client certificate chain for agent authentication
    #[serde(default)]
    pub client_cert_path: Option<String>,

    #[serde(default)]
    pub client_key_path: Option<String>,

    /// Connect/read timeout per attempt in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_agent_path() -> String {
    DEFAULT_AGENT_PATH.to_string()
}

impl OcspTargetConfig {
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        OcspTargetConfig {
            name: name.into(),
            host: host.into(),
            path: default_agent_path(),
            tls: false,
            ca_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
            timeout: default_timeout(),
            retry: RetryPolicy::default(),
        }
    }

    /// Candidate `host:port` entries in order
    pub fn hosts(&self) -> Vec<String> {
        self.host.split_whitespace().map(|h| h.to_string()).collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let hosts = self.hosts();
        if hosts.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "OCSP target {}: no responder host",
                self.name
            )));
        }
        for host in &hosts {
            match host.rsplit_once(':') {
                Some((name, port)) if !name.is_empty() && port.parse::<u16>().is_ok() => {}
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "OCSP target {}: expected host:port, got {}",
                        self.name, host
                    )))
                }
            }
        }
        if !self.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "OCSP target {}: path must start with '/'",
                self.name
            )));
        }
        if self.client_cert_path.is_some() != self.client_key_path.is_some() {
            return Err(ConfigError::Invalid(format!(
                "OCSP target {}: client_cert_path and client_key_path must be set together",
                self.name
            )));
        }
        if self.tls && self.ca_cert_path.is_none() {
            return Err(ConfigError::Invalid(format!(
                "OCSP target {}: tls requires ca_cert_path",
                self.name
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(format!(
                "OCSP target {}: retry.max_attempts cannot be 0",
                self.name
            )));
        }
        Ok(())
    }
}

/// One configured publishing target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetConfig {
    Ldap(LdapTargetConfig),
    File(FileTargetConfig),
    Ocsp(OcspTargetConfig),
}

impl TargetConfig {
    pub fn name(&self) -> &str {
        match self {
            TargetConfig::Ldap(t) => &t.name,
            TargetConfig::File(t) => &t.name,
            TargetConfig::Ocsp(t) => &t.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TargetConfig::Ldap(_) => "ldap",
            TargetConfig::File(_) => "file",
            TargetConfig::Ocsp(_) => "ocsp",
        }
    }
}

/// Publisher configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Log level: "trace", "debug", "info", "warn", "error" (default: "info")
    #[serde(default)]
    pub log_level: Option<String>,

    /// Audit log file path (JSON Lines, optional)
    #[serde(default)]
    pub audit_log_path: Option<String>,

    /// State file for one-shot object class markers; in-memory when absent
    #[serde(default)]
    pub state_path: Option<String>,

    /// Default directory connection for LDAP targets
    #[serde(default)]
    pub directory: Option<LdapConnectionConfig>,

    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn target(&self, name: &str) -> Option<&TargetConfig> {
        self.targets.iter().find(|t| t.name() == name)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(directory) = &self.directory {
            directory.validate("directory")?;
        }

        let mut names = HashSet::new();
        for target in &self.targets {
            if target.name().trim().is_empty() {
                return Err(ConfigError::Invalid("Target has empty name".to_string()));
            }
            if !names.insert(target.name()) {
                return Err(ConfigError::Invalid(format!(
                    "Duplicate target name: {}",
                    target.name()
                )));
            }

            match target {
                TargetConfig::Ldap(t) => {
                    match &t.alt_connection {
                        Some(alt) => alt.validate(&format!("LDAP target {}", t.name))?,
                        None if self.directory.is_none() => {
                            return Err(ConfigError::Invalid(format!(
                                "LDAP target {} has no alt_connection and no default directory",
                                t.name
                            )))
                        }
                        None => {}
                    }
                    if let DnMapping::Fixed { dn } = &t.dn {
                        if dn.trim().is_empty() {
                            return Err(ConfigError::Invalid(format!(
                                "LDAP target {}: fixed dn is empty",
                                t.name
                            )));
                        }
                    }
                }
                TargetConfig::File(t) => t.validate()?,
                TargetConfig::Ocsp(t) => t.validate()?,
            }
        }

        Ok(())
    }

    /// Create an example configuration file
    pub fn example() -> Self {
        let mut bind = LdapConnectionConfig::new("ldap.example.com", 389);
        bind.bind_dn = Some("cn=Directory Manager".to_string());
        bind.bind_password = Some("changeit".to_string());

        let mut files = FileTargetConfig::new("crl-mirror", "/var/lib/ca/crl");
        files.write_base64 = true;
        files.zip = true;
        files.latest_link = true;
        files.timezone = TimestampZone::Utc;
        files.retention.max_full_crls = Some(10);
        files.retention.max_delta_crls = Some(20);

        let mut ocsp = OcspTargetConfig::new("ocsp", "ocsp1.example.com:8443 ocsp2.example.com:8443");
        ocsp.tls = true;
        ocsp.ca_cert_path = Some("/etc/ca/ocsp-ca.pem".to_string());
        ocsp.client_cert_path = Some("/etc/ca/agent.pem".to_string());
        ocsp.client_key_path = Some("/etc/ca/agent-key.pem".to_string());

        Config {
            log_level: Some("info".to_string()),
            audit_log_path: Some("/var/log/ca/publish-audit.log".to_string()),
            state_path: Some("/var/lib/ca/publish-state.json".to_string()),
            directory: Some(bind),
            targets: vec![
                TargetConfig::Ldap(LdapTargetConfig {
                    name: "ca-cert".to_string(),
                    profile: ProfileKind::CaCert,
                    dn: DnMapping::Fixed {
                        dn: "cn=Example CA,dc=example,dc=com".to_string(),
                    },
                    value_attribute: None,
                    object_classes: Some("pkiCA,certificationAuthority".to_string()),
                    alt_connection: None,
                }),
                TargetConfig::Ldap(LdapTargetConfig {
                    name: "crl".to_string(),
                    profile: ProfileKind::Crl,
                    dn: DnMapping::Fixed {
                        dn: "cn=Example CA,dc=example,dc=com".to_string(),
                    },
                    value_attribute: None,
                    object_classes: None,
                    alt_connection: None,
                }),
                TargetConfig::Ldap(LdapTargetConfig {
                    name: "users".to_string(),
                    profile: ProfileKind::UserCert,
                    dn: DnMapping::Subject,
                    value_attribute: None,
                    object_classes: None,
                    alt_connection: None,
                }),
                TargetConfig::File(files),
                TargetConfig::Ocsp(ocsp),
            ],
        }
    }
}
