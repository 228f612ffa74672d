//! LDAP directory connection
//!
//! Uses the synchronous `ldap3` client. Connections are opened per publisher
//! call and unbound on drop.

use super::{DirectoryConnection, DirectoryConnector};
use crate::config::LdapConnectionConfig;
use crate::error::{PublishError, PublishResult};
use ca_publish_proto::{EntrySnapshot, ModOp, ModificationList};
use ldap3::{LdapConn, LdapConnSettings, LdapError, Mod, Scope, SearchEntry};
use std::collections::HashSet;
use std::fs;
use std::time::Duration;
use tracing::debug;

/// LDAP result codes that mean the server is not usable right now
const BUSY: u32 = 51;
const UNAVAILABLE: u32 = 52;
const SERVER_DOWN: u32 = 81;
const NO_SUCH_OBJECT: u32 = 32;

/// Connector for one LDAP endpoint
#[derive(Debug, Clone)]
pub struct LdapConnector {
    config: LdapConnectionConfig,
}

impl LdapConnector {
    pub fn new(config: LdapConnectionConfig) -> Self {
        LdapConnector { config }
    }

    fn settings(&self) -> PublishResult<LdapConnSettings> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(Duration::from_secs(self.config.timeout))
            .set_starttls(self.config.starttls)
            .set_no_tls_verify(!self.config.verify_tls);

        let (cert_path, key_path) = match (&self.config.client_cert_path, &self.config.client_key_path)
        {
            (Some(cert), Some(key)) => (cert, key),
            _ => return Ok(settings),
        };

        let cert_pem = fs::read(cert_path).map_err(|e| {
            PublishError::Config(format!("Failed to read client certificate '{}': {}", cert_path, e))
        })?;
        let key_pem = fs::read(key_path).map_err(|e| {
            PublishError::Config(format!("Failed to read client key '{}': {}", key_path, e))
        })?;
        let identity = native_tls::Identity::from_pkcs8(&cert_pem, &key_pem)
            .map_err(|e| PublishError::Config(format!("Invalid client identity: {}", e)))?;
        let connector = native_tls::TlsConnector::builder()
            .identity(identity)
            .danger_accept_invalid_certs(!self.config.verify_tls)
            .build()
            .map_err(|e| PublishError::Config(format!("Failed to build TLS connector: {}", e)))?;

        Ok(settings.set_connector(connector))
    }
}

impl DirectoryConnector for LdapConnector {
    fn connect(&self) -> PublishResult<Box<dyn DirectoryConnection>> {
        let url = self.config.url();
        debug!("Creating new LDAP connection to {}", url);

        let mut conn = LdapConn::with_settings(self.settings()?, &url)
            .map_err(|e| PublishError::Unreachable(format!("{}: {}", url, e)))?;
        let timeout = Duration::from_secs(self.config.timeout);

        match (&self.config.bind_dn, &self.config.bind_password) {
            (Some(bind_dn), Some(bind_password)) => {
                conn.with_timeout(timeout)
                    .simple_bind(bind_dn, bind_password)
                    .and_then(|r| r.success())
                    .map_err(|e| map_ldap_error("bind", e))?;
                debug!("Bound to LDAP as {}", bind_dn);
            }
            _ if self.config.client_cert_path.is_some() => {
                conn.with_timeout(timeout)
                    .sasl_external_bind()
                    .and_then(|r| r.success())
                    .map_err(|e| map_ldap_error("SASL EXTERNAL bind", e))?;
                debug!("Bound to LDAP with client certificate");
            }
            _ => {
                conn.with_timeout(timeout)
                    .simple_bind("", "")
                    .and_then(|r| r.success())
                    .map_err(|e| map_ldap_error("bind", e))?;
                debug!("Anonymous bind to LDAP");
            }
        }

        Ok(Box::new(LdapDirectory { conn, url, timeout }))
    }

    fn describe(&self) -> String {
        self.config.url()
    }
}

/// A bound LDAP connection
pub struct LdapDirectory {
    conn: LdapConn,
    url: String,
    timeout: Duration,
}

impl DirectoryConnection for LdapDirectory {
    fn read_entry(&mut self, dn: &str, attributes: &[&str]) -> PublishResult<EntrySnapshot> {
        let (rs, _res) = self
            .conn
            .with_timeout(self.timeout)
            .search(dn, Scope::Base, "(objectClass=*)", attributes.to_vec())
            .and_then(|r| r.success())
            .map_err(|e| map_ldap_error("search", e))?;

        let entry = rs
            .into_iter()
            .next()
            .map(SearchEntry::construct)
            .ok_or_else(|| PublishError::Directory(format!("Entry not found: {}", dn)))?;

        let mut snapshot = EntrySnapshot::new(entry.dn);
        for (name, values) in entry.attrs {
            snapshot.insert(&name, values.into_iter().map(String::into_bytes).collect());
        }
        for (name, values) in entry.bin_attrs {
            snapshot.insert(&name, values);
        }
        Ok(snapshot)
    }

    fn modify(&mut self, dn: &str, mods: &ModificationList) -> PublishResult<()> {
        let ldap_mods: Vec<Mod<Vec<u8>>> = mods
            .iter()
            .map(|m| {
                let attr = m.attribute.as_bytes().to_vec();
                let values: HashSet<Vec<u8>> = m.values.iter().cloned().collect();
                match m.op {
                    ModOp::Add => Mod::Add(attr, values),
                    ModOp::Replace => Mod::Replace(attr, values),
                    ModOp::Delete => Mod::Delete(attr, values),
                }
            })
            .collect();

        self.conn
            .with_timeout(self.timeout)
            .modify(dn, ldap_mods)
            .and_then(|r| r.success())
            .map_err(|e| map_ldap_error("modify", e))?;
        Ok(())
    }
}

impl Drop for LdapDirectory {
    fn drop(&mut self) {
        if let Err(e) = self.conn.unbind() {
            debug!("LDAP unbind from {} failed: {}", self.url, e);
        }
    }
}

fn map_ldap_error(operation: &str, err: LdapError) -> PublishError {
    match err {
        LdapError::Io { .. } | LdapError::Timeout { .. } => {
            PublishError::Unreachable(format!("LDAP {} failed: {}", operation, err))
        }
        LdapError::LdapResult { result } => {
            let message = format!(
                "LDAP {} failed: rc={} {}",
                operation,
                result.rc,
                result.text.trim()
            );
            match result.rc {
                BUSY | UNAVAILABLE | SERVER_DOWN => PublishError::Unreachable(message),
                NO_SUCH_OBJECT => PublishError::Directory(format!("{} (no such entry)", message)),
                _ => PublishError::Directory(message),
            }
        }
        other => PublishError::Directory(format!("LDAP {} failed: {}", operation, other)),
    }
}
