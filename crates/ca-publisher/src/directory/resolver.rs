//! Chooses the directory connection for a call
//!
//! A target may carry its own connection settings (host, port, credentials,
//! client certificate). When it does, a connection is opened from those
//! settings for the duration of the call; otherwise the default connector is
//! used. Either way the connection is dropped, and therefore closed, when the
//! call returns.

use super::{DirectoryConnection, DirectoryConnector, LdapConnector};
use crate::config::LdapConnectionConfig;
use crate::error::{PublishError, PublishResult};
use std::sync::Arc;
use tracing::debug;

type ConnectorFactory = dyn Fn(&LdapConnectionConfig) -> Arc<dyn DirectoryConnector> + Send + Sync;

pub struct ConnectionResolver {
    default: Option<Arc<dyn DirectoryConnector>>,
    factory: Arc<ConnectorFactory>,
}

impl ConnectionResolver {
    /// Resolver whose alternate connections are real LDAP connections
    pub fn new(default: Option<Arc<dyn DirectoryConnector>>) -> Self {
        ConnectionResolver {
            default,
            factory: Arc::new(|config: &LdapConnectionConfig| {
                Arc::new(LdapConnector::new(config.clone())) as Arc<dyn DirectoryConnector>
            }),
        }
    }

    /// Resolver with the default connection built from LDAP settings
    pub fn from_config(default: Option<&LdapConnectionConfig>) -> Self {
        Self::new(default.map(|config| {
            Arc::new(LdapConnector::new(config.clone())) as Arc<dyn DirectoryConnector>
        }))
    }

    /// Replace how alternate connections are built
    pub fn with_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&LdapConnectionConfig) -> Arc<dyn DirectoryConnector> + Send + Sync + 'static,
    {
        self.factory = Arc::new(factory);
        self
    }

    /// Open a connection for a target
    pub fn connect(
        &self,
        alternate: Option<&LdapConnectionConfig>,
    ) -> PublishResult<Box<dyn DirectoryConnection>> {
        match alternate {
            Some(config) => {
                let connector = (self.factory)(config);
                debug!(endpoint = %connector.describe(), "Using alternate directory connection");
                connector.connect()
            }
            None => match &self.default {
                Some(connector) => connector.connect(),
                None => Err(PublishError::Config(
                    "no directory connection configured".to_string(),
                )),
            },
        }
    }

    /// Endpoint a target would use, for logs
    pub fn describe(&self, alternate: Option<&LdapConnectionConfig>) -> String {
        match alternate {
            Some(config) => config.url(),
            None => self
                .default
                .as_ref()
                .map(|c| c.describe())
                .unwrap_or_else(|| "none".to_string()),
        }
    }
}
