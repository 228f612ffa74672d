//! Directory (LDAP) publishing
//!
//! The reconciler in [`publisher`] talks to the directory through two small
//! traits so that it can run against a live LDAP server ([`ldap`]) or an
//! in-memory stand-in ([`memory`]).

pub mod ldap;
pub mod memory;
pub mod publisher;
pub mod resolver;

use crate::error::PublishResult;
use ca_publish_proto::{EntrySnapshot, ModificationList};

pub use ldap::{LdapConnector, LdapDirectory};
pub use memory::MemoryDirectory;
pub use publisher::{DirectoryPublisher, DirectoryTarget};
pub use resolver::ConnectionResolver;

/// An open, bound directory connection
///
/// Dropping the connection closes it.
pub trait DirectoryConnection {
    /// Read the named attributes of one entry (base-scope search)
    fn read_entry(&mut self, dn: &str, attributes: &[&str]) -> PublishResult<EntrySnapshot>;

    /// Apply a modification list to one entry as a single operation
    fn modify(&mut self, dn: &str, mods: &ModificationList) -> PublishResult<()>;
}

/// Opens directory connections
pub trait DirectoryConnector: Send + Sync {
    fn connect(&self) -> PublishResult<Box<dyn DirectoryConnection>>;

    /// Endpoint description for logs
    fn describe(&self) -> String;
}
