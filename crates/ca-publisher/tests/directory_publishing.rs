//! Directory publishing against the in-memory directory
//!
//! Covers the reconciliation guarantees callers rely on:
//! - repeated publishes are free
//! - identical values are never duplicated
//! - class migrations add and delete the right classes
//! - publish followed by unpublish restores the attribute values

use ca_publish_proto::{
    AdapterProfile, Artifact, CertificateArtifact, CrlArtifact, EntrySnapshot, ProfileKind,
};
use ca_publisher::{
    CallContext, ConfigStore, ConnectionResolver, DirectoryConnector, DirectoryPublisher,
    DirectoryTarget, MemoryConfigStore, MemoryDirectory, PublishReport, Publisher,
};
use chrono::Utc;
use std::sync::Arc;

const CA_DN: &str = "cn=Example CA,dc=example,dc=com";
const USER_DN: &str = "uid=alice,ou=people,dc=example,dc=com";

fn publisher_for(dir: &MemoryDirectory) -> DirectoryPublisher {
    let connector: Arc<dyn DirectoryConnector> = Arc::new(dir.clone());
    DirectoryPublisher::new(ConnectionResolver::new(Some(connector)))
}

fn cert(der: &[u8]) -> Artifact {
    Artifact::Certificate(CertificateArtifact::new(der.to_vec(), "10"))
}

fn values(dir: &MemoryDirectory, dn: &str, attribute: &str) -> Vec<Vec<u8>> {
    dir.entry(dn).unwrap().values(attribute).to_vec()
}

#[test]
fn test_second_publish_writes_nothing() {
    let dir = MemoryDirectory::new();
    dir.add_entry(EntrySnapshot::new(CA_DN).with_object_classes(&["top", "device"]));
    let publisher = publisher_for(&dir);
    let target = DirectoryTarget::new("crl", CA_DN, AdapterProfile::for_kind(ProfileKind::Crl));
    let crl = Artifact::Crl(CrlArtifact::new(b"crl-1".to_vec(), Utc::now()));

    publisher.publish(&crl, &target, &CallContext::new()).unwrap();
    let after_first = dir.entry(CA_DN).unwrap();
    assert_eq!(dir.write_count(), 1);

    let report = publisher.publish(&crl, &target, &CallContext::new()).unwrap();
    assert_eq!(report, PublishReport::Unchanged);
    assert_eq!(dir.write_count(), 1);
    assert_eq!(dir.entry(CA_DN).unwrap(), after_first);
}

#[test]
fn test_identical_certificates_stored_once() {
    let dir = MemoryDirectory::new();
    dir.add_entry(EntrySnapshot::new(USER_DN).with_object_classes(&["top", "inetOrgPerson"]));
    let publisher = publisher_for(&dir);
    let target = DirectoryTarget::new(
        "users",
        USER_DN,
        AdapterProfile::for_kind(ProfileKind::UserCert),
    );

    publisher.publish(&cert(b"alice"), &target, &CallContext::new()).unwrap();
    publisher.publish(&cert(b"alice"), &target, &CallContext::new()).unwrap();

    assert_eq!(
        values(&dir, USER_DN, "userCertificate;binary"),
        vec![b"alice".to_vec()]
    );
}

#[test]
fn test_removed_classes_deleted_but_desired_kept() {
    let dir = MemoryDirectory::new();
    dir.add_entry(EntrySnapshot::new(USER_DN).with_object_classes(&["top", "C"]));
    let store = Arc::new(MemoryConfigStore::new());
    store.put_string("ldap.users.objectClassRemoved", "B,C");

    let publisher = publisher_for(&dir).with_store(store.clone());
    let target = DirectoryTarget::new(
        "users",
        USER_DN,
        AdapterProfile::for_kind(ProfileKind::UserCert),
    )
    .with_classes(vec!["A".to_string(), "B".to_string()]);

    publisher.publish(&cert(b"alice"), &target, &CallContext::new()).unwrap();

    let entry = dir.entry(USER_DN).unwrap();
    assert!(entry.has_object_class("A"));
    assert!(entry.has_object_class("B"));
    assert!(!entry.has_object_class("C"));
    assert!(entry.has_object_class("top"));
    assert!(!store.contains("ldap.users.objectClassRemoved"));
}

#[test]
fn test_round_trip_restores_values() {
    let dir = MemoryDirectory::new();
    dir.add_entry(
        EntrySnapshot::new(CA_DN)
            .with_object_classes(&["top", "pkiCA"])
            .with_values("cACertificate;binary", vec![b"old-ca".to_vec()]),
    );
    let publisher = publisher_for(&dir);
    let target = DirectoryTarget::new("ca", CA_DN, AdapterProfile::for_kind(ProfileKind::CaCert));
    let before = values(&dir, CA_DN, "cACertificate;binary");

    publisher.publish(&cert(b"new-ca"), &target, &CallContext::new()).unwrap();
    assert_eq!(values(&dir, CA_DN, "cACertificate;binary").len(), 2);

    publisher.unpublish(&cert(b"new-ca"), &target, &CallContext::new()).unwrap();
    assert_eq!(values(&dir, CA_DN, "cACertificate;binary"), before);
    assert!(dir.entry(CA_DN).unwrap().has_object_class("pkiCA"));
}

#[test]
fn test_round_trip_on_bare_entry_strips_seeded_attributes() {
    let dir = MemoryDirectory::new();
    dir.add_entry(EntrySnapshot::new(CA_DN).with_object_classes(&["top", "device"]));
    let publisher = publisher_for(&dir);
    let target = DirectoryTarget::new("ca", CA_DN, AdapterProfile::for_kind(ProfileKind::CaCert));

    publisher.publish(&cert(b"ca"), &target, &CallContext::new()).unwrap();
    let published = dir.entry(CA_DN).unwrap();
    assert!(published.has_object_class("pkiCA"));
    assert!(published.has_attribute("authorityRevocationList;binary"));
    assert!(!published.has_real_value("authorityRevocationList;binary"));

    publisher.unpublish(&cert(b"ca"), &target, &CallContext::new()).unwrap();
    let withdrawn = dir.entry(CA_DN).unwrap();
    assert!(!withdrawn.has_attribute("cACertificate;binary"));
    assert!(!withdrawn.has_attribute("authorityRevocationList;binary"));
    assert!(!withdrawn.has_attribute("certificateRevocationList;binary"));
    assert!(!withdrawn.has_object_class("pkiCA"));
    assert!(withdrawn.has_object_class("device"));
}

#[test]
fn test_placeholder_replaced_not_appended() {
    let dir = MemoryDirectory::new();
    dir.add_entry(
        EntrySnapshot::new(CA_DN)
            .with_object_classes(&["top", "pkiCA"])
            .with_values("cACertificate;binary", vec![Vec::new()]),
    );
    let publisher = publisher_for(&dir);
    let target = DirectoryTarget::new("ca", CA_DN, AdapterProfile::for_kind(ProfileKind::CaCert));

    publisher.publish(&cert(b"ca"), &target, &CallContext::new()).unwrap();
    assert_eq!(
        values(&dir, CA_DN, "cACertificate;binary"),
        vec![b"ca".to_vec()]
    );
}

#[test]
fn test_unpublish_of_absent_value_is_noop() {
    let dir = MemoryDirectory::new();
    dir.add_entry(EntrySnapshot::new(USER_DN).with_object_classes(&["top"]));
    let publisher = publisher_for(&dir);
    let target = DirectoryTarget::new(
        "users",
        USER_DN,
        AdapterProfile::for_kind(ProfileKind::UserCert),
    );

    let report = publisher
        .unpublish(&cert(b"never-published"), &target, &CallContext::new())
        .unwrap();
    assert_eq!(report, PublishReport::Unchanged);
    assert_eq!(dir.write_count(), 0);
}
