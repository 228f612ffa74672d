//! Filesystem mirror tests
//!
//! The crash-point tests build the on-disk state a rotation leaves behind at
//! each step and check that recovery ends with `<link>` resolving to either
//! the previous or the new CRL file.

use ca_publish_proto::{Artifact, CrlArtifact, TimestampZone};
use ca_publisher::{CallContext, FileTargetConfig, FilePublisher, PublishReport, Publisher};
use chrono::{TimeZone, Utc};
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

fn master_crl(der: &[u8], second: u32) -> Artifact {
    Artifact::Crl(
        CrlArtifact::new(
            der.to_vec(),
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, second).unwrap(),
        )
        .with_issuing_point("masterCRL"),
    )
}

fn mirror(dir: &Path) -> FileTargetConfig {
    let mut target = FileTargetConfig::new("mirror", dir.to_string_lossy());
    target.timezone = TimestampZone::Utc;
    target.zip = true;
    target.zip_level = 9;
    target.latest_link = true;
    target.link_extension = "der".to_string();
    target
}

#[test]
fn test_publish_and_unpublish_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let target = mirror(dir.path());
    let publisher = FilePublisher::new();
    let crl = master_crl(b"crl-bytes", 5);

    publisher.publish(&crl, &target, &CallContext::new()).unwrap();

    let der = dir.path().join("masterCRL-20240102-030405.der");
    let zip = dir.path().join("masterCRL-20240102-030405.zip");
    let link = dir.path().join("masterCRL.der");
    assert_eq!(fs::read(&der).unwrap(), b"crl-bytes");
    assert_eq!(fs::read(&link).unwrap(), b"crl-bytes");

    let mut archive = zip::ZipArchive::new(File::open(&zip).unwrap()).unwrap();
    assert_eq!(archive.len(), 1);
    let mut entry = archive.by_index(0).unwrap();
    assert_eq!(entry.name(), "masterCRL-20240102-030405.der");
    let mut content = Vec::new();
    entry.read_to_end(&mut content).unwrap();
    assert_eq!(content, b"crl-bytes");
    drop(entry);

    #[cfg(unix)]
    assert_eq!(
        fs::read_link(&link).unwrap(),
        Path::new("masterCRL-20240102-030405.der")
    );

    let report = publisher.unpublish(&crl, &target, &CallContext::new()).unwrap();
    assert_eq!(report, PublishReport::Applied { changes: 2 });
    assert!(!der.exists());
    assert!(!zip.exists());
}

#[test]
fn test_link_follows_newest_publish() {
    let dir = tempfile::tempdir().unwrap();
    let target = mirror(dir.path());
    let publisher = FilePublisher::new();

    publisher
        .publish(&master_crl(b"first", 5), &target, &CallContext::new())
        .unwrap();
    publisher
        .publish(&master_crl(b"second", 6), &target, &CallContext::new())
        .unwrap();

    assert_eq!(fs::read(dir.path().join("masterCRL.der")).unwrap(), b"second");
    assert!(!dir.path().join("masterCRL.der.new").exists());
    assert!(!dir.path().join("masterCRL.der.old").exists());
}

#[test]
fn test_delta_crls_get_their_own_link() {
    let dir = tempfile::tempdir().unwrap();
    let target = mirror(dir.path());
    let publisher = FilePublisher::new();
    let delta = Artifact::Crl(
        CrlArtifact::new(
            b"delta".to_vec(),
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        )
        .with_issuing_point("masterCRL")
        .delta(true),
    );

    publisher
        .publish(&master_crl(b"full", 5), &target, &CallContext::new())
        .unwrap();
    publisher.publish(&delta, &target, &CallContext::new()).unwrap();

    assert_eq!(fs::read(dir.path().join("masterCRL.der")).unwrap(), b"full");
    assert_eq!(fs::read(dir.path().join("masterCRL-delta.der")).unwrap(), b"delta");
    assert!(dir.path().join("masterCRL-20240102-030405-delta.der").exists());
}

#[test]
fn test_concurrent_publishes_leave_valid_link() {
    let dir = tempfile::tempdir().unwrap();
    let target = mirror(dir.path());
    let publisher = FilePublisher::new();

    std::thread::scope(|s| {
        for second in 0..8u32 {
            let publisher = &publisher;
            let target = &target;
            s.spawn(move || {
                let der = format!("crl-{}", second);
                publisher
                    .publish(&master_crl(der.as_bytes(), second), target, &CallContext::new())
                    .unwrap();
            });
        }
    });

    let content = fs::read(dir.path().join("masterCRL.der")).unwrap();
    assert!(String::from_utf8(content).unwrap().starts_with("crl-"));
}

#[cfg(unix)]
mod crash_points {
    use super::*;
    use std::os::unix::fs::symlink;

    const PREVIOUS: &str = "masterCRL-20240102-030404.der";
    const NEXT: &str = "masterCRL-20240102-030405.der";

    fn setup() -> (tempfile::TempDir, FileTargetConfig) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PREVIOUS), b"previous").unwrap();
        fs::write(dir.path().join(NEXT), b"next").unwrap();
        let target = mirror(dir.path());
        (dir, target)
    }

    fn resolved(dir: &Path) -> Vec<u8> {
        fs::read(dir.join("masterCRL.der")).unwrap()
    }

    #[test]
    fn test_after_new_link_created() {
        let (dir, target) = setup();
        symlink(PREVIOUS, dir.path().join("masterCRL.der")).unwrap();
        symlink(NEXT, dir.path().join("masterCRL.der.new")).unwrap();

        FilePublisher::new().recover(&target).unwrap();
        assert_eq!(resolved(dir.path()), b"previous");
        assert!(!dir.path().join("masterCRL.der.new").exists());
    }

    #[test]
    fn test_after_old_copy_created() {
        let (dir, target) = setup();
        symlink(PREVIOUS, dir.path().join("masterCRL.der")).unwrap();
        symlink(PREVIOUS, dir.path().join("masterCRL.der.old")).unwrap();
        symlink(NEXT, dir.path().join("masterCRL.der.new")).unwrap();

        FilePublisher::new().recover(&target).unwrap();
        assert_eq!(resolved(dir.path()), b"previous");
        assert!(!dir.path().join("masterCRL.der.old").exists());
    }

    #[test]
    fn test_after_rename() {
        let (dir, target) = setup();
        symlink(NEXT, dir.path().join("masterCRL.der")).unwrap();
        symlink(PREVIOUS, dir.path().join("masterCRL.der.old")).unwrap();

        let restored = FilePublisher::new().recover(&target).unwrap();
        assert_eq!(restored, 0);
        assert_eq!(resolved(dir.path()), b"next");
    }

    #[test]
    fn test_link_missing_with_old_present() {
        let (dir, target) = setup();
        symlink(PREVIOUS, dir.path().join("masterCRL.der.old")).unwrap();
        symlink(NEXT, dir.path().join("masterCRL.der.new")).unwrap();

        let restored = FilePublisher::new().recover(&target).unwrap();
        assert_eq!(restored, 1);
        assert_eq!(resolved(dir.path()), b"previous");
    }

    #[test]
    fn test_next_publish_repairs_interrupted_rotation() {
        let (dir, target) = setup();
        symlink(PREVIOUS, dir.path().join("masterCRL.der.old")).unwrap();

        FilePublisher::new()
            .publish(&master_crl(b"newest", 6), &target, &CallContext::new())
            .unwrap();
        assert_eq!(resolved(dir.path()), b"newest");
        assert!(!dir.path().join("masterCRL.der.old").exists());
    }
}
