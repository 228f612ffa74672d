//! Planning tests across profiles
//!
//! Plans are applied to snapshots with a small helper that mirrors how a
//! directory server applies a modification list, so each test checks the
//! resulting entry rather than the exact modification sequence.

use ca_publish_proto::naming::{crl_base_name, link_name, parse_crl_file_name};
use ca_publish_proto::{
    plan_publish, plan_unpublish, AdapterProfile, ClassPlan, CrlArtifact, EntrySnapshot, ModOp,
    ModificationList, ProfileKind, ResponseScanner, PushStatus, TimestampZone,
};
use chrono::{TimeZone, Utc};

fn apply(entry: &mut EntrySnapshot, mods: &ModificationList) {
    for m in mods {
        let mut values = entry.values(&m.attribute).to_vec();
        match m.op {
            ModOp::Add => values.extend(m.values.iter().cloned()),
            ModOp::Replace => values = m.values.clone(),
            ModOp::Delete if m.values.is_empty() => values.clear(),
            ModOp::Delete => values.retain(|v| {
                !m.values
                    .iter()
                    .any(|d| d.eq_ignore_ascii_case(v))
            }),
        }
        entry.set_values(&m.attribute, values);
    }
}

fn classes(list: &str) -> ClassPlan {
    ClassPlan::new(ClassPlan::parse_list(list))
}

#[test]
fn test_publish_plan_reaches_fixed_point() {
    for kind in [
        ProfileKind::CaCert,
        ProfileKind::Crl,
        ProfileKind::DeltaCrl,
        ProfileKind::CrossCertPair,
        ProfileKind::UserCert,
    ] {
        let profile = AdapterProfile::for_kind(kind);
        let plan = ClassPlan::new(profile.default_classes.clone());
        let mut entry = EntrySnapshot::new("cn=x").with_object_classes(&["top"]);

        let first = plan_publish(&entry, &profile, b"value", &plan);
        assert!(!first.is_empty(), "{} planned nothing", kind);
        apply(&mut entry, &first);

        let second = plan_publish(&entry, &profile, b"value", &plan);
        assert!(second.is_empty(), "{} is not idempotent: {:?}", kind, second);
    }
}

#[test]
fn test_single_valued_attribute_replaced() {
    let profile = AdapterProfile::for_kind(ProfileKind::DeltaCrl);
    let plan = classes("deltaCRL");
    let mut entry = EntrySnapshot::new("cn=x")
        .with_object_classes(&["top", "deltaCRL"])
        .with_values("deltaRevocationList;binary", vec![b"old".to_vec()]);

    let mods = plan_publish(&entry, &profile, b"new", &plan);
    apply(&mut entry, &mods);
    assert_eq!(
        entry.values("deltaRevocationList;binary"),
        &[b"new".to_vec()]
    );
}

#[test]
fn test_unpublish_keeps_other_values() {
    let profile = AdapterProfile::for_kind(ProfileKind::CrossCertPair);
    let plan = classes("pkiCA");
    let mut entry = EntrySnapshot::new("cn=x")
        .with_object_classes(&["top", "pkiCA"])
        .with_values(
            "crossCertificatePair;binary",
            vec![b"a".to_vec(), b"b".to_vec()],
        );

    let mods = plan_unpublish(&entry, &profile, b"a", &plan);
    apply(&mut entry, &mods);
    assert_eq!(entry.values("crossCertificatePair;binary"), &[b"b".to_vec()]);
    assert!(entry.has_object_class("pkiCA"));
}

#[test]
fn test_removed_class_kept_when_desired() {
    let profile = AdapterProfile::for_kind(ProfileKind::UserCert);
    let plan = classes("A,B").with_pending(vec![], vec!["B".to_string(), "C".to_string()]);
    let mut entry = EntrySnapshot::new("cn=x").with_object_classes(&["top", "B", "C"]);

    let mods = plan_publish(&entry, &profile, b"v", &plan);
    apply(&mut entry, &mods);
    assert!(entry.has_object_class("A"));
    assert!(entry.has_object_class("B"));
    assert!(!entry.has_object_class("C"));
}

#[test]
fn test_crl_file_names_round_trip_through_parser() {
    let crl = CrlArtifact::new(vec![1], Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
        .with_issuing_point("masterCRL")
        .delta(true);

    let base = crl_base_name(&crl, TimestampZone::Utc);
    assert_eq!(base, "masterCRL-20240102-030405-delta");

    let parsed = parse_crl_file_name(&format!("{}.zip", base)).unwrap();
    assert_eq!(parsed.prefix, "masterCRL");
    assert!(parsed.delta);
    assert_eq!(parsed.base_name(), base);

    assert!(parse_crl_file_name(&link_name("masterCRL", true, "der")).is_none());
}

#[test]
fn test_responder_reply_with_http_headers() {
    let reply = "HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\nstatus=0\r\n";
    assert_eq!(ResponseScanner::scan(reply), PushStatus::Accepted);
}
