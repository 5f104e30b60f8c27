use super::*;
use crate::LookupError;
use iam_broker_core::{Phase, RoleActivity, WorkloadRef};
use kubert::index::IndexNamespacedResource;
use std::net::IpAddr;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

#[test]
fn unknown_address_is_not_found() {
    let test = TestConfig::default();
    assert_eq!(
        test.workloads.read().get_by_address(ip("10.0.0.1")),
        Err(LookupError::NotFound(ip("10.0.0.1")))
    );
}

#[test]
fn finds_running_pod_by_address() {
    let test = TestConfig::default();
    test.workloads.write().apply(mk_role_pod(
        "ns-0",
        "pod-a",
        "10.0.0.1",
        "Running",
        "billing-reader",
    ));

    let workload = test
        .workloads
        .read()
        .get_by_address(ip("10.0.0.1"))
        .expect("pod must be found");
    assert_eq!(workload.id, WorkloadRef::new("ns-0", "pod-a"));
    assert_eq!(workload.phase, Phase::Running);
    assert_eq!(workload.role.as_deref(), Some("billing-reader"));
}

#[test]
fn pods_without_addresses_are_not_indexed_by_address() {
    let test = TestConfig::default();
    test.workloads.write().apply(mk_pod(
        "ns-0",
        "pod-a",
        None,
        "Pending",
        [(annotations::ROLE, "billing-reader")],
    ));
    assert_eq!(test.workloads.read().len(), 1);

    // Once scheduled, the pod is discoverable.
    test.workloads.write().apply(mk_role_pod(
        "ns-0",
        "pod-a",
        "10.0.0.1",
        "Pending",
        "billing-reader",
    ));
    assert!(test.workloads.read().get_by_address(ip("10.0.0.1")).is_ok());
}

#[test]
fn shared_address_is_ambiguous() {
    let test = TestConfig::default();
    test.workloads
        .write()
        .apply(mk_role_pod("ns-0", "pod-a", "10.0.0.1", "Running", "a"));
    test.workloads
        .write()
        .apply(mk_role_pod("ns-1", "pod-b", "10.0.0.1", "Pending", "b"));

    assert_eq!(
        test.workloads.read().get_by_address(ip("10.0.0.1")),
        Err(LookupError::Ambiguous {
            addr: ip("10.0.0.1"),
            workloads: vec![
                WorkloadRef::new("ns-0", "pod-a"),
                WorkloadRef::new("ns-1", "pod-b"),
            ],
        })
    );
}

#[test]
fn completed_pods_are_ignored() {
    let test = TestConfig::default();
    test.workloads
        .write()
        .apply(mk_role_pod("ns-0", "old", "10.0.0.1", "Succeeded", "a"));
    assert_eq!(
        test.workloads.read().get_by_address(ip("10.0.0.1")),
        Err(LookupError::NotFound(ip("10.0.0.1")))
    );

    test.workloads
        .write()
        .apply(mk_role_pod("ns-0", "new", "10.0.0.1", "Running", "b"));
    let workload = test.workloads.read().get_by_address(ip("10.0.0.1")).unwrap();
    assert_eq!(workload.id.name, "new");

    test.workloads
        .write()
        .apply(mk_role_pod("ns-0", "new", "10.0.0.1", "Failed", "b"));
    assert!(test.workloads.read().get_by_address(ip("10.0.0.1")).is_err());
}

#[test]
fn deleted_pods_are_not_found() {
    let test = TestConfig::default();
    test.workloads
        .write()
        .apply(mk_role_pod("ns-0", "pod-a", "10.0.0.1", "Running", "a"));
    test.workloads
        .write()
        .delete("ns-0".to_string(), "pod-a".to_string());

    let index = test.workloads.read();
    assert!(index.is_empty());
    assert_eq!(
        index.get_by_address(ip("10.0.0.1")),
        Err(LookupError::NotFound(ip("10.0.0.1")))
    );
    assert!(!index.is_role_active(&test.resolver.resolve("a").unwrap()));
}

#[test]
fn updates_replace_index_entries() {
    let test = TestConfig::default();
    test.workloads
        .write()
        .apply(mk_role_pod("ns-0", "pod-a", "10.0.0.1", "Running", "a"));
    test.workloads
        .write()
        .apply(mk_role_pod("ns-0", "pod-a", "10.0.0.2", "Running", "b"));

    let index = test.workloads.read();
    assert!(index.get_by_address(ip("10.0.0.1")).is_err());
    assert_eq!(
        index.get_by_address(ip("10.0.0.2")).unwrap().role.as_deref(),
        Some("b")
    );
    assert!(!index.is_role_active(&test.resolver.resolve("a").unwrap()));
    assert!(index.is_role_active(&test.resolver.resolve("b").unwrap()));
}

#[test]
fn role_activity_tracks_live_pods() {
    let test = TestConfig::default();
    let role = test.resolver.resolve("billing-reader").unwrap();
    assert!(!test.workloads.is_role_active(&role));

    test.workloads.write().apply(mk_role_pod(
        "ns-0",
        "pod-a",
        "10.0.0.1",
        "Running",
        "billing-reader",
    ));
    // Equivalent references resolve to the same role.
    test.workloads.write().apply(mk_role_pod(
        "ns-0",
        "pod-b",
        "10.0.0.2",
        "Running",
        "/billing-reader",
    ));
    assert!(test.workloads.is_role_active(&role));

    test.workloads.write().apply(mk_role_pod(
        "ns-0",
        "pod-a",
        "10.0.0.1",
        "Succeeded",
        "billing-reader",
    ));
    assert!(
        test.workloads.is_role_active(&role),
        "pod-b is still running"
    );

    test.workloads
        .write()
        .delete("ns-0".to_string(), "pod-b".to_string());
    assert!(!test.workloads.is_role_active(&role));
}

#[test]
fn announces_role_bearing_pods() {
    let test = TestConfig::default();
    test.workloads.write().apply(mk_role_pod(
        "ns-0",
        "pod-a",
        "10.0.0.1",
        "Running",
        "billing-reader",
    ));
    test.workloads
        .write()
        .apply(mk_pod("ns-0", "no-role", Some("10.0.0.2"), "Running", []));
    test.workloads
        .write()
        .apply(mk_role_pod("ns-0", "done", "10.0.0.3", "Succeeded", "x"));

    let announced = test.announcements.try_recv().expect("must announce pod-a");
    assert_eq!(announced.id, WorkloadRef::new("ns-0", "pod-a"));
    assert!(test.announcements.try_recv().is_none());
}

#[test]
fn reapplied_pods_are_reannounced() {
    let test = TestConfig::default();
    let pod = mk_role_pod("ns-0", "pod-a", "10.0.0.1", "Running", "billing-reader");
    test.workloads.write().apply(pod.clone());
    assert!(test.announcements.try_recv().is_some());

    // An update that doesn't change anything the broker indexes, e.g. labels.
    let mut relabeled = pod;
    relabeled.metadata.labels = Some(std::iter::once(("a".to_string(), "b".to_string())).collect());
    test.workloads.write().apply(relabeled);
    let announced = test.announcements.try_recv().expect("update must announce");
    assert_eq!(announced.role.as_deref(), Some("billing-reader"));

    test.workloads.write().apply(mk_role_pod(
        "ns-0",
        "pod-a",
        "10.0.0.1",
        "Running",
        "billing-writer",
    ));
    let announced = test.announcements.try_recv().expect("role change must announce");
    assert_eq!(announced.role.as_deref(), Some("billing-writer"));
    assert!(test.announcements.try_recv().is_none());
}

#[test]
fn resync_repairs_dropped_announcements() {
    let test = TestConfig::with_capacity(1);
    let pod_a = mk_role_pod("ns-0", "pod-a", "10.0.0.1", "Running", "a");
    let pod_b = mk_role_pod("ns-0", "pod-b", "10.0.0.2", "Running", "b");
    test.workloads.write().apply(pod_a.clone());
    test.workloads.write().apply(pod_b.clone());
    assert_eq!(test.metrics.announcements_dropped(), 1);
    assert_eq!(test.announcements.try_recv().unwrap().id.name, "pod-a");
    assert!(test.announcements.try_recv().is_none());

    test.workloads
        .write()
        .reset(vec![pod_b, pod_a], kubert::index::NamespacedRemoved::default());
    let announced = test
        .announcements
        .try_recv()
        .expect("resync must announce the dropped pod");
    assert_eq!(announced.id, WorkloadRef::new("ns-0", "pod-b"));
    assert_eq!(test.workloads.read().len(), 2);
}

#[test]
fn full_announcement_buffer_drops() {
    let test = TestConfig::with_capacity(1);
    test.workloads
        .write()
        .apply(mk_role_pod("ns-0", "pod-a", "10.0.0.1", "Running", "a"));
    test.workloads
        .write()
        .apply(mk_role_pod("ns-0", "pod-b", "10.0.0.2", "Running", "b"));
    test.workloads
        .write()
        .apply(mk_role_pod("ns-0", "pod-c", "10.0.0.3", "Running", "c"));

    // Indexing is unaffected by the full buffer.
    assert_eq!(test.workloads.read().len(), 3);
    assert!(test.workloads.read().get_by_address(ip("10.0.0.3")).is_ok());
    assert_eq!(test.metrics.announcements_dropped(), 2);
    assert_eq!(test.announcements.try_recv().unwrap().id.name, "pod-a");
    assert!(test.announcements.try_recv().is_none());
}

#[test]
fn reset_removes_stale_pods() {
    let test = TestConfig::default();
    test.workloads
        .write()
        .apply(mk_role_pod("ns-0", "pod-a", "10.0.0.1", "Running", "a"));
    test.workloads
        .write()
        .apply(mk_role_pod("ns-0", "pod-b", "10.0.0.2", "Running", "b"));

    let mut removed = kubert::index::NamespacedRemoved::default();
    removed
        .entry("ns-0".to_string())
        .or_default()
        .insert("pod-a".to_string());
    test.workloads.write().reset(
        vec![
            mk_role_pod("ns-0", "pod-b", "10.0.0.2", "Running", "b"),
            mk_role_pod("ns-0", "pod-c", "10.0.0.1", "Running", "c"),
        ],
        removed,
    );

    let index = test.workloads.read();
    assert_eq!(index.len(), 2);
    assert_eq!(
        index.get_by_address(ip("10.0.0.1")).unwrap().id.name,
        "pod-c",
        "the replacement pod must not be ambiguous with the removed one"
    );
    assert!(!index.is_role_active(&test.resolver.resolve("a").unwrap()));
}

#[test]
fn reads_session_overrides() {
    let test = TestConfig::default();
    test.workloads.write().apply(mk_pod(
        "ns-0",
        "pod-a",
        Some("10.0.0.1"),
        "Running",
        [
            (annotations::ROLE, "billing-reader"),
            (annotations::SESSION_NAME, "billing"),
            (annotations::EXTERNAL_ID, "ext-1"),
            (annotations::SESSION_TAGS, "team=billing"),
        ],
    ));

    let workload = test.workloads.read().get_by_address(ip("10.0.0.1")).unwrap();
    assert_eq!(workload.session_name.as_deref(), Some("billing"));
    assert_eq!(workload.external_id.as_deref(), Some("ext-1"));
    assert_eq!(
        workload.session_tags.get("team").map(String::as_str),
        Some("billing")
    );
}
