//! Release Tracker Tests
//!
//! Checkout cycles with a scripted upstream and in-process build servers.

mod fixtures;

use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use fixtures::{flags, snapshot, Behavior, FakeUpstream, PackageTree, TestServer};
use spkg_compose::index::PackageRecord;
use spkg_compose::update::DispatchConfig;
use spkg_compose::{
    ExecutorInventory, FetchOutcome, PackageIndex, ReleaseTracker, TrackerError, UpdateOutcome, UpdateWorkflow,
};

const SOURCE: &str = "https://github.com/acme/foo";

struct Harness {
    tree: PackageTree,
    index: Arc<PackageIndex>,
    upstream: Arc<FakeUpstream>,
    tracker: ReleaseTracker,
    record: PackageRecord,
}

fn harness(mut record: PackageRecord, tree: PackageTree, latest: &str, upstream: FakeUpstream, servers: &[&TestServer]) -> Harness {
    record.latest = latest.to_string();
    let index = Arc::new(PackageIndex::open(&tree.index_path()).unwrap());
    index.insert_if_absent(record.clone()).unwrap();

    let inventory = ExecutorInventory::new(servers.iter().map(|s| s.descriptor.clone()).collect()).unwrap();
    let dispatch = DispatchConfig {
        build_timeout: Some(Duration::from_secs(10)),
        ..DispatchConfig::default()
    };
    let workflow = UpdateWorkflow::new(Arc::clone(&index), inventory, dispatch);
    let upstream = Arc::new(upstream);
    let tracker = ReleaseTracker::new(upstream.clone(), workflow);

    Harness {
        tree,
        index,
        upstream,
        tracker,
        record,
    }
}

fn single(outcomes: Vec<(String, FetchOutcome)>) -> FetchOutcome {
    assert_eq!(outcomes.len(), 1, "outcomes: {:?}", outcomes);
    outcomes.into_iter().next().unwrap().1
}

#[test]
fn test_first_observation_adopts_marker_without_building() {
    let tree = PackageTree::new();
    let record = tree.write_package("foo", "1.9.0", &["x86_64"], SOURCE);
    let server = TestServer::start("amd-1", &["x86_64"], Behavior::Succeed);
    let h = harness(record, tree, "", FakeUpstream::with_release("v2.0.0"), &[&server]);
    let before = snapshot(&h.record);

    let outcome = single(h.tracker.checkout(None).unwrap());
    assert_eq!(outcome, FetchOutcome::FirstObservation { marker: "v2.0.0".to_string() });
    assert_eq!(h.index.get("foo").unwrap().latest, "v2.0.0");
    assert_eq!(snapshot(&h.record), before);
    assert!(server.builds().is_empty());
}

#[test]
fn test_unchanged_upstream_is_idempotent() {
    let tree = PackageTree::new();
    let record = tree.write_package("foo", "1.9.0", &["x86_64"], SOURCE);
    let server = TestServer::start("amd-1", &["x86_64"], Behavior::Succeed);
    let h = harness(record, tree, "v1.9.0", FakeUpstream::with_release("v1.9.0"), &[&server]);
    let files = snapshot(&h.record);
    let indexed = h.index.get("foo").unwrap();

    for _ in 0..2 {
        let outcome = single(h.tracker.checkout(None).unwrap());
        assert_eq!(outcome, FetchOutcome::UpToDate);
    }
    let on_disk = fs::read_to_string(h.tree.index_path()).unwrap();
    h.tracker.checkout(None).unwrap();

    assert_eq!(snapshot(&h.record), files);
    assert_eq!(h.index.get("foo").unwrap(), indexed);
    assert_eq!(fs::read_to_string(h.tree.index_path()).unwrap(), on_disk);
    assert!(server.builds().is_empty());
}

#[test]
fn test_new_release_updates_then_settles() {
    let tree = PackageTree::new();
    let record = tree.write_package("foo", "1.9.0", &["x86_64"], SOURCE);
    let server = TestServer::start("amd-1", &["x86_64"], Behavior::Succeed);
    let h = harness(record, tree, "v1.9.0", FakeUpstream::with_release("v2.0.0"), &[&server]);

    let outcome = single(h.tracker.checkout(None).unwrap());
    assert_eq!(
        outcome,
        FetchOutcome::Updated(UpdateOutcome::Committed { version: "2.0.0".to_string() })
    );
    assert_eq!(h.index.get("foo").unwrap().latest, "v2.0.0");

    let outcome = single(h.tracker.checkout(None).unwrap());
    assert_eq!(outcome, FetchOutcome::UpToDate);
    assert_eq!(server.builds(), vec!["2.0.0".to_string()]);
}

#[test]
fn test_failed_update_is_retried_next_cycle() {
    let tree = PackageTree::new();
    let record = tree.write_package("foo", "1.9.0", &["x86_64"], SOURCE);
    let server = TestServer::start("amd-1", &["x86_64"], Behavior::Fail);
    let h = harness(record, tree, "v1.9.0", FakeUpstream::with_release("v2.0.0"), &[&server]);

    for _ in 0..2 {
        let outcome = single(h.tracker.checkout(None).unwrap());
        assert!(
            matches!(outcome, FetchOutcome::Updated(UpdateOutcome::RolledBack { .. })),
            "outcome: {:?}",
            outcome
        );
    }
    // The second cycle first tries to repair the stale arch at 1.9.0.
    assert_eq!(server.builds(), vec!["2.0.0", "1.9.0", "2.0.0"]);
    assert_eq!(h.index.get("foo").unwrap().latest, "v1.9.0");
}

#[test]
fn test_commit_fallback_when_no_releases() {
    let tree = PackageTree::new();
    let record = tree.write_package("foo", "1.9.0", &["x86_64"], SOURCE);
    let server = TestServer::start("amd-1", &["x86_64"], Behavior::Succeed);
    let sha = "abcdef0123456789abcdef0123456789abcdef01";
    let h = harness(
        record,
        tree,
        "0000000000000000000000000000000000000000",
        FakeUpstream::with_commit(sha),
        &[&server],
    );

    let outcome = single(h.tracker.checkout(None).unwrap());
    assert_eq!(
        outcome,
        FetchOutcome::Updated(UpdateOutcome::Committed { version: "git+abcdef0".to_string() })
    );
    let (compose, _) = snapshot(&h.record);
    assert!(compose.contains("Version = git+abcdef0"));
    assert_eq!(h.index.get("foo").unwrap().latest, sha);
}

#[test]
fn test_no_upstream_state_changes_nothing() {
    let tree = PackageTree::new();
    let record = tree.write_package("foo", "1.9.0", &["x86_64"], SOURCE);
    let upstream = FakeUpstream::with_release("v1.0.0");
    *upstream.release.lock().unwrap() = None;
    *upstream.commit.lock().unwrap() = None;
    let h = harness(record, tree, "v1.9.0", upstream, &[]);

    let outcome = single(h.tracker.checkout(None).unwrap());
    assert_eq!(outcome, FetchOutcome::NoUpstreamState);
    assert_eq!(h.index.get("foo").unwrap().latest, "v1.9.0");
}

#[test]
fn test_exhausted_quota_skips_cycle() {
    let tree = PackageTree::new();
    let record = tree.write_package("foo", "1.9.0", &["x86_64"], SOURCE);
    let server = TestServer::start("amd-1", &["x86_64"], Behavior::Succeed);
    let upstream = FakeUpstream::with_release("v2.0.0");
    upstream.remaining.store(0, Ordering::SeqCst);
    let h = harness(record, tree, "v1.9.0", upstream, &[&server]);
    let before = snapshot(&h.record);

    let err = h.tracker.checkout(None).unwrap_err();
    assert!(matches!(err, TrackerError::QuotaExceeded { .. }), "err: {}", err);
    assert_eq!(h.upstream.repo_calls(), 0);
    assert_eq!(snapshot(&h.record), before);
    assert_eq!(h.index.get("foo").unwrap().latest, "v1.9.0");
    assert!(server.builds().is_empty());

    assert!(matches!(h.tracker.fetch("foo"), Err(TrackerError::QuotaExceeded { .. })));
}

#[test]
fn test_stale_architecture_repaired_before_diff() {
    let tree = PackageTree::new();
    let mut record = tree.write_package("foo", "1.9.0", &["x86_64"], SOURCE);
    record.architectures = flags(&[("x86_64", false)]);
    let server = TestServer::start("amd-1", &["x86_64"], Behavior::Succeed);
    let h = harness(record, tree, "v1.9.0", FakeUpstream::with_release("v1.9.0"), &[&server]);

    let outcome = single(h.tracker.checkout(None).unwrap());
    assert_eq!(outcome, FetchOutcome::UpToDate);
    assert_eq!(server.builds(), vec!["1.9.0".to_string()]);
    assert_eq!(h.index.get("foo").unwrap().architectures, flags(&[("x86_64", true)]));
}

#[test]
fn test_non_github_source_is_not_tracked() {
    let tree = PackageTree::new();
    let record = tree.write_package("foo", "1.9.0", &["x86_64"], "https://gitlab.com/acme/foo");
    let h = harness(record, tree, "v1.9.0", FakeUpstream::with_release("v2.0.0"), &[]);

    let outcome = single(h.tracker.checkout(None).unwrap());
    assert_eq!(outcome, FetchOutcome::NotTracked);
    assert_eq!(h.upstream.repo_calls(), 0);
}

#[test]
fn test_checkout_of_one_package() {
    let tree = PackageTree::new();
    let record = tree.write_package("foo", "1.9.0", &["x86_64"], SOURCE);
    let h = harness(record, tree, "", FakeUpstream::with_release("v2.0.0"), &[]);

    let outcomes = h.tracker.checkout(Some("foo")).unwrap();
    assert_eq!(outcomes[0].0, "foo");

    let err = h.tracker.checkout(Some("bar")).unwrap_err();
    assert!(matches!(err, TrackerError::UnknownPackage(ref id) if id == "bar"));
}
