use std::fs;

use super::{RecordingControl, ScriptedDriver, dump, flow_line, test_tracker};

#[tokio::test]
async fn first_scan_opens_a_connection() {
    let dir = tempfile::tempdir().expect("tempdir");
    let driver = ScriptedDriver::new([dump(&[flow_line(42, "10.0.0.1", 5000, "10.0.0.2", 22)])]);
    let mut tracker = test_tracker(&dir, driver, RecordingControl::default());

    tracker.update().await.expect("update");

    let known = tracker.known_flows(42).expect("identity ledgered");
    assert_eq!(known.len(), 1);
    assert_eq!(known[0].connection_id, 1);
    assert_eq!(known[0].dst_port, 22);
    assert!(known[0].is_open());

    let queued = tracker.pending_reports();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].connection_id, 1);
    assert_eq!(queued[0].end_time, 0);
}

#[tokio::test]
async fn ids_continue_from_persisted_value_and_store_back() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("conn_id");
    fs::write(&path, "7\n").expect("seed id file");

    let driver = ScriptedDriver::new([dump(&[
        flow_line(42, "10.0.0.1", 5000, "10.0.0.2", 22),
        flow_line(42, "10.0.0.1", 5001, "10.0.0.2", 22),
        flow_line(42, "10.0.0.1", 5002, "10.0.0.2", 22),
    ])]);
    let mut tracker = test_tracker(&dir, driver, RecordingControl::default());

    tracker.update().await.expect("update");

    let ids: Vec<u64> = tracker
        .known_flows(42)
        .expect("identity ledgered")
        .iter()
        .map(|f| f.connection_id)
        .collect();
    assert_eq!(ids, [8, 9, 10]);
    assert_eq!(tracker.last_conn_id(), 10);

    tracker.persist();
    assert_eq!(fs::read_to_string(&path).expect("read"), "10\n");
}

#[tokio::test]
async fn disappearance_closes_every_flow_of_the_identity() {
    let dir = tempfile::tempdir().expect("tempdir");
    // Second scan falls back to an empty table.
    let driver = ScriptedDriver::new([dump(&[flow_line(42, "10.0.0.1", 5000, "10.0.0.2", 22)])]);
    let mut tracker = test_tracker(&dir, driver, RecordingControl::default());

    tracker.update().await.expect("first update");
    tracker.maybe_report().await.expect("drain opened event");

    tracker.update().await.expect("second update");

    assert!(tracker.known().is_empty());
    let queued = tracker.pending_reports();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].connection_id, 1);
    assert_ne!(queued[0].end_time, 0);
    assert!(queued[0].end_time >= queued[0].start_time);
}

#[tokio::test]
async fn mixed_diff_closes_then_opens_per_identity() {
    let dir = tempfile::tempdir().expect("tempdir");
    let a = flow_line(42, "10.0.0.1", 5000, "10.0.0.2", 22);
    let b = flow_line(42, "10.0.0.1", 5001, "10.0.0.2", 22);
    let c = flow_line(42, "10.0.0.1", 5002, "10.0.0.2", 22);
    let driver = ScriptedDriver::new([dump(&[a, b.clone()]), dump(&[b, c])]);
    let mut tracker = test_tracker(&dir, driver, RecordingControl::default());

    tracker.update().await.expect("first update");
    tracker.maybe_report().await.expect("drain");

    tracker.update().await.expect("second update");

    // Ledger keeps B under its old id and numbers C freshly.
    let known = tracker.known_flows(42).expect("identity ledgered");
    assert_eq!(known.len(), 2);
    assert_eq!((known[0].src_port, known[0].connection_id), (5001, 2));
    assert_eq!((known[1].src_port, known[1].connection_id), (5002, 3));
    assert!(known.iter().all(|f| f.is_open()));

    // Outbound: A closed first, then C opened.
    let queued = tracker.pending_reports();
    assert_eq!(queued.len(), 2);
    assert_eq!(queued[0].src_port, 5000);
    assert_eq!(queued[0].connection_id, 1);
    assert_ne!(queued[0].end_time, 0);
    assert_eq!(queued[1].src_port, 5002);
    assert_eq!(queued[1].connection_id, 3);
    assert_eq!(queued[1].end_time, 0);
}

#[tokio::test]
async fn identical_scans_make_the_second_tick_a_no_op() {
    let dir = tempfile::tempdir().expect("tempdir");
    let lines = [
        flow_line(42, "10.0.0.1", 5000, "10.0.0.2", 22),
        flow_line(7, "10.0.0.9", 40000, "10.0.0.2", 443),
    ];
    let driver = ScriptedDriver::new([dump(&lines), dump(&lines)]);
    let mut tracker = test_tracker(&dir, driver, RecordingControl::default());

    tracker.update().await.expect("first update");
    tracker.maybe_report().await.expect("drain");
    let ledger_after_first = tracker.known().clone();
    let last_id = tracker.last_conn_id();

    tracker.update().await.expect("second update");

    assert!(tracker.pending_reports().is_empty());
    assert_eq!(tracker.known(), &ledger_after_first);
    assert_eq!(tracker.last_conn_id(), last_id);
}

#[tokio::test]
async fn empty_scan_with_empty_ledger_changes_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut tracker = test_tracker(&dir, ScriptedDriver::default(), RecordingControl::default());

    tracker.update().await.expect("update");

    assert!(tracker.known().is_empty());
    assert!(tracker.pending_reports().is_empty());
    assert_eq!(tracker.last_conn_id(), 0);
}

#[tokio::test]
async fn probe_failure_aborts_the_tick_with_ledger_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let driver = ScriptedDriver::new([dump(&[flow_line(42, "10.0.0.1", 5000, "10.0.0.2", 22)])]);
    let mut tracker = test_tracker(&dir, driver.clone(), RecordingControl::default());

    tracker.update().await.expect("first update");
    let ledger_after_first = tracker.known().clone();

    driver.set_query_failure(true);
    assert!(tracker.update().await.is_err());

    assert_eq!(tracker.known(), &ledger_after_first);
}

#[tokio::test]
async fn ledger_only_holds_open_flows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let driver = ScriptedDriver::new([
        dump(&[
            flow_line(42, "10.0.0.1", 5000, "10.0.0.2", 22),
            flow_line(7, "10.0.0.9", 40000, "10.0.0.2", 443),
        ]),
        dump(&[flow_line(7, "10.0.0.9", 40000, "10.0.0.2", 443)]),
    ]);
    let mut tracker = test_tracker(&dir, driver, RecordingControl::default());

    tracker.update().await.expect("first update");
    tracker.update().await.expect("second update");

    for flows in tracker.known().values() {
        assert!(flows.iter().all(|f| f.end_time == 0));
    }
    assert!(tracker.known_flows(42).is_none());
    assert!(tracker.known_flows(7).is_some());
}
