use std::fs;

use tempfile::tempdir;

use super::router::{self, ResultRouter, RouteCommand, Stores};
use super::writer::StoreWriter;
use crate::constants::{ANOMALY_FILE, COLLECTION_FILE, NORMAL_FILE};
use crate::logic::features::RawRecord;
use crate::logic::model::inference::Verdict;
use crate::logic::model::AnomalyVerdict;

fn record(line: &str) -> RawRecord {
    RawRecord::parse_line(line).unwrap()
}

fn verdict(line: &str, verdict: Verdict) -> AnomalyVerdict {
    AnomalyVerdict {
        record: record(line),
        verdict,
    }
}

fn read_lines(path: &std::path::Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_writer_appends_verbatim_rows() {
    let dir = tempdir().unwrap();
    let writer = StoreWriter::new(dir.path().join("nested").join("store.csv"));

    writer.append(&record("1200,6,192.168.0.1,10.0.0.1,0.005")).unwrap();
    writer.append(&record(" 60 ,17,a,b,1e-3")).unwrap();

    assert_eq!(
        read_lines(writer.path()),
        vec!["1200,6,192.168.0.1,10.0.0.1,0.005", " 60 ,17,a,b,1e-3"]
    );
}

#[test]
fn test_writer_reports_failed_append() {
    let dir = tempdir().unwrap();
    // A directory where the file should be
    let path = dir.path().join("blocked.csv");
    fs::create_dir(&path).unwrap();

    let writer = StoreWriter::new(path.clone());
    let err = writer.append(&record("1,2,3,4,5")).unwrap_err();
    assert_eq!(err.path, path);
}

#[test]
fn test_collection_keeps_arrival_order() {
    let dir = tempdir().unwrap();
    let mut router = ResultRouter::new(Stores::in_dir(dir.path(), false));

    router.handle(RouteCommand::Collected(vec![
        record("1,6,a,b,0.1"),
        record("2,6,a,b,0.2"),
    ]));
    router.handle(RouteCommand::Collected(vec![record("3,6,a,b,0.3")]));

    assert_eq!(
        read_lines(&dir.path().join(COLLECTION_FILE)),
        vec!["1,6,a,b,0.1", "2,6,a,b,0.2", "3,6,a,b,0.3"]
    );
    assert_eq!(router.summary().collected, 3);
    assert_eq!(router.summary().written, 3);
    assert!(!dir.path().join(ANOMALY_FILE).exists());
}

#[test]
fn test_only_anomalies_persisted_by_default() {
    let dir = tempdir().unwrap();
    let mut router = ResultRouter::new(Stores::in_dir(dir.path(), false));

    router.handle(RouteCommand::Scored(vec![
        verdict("1200,6,192.168.0.1,10.0.0.1,0.005", Verdict::Normal),
        verdict("99999,6,203.0.113.5,10.0.0.1,0.005", Verdict::Anomaly),
        verdict("1300,6,192.168.0.1,10.0.0.1,0.004", Verdict::Normal),
    ]));

    // Original, un-encoded field values
    assert_eq!(
        read_lines(&dir.path().join(ANOMALY_FILE)),
        vec!["99999,6,203.0.113.5,10.0.0.1,0.005"]
    );
    assert!(!dir.path().join(NORMAL_FILE).exists());

    let summary = router.summary();
    assert_eq!(summary.anomalies, 1);
    assert_eq!(summary.normal, 2);
    assert_eq!(summary.written, 1);
}

#[test]
fn test_persist_normal_traffic() {
    let dir = tempdir().unwrap();
    let mut router = ResultRouter::new(Stores::in_dir(dir.path(), true));

    router.handle(RouteCommand::Scored(vec![
        verdict("1,6,a,b,0.1", Verdict::Normal),
        verdict("2,6,a,b,0.2", Verdict::Anomaly),
        verdict("3,6,a,b,0.3", Verdict::Normal),
    ]));

    assert_eq!(
        read_lines(&dir.path().join(NORMAL_FILE)),
        vec!["1,6,a,b,0.1", "3,6,a,b,0.3"]
    );
    assert_eq!(read_lines(&dir.path().join(ANOMALY_FILE)), vec!["2,6,a,b,0.2"]);
}

#[test]
fn test_failed_store_does_not_affect_others() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join(ANOMALY_FILE)).unwrap();
    let mut router = ResultRouter::new(Stores::in_dir(dir.path(), true));

    router.handle(RouteCommand::Scored(vec![
        verdict("1,6,a,b,0.1", Verdict::Anomaly),
        verdict("2,6,a,b,0.2", Verdict::Normal),
        verdict("3,6,a,b,0.3", Verdict::Anomaly),
    ]));

    assert_eq!(read_lines(&dir.path().join(NORMAL_FILE)), vec!["2,6,a,b,0.2"]);
    let summary = router.summary();
    assert_eq!(summary.failed_writes, 2);
    assert_eq!(summary.written, 1);
    assert_eq!(summary.anomalies, 2);
}

#[tokio::test]
async fn test_spawned_router_drains_on_finish() {
    let dir = tempdir().unwrap();
    let (handle, task) = router::spawn(Stores::in_dir(dir.path(), false));

    let other = handle.clone();
    handle.collect(vec![record("1,6,a,b,0.1")]).await;
    other.collect(vec![record("2,6,a,b,0.2")]).await;
    drop(handle);
    drop(other);

    let summary = task.finish().await;
    assert_eq!(summary.collected, 2);
    assert_eq!(
        read_lines(&dir.path().join(COLLECTION_FILE)),
        vec!["1,6,a,b,0.1", "2,6,a,b,0.2"]
    );
}
