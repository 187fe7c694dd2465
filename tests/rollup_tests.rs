use apm_capture::rollup::{CaptureRecord, MemoryStore, RollupAggregator, TimeSeriesStore};
use apm_capture::utils::clock::ManualClock;
use apm_capture::utils::config::default_rollup_levels;
use apm_capture::utils::{RollupError, RollupLevel};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;

const SECOND_NANOS: u64 = 1_000_000_000;
const DAY_MS: u64 = 86_400_000;

fn setup(now: u64) -> (RollupAggregator, Arc<MemoryStore>, Arc<ManualClock>) {
    let levels = default_rollup_levels();
    let store = Arc::new(MemoryStore::new(levels.len()));
    let clock = Arc::new(ManualClock::new(now));
    let aggregator = RollupAggregator::new(store.clone(), levels, clock.clone()).unwrap();
    (aggregator, store, clock)
}

#[test]
fn test_five_minute_rollup_of_three_captures() {
    let (aggregator, _, _) = setup(DAY_MS);
    aggregator.store("web", "GET /", 60_001, SECOND_NANOS, false).unwrap();
    aggregator.store("web", "GET /", 120_002, 3 * SECOND_NANOS, false).unwrap();
    aggregator.store("web", "GET /", 360_000, 7 * SECOND_NANOS, false).unwrap();

    aggregator.rollup("web").unwrap();

    let first_bucket = aggregator.read_results("web", "GET /", 0, 300_000, 1).unwrap();
    assert_eq!(first_bucket.len(), 1);
    assert_eq!(first_bucket[0].capture_time, 300_000);
    assert_eq!(first_bucket[0].total_duration_nanos, 4 * SECOND_NANOS);
    assert_eq!(first_bucket[0].execution_count, 2);
    assert_eq!(first_bucket[0].error_count, 0);

    let all = aggregator.read_results("web", "GET /", 0, DAY_MS, 1).unwrap();
    let times: Vec<u64> = all.iter().map(|r| r.capture_time).collect();
    assert_eq!(times, vec![300_000, 600_000]);

    // every coarser level carries the same totals
    for level in 2..4 {
        let records = aggregator.read_results("web", "GET /", 0, DAY_MS, level).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].total_duration_nanos, 11 * SECOND_NANOS);
        assert_eq!(records[0].execution_count, 3);
    }
}

#[test]
fn test_keys_are_rolled_up_separately() {
    let (aggregator, _, _) = setup(DAY_MS);
    aggregator.store("web", "GET /", 1_000, 10, false).unwrap();
    aggregator.store("web", "POST /", 2_000, 20, true).unwrap();
    aggregator.rollup("web").unwrap();

    let get = aggregator.read_results("web", "GET /", 0, DAY_MS, 1).unwrap();
    let post = aggregator.read_results("web", "POST /", 0, DAY_MS, 1).unwrap();
    assert_eq!(get[0].error_count, 0);
    assert_eq!(post[0].error_count, 1);
    assert_eq!(post[0].total_duration_nanos, 20);
}

#[test]
fn test_partial_failure_then_retry_is_lossless() {
    let (aggregator, store, _) = setup(DAY_MS);
    aggregator.store("web", "GET /", 60_001, 1, false).unwrap();
    aggregator.store("web", "GET /", 120_002, 3, false).unwrap();
    aggregator.store("web", "GET /", 360_000, 7, true).unwrap();

    // first level-1 bucket is written, the second write fails
    store.fail_writes_after(1);
    let err = aggregator.rollup("web").unwrap_err();
    assert!(err.is_retryable());
    assert!(!aggregator.pending_ids().unwrap().is_empty());

    store.set_available(true);
    aggregator.rollup("web").unwrap();
    assert!(aggregator.pending_ids().unwrap().is_empty());

    let top = aggregator.read_results("web", "GET /", 0, DAY_MS, 3).unwrap();
    assert_eq!(
        top,
        vec![CaptureRecord {
            logical_id: "web".to_string(),
            key: "GET /".to_string(),
            capture_time: 14_400_000,
            total_duration_nanos: 11,
            execution_count: 3,
            error_count: 1,
        }]
    );
}

#[test]
fn test_expire_after_rollup_removes_old_raw_data() {
    let (aggregator, store, _) = setup(DAY_MS);
    aggregator.store("web", "GET /", 1_000, 10, false).unwrap();
    aggregator.rollup("web").unwrap();
    assert_eq!(store.len(0), 1);

    // raw data lives two days, the five-minute level a week
    let deleted = aggregator.expire(3 * DAY_MS).unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(store.len(0), 0);
    assert_eq!(store.len(1), 1);
}

#[test]
fn test_expire_waits_for_pending_bucket() {
    let (aggregator, store, clock) = setup(100_000);
    aggregator.store("web", "GET /", 90_000, 10, false).unwrap();

    // bucket (0, 300000] is still open, nothing may be expired from it
    assert_eq!(aggregator.rollup("web").unwrap(), 0);
    assert_eq!(aggregator.expire(10 * DAY_MS).unwrap(), 0);
    assert_eq!(store.len(0), 1);

    clock.set(10 * DAY_MS);
    aggregator.rollup("web").unwrap();
    let rolled = aggregator.read_results("web", "GET /", 0, DAY_MS, 1).unwrap();
    assert_eq!(rolled[0].total_duration_nanos, 10);
}

#[test]
fn test_rollup_covers_records_appended_to_the_store_directly() {
    let (aggregator, store, _) = setup(DAY_MS);
    store.append(0, CaptureRecord::raw("one", "GET /", 60_001, 1, false)).unwrap();
    store.append(0, CaptureRecord::raw("one", "GET /", 120_002, 3, false)).unwrap();

    assert_eq!(aggregator.pending_ids().unwrap(), vec!["one".to_string()]);
    assert_eq!(aggregator.rollup("one").unwrap(), 3);
    let five_minutes = aggregator.read_results("one", "GET /", 0, DAY_MS, 1).unwrap();
    assert_eq!(five_minutes[0].total_duration_nanos, 4);

    aggregator.expire(10 * DAY_MS).unwrap();
    assert_eq!(store.len(0), 0);
    let top = aggregator.read_results("one", "GET /", 0, DAY_MS, 3).unwrap();
    assert_eq!(top[0].total_duration_nanos, 4);
    assert_eq!(top[0].execution_count, 2);
}

#[test]
fn test_expire_keeps_records_no_aggregator_has_rolled_up() {
    let (aggregator, store, _) = setup(100_000);
    store.append(0, CaptureRecord::raw("one", "GET /", 60_001, 1, false)).unwrap();
    store.append(0, CaptureRecord::raw("one", "GET /", 90_000, 3, false)).unwrap();

    assert_eq!(aggregator.rollup("one").unwrap(), 0);
    assert_eq!(aggregator.expire(10 * DAY_MS).unwrap(), 0);
    assert_eq!(store.len(0), 2);
}

#[test]
fn test_late_capture_after_expiration_leaves_totals_intact() {
    let (aggregator, _, _) = setup(DAY_MS);
    aggregator.store("one", "GET /", 60_001, 1, false).unwrap();
    aggregator.store("one", "GET /", 120_002, 3, false).unwrap();
    aggregator.rollup("one").unwrap();
    aggregator.expire(10 * DAY_MS).unwrap();

    let err = aggregator.store("one", "GET /", 180_000, 5, false).unwrap_err();
    assert!(matches!(err, RollupError::Expired { level: 0, .. }));
    aggregator.rollup("one").unwrap();

    for level in 2..4 {
        let records = aggregator.read_results("one", "GET /", 0, DAY_MS, level).unwrap();
        assert_eq!(records[0].total_duration_nanos, 4);
        assert_eq!(records[0].execution_count, 2);
    }
}

#[test]
fn test_concurrent_store_and_rollup_is_lossless() {
    let levels = vec![
        RollupLevel::new(10, DAY_MS),
        RollupLevel::new(100, DAY_MS),
        RollupLevel::new(1_000, DAY_MS),
    ];
    let store = Arc::new(MemoryStore::new(levels.len()));
    let clock = Arc::new(ManualClock::new(DAY_MS));
    let aggregator = Arc::new(RollupAggregator::new(store.clone(), levels, clock).unwrap());

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let aggregator = Arc::clone(&aggregator);
            thread::spawn(move || {
                for i in 0..250u64 {
                    let time = 1 + (i * 4 + w) % 1_000;
                    aggregator.store("svc", "job", time, 2, i % 10 == 0).unwrap();
                    if i % 25 == 0 {
                        aggregator.rollup("svc").unwrap();
                    }
                }
            })
        })
        .collect();

    let roller = {
        let aggregator = Arc::clone(&aggregator);
        thread::spawn(move || {
            for _ in 0..50 {
                aggregator.rollup("svc").unwrap();
                thread::yield_now();
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    roller.join().unwrap();
    aggregator.rollup("svc").unwrap();

    let top = store.query_range("svc", 0, DAY_MS, 2).unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].execution_count, 1_000);
    assert_eq!(top[0].total_duration_nanos, 2_000);
    assert_eq!(top[0].error_count, 100);
}
