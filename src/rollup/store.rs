//! Time-series store contract and an in-memory implementation.

use super::record::CaptureRecord;
use crate::utils::error::StoreError;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

/// Read/write contract the rollup pipeline needs from storage
///
/// Levels are numbered from 0 (raw). Ranges are inclusive on both ends and
/// results are ordered by capture time.
///
/// Every record carries a "rolled up" mark. Appending a record clears it,
/// so new and replaced records are picked up by the next rollup pass no
/// matter which aggregator wrote them.
pub trait TimeSeriesStore: Send + Sync {
    /// Number of levels the store holds
    fn level_count(&self) -> usize;

    /// Insert `record`, replacing any record with the same
    /// `(logical_id, key, capture_time)`; the record is not rolled up yet
    fn append(&self, level: usize, record: CaptureRecord) -> Result<(), StoreError>;

    /// Records of one key with `capture_time` in `[from, to]`
    fn query(
        &self,
        logical_id: &str,
        key: &str,
        from: u64,
        to: u64,
        level: usize,
    ) -> Result<Vec<CaptureRecord>, StoreError>;

    /// Records of every key of `logical_id` with `capture_time` in `[from, to]`
    fn query_range(
        &self,
        logical_id: &str,
        from: u64,
        to: u64,
        level: usize,
    ) -> Result<Vec<CaptureRecord>, StoreError>;

    /// Records of `logical_id` at `level` not yet rolled up, ordered by key
    /// then capture time
    fn unrolled(&self, logical_id: &str, level: usize) -> Result<Vec<CaptureRecord>, StoreError>;

    /// Logical ids with records at `level` not yet rolled up, sorted
    fn unrolled_ids(&self, level: usize) -> Result<Vec<String>, StoreError>;

    /// Earliest capture time at `level` not yet rolled up, any logical id
    fn earliest_unrolled(&self, level: usize) -> Result<Option<u64>, StoreError>;

    /// Mark `records` as rolled up
    ///
    /// A stored record that no longer equals the one passed in was replaced
    /// since it was read and stays unrolled.
    ///
    /// # Returns
    /// Number of records marked
    fn mark_rolled(&self, level: usize, records: &[CaptureRecord]) -> Result<usize, StoreError>;

    /// Delete records at `level` with `capture_time < before`
    ///
    /// # Returns
    /// Number of records deleted
    fn delete_expired(&self, level: usize, before: u64) -> Result<usize, StoreError>;

    /// Highest `before` ever passed to `delete_expired` for `level`, 0 if none
    fn expired_before(&self, level: usize) -> Result<u64, StoreError>;
}

type RecordKey = (String, String, u64);

#[derive(Debug, Clone)]
struct StoredRecord {
    record: CaptureRecord,
    rolled: bool,
}

#[derive(Debug, Clone, Default)]
struct LevelData {
    records: BTreeMap<RecordKey, StoredRecord>,
    expired_before: u64,
}

/// `BTreeMap`-backed store, one map per level
pub struct MemoryStore {
    levels: RwLock<Vec<LevelData>>,
    available: AtomicBool,
    // successful appends left before writes start failing, None = unlimited
    write_budget: Mutex<Option<usize>>,
}

impl MemoryStore {
    pub fn new(level_count: usize) -> Self {
        Self {
            levels: RwLock::new(vec![LevelData::default(); level_count]),
            available: AtomicBool::new(true),
            write_budget: Mutex::new(None),
        }
    }

    /// Make every operation fail with `StoreError::Unavailable` until set back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if available {
            *self.write_budget.lock() = None;
        }
    }

    /// Let `count` more appends succeed, then fail the rest
    pub fn fail_writes_after(&self, count: usize) {
        *self.write_budget.lock() = Some(count);
    }

    /// Number of records stored at `level`
    pub fn len(&self, level: usize) -> usize {
        self.levels.read().get(level).map_or(0, |data| data.records.len())
    }

    pub fn is_empty(&self) -> bool {
        self.levels.read().iter().all(|data| data.records.is_empty())
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("store marked unavailable".to_string()))
        }
    }

    fn take_write_budget(&self) -> Result<(), StoreError> {
        let mut budget = self.write_budget.lock();
        match budget.as_mut() {
            Some(0) => Err(StoreError::Unavailable("write budget exhausted".to_string())),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

fn record_key(record: &CaptureRecord) -> RecordKey {
    (
        record.logical_id.clone(),
        record.key.clone(),
        record.capture_time,
    )
}

fn level_data(levels: &[LevelData], level: usize) -> Result<&LevelData, StoreError> {
    levels.get(level).ok_or(StoreError::UnknownLevel(level))
}

fn level_data_mut(levels: &mut [LevelData], level: usize) -> Result<&mut LevelData, StoreError> {
    levels.get_mut(level).ok_or(StoreError::UnknownLevel(level))
}

impl TimeSeriesStore for MemoryStore {
    fn level_count(&self) -> usize {
        self.levels.read().len()
    }

    fn append(&self, level: usize, record: CaptureRecord) -> Result<(), StoreError> {
        self.check_available()?;
        self.take_write_budget()?;

        let mut levels = self.levels.write();
        let data = level_data_mut(&mut levels, level)?;
        data.records.insert(
            record_key(&record),
            StoredRecord {
                record,
                rolled: false,
            },
        );
        Ok(())
    }

    fn query(
        &self,
        logical_id: &str,
        key: &str,
        from: u64,
        to: u64,
        level: usize,
    ) -> Result<Vec<CaptureRecord>, StoreError> {
        self.check_available()?;
        if from > to {
            return Ok(Vec::new());
        }

        let levels = self.levels.read();
        let data = level_data(&levels, level)?;
        let lower = (logical_id.to_string(), key.to_string(), from);
        let upper = (logical_id.to_string(), key.to_string(), to);
        let records = data
            .records
            .range(lower..=upper)
            .map(|(_, stored)| stored.record.clone())
            .collect();
        Ok(records)
    }

    fn query_range(
        &self,
        logical_id: &str,
        from: u64,
        to: u64,
        level: usize,
    ) -> Result<Vec<CaptureRecord>, StoreError> {
        self.check_available()?;

        let levels = self.levels.read();
        let data = level_data(&levels, level)?;
        let mut matching: Vec<CaptureRecord> = data
            .records
            .values()
            .map(|stored| &stored.record)
            .filter(|r| r.logical_id == logical_id && r.capture_time >= from && r.capture_time <= to)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.capture_time.cmp(&b.capture_time).then_with(|| a.key.cmp(&b.key)));
        Ok(matching)
    }

    fn unrolled(&self, logical_id: &str, level: usize) -> Result<Vec<CaptureRecord>, StoreError> {
        self.check_available()?;

        let levels = self.levels.read();
        let data = level_data(&levels, level)?;
        let records = data
            .records
            .values()
            .filter(|stored| !stored.rolled && stored.record.logical_id == logical_id)
            .map(|stored| stored.record.clone())
            .collect();
        Ok(records)
    }

    fn unrolled_ids(&self, level: usize) -> Result<Vec<String>, StoreError> {
        self.check_available()?;

        let levels = self.levels.read();
        let data = level_data(&levels, level)?;
        let ids: BTreeSet<&str> = data
            .records
            .values()
            .filter(|stored| !stored.rolled)
            .map(|stored| stored.record.logical_id.as_str())
            .collect();
        Ok(ids.into_iter().map(str::to_string).collect())
    }

    fn earliest_unrolled(&self, level: usize) -> Result<Option<u64>, StoreError> {
        self.check_available()?;

        let levels = self.levels.read();
        let data = level_data(&levels, level)?;
        let earliest = data
            .records
            .values()
            .filter(|stored| !stored.rolled)
            .map(|stored| stored.record.capture_time)
            .min();
        Ok(earliest)
    }

    fn mark_rolled(&self, level: usize, records: &[CaptureRecord]) -> Result<usize, StoreError> {
        self.check_available()?;

        let mut levels = self.levels.write();
        let data = level_data_mut(&mut levels, level)?;
        let mut marked = 0;
        for record in records {
            if let Some(stored) = data.records.get_mut(&record_key(record)) {
                if stored.record == *record && !stored.rolled {
                    stored.rolled = true;
                    marked += 1;
                }
            }
        }
        Ok(marked)
    }

    fn delete_expired(&self, level: usize, before: u64) -> Result<usize, StoreError> {
        self.check_available()?;

        let mut levels = self.levels.write();
        let data = level_data_mut(&mut levels, level)?;
        let len_before = data.records.len();
        data.records.retain(|_, stored| stored.record.capture_time >= before);
        data.expired_before = data.expired_before.max(before);
        Ok(len_before - data.records.len())
    }

    fn expired_before(&self, level: usize) -> Result<u64, StoreError> {
        self.check_available()?;
        Ok(level_data(&self.levels.read(), level)?.expired_before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_upserts_same_point() {
        let store = MemoryStore::new(2);
        store.append(1, CaptureRecord::raw("app", "k", 300, 5, false)).unwrap();
        store.append(1, CaptureRecord::raw("app", "k", 300, 9, true)).unwrap();

        let records = store.query("app", "k", 0, 1000, 1).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].total_duration_nanos, 9);
        assert_eq!(store.len(1), 1);
    }

    #[test]
    fn test_query_is_inclusive_and_scoped_to_key() {
        let store = MemoryStore::new(1);
        for (key, time) in [("a", 10), ("a", 20), ("a", 30), ("b", 20)] {
            store.append(0, CaptureRecord::raw("app", key, time, 1, false)).unwrap();
        }

        let times: Vec<u64> = store
            .query("app", "a", 20, 30, 0)
            .unwrap()
            .iter()
            .map(|r| r.capture_time)
            .collect();
        assert_eq!(times, vec![20, 30]);
        assert_eq!(store.query_range("app", 20, 20, 0).unwrap().len(), 2);
        assert!(store.query_range("other", 0, 100, 0).unwrap().is_empty());
    }

    #[test]
    fn test_unavailable_and_write_budget() {
        let store = MemoryStore::new(1);
        store.set_available(false);
        let err = store.query("app", "k", 0, 1, 0).unwrap_err();
        assert!(err.is_retryable());

        store.set_available(true);
        store.fail_writes_after(1);
        assert!(store.append(0, CaptureRecord::raw("app", "k", 1, 1, false)).is_ok());
        assert!(store.append(0, CaptureRecord::raw("app", "k", 2, 1, false)).is_err());
    }

    #[test]
    fn test_unknown_level() {
        let store = MemoryStore::new(1);
        let err = store.append(3, CaptureRecord::raw("app", "k", 1, 1, false)).unwrap_err();
        assert_eq!(err, StoreError::UnknownLevel(3));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_delete_expired() {
        let store = MemoryStore::new(1);
        for time in [5, 10, 15] {
            store.append(0, CaptureRecord::raw("app", "k", time, 1, false)).unwrap();
        }
        assert_eq!(store.delete_expired(0, 10).unwrap(), 1);
        assert_eq!(store.len(0), 2);
    }

    #[test]
    fn test_rolled_marks_follow_replacements() {
        let store = MemoryStore::new(2);
        let first = CaptureRecord::raw("app", "k", 100, 5, false);
        store.append(0, first.clone()).unwrap();
        store.append(0, CaptureRecord::raw("other", "k", 50, 1, false)).unwrap();
        assert_eq!(store.earliest_unrolled(0).unwrap(), Some(50));
        assert_eq!(store.unrolled_ids(0).unwrap(), vec!["app".to_string(), "other".to_string()]);

        assert_eq!(store.mark_rolled(0, std::slice::from_ref(&first)).unwrap(), 1);
        assert!(store.unrolled("app", 0).unwrap().is_empty());
        assert_eq!(store.unrolled_ids(0).unwrap(), vec!["other".to_string()]);

        // a replaced record is not covered by a mark taken on the old value
        let replaced = CaptureRecord::raw("app", "k", 100, 9, false);
        store.append(0, replaced.clone()).unwrap();
        assert_eq!(store.mark_rolled(0, &[first]).unwrap(), 0);
        assert_eq!(store.unrolled("app", 0).unwrap(), vec![replaced]);
    }

    #[test]
    fn test_expired_before_only_moves_forward() {
        let store = MemoryStore::new(1);
        assert_eq!(store.expired_before(0).unwrap(), 0);
        store.delete_expired(0, 500).unwrap();
        store.delete_expired(0, 200).unwrap();
        assert_eq!(store.expired_before(0).unwrap(), 500);
    }
}
