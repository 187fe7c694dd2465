//! Hierarchical rollup of capture records.
//!
//! Raw records land at level 0. Each coarser level holds one record per
//! `(logical_id, key, bucket)`, where a bucket is the right-closed interval
//! `(end - width, end]` and the record's `capture_time` is `end`.
//!
//! What still needs rolling up lives in the store: every appended record is
//! unrolled until a rollup pass has folded it into the next level. A bucket
//! is rolled up by recomputing it from every record of the finer level that
//! falls inside it and upserting the result, so running a rollup twice gives
//! the same answer, and a crash between the upsert and the mark only costs
//! a repeat of the same work.
//!
//! Expiration only deletes whole next-level buckets whose inputs are all
//! rolled up. The deleted range is remembered by the store, and captures
//! that would land in an already expired bucket are refused, so a bucket is
//! never recomputed from a partial set of inputs.

use super::record::CaptureRecord;
use super::store::TimeSeriesStore;
use crate::utils::clock::Clock;
use crate::utils::config::{validate_rollup_levels, RollupLevel};
use crate::utils::error::{ConfigError, RollupError};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Unrolled inputs grouped by `(key, bucket end)` of the next level
type DueBuckets = BTreeMap<(String, u64), Vec<CaptureRecord>>;

pub struct RollupAggregator {
    store: Arc<dyn TimeSeriesStore>,
    levels: Vec<RollupLevel>,
    clock: Arc<dyn Clock>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    // shared by `store`, exclusive for `expire`
    retention: RwLock<()>,
}

impl RollupAggregator {
    /// **Public** - create an aggregator over `store`
    ///
    /// # Arguments
    /// * `store` - Time-series store holding every level
    /// * `levels` - Level 0 is raw, each following level strictly coarser
    /// * `clock` - Decides which buckets are closed
    ///
    /// # Errors
    /// * `ConfigError::Invalid` - the levels do not nest, or the store holds
    ///   fewer levels than configured
    pub fn new(
        store: Arc<dyn TimeSeriesStore>,
        levels: Vec<RollupLevel>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        validate_rollup_levels(&levels)?;
        if store.level_count() < levels.len() {
            return Err(ConfigError::Invalid(format!(
                "store holds {} level(s), {} configured",
                store.level_count(),
                levels.len()
            )));
        }

        Ok(Self {
            store,
            levels,
            clock,
            locks: Mutex::new(HashMap::new()),
            retention: RwLock::new(()),
        })
    }

    pub fn levels(&self) -> &[RollupLevel] {
        &self.levels
    }

    /// Store one raw capture
    ///
    /// **Public** - called once per completed trace
    ///
    /// # Errors
    /// * `RollupError::Expired` - the capture belongs to a bucket whose
    ///   inputs were already expired at some level; nothing was written
    /// * `RollupError::Store` - the store rejected the write
    pub fn store(
        &self,
        logical_id: &str,
        key: &str,
        capture_time: u64,
        duration_nanos: u64,
        is_error: bool,
    ) -> Result<(), RollupError> {
        let _retention = self.retention.read();
        self.check_not_expired(capture_time)?;

        let record = CaptureRecord::raw(logical_id, key, capture_time, duration_nanos, is_error);
        self.store.append(0, record)?;
        Ok(())
    }

    /// Roll up every closed bucket of `logical_id` that has unrolled
    /// inputs, finest level first
    ///
    /// **Public** - safe to call from several threads and from several
    /// aggregators sharing a store; calls for the same logical id on one
    /// aggregator are serialized
    ///
    /// # Returns
    /// Number of buckets written
    ///
    /// # Errors
    /// Stops at the first store failure. Inputs not yet marked stay
    /// unrolled, so the call can simply be retried.
    pub fn rollup(&self, logical_id: &str) -> Result<usize, RollupError> {
        let lock = self.lock_for(logical_id);
        let _guard = lock.lock();

        let now = self.clock.current_time_millis();
        let mut rolled = 0;

        for target in 1..self.levels.len() {
            let source = target - 1;
            let expired_before = self.store.expired_before(source)?;

            for ((key, bucket_end), inputs) in self.due_buckets(logical_id, target, now)? {
                if bucket_end < expired_before {
                    warn!(
                        "Discarding {} level {} record(s) of '{}' '{}': bucket ending at {} already expired",
                        inputs.len(),
                        source,
                        logical_id,
                        key,
                        bucket_end
                    );
                } else {
                    self.rollup_bucket(logical_id, &key, target, bucket_end)?;
                    rolled += 1;
                }
                self.store.mark_rolled(source, &inputs)?;
            }
        }

        if rolled > 0 {
            debug!("Rolled up {} bucket(s) for '{}'", rolled, logical_id);
        }
        Ok(rolled)
    }

    /// Records of one key at `level` with `capture_time` in `[from, to]`
    ///
    /// # Errors
    /// * `RollupError::UnknownLevel` - `level` is not configured
    /// * `RollupError::Store` - the store could not be read
    pub fn read_results(
        &self,
        logical_id: &str,
        key: &str,
        from: u64,
        to: u64,
        level: usize,
    ) -> Result<Vec<CaptureRecord>, RollupError> {
        if level >= self.levels.len() {
            return Err(RollupError::UnknownLevel(level));
        }
        Ok(self.store.query(logical_id, key, from, to, level)?)
    }

    /// Delete records past their level's expiration
    ///
    /// Below the last level, only whole buckets of the next level are
    /// deleted, and only up to the first bucket that unrolled data at this
    /// level or any finer one will still change, however old it is.
    ///
    /// # Returns
    /// Number of records deleted across all levels
    pub fn expire(&self, now: u64) -> Result<usize, RollupError> {
        let _retention = self.retention.write();

        let mut deleted = 0;
        let mut earliest_unrolled: Option<u64> = None;
        for (level, config) in self.levels.iter().enumerate() {
            let cutoff = now.saturating_sub(config.expiration_ms);
            let before = match self.levels.get(level + 1) {
                Some(next) => {
                    if let Some(time) = self.store.earliest_unrolled(level)? {
                        earliest_unrolled = Some(earliest_unrolled.map_or(time, |t| t.min(time)));
                    }
                    match deletable_through(next, cutoff, earliest_unrolled) {
                        Some(boundary) => boundary + 1,
                        None => continue,
                    }
                }
                None => cutoff,
            };
            deleted += self.store.delete_expired(level, before)?;
        }

        if deleted > 0 {
            info!("Expired {} record(s)", deleted);
        }
        Ok(deleted)
    }

    /// Logical ids with records still waiting for rollup, sorted
    pub fn pending_ids(&self) -> Result<Vec<String>, RollupError> {
        let mut ids = BTreeSet::new();
        for level in self.source_levels() {
            ids.extend(self.store.unrolled_ids(level)?);
        }
        Ok(ids.into_iter().collect())
    }

    /// Number of records of `logical_id` waiting for rollup, all levels
    pub fn pending_count(&self, logical_id: &str) -> Result<usize, RollupError> {
        let mut count = 0;
        for level in self.source_levels() {
            count += self.store.unrolled(logical_id, level)?.len();
        }
        Ok(count)
    }

    /// Levels whose records feed a coarser level
    fn source_levels(&self) -> std::ops::Range<usize> {
        0..self.levels.len().saturating_sub(1)
    }

    fn lock_for(&self, logical_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(logical_id.to_string()).or_default())
    }

    fn check_not_expired(&self, capture_time: u64) -> Result<(), RollupError> {
        for source in self.source_levels() {
            let next = self.levels[source + 1];
            if next.bucket_end(capture_time) < self.store.expired_before(source)? {
                return Err(RollupError::Expired {
                    capture_time,
                    level: source,
                });
            }
        }
        Ok(())
    }

    fn due_buckets(&self, logical_id: &str, target: usize, now: u64) -> Result<DueBuckets, RollupError> {
        let level = self.levels[target];
        let mut due = DueBuckets::new();
        for record in self.store.unrolled(logical_id, target - 1)? {
            let bucket_end = level.bucket_end(record.capture_time);
            if bucket_end <= now {
                due.entry((record.key.clone(), bucket_end)).or_default().push(record);
            }
        }
        Ok(due)
    }

    fn rollup_bucket(
        &self,
        logical_id: &str,
        key: &str,
        target: usize,
        bucket_end: u64,
    ) -> Result<(), RollupError> {
        let level = self.levels[target];
        let from = if bucket_end == 0 {
            0
        } else {
            level.bucket_start(bucket_end) + 1
        };

        let sources = self.store.query(logical_id, key, from, bucket_end, target - 1)?;
        if sources.is_empty() {
            debug!(
                "No level {} data for '{}' '{}' in bucket ending at {}",
                target - 1,
                logical_id,
                key,
                bucket_end
            );
            return Ok(());
        }

        let mut aggregate = CaptureRecord::empty_bucket(logical_id, key, bucket_end);
        for record in &sources {
            aggregate.absorb(record)?;
        }
        self.store.append(target, aggregate)?;
        Ok(())
    }
}

/// Last boundary of `next` at or before `cutoff` that lies before the
/// bucket of `earliest_unrolled`; `None` when nothing may be deleted
fn deletable_through(next: &RollupLevel, cutoff: u64, earliest_unrolled: Option<u64>) -> Option<u64> {
    let boundary = next.bucket_floor(cutoff);
    match earliest_unrolled {
        Some(earliest) => {
            let boundary = boundary.min(next.bucket_start(next.bucket_end(earliest)));
            (boundary < earliest).then_some(boundary)
        }
        None => Some(boundary),
    }
}
