//! Thread-safe store for the latest scan snapshot and bounded history.
//!
//! All mutation goes through [`DataStore::commit`]. Readers clone `Arc`
//! handles under a short read lock and run filters after releasing it, so a
//! slow predicate never stalls the scan loop.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{
    MarketCapTier, Record, ScanStatistics, ScanSummary, Snapshot, TierThresholds, ValidationError,
};

/// Default number of snapshots retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Latest pointer plus history, swapped under one lock.
#[derive(Debug, Default)]
struct StoreInner {
    latest: Option<Arc<Snapshot>>,
    history: VecDeque<Arc<Snapshot>>,
}

/// In-memory snapshot store shared between the scan loop and readers.
#[derive(Debug)]
pub struct DataStore {
    inner: RwLock<StoreInner>,
    capacity: usize,
    thresholds: TierThresholds,
}

impl DataStore {
    /// Create a store retaining up to `capacity` snapshots (at least one).
    pub fn new(capacity: usize) -> Self {
        Self::with_thresholds(capacity, TierThresholds::default())
    }

    /// Create a store with custom market-cap tier thresholds.
    pub fn with_thresholds(capacity: usize, thresholds: TierThresholds) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: RwLock::new(StoreInner {
                latest: None,
                history: VecDeque::with_capacity(capacity),
            }),
            capacity,
            thresholds,
        }
    }

    // The write section only moves `Arc`s, so a poisoned lock still guards a whole value.
    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Maximum number of retained snapshots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tier thresholds used by [`DataStore::by_tier`].
    pub fn thresholds(&self) -> TierThresholds {
        self.thresholds
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Install `snapshot` as the latest and append it to history.
    ///
    /// Validation runs before the lock is taken; a rejected snapshot leaves the
    /// store untouched.
    pub fn commit(&self, snapshot: Snapshot) -> Result<Arc<Snapshot>, ValidationError> {
        snapshot.validate()?;

        let snapshot = Arc::new(snapshot);
        let evicted = {
            let mut inner = self.write();
            inner.history.push_back(Arc::clone(&snapshot));
            inner.latest = Some(Arc::clone(&snapshot));

            let mut evicted = 0;
            while inner.history.len() > self.capacity {
                inner.history.pop_front();
                evicted += 1;
            }
            evicted
        };

        debug!(
            scan_id = %snapshot.id,
            records = snapshot.len(),
            evicted,
            "Committed snapshot"
        );

        Ok(snapshot)
    }

    /// Drop the latest snapshot and all history.
    pub fn clear(&self) {
        let mut inner = self.write();
        inner.latest = None;
        inner.history.clear();
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// The most recently committed snapshot, or `None` before the first scan.
    pub fn get_latest(&self) -> Option<Arc<Snapshot>> {
        self.read().latest.clone()
    }

    /// Up to `limit` most recent snapshots, oldest first; `None` returns all retained.
    pub fn get_history(&self, limit: Option<usize>) -> Vec<Arc<Snapshot>> {
        let inner = self.read();
        let take = limit.unwrap_or(inner.history.len()).min(inner.history.len());
        inner
            .history
            .iter()
            .skip(inner.history.len() - take)
            .cloned()
            .collect()
    }

    /// Summaries of the retained history, oldest first.
    pub fn history_summaries(&self, limit: Option<usize>) -> Vec<ScanSummary> {
        self.get_history(limit)
            .iter()
            .map(|snapshot| snapshot.summary())
            .collect()
    }

    /// Number of retained snapshots.
    pub fn len(&self) -> usize {
        self.read().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().history.is_empty()
    }

    /// Records of the latest snapshot matching `predicate`, in snapshot order.
    pub fn get_filtered<F>(&self, predicate: F) -> Vec<Record>
    where
        F: Fn(&Record) -> bool,
    {
        match self.get_latest() {
            Some(snapshot) => snapshot
                .records
                .iter()
                .filter(|record| predicate(record))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Records whose sector equals `sector` exactly.
    pub fn by_sector(&self, sector: &str) -> Vec<Record> {
        self.get_filtered(|r| r.sector.as_deref() == Some(sector))
    }

    /// Records whose market cap lies in `[min, max]`; records without one never match.
    pub fn by_market_cap(&self, min: Option<f64>, max: Option<f64>) -> Vec<Record> {
        let range = Range::new(min, max);
        self.get_filtered(|r| r.market_cap.is_some_and(|cap| range.contains(cap)))
    }

    /// Records in the given market-cap tier.
    pub fn by_tier(&self, tier: MarketCapTier) -> Vec<Record> {
        let thresholds = self.thresholds;
        self.get_filtered(|r| r.tier(&thresholds) == Some(tier))
    }

    /// Records whose price lies in `[min, max]`.
    pub fn by_price(&self, min: Option<f64>, max: Option<f64>) -> Vec<Record> {
        let range = Range::new(min, max);
        self.get_filtered(|r| r.price.is_some_and(|p| range.contains(p)))
    }

    /// Records matching every criterion set on `filter`.
    pub fn query(&self, filter: &RecordFilter) -> Vec<Record> {
        let thresholds = self.thresholds;
        self.get_filtered(|r| filter.matches(r, &thresholds))
    }

    /// Movement statistics over the latest snapshot, zeroed when there is none.
    pub fn statistics(&self) -> ScanStatistics {
        self.get_latest()
            .map(|snapshot| snapshot.statistics())
            .unwrap_or_default()
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Inclusive numeric range with optional ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Range {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

/// Combined criteria for [`DataStore::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub market_cap: Option<Range>,
    #[serde(default)]
    pub tier: Option<MarketCapTier>,
    #[serde(default)]
    pub price: Option<Range>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sector(mut self, sector: impl Into<String>) -> Self {
        self.sector = Some(sector.into());
        self
    }

    pub fn market_cap(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.market_cap = Some(Range::new(min, max));
        self
    }

    pub fn tier(mut self, tier: MarketCapTier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn price(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.price = Some(Range::new(min, max));
        self
    }

    /// Whether `record` satisfies every set criterion.
    pub fn matches(&self, record: &Record, thresholds: &TierThresholds) -> bool {
        if let Some(sector) = &self.sector {
            if record.sector.as_deref() != Some(sector.as_str()) {
                return false;
            }
        }
        if let Some(range) = &self.market_cap {
            if !record.market_cap.is_some_and(|cap| range.contains(cap)) {
                return false;
            }
        }
        if let Some(tier) = self.tier {
            if record.tier(thresholds) != Some(tier) {
                return false;
            }
        }
        if let Some(range) = &self.price {
            if !record.price.is_some_and(|p| range.contains(p)) {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SourceStatus;

    fn rec(symbol: &str, sector: &str, cap: f64) -> Record {
        Record::new(symbol).with_sector(sector).with_market_cap(cap)
    }

    fn snap(records: Vec<Record>) -> Snapshot {
        Snapshot::new(records, SourceStatus::Ok)
    }

    fn symbols(records: &[Record]) -> Vec<&str> {
        records.iter().map(|r| r.symbol.as_str()).collect()
    }

    fn banking_fixture() -> DataStore {
        let store = DataStore::default();
        store
            .commit(snap(vec![
                rec("A", "Banking", 100.0),
                rec("B", "IT", 50.0),
                rec("C", "Banking", 200.0),
            ]))
            .unwrap();
        store
    }

    #[test]
    fn test_empty_store() {
        let store = DataStore::default();
        assert!(store.get_latest().is_none());
        assert!(store.get_history(None).is_empty());
        assert!(store.by_sector("Banking").is_empty());
        assert_eq!(store.statistics(), ScanStatistics::default());
        assert!(store.is_empty());
    }

    #[test]
    fn test_commit_sets_latest_and_history() {
        let store = DataStore::default();
        let committed = store.commit(snap(vec![Record::new("A")])).unwrap();

        let latest = store.get_latest().unwrap();
        assert!(Arc::ptr_eq(&latest, &committed));

        let history = store.get_history(None);
        assert_eq!(history.len(), 1);
        assert!(Arc::ptr_eq(history.last().unwrap(), &latest));
    }

    #[test]
    fn test_by_sector_preserves_order() {
        let store = banking_fixture();
        assert_eq!(symbols(&store.by_sector("Banking")), vec!["A", "C"]);
        assert!(store.by_sector("Pharma").is_empty());
    }

    #[test]
    fn test_sector_absent_never_matches_empty_label() {
        let store = DataStore::default();
        store
            .commit(snap(vec![Record::new("A"), rec("B", "IT", 1.0)]))
            .unwrap();
        assert!(store.by_sector("").is_empty());
    }

    #[test]
    fn test_by_market_cap_inclusive() {
        let store = banking_fixture();
        assert_eq!(
            symbols(&store.by_market_cap(Some(50.0), Some(100.0))),
            vec!["A", "B"]
        );
        assert_eq!(symbols(&store.by_market_cap(Some(150.0), None)), vec!["C"]);
        assert_eq!(store.by_market_cap(None, None).len(), 3);
    }

    #[test]
    fn test_rejected_commit_leaves_store_unchanged() {
        let store = banking_fixture();
        let before = store.get_latest().unwrap();

        let err = store
            .commit(snap(vec![Record::new("X"), Record::new("X")]))
            .unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateSymbol { .. }));

        assert!(Arc::ptr_eq(&store.get_latest().unwrap(), &before));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_negative_market_cap_never_committed() {
        let store = banking_fixture();
        let before = store.get_latest().unwrap();

        let mut bad = Record::new("X").with_sector("Banking");
        bad.market_cap = Some(-500.0);
        let err = store.commit(snap(vec![bad])).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidMarketCap { .. }));

        assert!(Arc::ptr_eq(&store.get_latest().unwrap(), &before));
        assert!(store.by_tier(MarketCapTier::Small).iter().all(|r| r.symbol != "X"));
    }

    #[test]
    fn test_history_evicts_oldest_first() {
        let store = DataStore::new(3);
        let ids: Vec<String> = (0..5)
            .map(|i| {
                store
                    .commit(snap(vec![Record::new(format!("S{i}"))]))
                    .unwrap()
                    .id
                    .clone()
            })
            .collect();

        let history = store.get_history(None);
        assert_eq!(history.len(), 3);
        let kept: Vec<&str> = history.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(kept, vec![ids[2].as_str(), ids[3].as_str(), ids[4].as_str()]);
    }

    #[test]
    fn test_history_limit_returns_newest_last() {
        let store = DataStore::default();
        for i in 0..4 {
            store.commit(snap(vec![Record::new(format!("S{i}"))])).unwrap();
        }

        let recent = store.get_history(Some(2));
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].records[0].symbol, "S2");
        assert_eq!(recent[1].records[0].symbol, "S3");

        assert_eq!(store.get_history(Some(10)).len(), 4);
        assert!(store.get_history(Some(0)).is_empty());
    }

    #[test]
    fn test_returned_history_is_detached() {
        let store = DataStore::new(2);
        store.commit(snap(vec![Record::new("A")])).unwrap();
        let earlier = store.get_history(None);

        store.commit(snap(vec![Record::new("B")])).unwrap();
        store.commit(snap(vec![Record::new("C")])).unwrap();

        assert_eq!(earlier.len(), 1);
        assert_eq!(earlier[0].records[0].symbol, "A");
    }

    #[test]
    fn test_query_combines_criteria() {
        let store = DataStore::default();
        store
            .commit(snap(vec![
                rec("HDFCBANK", "Banking", 90_000.0).with_price(1_500.0),
                rec("SMALLBANK", "Banking", 1_000.0).with_price(40.0),
                rec("TCS", "IT", 120_000.0).with_price(3_400.0),
                rec("MIDBANK", "Banking", 8_000.0).with_price(600.0),
            ]))
            .unwrap();

        let filter = RecordFilter::new().sector("Banking").price(Some(100.0), None);
        assert_eq!(symbols(&store.query(&filter)), vec!["HDFCBANK", "MIDBANK"]);

        let filter = RecordFilter::new().tier(MarketCapTier::Large);
        assert_eq!(symbols(&store.query(&filter)), vec!["HDFCBANK", "TCS"]);

        assert_eq!(symbols(&store.by_tier(MarketCapTier::Mid)), vec!["MIDBANK"]);
        assert_eq!(
            symbols(&store.by_price(Some(0.0), Some(1_000.0))),
            vec!["SMALLBANK", "MIDBANK"]
        );
        assert_eq!(store.query(&RecordFilter::new()).len(), 4);
    }

    #[test]
    fn test_clear() {
        let store = banking_fixture();
        store.clear();
        assert!(store.get_latest().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_capacity_floor() {
        assert_eq!(DataStore::new(0).capacity(), 1);
    }
}
