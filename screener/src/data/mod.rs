//! Scan data model and the in-memory snapshot store.
//!
//! # Architecture
//!
//! ```text
//! ScanScheduler ──commit──▶ DataStore ◀──get_latest / get_history / query── readers
//!                              │
//!                    latest + history (≤ capacity)
//! ```

pub mod store;
pub mod types;

pub use store::{DataStore, Range, RecordFilter, DEFAULT_HISTORY_CAPACITY};
pub use types::{
    MarketCapTier, Record, ScanStatistics, ScanSummary, Snapshot, SourceStatus, TierThresholds,
    ValidationError,
};
