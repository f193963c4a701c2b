//! Scan data model: records, snapshots and derived summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

// ============================================================================
// Record
// ============================================================================

/// One instrument's observed attributes at scan time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Instrument identifier, unique within a snapshot
    pub symbol: String,
    /// Company name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Sector label; blank labels deserialize as `None`
    #[serde(
        default,
        deserialize_with = "blank_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub sector: Option<String>,
    /// Market capitalization, non-negative; invalid values deserialize as `None`
    #[serde(
        default,
        deserialize_with = "valid_market_cap",
        skip_serializing_if = "Option::is_none"
    )]
    pub market_cap: Option<f64>,
    /// Last traded price
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    /// Day change in percent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<f64>,
    /// Traded volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u64>,
    /// Attributes the screener passes through without interpreting
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

fn is_valid_market_cap(cap: f64) -> bool {
    cap.is_finite() && cap >= 0.0
}

fn valid_market_cap<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.filter(|&cap| is_valid_market_cap(cap)))
}

impl Record {
    /// Create a record carrying only a symbol.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            name: None,
            sector: None,
            market_cap: None,
            price: None,
            change_percent: None,
            volume: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the sector. A blank label clears it instead of becoming a category.
    pub fn with_sector(mut self, sector: impl Into<String>) -> Self {
        let sector = sector.into();
        self.sector = (!sector.trim().is_empty()).then_some(sector);
        self
    }

    /// Set the market cap. Negative or non-finite values are treated as unknown.
    pub fn with_market_cap(mut self, market_cap: f64) -> Self {
        self.market_cap = is_valid_market_cap(market_cap).then_some(market_cap);
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_change_percent(mut self, change_percent: f64) -> Self {
        self.change_percent = Some(change_percent);
        self
    }

    pub fn with_volume(mut self, volume: u64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Market-cap tier under the given thresholds.
    pub fn tier(&self, thresholds: &TierThresholds) -> Option<MarketCapTier> {
        self.market_cap.map(|cap| thresholds.classify(cap))
    }

    fn is_gainer(&self) -> bool {
        self.change_percent.is_some_and(|c| c > 0.0)
    }

    fn is_loser(&self) -> bool {
        self.change_percent.is_some_and(|c| c < 0.0)
    }
}

// ============================================================================
// Market Cap Tier
// ============================================================================

/// Market capitalization bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketCapTier {
    Large,
    Mid,
    Small,
}

impl std::fmt::Display for MarketCapTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Large => write!(f, "Large Cap"),
            Self::Mid => write!(f, "Mid Cap"),
            Self::Small => write!(f, "Small Cap"),
        }
    }
}

/// Lower bounds (inclusive) for the large and mid tiers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub large_min: f64,
    pub mid_min: f64,
}

impl TierThresholds {
    pub fn new(large_min: f64, mid_min: f64) -> Self {
        Self { large_min, mid_min }
    }

    pub fn classify(&self, market_cap: f64) -> MarketCapTier {
        if market_cap >= self.large_min {
            MarketCapTier::Large
        } else if market_cap >= self.mid_min {
            MarketCapTier::Mid
        } else {
            MarketCapTier::Small
        }
    }
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self::new(20_000.0, 5_000.0)
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Outcome of the upstream fetch that produced a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    /// Every upstream row was usable
    Ok,
    /// Some rows were dropped but the scan is usable
    Partial,
    /// The upstream reported failure
    Failed,
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One complete result set from a single scan cycle.
///
/// Snapshots are shared as `Arc<Snapshot>` once committed and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub records: Vec<Record>,
    pub captured_at: DateTime<Utc>,
    pub source_status: SourceStatus,
}

/// A snapshot rejected because it breaks the per-snapshot record rules.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("record at index {index} has an empty symbol")]
    EmptySymbol { index: usize },

    #[error("duplicate symbol in snapshot: {symbol}")]
    DuplicateSymbol { symbol: String },

    #[error("record {symbol} has an invalid market cap: {market_cap}")]
    InvalidMarketCap { symbol: String, market_cap: f64 },
}

impl Snapshot {
    /// Create a snapshot captured now.
    pub fn new(records: Vec<Record>, source_status: SourceStatus) -> Self {
        Self::captured_at(records, source_status, Utc::now())
    }

    /// Create a snapshot with an explicit capture time.
    pub fn captured_at(
        records: Vec<Record>,
        source_status: SourceStatus,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            records,
            captured_at,
            source_status,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look up a record by symbol.
    pub fn get(&self, symbol: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.symbol == symbol)
    }

    /// Check that every symbol is non-empty and unique and that market caps
    /// are non-negative.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut seen = HashSet::with_capacity(self.records.len());

        for (index, record) in self.records.iter().enumerate() {
            if record.symbol.trim().is_empty() {
                return Err(ValidationError::EmptySymbol { index });
            }
            if !seen.insert(record.symbol.as_str()) {
                return Err(ValidationError::DuplicateSymbol {
                    symbol: record.symbol.clone(),
                });
            }
            if let Some(cap) = record.market_cap.filter(|&cap| !is_valid_market_cap(cap)) {
                return Err(ValidationError::InvalidMarketCap {
                    symbol: record.symbol.clone(),
                    market_cap: cap,
                });
            }
        }

        Ok(())
    }

    /// Compact history row for this snapshot.
    pub fn summary(&self) -> ScanSummary {
        ScanSummary {
            id: self.id.clone(),
            captured_at: self.captured_at,
            total: self.records.len(),
            gainers: self.records.iter().filter(|r| r.is_gainer()).count(),
            losers: self.records.iter().filter(|r| r.is_loser()).count(),
            status: self.source_status,
        }
    }

    /// Aggregate movement statistics over the snapshot's records.
    pub fn statistics(&self) -> ScanStatistics {
        let volumes: Vec<u64> = self.records.iter().filter_map(|r| r.volume).collect();
        let avg_volume = if volumes.is_empty() {
            0.0
        } else {
            volumes.iter().map(|&v| v as f64).sum::<f64>() / volumes.len() as f64
        };

        let with_change = || {
            self.records
                .iter()
                .filter_map(|r| r.change_percent.map(|c| (c, r)))
        };
        let top_gainer = with_change()
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, r)| r.clone());
        let top_loser = with_change()
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, r)| r.clone());

        ScanStatistics {
            total: self.records.len(),
            gainers: self.records.iter().filter(|r| r.is_gainer()).count(),
            losers: self.records.iter().filter(|r| r.is_loser()).count(),
            avg_volume,
            top_gainer,
            top_loser,
        }
    }
}

// ============================================================================
// Summaries
// ============================================================================

/// History row describing a committed snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub id: String,
    pub captured_at: DateTime<Utc>,
    pub total: usize,
    pub gainers: usize,
    pub losers: usize,
    pub status: SourceStatus,
}

/// Movement statistics over one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanStatistics {
    pub total: usize,
    pub gainers: usize,
    pub losers: usize,
    pub avg_volume: f64,
    pub top_gainer: Option<Record>,
    pub top_loser: Option<Record>,
}

// ============================================================================
// Tests
// ============================================================================
