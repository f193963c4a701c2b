//! Simulated NSE instrument universe.
//!
//! Produces realistic-looking quotes for a fixed list of symbols so the
//! screener can run end to end without an upstream feed.

use async_trait::async_trait;
use rand::Rng;

use super::{FetchError, ScanFetcher};
use crate::data::{Record, Snapshot, SourceStatus};

/// (symbol, name, sector, market cap in crore INR)
const UNIVERSE: &[(&str, &str, &str, f64)] = &[
    ("RELIANCE", "Reliance Industries Ltd", "Energy", 1_950_000.0),
    ("TCS", "Tata Consultancy Services", "IT", 1_400_000.0),
    ("HDFCBANK", "HDFC Bank Ltd", "Banking", 1_250_000.0),
    ("INFY", "Infosys Ltd", "IT", 620_000.0),
    ("HINDUNILVR", "Hindustan Unilever Ltd", "FMCG", 560_000.0),
    ("ICICIBANK", "ICICI Bank Ltd", "Banking", 780_000.0),
    ("KOTAKBANK", "Kotak Mahindra Bank", "Banking", 350_000.0),
    ("BAJFINANCE", "Bajaj Finance Ltd", "Banking", 430_000.0),
    ("MARUTI", "Maruti Suzuki India Ltd", "Auto", 380_000.0),
    ("SUNPHARMA", "Sun Pharmaceutical Industries", "Pharma", 400_000.0),
    ("WIPRO", "Wipro Ltd", "IT", 250_000.0),
    ("TECHM", "Tech Mahindra Ltd", "IT", 130_000.0),
    ("HCLTECH", "HCL Technologies Ltd", "IT", 420_000.0),
    ("DRREDDY", "Dr Reddys Laboratories", "Pharma", 100_000.0),
    ("CIPLA", "Cipla Ltd", "Pharma", 120_000.0),
    ("TATAMOTORS", "Tata Motors Ltd", "Auto", 330_000.0),
    ("NESTLEIND", "Nestle India Ltd", "FMCG", 230_000.0),
    ("ASIANPAINT", "Asian Paints Ltd", "FMCG", 280_000.0),
    ("CESC", "CESC Ltd", "Energy", 18_000.0),
    ("SONATSOFTW", "Sonata Software Ltd", "IT", 9_000.0),
    ("KARURVYSYA", "Karur Vysya Bank Ltd", "Banking", 16_000.0),
    ("JAMNAAUTO", "Jamna Auto Industries", "Auto", 4_500.0),
    ("SHILPAMED", "Shilpa Medicare Ltd", "Pharma", 3_800.0),
    ("BAJAJCON", "Bajaj Consumer Care", "FMCG", 2_900.0),
];

/// Fetcher that fabricates a fresh quote for every symbol on each call.
#[derive(Debug, Default, Clone)]
pub struct SampleFetcher;

impl SampleFetcher {
    pub fn new() -> Self {
        Self
    }

    /// Number of instruments in each generated snapshot.
    pub fn universe_size(&self) -> usize {
        UNIVERSE.len()
    }

    fn generate(&self) -> Vec<Record> {
        let mut rng = rand::thread_rng();

        UNIVERSE
            .iter()
            .map(|&(symbol, name, sector, market_cap)| {
                let price: f64 = rng.gen_range(100.0..3000.0);
                let change: f64 = rng.gen_range(-5.0..5.0);

                Record::new(symbol)
                    .with_name(name)
                    .with_sector(sector)
                    .with_market_cap(market_cap)
                    .with_price((price * 100.0).round() / 100.0)
                    .with_change_percent((change * 100.0).round() / 100.0)
                    .with_volume(rng.gen_range(100_000..10_000_000))
                    .with_extra("exchange", serde_json::json!("NSE"))
            })
            .collect()
    }
}

#[async_trait]
impl ScanFetcher for SampleFetcher {
    fn name(&self) -> &'static str {
        "sample"
    }

    async fn fetch(&self) -> Result<Snapshot, FetchError> {
        Ok(Snapshot::new(self.generate(), SourceStatus::Ok))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sample_snapshot_is_valid() {
        let fetcher = SampleFetcher::new();
        let snapshot = fetcher.fetch().await.unwrap();

        assert_eq!(snapshot.len(), fetcher.universe_size());
        assert_eq!(snapshot.source_status, SourceStatus::Ok);
        assert!(snapshot.validate().is_ok());

        for record in &snapshot.records {
            let price = record.price.unwrap();
            let change = record.change_percent.unwrap();
            assert!((100.0..=3000.0).contains(&price));
            assert!((-5.0..=5.0).contains(&change));
            assert!(record.sector.is_some());
        }
    }

    #[tokio::test]
    async fn test_each_call_is_a_new_snapshot() {
        let fetcher = SampleFetcher::new();
        let a = fetcher.fetch().await.unwrap();
        let b = fetcher.fetch().await.unwrap();
        assert_ne!(a.id, b.id);
    }
}
