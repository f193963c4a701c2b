//! Generic HTTP source returning a JSON list of records.
//!
//! The endpoint may answer with either a bare array or an object carrying the
//! array under `records`:
//!
//! ```json
//! [{ "symbol": "TCS", "sector": "IT", "market_cap": 1400000.0, "price": 3890.5 }]
//! { "records": [ ... ] }
//! ```
//!
//! Rows that do not deserialize into a [`Record`] are dropped and the snapshot
//! is marked [`SourceStatus::Partial`].

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::{FetchError, ScanFetcher};
use crate::data::{Record, Snapshot, SourceStatus};

/// Fetcher backed by a single HTTP GET endpoint.
pub struct HttpFetcher {
    url: String,
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher for `url` with the given request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            url: url.into(),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Turn a decoded response body into a snapshot.
pub(crate) fn parse_body(body: Value) -> Result<Snapshot, FetchError> {
    let rows = match body {
        Value::Array(rows) => rows,
        Value::Object(mut map) => match map.remove("records") {
            Some(Value::Array(rows)) => rows,
            _ => {
                return Err(FetchError::Parse(
                    "expected an array or an object with a `records` array".into(),
                ))
            }
        },
        other => {
            return Err(FetchError::Parse(format!(
                "expected an array of records, got {}",
                json_kind(&other)
            )))
        }
    };

    let total = rows.len();
    let mut records = Vec::with_capacity(total);
    let mut dropped = 0usize;

    for (index, row) in rows.into_iter().enumerate() {
        match serde_json::from_value::<Record>(row) {
            Ok(record) if !record.symbol.trim().is_empty() => records.push(record),
            Ok(_) => {
                dropped += 1;
                debug!(index, "Dropping row with empty symbol");
            }
            Err(e) => {
                dropped += 1;
                debug!(index, error = %e, "Dropping unparseable row");
            }
        }
    }

    if total > 0 && records.is_empty() {
        return Err(FetchError::Parse(format!(
            "none of {} rows could be parsed",
            total
        )));
    }

    let status = if dropped > 0 {
        warn!(dropped, total, "Upstream rows dropped during parsing");
        SourceStatus::Partial
    } else {
        SourceStatus::Ok
    };

    Ok(Snapshot::new(records, status))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl ScanFetcher for HttpFetcher {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self) -> Result<Snapshot, FetchError> {
        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(FetchError::Unavailable(format!("{} returned 503", self.url)));
        }

        let body: Value = response.error_for_status()?.json().await?;
        parse_body(body)
    }
}
