//! Market-data source trait, snapshot type, and extraction errors.
//!
//! The `MarketDataSource` trait abstracts over where a snapshot comes from
//! (the CoinGecko API in production, fixtures in tests) so the orchestrator
//! can be exercised without network access.

use crate::domain::RawAssetRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured error types for the extract stage.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Transport failure or a non-success response status.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The response could not be parsed into raw asset records.
    #[error("source schema error: {0}")]
    SourceSchema(String),
}

impl ExtractError {
    /// Whether retrying the whole extract stage could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SourceUnavailable(_))
    }
}

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotSource {
    CoinGecko,
    Fixture,
}

/// One point-in-time, market-cap-ordered collection of raw asset records.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub records: Vec<RawAssetRecord>,
    pub fetched_at: DateTime<Utc>,
    pub source: SnapshotSource,
}

impl Snapshot {
    pub fn new(records: Vec<RawAssetRecord>, source: SnapshotSource) -> Self {
        Self {
            records,
            fetched_at: Utc::now(),
            source,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// BLAKE3 hash over the serialized records, used to fingerprint runs
    /// and checkpoint files.
    pub fn content_hash(&self) -> String {
        content_hash(&self.records)
    }
}

/// BLAKE3 hex digest over the JSON serialization of `rows`.
pub fn content_hash<T: Serialize>(rows: &[T]) -> String {
    // Serializing plain records into a Vec cannot fail; an empty payload
    // still hashes deterministically.
    let bytes = serde_json::to_vec(rows).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

/// Trait for market-data sources.
///
/// A source returns one snapshot per call with a fixed query; retries are
/// the orchestrator's concern, not the source's.
pub trait MarketDataSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Fetch the current top-N snapshot.
    fn fetch_snapshot(&self) -> Result<Snapshot, ExtractError>;
}
