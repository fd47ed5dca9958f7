//! Cryptoboard Core — asset records, extraction, enrichment, and checkpoints.
//!
//! This crate holds everything that does not talk to the warehouse:
//! - Raw and enriched asset record types
//! - The `MarketDataSource` trait and the CoinGecko provider
//! - The pure enrichment pipeline (projection, completeness filter,
//!   timestamp normalization, derived fields, categorical labels)
//! - Polars schema for the enriched table
//! - Optional CSV / Parquet checkpoints with metadata sidecars

pub mod data;
pub mod domain;
pub mod enrich;
pub mod schema;

#[cfg(test)]
mod tests {
    use super::*;

    /// Records cross stage boundaries by value, so they must be Send + Sync.
    #[test]
    fn records_are_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::RawAssetRecord>();
        require_sync::<domain::RawAssetRecord>();
        require_send::<domain::EnrichedAssetRecord>();
        require_sync::<domain::EnrichedAssetRecord>();
        require_send::<data::Snapshot>();
        require_sync::<data::Snapshot>();
        require_send::<enrich::EnrichReport>();
        require_sync::<enrich::EnrichReport>();
    }

    /// The extractor is used through a trait object by the orchestrator.
    #[test]
    fn market_data_source_is_object_safe() {
        fn _check(source: &dyn data::MarketDataSource) -> Result<data::Snapshot, data::ExtractError> {
            source.fetch_snapshot()
        }
    }
}
