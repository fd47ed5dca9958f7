//! Extraction and file checkpoints

pub mod checkpoint;
pub mod coingecko;
pub mod provider;

pub use checkpoint::{CheckpointError, CheckpointFormat, CheckpointKind, CheckpointMeta};
pub use coingecko::{CoinGeckoProvider, SourceConfig};
pub use provider::{ExtractError, MarketDataSource, Snapshot, SnapshotSource};
