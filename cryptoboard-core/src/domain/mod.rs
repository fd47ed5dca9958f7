//! Domain types shared by every pipeline stage.

pub mod asset;

pub use asset::{
    AthStatus, CapCategory, ChangeDirection, EnrichedAssetRecord, RawAssetRecord, RAW_COLUMNS,
};
