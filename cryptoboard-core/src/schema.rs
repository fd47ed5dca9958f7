//! Enriched table schema contract.
//!
//! One column list drives the Polars schema of the enriched DataFrame, the
//! Parquet checkpoint, and the warehouse table definition, so the three can
//! never drift apart.

use crate::domain::EnrichedAssetRecord;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Logical column types of the enriched table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaType {
    String,
    Float64,
    /// UTC timestamp, millisecond precision.
    Timestamp,
}

impl SchemaType {
    pub fn polars_dtype(&self) -> DataType {
        match self {
            Self::String => DataType::String,
            Self::Float64 => DataType::Float64,
            Self::Timestamp => DataType::Datetime(TimeUnit::Milliseconds, None),
        }
    }

    /// BigQuery standard SQL type name.
    pub fn warehouse_type(&self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::Float64 => "FLOAT64",
            Self::Timestamp => "TIMESTAMP",
        }
    }
}

/// A single column in the enriched table.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaField {
    pub name: &'static str,
    pub dtype: SchemaType,
    pub nullable: bool,
}

const fn field(name: &'static str, dtype: SchemaType, nullable: bool) -> SchemaField {
    SchemaField {
        name,
        dtype,
        nullable,
    }
}

/// The enriched table, in column order.
pub const ENRICHED_COLUMNS: &[SchemaField] = &[
    field("id", SchemaType::String, false),
    field("symbol", SchemaType::String, false),
    field("name", SchemaType::String, false),
    field("current_price", SchemaType::Float64, false),
    field("market_cap", SchemaType::Float64, false),
    field("total_volume", SchemaType::Float64, false),
    field("price_change_percentage_24h", SchemaType::Float64, false),
    field("last_updated", SchemaType::Timestamp, false),
    field("ath", SchemaType::Float64, false),
    field("ath_diff", SchemaType::Float64, false),
    field("ath_gap_pct", SchemaType::Float64, true),
    field("vol_to_market_cap", SchemaType::Float64, true),
    field("cap_category", SchemaType::String, true),
    field("change_direction", SchemaType::String, false),
    field("ath_status", SchemaType::String, true),
];

/// Polars schema of the enriched table.
pub fn enriched_schema() -> Schema {
    Schema::from_iter(
        ENRICHED_COLUMNS
            .iter()
            .map(|f| Field::new(f.name.into(), f.dtype.polars_dtype())),
    )
}

/// Build the enriched DataFrame from typed records, preserving row order.
pub fn records_to_dataframe(records: &[EnrichedAssetRecord]) -> PolarsResult<DataFrame> {
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    let symbols: Vec<&str> = records.iter().map(|r| r.symbol.as_str()).collect();
    let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
    let prices: Vec<f64> = records.iter().map(|r| r.current_price).collect();
    let caps: Vec<f64> = records.iter().map(|r| r.market_cap).collect();
    let volumes: Vec<f64> = records.iter().map(|r| r.total_volume).collect();
    let changes: Vec<f64> = records
        .iter()
        .map(|r| r.price_change_percentage_24h)
        .collect();
    let updated: Vec<i64> = records
        .iter()
        .map(|r| r.last_updated.timestamp_millis())
        .collect();
    let aths: Vec<f64> = records.iter().map(|r| r.ath).collect();
    let ath_diffs: Vec<f64> = records.iter().map(|r| r.ath_diff).collect();
    let gaps: Vec<Option<f64>> = records.iter().map(|r| r.ath_gap_pct).collect();
    let ratios: Vec<Option<f64>> = records.iter().map(|r| r.vol_to_market_cap).collect();
    let categories: Vec<Option<&str>> = records
        .iter()
        .map(|r| r.cap_category.map(|c| c.label()))
        .collect();
    let directions: Vec<&str> = records.iter().map(|r| r.change_direction.label()).collect();
    let statuses: Vec<Option<&str>> = records
        .iter()
        .map(|r| r.ath_status.map(|s| s.label()))
        .collect();

    DataFrame::new(vec![
        Column::new("id".into(), ids),
        Column::new("symbol".into(), symbols),
        Column::new("name".into(), names),
        Column::new("current_price".into(), prices),
        Column::new("market_cap".into(), caps),
        Column::new("total_volume".into(), volumes),
        Column::new("price_change_percentage_24h".into(), changes),
        Column::new("last_updated".into(), updated)
            .cast(&SchemaType::Timestamp.polars_dtype())?,
        Column::new("ath".into(), aths),
        Column::new("ath_diff".into(), ath_diffs),
        Column::new("ath_gap_pct".into(), gaps),
        Column::new("vol_to_market_cap".into(), ratios),
        Column::new("cap_category".into(), categories),
        Column::new("change_direction".into(), directions),
        Column::new("ath_status".into(), statuses),
    ])
}

/// Validate a DataFrame against the enriched schema: every column present
/// with the expected dtype.
pub fn validate_enriched(df: &DataFrame) -> Result<(), SchemaError> {
    let actual = df.schema();
    for expected in ENRICHED_COLUMNS {
        let dtype = actual
            .get(expected.name)
            .ok_or_else(|| SchemaError::MissingColumn(expected.name.to_string()))?;
        let want = expected.dtype.polars_dtype();
        if *dtype != want {
            return Err(SchemaError::TypeMismatch {
                column: expected.name.to_string(),
                expected: want,
                actual: dtype.clone(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("missing required column: {0}")]
    MissingColumn(String),

    #[error("type mismatch in column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },
}
