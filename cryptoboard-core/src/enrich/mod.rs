//! Enrichment: raw snapshot in, analysis-ready records out.
//!
//! Steps, in order, per record:
//! 1. Projection onto the nine core fields (extra source fields are ignored)
//! 2. Completeness filter (any missing core field drops the row)
//! 3. Timestamp normalization (an unparseable `last_updated` drops the row)
//! 4. Derived fields (`ath_diff`, `ath_gap_pct`, `vol_to_market_cap`)
//! 5. Categorical labels (`cap_category`, `change_direction`, `ath_status`)
//!
//! The whole stage is a pure function of its input. Rows are dropped, never
//! reordered, and never added. Zero denominators yield `None` for the ratio
//! and leave the dependent label unclassified; the row itself is kept.

pub mod clean;
pub mod derive;

use crate::domain::{EnrichedAssetRecord, RawAssetRecord, RAW_COLUMNS};
use clean::DropReason;
use polars::prelude::{DataFrame, DataType, PolarsError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

pub use clean::{clean, parse_timestamp, CompleteRecord};
pub use derive::derive;

/// Fatal enrichment failures. Per-row problems are never errors.
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("malformed enrichment input: {0}")]
    Input(String),
}

/// Row accounting for one enrichment pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichReport {
    pub input_rows: usize,
    pub output_rows: usize,
    pub dropped_incomplete: usize,
    pub dropped_bad_timestamp: usize,
    pub undefined_ath_gap: usize,
    pub undefined_volume_ratio: usize,
    pub unclassified_cap: usize,
}

impl EnrichReport {
    pub fn dropped(&self) -> usize {
        self.dropped_incomplete + self.dropped_bad_timestamp
    }
}

/// Enrich a snapshot, discarding the row report.
pub fn enrich(raw: &[RawAssetRecord]) -> Result<Vec<EnrichedAssetRecord>, EnrichError> {
    enrich_with_report(raw).map(|(records, _)| records)
}

/// Enrich a snapshot and account for every dropped or partially classified row.
///
/// Fails only when the snapshot itself is malformed: two complete rows sharing
/// an identifier. A duplicate that the completeness filter drops is just a
/// dropped row.
pub fn enrich_with_report(
    raw: &[RawAssetRecord],
) -> Result<(Vec<EnrichedAssetRecord>, EnrichReport), EnrichError> {
    let mut report = EnrichReport {
        input_rows: raw.len(),
        ..Default::default()
    };
    let mut out = Vec::with_capacity(raw.len());
    let mut seen = HashSet::with_capacity(raw.len());

    for rec in raw {
        match clean(rec) {
            Ok(complete) => {
                if !seen.insert(complete.id.clone()) {
                    return Err(EnrichError::Input(format!(
                        "identifier '{}' appears more than once in the snapshot",
                        complete.id
                    )));
                }
                let enriched = derive(complete);
                if enriched.ath_gap_pct.is_none() {
                    report.undefined_ath_gap += 1;
                }
                if enriched.vol_to_market_cap.is_none() {
                    report.undefined_volume_ratio += 1;
                }
                if enriched.cap_category.is_none() {
                    report.unclassified_cap += 1;
                }
                out.push(enriched);
            }
            Err(DropReason::Incomplete) => report.dropped_incomplete += 1,
            Err(DropReason::BadTimestamp) => report.dropped_bad_timestamp += 1,
        }
    }

    report.output_rows = out.len();
    Ok((out, report))
}

const STRING_COLUMNS: [&str; 4] = ["id", "symbol", "name", "last_updated"];

/// Read raw records out of a DataFrame-shaped snapshot (e.g. a raw CSV
/// checkpoint). Columns beyond the nine core ones are ignored; a missing core
/// column or one that cannot be cast to its expected type is fatal.
pub fn records_from_frame(df: &DataFrame) -> Result<Vec<RawAssetRecord>, EnrichError> {
    let n = df.height();
    let mut records = vec![RawAssetRecord::default(); n];

    for name in RAW_COLUMNS {
        let column = df
            .column(name)
            .map_err(|_| EnrichError::Input(format!("missing column '{name}'")))?;
        let bad_type =
            |e: PolarsError| EnrichError::Input(format!("column '{name}' has unusable type: {e}"));

        if STRING_COLUMNS.contains(&name) {
            let cast = column.cast(&DataType::String).map_err(bad_type)?;
            let values = cast.str().map_err(bad_type)?;
            for (rec, v) in records.iter_mut().zip(values.iter()) {
                let v = v.map(str::to_string);
                match name {
                    "id" => rec.id = v,
                    "symbol" => rec.symbol = v,
                    "name" => rec.name = v,
                    _ => rec.last_updated = v,
                }
            }
        } else {
            let cast = column.cast(&DataType::Float64).map_err(bad_type)?;
            let values = cast.f64().map_err(bad_type)?;
            for (rec, v) in records.iter_mut().zip(values.iter()) {
                match name {
                    "current_price" => rec.current_price = v,
                    "market_cap" => rec.market_cap = v,
                    "total_volume" => rec.total_volume = v,
                    "price_change_percentage_24h" => rec.price_change_percentage_24h = v,
                    _ => rec.ath = v,
                }
            }
        }
    }

    Ok(records)
}

/// DataFrame in, enriched records out.
pub fn enrich_frame(
    df: &DataFrame,
) -> Result<(Vec<EnrichedAssetRecord>, EnrichReport), EnrichError> {
    let raw = records_from_frame(df)?;
    enrich_with_report(&raw)
}
