//! Projection, completeness filter, and timestamp normalization.

use crate::domain::RawAssetRecord;
use chrono::{DateTime, NaiveDateTime, Utc};

/// A raw record with all nine core fields present and a parsed timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct CompleteRecord {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub current_price: f64,
    pub market_cap: f64,
    pub total_volume: f64,
    pub price_change_percentage_24h: f64,
    pub last_updated: DateTime<Utc>,
    pub ath: f64,
}

/// Why a record did not survive cleaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// A core field was absent, null, or NaN.
    Incomplete,
    /// `last_updated` was present but not a recognizable timestamp.
    BadTimestamp,
}

/// A numeric field counts as missing when absent or NaN.
fn present(v: Option<f64>) -> Option<f64> {
    v.filter(|x| !x.is_nan())
}

/// Project a raw record onto the nine core fields and apply the completeness
/// filter and timestamp normalization. Extra source fields are ignored.
pub fn clean(raw: &RawAssetRecord) -> Result<CompleteRecord, DropReason> {
    let (
        Some(id),
        Some(symbol),
        Some(name),
        Some(current_price),
        Some(market_cap),
        Some(total_volume),
        Some(price_change_percentage_24h),
        Some(last_updated),
        Some(ath),
    ) = (
        raw.id.as_ref(),
        raw.symbol.as_ref(),
        raw.name.as_ref(),
        present(raw.current_price),
        present(raw.market_cap),
        present(raw.total_volume),
        present(raw.price_change_percentage_24h),
        raw.last_updated.as_deref(),
        present(raw.ath),
    )
    else {
        return Err(DropReason::Incomplete);
    };

    let last_updated = parse_timestamp(last_updated).ok_or(DropReason::BadTimestamp)?;

    Ok(CompleteRecord {
        id: id.clone(),
        symbol: symbol.clone(),
        name: name.clone(),
        current_price,
        market_cap,
        total_volume,
        price_change_percentage_24h,
        last_updated,
        ath,
    })
}

/// Naive layouts, interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a `last_updated` value into a UTC timestamp.
///
/// Accepts RFC 3339 (`2024-01-01T00:00:00.000Z`), the space-separated offset
/// form CSV tools tend to write (`2024-01-01 00:00:00+00:00`), and naive
/// date-times which are taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}
