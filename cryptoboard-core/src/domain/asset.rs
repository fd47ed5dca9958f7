//! Raw and enriched per-asset records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One asset row as returned by the market-data source.
///
/// Every core field is optional: the source may omit or null any of them,
/// and the completeness filter decides what survives. Fields the source
/// sends beyond the nine core ones are kept in `extra` so the raw checkpoint
/// can persist the full row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAssetRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub total_volume: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_24h: Option<f64>,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub ath: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Names of the nine core fields, in projection order.
pub const RAW_COLUMNS: [&str; 9] = [
    "id",
    "symbol",
    "name",
    "current_price",
    "market_cap",
    "total_volume",
    "price_change_percentage_24h",
    "last_updated",
    "ath",
];

/// Market-cap bucket. Boundaries are right-closed: (0, 1e9], (1e9, 1e10], (1e10, 1e13].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapCategory {
    #[serde(rename = "Small Cap")]
    SmallCap,
    #[serde(rename = "Mid Cap")]
    MidCap,
    #[serde(rename = "Large Cap")]
    LargeCap,
}

impl CapCategory {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SmallCap => "Small Cap",
            Self::MidCap => "Mid Cap",
            Self::LargeCap => "Large Cap",
        }
    }
}

/// Sign of the 24-hour percent price change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeDirection {
    #[serde(rename = "up")]
    Up,
    #[serde(rename = "down")]
    Down,
    #[serde(rename = "no change")]
    NoChange,
}

impl ChangeDirection {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::NoChange => "no change",
        }
    }
}

/// Distance of the current price from the all-time high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AthStatus {
    #[serde(rename = "near ATH")]
    NearAth,
    #[serde(rename = "far from ATH")]
    FarFromAth,
    #[serde(rename = "moderate")]
    Moderate,
}

impl AthStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NearAth => "near ATH",
            Self::FarFromAth => "far from ATH",
            Self::Moderate => "moderate",
        }
    }
}

macro_rules! display_via_label {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        })*
    };
}

display_via_label!(CapCategory, ChangeDirection, AthStatus);

/// Analysis-ready asset row: the nine core fields plus six derived ones.
///
/// `ath_gap_pct` and `vol_to_market_cap` are `None` when their denominator
/// (`ath` and `market_cap` respectively) is zero. A `None` gap leaves
/// `ath_status` unclassified; `cap_category` is `None` for a market cap of
/// zero or one beyond the top bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedAssetRecord {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub current_price: f64,
    pub market_cap: f64,
    pub total_volume: f64,
    pub price_change_percentage_24h: f64,
    pub last_updated: DateTime<Utc>,
    pub ath: f64,
    pub ath_diff: f64,
    pub ath_gap_pct: Option<f64>,
    pub vol_to_market_cap: Option<f64>,
    pub cap_category: Option<CapCategory>,
    pub change_direction: ChangeDirection,
    pub ath_status: Option<AthStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_record_keeps_unknown_fields_in_extra() {
        let json = r#"{
            "id": "bitcoin",
            "symbol": "btc",
            "name": "Bitcoin",
            "image": "https://example.invalid/btc.png",
            "current_price": 63000,
            "market_cap": 1200000000000,
            "total_volume": 30000000000,
            "price_change_percentage_24h": 2.5,
            "last_updated": "2024-01-01T00:00:00.000Z",
            "ath": 70000,
            "roi": null
        }"#;
        let rec: RawAssetRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.id.as_deref(), Some("bitcoin"));
        assert_eq!(rec.current_price, Some(63000.0));
        assert_eq!(rec.extra.len(), 2);
        assert!(rec.extra.contains_key("image"));
        assert!(rec.extra.contains_key("roi"));
    }

    #[test]
    fn raw_record_tolerates_missing_and_null_fields() {
        let rec: RawAssetRecord =
            serde_json::from_str(r#"{"id": "x", "market_cap": null}"#).unwrap();
        assert_eq!(rec.id.as_deref(), Some("x"));
        assert_eq!(rec.market_cap, None);
        assert_eq!(rec.ath, None);
    }

    #[test]
    fn labels_serialize_as_display_strings() {
        assert_eq!(
            serde_json::to_string(&CapCategory::LargeCap).unwrap(),
            "\"Large Cap\""
        );
        assert_eq!(
            serde_json::to_string(&ChangeDirection::NoChange).unwrap(),
            "\"no change\""
        );
        assert_eq!(AthStatus::FarFromAth.to_string(), "far from ATH");
    }
}
