//! Derived fields and categorical labels, one pure function per field.

use super::clean::CompleteRecord;
use crate::domain::{AthStatus, CapCategory, ChangeDirection, EnrichedAssetRecord};

/// Upper bound of the Small Cap bucket (inclusive).
pub const SMALL_CAP_MAX: f64 = 1e9;
/// Upper bound of the Mid Cap bucket (inclusive).
pub const MID_CAP_MAX: f64 = 1e10;
/// Upper bound of the Large Cap bucket (inclusive); anything above is unclassified.
pub const LARGE_CAP_MAX: f64 = 1e13;

/// Gap below which an asset is "near ATH" (strict).
pub const NEAR_ATH_PCT: f64 = 10.0;
/// Gap above which an asset is "far from ATH" (strict).
pub const FAR_FROM_ATH_PCT: f64 = 30.0;

pub fn ath_diff(ath: f64, current_price: f64) -> f64 {
    ath - current_price
}

/// Percent gap between the ATH and the current price. `None` when `ath` is zero.
pub fn ath_gap_pct(ath: f64, current_price: f64) -> Option<f64> {
    if ath == 0.0 {
        return None;
    }
    Some((ath - current_price) / ath * 100.0)
}

/// Volume turnover relative to market cap. `None` when `market_cap` is zero.
pub fn vol_to_market_cap(total_volume: f64, market_cap: f64) -> Option<f64> {
    if market_cap == 0.0 {
        return None;
    }
    Some(total_volume / market_cap)
}

/// Right-closed buckets over (0, 1e13]. Zero, negative, and out-of-range caps
/// are unclassified.
pub fn cap_category(market_cap: f64) -> Option<CapCategory> {
    if market_cap <= 0.0 || market_cap > LARGE_CAP_MAX {
        None
    } else if market_cap <= SMALL_CAP_MAX {
        Some(CapCategory::SmallCap)
    } else if market_cap <= MID_CAP_MAX {
        Some(CapCategory::MidCap)
    } else {
        Some(CapCategory::LargeCap)
    }
}

pub fn change_direction(price_change_pct_24h: f64) -> ChangeDirection {
    if price_change_pct_24h > 0.0 {
        ChangeDirection::Up
    } else if price_change_pct_24h < 0.0 {
        ChangeDirection::Down
    } else {
        ChangeDirection::NoChange
    }
}

/// Thresholds are strict on both sides: exactly 10 or 30 is "moderate".
pub fn ath_status(gap_pct: f64) -> AthStatus {
    if gap_pct < NEAR_ATH_PCT {
        AthStatus::NearAth
    } else if gap_pct > FAR_FROM_ATH_PCT {
        AthStatus::FarFromAth
    } else {
        AthStatus::Moderate
    }
}

/// Compute every derived field for one cleaned record.
pub fn derive(rec: CompleteRecord) -> EnrichedAssetRecord {
    let diff = ath_diff(rec.ath, rec.current_price);
    let gap = ath_gap_pct(rec.ath, rec.current_price);
    let ratio = vol_to_market_cap(rec.total_volume, rec.market_cap);

    EnrichedAssetRecord {
        ath_diff: diff,
        ath_gap_pct: gap,
        vol_to_market_cap: ratio,
        cap_category: cap_category(rec.market_cap),
        change_direction: change_direction(rec.price_change_percentage_24h),
        ath_status: gap.map(ath_status),
        id: rec.id,
        symbol: rec.symbol,
        name: rec.name,
        current_price: rec.current_price,
        market_cap: rec.market_cap,
        total_volume: rec.total_volume,
        price_change_percentage_24h: rec.price_change_percentage_24h,
        last_updated: rec.last_updated,
        ath: rec.ath,
    }
}
