//! Integration tests over a frozen CoinGecko listing response.
//!
//! The fixture mirrors the `/coins/markets` shape: extra fields, a null
//! market cap, a stablecoin with zero change, and a fresh listing with zero
//! market cap and zero ATH.

use std::path::PathBuf;

use cryptoboard_core::data::checkpoint::{read_raw_frame, write_raw_snapshot};
use cryptoboard_core::data::coingecko::parse_markets_body;
use cryptoboard_core::data::{Snapshot, SnapshotSource};
use cryptoboard_core::domain::{AthStatus, CapCategory, ChangeDirection};
use cryptoboard_core::enrich::{enrich_frame, enrich_with_report};

fn fixture() -> Vec<u8> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/markets_top5.json");
    std::fs::read(path).unwrap()
}

#[test]
fn fixture_enriches_with_expected_labels() {
    let raw = parse_markets_body(&fixture(), 20).unwrap();
    assert_eq!(raw.len(), 5);
    assert!(raw[0].extra.contains_key("image"));

    let (out, report) = enrich_with_report(&raw).unwrap();
    let ids: Vec<&str> = out.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["bitcoin", "tether", "tiny-coin", "new-listing"]);
    assert_eq!(report.dropped_incomplete, 1);

    let tether = &out[1];
    assert_eq!(tether.cap_category, Some(CapCategory::LargeCap));
    assert_eq!(tether.change_direction, ChangeDirection::NoChange);
    assert_eq!(tether.ath_status, Some(AthStatus::Moderate));

    let tiny = &out[2];
    assert_eq!(tiny.cap_category, Some(CapCategory::SmallCap));
    assert_eq!(tiny.change_direction, ChangeDirection::Down);
    assert_eq!(tiny.ath_gap_pct, Some(75.0));
    assert_eq!(tiny.ath_status, Some(AthStatus::FarFromAth));

    let fresh = &out[3];
    assert_eq!(fresh.cap_category, None);
    assert_eq!(fresh.ath_gap_pct, None);
    assert_eq!(fresh.ath_status, None);
    assert_eq!(fresh.vol_to_market_cap, None);
    assert_eq!(fresh.ath_diff, -3.0);
    assert_eq!(report.undefined_ath_gap, 1);
    assert_eq!(report.unclassified_cap, 1);
}

#[test]
fn fixture_limit_truncates_in_rank_order() {
    let raw = parse_markets_body(&fixture(), 2).unwrap();
    assert_eq!(raw.len(), 2);
    assert_eq!(raw[1].id.as_deref(), Some("ethereum"));
}

#[test]
fn raw_checkpoint_path_matches_direct_enrichment() {
    let raw = parse_markets_body(&fixture(), 20).unwrap();
    let snapshot = Snapshot::new(raw, SnapshotSource::Fixture);
    let (direct, _) = enrich_with_report(&snapshot.records).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raw_crypto.csv");
    let meta = write_raw_snapshot(&path, &snapshot).unwrap();
    assert_eq!(meta.rows, 5);
    assert_eq!(meta.data_hash, snapshot.content_hash());

    let df = read_raw_frame(&path).unwrap();
    assert_eq!(df.height(), 5);
    let (via_file, report) = enrich_frame(&df).unwrap();

    assert_eq!(via_file, direct);
    assert_eq!(report.output_rows, 4);
}
