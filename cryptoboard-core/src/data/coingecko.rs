//! CoinGecko market-data provider.
//!
//! Fetches the top-N coins by market cap from the `/coins/markets` listing
//! endpoint. One call, one snapshot: no retries here. Transport failures and
//! non-success statuses become `SourceUnavailable`; bodies that are not a JSON
//! array of asset objects become `SourceSchema`.

use super::provider::{ExtractError, MarketDataSource, Snapshot, SnapshotSource};
use crate::domain::RawAssetRecord;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Query and transport settings for the CoinGecko listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// API root, without a trailing slash.
    pub base_url: String,
    pub vs_currency: String,
    pub order: String,
    pub per_page: u32,
    pub page: u32,
    pub sparkline: bool,
    pub timeout_secs: u64,
    /// Optional demo/pro key, sent as `x-cg-demo-api-key`.
    pub api_key: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.coingecko.com/api/v3".into(),
            vs_currency: "usd".into(),
            order: "market_cap_desc".into(),
            per_page: 20,
            page: 1,
            sparkline: false,
            timeout_secs: 30,
            api_key: None,
        }
    }
}

/// CoinGecko provider over a blocking HTTP client.
pub struct CoinGeckoProvider {
    client: reqwest::blocking::Client,
    config: SourceConfig,
}

impl CoinGeckoProvider {
    pub fn new(config: SourceConfig) -> Result<Self, ExtractError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("cryptoboard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                ExtractError::SourceUnavailable(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Listing endpoint URL.
    fn markets_url(&self) -> String {
        format!("{}/coins/markets", self.config.base_url.trim_end_matches('/'))
    }

    /// Query parameters for the listing endpoint.
    fn query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("vs_currency", self.config.vs_currency.clone()),
            ("order", self.config.order.clone()),
            ("per_page", self.config.per_page.to_string()),
            ("page", self.config.page.to_string()),
            ("sparkline", self.config.sparkline.to_string()),
        ]
    }
}

/// Parse a listing response body into raw records, truncated to `limit`.
pub fn parse_markets_body(body: &[u8], limit: usize) -> Result<Vec<RawAssetRecord>, ExtractError> {
    let mut records: Vec<RawAssetRecord> = serde_json::from_slice(body).map_err(|e| {
        ExtractError::SourceSchema(format!("expected a JSON array of asset objects: {e}"))
    })?;

    if records.len() > limit {
        warn!(
            returned = records.len(),
            limit, "source returned more rows than requested, truncating"
        );
        records.truncate(limit);
    }

    Ok(records)
}

impl MarketDataSource for CoinGeckoProvider {
    fn name(&self) -> &str {
        "coingecko"
    }

    fn fetch_snapshot(&self) -> Result<Snapshot, ExtractError> {
        let url = self.markets_url();
        debug!(%url, "requesting market listing");

        let mut request = self.client.get(&url).query(&self.query());
        if let Some(key) = &self.config.api_key {
            request = request.header("x-cg-demo-api-key", key);
        }

        let resp = request
            .send()
            .map_err(|e| ExtractError::SourceUnavailable(format!("request to {url} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ExtractError::SourceUnavailable(format!(
                "HTTP {status} from {url}"
            )));
        }

        let body = resp.bytes().map_err(|e| {
            ExtractError::SourceUnavailable(format!("failed to read response body: {e}"))
        })?;

        let records = parse_markets_body(&body, self.config.per_page as usize)?;
        info!(rows = records.len(), %url, "fetched market snapshot");

        Ok(Snapshot::new(records, SnapshotSource::CoinGecko))
    }
}
