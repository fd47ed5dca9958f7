//! Pipeline orchestrator: extract, then enrich, then publish.
//!
//! Stages run strictly in sequence and each hands its whole output to the
//! next by value. The first stage failure aborts the run and is reported
//! tagged with its stage. When extraction fails the sink is never called, so
//! the destination table keeps its previous contents.
//!
//! Entry points:
//! - `Pipeline::run()`: the full flow, used by `run` and `watch`.
//! - `Pipeline::extract()`, `Pipeline::transform()`, `Pipeline::load()`:
//!   single stages with the pipeline's checkpoints.
//! - `extract_snapshot()`, `publish()`: bare stages over just a source or
//!   just a sink, used by the file-based CLI commands.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use cryptoboard_core::data::checkpoint;
use cryptoboard_core::data::{ExtractError, MarketDataSource, Snapshot};
use cryptoboard_core::domain::EnrichedAssetRecord;
use cryptoboard_core::enrich::{enrich_with_report, EnrichError, EnrichReport};

use crate::config::{CheckpointConfig, ConfigError, PipelineConfig, RetryConfig};
use crate::lock::{LockError, RunLock};
use crate::warehouse::{Credential, PublishError, TableRef, WarehouseSink};

/// Pipeline stage, used to tag failures and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Lock,
    Extract,
    Transform,
    Load,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lock => "lock",
            Self::Extract => "extract",
            Self::Transform => "transform",
            Self::Load => "load",
        })
    }
}

/// Errors from a pipeline run, tagged by the stage that failed.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("lock stage failed: {0}")]
    Lock(#[from] LockError),
    #[error("extract stage failed: {0}")]
    Extract(#[from] ExtractError),
    #[error("transform stage failed: {0}")]
    Transform(#[from] EnrichError),
    #[error("load stage failed: {0}")]
    Load(#[from] PublishError),
}

impl RunError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Lock(_) => Stage::Lock,
            Self::Extract(_) => Stage::Extract,
            Self::Transform(_) => Stage::Transform,
            Self::Load(_) => Stage::Load,
        }
    }
}

/// Outcome of one successful pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    pub rows_extracted: usize,
    pub rows_written: usize,
    pub rows_dropped: usize,
    pub snapshot_hash: String,
    pub fetched_at: DateTime<Utc>,
    pub destination: String,
}

/// Whole-stage retry with exponential backoff. Only transient errors are
/// retried; permanent ones fail on the first attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
        }
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry - 1)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub fn run<T, E, F, P>(&self, stage: Stage, mut op: F, is_transient: P) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
        E: fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && is_transient(&e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        %stage,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying stage"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// One configured pipeline: a source, a sink, and where to publish.
pub struct Pipeline<'a> {
    source: &'a dyn MarketDataSource,
    sink: &'a dyn WarehouseSink,
    table: TableRef,
    credential: Credential,
    checkpoints: CheckpointConfig,
    retry: RetryPolicy,
    lock_path: Option<PathBuf>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        source: &'a dyn MarketDataSource,
        sink: &'a dyn WarehouseSink,
        table: TableRef,
        credential: Credential,
    ) -> Self {
        Self {
            source,
            sink,
            table,
            credential,
            checkpoints: CheckpointConfig::default(),
            retry: RetryPolicy::default(),
            lock_path: None,
        }
    }

    /// Build a pipeline from configuration. The credential is resolved by the
    /// caller; configuration never reads the environment.
    pub fn from_config(
        config: &PipelineConfig,
        source: &'a dyn MarketDataSource,
        sink: &'a dyn WarehouseSink,
        credential: Credential,
    ) -> Result<Self, ConfigError> {
        let table = config.warehouse.table_ref()?;
        Ok(Self::new(source, sink, table, credential)
            .with_checkpoints(config.checkpoint.clone())
            .with_retry(RetryPolicy::from_config(&config.retry))
            .with_lock(config.lock_path.clone()))
    }

    pub fn with_checkpoints(mut self, checkpoints: CheckpointConfig) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_lock(mut self, lock_path: Option<PathBuf>) -> Self {
        self.lock_path = lock_path;
        self
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    /// Run the full flow once.
    pub fn run(&self) -> Result<RunResult, RunError> {
        let _lock = self
            .lock_path
            .as_deref()
            .map(RunLock::acquire)
            .transpose()?;

        info!(source = self.source.name(), sink = self.sink.name(), table = %self.table, "pipeline run started");

        let snapshot = self.extract()?;
        let (records, report) = self.transform(&snapshot)?;
        let rows_written = self.load(&records)?;

        let result = RunResult {
            success: true,
            rows_extracted: snapshot.len(),
            rows_written,
            rows_dropped: report.dropped(),
            snapshot_hash: snapshot.content_hash(),
            fetched_at: snapshot.fetched_at,
            destination: self.table.to_string(),
        };
        info!(
            rows_extracted = result.rows_extracted,
            rows_written = result.rows_written,
            rows_dropped = result.rows_dropped,
            destination = %result.destination,
            "pipeline run finished"
        );
        Ok(result)
    }

    /// Fetch one snapshot, retrying transient source failures.
    pub fn extract(&self) -> Result<Snapshot, RunError> {
        let snapshot = extract_snapshot(self.source, &self.retry)?;
        if let Some(path) = &self.checkpoints.raw_path {
            checkpoint_side_effect(path, checkpoint::write_raw_snapshot(path, &snapshot));
        }
        Ok(snapshot)
    }

    /// Enrich a snapshot. Never retried: the stage is a pure function.
    pub fn transform(
        &self,
        snapshot: &Snapshot,
    ) -> Result<(Vec<EnrichedAssetRecord>, EnrichReport), RunError> {
        let (records, report) = enrich_with_report(&snapshot.records)?;
        log_report(&report);

        if let Some(path) = &self.checkpoints.enriched_path {
            checkpoint_side_effect(path, checkpoint::write_enriched(path, &records));
        }
        Ok((records, report))
    }

    /// Replace the destination table, retrying transient write failures.
    pub fn load(&self, records: &[EnrichedAssetRecord]) -> Result<usize, RunError> {
        publish(self.sink, &self.table, &self.credential, records, &self.retry)
    }
}

/// Extract stage on its own: fetch one snapshot, retrying transient source
/// failures. Writes no checkpoint.
pub fn extract_snapshot(
    source: &dyn MarketDataSource,
    retry: &RetryPolicy,
) -> Result<Snapshot, RunError> {
    info!(stage = %Stage::Extract, source = source.name(), "stage started");
    let snapshot = retry.run(
        Stage::Extract,
        || source.fetch_snapshot(),
        ExtractError::is_transient,
    )?;
    info!(stage = %Stage::Extract, rows = snapshot.len(), hash = %snapshot.content_hash(), "stage finished");
    Ok(snapshot)
}

/// Load stage on its own: replace `table` with `records`, retrying transient
/// write failures.
pub fn publish(
    sink: &dyn WarehouseSink,
    table: &TableRef,
    credential: &Credential,
    records: &[EnrichedAssetRecord],
    retry: &RetryPolicy,
) -> Result<usize, RunError> {
    info!(stage = %Stage::Load, sink = sink.name(), table = %table, rows = records.len(), "stage started");
    let written = retry.run(
        Stage::Load,
        || sink.replace_table(table, credential, records),
        PublishError::is_transient,
    )?;
    info!(stage = %Stage::Load, rows = written, "stage finished");
    Ok(written)
}

/// Log the enrichment report. Dropped rows are warnings.
pub fn log_report(report: &EnrichReport) {
    info!(
        stage = %Stage::Transform,
        input_rows = report.input_rows,
        output_rows = report.output_rows,
        "stage finished"
    );
    if report.dropped() > 0 {
        warn!(
            incomplete = report.dropped_incomplete,
            bad_timestamp = report.dropped_bad_timestamp,
            "rows dropped during enrichment"
        );
    }
    if report.undefined_ath_gap + report.undefined_volume_ratio + report.unclassified_cap > 0 {
        info!(
            undefined_ath_gap = report.undefined_ath_gap,
            undefined_volume_ratio = report.undefined_volume_ratio,
            unclassified_cap = report.unclassified_cap,
            "rows kept with undefined derived fields"
        );
    }
}

// Checkpoints do not fail the run.
fn checkpoint_side_effect(
    path: &Path,
    outcome: Result<checkpoint::CheckpointMeta, checkpoint::CheckpointError>,
) {
    match outcome {
        Ok(meta) => info!(path = %path.display(), rows = meta.rows, kind = ?meta.kind, "checkpoint written"),
        Err(e) => warn!(path = %path.display(), error = %e, "checkpoint write failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_retry() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
    }

    #[test]
    fn default_policy_is_single_attempt() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let out: Result<(), ExtractError> = policy.run(
            Stage::Extract,
            || {
                calls += 1;
                Err(ExtractError::SourceUnavailable("down".into()))
            },
            ExtractError::is_transient,
        );
        assert!(out.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::ZERO,
        };
        let mut calls = 0;
        let out: Result<(), ExtractError> = policy.run(
            Stage::Extract,
            || {
                calls += 1;
                Err(ExtractError::SourceSchema("not an array".into()))
            },
            ExtractError::is_transient,
        );
        assert!(out.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn transient_errors_retry_until_exhausted() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
        };
        let mut calls = 0;
        let out: Result<(), PublishError> = policy.run(
            Stage::Load,
            || {
                calls += 1;
                Err(PublishError::Write("503".into()))
            },
            PublishError::is_transient,
        );
        assert!(out.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn run_error_names_its_stage() {
        let err = RunError::from(ExtractError::SourceUnavailable("timeout".into()));
        assert_eq!(err.stage(), Stage::Extract);
        assert_eq!(
            err.to_string(),
            "extract stage failed: source unavailable: timeout"
        );

        let err = RunError::from(PublishError::Authentication("401".into()));
        assert_eq!(err.stage(), Stage::Load);
        assert!(err.to_string().starts_with("load stage failed"));
    }
}
