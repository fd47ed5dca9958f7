//! Optional file checkpoints for the raw snapshot and the enriched table.
//!
//! Checkpoints are conveniences, not part of the pipeline's correctness:
//! - Raw snapshot → CSV (nine core columns, then every extra source field)
//! - Enriched records → CSV, or Parquet when the path ends in `.parquet`
//!
//! Every write is atomic (write `*.tmp`, rename into place) and leaves a
//! `{file}.meta.json` sidecar with the row count and a BLAKE3 data hash.

use super::provider::{content_hash, Snapshot};
use crate::domain::{EnrichedAssetRecord, RAW_COLUMNS};
use crate::schema::{records_to_dataframe, ENRICHED_COLUMNS};
use chrono::{DateTime, Utc};
use polars::prelude::{
    DataFrame, DataType, Field, LazyCsvReader, LazyFileListReader, ParquetWriter, Schema,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error at {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("checkpoint schema error: {0}")]
    Schema(String),
}

fn io_err(path: &Path) -> impl Fn(std::io::Error) -> CheckpointError + '_ {
    move |e| CheckpointError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// What a checkpoint file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    RawSnapshot,
    Enriched,
}

/// On-disk encoding of a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointFormat {
    Csv,
    Parquet,
}

impl CheckpointFormat {
    /// `.parquet` selects Parquet; everything else is CSV.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("parquet") => Self::Parquet,
            _ => Self::Csv,
        }
    }
}

/// Metadata sidecar written next to every checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub kind: CheckpointKind,
    pub format: CheckpointFormat,
    pub rows: usize,
    pub data_hash: String,
    pub written_at: DateTime<Utc>,
}

/// Sidecar path: `{file}.meta.json`.
pub fn meta_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".meta.json");
    path.with_file_name(name)
}

/// Read a checkpoint's sidecar, if present and well-formed.
pub fn read_meta(path: &Path) -> Option<CheckpointMeta> {
    let content = fs::read_to_string(meta_path(path)).ok()?;
    serde_json::from_str(&content).ok()
}

/// Write `bytes` to `path` atomically, creating parent directories.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CheckpointError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, bytes).map_err(io_err(&tmp_path))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        CheckpointError::Io {
            path: path.to_path_buf(),
            reason: format!("atomic rename failed: {e}"),
        }
    })
}

fn write_meta(path: &Path, meta: &CheckpointMeta) -> Result<(), CheckpointError> {
    let json = serde_json::to_vec_pretty(meta)
        .map_err(|e| CheckpointError::Schema(format!("meta serialization: {e}")))?;
    write_atomic(&meta_path(path), &json)
}

// ── Raw snapshot ────────────────────────────────────────────────────

fn render_extra(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_number(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

/// Render the raw snapshot as CSV bytes.
pub fn raw_snapshot_csv(snapshot: &Snapshot) -> Result<Vec<u8>, CheckpointError> {
    let extra_columns: BTreeSet<&str> = snapshot
        .records
        .iter()
        .flat_map(|r| r.extra.keys().map(String::as_str))
        .filter(|k| !RAW_COLUMNS.contains(k))
        .collect();

    let mut wtr = csv::Writer::from_writer(vec![]);
    let header: Vec<&str> = RAW_COLUMNS
        .iter()
        .copied()
        .chain(extra_columns.iter().copied())
        .collect();
    wtr.write_record(&header)
        .map_err(|e| CheckpointError::Csv(e.to_string()))?;

    for r in &snapshot.records {
        let mut row = vec![
            r.id.clone().unwrap_or_default(),
            r.symbol.clone().unwrap_or_default(),
            r.name.clone().unwrap_or_default(),
            render_number(r.current_price),
            render_number(r.market_cap),
            render_number(r.total_volume),
            render_number(r.price_change_percentage_24h),
            r.last_updated.clone().unwrap_or_default(),
            render_number(r.ath),
        ];
        row.extend(
            extra_columns
                .iter()
                .map(|k| r.extra.get(*k).map(render_extra).unwrap_or_default()),
        );
        wtr.write_record(&row)
            .map_err(|e| CheckpointError::Csv(e.to_string()))?;
    }

    wtr.into_inner()
        .map_err(|e| CheckpointError::Csv(format!("failed to flush CSV writer: {e}")))
}

/// Persist the raw snapshot as CSV.
pub fn write_raw_snapshot(path: &Path, snapshot: &Snapshot) -> Result<CheckpointMeta, CheckpointError> {
    let bytes = raw_snapshot_csv(snapshot)?;
    write_atomic(path, &bytes)?;

    let meta = CheckpointMeta {
        kind: CheckpointKind::RawSnapshot,
        format: CheckpointFormat::Csv,
        rows: snapshot.len(),
        data_hash: snapshot.content_hash(),
        written_at: Utc::now(),
    };
    write_meta(path, &meta)?;
    Ok(meta)
}

/// Pinned dtypes for the nine core raw columns. Text columns stay text even
/// when every value looks numeric (`"007"` must not become `7`).
pub fn raw_core_schema() -> Schema {
    Schema::from_iter(RAW_COLUMNS.iter().map(|&name| {
        let dtype = match name {
            "id" | "symbol" | "name" | "last_updated" => DataType::String,
            _ => DataType::Float64,
        };
        Field::new(name.into(), dtype)
    }))
}

/// Load a raw CSV checkpoint as a DataFrame. Core columns use
/// [`raw_core_schema`]; extra source columns keep inferred types.
pub fn read_raw_frame(path: &Path) -> Result<DataFrame, CheckpointError> {
    if !path.exists() {
        return Err(CheckpointError::Io {
            path: path.to_path_buf(),
            reason: "file not found".into(),
        });
    }
    LazyCsvReader::new(path)
        .with_has_header(true)
        .with_dtype_overwrite(Some(Arc::new(raw_core_schema())))
        .finish()
        .and_then(|lf| lf.collect())
        .map_err(|e| CheckpointError::Csv(format!("read {}: {e}", path.display())))
}

// ── Enriched table ──────────────────────────────────────────────────

/// Render enriched records as CSV bytes. The header is always written, even
/// for an empty table.
pub fn enriched_csv(records: &[EnrichedAssetRecord]) -> Result<Vec<u8>, CheckpointError> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(vec![]);
    wtr.write_record(ENRICHED_COLUMNS.iter().map(|f| f.name))
        .map_err(|e| CheckpointError::Csv(e.to_string()))?;
    for rec in records {
        wtr.serialize(rec)
            .map_err(|e| CheckpointError::Csv(e.to_string()))?;
    }
    wtr.into_inner()
        .map_err(|e| CheckpointError::Csv(format!("failed to flush CSV writer: {e}")))
}

fn enriched_parquet(records: &[EnrichedAssetRecord]) -> Result<Vec<u8>, CheckpointError> {
    let mut df = records_to_dataframe(records)
        .map_err(|e| CheckpointError::Parquet(format!("dataframe creation: {e}")))?;
    let mut buf = Vec::new();
    ParquetWriter::new(&mut buf)
        .finish(&mut df)
        .map_err(|e| CheckpointError::Parquet(format!("write parquet: {e}")))?;
    Ok(buf)
}

/// Persist enriched records as CSV or Parquet, chosen by file extension.
pub fn write_enriched(
    path: &Path,
    records: &[EnrichedAssetRecord],
) -> Result<CheckpointMeta, CheckpointError> {
    let format = CheckpointFormat::from_path(path);
    let bytes = match format {
        CheckpointFormat::Csv => enriched_csv(records)?,
        CheckpointFormat::Parquet => enriched_parquet(records)?,
    };
    write_atomic(path, &bytes)?;

    let meta = CheckpointMeta {
        kind: CheckpointKind::Enriched,
        format,
        rows: records.len(),
        data_hash: content_hash(records),
        written_at: Utc::now(),
    };
    write_meta(path, &meta)?;
    Ok(meta)
}

/// Read an enriched CSV checkpoint back into typed records.
pub fn read_enriched(path: &Path) -> Result<Vec<EnrichedAssetRecord>, CheckpointError> {
    if CheckpointFormat::from_path(path) == CheckpointFormat::Parquet {
        return Err(CheckpointError::Schema(
            "enriched Parquet checkpoints are write-only; use a CSV checkpoint".into(),
        ));
    }

    let mut rdr = csv::Reader::from_path(path).map_err(|e| match e.kind() {
        csv::ErrorKind::Io(_) => CheckpointError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        },
        _ => CheckpointError::Csv(e.to_string()),
    })?;

    let headers = rdr
        .headers()
        .map_err(|e| CheckpointError::Csv(e.to_string()))?
        .clone();
    for field in ENRICHED_COLUMNS {
        if !headers.iter().any(|h| h == field.name) {
            return Err(CheckpointError::Schema(format!(
                "missing column '{}' in {}",
                field.name,
                path.display()
            )));
        }
    }

    rdr.deserialize::<EnrichedAssetRecord>()
        .enumerate()
        .map(|(i, row)| {
            row.map_err(|e| CheckpointError::Csv(format!("row {}: {e}", i + 1)))
        })
        .collect()
}
