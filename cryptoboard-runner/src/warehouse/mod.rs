//! Warehouse publishing: destination table, credentials, and sinks.
//!
//! A sink replaces the whole destination table with the given records. After
//! a successful `replace_table` the table holds exactly those rows, in order,
//! and nothing from any earlier publish. A failed publish may leave the table
//! in its prior state; sinks never append.

pub mod auth;
pub mod bigquery;
pub mod memory;
#[cfg(test)]
mod test_server;

use cryptoboard_core::domain::EnrichedAssetRecord;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub use bigquery::BigQuerySink;
pub use memory::InMemorySink;

#[derive(Debug, Error)]
pub enum PublishError {
    /// Credentials missing, unreadable, or rejected.
    #[error("warehouse authentication failed: {0}")]
    Authentication(String),

    /// Transport failure, rejected load, or a job that did not complete.
    #[error("warehouse write failed: {0}")]
    Write(String),
}

impl PublishError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Write(_))
    }
}

/// Fully-qualified destination table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableRef {
    /// Parse `dataset.table` under `project_id`.
    pub fn parse(project_id: &str, qualified: &str) -> Result<Self, String> {
        match qualified.split_once('.') {
            Some((dataset, table))
                if !project_id.is_empty()
                    && !dataset.is_empty()
                    && !table.is_empty()
                    && !table.contains('.') =>
            {
                Ok(Self {
                    project_id: project_id.to_string(),
                    dataset_id: dataset.to_string(),
                    table_id: table.to_string(),
                })
            }
            _ => Err(format!(
                "expected 'dataset.table' under a non-empty project, got '{project_id}:{qualified}'"
            )),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

/// How a sink authenticates against the warehouse.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Service-account JSON key on disk.
    ServiceAccountFile(PathBuf),
    /// Pre-issued OAuth access token.
    AccessToken(String),
}

// Tokens must not reach logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceAccountFile(path) => {
                f.debug_tuple("ServiceAccountFile").field(path).finish()
            }
            Self::AccessToken(_) => f.write_str("AccessToken(<redacted>)"),
        }
    }
}

/// Trait for warehouse destinations with full-replace semantics.
pub trait WarehouseSink: Send + Sync {
    fn name(&self) -> &str;

    /// Replace `table` with exactly `records`. An empty slice yields an empty
    /// table. Returns the number of rows written.
    fn replace_table(
        &self,
        table: &TableRef,
        credential: &Credential,
        records: &[EnrichedAssetRecord],
    ) -> Result<usize, PublishError>;
}
