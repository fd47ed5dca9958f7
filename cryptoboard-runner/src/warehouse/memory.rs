//! In-memory sink with the same replace semantics as the real warehouse.

use super::{Credential, PublishError, TableRef, WarehouseSink};
use cryptoboard_core::domain::EnrichedAssetRecord;
use std::collections::HashMap;
use std::sync::Mutex;

/// Holds one record set per table. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct InMemorySink {
    tables: Mutex<HashMap<TableRef, Vec<EnrichedAssetRecord>>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current contents of `table`, or `None` if it was never published.
    pub fn table(&self, table: &TableRef) -> Option<Vec<EnrichedAssetRecord>> {
        self.tables
            .lock()
            .ok()
            .and_then(|tables| tables.get(table).cloned())
    }
}

impl WarehouseSink for InMemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn replace_table(
        &self,
        table: &TableRef,
        _credential: &Credential,
        records: &[EnrichedAssetRecord],
    ) -> Result<usize, PublishError> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| PublishError::Write("in-memory table lock poisoned".into()))?;
        tables.insert(table.clone(), records.to_vec());
        Ok(records.len())
    }
}
