use redb::{ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{decode, encode, next_sequence, tables};
use crate::error::{AppError, Result};
use crate::models::StoredRecord;

const RECORD_SEQUENCE: &str = "records";

/// Stored form of a record; the JSON payload is kept as text because
/// bincode cannot round-trip self-describing values
#[derive(Debug, Serialize, Deserialize)]
struct RecordRow {
    feature_key: String,
    project_id: String,
    data: String,
}

fn index_key(feature_key: &str, project_id: &str) -> String {
    format!("{project_id}\u{1f}{feature_key}")
}

/// Record store operations bound to one write transaction
///
/// Every read and write is scoped to `(feature_key, project_id)`; that pair is
/// the only isolation between simulated features.
pub struct RecordTxn<'a> {
    txn: &'a WriteTransaction,
}

impl<'a> RecordTxn<'a> {
    pub fn new(txn: &'a WriteTransaction) -> Self {
        Self { txn }
    }

    fn row_ids(&self, feature_key: &str, project_id: &str) -> Result<Vec<u64>> {
        let index = self.txn.open_table(tables::RECORD_INDEX)?;
        let key = index_key(feature_key, project_id);
        match index.get(key.as_str())? {
            Some(bytes) => decode(bytes.value()),
            None => Ok(Vec::new()),
        }
    }

    fn store_row_ids(&self, feature_key: &str, project_id: &str, ids: &[u64]) -> Result<()> {
        let mut index = self.txn.open_table(tables::RECORD_INDEX)?;
        let key = index_key(feature_key, project_id);
        if ids.is_empty() {
            index.remove(key.as_str())?;
        } else {
            let bytes = encode(&ids)?;
            index.insert(key.as_str(), bytes.as_slice())?;
        }
        Ok(())
    }

    fn ensure_member(&self, feature_key: &str, project_id: &str, id: u64) -> Result<Vec<u64>> {
        let ids = self.row_ids(feature_key, project_id)?;
        if !ids.contains(&id) {
            return Err(AppError::NotFound(format!("Record {id} not found")));
        }
        Ok(ids)
    }

    /// Append a record and return its store-assigned id
    pub fn insert(&self, feature_key: &str, project_id: &str, data: &Value) -> Result<u64> {
        let id = next_sequence(self.txn, RECORD_SEQUENCE)?;
        let row = RecordRow {
            feature_key: feature_key.to_string(),
            project_id: project_id.to_string(),
            data: serde_json::to_string(data)?,
        };
        {
            let mut records = self.txn.open_table(tables::RECORDS)?;
            let bytes = encode(&row)?;
            records.insert(id, bytes.as_slice())?;
        }

        let mut ids = self.row_ids(feature_key, project_id)?;
        ids.push(id);
        self.store_row_ids(feature_key, project_id, &ids)?;

        tracing::debug!("Inserted record {} under {}", id, feature_key);
        Ok(id)
    }

    /// All records for the isolation key, in insertion order
    pub fn query(&self, feature_key: &str, project_id: &str) -> Result<Vec<StoredRecord>> {
        let ids = self.row_ids(feature_key, project_id)?;
        let records = self.txn.open_table(tables::RECORDS)?;

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(bytes) = records.get(id)? else {
                tracing::warn!("Record index points at missing row {}", id);
                continue;
            };
            let row: RecordRow = decode(bytes.value())?;
            out.push(StoredRecord {
                id,
                data: serde_json::from_str(&row.data)?,
            });
        }
        Ok(out)
    }

    /// Number of records for the isolation key
    pub fn count(&self, feature_key: &str, project_id: &str) -> Result<usize> {
        Ok(self.row_ids(feature_key, project_id)?.len())
    }

    /// Most recently inserted record for the isolation key
    pub fn last(&self, feature_key: &str, project_id: &str) -> Result<Option<StoredRecord>> {
        Ok(self.query(feature_key, project_id)?.pop())
    }

    /// Replace the payload of an existing record
    pub fn update(&self, feature_key: &str, project_id: &str, id: u64, data: &Value) -> Result<()> {
        self.ensure_member(feature_key, project_id, id)?;
        let row = RecordRow {
            feature_key: feature_key.to_string(),
            project_id: project_id.to_string(),
            data: serde_json::to_string(data)?,
        };
        let mut records = self.txn.open_table(tables::RECORDS)?;
        let bytes = encode(&row)?;
        records.insert(id, bytes.as_slice())?;
        Ok(())
    }

    /// Remove a record
    pub fn delete(&self, feature_key: &str, project_id: &str, id: u64) -> Result<()> {
        let mut ids = self.ensure_member(feature_key, project_id, id)?;
        {
            let mut records = self.txn.open_table(tables::RECORDS)?;
            records.remove(id)?;
        }
        ids.retain(|row_id| *row_id != id);
        self.store_row_ids(feature_key, project_id, &ids)?;
        Ok(())
    }
}
