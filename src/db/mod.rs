pub mod features;
pub mod records;
pub mod tables;

use redb::{Database, ReadableTable, WriteTransaction, backends::InMemoryBackend};
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;

pub use records::RecordTxn;

/// Database handle type (Arc-wrapped for sharing across handlers)
pub type Db = Arc<Database>;

/// Shared bincode configuration for every stored row
pub(crate) const BINCODE_CONFIG: bincode::config::Configuration = bincode::config::standard();

/// Open or create the redb database at the given path
///
/// Creates all required tables on first run.
pub fn open_database(path: impl AsRef<Path>) -> Result<Db> {
    tracing::info!("Opening database at: {:?}", path.as_ref());

    // Create parent directory if it doesn't exist
    if let Some(parent) = path.as_ref().parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent).inspect_err(|e| {
            tracing::error!("Failed to create database directory: {}", e);
        })?;
    }

    let db = Database::create(path)?;
    initialize(db)
}

/// Open an ephemeral database that lives only as long as the handle
pub fn open_in_memory() -> Result<Db> {
    tracing::info!("Opening in-memory database");
    let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
    initialize(db)
}

fn initialize(db: Database) -> Result<Db> {
    // Create tables if they don't exist by opening them
    let write_txn = db.begin_write()?;
    {
        let _ = write_txn.open_table(tables::RECORDS)?;
        let _ = write_txn.open_table(tables::RECORD_INDEX)?;
        let _ = write_txn.open_table(tables::FEATURES)?;
        let _ = write_txn.open_table(tables::PROJECT_FEATURES)?;
        let _ = write_txn.open_table(tables::SEQUENCES)?;
    }
    write_txn.commit()?;

    tracing::info!("Database initialized successfully");

    Ok(Arc::new(db))
}

/// Issue the next id of a named sequence inside the caller's transaction
pub(crate) fn next_sequence(txn: &WriteTransaction, name: &str) -> Result<u64> {
    let mut sequences = txn.open_table(tables::SEQUENCES)?;
    let next = sequences.get(name)?.map(|v| v.value()).unwrap_or(0) + 1;
    sequences.insert(name, next)?;
    Ok(next)
}

/// Encode a row with the shared bincode configuration
pub(crate) fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(value, BINCODE_CONFIG)?)
}

/// Decode a row with the shared bincode configuration
pub(crate) fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, BINCODE_CONFIG)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequences_are_monotonic() {
        let db = open_in_memory().unwrap();
        let txn = db.begin_write().unwrap();
        assert_eq!(next_sequence(&txn, "a").unwrap(), 1);
        assert_eq!(next_sequence(&txn, "a").unwrap(), 2);
        assert_eq!(next_sequence(&txn, "b").unwrap(), 1);
        txn.commit().unwrap();
    }

    #[test]
    fn test_open_database_creates_parent_dir() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("forge.db");
        let db = open_database(&path).unwrap();
        assert!(path.exists());
        drop(db);
    }
}
