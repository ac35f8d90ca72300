use redb::TableDefinition;

/// Records table: row id -> RecordRow (bincode)
pub const RECORDS: TableDefinition<u64, &[u8]> = TableDefinition::new("records");

/// Record index: "{project_id}\x1f{feature_key}" -> Vec<row id> in insertion order
pub const RECORD_INDEX: TableDefinition<&str, &[u8]> = TableDefinition::new("record_index");

/// Features table: feature id -> FeatureRow (bincode)
pub const FEATURES: TableDefinition<u64, &[u8]> = TableDefinition::new("features");

/// Project features index: project_id -> Vec<feature id> in creation order
pub const PROJECT_FEATURES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("project_features");

/// Monotonic id sequences: sequence name -> last issued id
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");
