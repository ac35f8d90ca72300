use redb::{ReadableDatabase, ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{Db, decode, encode, next_sequence, tables};
use crate::error::{AppError, Result};
use crate::models::{FeatureConfiguration, FeatureKind, FeaturePayload};

const FEATURE_SEQUENCE: &str = "features";

#[derive(Debug, Serialize, Deserialize)]
struct FeatureRow {
    project_id: String,
    kind: String,
    name: String,
    configuration: String,
}

impl FeatureRow {
    fn from_feature(feature: &FeatureConfiguration) -> Result<Self> {
        Ok(Self {
            project_id: feature.project_id.clone(),
            kind: feature.kind.to_string(),
            name: feature.name.clone(),
            configuration: serde_json::to_string(&feature.configuration)?,
        })
    }

    fn into_feature(self, id: u64) -> Result<FeatureConfiguration> {
        let kind: FeatureKind = self.kind.parse()?;
        let configuration =
            FeaturePayload::from_value(kind, serde_json::from_str(&self.configuration)?)?;
        Ok(FeatureConfiguration {
            id,
            project_id: self.project_id,
            kind,
            name: self.name,
            configuration,
        })
    }
}

/// Fields a caller may change on an existing feature
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeatureUpdate {
    pub name: Option<String>,
    pub configuration: Option<Value>,
}

fn project_feature_ids(txn: &WriteTransaction, project_id: &str) -> Result<Vec<u64>> {
    let index = txn.open_table(tables::PROJECT_FEATURES)?;
    match index.get(project_id)? {
        Some(bytes) => decode(bytes.value()),
        None => Ok(Vec::new()),
    }
}

fn store_project_feature_ids(txn: &WriteTransaction, project_id: &str, ids: &[u64]) -> Result<()> {
    let mut index = txn.open_table(tables::PROJECT_FEATURES)?;
    if ids.is_empty() {
        index.remove(project_id)?;
    } else {
        let bytes = encode(&ids)?;
        index.insert(project_id, bytes.as_slice())?;
    }
    Ok(())
}

/// Load one feature inside a write transaction
pub fn load_feature(txn: &WriteTransaction, id: u64) -> Result<FeatureConfiguration> {
    let features = txn.open_table(tables::FEATURES)?;
    let row: FeatureRow = features
        .get(id)?
        .map(|bytes| decode(bytes.value()))
        .transpose()?
        .ok_or_else(|| AppError::NotFound("Feature not found".to_string()))?;
    row.into_feature(id)
}

/// Persist a feature inside a write transaction; id 0 allocates a new id
pub fn save_feature(
    txn: &WriteTransaction,
    mut feature: FeatureConfiguration,
) -> Result<FeatureConfiguration> {
    feature.validate()?;

    let is_new = feature.id == 0;
    if is_new {
        feature.id = next_sequence(txn, FEATURE_SEQUENCE)?;
    }

    {
        let mut features = txn.open_table(tables::FEATURES)?;
        let bytes = encode(&FeatureRow::from_feature(&feature)?)?;
        features.insert(feature.id, bytes.as_slice())?;
    }

    let mut ids = project_feature_ids(txn, &feature.project_id)?;
    if !ids.contains(&feature.id) {
        ids.push(feature.id);
        store_project_feature_ids(txn, &feature.project_id, &ids)?;
    }

    if is_new {
        tracing::info!(
            "Created {} feature '{}' ({}) in project {}",
            feature.kind,
            feature.name,
            feature.id,
            feature.project_id
        );
    }
    Ok(feature)
}

/// All features of a project inside a write transaction, in creation order
pub fn load_project_features(
    txn: &WriteTransaction,
    project_id: &str,
) -> Result<Vec<FeatureConfiguration>> {
    project_feature_ids(txn, project_id)?
        .into_iter()
        .map(|id| load_feature(txn, id))
        .collect()
}

/// Create a feature in its own transaction
pub fn create_feature(
    db: &Db,
    project_id: &str,
    name: &str,
    kind: FeatureKind,
    configuration: Value,
) -> Result<FeatureConfiguration> {
    let mut feature = FeatureConfiguration::new(name, FeaturePayload::from_value(kind, configuration)?);
    feature.project_id = project_id.to_string();

    let write_txn = db.begin_write()?;
    let feature = save_feature(&write_txn, feature)?;
    write_txn.commit()?;
    Ok(feature)
}

/// List a project's features in creation order
pub fn list_features(db: &Db, project_id: &str) -> Result<Vec<FeatureConfiguration>> {
    let read_txn = db.begin_read()?;
    let index = read_txn.open_table(tables::PROJECT_FEATURES)?;
    let features = read_txn.open_table(tables::FEATURES)?;

    let ids: Vec<u64> = match index.get(project_id)? {
        Some(bytes) => decode(bytes.value())?,
        None => return Ok(Vec::new()),
    };

    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(bytes) = features.get(id)? {
            let row: FeatureRow = decode(bytes.value())?;
            out.push(row.into_feature(id)?);
        }
    }
    Ok(out)
}

/// Fetch a single feature
pub fn get_feature(db: &Db, id: u64) -> Result<FeatureConfiguration> {
    let read_txn = db.begin_read()?;
    let features = read_txn.open_table(tables::FEATURES)?;
    let row: FeatureRow = features
        .get(id)?
        .map(|bytes| decode(bytes.value()))
        .transpose()?
        .ok_or_else(|| AppError::NotFound("Feature not found".to_string()))?;
    row.into_feature(id)
}

/// Apply a direct edit to a feature
pub fn update_feature(db: &Db, id: u64, update: FeatureUpdate) -> Result<FeatureConfiguration> {
    let write_txn = db.begin_write()?;
    let mut feature = load_feature(&write_txn, id)?;

    if let Some(name) = update.name {
        feature.name = name;
    }
    if let Some(configuration) = update.configuration {
        feature.configuration = FeaturePayload::from_value(feature.kind, configuration)?;
    }

    let feature = save_feature(&write_txn, feature)?;
    write_txn.commit()?;
    Ok(feature)
}

/// Delete a feature
pub fn delete_feature(db: &Db, id: u64) -> Result<()> {
    let write_txn = db.begin_write()?;
    let feature = load_feature(&write_txn, id)?;
    {
        let mut features = write_txn.open_table(tables::FEATURES)?;
        features.remove(id)?;
    }
    let mut ids = project_feature_ids(&write_txn, &feature.project_id)?;
    ids.retain(|fid| *fid != id);
    store_project_feature_ids(&write_txn, &feature.project_id, &ids)?;
    write_txn.commit()?;

    tracing::info!("Deleted feature {} from project {}", id, feature.project_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use serde_json::json;

    fn book_config() -> Value {
        json!({"table": "book", "fields": [{"name": "title", "type": "string", "required": true}]})
    }

    #[test]
    fn test_create_and_list_in_order() {
        let db = open_in_memory().unwrap();
        create_feature(&db, "p1", "Books", FeatureKind::Crud, book_config()).unwrap();
        create_feature(&db, "p1", "Auth", FeatureKind::Auth, json!({})).unwrap();
        create_feature(&db, "p2", "Other", FeatureKind::Crud, book_config()).unwrap();

        let features = list_features(&db, "p1").unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0].name, "Books");
        assert_eq!(features[1].kind, FeatureKind::Auth);
    }

    #[test]
    fn test_update_replaces_configuration() {
        let db = open_in_memory().unwrap();
        let feature = create_feature(&db, "p1", "Books", FeatureKind::Crud, book_config()).unwrap();

        let updated = update_feature(
            &db,
            feature.id,
            FeatureUpdate {
                name: None,
                configuration: Some(json!({"table": "novel", "fields": []})),
            },
        )
        .unwrap();
        assert_eq!(updated.table_name().as_deref(), Some("novel"));
        assert_eq!(get_feature(&db, feature.id).unwrap(), updated);
    }

    #[test]
    fn test_invalid_feature_is_not_persisted() {
        let db = open_in_memory().unwrap();
        let result = create_feature(
            &db,
            "p1",
            "Books",
            FeatureKind::Crud,
            json!({"table": "my books"}),
        );
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(list_features(&db, "p1").unwrap().is_empty());
    }

    #[test]
    fn test_delete_feature() {
        let db = open_in_memory().unwrap();
        let feature = create_feature(&db, "p1", "Books", FeatureKind::Crud, book_config()).unwrap();
        delete_feature(&db, feature.id).unwrap();
        assert!(list_features(&db, "p1").unwrap().is_empty());
        assert!(matches!(get_feature(&db, feature.id), Err(AppError::NotFound(_))));
    }
}
