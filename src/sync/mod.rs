//! Reverse sync
//!
//! Reads generated source files after a developer has edited them and folds
//! the edits back into the feature configurations. Only the generator's own
//! structure is understood; when a pattern cannot be found the feature is left
//! untouched.

pub mod source;

use serde_json::Value;

use crate::constants::{
    AUTH_RESERVED_COLUMNS, CRUD_MODELS_PATH, CRUD_RESERVED_COLUMNS, FUNCTION_ROUTES_PATH,
    USER_MODEL_PATH,
};
use crate::generator::FileMap;
use crate::generator::auth::user_columns;
use crate::models::naming::capitalize;
use crate::models::{
    AuthConfig, CrudConfig, ExtraField, FeatureConfiguration, FeatureKind, FeaturePayload,
    FieldSpec, FieldType, FunctionConfig,
};
use source::Column;

/// Result of reading one feature back from source
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Updated(FeaturePayload),
    Unchanged,
}

/// Name, type, required flag and default of one column, for comparisons
type ColumnKey = (String, FieldType, bool, Option<Value>);

fn sorted(mut keys: Vec<ColumnKey>) -> Vec<ColumnKey> {
    keys.sort_by(|a, b| a.0.cmp(&b.0));
    keys
}

/// The file a feature of this kind is generated into
pub fn source_path(kind: FeatureKind) -> Option<&'static str> {
    match kind {
        FeatureKind::Crud => Some(CRUD_MODELS_PATH),
        FeatureKind::Auth => Some(USER_MODEL_PATH),
        FeatureKind::Functions => Some(FUNCTION_ROUTES_PATH),
        FeatureKind::Analytics => None,
    }
}

/// Read one feature back from the text of its generated file
pub fn sync(feature: &FeatureConfiguration, text: &str) -> SyncOutcome {
    match &feature.configuration {
        FeaturePayload::Crud(config) => sync_crud(feature, config, text),
        FeaturePayload::Auth(config) => sync_auth(config, text),
        FeaturePayload::Functions(config) => sync_function(feature, config, text),
        FeaturePayload::Analytics(_) => SyncOutcome::Unchanged,
    }
}

fn sync_crud(feature: &FeatureConfiguration, config: &CrudConfig, text: &str) -> SyncOutcome {
    let table = feature.table_name().unwrap_or_default();
    let expected_class = capitalize(&table);
    let display = feature.name.to_lowercase();
    let compact = display.replace(' ', "");

    let Some(block) = source::model_block(text, |class| {
        let lower = class.to_lowercase();
        class.eq_ignore_ascii_case(&expected_class)
            || lower == display
            || lower == compact
            || (!config.table.is_empty() && lower == config.table.to_lowercase())
    }) else {
        tracing::warn!(
            "No model class for feature '{}' (expected class {})",
            feature.name,
            expected_class
        );
        return SyncOutcome::Unchanged;
    };

    let found: Vec<Column> = source::columns(block)
        .into_iter()
        .filter(|column| !CRUD_RESERVED_COLUMNS.contains(&column.name.as_str()))
        .collect();

    let current = config
        .fields
        .iter()
        .filter(|field| !CRUD_RESERVED_COLUMNS.contains(&field.name.as_str()))
        .map(|field| {
            let default = match field.field_type {
                FieldType::Datetime => None,
                _ => field.default.clone(),
            };
            (field.name.clone(), field.field_type, field.required, default)
        })
        .collect();
    let edited = found
        .iter()
        .map(|c| (c.name.clone(), c.field_type, c.required, c.default.clone()))
        .collect();

    if sorted(current) == sorted(edited) {
        return SyncOutcome::Unchanged;
    }

    tracing::info!(
        "Updating fields for '{}': found {}, was {}",
        feature.name,
        found.len(),
        config.fields.len()
    );
    let fields = found
        .into_iter()
        .map(|column| FieldSpec {
            name: column.name,
            field_type: column.field_type,
            required: column.required,
            default: column.default,
        })
        .collect();
    SyncOutcome::Updated(FeaturePayload::Crud(CrudConfig {
        fields,
        ..config.clone()
    }))
}

fn sync_auth(config: &AuthConfig, text: &str) -> SyncOutcome {
    let Some(block) = source::user_block(text) else {
        return SyncOutcome::Unchanged;
    };

    let found: Vec<Column> = source::columns(block)
        .into_iter()
        .filter(|column| !AUTH_RESERVED_COLUMNS.contains(&column.name.as_str()))
        .collect();

    let current = user_columns(config)
        .into_iter()
        .filter(|field| !AUTH_RESERVED_COLUMNS.contains(&field.name.as_str()))
        .map(|field| (field.name.clone(), field.field_type, field.required, None))
        .collect();
    let edited = found
        .iter()
        .map(|c| (c.name.clone(), c.field_type, c.required, None))
        .collect();

    if sorted(current) == sorted(edited) {
        return SyncOutcome::Unchanged;
    }

    let extra_fields = found
        .into_iter()
        .map(|column| ExtraField {
            name: column.name,
            field_type: column.field_type,
            required: column.required,
        })
        .collect();
    SyncOutcome::Updated(FeaturePayload::Auth(AuthConfig {
        extra_fields,
        ..config.clone()
    }))
}

/// Whitespace-insensitive form of function code; empty code reads as `pass`
fn normalize_code(code: &str) -> String {
    let code = code
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    match code.trim() {
        "" => "pass".to_string(),
        trimmed => trimmed.to_string(),
    }
}

fn sync_function(
    feature: &FeatureConfiguration,
    config: &FunctionConfig,
    text: &str,
) -> SyncOutcome {
    let Some(name) = feature.function_name() else {
        return SyncOutcome::Unchanged;
    };
    let Some(body) = source::function_body(text, &name) else {
        return SyncOutcome::Unchanged;
    };
    if normalize_code(&body) == normalize_code(config.code()) {
        return SyncOutcome::Unchanged;
    }

    SyncOutcome::Updated(FeaturePayload::Functions(FunctionConfig {
        code: Some(body),
        ..config.clone()
    }))
}

/// Sync every feature that has its generated file in `files`
///
/// Returns the features whose configuration changed, with the new payload in
/// place. Only the first AUTH feature is considered.
pub fn sync_project(features: &[FeatureConfiguration], files: &FileMap) -> Vec<FeatureConfiguration> {
    let first_auth = features.iter().position(|f| f.kind == FeatureKind::Auth);

    let updated: Vec<FeatureConfiguration> = features
        .iter()
        .enumerate()
        .filter(|(i, feature)| feature.kind != FeatureKind::Auth || Some(*i) == first_auth)
        .filter_map(|(_, feature)| {
            let text = files.get(source_path(feature.kind)?)?;
            match sync(feature, text) {
                SyncOutcome::Updated(configuration) => Some(FeatureConfiguration {
                    configuration,
                    ..feature.clone()
                }),
                SyncOutcome::Unchanged => None,
            }
        })
        .collect();

    tracing::info!("Sync complete: {} of {} features updated", updated.len(), features.len());
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::generate;
    use crate::models::ProjectInfo;
    use serde_json::json;

    fn feature(name: &str, kind: FeatureKind, configuration: Value) -> FeatureConfiguration {
        FeatureConfiguration::new(name, FeaturePayload::from_value(kind, configuration).unwrap())
    }

    fn book() -> FeatureConfiguration {
        feature(
            "Books",
            FeatureKind::Crud,
            json!({"table": "book", "fields": [
                {"name": "title", "type": "string", "required": true},
                {"name": "pages", "type": "integer", "default": 100},
                {"name": "price", "type": "float", "default": 9.5},
                {"name": "note", "type": "text", "default": "it's\u{7}"},
                {"name": "published", "type": "datetime", "default": "2024-01-01"}
            ]}),
        )
    }

    fn auth() -> FeatureConfiguration {
        feature(
            "Auth",
            FeatureKind::Auth,
            json!({"extra_fields": ["phone", "email", {"name": "username", "required": true}]}),
        )
    }

    fn double() -> FeatureConfiguration {
        feature(
            "Double It",
            FeatureKind::Functions,
            json!({"code": "def handler(data):\n    return data['n'] * 2\n"}),
        )
    }

    fn project() -> ProjectInfo {
        ProjectInfo::new("Library", "")
    }

    #[test]
    fn test_generated_sources_sync_unchanged() {
        let empty = feature("Noop", FeatureKind::Functions, json!({}));
        let features = vec![book(), auth(), double(), empty];
        let files = generate(&project(), &features).unwrap();

        for feature in &features {
            let path = source_path(feature.kind).unwrap();
            assert_eq!(sync(feature, &files[path]), SyncOutcome::Unchanged, "{}", feature.name);
        }
        assert!(sync_project(&features, &files).is_empty());
    }

    #[test]
    fn test_added_column_is_recovered() {
        let books = feature(
            "Book",
            FeatureKind::Crud,
            json!({"table": "book", "fields": [{"name": "title", "type": "string", "required": true}]}),
        );
        let files = generate(&project(), std::slice::from_ref(&books)).unwrap();
        let edited = files[CRUD_MODELS_PATH].replace(
            "    title = db.Column(db.String(120), nullable=False)\n",
            "    title = db.Column(db.String(120), nullable=False)\n    rating = db.Column(db.Integer)\n",
        );

        let SyncOutcome::Updated(FeaturePayload::Crud(config)) = sync(&books, &edited) else {
            panic!("expected updated crud payload");
        };
        assert_eq!(config.table, "book");
        assert_eq!(
            config.fields,
            vec![
                FieldSpec::new("title", FieldType::String, true),
                FieldSpec::new("rating", FieldType::Integer, false),
            ]
        );
    }

    #[test]
    fn test_class_found_by_display_name() {
        let feature = feature(
            "Blog Post",
            FeatureKind::Crud,
            json!({"table": "entries", "fields": []}),
        );
        let text = "class BlogPost(db.Model):\n    body = db.Column(db.Text, nullable=False)\n";
        let SyncOutcome::Updated(FeaturePayload::Crud(config)) = sync(&feature, text) else {
            panic!("expected updated crud payload");
        };
        assert_eq!(config.fields, vec![FieldSpec::new("body", FieldType::Text, true)]);
    }

    #[test]
    fn test_missing_class_is_unchanged() {
        assert_eq!(sync(&book(), "from app import db\n"), SyncOutcome::Unchanged);
    }

    #[test]
    fn test_user_model_edit_replaces_extra_fields() {
        let auth = auth();
        let files = generate(&project(), std::slice::from_ref(&auth)).unwrap();
        let edited = files[USER_MODEL_PATH].replace(
            "    phone = db.Column(db.String(120))\n",
            "    age = db.Column(db.Integer, nullable=False)\n",
        );

        let SyncOutcome::Updated(FeaturePayload::Auth(config)) = sync(&auth, &edited) else {
            panic!("expected updated auth payload");
        };
        let names: Vec<&str> = config.extra_field_names().collect();
        assert_eq!(names, ["age", "username"]);
        assert_eq!(config.extra_fields[0].field_type, FieldType::Integer);
        assert!(config.extra_fields[0].required);
        assert_eq!(config.auth_type, "jwt");
    }

    #[test]
    fn test_function_edit_replaces_code() {
        let double = double();
        let files = generate(&project(), std::slice::from_ref(&double)).unwrap();
        let edited = files[FUNCTION_ROUTES_PATH].replace("* 2", "* 3");

        let updated = sync_project(std::slice::from_ref(&double), &FileMap::from([(
            FUNCTION_ROUTES_PATH.to_string(),
            edited,
        )]));
        assert_eq!(updated.len(), 1);
        assert_eq!(
            updated[0].function().unwrap().code(),
            "def handler(data):\n    return data['n'] * 3"
        );
    }

    #[test]
    fn test_only_first_auth_feature_is_synced() {
        let first = auth();
        let second = feature("Second", FeatureKind::Auth, json!({}));
        let files = FileMap::from([(
            USER_MODEL_PATH.to_string(),
            "class User(db.Model):\n    id = db.Column(db.Integer, primary_key=True)\n".to_string(),
        )]);

        let updated = sync_project(&[first, second], &files);
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].name, "Auth");
        assert!(updated[0].auth().unwrap().extra_fields.is_empty());
    }
}
