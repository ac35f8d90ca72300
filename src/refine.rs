//! Feature-set refinement and preview helpers
//!
//! Folds proposed features into a project's existing set, finds the feature a
//! preview request is aimed at, and documents the endpoints a feature exposes.

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::models::{AuthConfig, FeatureConfiguration, FeatureKind, FeaturePayload};

/// Merge proposed features into the existing set
///
/// A proposal with the same kind and name as an existing feature replaces its
/// configuration. Every AUTH proposal is folded into the project's single
/// AUTH feature. Report entities naming a CRUD feature's display name are
/// rewritten to its table name afterwards.
pub fn merge_features(
    existing: Vec<FeatureConfiguration>,
    proposed: Vec<FeatureConfiguration>,
) -> Vec<FeatureConfiguration> {
    let mut merged = existing;

    for proposal in proposed {
        if let FeaturePayload::Auth(incoming) = &proposal.configuration
            && let Some(target) = merged.iter_mut().find(|f| f.kind == FeatureKind::Auth)
        {
            if let FeaturePayload::Auth(current) = &mut target.configuration {
                fold_auth(current, incoming);
            }
            tracing::debug!("Folded AUTH proposal '{}' into '{}'", proposal.name, target.name);
            continue;
        }

        match merged
            .iter_mut()
            .find(|f| f.kind == proposal.kind && f.name == proposal.name)
        {
            Some(target) => target.configuration = proposal.configuration,
            None => merged.push(proposal),
        }
    }

    resolve_report_entities(&mut merged);
    merged
}

/// Union extra fields by name (later definition wins), union providers, OR flags
fn fold_auth(current: &mut AuthConfig, incoming: &AuthConfig) {
    for field in &incoming.extra_fields {
        match current.extra_fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field.clone(),
            None => current.extra_fields.push(field.clone()),
        }
    }
    for provider in &incoming.providers {
        if !current.providers.contains(provider) {
            current.providers.push(provider.clone());
        }
    }
    current.features.registration |= incoming.features.registration;
    current.features.forgot_password |= incoming.features.forgot_password;
    current.features.email_verification |= incoming.features.email_verification;
    for (key, value) in &incoming.extra {
        current.extra.insert(key.clone(), value.clone());
    }
}

fn resolve_report_entities(features: &mut [FeatureConfiguration]) {
    let tables: Vec<(String, String)> = features
        .iter()
        .filter_map(|f| Some((f.name.to_lowercase(), f.table_name()?)))
        .collect();

    for feature in features.iter_mut() {
        let FeaturePayload::Analytics(config) = &mut feature.configuration else {
            continue;
        };
        for report in &mut config.reports {
            let Some(entity) = report.entity.as_deref() else {
                continue;
            };
            if tables.iter().any(|(_, table)| table == entity) {
                continue;
            }
            let wanted = entity.to_lowercase();
            if let Some((_, table)) = tables.iter().find(|(display, _)| *display == wanted) {
                tracing::debug!("Report '{}': entity '{}' -> '{}'", report.name, entity, table);
                report.entity = Some(table.clone());
            }
        }
    }
}

/// Lower-cased path without surrounding slashes or a leading `api/`
fn clean_path(path: &str) -> String {
    let path = path.trim_matches('/').to_lowercase();
    match path.strip_prefix("api/") {
        Some(rest) => rest.to_string(),
        None if path == "api" => String::new(),
        None => path,
    }
}

/// The feature a preview request without a schema is aimed at
pub fn resolve_endpoint<'a>(
    features: &'a [FeatureConfiguration],
    endpoint: &str,
) -> Option<&'a FeatureConfiguration> {
    let path = clean_path(endpoint);
    features.iter().find(|feature| match feature.kind {
        FeatureKind::Crud => feature
            .table_name()
            .is_some_and(|table| !table.is_empty() && path.starts_with(&table.to_lowercase())),
        FeatureKind::Functions => feature
            .function_path()
            .is_some_and(|function_path| clean_path(&function_path) == path),
        FeatureKind::Analytics => path.contains("analytics"),
        FeatureKind::Auth => path.starts_with("auth/"),
    })
}

/// One documented request against a feature
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointDoc {
    pub method: String,
    pub path: String,
    pub description: String,
    pub body: Option<Value>,
    pub curl: String,
}

impl EndpointDoc {
    fn new(method: &str, path: String, description: String, body: Option<Value>) -> Self {
        Self {
            method: method.to_string(),
            path,
            description,
            body,
            curl: String::new(),
        }
    }

    fn with_curl(mut self, base_url: &str) -> Self {
        let mut curl = format!(
            "curl -X {} {}/{} \\\n  -H \"Content-Type: application/json\"",
            self.method,
            base_url.trim_end_matches('/'),
            self.path
        );
        if let Some(body) = self.body.as_ref().filter(|b| !is_empty_body(b)) {
            let json = body.to_string().replace('\'', r"'\''");
            curl.push_str(&format!(" \\\n  -d '{json}'"));
        }
        self.curl = curl;
        self
    }
}

fn is_empty_body(body: &Value) -> bool {
    match body {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Example requests for every route a feature exposes
pub fn describe_endpoints(feature: &FeatureConfiguration, base_url: &str) -> Vec<EndpointDoc> {
    let endpoints = match &feature.configuration {
        FeaturePayload::Crud(config) => {
            let table = feature.table_name().unwrap_or_default();
            let example: Map<String, Value> = config
                .fields
                .iter()
                .filter(|f| f.name != "id")
                .map(|f| (f.name.clone(), f.default.clone().unwrap_or_else(|| json!(""))))
                .collect();
            let mut update = example.clone();
            update.insert("id".to_string(), json!(1));

            vec![
                EndpointDoc::new(
                    "POST",
                    table.clone(),
                    format!("Create a new {table}"),
                    Some(Value::Object(example)),
                ),
                EndpointDoc::new("GET", table.clone(), format!("List {table} records"), None),
                EndpointDoc::new(
                    "PUT",
                    format!("{table}/1"),
                    format!("Update {table} record #1"),
                    Some(Value::Object(update)),
                ),
                EndpointDoc::new(
                    "DELETE",
                    format!("{table}/1"),
                    format!("Delete {table} record #1"),
                    None,
                ),
            ]
        }
        FeaturePayload::Auth(config) => {
            let mut register = Map::new();
            register.insert("email".to_string(), json!("user@example.com"));
            register.insert("password".to_string(), json!("password123"));
            for name in config.extra_field_names() {
                register.entry(name.to_string()).or_insert_with(|| json!(""));
            }
            vec![
                EndpointDoc::new(
                    "POST",
                    "auth/register".to_string(),
                    "Register a new user".to_string(),
                    Some(Value::Object(register)),
                ),
                EndpointDoc::new(
                    "POST",
                    "auth/login".to_string(),
                    "Log in and receive an access token".to_string(),
                    Some(json!({"email": "user@example.com", "password": "password123"})),
                ),
                EndpointDoc::new(
                    "GET",
                    "auth/me".to_string(),
                    "Profile of the current user".to_string(),
                    None,
                ),
            ]
        }
        FeaturePayload::Analytics(_) => vec![EndpointDoc::new(
            "GET",
            "analytics/summary".to_string(),
            "Get analytics summary".to_string(),
            None,
        )],
        FeaturePayload::Functions(config) => {
            let path = feature.function_path().unwrap_or_default();
            let method = feature.function_method().unwrap_or_default();
            vec![EndpointDoc::new(
                &method,
                path.trim_start_matches('/').to_string(),
                format!("Execute {}", feature.name),
                Some(config.input_schema.clone().unwrap_or_else(|| json!({}))),
            )]
        }
    };

    endpoints
        .into_iter()
        .map(|endpoint| endpoint.with_curl(base_url))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldType;

    fn feature(name: &str, kind: FeatureKind, configuration: Value) -> FeatureConfiguration {
        FeatureConfiguration::new(name, FeaturePayload::from_value(kind, configuration).unwrap())
    }

    fn books() -> FeatureConfiguration {
        feature(
            "Books",
            FeatureKind::Crud,
            json!({"table": "book", "fields": [{"name": "title", "type": "string", "required": true}]}),
        )
    }

    #[test]
    fn test_auth_proposals_fold_into_single_feature() {
        let existing = vec![feature(
            "Auth",
            FeatureKind::Auth,
            json!({"providers": ["email"], "features": {"registration": true}, "extra_fields": ["phone"]}),
        )];
        let proposed = vec![feature(
            "User Accounts",
            FeatureKind::Auth,
            json!({
                "providers": ["email", "google"],
                "features": {"forgot_password": true},
                "extra_fields": [{"name": "phone", "type": "integer"}, "username"]
            }),
        )];

        let merged = merge_features(existing, proposed);
        assert_eq!(merged.len(), 1);
        let auth = merged[0].auth().unwrap();
        assert_eq!(merged[0].name, "Auth");
        assert_eq!(auth.providers, ["email", "google"]);
        assert!(auth.features.registration);
        assert!(auth.features.forgot_password);
        let names: Vec<&str> = auth.extra_field_names().collect();
        assert_eq!(names, ["phone", "username"]);
        assert_eq!(auth.extra_fields[0].field_type, FieldType::Integer);
    }

    #[test]
    fn test_first_proposed_auth_becomes_the_target() {
        let proposed = vec![
            feature("Auth", FeatureKind::Auth, json!({"extra_fields": ["phone"]})),
            feature("Login", FeatureKind::Auth, json!({"extra_fields": ["city"]})),
        ];
        let merged = merge_features(Vec::new(), proposed);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].auth().unwrap().extra_fields.len(), 2);
    }

    #[test]
    fn test_same_name_replaces_configuration() {
        let mut existing = books();
        existing.id = 7;
        let proposal = feature(
            "Books",
            FeatureKind::Crud,
            json!({"table": "book", "fields": [{"name": "isbn", "type": "string"}]}),
        );
        let merged = merge_features(vec![existing], vec![proposal]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, 7);
        assert_eq!(merged[0].crud().unwrap().fields[0].name, "isbn");
    }

    #[test]
    fn test_report_entity_rewritten_to_table() {
        let proposed = vec![feature(
            "Stats",
            FeatureKind::Analytics,
            json!({"reports": [
                {"name": "Count", "entity": "Books", "type": "count"},
                {"name": "Other", "entity": "book", "type": "count"}
            ]}),
        )];
        let merged = merge_features(vec![books()], proposed);
        let reports = &merged[1].analytics().unwrap().reports;
        assert_eq!(reports[0].entity.as_deref(), Some("book"));
        assert_eq!(reports[1].entity.as_deref(), Some("book"));
    }

    #[test]
    fn test_resolve_endpoint() {
        let features = vec![
            books(),
            feature("Double", FeatureKind::Functions, json!({"path": "/api/double"})),
            feature("Stats", FeatureKind::Analytics, json!({})),
            feature("Auth", FeatureKind::Auth, json!({})),
        ];
        let name = |endpoint: &str| resolve_endpoint(&features, endpoint).map(|f| f.name.as_str());
        assert_eq!(name("/api/book/3"), Some("Books"));
        assert_eq!(name("/api/double"), Some("Double"));
        assert_eq!(name("double/"), Some("Double"));
        assert_eq!(name("/api/analytics/summary"), Some("Stats"));
        assert_eq!(name("/api/auth/login"), Some("Auth"));
        assert_eq!(name("/api/unknown"), None);
    }

    #[test]
    fn test_describe_crud_endpoints() {
        let docs = describe_endpoints(&books(), "http://localhost:8080/api/");
        let methods: Vec<&str> = docs.iter().map(|d| d.method.as_str()).collect();
        assert_eq!(methods, ["POST", "GET", "PUT", "DELETE"]);
        assert_eq!(docs[2].path, "book/1");
        assert_eq!(docs[2].body, Some(json!({"title": "", "id": 1})));
        assert_eq!(
            docs[0].curl,
            "curl -X POST http://localhost:8080/api/book \\\n  -H \"Content-Type: application/json\" \\\n  -d '{\"title\":\"\"}'"
        );
        assert!(!docs[1].curl.contains("-d"));
    }

    #[test]
    fn test_describe_function_endpoint() {
        let function = feature(
            "Greet",
            FeatureKind::Functions,
            json!({"method": "get", "input_schema": {"required": ["name"]}}),
        );
        let docs = describe_endpoints(&function, "http://x");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].method, "GET");
        assert_eq!(docs[0].path, "greet");
        assert_eq!(docs[0].body, Some(json!({"required": ["name"]})));
    }
}
