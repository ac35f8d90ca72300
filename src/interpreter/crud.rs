use axum::http::StatusCode;
use serde_json::{Map, Value, json};

use crate::db::RecordTxn;
use crate::error::Result;
use crate::interpreter::{
    FeatureHandler, HandlerRequest, HandlerResponse, Settings, TrailingId, is_truthy, join_names,
    loosely_equal,
};
use crate::models::{CrudConfig, StoredRecord, crud_feature_key};

/// Simulates a table's REST resource
pub struct CrudHandler;

impl FeatureHandler for CrudHandler {
    fn kind(&self) -> &'static str {
        "CRUD"
    }

    fn handle(
        &self,
        store: &RecordTxn<'_>,
        _settings: &Settings,
        request: &HandlerRequest<'_>,
    ) -> Result<HandlerResponse> {
        let config: CrudConfig = request.config()?;
        let table = match (request.schema, config.table.as_str()) {
            (None, _) => "default".to_string(),
            (Some(_), "") => "default_table".to_string(),
            (Some(_), table) => table.to_string(),
        };

        let resource = resource_segment(request.clean_endpoint());
        if !resource.eq_ignore_ascii_case(&table) {
            return Ok(HandlerResponse::new(
                StatusCode::NOT_FOUND,
                json!({
                    "status": 404,
                    "error": "Not Found",
                    "message": format!("Endpoint '{}' does not match table '{table}'", request.endpoint),
                }),
            ));
        }

        let resource = Resource {
            store,
            key: crud_feature_key(request.context.user(), &table),
            project: request.context.project(),
            config: &config,
        };

        match request.method().as_str() {
            "GET" => resource.read(request.trailing_id()),
            "POST" => resource.create(request.body_object()),
            "PUT" => resource.replace(request.body_object()),
            "DELETE" => resource.delete(request.trailing_id()),
            _ => Ok(HandlerResponse::error(
                StatusCode::BAD_REQUEST,
                "Method not supported",
            )),
        }
    }
}

/// Path segment naming the resource: the one after an `api` prefix, else the first
fn resource_segment(clean_endpoint: &str) -> &str {
    let mut parts = clean_endpoint.split('/');
    let first = parts.next().unwrap_or("");
    match parts.next() {
        Some(second) if first == "api" => second,
        _ => first,
    }
}

fn display_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

struct Resource<'s, 't> {
    store: &'s RecordTxn<'t>,
    key: String,
    project: &'s str,
    config: &'s CrudConfig,
}

impl Resource<'_, '_> {
    fn records(&self) -> Result<Vec<StoredRecord>> {
        self.store.query(&self.key, self.project)
    }

    fn find(&self, id: &Value) -> Result<Option<StoredRecord>> {
        Ok(self
            .records()?
            .into_iter()
            .find(|record| record.get("id").is_some_and(|v| loosely_equal(v, id))))
    }

    /// Keep only declared fields and `id`
    fn project_fields(&self, data: &Value) -> Value {
        let projected: Map<String, Value> = data
            .as_object()
            .map(|object| {
                object
                    .iter()
                    .filter(|(key, _)| key.as_str() == "id" || self.config.field_names().any(|f| f == key.as_str()))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Value::Object(projected)
    }

    fn unexpected_fields(&self, body: &Map<String, Value>) -> Option<HandlerResponse> {
        let unexpected: Vec<&str> = body
            .keys()
            .map(String::as_str)
            .filter(|key| *key != "id" && !self.config.field_names().any(|f| f == *key))
            .collect();
        if unexpected.is_empty() {
            return None;
        }
        Some(HandlerResponse::rejected(
            StatusCode::BAD_REQUEST,
            format!("Unexpected fields: {}", join_names(unexpected)),
        ))
    }

    fn read(&self, id: Option<TrailingId>) -> Result<HandlerResponse> {
        let id = match id {
            Some(TrailingId::OutOfRange) => {
                return Ok(HandlerResponse::error(StatusCode::NOT_FOUND, "Not found"));
            }
            Some(TrailingId::Number(id)) => Some(id),
            None => None,
        };
        let items: Vec<Value> = self
            .records()?
            .iter()
            .map(|record| self.project_fields(&record.data))
            .collect();

        if let Some(id) = id {
            let target = json!(id);
            return Ok(
                match items
                    .into_iter()
                    .find(|item| item.get("id").is_some_and(|v| loosely_equal(v, &target)))
                {
                    Some(found) => HandlerResponse::ok(json!({
                        "status": 200,
                        "data": found,
                        "message": format!("Record {id} retrieved"),
                    })),
                    None => HandlerResponse::error(StatusCode::NOT_FOUND, "Not found"),
                },
            );
        }

        let count = items.len();
        Ok(HandlerResponse::ok(json!({
            "status": 200,
            "data": {"items": items, "count": count},
            "message": format!("Retrieved {count} records"),
        })))
    }

    fn create(&self, mut body: Map<String, Value>) -> Result<HandlerResponse> {
        if let Some(rejected) = self.unexpected_fields(&body) {
            return Ok(rejected);
        }

        let missing: Vec<&str> = self
            .config
            .required_fields()
            .filter(|field| !body.contains_key(*field))
            .collect();
        if !missing.is_empty() {
            return Ok(HandlerResponse::rejected(
                StatusCode::BAD_REQUEST,
                format!("Missing required fields: {}", join_names(missing)),
            ));
        }

        // Ids follow the record count, so a delete followed by an insert can reuse one
        if !body.get("id").is_some_and(is_truthy) {
            let next = self.store.count(&self.key, self.project)? + 1;
            body.insert("id".to_string(), json!(next));
        }

        let data = Value::Object(body);
        self.store.insert(&self.key, self.project, &data)?;

        Ok(HandlerResponse::new(
            StatusCode::CREATED,
            json!({
                "status": 201,
                "data": data,
                "message": "Resource created and stored permanently",
            }),
        ))
    }

    fn replace(&self, body: Map<String, Value>) -> Result<HandlerResponse> {
        if let Some(rejected) = self.unexpected_fields(&body) {
            return Ok(rejected);
        }

        let target = body.get("id").filter(|id| is_truthy(id)).cloned();
        if let Some(target) = target
            && let Some(record) = self.find(&target)?
        {
            let data = Value::Object(body);
            self.store.update(&self.key, self.project, record.id, &data)?;
            return Ok(HandlerResponse::ok(json!({
                "status": 200,
                "data": data,
                "message": format!("Resource {} updated", display_id(&target)),
            })));
        }

        Ok(HandlerResponse::error(
            StatusCode::NOT_FOUND,
            "Resource not found or ID missing",
        ))
    }

    fn delete(&self, id: Option<TrailingId>) -> Result<HandlerResponse> {
        if let Some(TrailingId::Number(id)) = id
            && let Some(record) = self.find(&json!(id))?
        {
            self.store.delete(&self.key, self.project, record.id)?;
            return Ok(HandlerResponse::ok(json!({
                "status": 204,
                "data": {},
                "message": format!("Resource {id} deleted"),
            })));
        }

        Ok(HandlerResponse::error(StatusCode::NOT_FOUND, "Resource not found"))
    }
}
