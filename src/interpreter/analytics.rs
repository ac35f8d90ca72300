use std::sync::LazyLock;

use axum::http::StatusCode;
use regex::{Captures, Regex};
use serde_json::{Map, Value, json};

use crate::constants::ERR_EXPRESSION_CHARACTERS;
use crate::db::RecordTxn;
use crate::error::Result;
use crate::interpreter::{FeatureHandler, HandlerRequest, HandlerResponse, Settings};
use crate::models::{Aggregate, AnalyticsConfig, Report, ReportMode, crud_feature_key};
use crate::script::{self, Limits};

static AGGREGATE_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(count|sum|avg|max|min)\s*\((.*?)\)").expect("aggregate pattern is valid")
});

static ARITHMETIC_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\d.+\-*/()\s]+$").expect("arithmetic pattern is valid"));

/// Computes report values over the simulated rows of CRUD tables
pub struct AnalyticsHandler;

impl FeatureHandler for AnalyticsHandler {
    fn kind(&self) -> &'static str {
        "ANALYTICS"
    }

    fn handle(
        &self,
        store: &RecordTxn<'_>,
        settings: &Settings,
        request: &HandlerRequest<'_>,
    ) -> Result<HandlerResponse> {
        let endpoint = request.clean_endpoint();
        let is_summary = endpoint.contains("summary") || endpoint.contains("stats");
        if !is_summary && request.method() != "GET" {
            return Ok(HandlerResponse::new(
                StatusCode::NOT_FOUND,
                json!({
                    "error": "Analytics endpoint not recognized or method not allowed",
                    "endpoint": request.endpoint,
                }),
            ));
        }

        if request.schema.is_none_or(|schema| !crate::interpreter::is_truthy(schema)) {
            return Ok(HandlerResponse::error(
                StatusCode::BAD_REQUEST,
                "No configuration found for Analytics",
            ));
        }
        let config: AnalyticsConfig = request.config()?;

        let mut results = Map::new();
        for report in &config.reports {
            let Some(entity) = report.entity() else {
                continue;
            };
            let key = crud_feature_key(request.context.user(), entity);
            let rows: Vec<Value> = store
                .query(&key, request.context.project())?
                .into_iter()
                .map(|record| record.data)
                .collect();
            results.insert(report.name.clone(), compute_report(report, &rows, settings.limits));
        }

        Ok(HandlerResponse::ok(Value::Object(results)))
    }
}

/// Value of one report over the given rows
pub fn compute_report(report: &Report, rows: &[Value], limits: Limits) -> Value {
    match report.mode {
        ReportMode::Advanced => {
            let expression = report.expression.as_deref().unwrap_or("").to_lowercase();
            evaluate_expression(&expression, rows, limits)
        }
        ReportMode::Simple => match report.group_by() {
            Some(group_by) => grouped_aggregate(report.aggregate, report.field_or_id(), group_by, rows),
            None => simple_aggregate(report.aggregate, report.field_or_id(), rows),
        },
    }
}

/// Aggregate a field over rows; non-numeric values are ignored
pub fn simple_aggregate(aggregate: Aggregate, field: &str, rows: &[Value]) -> Value {
    if aggregate == Aggregate::Count {
        return json!(rows.len());
    }

    // booleans count as numbers, the way Python treats them
    let values: Vec<&Value> = rows
        .iter()
        .filter_map(|row| row.get(field))
        .filter(|v| v.is_number() || v.is_boolean())
        .collect();
    if values.is_empty() {
        return json!(0);
    }

    match aggregate {
        Aggregate::Count => json!(values.len()),
        Aggregate::Sum => sum(&values),
        Aggregate::Avg => json!(values.iter().map(|v| as_f64(v)).sum::<f64>() / values.len() as f64),
        Aggregate::Max => extreme(&values, |candidate, best| candidate > best),
        Aggregate::Min => extreme(&values, |candidate, best| candidate < best),
    }
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Bool(b) => f64::from(u8::from(*b)),
        other => other.as_f64().unwrap_or(0.0),
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Bool(b) => Some(i64::from(*b)),
        other => other.as_i64(),
    }
}

/// Integer sum while every value is an integer, float sum otherwise
fn sum(values: &[&Value]) -> Value {
    let integers: Option<i64> = values
        .iter()
        .try_fold(0i64, |total, v| as_i64(v).and_then(|i| total.checked_add(i)));
    match integers {
        Some(total) => json!(total),
        None => json!(values.iter().map(|v| as_f64(v)).sum::<f64>()),
    }
}

/// First value that beats every other under `better`
fn extreme(values: &[&Value], better: impl Fn(f64, f64) -> bool) -> Value {
    let mut best = values[0];
    for value in &values[1..] {
        if better(as_f64(value), as_f64(best)) {
            best = value;
        }
    }
    best.clone()
}

/// Aggregate per distinct value of `group_by`, keyed by its Python `str()`
pub fn grouped_aggregate(aggregate: Aggregate, field: &str, group_by: &str, rows: &[Value]) -> Value {
    let mut groups: Vec<(String, Vec<Value>)> = Vec::new();
    for row in rows {
        let key = match row.get(group_by) {
            Some(value) => python_str(value),
            None => "None".to_string(),
        };
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(row.clone()),
            None => groups.push((key, vec![row.clone()])),
        }
    }

    Value::Object(
        groups
            .into_iter()
            .map(|(key, members)| (key, simple_aggregate(aggregate, field, &members)))
            .collect(),
    )
}

/// Substitute aggregate calls with their values, then evaluate the arithmetic
///
/// Failures are reported as string values rather than errors so one bad
/// report does not hide the others.
pub fn evaluate_expression(expression: &str, rows: &[Value], limits: Limits) -> Value {
    if expression.is_empty() {
        return json!(0);
    }

    let processed = AGGREGATE_CALL.replace_all(expression, |caps: &Captures| {
        let field = match &caps[2] {
            "" | "*" => "id",
            field => field,
        };
        let aggregate = Aggregate::parse(&caps[1]).unwrap_or_default();
        python_str(&simple_aggregate(aggregate, field, rows))
    });

    if !ARITHMETIC_ONLY.is_match(&processed) {
        return json!(ERR_EXPRESSION_CHARACTERS);
    }

    match script::evaluate_expression(&processed, limits) {
        Ok(value) => value,
        Err(err) => json!(format!("Error evaluating expression: {err}")),
    }
}

/// Python `str()` of a decoded JSON value
fn python_str(value: &Value) -> String {
    // decoded JSON is acyclic and shallower than the nesting ceiling
    script::Value::from_json(value)
        .to_str(usize::MAX)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::interpreter::{Interpreter, test_settings};
    use crate::models::HandlerContext;

    fn rows() -> Vec<Value> {
        vec![
            json!({"id": 1, "price": 10, "genre": "scifi", "in_stock": true}),
            json!({"id": 2, "price": 2.5, "genre": "drama", "in_stock": false}),
            json!({"id": 3, "price": "n/a", "genre": "scifi"}),
        ]
    }

    #[test]
    fn test_simple_aggregates() {
        let rows = rows();
        assert_eq!(simple_aggregate(Aggregate::Count, "id", &rows), json!(3));
        assert_eq!(simple_aggregate(Aggregate::Sum, "id", &rows), json!(6));
        assert_eq!(simple_aggregate(Aggregate::Sum, "price", &rows), json!(12.5));
        assert_eq!(simple_aggregate(Aggregate::Avg, "id", &rows), json!(2.0));
        assert_eq!(simple_aggregate(Aggregate::Max, "price", &rows), json!(10));
        assert_eq!(simple_aggregate(Aggregate::Min, "price", &rows), json!(2.5));
        assert_eq!(simple_aggregate(Aggregate::Sum, "missing", &rows), json!(0));
        assert_eq!(simple_aggregate(Aggregate::Sum, "in_stock", &rows), json!(1));
    }

    #[test]
    fn test_grouped_aggregate_uses_python_keys() {
        let rows = rows();
        assert_eq!(
            grouped_aggregate(Aggregate::Count, "id", "genre", &rows),
            json!({"scifi": 2, "drama": 1})
        );
        assert_eq!(
            grouped_aggregate(Aggregate::Count, "id", "in_stock", &rows),
            json!({"True": 1, "False": 1, "None": 1})
        );
    }

    #[test]
    fn test_expressions() {
        let rows = rows();
        let limits = Limits::default();
        assert_eq!(evaluate_expression("sum(id) / count(*)", &rows, limits), json!(2.0));
        assert_eq!(evaluate_expression("max(id) - min(id) + 1", &rows, limits), json!(3));
        assert_eq!(evaluate_expression("", &rows, limits), json!(0));
        assert_eq!(
            evaluate_expression("count(id) + __import__('os')", &rows, limits),
            json!(ERR_EXPRESSION_CHARACTERS)
        );
        assert_eq!(
            evaluate_expression("count(id) / 0", &rows, limits),
            json!("Error evaluating expression: division by zero")
        );
    }

    #[test]
    fn test_deeply_nested_expression_is_reported() {
        let rows = rows();
        let deep = format!("{}count(id){}", "(".repeat(100_000), ")".repeat(100_000));
        let value = evaluate_expression(&deep, &rows, Limits::default());
        let message = value.as_str().unwrap_or_default();
        assert!(
            message.starts_with("Error evaluating expression: too many nested expressions"),
            "{message}"
        );

        let nested = format!("{}count(id){}", "(".repeat(20), ")".repeat(20));
        assert_eq!(evaluate_expression(&nested, &rows, Limits::default()), json!(3));
    }

    #[test]
    fn test_summary_reads_crud_rows() {
        let interpreter = Interpreter::new(open_in_memory().unwrap(), test_settings());
        let context = HandlerContext::new("7", "p1");

        let crud_schema = json!({"table": "book", "fields": [{"name": "title", "type": "string"}]});
        for title in ["Dune", "Emma"] {
            let body = json!({ "title": title });
            let request = HandlerRequest {
                method: "POST",
                endpoint: "/api/book",
                body: &body,
                schema: Some(&crud_schema),
                context: &context,
            };
            interpreter.execute("CRUD", &request).unwrap();
        }

        let schema = json!({"reports": [
            {"name": "Books", "entity": "book", "type": "count"},
            {"name": "Skipped"}
        ]});
        let request = HandlerRequest {
            method: "GET",
            endpoint: "/api/analytics/summary",
            body: &Value::Null,
            schema: Some(&schema),
            context: &context,
        };
        let response = interpreter.execute("ANALYTICS", &request).unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, json!({"Books": 2}));
    }

    #[test]
    fn test_routing_and_missing_schema() {
        let interpreter = Interpreter::new(open_in_memory().unwrap(), test_settings());
        let context = HandlerContext::default();
        let request = HandlerRequest {
            method: "POST",
            endpoint: "/api/analytics/export",
            body: &Value::Null,
            schema: None,
            context: &context,
        };
        assert_eq!(
            interpreter.execute("ANALYTICS", &request).unwrap().status,
            StatusCode::NOT_FOUND
        );

        let request = HandlerRequest {
            method: "GET",
            ..request
        };
        let response = interpreter.execute("ANALYTICS", &request).unwrap();
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.body["error"], "No configuration found for Analytics");
    }
}
