//! Feature interpreter
//!
//! Simulates a configured feature against the record store so the wizard can
//! exercise it before any code is generated. Each feature kind has its own
//! handler; [`handler_for`] picks one from a kind name and [`Interpreter`]
//! runs it inside a single write transaction.

pub mod analytics;
pub mod auth;
pub mod crud;
pub mod functions;

use axum::http::StatusCode;
use serde_json::{Map, Value, json};

use crate::constants::ERR_UNSUPPORTED_FEATURE;
use crate::db::{Db, RecordTxn};
use crate::error::{AppError, Result};
use crate::models::HandlerContext;
use crate::script::Limits;

pub use analytics::AnalyticsHandler;
pub use auth::AuthHandler;
pub use crud::CrudHandler;
pub use functions::FunctionHandler;

/// Runtime knobs shared by every handler
#[derive(Debug, Clone)]
pub struct Settings {
    /// HS256 secret for tokens issued by simulated logins
    pub token_secret: String,
    pub token_ttl_secs: u64,
    pub bcrypt_cost: u32,
    /// Resource ceilings for custom function code
    pub limits: Limits,
}

/// One simulated request against a feature
#[derive(Debug, Clone, Copy)]
pub struct HandlerRequest<'a> {
    pub method: &'a str,
    pub endpoint: &'a str,
    /// Request body, `Null` when none was sent
    pub body: &'a Value,
    /// The feature's configuration payload
    pub schema: Option<&'a Value>,
    pub context: &'a HandlerContext,
}

impl HandlerRequest<'_> {
    /// Upper-cased HTTP method
    pub fn method(&self) -> String {
        self.method.trim().to_ascii_uppercase()
    }

    /// Endpoint without surrounding slashes
    pub fn clean_endpoint(&self) -> &str {
        self.endpoint.trim_matches('/')
    }

    /// The body as a JSON object; anything else reads as empty
    pub fn body_object(&self) -> Map<String, Value> {
        self.body.as_object().cloned().unwrap_or_default()
    }

    /// Trailing numeric path segment (`/api/book/3` → 3)
    pub fn trailing_id(&self) -> Option<TrailingId> {
        let last = self.endpoint.rsplit('/').next()?;
        if last.is_empty() || !last.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(last.parse::<i64>().map_or(TrailingId::OutOfRange, TrailingId::Number))
    }

    /// Deserialize the configuration payload, `Default` when absent
    pub fn config<T>(&self) -> Result<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        match self.schema {
            Some(schema) if !schema.is_null() => Ok(serde_json::from_value(schema.clone())
                .map_err(|e| AppError::Validation(format!("Invalid feature configuration: {e}")))?),
            _ => Ok(T::default()),
        }
    }
}

/// An all-digit last path segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailingId {
    Number(i64),
    /// Too large for an id, so it names no record
    OutOfRange,
}

/// A handler's answer: JSON envelope plus HTTP status
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl HandlerResponse {
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(StatusCode::OK, body)
    }

    /// `{"error": message}` with the given status
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(status, json!({ "error": message.into() }))
    }

    /// `{"status": code, "message": message}` with the same status
    pub fn rejected(status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(
            status,
            json!({ "status": status.as_u16(), "message": message.into() }),
        )
    }

    /// Envelope for a domain error raised while handling
    pub fn from_error(err: &AppError) -> Self {
        Self::new(err.status(), err.to_envelope())
    }
}

/// Contract shared by the per-kind handlers
pub trait FeatureHandler: Send + Sync {
    /// Canonical kind name this handler serves
    fn kind(&self) -> &'static str;

    /// Handle one request against the record store
    ///
    /// Domain failures are answered with an envelope; an `Err` is reserved
    /// for failures of the store itself.
    fn handle(
        &self,
        store: &RecordTxn<'_>,
        settings: &Settings,
        request: &HandlerRequest<'_>,
    ) -> Result<HandlerResponse>;

    /// Answer without the record store, or `None` when the store is needed
    ///
    /// A handler answering here runs with no transaction open.
    fn handle_detached(
        &self,
        _settings: &Settings,
        _request: &HandlerRequest<'_>,
    ) -> Option<Result<HandlerResponse>> {
        None
    }
}

/// Answers every request for an unrecognised kind
pub struct DefaultHandler;

impl DefaultHandler {
    fn unsupported() -> HandlerResponse {
        HandlerResponse::new(
            StatusCode::BAD_REQUEST,
            json!({
                "status": 400,
                "error": ERR_UNSUPPORTED_FEATURE,
                "message": "No handler found for this feature type",
            }),
        )
    }
}

impl FeatureHandler for DefaultHandler {
    fn kind(&self) -> &'static str {
        "UNKNOWN"
    }

    fn handle(
        &self,
        _store: &RecordTxn<'_>,
        _settings: &Settings,
        _request: &HandlerRequest<'_>,
    ) -> Result<HandlerResponse> {
        Ok(Self::unsupported())
    }

    fn handle_detached(
        &self,
        _settings: &Settings,
        _request: &HandlerRequest<'_>,
    ) -> Option<Result<HandlerResponse>> {
        Some(Ok(Self::unsupported()))
    }
}

static CRUD: CrudHandler = CrudHandler;
static AUTH: AuthHandler = AuthHandler;
static ANALYTICS: AnalyticsHandler = AnalyticsHandler;
static FUNCTIONS: FunctionHandler = FunctionHandler;
static DEFAULT: DefaultHandler = DefaultHandler;

static REGISTRY: [&dyn FeatureHandler; 4] = [&CRUD, &AUTH, &ANALYTICS, &FUNCTIONS];

/// Pick the handler for a kind name
///
/// Matching is case-insensitive on the canonical names. An empty kind and the
/// wizard's `manual` and `mixed` kinds are treated as CRUD.
pub fn handler_for(kind: &str) -> &'static dyn FeatureHandler {
    let kind = kind.trim();
    if let Some(handler) = REGISTRY
        .iter()
        .find(|handler| handler.kind().eq_ignore_ascii_case(kind))
    {
        return *handler;
    }
    match kind {
        "" | "manual" | "mixed" => &CRUD,
        _ => &DEFAULT,
    }
}

/// Runs feature handlers against the shared database
#[derive(Clone)]
pub struct Interpreter {
    db: Db,
    settings: Settings,
}

impl Interpreter {
    pub fn new(db: Db, settings: Settings) -> Self {
        Self { db, settings }
    }

    /// Handle one request for a feature of the given kind
    ///
    /// Store-backed handlers run inside one write transaction. It is committed
    /// unless the store failed, in which case nothing the handler wrote survives.
    pub fn execute(&self, kind: &str, request: &HandlerRequest<'_>) -> Result<HandlerResponse> {
        let handler = handler_for(kind);
        tracing::debug!(
            "Simulating {} {} with the {} handler",
            request.method,
            request.endpoint,
            handler.kind()
        );

        if let Some(outcome) = handler.handle_detached(&self.settings, request) {
            return match outcome {
                Err(err) if err.is_storage() => Err(err),
                outcome => Ok(outcome.unwrap_or_else(|err| HandlerResponse::from_error(&err))),
            };
        }

        let write_txn = self.db.begin_write()?;
        let outcome = handler.handle(&RecordTxn::new(&write_txn), &self.settings, request);

        match outcome {
            Err(err) if err.is_storage() => {
                tracing::error!("Feature simulation failed, rolling back: {:?}", err);
                write_txn.abort()?;
                Err(err)
            }
            outcome => {
                write_txn.commit()?;
                Ok(outcome.unwrap_or_else(|err| HandlerResponse::from_error(&err)))
            }
        }
    }
}

/// Python truthiness of a JSON value
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Equality the way Python compares decoded JSON: `1 == 1.0`
pub(crate) fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

/// Comma-separated list used in validation messages
pub(crate) fn join_names<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    names.into_iter().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
pub(crate) fn test_settings() -> Settings {
    Settings {
        token_secret: "test-secret".to_string(),
        token_ttl_secs: 3600,
        // cost 4 for fast tests
        bcrypt_cost: 4,
        limits: Limits::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    #[test]
    fn test_registry_lookup() {
        assert_eq!(handler_for("crud").kind(), "CRUD");
        assert_eq!(handler_for("Auth").kind(), "AUTH");
        assert_eq!(handler_for("ANALYTICS").kind(), "ANALYTICS");
        assert_eq!(handler_for("functions").kind(), "FUNCTIONS");
        assert_eq!(handler_for("").kind(), "CRUD");
        assert_eq!(handler_for("manual").kind(), "CRUD");
        assert_eq!(handler_for("mixed").kind(), "CRUD");
        assert_eq!(handler_for("webhooks").kind(), "UNKNOWN");
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let interpreter = Interpreter::new(open_in_memory().unwrap(), test_settings());
        let context = HandlerContext::default();
        let request = HandlerRequest {
            method: "GET",
            endpoint: "/api/hooks",
            body: &Value::Null,
            schema: None,
            context: &context,
        };
        let response = interpreter.execute("webhooks", &request).unwrap();
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.body["error"], ERR_UNSUPPORTED_FEATURE);
    }

    #[test]
    fn test_trailing_id() {
        let context = HandlerContext::default();
        let request = |endpoint| HandlerRequest {
            method: "get",
            endpoint,
            body: &Value::Null,
            schema: None,
            context: &context,
        };
        assert_eq!(request("/api/book/12").trailing_id(), Some(TrailingId::Number(12)));
        assert_eq!(
            request("/api/book/99999999999999999999").trailing_id(),
            Some(TrailingId::OutOfRange)
        );
        assert_eq!(request("/api/book").trailing_id(), None);
        assert_eq!(request("/api/book/12/").trailing_id(), None);
        assert_eq!(request("/api/book/").method(), "GET");
    }

    #[test]
    fn test_python_value_helpers() {
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!(3)));
        assert!(loosely_equal(&json!(1), &json!(1.0)));
        assert!(!loosely_equal(&json!(1), &json!("1")));
    }
}
