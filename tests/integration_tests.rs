//! Integration tests for the Feature Forge API
//!
//! These tests drive the full router: feature management, simulation,
//! generation and reverse sync.

use std::io::{Cursor, Read};

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use feature_forge::{AppState, Config, Db, open_database, routes};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

const TEST_USER: &str = "42";

// =============================================================================
// Test Helpers
// =============================================================================

/// Create a test configuration
fn test_config() -> Config {
    Config {
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        database_path: "".to_string(),
        allowed_origins: vec!["http://localhost:5173".to_string()],
        environment: "test".to_string(),
        token_secret: "test-token-secret".to_string(),
        token_ttl_secs: 3600,
        bcrypt_cost: 4,
        function_max_operations: 100_000,
        function_timeout_ms: 2_000,
    }
}

/// Create a test database in a temporary directory
fn create_test_db(temp_dir: &TempDir) -> Db {
    open_database(temp_dir.path().join("test.db")).expect("Failed to create test database")
}

/// Create a test app router
fn create_test_app(db: Db) -> Router {
    routes::router(AppState::new(db, test_config()))
}

/// Parse response body as JSON
async fn body_to_json(body: Body) -> Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Send a JSON request as the test user
async fn send(app: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-user-id", TEST_USER)
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, body_to_json(response.into_body()).await)
}

async fn create_feature(app: &Router, project: &str, name: &str, kind: &str, config: Value) -> Value {
    let (status, body) = send(
        app,
        "POST",
        &format!("/api/projects/{project}/features"),
        json!({"name": name, "kind": kind, "configuration": config}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

fn book_config() -> Value {
    json!({"table": "book", "fields": [{"name": "title", "type": "string", "required": true}]})
}

// =============================================================================
// Health & Identity Tests
// =============================================================================

#[tokio::test]
async fn test_health_check_returns_healthy() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(create_test_db(&temp_dir));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "connected");
}

#[tokio::test]
async fn test_missing_user_header_is_unauthorized() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(create_test_db(&temp_dir));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/projects/1/features")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_to_json(response.into_body()).await;
    assert_eq!(body["error"], "Missing x-user-id header");
}

// =============================================================================
// Feature Management Tests
// =============================================================================

#[tokio::test]
async fn test_create_and_list_features() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(create_test_db(&temp_dir));

    let created = create_feature(&app, "1", "Books", "crud", book_config()).await;
    assert_eq!(created["kind"], "CRUD");
    assert_eq!(created["project_id"], "1");
    create_feature(&app, "1", "Auth", "AUTHENTICATION", json!({})).await;
    create_feature(&app, "2", "Other", "CRUD", book_config()).await;

    let (status, body) = send(&app, "GET", "/api/projects/1/features", Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    let features = body.as_array().unwrap();
    assert_eq!(features.len(), 2);
    assert_eq!(features[0]["name"], "Books");
    assert_eq!(features[1]["kind"], "AUTH");
    assert_eq!(features[1]["configuration"]["auth_type"], "jwt");
}

#[tokio::test]
async fn test_create_feature_rejects_invalid_identifier() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(create_test_db(&temp_dir));

    let (status, body) = send(
        &app,
        "POST",
        "/api/projects/1/features",
        json!({"name": "Books", "kind": "CRUD", "configuration": {"table": "book", "fields": [{"name": "first name"}]}}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("first name"));
}

#[tokio::test]
async fn test_update_and_delete_feature() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(create_test_db(&temp_dir));
    let created = create_feature(&app, "1", "Books", "CRUD", book_config()).await;
    let id = created["id"].as_u64().unwrap();

    let (status, updated) = send(
        &app,
        "PUT",
        &format!("/api/features/{id}"),
        json!({"name": "Novels", "configuration": {"table": "novel", "fields": []}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "Novels");
    assert_eq!(updated["configuration"]["table"], "novel");

    let (status, _) = send(&app, "DELETE", &format!("/api/features/{id}"), Value::Null).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "DELETE", &format!("/api/features/{id}"), Value::Null).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Feature not found");
}

#[tokio::test]
async fn test_feature_endpoints_documentation() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(create_test_db(&temp_dir));
    let created = create_feature(&app, "1", "Books", "CRUD", book_config()).await;
    let id = created["id"].as_u64().unwrap();

    let (status, body) = send(
        &app,
        "GET",
        &format!("/api/features/{id}/endpoints?base_url=http://example.test/api"),
        Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["base_url"], "http://example.test/api");
    let endpoints = body["endpoints"].as_array().unwrap();
    assert_eq!(endpoints.len(), 4);
    assert_eq!(endpoints[0]["method"], "POST");
    assert!(
        endpoints[0]["curl"]
            .as_str()
            .unwrap()
            .starts_with("curl -X POST http://example.test/api/book")
    );
}

// =============================================================================
// Simulation Tests
// =============================================================================

#[tokio::test]
async fn test_crud_simulation_with_inline_schema() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(create_test_db(&temp_dir));

    let (status, body) = send(
        &app,
        "POST",
        "/api/features/test",
        json!({
            "endpoint": "/api/book",
            "method": "POST",
            "body": {"title": "Dune"},
            "schema": book_config(),
            "feature_type": "CRUD",
            "project_id": 1
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"], json!({"title": "Dune", "id": 1}));

    let (status, body) = send(
        &app,
        "POST",
        "/api/features/test",
        json!({"endpoint": "/api/book", "method": "GET", "schema": book_config(), "project_id": "1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["items"], json!([{"title": "Dune", "id": 1}]));
    assert_eq!(body["data"]["count"], 1);
}

#[tokio::test]
async fn test_simulation_resolves_feature_from_endpoint() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(create_test_db(&temp_dir));
    create_feature(&app, "7", "Books", "CRUD", book_config()).await;
    create_feature(
        &app,
        "7",
        "Stats",
        "ANALYTICS",
        json!({"reports": [{"name": "Total books", "entity": "book", "type": "count"}]}),
    )
    .await;

    for title in ["Dune", "Emma"] {
        let (status, _) = send(
            &app,
            "POST",
            "/api/features/test",
            json!({"endpoint": "/api/book", "method": "POST", "body": {"title": title}, "project_id": "7"}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = send(
        &app,
        "POST",
        "/api/features/test",
        json!({"endpoint": "/api/book", "method": "POST", "body": {"genre": "scifi"}, "project_id": "7"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("genre"));

    let (status, body) = send(
        &app,
        "POST",
        "/api/features/test",
        json!({"endpoint": "/api/analytics/summary", "method": "GET", "project_id": "7"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Total books"], 2);
}

#[tokio::test]
async fn test_auth_simulation_rejects_duplicate_email() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(create_test_db(&temp_dir));
    let request = json!({
        "endpoint": "/auth/register",
        "method": "POST",
        "body": {"email": "ada@example.com", "password": "secret"},
        "schema": {"extra_fields": []},
        "feature_type": "AUTH",
        "project_id": "1"
    });

    let (status, _) = send(&app, "POST", "/api/features/test", request.clone()).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(&app, "POST", "/api/features/test", request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        "POST",
        "/api/features/test",
        json!({
            "endpoint": "/auth/login",
            "method": "POST",
            "body": {"email": "ada@example.com", "password": "secret"},
            "schema": {},
            "feature_type": "AUTH",
            "project_id": "1"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["access_token"].as_str().is_some_and(|t| !t.is_empty()));
}

#[tokio::test]
async fn test_function_simulation_by_feature_id() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(create_test_db(&temp_dir));
    let created = create_feature(
        &app,
        "1",
        "Double It",
        "FUNCTIONS",
        json!({"code": "def handler(input_data):\n    return {'result': input_data['n'] * 2}"}),
    )
    .await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/features/test",
        json!({"feature_id": created["id"], "method": "POST", "body": {"n": 21}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["result"], json!({"result": 42}));
}

#[tokio::test]
async fn test_function_resource_abuse_gets_400_envelope() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(create_test_db(&temp_dir));
    let deep = format!("result = {}1{}", "(".repeat(10_000), ")".repeat(10_000));
    let cases = [
        ("Huge Range", "result = range(200000000)".to_string()),
        ("Cycle", "result = []\nresult.append(result)\n".to_string()),
        ("Wide Format", "result = f\"{1:4000000000}\"".to_string()),
        ("Deep Parens", deep),
        ("Deep List", "x = []\nfor i in range(5000):\n    x = [x]\nresult = x\n".to_string()),
    ];

    for (name, code) in cases {
        let created = create_feature(&app, "1", name, "FUNCTIONS", json!({"code": code})).await;
        let (status, body) = send(
            &app,
            "POST",
            "/api/features/test",
            json!({"feature_id": created["id"], "method": "POST", "body": {}}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{name}: {body}");
        assert_eq!(body["success"], false, "{name}: {body}");
        assert!(body["error"].is_string(), "{name}: {body}");
    }
}

#[tokio::test]
async fn test_unknown_feature_type_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(create_test_db(&temp_dir));

    let (status, body) = send(
        &app,
        "POST",
        "/api/features/test",
        json!({"endpoint": "/x", "feature_type": "PAYMENTS", "schema": {"a": 1}}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Unsupported feature type");
}

// =============================================================================
// Refinement Tests
// =============================================================================

#[tokio::test]
async fn test_refine_keeps_single_auth_feature() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(create_test_db(&temp_dir));
    create_feature(&app, "1", "Auth", "AUTH", json!({"extra_fields": ["phone"]})).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/projects/1/refine",
        json!({"features": [
            {"name": "Accounts", "kind": "AUTH", "configuration": {"extra_fields": ["username"]}},
            {"name": "Books", "kind": "CRUD", "configuration": book_config()},
            {"name": "Stats", "kind": "ANALYTICS", "configuration": {"reports": [{"name": "n", "entity": "Books"}]}}
        ]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let features = body["features"].as_array().unwrap();
    assert_eq!(features.len(), 3);
    assert_eq!(features[0]["name"], "Auth");
    assert_eq!(
        features[0]["configuration"]["extra_fields"],
        json!([
            {"name": "phone", "type": "string", "required": false},
            {"name": "username", "type": "string", "required": false}
        ])
    );
    assert_eq!(features[2]["configuration"]["reports"][0]["entity"], "book");

    let (_, listed) = send(&app, "GET", "/api/projects/1/features", Value::Null).await;
    assert_eq!(listed.as_array().unwrap().len(), 3);
}

// =============================================================================
// Generation Tests
// =============================================================================

#[tokio::test]
async fn test_preview_is_deterministic() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(create_test_db(&temp_dir));
    create_feature(&app, "1", "Books", "CRUD", book_config()).await;

    let project = json!({"name": "Library App", "description": "Books"});
    let (status, first) = send(&app, "POST", "/api/projects/1/preview", project.clone()).await;
    assert_eq!(status, StatusCode::OK);
    let (_, second) = send(&app, "POST", "/api/projects/1/preview", project).await;
    assert_eq!(first, second);

    let paths: Vec<&str> = first["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["path"].as_str().unwrap())
        .collect();
    assert!(paths.contains(&"app/models/crud.py"));
    assert!(!paths.contains(&"app/models/user.py"));
    assert_eq!(first["digest"].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn test_download_returns_zip_archive() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(create_test_db(&temp_dir));
    create_feature(&app, "1", "Books", "CRUD", book_config()).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/projects/1/download")
        .header("content-type", "application/json")
        .header("x-user-id", TEST_USER)
        .body(Body::from(json!({"name": "Library App"}).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/zip");
    assert_eq!(
        response.headers()["content-disposition"],
        "attachment; filename=\"library_app.zip\""
    );

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    let mut models = String::new();
    archive
        .by_name("app/models/crud.py")
        .unwrap()
        .read_to_string(&mut models)
        .unwrap();
    assert!(models.contains("class Book(db.Model):"));
}

// =============================================================================
// Sync Tests
// =============================================================================

#[tokio::test]
async fn test_sync_recovers_added_column() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(create_test_db(&temp_dir));
    create_feature(&app, "1", "Book", "CRUD", book_config()).await;

    let (_, preview) = send(&app, "POST", "/api/projects/1/preview", json!({})).await;
    let models = preview["files"]
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["path"] == "app/models/crud.py")
        .and_then(|f| f["content"].as_str())
        .unwrap()
        .to_string();

    let (status, unchanged) = send(
        &app,
        "POST",
        "/api/projects/1/sync",
        json!({"files": {"app/models/crud.py": models}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(unchanged["updated"], json!([]));

    let edited = models.replace(
        "    title = db.Column(db.String(120), nullable=False)\n",
        "    title = db.Column(db.String(120), nullable=False)\n    rating = db.Column(db.Integer)\n",
    );
    let (status, body) = send(
        &app,
        "POST",
        "/api/projects/1/sync",
        json!({"files": {"app/models/crud.py": edited}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], json!(["Book"]));

    let (_, listed) = send(&app, "GET", "/api/projects/1/features", Value::Null).await;
    assert_eq!(
        listed[0]["configuration"]["fields"][1],
        json!({"name": "rating", "type": "integer", "required": false})
    );
}
