use axum::http::StatusCode;
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::constants::{AUTH_CORE_FIELDS, ERR_INVALID_CREDENTIALS};
use crate::db::RecordTxn;
use crate::error::Result;
use crate::interpreter::{
    FeatureHandler, HandlerRequest, HandlerResponse, Settings, is_truthy, join_names, loosely_equal,
};
use crate::models::{AuthConfig, StoredRecord, auth_feature_key};

/// Claims of a token issued by a simulated login
#[derive(Debug, Serialize)]
struct Claims {
    user_id: Value,
    exp: i64,
}

/// Simulates register, login and profile endpoints
pub struct AuthHandler;

impl FeatureHandler for AuthHandler {
    fn kind(&self) -> &'static str {
        "AUTH"
    }

    fn handle(
        &self,
        store: &RecordTxn<'_>,
        settings: &Settings,
        request: &HandlerRequest<'_>,
    ) -> Result<HandlerResponse> {
        let config: AuthConfig = request.config()?;
        let users = Users {
            store,
            key: auth_feature_key(request.context.user()),
            project: request.context.project(),
            config: &config,
            settings,
        };

        let endpoint = request.clean_endpoint();
        if endpoint.contains("register") {
            users.register(request.body_object())
        } else if endpoint.contains("login") {
            users.login(request.body_object())
        } else if endpoint.contains("profile") || endpoint.contains("me") {
            users.profile()
        } else {
            Ok(HandlerResponse::new(
                StatusCode::NOT_FOUND,
                json!({
                    "status": 404,
                    "error": "Endpoint not found",
                    "message": format!(
                        "Auth endpoint '{}' not recognized. Try /api/auth/register, /api/auth/login, or /api/auth/profile",
                        request.endpoint
                    ),
                }),
            ))
        }
    }
}

fn non_empty_str<'a>(body: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    body.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Strip the password hash before a user leaves the handler
fn sanitize(record: &StoredRecord) -> Value {
    let mut data = record.data.clone();
    if let Some(object) = data.as_object_mut() {
        object.shift_remove("password_hash");
    }
    data
}

struct Users<'s, 't> {
    store: &'s RecordTxn<'t>,
    key: String,
    project: &'s str,
    config: &'s AuthConfig,
    settings: &'s Settings,
}

impl Users<'_, '_> {
    fn register(&self, body: Map<String, Value>) -> Result<HandlerResponse> {
        let (Some(email), Some(password)) =
            (non_empty_str(&body, "email"), non_empty_str(&body, "password"))
        else {
            return Ok(HandlerResponse::error(
                StatusCode::BAD_REQUEST,
                "Email and password are required",
            ));
        };

        let unexpected: Vec<&str> = body
            .keys()
            .map(String::as_str)
            .filter(|key| {
                !matches!(*key, "email" | "password") && !self.config.extra_field_names().any(|n| n == *key)
            })
            .collect();
        if !unexpected.is_empty() {
            return Ok(HandlerResponse::rejected(
                StatusCode::BAD_REQUEST,
                format!("Unexpected fields: {}", join_names(unexpected)),
            ));
        }

        let missing: Vec<&str> = self
            .config
            .extra_fields
            .iter()
            .filter(|field| field.required && !body.contains_key(&field.name))
            .map(|field| field.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Ok(HandlerResponse::rejected(
                StatusCode::BAD_REQUEST,
                format!("Missing required fields: {}", join_names(missing)),
            ));
        }

        let users = self.store.query(&self.key, self.project)?;
        let email_value = json!(email);
        let username = body.get("username").filter(|u| !u.is_null());
        for user in &users {
            if user.get("email").is_some_and(|e| loosely_equal(e, &email_value)) {
                return Ok(HandlerResponse::error(
                    StatusCode::BAD_REQUEST,
                    "Email already exists",
                ));
            }
            if self.config.has_username()
                && let Some(username) = username
                && user.get("username").is_some_and(|u| loosely_equal(u, username))
            {
                return Ok(HandlerResponse::error(
                    StatusCode::BAD_REQUEST,
                    "Username already exists",
                ));
            }
        }

        let password_hash = bcrypt::hash(password, self.settings.bcrypt_cost)?;

        let mut user = Map::new();
        user.insert("id".to_string(), json!(users.len() + 1));
        user.insert("email".to_string(), email_value);
        user.insert("password_hash".to_string(), json!(password_hash));
        user.insert("created_at".to_string(), json!(Utc::now().to_rfc3339()));
        for name in self.config.extra_field_names() {
            if AUTH_CORE_FIELDS.contains(&name) {
                continue;
            }
            user.insert(
                name.to_string(),
                body.get(name).cloned().unwrap_or(Value::Null),
            );
        }

        let data = Value::Object(user);
        let id = self.store.insert(&self.key, self.project, &data)?;
        tracing::debug!("Registered simulated user under {}", self.key);

        Ok(HandlerResponse::new(
            StatusCode::CREATED,
            json!({
                "message": "User registered in test environment",
                "user": sanitize(&StoredRecord { id, data }),
            }),
        ))
    }

    fn login(&self, body: Map<String, Value>) -> Result<HandlerResponse> {
        let email = non_empty_str(&body, "email");
        let username = if self.config.has_username() {
            body.get("username").filter(|u| is_truthy(u))
        } else {
            None
        };
        let password = non_empty_str(&body, "password");

        let (Some(password), true) = (password, email.is_some() || username.is_some()) else {
            let message = if self.config.has_username() {
                "Email or username and password are required"
            } else {
                "Email and password are required"
            };
            return Ok(HandlerResponse::error(StatusCode::BAD_REQUEST, message));
        };

        let email = email.map(|e| json!(e));
        let user = self.store.query(&self.key, self.project)?.into_iter().find(|user| {
            let by_email = email
                .as_ref()
                .is_some_and(|e| user.get("email").is_some_and(|v| loosely_equal(v, e)));
            let by_username =
                username.is_some_and(|u| user.get("username").is_some_and(|v| loosely_equal(v, u)));
            by_email || by_username
        });

        let Some(user) = user.filter(|user| self.verify(user, password)) else {
            return Ok(HandlerResponse::error(
                StatusCode::UNAUTHORIZED,
                ERR_INVALID_CREDENTIALS,
            ));
        };

        let claims = Claims {
            user_id: user.get("id").cloned().unwrap_or(Value::Null),
            exp: Utc::now().timestamp() + self.settings.token_ttl_secs as i64,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.settings.token_secret.as_bytes()),
        )?;

        Ok(HandlerResponse::ok(json!({
            "message": "Login successful (test environment)",
            "access_token": token,
            "user": sanitize(&user),
        })))
    }

    fn verify(&self, user: &StoredRecord, password: &str) -> bool {
        let Some(hash) = user.get("password_hash").and_then(Value::as_str) else {
            return false;
        };
        bcrypt::verify(password, hash)
            .inspect_err(|e| tracing::warn!("Stored password hash for {} is unusable: {}", self.key, e))
            .unwrap_or(false)
    }

    /// The most recently registered user stands in for "the current user"
    fn profile(&self) -> Result<HandlerResponse> {
        match self.store.last(&self.key, self.project)? {
            Some(user) => Ok(HandlerResponse::ok(json!({ "user": sanitize(&user) }))),
            None => Ok(HandlerResponse::error(
                StatusCode::NOT_FOUND,
                "No users found in test environment",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::interpreter::{Interpreter, test_settings};
    use crate::models::HandlerContext;
    use jsonwebtoken::{DecodingKey, Validation, decode};

    fn call(interpreter: &Interpreter, schema: &Value, endpoint: &str, body: Value) -> HandlerResponse {
        let context = HandlerContext::new("7", "p1");
        let request = HandlerRequest {
            method: "POST",
            endpoint,
            body: &body,
            schema: Some(schema),
            context: &context,
        };
        interpreter.execute("AUTH", &request).unwrap()
    }

    fn interpreter() -> Interpreter {
        Interpreter::new(open_in_memory().unwrap(), test_settings())
    }

    #[test]
    fn test_register_login_profile() {
        let interpreter = interpreter();
        let schema = json!({"extra_fields": ["phone"]});

        let registered = call(
            &interpreter,
            &schema,
            "/api/auth/register",
            json!({"email": "ada@example.com", "password": "secret", "phone": "555"}),
        );
        assert_eq!(registered.status, StatusCode::CREATED);
        assert_eq!(registered.body["user"]["id"], 1);
        assert_eq!(registered.body["user"]["phone"], "555");
        assert!(registered.body["user"].get("password_hash").is_none());
        assert!(registered.body["user"]["created_at"].is_string());

        let login = call(
            &interpreter,
            &schema,
            "/api/auth/login",
            json!({"email": "ada@example.com", "password": "secret"}),
        );
        assert_eq!(login.status, StatusCode::OK);
        let token = login.body["access_token"].as_str().unwrap();
        let decoded = decode::<Value>(
            token,
            &DecodingKey::from_secret(b"test-secret"),
            &Validation::default(),
        )
        .unwrap();
        assert_eq!(decoded.claims["user_id"], 1);

        let profile = call(&interpreter, &schema, "/api/auth/me", Value::Null);
        assert_eq!(profile.status, StatusCode::OK);
        assert_eq!(profile.body["user"]["email"], "ada@example.com");
    }

    #[test]
    fn test_duplicate_email_is_rejected() {
        let interpreter = interpreter();
        let schema = json!({});
        let body = json!({"email": "ada@example.com", "password": "secret"});
        call(&interpreter, &schema, "/auth/register", body.clone());
        let again = call(&interpreter, &schema, "/auth/register", body);
        assert_eq!(again.status, StatusCode::BAD_REQUEST);
        assert_eq!(again.body["error"], "Email already exists");
    }

    #[test]
    fn test_register_validation() {
        let interpreter = interpreter();
        let schema = json!({"extra_fields": [{"name": "username", "type": "string", "required": true}]});

        let response = call(&interpreter, &schema, "/auth/register", json!({"email": "a@b.c"}));
        assert_eq!(response.status, StatusCode::BAD_REQUEST);

        let response = call(
            &interpreter,
            &schema,
            "/auth/register",
            json!({"email": "a@b.c", "password": "pw", "username": "ada", "age": 3}),
        );
        assert_eq!(response.body["message"], "Unexpected fields: age");

        let response = call(
            &interpreter,
            &schema,
            "/auth/register",
            json!({"email": "a@b.c", "password": "pw"}),
        );
        assert_eq!(response.body["message"], "Missing required fields: username");
    }

    #[test]
    fn test_username_login_and_duplicate() {
        let interpreter = interpreter();
        let schema = json!({"extra_fields": ["username"]});
        call(
            &interpreter,
            &schema,
            "/auth/register",
            json!({"email": "a@b.c", "password": "pw", "username": "ada"}),
        );

        let duplicate = call(
            &interpreter,
            &schema,
            "/auth/register",
            json!({"email": "other@b.c", "password": "pw", "username": "ada"}),
        );
        assert_eq!(duplicate.body["error"], "Username already exists");

        let login = call(
            &interpreter,
            &schema,
            "/auth/login",
            json!({"username": "ada", "password": "pw"}),
        );
        assert_eq!(login.status, StatusCode::OK);

        let wrong = call(
            &interpreter,
            &schema,
            "/auth/login",
            json!({"username": "ada", "password": "nope"}),
        );
        assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong.body["error"], ERR_INVALID_CREDENTIALS);
    }

    #[test]
    fn test_profile_without_users_and_unknown_endpoint() {
        let interpreter = interpreter();
        let schema = json!({});
        assert_eq!(
            call(&interpreter, &schema, "/auth/profile", Value::Null).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            call(&interpreter, &schema, "/auth/logout", Value::Null).status,
            StatusCode::NOT_FOUND
        );
    }
}
