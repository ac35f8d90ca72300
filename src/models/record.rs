use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{ANONYMOUS_USER, DEFAULT_PROJECT};

/// A record as returned by the record store: store-assigned id plus payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    pub id: u64,
    pub data: Value,
}

impl StoredRecord {
    /// Field lookup inside the payload
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

/// Caller identity used to derive isolation keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerContext {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl HandlerContext {
    pub fn new(user_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            project_id: Some(project_id.into()),
        }
    }

    pub fn user(&self) -> &str {
        self.user_id
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(ANONYMOUS_USER)
    }

    pub fn project(&self) -> &str {
        self.project_id
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PROJECT)
    }
}

/// Isolation key for the simulated rows of a CRUD table
pub fn crud_feature_key(user: &str, table: &str) -> String {
    format!("crud_{user}_{table}")
}

/// Isolation key for the simulated users of an AUTH feature
pub fn auth_feature_key(user: &str) -> String {
    format!("auth_test_{user}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_defaults() {
        let ctx = HandlerContext::default();
        assert_eq!(ctx.user(), "anon");
        assert_eq!(ctx.project(), "default");
    }

    #[test]
    fn test_feature_keys() {
        assert_eq!(crud_feature_key("42", "book"), "crud_42_book");
        assert_eq!(auth_feature_key("42"), "auth_test_42");
    }
}
