use std::env;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BCRYPT_COST, DEFAULT_FUNCTION_MAX_OPERATIONS, DEFAULT_FUNCTION_TIMEOUT_MS,
    DEFAULT_TOKEN_TTL_SECS, IN_MEMORY_DATABASE,
};
use crate::script::Limits;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub database_path: String,
    pub allowed_origins: Vec<String>,
    pub environment: String,
    /// Secret used to sign tokens issued by simulated AUTH features
    pub token_secret: String,
    pub token_ttl_secs: u64,
    pub bcrypt_cost: u32,
    pub function_max_operations: u64,
    pub function_timeout_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        // Load .env file if it exists (development)
        dotenvy::dotenv().ok();

        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| "Invalid SERVER_PORT")?;

        let database_path =
            env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/feature-forge.db".to_string());

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let token_secret = env::var("TOKEN_SECRET")
            .map_err(|_| "TOKEN_SECRET must be set for signing test tokens")?;

        let token_ttl_secs = env::var("TOKEN_TTL_SECS")
            .unwrap_or_else(|_| DEFAULT_TOKEN_TTL_SECS.to_string())
            .parse()
            .map_err(|_| "Invalid TOKEN_TTL_SECS")?;

        let bcrypt_cost = env::var("BCRYPT_COST")
            .unwrap_or_else(|_| DEFAULT_BCRYPT_COST.to_string())
            .parse()
            .map_err(|_| "Invalid BCRYPT_COST")?;

        let function_max_operations = env::var("FUNCTION_MAX_OPERATIONS")
            .unwrap_or_else(|_| DEFAULT_FUNCTION_MAX_OPERATIONS.to_string())
            .parse()
            .map_err(|_| "Invalid FUNCTION_MAX_OPERATIONS")?;

        let function_timeout_ms = env::var("FUNCTION_TIMEOUT_MS")
            .unwrap_or_else(|_| DEFAULT_FUNCTION_TIMEOUT_MS.to_string())
            .parse()
            .map_err(|_| "Invalid FUNCTION_TIMEOUT_MS")?;

        Ok(Config {
            server_host,
            server_port,
            database_path,
            allowed_origins,
            environment,
            token_secret,
            token_ttl_secs,
            bcrypt_cost,
            function_max_operations,
            function_timeout_ms,
        })
    }

    /// Get server address as string
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// Whether the record store should live in memory only
    pub fn uses_in_memory_database(&self) -> bool {
        self.database_path == IN_MEMORY_DATABASE
    }

    /// Execution limits for custom function code
    pub fn script_limits(&self) -> Limits {
        Limits {
            max_operations: self.function_max_operations,
            timeout: Duration::from_millis(self.function_timeout_ms),
            ..Limits::default()
        }
    }

    /// Interpreter settings derived from this configuration
    pub fn interpreter_settings(&self) -> crate::interpreter::Settings {
        crate::interpreter::Settings {
            token_secret: self.token_secret.clone(),
            token_ttl_secs: self.token_ttl_secs,
            bcrypt_cost: self.bcrypt_cost,
            limits: self.script_limits(),
        }
    }
}
