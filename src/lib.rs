//! Feature Forge
//!
//! Declarative backend features: simulate them against an isolated record
//! store, generate a standalone Flask project from them, and fold edits made
//! to that project back into the configuration.

pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod generator;
pub mod interpreter;
pub mod models;
pub mod refine;
pub mod routes;
pub mod script;
pub mod sync;

pub use config::Config;
pub use db::{Db, open_database, open_in_memory};
pub use error::{AppError, Result};
pub use interpreter::Interpreter;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub config: Config,
    pub interpreter: Interpreter,
}

impl AppState {
    /// Create the state, building the interpreter from the configuration
    pub fn new(db: Db, config: Config) -> Self {
        let interpreter = Interpreter::new(db.clone(), config.interpreter_settings());
        Self {
            db,
            config,
            interpreter,
        }
    }
}
