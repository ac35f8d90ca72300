/// Database path value that selects the ephemeral in-memory backend
pub const IN_MEMORY_DATABASE: &str = ":memory:";

/// Lifetime of tokens issued by simulated AUTH features (1 hour)
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// bcrypt work factor for simulated registrations
pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// Operation budget for a single custom function invocation
pub const DEFAULT_FUNCTION_MAX_OPERATIONS: u64 = 1_000_000;

/// Wall-clock budget for a single custom function invocation (2 seconds)
pub const DEFAULT_FUNCTION_TIMEOUT_MS: u64 = 2_000;

/// Identity used when the caller context carries no user
pub const ANONYMOUS_USER: &str = "anon";

/// Project used when the caller context carries no project
pub const DEFAULT_PROJECT: &str = "default";

// =============================================================================
// Reserved field names
// =============================================================================

/// Columns every generated CRUD model owns; never part of `fields`
pub const CRUD_RESERVED_COLUMNS: &[&str] = &["id", "owner_id", "created_at", "updated_at"];

/// Columns the generated User model owns; never part of `extra_fields`
pub const AUTH_RESERVED_COLUMNS: &[&str] = &["id", "email", "password_hash", "created_at"];

/// Extra-field names that collide with core credentials
pub const AUTH_CORE_FIELDS: &[&str] = &["email", "password", "id"];

// =============================================================================
// Generated file paths
// =============================================================================

pub const CRUD_MODELS_PATH: &str = "app/models/crud.py";
pub const USER_MODEL_PATH: &str = "app/models/user.py";
pub const FUNCTION_ROUTES_PATH: &str = "app/routes/functions.py";
pub const AUTH_ROUTES_PATH: &str = "app/routes/auth.py";
pub const ANALYTICS_ROUTES_PATH: &str = "app/routes/analytics.py";

/// First line of the epilogue appended to every generated function route
pub const FUNCTION_EPILOGUE_MARKER: &str = "# Handle execution results";

// =============================================================================
// Error Messages
// =============================================================================

/// Error message for an unrecognised feature kind
pub const ERR_UNSUPPORTED_FEATURE: &str = "Unsupported feature type";

/// Error message for a rejected analytics expression
pub const ERR_EXPRESSION_CHARACTERS: &str =
    "Error: Expression contains unsupported characters or functions";

/// Error message for a login that matched no user or the wrong password
pub const ERR_INVALID_CREDENTIALS: &str = "Invalid credentials";
