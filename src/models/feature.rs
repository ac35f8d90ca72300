use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, Result};
use crate::models::naming::{is_identifier, slugify};

/// The four supported feature kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FeatureKind {
    Crud,
    Auth,
    Analytics,
    Functions,
}

impl FeatureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            FeatureKind::Crud => "CRUD",
            FeatureKind::Auth => "AUTH",
            FeatureKind::Analytics => "ANALYTICS",
            FeatureKind::Functions => "FUNCTIONS",
        }
    }

    /// Case-insensitive lookup, including the legacy aliases the wizard emits
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "CRUD" | "DATABASE" | "RESOURCE" => Some(FeatureKind::Crud),
            "AUTH" | "AUTHENTICATION" => Some(FeatureKind::Auth),
            "ANALYTICS" | "TRACKING" => Some(FeatureKind::Analytics),
            "FUNCTIONS" | "FUNCTION" | "CUSTOM_FUNCTION" => Some(FeatureKind::Functions),
            _ => None,
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        FeatureKind::parse(s)
            .ok_or_else(|| AppError::Validation(format!("Unknown feature kind: {s}")))
    }
}

impl TryFrom<String> for FeatureKind {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<FeatureKind> for String {
    fn from(kind: FeatureKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Column types a CRUD field or auth extra field can have
///
/// Unrecognised type names such as `email` read as `String`, the column the
/// generator falls back to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum FieldType {
    #[default]
    String,
    Text,
    Integer,
    Float,
    Boolean,
    Datetime,
}

impl From<String> for FieldType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "text" => FieldType::Text,
            "integer" | "int" => FieldType::Integer,
            "float" | "number" => FieldType::Float,
            "boolean" | "bool" => FieldType::Boolean,
            "datetime" | "date" => FieldType::Datetime,
            _ => FieldType::String,
        }
    }
}

/// A declared CRUD column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType, required: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            required,
            default: None,
        }
    }
}

/// CRUD payload: one table and its ordered columns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrudConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub table: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CrudConfig {
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
    }
}

/// Auth flow toggles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFlags {
    #[serde(default)]
    pub registration: bool,
    #[serde(default)]
    pub forgot_password: bool,
    #[serde(default)]
    pub email_verification: bool,
}

/// Additional user column; accepts either `"phone"` or `{name, type, required}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ExtraFieldRepr")]
pub struct ExtraField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExtraFieldRepr {
    Name(String),
    Full {
        name: String,
        #[serde(rename = "type", default)]
        field_type: FieldType,
        #[serde(default)]
        required: bool,
    },
}

impl From<ExtraFieldRepr> for ExtraField {
    fn from(repr: ExtraFieldRepr) -> Self {
        match repr {
            ExtraFieldRepr::Name(name) => ExtraField {
                name,
                field_type: FieldType::String,
                required: false,
            },
            ExtraFieldRepr::Full {
                name,
                field_type,
                required,
            } => ExtraField {
                name,
                field_type,
                required,
            },
        }
    }
}

fn default_auth_type() -> String {
    "jwt".to_string()
}

/// AUTH payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_auth_type")]
    pub auth_type: String,
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default)]
    pub features: AuthFlags,
    #[serde(default)]
    pub extra_fields: Vec<ExtraField>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            auth_type: default_auth_type(),
            providers: Vec::new(),
            features: AuthFlags::default(),
            extra_fields: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl AuthConfig {
    pub fn extra_field_names(&self) -> impl Iterator<Item = &str> {
        self.extra_fields.iter().map(|f| f.name.as_str())
    }

    pub fn has_username(&self) -> bool {
        self.extra_field_names().any(|n| n == "username")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportMode {
    #[default]
    Simple,
    Advanced,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    #[default]
    Count,
    Sum,
    Avg,
    Max,
    Min,
}

impl Aggregate {
    pub const fn as_str(self) -> &'static str {
        match self {
            Aggregate::Count => "count",
            Aggregate::Sum => "sum",
            Aggregate::Avg => "avg",
            Aggregate::Max => "max",
            Aggregate::Min => "min",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "count" => Some(Aggregate::Count),
            "sum" => Some(Aggregate::Sum),
            "avg" => Some(Aggregate::Avg),
            "max" => Some(Aggregate::Max),
            "min" => Some(Aggregate::Min),
            _ => None,
        }
    }
}

fn default_report_name() -> String {
    "Report".to_string()
}

/// One analytics report over a CRUD entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(default = "default_report_name")]
    pub name: String,
    /// Technical table name of a CRUD feature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    #[serde(default)]
    pub mode: ReportMode,
    #[serde(rename = "type", default)]
    pub aggregate: Aggregate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_preview: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Report {
    /// Aggregated field, `id` when none is configured
    pub fn field_or_id(&self) -> &str {
        self.field.as_deref().filter(|f| !f.is_empty()).unwrap_or("id")
    }

    pub fn entity(&self) -> Option<&str> {
        self.entity.as_deref().filter(|e| !e.is_empty())
    }

    pub fn group_by(&self) -> Option<&str> {
        self.group_by.as_deref().filter(|g| !g.is_empty())
    }
}

/// ANALYTICS payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default)]
    pub reports: Vec<Report>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// FUNCTIONS payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, alias = "function_code", skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FunctionConfig {
    pub fn code(&self) -> &str {
        self.code.as_deref().unwrap_or("")
    }

    /// Keys listed under `input_schema.required`
    pub fn required_inputs(&self) -> Vec<String> {
        self.input_schema
            .as_ref()
            .and_then(|schema| schema.get("required"))
            .and_then(Value::as_array)
            .map(|keys| {
                keys.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Kind-specific configuration payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FeaturePayload {
    Crud(CrudConfig),
    Auth(AuthConfig),
    Analytics(AnalyticsConfig),
    Functions(FunctionConfig),
}

impl FeaturePayload {
    /// Interpret a raw configuration object according to `kind`
    pub fn from_value(kind: FeatureKind, value: Value) -> Result<Self> {
        let value = if value.is_null() {
            Value::Object(Map::new())
        } else {
            value
        };
        let payload = match kind {
            FeatureKind::Crud => FeaturePayload::Crud(serde_json::from_value(value)?),
            FeatureKind::Auth => FeaturePayload::Auth(serde_json::from_value(value)?),
            FeatureKind::Analytics => FeaturePayload::Analytics(serde_json::from_value(value)?),
            FeatureKind::Functions => FeaturePayload::Functions(serde_json::from_value(value)?),
        };
        Ok(payload)
    }

    pub fn kind(&self) -> FeatureKind {
        match self {
            FeaturePayload::Crud(_) => FeatureKind::Crud,
            FeaturePayload::Auth(_) => FeatureKind::Auth,
            FeaturePayload::Analytics(_) => FeatureKind::Analytics,
            FeaturePayload::Functions(_) => FeatureKind::Functions,
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// The canonical description of one feature in a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFeature")]
pub struct FeatureConfiguration {
    pub id: u64,
    pub project_id: String,
    pub kind: FeatureKind,
    pub name: String,
    pub configuration: FeaturePayload,
}

#[derive(Deserialize)]
struct RawFeature {
    #[serde(default)]
    id: u64,
    #[serde(default)]
    project_id: String,
    #[serde(alias = "feature_type", alias = "type")]
    kind: FeatureKind,
    name: String,
    #[serde(default, alias = "config")]
    configuration: Value,
}

impl TryFrom<RawFeature> for FeatureConfiguration {
    type Error = AppError;

    fn try_from(raw: RawFeature) -> Result<Self> {
        Ok(FeatureConfiguration {
            id: raw.id,
            project_id: raw.project_id,
            kind: raw.kind,
            name: raw.name,
            configuration: FeaturePayload::from_value(raw.kind, raw.configuration)?,
        })
    }
}

impl FeatureConfiguration {
    pub fn new(name: impl Into<String>, configuration: FeaturePayload) -> Self {
        Self {
            id: 0,
            project_id: String::new(),
            kind: configuration.kind(),
            name: name.into(),
            configuration,
        }
    }

    pub fn crud(&self) -> Option<&CrudConfig> {
        match &self.configuration {
            FeaturePayload::Crud(c) => Some(c),
            _ => None,
        }
    }

    pub fn auth(&self) -> Option<&AuthConfig> {
        match &self.configuration {
            FeaturePayload::Auth(c) => Some(c),
            _ => None,
        }
    }

    pub fn analytics(&self) -> Option<&AnalyticsConfig> {
        match &self.configuration {
            FeaturePayload::Analytics(c) => Some(c),
            _ => None,
        }
    }

    pub fn function(&self) -> Option<&FunctionConfig> {
        match &self.configuration {
            FeaturePayload::Functions(c) => Some(c),
            _ => None,
        }
    }

    /// Technical table name of a CRUD feature (falls back to the lower-cased name)
    pub fn table_name(&self) -> Option<String> {
        self.crud().map(|c| {
            if c.table.is_empty() {
                self.name.to_lowercase()
            } else {
                c.table.clone()
            }
        })
    }

    /// Function name used for the generated `route_<name>` handler
    pub fn function_name(&self) -> Option<String> {
        self.function().map(|c| match c.name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => slugify(&self.name),
        })
    }

    /// Route path of a FUNCTIONS feature, `/<function name>` when unset
    pub fn function_path(&self) -> Option<String> {
        let name = self.function_name()?;
        self.function().map(|c| match c.path.as_deref() {
            Some(path) if !path.is_empty() => path.to_string(),
            _ => format!("/{name}"),
        })
    }

    /// HTTP method of a FUNCTIONS feature, upper-cased, `POST` when unset
    pub fn function_method(&self) -> Option<String> {
        self.function().map(|c| {
            c.method
                .as_deref()
                .filter(|m| !m.is_empty())
                .unwrap_or("POST")
                .to_ascii_uppercase()
        })
    }

    /// Check that every name that ends up in generated source is a valid identifier
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::Validation("Feature name is required".to_string()));
        }

        let check = |what: &str, name: &str| {
            if is_identifier(name) {
                Ok(())
            } else {
                Err(AppError::Validation(format!(
                    "Invalid {what} '{name}' in feature '{}': must be a valid identifier",
                    self.name
                )))
            }
        };

        match &self.configuration {
            FeaturePayload::Crud(config) => {
                if let Some(table) = self.table_name() {
                    check("table name", &table)?;
                }
                for field in &config.fields {
                    check("field name", &field.name)?;
                }
            }
            FeaturePayload::Auth(config) => {
                for field in &config.extra_fields {
                    check("extra field name", &field.name)?;
                }
            }
            FeaturePayload::Analytics(config) => {
                for report in &config.reports {
                    if let Some(entity) = report.entity() {
                        check("report entity", entity)?;
                    }
                    if let Some(field) = report.field.as_deref().filter(|f| !f.is_empty()) {
                        check("report field", field)?;
                    }
                    if let Some(group_by) = report.group_by() {
                        check("report group_by", group_by)?;
                    }
                }
            }
            FeaturePayload::Functions(_) => {
                if let Some(name) = self.function_name() {
                    check("function name", &name)?;
                }
            }
        }
        Ok(())
    }
}
