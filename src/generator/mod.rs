//! Source generator
//!
//! Turns a project's feature configurations into the file tree of a
//! standalone Flask project. Generation is a pure function of its input: the
//! same project and features always render byte-identical files.

pub mod analytics;
pub mod archive;
pub mod auth;
pub mod crud;
pub mod functions;
pub mod python;
pub mod skeleton;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::constants::{
    ANALYTICS_ROUTES_PATH, AUTH_ROUTES_PATH, CRUD_MODELS_PATH, FUNCTION_ROUTES_PATH,
    USER_MODEL_PATH,
};
use crate::error::Result;
use crate::models::{AnalyticsConfig, AuthConfig, CrudConfig, FeatureConfiguration, ProjectInfo};

pub use archive::{digest, package_zip};

/// Generated project: path → file content, in path order
pub type FileMap = BTreeMap<String, String>;

/// One generated file, as listed in previews
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
}

/// Flatten a file map into its listing order
pub fn file_list(files: &FileMap) -> Vec<GeneratedFile> {
    files
        .iter()
        .map(|(path, content)| GeneratedFile {
            path: path.clone(),
            content: content.clone(),
        })
        .collect()
}

/// A custom function route, with defaults resolved
#[derive(Debug, Clone)]
pub struct FunctionRoute {
    pub name: String,
    pub path: String,
    pub method: String,
    pub code: String,
}

/// Everything the templates need, resolved once from the feature list
pub struct Blueprint<'a> {
    pub project: &'a ProjectInfo,
    pub features: &'a [FeatureConfiguration],
    /// First AUTH feature in list order
    pub auth: Option<&'a AuthConfig>,
    /// First ANALYTICS feature in list order
    pub analytics: Option<&'a AnalyticsConfig>,
}

impl<'a> Blueprint<'a> {
    pub fn new(project: &'a ProjectInfo, features: &'a [FeatureConfiguration]) -> Self {
        Self {
            project,
            features,
            auth: features.iter().find_map(FeatureConfiguration::auth),
            analytics: features.iter().find_map(FeatureConfiguration::analytics),
        }
    }

    /// CRUD tables in feature order
    pub fn tables(&self) -> Vec<(String, &'a CrudConfig)> {
        self.features
            .iter()
            .filter_map(|feature| Some((feature.table_name()?, feature.crud()?)))
            .collect()
    }

    /// Custom function routes in feature order
    pub fn functions(&self) -> Vec<FunctionRoute> {
        self.features
            .iter()
            .filter_map(|feature| {
                let config = feature.function()?;
                Some(FunctionRoute {
                    name: feature.function_name()?,
                    path: feature.function_path()?,
                    method: feature.function_method()?,
                    code: config.code().to_string(),
                })
            })
            .collect()
    }
}

/// Render the complete project
///
/// Fails with a validation error when a name that ends up in source is not
/// a valid Python identifier.
pub fn generate(project: &ProjectInfo, features: &[FeatureConfiguration]) -> Result<FileMap> {
    for feature in features {
        feature.validate()?;
    }

    let blueprint = Blueprint::new(project, features);
    let mut files = FileMap::new();
    let mut emit = |path: &str, content: String| {
        files.insert(path.to_string(), content);
    };

    emit("requirements.txt", skeleton::requirements(&blueprint));
    emit("run.py", skeleton::run_py());
    emit(".env.example", skeleton::env_example(&blueprint));
    emit("README.md", skeleton::readme(&blueprint));
    emit(".gitignore", skeleton::gitignore());
    emit("app/__init__.py", skeleton::app_init(&blueprint));
    emit("app/config.py", skeleton::config_py(&blueprint));
    emit("app/models/__init__.py", skeleton::models_init(&blueprint));
    emit(CRUD_MODELS_PATH, crud::models(&blueprint));
    emit("app/routes/__init__.py", skeleton::routes_init(&blueprint));
    emit("app/routes/crud.py", crud::routes(&blueprint));
    emit(FUNCTION_ROUTES_PATH, functions::routes(&blueprint));

    if let Some(auth) = blueprint.auth {
        emit(USER_MODEL_PATH, auth::user_model(auth));
        emit(AUTH_ROUTES_PATH, auth::routes(auth));
    }
    if let Some(analytics) = blueprint.analytics {
        emit(ANALYTICS_ROUTES_PATH, analytics::routes(analytics));
    }

    tracing::debug!(
        "Generated {} files for project '{}'",
        files.len(),
        project.name
    );
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::{FeatureKind, FeaturePayload};
    use serde_json::{Value, json};

    fn feature(name: &str, kind: FeatureKind, configuration: Value) -> FeatureConfiguration {
        FeatureConfiguration::new(name, FeaturePayload::from_value(kind, configuration).unwrap())
    }

    fn book() -> FeatureConfiguration {
        feature(
            "Books",
            FeatureKind::Crud,
            json!({"table": "book", "fields": [
                {"name": "title", "type": "string", "required": true},
                {"name": "pages", "type": "integer", "default": 100},
                {"name": "published", "type": "datetime"}
            ]}),
        )
    }

    fn project() -> ProjectInfo {
        ProjectInfo::new("Library App", "Books and readers")
    }

    const BASE_FILES: [&str; 12] = [
        ".env.example",
        ".gitignore",
        "README.md",
        "app/__init__.py",
        "app/config.py",
        "app/models/__init__.py",
        "app/models/crud.py",
        "app/routes/__init__.py",
        "app/routes/crud.py",
        "app/routes/functions.py",
        "requirements.txt",
        "run.py",
    ];

    #[test]
    fn test_minimal_manifest() {
        let files = generate(&project(), &[book()]).unwrap();
        let paths: Vec<&str> = files.keys().map(String::as_str).collect();
        assert_eq!(paths, BASE_FILES);
        assert!(!files["requirements.txt"].contains("Flask-JWT-Extended"));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let features = vec![
            book(),
            feature("Auth", FeatureKind::Auth, json!({"extra_fields": ["username"]})),
            feature(
                "Stats",
                FeatureKind::Analytics,
                json!({"reports": [{"name": "Books", "entity": "book", "type": "count"}]}),
            ),
        ];
        let first = generate(&project(), &features).unwrap();
        let second = generate(&project(), &features).unwrap();
        assert_eq!(first, second);
        assert_eq!(digest(&first), digest(&second));
        assert_eq!(first.len(), 15);
        assert!(first.contains_key(USER_MODEL_PATH));
        assert!(first.contains_key(ANALYTICS_ROUTES_PATH));
    }

    #[test]
    fn test_crud_model_columns() {
        let files = generate(&project(), &[book()]).unwrap();
        let models = &files[CRUD_MODELS_PATH];
        assert!(models.contains("class Book(db.Model):"));
        assert!(models.contains("    __tablename__ = 'book'"));
        assert!(models.contains("    title = db.Column(db.String(120), nullable=False)"));
        assert!(models.contains("    pages = db.Column(db.Integer, default=100)"));
        assert!(models.contains("    published = db.Column(db.DateTime, default=datetime.utcnow)"));
        assert!(!models.contains("owner_id"));
    }

    #[test]
    fn test_auth_adds_ownership_and_wiring() {
        let features = vec![
            book(),
            feature(
                "Auth",
                FeatureKind::Auth,
                json!({"extra_fields": ["phone", "email", "phone", {"name": "username", "required": true}]}),
            ),
        ];
        let files = generate(&project(), &features).unwrap();
        assert!(files[CRUD_MODELS_PATH].contains("owner_id = db.Column(db.Integer, db.ForeignKey('users.id'))"));
        assert!(files["app/routes/crud.py"].contains("@jwt_required()"));
        assert!(files["app/__init__.py"].contains("jwt.init_app(app)"));
        assert!(files["app/config.py"].contains("JWT_SECRET_KEY"));

        let user = &files[USER_MODEL_PATH];
        assert_eq!(user.matches("    phone = db.Column").count(), 1);
        assert!(user.contains("    username = db.Column(db.String(120), unique=True, nullable=False)"));
        assert!(!user.contains("    email = db.Column(db.String(120))"));
        assert!(files[AUTH_ROUTES_PATH].contains("User.username == data.get('username')"));
    }

    #[test]
    fn test_function_routes() {
        let features = vec![
            feature(
                "Double It",
                FeatureKind::Functions,
                json!({"path": "/api/double", "method": "post", "code": "def handler(data):\n    return data['n'] * 2"}),
            ),
            feature("Empty", FeatureKind::Functions, json!({})),
        ];
        let files = generate(&project(), &features).unwrap();
        let routes = &files[FUNCTION_ROUTES_PATH];
        assert!(routes.contains("@api_bp.route('/double', methods=['POST'])\ndef route_double_it():"));
        assert!(routes.contains("    def handler(data):\n        return data['n'] * 2\n"));
        assert!(routes.contains("def route_empty():\n    input_data = request.get_json() if request.is_json else {}\n    pass\n"));
    }

    #[test]
    fn test_analytics_escapes_user_text() {
        let features = vec![
            book(),
            feature(
                "Stats",
                FeatureKind::Analytics,
                json!({"reports": [
                    {"name": "Bob's count", "entity": "book", "type": "count"},
                    {"name": "Avg", "entity": "book", "type": "avg", "field": "pages", "group_by": "title"},
                    {"name": "Ratio", "entity": "book", "mode": "advanced", "expression": "sum(pages) / count(id)\n'"}
                ]}),
            ),
        ];
        let files = generate(&project(), &features).unwrap();
        let routes = &files[ANALYTICS_ROUTES_PATH];
        assert!(routes.contains(r"results['Bob\'s count'] = Book.query.count()"));
        assert!(routes.contains("func.avg(Book.pages)).group_by(Book.title)"));
        assert!(routes.contains(r"db.text('sum(pages) / count(id)\n\'')"));
        assert!(routes.contains("    # Advanced Expression: sum(pages) / count(id) '\n"));
    }

    #[test]
    fn test_invalid_identifiers_are_rejected() {
        let bad = feature(
            "Books",
            FeatureKind::Crud,
            json!({"table": "book", "fields": [{"name": "drop table", "type": "string"}]}),
        );
        assert!(matches!(generate(&project(), &[bad]), Err(AppError::Validation(_))));
    }
}
