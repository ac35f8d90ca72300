use serde::{Deserialize, Serialize};

fn default_project_name() -> String {
    "My Project".to_string()
}

/// Project metadata consumed by the code generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    #[serde(default = "default_project_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl ProjectInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// Database name suggested in the generated `.env.example`
    pub fn database_name(&self) -> String {
        crate::models::naming::slugify(&self.name)
    }
}

impl Default for ProjectInfo {
    fn default() -> Self {
        Self::new(default_project_name(), "")
    }
}
