//! Project directory (`.devicelab/`) handling
//!
//! The project config maps aliases to remote IDs and carries run defaults.
//! Local test definitions live one file per alias under `tests/`.

pub mod alias;
pub mod local;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::paths;
use crate::common::{Error, Result};

pub use alias::{alias_for_remote, resolve_identifier, sanitize_alias, unique_alias};
pub use local::{LocalTest, TestBuild, TestDefinition, TestMeta, TestMetadata};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectDefaults {
    /// Recorded for compatibility; the CLI never opens a browser itself
    #[serde(default)]
    pub open_browser: bool,
    /// Run timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Contents of `.devicelab/config.yaml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub project: ProjectInfo,
    /// Test alias -> remote test ID
    #[serde(default)]
    pub tests: BTreeMap<String, String>,
    /// Workflow alias -> remote workflow ID
    #[serde(default)]
    pub workflows: BTreeMap<String, String>,
    #[serde(default)]
    pub defaults: ProjectDefaults,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl ProjectConfig {
    pub fn resolve_test(&self, name_or_id: &str) -> Result<String> {
        resolve_identifier("test", name_or_id, &self.tests)
    }

    pub fn resolve_workflow(&self, name_or_id: &str) -> Result<String> {
        resolve_identifier("workflow", name_or_id, &self.workflows)
    }
}

/// Access to one project directory
#[derive(Debug, Clone)]
pub struct ProjectStore {
    root: PathBuf,
}

impl ProjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        paths::project_config_path(&self.root)
    }

    pub fn tests_dir(&self) -> PathBuf {
        paths::tests_dir(&self.root)
    }

    pub fn test_path(&self, alias: &str) -> PathBuf {
        self.tests_dir().join(format!("{alias}.yaml"))
    }

    /// Load the project config, or an empty one when the project has none yet
    pub fn load_config(&self) -> Result<ProjectConfig> {
        let path = self.config_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No project config at {}", path.display());
                return Ok(ProjectConfig::default());
            }
            Err(e) => return Err(Error::file_read(&path, e)),
        };

        if content.trim().is_empty() {
            return Ok(ProjectConfig::default());
        }
        serde_yaml::from_str(&content)
            .map_err(|e| Error::ConfigParse(format!("{}: {}", path.display(), e)))
    }

    pub fn save_config(&self, config: &ProjectConfig) -> Result<()> {
        let path = self.config_path();
        let dir = paths::project_dir(&self.root);
        fs::create_dir_all(&dir).map_err(|e| Error::file_write(&dir, e))?;

        let body = serde_yaml::to_string(config)?;
        let content = format!("# DeviceLab project configuration\n# Test and workflow aliases map to remote IDs\n\n{body}");
        fs::write(&path, content).map_err(|e| Error::file_write(&path, e))
    }

    pub fn load_local_tests(&self) -> Result<BTreeMap<String, LocalTest>> {
        local::load_local_tests(&self.tests_dir())
    }

    pub fn save_local_test(&self, alias: &str, test: &mut LocalTest) -> Result<()> {
        local::save_local_test(&self.test_path(alias), test)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ProjectStore::new(dir.path());
        let config = store.load_config().unwrap();
        assert!(config.tests.is_empty());
        assert!(config.workflows.is_empty());
    }

    #[test]
    fn test_config_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ProjectStore::new(dir.path());
        let mut config = ProjectConfig::default();
        config.project.name = "shop".into();
        config.tests.insert("login".into(), "3f0c1d9e-0000-4000-8000-000000000001".into());
        config.defaults.timeout = Some(600);
        store.save_config(&config).unwrap();

        assert!(dir.path().join(".devicelab/config.yaml").exists());
        assert_eq!(store.load_config().unwrap(), config);
    }

    #[test]
    fn test_partial_yaml_fills_maps() {
        let dir = TempDir::new().unwrap();
        let store = ProjectStore::new(dir.path());
        fs::create_dir_all(dir.path().join(".devicelab")).unwrap();
        fs::write(store.config_path(), "project:\n  name: shop\n").unwrap();

        let config = store.load_config().unwrap();
        assert_eq!(config.project.name, "shop");
        assert!(config.tests.is_empty());
        assert_eq!(config.defaults.timeout, None);
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let dir = TempDir::new().unwrap();
        let store = ProjectStore::new(dir.path());
        fs::create_dir_all(dir.path().join(".devicelab")).unwrap();
        fs::write(store.config_path(), "tests: [").unwrap();
        assert_eq!(store.load_config().unwrap_err().code(), "CONFIG_ERROR");
    }
}
