//! Configuration and project paths
//!
//! User-level files live in the platform config directory:
//! - Linux: `~/.config/devicelab/`
//! - macOS: `~/Library/Application Support/devicelab/`
//! - Windows: `%APPDATA%\devicelab\`
//!
//! Project-level files live under `.devicelab/` in the project root.

use std::path::{Path, PathBuf};

/// Application name used for directory lookup
const APP_NAME: &str = "devicelab";

/// Name of the per-project directory
pub const PROJECT_DIR: &str = ".devicelab";

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the stored credentials file
pub fn credentials_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("credentials.toml"))
}

/// `.devicelab/` under the given project root
pub fn project_dir(root: &Path) -> PathBuf {
    root.join(PROJECT_DIR)
}

/// `.devicelab/config.yaml` under the given project root
pub fn project_config_path(root: &Path) -> PathBuf {
    project_dir(root).join("config.yaml")
}

/// `.devicelab/tests/` under the given project root
pub fn tests_dir(root: &Path) -> PathBuf {
    project_dir(root).join("tests")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_is_valid() {
        let dir = config_dir();
        assert!(dir.is_some());
    }

    #[test]
    fn test_project_layout() {
        let root = Path::new("/work/app");
        assert_eq!(
            project_config_path(root),
            PathBuf::from("/work/app/.devicelab/config.yaml")
        );
        assert_eq!(tests_dir(root), PathBuf::from("/work/app/.devicelab/tests"));
    }
}
