//! Local test definition files (`.devicelab/tests/<alias>.yaml`)

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::common::{Error, Result};

/// Sync bookkeeping stored next to the definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_id: String,
    /// Remote version this copy last matched (the sync baseline)
    #[serde(default)]
    pub remote_version: u64,
    #[serde(default)]
    pub local_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_by: Option<String>,
    /// SHA-256 of the definition as of the last sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestMetadata {
    pub name: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestBuild {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_version: Option<String>,
}

impl TestBuild {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.pinned_version.is_none()
    }
}

/// The synchronized part of a local test file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestDefinition {
    pub metadata: TestMetadata,
    #[serde(default, skip_serializing_if = "TestBuild::is_empty")]
    pub build: TestBuild,
    #[serde(default)]
    pub blocks: Vec<Value>,
}

impl TestDefinition {
    /// Canonical YAML form, used for checksums and diffs
    pub fn to_canonical_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// One test file on disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalTest {
    #[serde(rename = "_meta", default)]
    pub meta: TestMeta,
    pub test: TestDefinition,
}

impl LocalTest {
    pub fn checksum(&self) -> Result<String> {
        let yaml = self.test.to_canonical_yaml()?;
        let digest = Sha256::digest(yaml.as_bytes());
        Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Whether the definition was edited since the last sync
    ///
    /// Files that never recorded a checksum are taken at face value.
    pub fn has_local_changes(&self) -> bool {
        match (&self.meta.checksum, self.checksum()) {
            (Some(stored), Ok(current)) => *stored != current,
            _ => false,
        }
    }

    /// Local version with unsynced edits counted as one step past the baseline
    pub fn effective_local_version(&self) -> u64 {
        if self.has_local_changes() {
            self.meta.local_version.max(self.meta.remote_version + 1)
        } else {
            self.meta.local_version
        }
    }

    /// Record a successful sync at `version`
    pub fn mark_synced(&mut self, remote_id: &str, version: u64) {
        self.meta.remote_id = remote_id.to_string();
        self.meta.remote_version = version;
        self.meta.local_version = version;
        self.meta.last_synced_at = Some(Utc::now());
    }
}

/// Load every `*.yaml` under `dir`, keyed by file stem
///
/// A missing directory yields an empty map; unparsable files are skipped.
pub fn load_local_tests(dir: &Path) -> Result<BTreeMap<String, LocalTest>> {
    let mut tests = BTreeMap::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(tests),
        Err(e) => return Err(Error::file_read(dir, e)),
    };

    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match load_local_test(&path) {
            Ok(test) => {
                tests.insert(name.to_string(), test);
            }
            Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
        }
    }

    Ok(tests)
}

pub fn load_local_test(path: &Path) -> Result<LocalTest> {
    let content = fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Write `test` to `path`, refreshing its stored checksum
pub fn save_local_test(path: &Path, test: &mut LocalTest) -> Result<()> {
    test.meta.checksum = Some(test.checksum()?);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::file_write(parent, e))?;
    }

    let synced = test
        .meta
        .last_synced_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    let body = serde_yaml::to_string(test)?;
    let content = format!("# DeviceLab test definition\n# Last synced: {synced}\n\n{body}");

    fs::write(path, content).map_err(|e| Error::file_write(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample() -> LocalTest {
        LocalTest {
            meta: TestMeta {
                remote_id: "3f0c1d9e-0000-4000-8000-000000000001".into(),
                remote_version: 3,
                local_version: 3,
                ..Default::default()
            },
            test: TestDefinition {
                metadata: TestMetadata {
                    name: "Login".into(),
                    platform: "ios".into(),
                    description: None,
                },
                build: TestBuild::default(),
                blocks: vec![json!({"type": "instructions", "step_description": "Tap login"})],
            },
        }
    }

    #[test]
    fn test_save_then_load_has_no_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("login.yaml");
        let mut test = sample();
        save_local_test(&path, &mut test).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# DeviceLab test definition\n"));

        let loaded = load_local_test(&path).unwrap();
        assert_eq!(loaded, test);
        assert!(!loaded.has_local_changes());
        assert_eq!(loaded.effective_local_version(), 3);
    }

    #[test]
    fn test_edit_bumps_effective_version() {
        let mut test = sample();
        test.meta.checksum = Some(test.checksum().unwrap());
        test.test
            .blocks
            .push(json!({"type": "validation", "step_description": "Home is shown"}));
        assert!(test.has_local_changes());
        assert_eq!(test.effective_local_version(), 4);
    }

    #[test]
    fn test_missing_checksum_is_unchanged() {
        let test = sample();
        assert!(!test.has_local_changes());
    }

    #[test]
    fn test_load_dir_skips_invalid_files() {
        let dir = TempDir::new().unwrap();
        let mut test = sample();
        save_local_test(&dir.path().join("login.yaml"), &mut test).unwrap();
        fs::write(dir.path().join("broken.yaml"), "test: [unclosed").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let tests = load_local_tests(dir.path()).unwrap();
        assert_eq!(tests.keys().collect::<Vec<_>>(), vec!["login"]);

        let missing = load_local_tests(&dir.path().join("nope")).unwrap();
        assert!(missing.is_empty());
    }
}
