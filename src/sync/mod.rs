//! Local/remote test definition synchronization
//!
//! [`SyncResolver`] classifies drift between the files under
//! `.devicelab/tests/` and the service's copies, and pushes, pulls or diffs
//! them. Tests in a batch are processed one after another; a conflict or
//! failure on one test is reported in its [`SyncResult`] and never stops the
//! rest of the batch.

pub mod diff;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::{CreateTestRequest, RemoteApi, RemoteTest, UpdateTestRequest};
use crate::common::{Error, Result};
use crate::project::{
    alias_for_remote, unique_alias, LocalTest, ProjectConfig, ProjectStore, TestBuild,
    TestDefinition, TestMeta, TestMetadata,
};

/// Page size used when enumerating the organization's tests
pub const DISCOVERY_PAGE_SIZE: u32 = 200;

/// Drift between one local and one remote test definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    Synced,
    /// Local copy moved ahead and has not been pushed
    Modified,
    /// Remote moved ahead of the local copy
    Outdated,
    LocalOnly,
    RemoteOnly,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Modified => "modified",
            SyncStatus::Outdated => "outdated",
            SyncStatus::LocalOnly => "local-only",
            SyncStatus::RemoteOnly => "remote-only",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify from the versions present on each side
///
/// `None` on both sides means there is nothing to report.
pub fn classify(local_version: Option<u64>, remote_version: Option<u64>) -> Option<SyncStatus> {
    use std::cmp::Ordering;

    match (local_version, remote_version) {
        (Some(_), None) => Some(SyncStatus::LocalOnly),
        (None, Some(_)) => Some(SyncStatus::RemoteOnly),
        (Some(local), Some(remote)) => Some(match local.cmp(&remote) {
            Ordering::Equal => SyncStatus::Synced,
            Ordering::Less => SyncStatus::Outdated,
            Ordering::Greater => SyncStatus::Modified,
        }),
        (None, None) => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestSyncStatus {
    pub name: String,
    pub status: SyncStatus,
    pub local_version: Option<u64>,
    pub remote_version: Option<u64>,
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

/// Outcome of pushing or pulling one test
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncResult {
    pub name: String,
    /// Version both sides hold after a successful sync
    pub new_version: Option<u64>,
    pub conflict: bool,
    pub error: Option<String>,
}

impl SyncResult {
    fn synced(name: &str, version: u64) -> Self {
        Self {
            name: name.to_string(),
            new_version: Some(version),
            conflict: false,
            error: None,
        }
    }

    fn conflict(name: &str) -> Self {
        Self {
            name: name.to_string(),
            new_version: None,
            conflict: true,
            error: None,
        }
    }

    fn failed(name: &str, error: &Error) -> Self {
        Self {
            name: name.to_string(),
            new_version: None,
            conflict: false,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        !self.conflict && self.error.is_none()
    }
}

/// What a pull should fetch
#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Pull only this alias
    pub name: Option<String>,
    /// Overwrite local edits
    pub force: bool,
    /// Discover every organization test and alias the new ones first
    pub all: bool,
    /// Restrict discovery to tests carrying this tag
    pub tag: Option<String>,
}

/// Sync engine over one project directory
pub struct SyncResolver {
    api: Arc<dyn RemoteApi>,
    store: ProjectStore,
    config: ProjectConfig,
    local: BTreeMap<String, LocalTest>,
}

impl SyncResolver {
    /// Load the project's alias map and local tests
    pub fn open(api: Arc<dyn RemoteApi>, store: ProjectStore) -> Result<Self> {
        let config = store.load_config()?;
        let local = store.load_local_tests()?;
        tracing::debug!(
            "Loaded {} aliases and {} local tests from {}",
            config.tests.len(),
            local.len(),
            store.root().display()
        );
        Ok(Self {
            api,
            store,
            config,
            local,
        })
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn local_tests(&self) -> &BTreeMap<String, LocalTest> {
        &self.local
    }

    fn remote_id(&self, name: &str) -> Option<String> {
        self.local
            .get(name)
            .map(|t| t.meta.remote_id.clone())
            .filter(|id| !id.is_empty())
            .or_else(|| self.config.tests.get(name).cloned())
    }

    /// Fetch a remote test, treating 404 as absent
    async fn fetch_remote(&self, remote_id: &str) -> Result<Option<RemoteTest>> {
        match self.api.get_test(remote_id).await {
            Ok(test) => Ok(Some(test)),
            Err(Error::NotFound(msg)) => {
                tracing::debug!("Remote test {} not found: {}", remote_id, msg);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Classify every test known locally or by alias, sorted by name
    ///
    /// A remote read failure affects only its own entry, which falls back to
    /// `local-only`.
    pub async fn get_all_statuses(&self) -> Result<Vec<TestSyncStatus>> {
        let names: BTreeSet<&String> = self.config.tests.keys().chain(self.local.keys()).collect();

        let mut statuses = Vec::with_capacity(names.len());
        for name in names {
            let local = self.local.get(name);
            let remote_id = self.remote_id(name);

            let remote_version = match &remote_id {
                Some(id) => match self.fetch_remote(id).await {
                    Ok(remote) => remote.map(|t| t.version),
                    Err(e) => {
                        tracing::warn!("Could not read remote test {} for {}: {}", id, name, e);
                        None
                    }
                },
                None => None,
            };
            let local_version = local.map(LocalTest::effective_local_version);

            // An alias whose remote side is gone or unreadable is local-only
            let status = classify(local_version, remote_version).unwrap_or(SyncStatus::LocalOnly);

            statuses.push(TestSyncStatus {
                name: name.clone(),
                status,
                local_version,
                remote_version,
                last_sync: local.and_then(|t| t.meta.last_synced_at),
                remote_id,
            });
        }

        Ok(statuses)
    }

    /// Push local tests to the service
    ///
    /// Each test's remote version is re-read right before writing; a remote
    /// that moved past the local baseline is a conflict unless `force`.
    pub async fn sync_to_remote(&mut self, name: Option<&str>, force: bool) -> Result<Vec<SyncResult>> {
        let targets: Vec<String> = match name {
            Some(name) if self.local.contains_key(name) => vec![name.to_string()],
            Some(name) => {
                return Err(Error::InvalidArgument(format!("no local test named '{name}'")));
            }
            None => self.local.keys().cloned().collect(),
        };

        let mut results = Vec::with_capacity(targets.len());
        let mut config_changed = false;

        for name in targets {
            let result = match self.remote_id(&name) {
                None => {
                    let result = self.create_remote(&name).await;
                    config_changed |= result.is_success();
                    result
                }
                Some(remote_id) => self.update_remote(&name, &remote_id, force).await,
            };
            match (&result.error, result.conflict) {
                (Some(e), _) => tracing::warn!("Push of {} failed: {}", name, e),
                (None, true) => tracing::info!("Push of {} refused: remote changed", name),
                (None, false) => tracing::info!("Pushed {} at version {:?}", name, result.new_version),
            }
            results.push(result);
        }

        if results.iter().any(SyncResult::is_success) {
            self.config.last_synced_at = Some(Utc::now());
            config_changed = true;
        }
        if config_changed {
            self.store.save_config(&self.config)?;
        }

        Ok(results)
    }

    async fn create_remote(&mut self, name: &str) -> SyncResult {
        let Some(local) = self.local.get(name) else {
            return SyncResult::failed(name, &Error::Internal(format!("{name} vanished")));
        };
        let req = CreateTestRequest {
            name: local.test.metadata.name.clone(),
            platform: local.test.metadata.platform.clone(),
            tasks: local.test.blocks.clone(),
            description: local.test.metadata.description.clone(),
        };

        match self.api.create_test(&req).await {
            Ok(resp) => {
                self.config.tests.insert(name.to_string(), resp.id.clone());
                self.record_sync(name, &resp.id, resp.version)
            }
            Err(e) => SyncResult::failed(name, &e),
        }
    }

    async fn update_remote(&mut self, name: &str, remote_id: &str, force: bool) -> SyncResult {
        let Some(local) = self.local.get(name) else {
            return SyncResult::failed(name, &Error::Internal(format!("{name} vanished")));
        };
        let baseline = local.meta.remote_version;
        let tasks = local.test.blocks.clone();

        let remote = match self.api.get_test(remote_id).await {
            Ok(remote) => remote,
            Err(e) => return SyncResult::failed(name, &e),
        };
        if remote.version > baseline && !force {
            return SyncResult::conflict(name);
        }

        let req = UpdateTestRequest {
            tasks,
            expected_version: (!force).then_some(remote.version),
        };
        match self.api.update_test(remote_id, &req).await {
            Ok(resp) => self.record_sync(name, remote_id, resp.version),
            Err(Error::VersionConflict(_)) => SyncResult::conflict(name),
            Err(e) => SyncResult::failed(name, &e),
        }
    }

    /// Persist a successful sync of `name` at `version`
    fn record_sync(&mut self, name: &str, remote_id: &str, version: u64) -> SyncResult {
        let Some(local) = self.local.get_mut(name) else {
            return SyncResult::failed(name, &Error::Internal(format!("{name} vanished")));
        };
        local.mark_synced(remote_id, version);
        match self.store.save_local_test(name, local) {
            Ok(()) => SyncResult::synced(name, version),
            Err(e) => SyncResult::failed(
                name,
                &Error::Internal(format!("synced but failed to save local file: {e}")),
            ),
        }
    }

    /// Pull remote tests into local files
    pub async fn pull_from_remote(&mut self, opts: &PullOptions) -> Result<Vec<SyncResult>> {
        if opts.all {
            let added = self.discover(opts.tag.as_deref()).await?;
            if !added.is_empty() {
                tracing::info!("Discovered {} new tests: {}", added.len(), added.join(", "));
            }
        }

        let targets: BTreeMap<String, String> = match opts.name.as_deref() {
            Some(name) => {
                let id = self.remote_id(name).ok_or_else(|| {
                    Error::InvalidArgument(format!("test '{name}' has no remote ID to pull from"))
                })?;
                BTreeMap::from([(name.to_string(), id)])
            }
            None => {
                let mut all = self.config.tests.clone();
                for name in self.local.keys() {
                    if let Some(id) = self.remote_id(name) {
                        all.entry(name.clone()).or_insert(id);
                    }
                }
                all
            }
        };

        let mut results = Vec::with_capacity(targets.len());
        for (name, remote_id) in targets {
            let result = self.pull_one(&name, &remote_id, opts.force).await;
            if let Some(e) = &result.error {
                tracing::warn!("Pull of {} failed: {}", name, e);
            }
            results.push(result);
        }

        if results.iter().any(SyncResult::is_success) {
            self.config.last_synced_at = Some(Utc::now());
        }
        self.store.save_config(&self.config)?;

        Ok(results)
    }

    async fn pull_one(&mut self, name: &str, remote_id: &str, force: bool) -> SyncResult {
        let existing = self.local.get(name);
        if let Some(local) = existing {
            if !force && local.effective_local_version() > local.meta.remote_version {
                return SyncResult::conflict(name);
            }
        }
        let build = existing.map(|t| t.test.build.clone()).unwrap_or_default();

        let remote = match self.api.get_test(remote_id).await {
            Ok(remote) => remote,
            Err(e) => return SyncResult::failed(name, &e),
        };

        let mut pulled = LocalTest {
            meta: TestMeta {
                last_synced_by: existing.and_then(|t| t.meta.last_synced_by.clone()),
                ..Default::default()
            },
            test: definition_from_remote(&remote, build),
        };
        pulled.mark_synced(remote_id, remote.version);

        if let Err(e) = self.store.save_local_test(name, &mut pulled) {
            return SyncResult::failed(name, &e);
        }
        self.local.insert(name.to_string(), pulled);
        self.config.tests.insert(name.to_string(), remote_id.to_string());
        SyncResult::synced(name, remote.version)
    }

    /// Alias every organization test not yet mapped locally
    ///
    /// Returns the aliases added. They are saved before anything is pulled.
    pub async fn discover(&mut self, tag: Option<&str>) -> Result<Vec<String>> {
        let mut known: BTreeSet<String> = self.config.tests.values().cloned().collect();
        known.extend(self.local.values().map(|t| t.meta.remote_id.clone()));

        // Names taken by aliases or by local files, bound to their remote ID
        let mut taken = self.config.tests.clone();
        for (name, test) in &self.local {
            taken.entry(name.clone()).or_insert_with(|| test.meta.remote_id.clone());
        }

        let mut added = Vec::new();
        let mut offset = 0u32;
        loop {
            let page = self.api.list_org_tests(DISCOVERY_PAGE_SIZE, offset, tag).await?;
            let fetched = page.tests.len() as u32;

            for summary in page.tests {
                if !known.insert(summary.id.clone()) {
                    continue;
                }
                let base = alias_for_remote(&summary.name, &summary.id)?;
                let alias = unique_alias(&base, &summary.id, &taken);
                tracing::debug!("Aliasing remote test {} as {}", summary.id, alias);
                taken.insert(alias.clone(), summary.id.clone());
                self.config.tests.insert(alias.clone(), summary.id);
                added.push(alias);
            }

            offset += fetched;
            if fetched < DISCOVERY_PAGE_SIZE || u64::from(offset) >= page.count {
                break;
            }
        }

        if !added.is_empty() {
            self.store.save_config(&self.config)?;
        }
        Ok(added)
    }

    /// Diff the local file against the remote definition; empty when equal
    pub async fn get_diff(&self, name: &str) -> Result<String> {
        let local = self
            .local
            .get(name)
            .ok_or_else(|| Error::InvalidArgument(format!("no local test named '{name}'")))?;
        let remote_id = self
            .remote_id(name)
            .ok_or_else(|| Error::InvalidArgument(format!("test '{name}' has never been pushed")))?;

        let remote = self.api.get_test(&remote_id).await?;
        let remote_def = definition_from_remote(&remote, local.test.build.clone());

        let local_yaml = local.test.to_canonical_yaml()?;
        let remote_yaml = remote_def.to_canonical_yaml()?;
        Ok(diff::render_diff(
            &format!("local/{name}"),
            &format!("remote/{name} (v{})", remote.version),
            &local_yaml,
            &remote_yaml,
        ))
    }
}

/// Local form of a remote definition, keeping the local build name
fn definition_from_remote(remote: &RemoteTest, mut build: TestBuild) -> TestDefinition {
    if remote.pinned_version.is_some() {
        build.pinned_version = remote.pinned_version.clone();
    }
    TestDefinition {
        metadata: TestMetadata {
            name: remote.name.clone(),
            platform: remote.platform.to_lowercase(),
            description: remote.description.clone(),
        },
        build,
        blocks: remote.tasks.clone(),
    }
}

/// "just now", "5m ago", "3h ago", "2d ago"
pub fn time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(then);
    if elapsed.num_minutes() < 1 {
        "just now".to_string()
    } else if elapsed.num_hours() < 1 {
        format!("{}m ago", elapsed.num_minutes())
    } else if elapsed.num_days() < 1 {
        format!("{}h ago", elapsed.num_hours())
    } else {
        format!("{}d ago", elapsed.num_days())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_classify() {
        assert_eq!(classify(Some(3), Some(3)), Some(SyncStatus::Synced));
        assert_eq!(classify(Some(2), Some(3)), Some(SyncStatus::Outdated));
        assert_eq!(classify(Some(4), Some(3)), Some(SyncStatus::Modified));
        assert_eq!(classify(Some(1), None), Some(SyncStatus::LocalOnly));
        assert_eq!(classify(None, Some(1)), Some(SyncStatus::RemoteOnly));
        assert_eq!(classify(None, None), None);
    }

    #[test]
    fn test_status_serializes_kebab_case() {
        assert_eq!(serde_json::to_value(SyncStatus::LocalOnly).unwrap(), "local-only");
        assert_eq!(SyncStatus::RemoteOnly.to_string(), "remote-only");
    }

    #[test]
    fn test_time_ago() {
        let now = Utc::now();
        assert_eq!(time_ago(now - Duration::seconds(20), now), "just now");
        assert_eq!(time_ago(now - Duration::minutes(5), now), "5m ago");
        assert_eq!(time_ago(now - Duration::hours(3), now), "3h ago");
        assert_eq!(time_ago(now - Duration::days(2), now), "2d ago");
    }

    #[test]
    fn test_remote_definition_lowercases_platform() {
        let remote = RemoteTest {
            id: "id".into(),
            name: "Login".into(),
            platform: "IOS".into(),
            description: None,
            tasks: vec![],
            version: 2,
            build_var_id: None,
            pinned_version: Some("1.4.0".into()),
        };
        let def = definition_from_remote(&remote, TestBuild::default());
        assert_eq!(def.metadata.platform, "ios");
        assert_eq!(def.build.pinned_version.as_deref(), Some("1.4.0"));
    }
}
