//! Alias names: resolution to remote IDs and synthesis from display names

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

use crate::common::{Error, Result};

static INVALID_CHARS: OnceLock<Regex> = OnceLock::new();
static DASH_RUNS: OnceLock<Regex> = OnceLock::new();

/// Compile `pattern` into `cell` on first use
fn cached_regex(cell: &'static OnceLock<Regex>, pattern: &str) -> Result<&'static Regex> {
    if let Some(re) = cell.get() {
        return Ok(re);
    }
    let re = Regex::new(pattern).map_err(|e| Error::Internal(e.to_string()))?;
    Ok(cell.get_or_init(|| re))
}

/// Resolve a user-supplied alias or UUID to a remote ID
///
/// `kind` names the alias table ("test" or "workflow") in error messages.
pub fn resolve_identifier(
    kind: &str,
    name_or_id: &str,
    aliases: &BTreeMap<String, String>,
) -> Result<String> {
    if let Some(id) = aliases.get(name_or_id) {
        tracing::debug!("Resolved {} alias {} -> {}", kind, name_or_id, id);
        return Ok(id.clone());
    }
    if Uuid::parse_str(name_or_id).is_ok() {
        return Ok(name_or_id.to_string());
    }
    let known: Vec<&String> = aliases.keys().collect();
    Err(Error::unknown_alias(kind, name_or_id, &known))
}

/// Turn a display name into a filesystem-safe alias
///
/// `"Login Test (iOS)"` becomes `"login-test-ios"`. The result may be empty.
pub fn sanitize_alias(name: &str) -> Result<String> {
    let invalid = cached_regex(&INVALID_CHARS, r"[^a-z0-9_-]")?;
    let dashes = cached_regex(&DASH_RUNS, r"-{2,}")?;

    let lowered = name.to_lowercase().replace(' ', "-");
    let stripped = invalid.replace_all(&lowered, "");
    let collapsed = dashes.replace_all(&stripped, "-");
    Ok(collapsed.trim_matches('-').to_string())
}

/// Pick an alias for remote test `id` that does not clash with another test
///
/// An alias already bound to `id` is reused as is.
pub fn unique_alias(base: &str, id: &str, existing: &BTreeMap<String, String>) -> String {
    let free = |candidate: &str| existing.get(candidate).map_or(true, |bound| bound == id);

    if free(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| free(candidate))
        .unwrap_or_else(|| format!("{base}-{id}"))
}

/// Alias for a discovered remote test
pub fn alias_for_remote(name: &str, id: &str) -> Result<String> {
    let alias = sanitize_alias(name)?;
    if alias.is_empty() {
        let prefix: String = id.chars().take(8).collect();
        return Ok(format!("test-{prefix}"));
    }
    Ok(alias)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN_ID: &str = "3f0c1d9e-0000-4000-8000-000000000001";

    fn aliases() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("login".to_string(), LOGIN_ID.to_string()),
            ("checkout".to_string(), "3f0c1d9e-0000-4000-8000-000000000002".to_string()),
        ])
    }

    #[test]
    fn test_resolve_alias_and_uuid() {
        let map = aliases();
        assert_eq!(resolve_identifier("test", "login", &map).unwrap(), LOGIN_ID);
        let raw = "9b2e6a40-1111-4222-8333-444455556666";
        assert_eq!(resolve_identifier("test", raw, &map).unwrap(), raw);
    }

    #[test]
    fn test_resolve_unknown_lists_aliases() {
        let err = resolve_identifier("test", "signup", &aliases()).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        let msg = err.to_string();
        assert!(msg.contains("signup"), "{msg}");
        assert!(msg.contains("checkout, login"), "{msg}");
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_alias("Login Test (iOS)").unwrap(), "login-test-ios");
        assert_eq!(sanitize_alias("  Check -- out_flow ").unwrap(), "check-out_flow");
        assert_eq!(sanitize_alias("!!!").unwrap(), "");
    }

    #[test]
    fn test_regexes_compiled_once() {
        sanitize_alias("First").unwrap();
        let first = INVALID_CHARS.get().unwrap() as *const Regex;
        sanitize_alias("Second").unwrap();
        assert!(std::ptr::eq(first, INVALID_CHARS.get().unwrap()));
        assert!(DASH_RUNS.get().is_some());
    }

    #[test]
    fn test_unique_alias_appends_suffix() {
        let mut map = aliases();
        assert_eq!(unique_alias("login", LOGIN_ID, &map), "login");
        assert_eq!(unique_alias("login", "other-id", &map), "login-2");
        map.insert("login-2".into(), "third-id".into());
        assert_eq!(unique_alias("login", "other-id", &map), "login-3");
        assert_eq!(unique_alias("signup", "other-id", &map), "signup");
    }

    #[test]
    fn test_empty_name_falls_back_to_id() {
        assert_eq!(alias_for_remote("???", LOGIN_ID).unwrap(), "test-3f0c1d9e");
    }
}
