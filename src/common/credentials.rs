//! API credential lookup
//!
//! Credentials are read from `DEVICELAB_API_KEY`, falling back to the
//! `api_key` entry of `credentials.toml` in the config directory. This
//! module never writes them.

use serde::Deserialize;
use std::fmt;
use std::path::Path;

use super::paths::credentials_path;
use super::{Error, Result};

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "DEVICELAB_API_KEY";

/// Opaque bearer credential
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn bearer(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    api_key: Option<String>,
}

/// Resolve the credential from the environment or the credentials file
pub fn load() -> Result<Credential> {
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        if !key.trim().is_empty() {
            return Ok(Credential::new(key.trim()));
        }
    }

    let location = credentials_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "credentials.toml".to_string());

    match credentials_path() {
        Some(path) if path.exists() => {
            from_file(&path)?.ok_or(Error::NotAuthenticated(location))
        }
        _ => Err(Error::NotAuthenticated(location)),
    }
}

/// Read a credential from a `credentials.toml` file, if it carries one
pub fn from_file(path: &Path) -> Result<Option<Credential>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
    let parsed: CredentialsFile =
        toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))?;
    Ok(parsed
        .api_key
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .map(Credential::new))
}
