//! Error types for the devicelab CLI
//!
//! Every variant maps to a stable machine-readable code (see [`Error::code`])
//! so that JSON consumers can branch on the kind of failure without
//! re-parsing the human message.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the devicelab CLI
#[derive(Error, Debug)]
pub enum Error {
    // === Validation Errors ===
    #[error("retries must be between {min} and {max} (got {got})")]
    InvalidRetries { got: u32, min: u32, max: u32 },

    #[error("{0}")]
    InvalidLocation(String),

    #[error("timeout must be between 1 and {max} seconds (got {got})")]
    InvalidTimeout { got: u64, max: u64 },

    #[error("Unknown {kind} '{name}'. Available aliases: {known}")]
    UnknownAlias {
        kind: String,
        name: String,
        known: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // === Auth Errors ===
    #[error("Not authenticated. Set DEVICELAB_API_KEY or add api_key to {0}")]
    NotAuthenticated(String),

    #[error("Credential rejected by the server: {0}")]
    InvalidCredential(String),

    // === Remote Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    // === Transport Errors ===
    #[error("Network error: {message}")]
    Network {
        message: String,
        hint: Option<String>,
    },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Status stream protocol error: {0}")]
    Protocol(String),

    // === Sync Errors ===
    #[error("Version conflict: {0}")]
    VersionConflict(String),

    // === Run Outcome Errors ===
    #[error("Run was cancelled")]
    Cancelled,

    #[error("Run did not finish within {0} seconds")]
    RunTimedOut(u64),

    #[error("{kind} run finished with status '{status}'")]
    RunNotPassed { kind: String, status: String },

    /// Some items of a batch or request did not go through
    #[error("{0}")]
    Incomplete(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    #[error("Failed to write file '{path}': {error}")]
    FileWrite { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an unknown alias error listing the known aliases alphabetically
    pub fn unknown_alias<S: AsRef<str>>(kind: &str, name: &str, known: &[S]) -> Self {
        let mut names: Vec<&str> = known.iter().map(|s| s.as_ref()).collect();
        names.sort_unstable();
        let known = if names.is_empty() {
            "(none)".to_string()
        } else {
            names.join(", ")
        };
        Self::UnknownAlias {
            kind: kind.to_string(),
            name: name.to_string(),
            known,
        }
    }

    /// Create a file read error
    pub fn file_read(path: &std::path::Path, error: impl std::fmt::Display) -> Self {
        Self::FileRead {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }

    /// Create a file write error
    pub fn file_write(path: &std::path::Path, error: impl std::fmt::Display) -> Self {
        Self::FileWrite {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }

    /// Map an HTTP error status and server message into a domain error
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Self::InvalidCredential(message),
            403 => Self::PermissionDenied(message),
            404 => Self::NotFound(message),
            408 | 504 => Self::Timeout(message),
            409 => Self::VersionConflict(message),
            _ => Self::Api { status, message },
        }
    }

    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidRetries { .. }
            | Error::InvalidLocation(_)
            | Error::InvalidTimeout { .. }
            | Error::UnknownAlias { .. }
            | Error::InvalidArgument(_) => "VALIDATION_ERROR",
            Error::NotAuthenticated(_) | Error::InvalidCredential(_) => "AUTH_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::PermissionDenied(_) => "PERMISSION_DENIED",
            Error::Api { .. } => "API_ERROR",
            Error::Network { .. } => "NETWORK_ERROR",
            Error::Timeout(_) | Error::RunTimedOut(_) => "TIMEOUT",
            Error::Protocol(_) => "PROTOCOL_ERROR",
            Error::VersionConflict(_) => "CONFLICT",
            Error::Cancelled => "CANCELLED",
            Error::RunNotPassed { .. } => "RUN_FAILED",
            Error::Incomplete(_) => "INCOMPLETE",
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG_ERROR",
            Error::Io(_) | Error::FileRead { .. } | Error::FileWrite { .. } => "IO_ERROR",
            Error::Json(_) | Error::Yaml(_) => "SERIALIZATION_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Diagnostic hint for transport failures, if one applies
    pub fn hint(&self) -> Option<&str> {
        match self {
            Error::Network { hint, .. } => hint.as_deref(),
            Error::Timeout(_) => Some("the server did not answer in time; check your connection and retry"),
            Error::InvalidCredential(_) => Some("check that DEVICELAB_API_KEY holds a current API key"),
            _ => None,
        }
    }

    /// True when the outcome was already printed as a result payload
    pub fn is_reported(&self) -> bool {
        matches!(
            self,
            Error::Cancelled | Error::RunTimedOut(_) | Error::RunNotPassed { .. } | Error::Incomplete(_)
        )
    }

    /// True for failures a user caused locally, before any network traffic
    pub fn is_validation(&self) -> bool {
        self.code() == "VALIDATION_ERROR"
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Error::Timeout(error_chain(&e));
        }
        if let Some(status) = e.status() {
            return Error::from_status(status.as_u16(), e.to_string());
        }
        if e.is_decode() {
            return Error::Protocol(error_chain(&e));
        }
        let message = error_chain(&e);
        let hint = network_hint(&message).map(str::to_string);
        Error::Network { message, hint }
    }
}

/// Join an error and all of its sources into one line
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Guess a remedy from the text of a transport error
pub fn network_hint(message: &str) -> Option<&'static str> {
    let lower = message.to_lowercase();
    if lower.contains("dns")
        || lower.contains("failed to lookup")
        || lower.contains("no such host")
        || lower.contains("name or service not known")
        || lower.contains("nodename nor servname")
    {
        Some("DNS resolution failed; check your internet connection or VPN/DNS settings")
    } else if lower.contains("certificate") || lower.contains("x509") || lower.contains("tls") || lower.contains("ssl") {
        Some("TLS handshake failed; a proxy may be intercepting HTTPS traffic or the system clock may be wrong")
    } else if lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("timed out")
        || lower.contains("proxy")
    {
        Some("the connection was blocked; check firewall or proxy settings")
    } else {
        None
    }
}

/// Serializable error payload for `--json` output
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorPayload {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl From<&Error> for ErrorPayload {
    fn from(e: &Error) -> Self {
        Self {
            success: false,
            code: e.code().to_string(),
            message: e.to_string(),
            hint: e.hint().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(Error::from_status(401, "x"), Error::InvalidCredential(_)));
        assert!(matches!(Error::from_status(403, "x"), Error::PermissionDenied(_)));
        assert!(matches!(Error::from_status(404, "x"), Error::NotFound(_)));
        assert!(matches!(Error::from_status(409, "x"), Error::VersionConflict(_)));
        assert!(matches!(
            Error::from_status(500, "boom"),
            Error::Api { status: 500, .. }
        ));
    }

    #[test]
    fn test_unknown_alias_lists_sorted() {
        let err = Error::unknown_alias("test", "nope", &["zeta", "alpha"]);
        assert_eq!(
            err.to_string(),
            "Unknown test 'nope'. Available aliases: alpha, zeta"
        );
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_network_hints() {
        assert!(network_hint("error trying to connect: dns error: failed to lookup address")
            .unwrap()
            .starts_with("DNS"));
        assert!(network_hint("invalid peer certificate: UnknownIssuer")
            .unwrap()
            .starts_with("TLS"));
        assert!(network_hint("tcp connect error: Connection refused")
            .unwrap()
            .contains("firewall"));
        assert!(network_hint("something else").is_none());
    }

    #[test]
    fn test_cancel_and_timeout_codes_differ() {
        assert_eq!(Error::Cancelled.code(), "CANCELLED");
        assert_eq!(Error::RunTimedOut(10).code(), "TIMEOUT");
    }

    #[test]
    fn test_payload_carries_hint() {
        let err = Error::Network {
            message: "refused".into(),
            hint: Some("check firewall".into()),
        };
        let payload = ErrorPayload::from(&err);
        assert_eq!(payload.code, "NETWORK_ERROR");
        assert_eq!(payload.hint.as_deref(), Some("check firewall"));
        assert!(!payload.success);
    }
}
