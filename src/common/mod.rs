//! Common utilities shared by the execution and sync engines

pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};

/// Render an elapsed duration in seconds the way the service reports it
pub fn format_duration_secs(secs: f64) -> String {
    if secs < 60.0 {
        format!("{secs:.1}s")
    } else {
        let total = secs.round() as u64;
        format!("{}m {}s", total / 60, total % 60)
    }
}
