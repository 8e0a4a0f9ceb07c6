//! DeviceLab CLI - remote mobile UI test execution and test definition sync
//!
//! The execution engine submits test and workflow runs, follows their live
//! status and resolves a final outcome. The sync engine keeps the local
//! `.devicelab/tests/` directory in step with the service.

pub mod api;
pub mod cli;
pub mod commands;
pub mod common;
pub mod execution;
pub mod project;
pub mod sync;

// Re-export commonly used types for tests
pub use common::{Error, Result};
