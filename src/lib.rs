//! QA Runner - Cucumber scenario execution service
//!
//! Takes submitted feature files and step bindings, runs them with
//! cucumber-js in a disposable workspace and returns the captured output,
//! the JSON report and the failure evidence it contains.

pub mod cli;
pub mod commands;
pub mod common;
pub mod engine;
pub mod report;
pub mod request;
pub mod server;
pub mod session;
pub mod supervisor;
pub mod workspace;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use request::{RunRequest, ScriptAsset};
pub use supervisor::{RunOutcome, RunSupervisor};
