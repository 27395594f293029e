//! Engine report handling
//!
//! The report is auxiliary diagnostics: it is read back best-effort after a
//! run and never decides whether the run passed. That is the exit code's job.

mod extract;
pub mod model;
mod status;

pub use extract::{
    extract_failure_details, FailureAttachment, FailureClassifier, FailureDetails,
};
pub use status::{resolve_status, RunStatus};

use std::path::Path;

use serde_json::Value;

use crate::workspace::REPORT_FILE;

/// Read and parse the report inside a workspace.
///
/// Returns `None` when there is no workspace, or the file is missing,
/// unreadable or not valid JSON.
pub async fn read_report(workspace_root: Option<&Path>) -> Option<Value> {
    let path = workspace_root?.join(REPORT_FILE);

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) => {
            tracing::debug!(report = %path.display(), "Report unavailable: {}", e);
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::debug!(report = %path.display(), "Report is not valid JSON: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_report_without_workspace() {
        assert_eq!(read_report(None).await, None);
    }

    #[tokio::test]
    async fn test_read_report_missing_file() {
        let temp = TempDir::new().unwrap();
        assert_eq!(read_report(Some(temp.path())).await, None);
    }

    #[tokio::test]
    async fn test_read_report_malformed_json() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(REPORT_FILE), "[{\"elements\": [").unwrap();
        assert_eq!(read_report(Some(temp.path())).await, None);
    }

    #[tokio::test]
    async fn test_read_report_parses_json() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(REPORT_FILE), "[{\"name\": \"X\"}]").unwrap();

        let report = read_report(Some(temp.path())).await.unwrap();
        assert_eq!(report[0]["name"], "X");
    }
}
