//! Run supervisor
//!
//! Drives one run through its phases and guarantees the workspace is gone
//! before the outcome is handed back, whatever happened in between.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::engine::{self, EngineCommand, ProcessFailure, ProcessOutcome};
use crate::report::{self, resolve_status, FailureClassifier, RunStatus};
use crate::request::RunRequest;
use crate::session::{self, BrowserServer, SessionEnv};
use crate::workspace::RunWorkspace;

/// Lifecycle phases of a run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Created,
    Materializing,
    Executing,
    Reporting,
    CleaningUp,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Created => "created",
            RunPhase::Materializing => "materializing",
            RunPhase::Executing => "executing",
            RunPhase::Reporting => "reporting",
            RunPhase::CleaningUp => "cleaning_up",
            RunPhase::Done => "done",
        };
        f.write_str(s)
    }
}

/// The single response a run produces.
///
/// Serializes to the response body: `{stdout, stderr, report}` on success,
/// `{error}` for a rejected request and `{error, stdout?, stderr?, report}`
/// when the run failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RunOutcome {
    Completed {
        stdout: String,
        stderr: String,
        report: Option<Value>,
    },
    Rejected {
        error: String,
    },
    Failed {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stdout: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stderr: Option<String>,
        report: Option<Value>,
    },
}

impl RunOutcome {
    fn rejected(error: &Error) -> Self {
        RunOutcome::Rejected {
            error: error.to_string(),
        }
    }

    fn failed(failure: ProcessFailure, report: Option<Value>) -> Self {
        let (stdout, stderr) = match failure.output {
            Some(output) => (Some(output.stdout), Some(output.stderr)),
            None => (None, None),
        };
        RunOutcome::Failed {
            error: failure.error.to_string(),
            stdout,
            stderr,
            report,
        }
    }

    /// HTTP status code for this outcome
    pub fn status_code(&self) -> u16 {
        match self {
            RunOutcome::Completed { .. } => 200,
            RunOutcome::Rejected { .. } => 400,
            RunOutcome::Failed { .. } => 500,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            RunOutcome::Completed { .. } => None,
            RunOutcome::Rejected { error } | RunOutcome::Failed { error, .. } => Some(error),
        }
    }

    pub fn report(&self) -> Option<&Value> {
        match self {
            RunOutcome::Completed { report, .. } | RunOutcome::Failed { report, .. } => {
                report.as_ref()
            }
            RunOutcome::Rejected { .. } => None,
        }
    }

    pub fn stdout(&self) -> Option<&str> {
        match self {
            RunOutcome::Completed { stdout, .. } => Some(stdout),
            RunOutcome::Failed { stdout, .. } => stdout.as_deref(),
            RunOutcome::Rejected { .. } => None,
        }
    }

    pub fn stderr(&self) -> Option<&str> {
        match self {
            RunOutcome::Completed { stderr, .. } => Some(stderr),
            RunOutcome::Failed { stderr, .. } => stderr.as_deref(),
            RunOutcome::Rejected { .. } => None,
        }
    }

    /// Summarize the outcome as a single status
    pub fn status(&self, classifier: &FailureClassifier) -> RunStatus {
        resolve_status(self.error(), self.report(), classifier)
    }
}

/// Executes runs against a fixed configuration.
///
/// Cheap to clone; clones share the concurrency limit.
#[derive(Clone)]
pub struct RunSupervisor {
    config: Arc<Config>,
    classifier: FailureClassifier,
    permits: Option<Arc<Semaphore>>,
}

impl RunSupervisor {
    pub fn new(config: Config) -> Self {
        let classifier = FailureClassifier::new(&config.report.failing_statuses);
        let permits = (config.runs.max_concurrent > 0)
            .then(|| Arc::new(Semaphore::new(config.runs.max_concurrent)));

        Self {
            config: Arc::new(config),
            classifier,
            permits,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn classifier(&self) -> &FailureClassifier {
        &self.classifier
    }

    /// Validate a raw request body and run it
    pub async fn execute(&self, body: &Value, cancel: CancellationToken) -> RunOutcome {
        match RunRequest::from_value(body) {
            Ok(request) => self.run(request, cancel).await,
            Err(e) => {
                tracing::debug!(kind = e.kind(), "Rejected run request: {}", e);
                RunOutcome::rejected(&e)
            }
        }
    }

    /// Run an already-parsed request.
    ///
    /// An invalid request is rejected before anything is allocated. Any
    /// other path removes the workspace before returning.
    pub async fn run(&self, request: RunRequest, cancel: CancellationToken) -> RunOutcome {
        if let Err(e) = request.validate() {
            tracing::debug!(kind = e.kind(), "Rejected run request: {}", e);
            return RunOutcome::rejected(&e);
        }

        let started = Instant::now();
        let _permit = match self.acquire(&cancel).await {
            Ok(permit) => permit,
            Err(e) => return RunOutcome::failed(e.into(), None),
        };

        let workspace = RunWorkspace::allocate(&self.config.workspace.base_dir());
        let span = tracing::info_span!("run", run_id = %workspace.id());
        self.supervise(&request, &workspace, &cancel, started)
            .instrument(span)
            .await
    }

    /// Phases after allocation; every event here sits inside the `run` span
    async fn supervise(
        &self,
        request: &RunRequest,
        workspace: &RunWorkspace,
        cancel: &CancellationToken,
        started: Instant,
    ) -> RunOutcome {
        enter(RunPhase::Created);

        let result = self.materialize_and_execute(request, workspace, cancel).await;

        enter(RunPhase::Reporting);
        let report = report::read_report(Some(workspace.root())).await;
        let outcome = match result {
            Ok(ProcessOutcome { stdout, stderr, .. }) => RunOutcome::Completed {
                stdout,
                stderr,
                report,
            },
            Err(failure) => {
                tracing::debug!(kind = failure.error.kind(), "Run failed: {}", failure.error);
                RunOutcome::failed(failure, report)
            }
        };

        enter(RunPhase::CleaningUp);
        if let Err(e) = workspace.remove().await {
            tracing::warn!(
                workspace = %workspace.root().display(),
                "Failed to remove run workspace: {}",
                e
            );
        }

        enter(RunPhase::Done);
        tracing::info!(
            status = %outcome.status(&self.classifier),
            duration_ms = started.elapsed().as_millis() as u64,
            "Run finished"
        );

        outcome
    }

    async fn materialize_and_execute(
        &self,
        request: &RunRequest,
        workspace: &RunWorkspace,
        cancel: &CancellationToken,
    ) -> std::result::Result<ProcessOutcome, ProcessFailure> {
        enter(RunPhase::Materializing);
        workspace
            .materialize(request, &self.config.engine.step_extension)
            .await?;

        let command = EngineCommand::resolve(&self.config.engine)?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled.into());
        }

        enter(RunPhase::Executing);
        let browser = session::start_shared_browser(&self.config.browser, workspace.root()).await;
        let env = SessionEnv::new(
            workspace.root(),
            &self.config.session,
            &self.config.browser,
            browser.as_ref().map(BrowserServer::endpoint),
        );

        let result = engine::run(&command, workspace, &env, self.run_timeout(), cancel).await;

        if let Some(browser) = browser {
            browser.shutdown().await;
        }
        result
    }

    fn run_timeout(&self) -> Option<Duration> {
        let secs = self.config.runs.timeout_secs;
        (secs > 0).then(|| Duration::from_secs(secs))
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Result<Option<OwnedSemaphorePermit>> {
        let Some(permits) = &self.permits else {
            return Ok(None);
        };

        tokio::select! {
            permit = permits.clone().acquire_owned() => permit
                .map(Some)
                .map_err(|_| Error::Internal("run queue closed".to_string())),
            () = cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}

fn enter(phase: RunPhase) {
    tracing::debug!(phase = %phase, "Run phase");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn supervisor(base: &TempDir) -> RunSupervisor {
        let mut config = Config::default();
        config.workspace.base_dir = Some(base.path().to_path_buf());
        config.browser.enabled = false;
        RunSupervisor::new(config)
    }

    #[tokio::test]
    async fn test_empty_features_rejected_without_workspace() {
        let base = TempDir::new().unwrap();
        let outcome = supervisor(&base)
            .execute(&json!({ "features": [] }), CancellationToken::new())
            .await;

        assert_eq!(outcome.status_code(), 400);
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({ "error": "Payload requires a non-empty \"features\" array." })
        );
        assert_eq!(std::fs::read_dir(base.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_typed_request_is_validated_too() {
        let base = TempDir::new().unwrap();
        let request = RunRequest {
            features: Vec::new(),
            steps: Vec::new(),
        };
        let outcome = supervisor(&base).run(request, CancellationToken::new()).await;
        assert!(matches!(outcome, RunOutcome::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_while_queued() {
        let base = TempDir::new().unwrap();
        let mut config = Config::default();
        config.workspace.base_dir = Some(base.path().to_path_buf());
        config.runs.max_concurrent = 1;
        let supervisor = RunSupervisor::new(config);

        let _held = supervisor.acquire(&CancellationToken::new()).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = supervisor
            .execute(&json!({ "features": [{ "content": "Feature: X" }] }), cancel)
            .await;

        assert_eq!(outcome.error(), Some("Run was cancelled"));
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({ "error": "Run was cancelled", "report": null })
        );
        assert_eq!(std::fs::read_dir(base.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_completed_outcome_body_keeps_null_report() {
        let outcome = RunOutcome::Completed {
            stdout: String::new(),
            stderr: String::new(),
            report: None,
        };
        assert_eq!(outcome.status_code(), 200);
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({ "stdout": "", "stderr": "", "report": null })
        );
        assert_eq!(
            outcome.status(&FailureClassifier::default()),
            RunStatus::Completed
        );
    }

    #[test]
    fn test_failed_outcome_carries_output() {
        let failure = ProcessFailure {
            error: Error::EngineFailed { code: Some(1) },
            output: Some(ProcessOutcome {
                exit_code: Some(1),
                stdout: "out".to_string(),
                stderr: "err".to_string(),
            }),
        };
        let outcome = RunOutcome::failed(failure, Some(json!([])));

        assert_eq!(outcome.status_code(), 500);
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({
                "error": "Cucumber run failed (exit code 1)",
                "stdout": "out",
                "stderr": "err",
                "report": []
            })
        );
        assert_eq!(outcome.status(&FailureClassifier::default()), RunStatus::Failed);
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(RunPhase::CleaningUp.to_string(), "cleaning_up");
        assert_eq!(RunPhase::Done.to_string(), "done");
    }
}
