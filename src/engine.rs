//! Test engine process
//!
//! Resolves the installed cucumber-js CLI and runs it as a child process
//! inside a run workspace, capturing its output. The engine writes its own
//! report file; reading it back is the report module's job, so a crash here
//! still leaves whatever report was written before it.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::common::config::EngineConfig;
use crate::common::{kill_process_group, Error, Result};
use crate::session::SessionEnv;
use crate::workspace::{RunWorkspace, ENGINE_CONFIG_FILE, FEATURES_DIR};

/// Location of the CLI script inside a `node_modules` directory
const CUCUMBER_CLI: &str = "@cucumber/cucumber/bin/cucumber.js";

/// How long to wait for the output pipes to drain after the process exits
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// A resolved engine invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Prepended to the inherited `NODE_PATH`
    pub node_path: Vec<PathBuf>,
}

impl EngineCommand {
    /// Resolve the engine entry point.
    ///
    /// An explicit `engine.program` is used with its `args` verbatim.
    /// Otherwise `node` is located in PATH and the cucumber-js CLI is searched
    /// for in the configured `node_modules` directories, `NODE_PATH`, next to
    /// the running binary and in the current directory. Failure here means a
    /// broken deployment.
    pub fn resolve(config: &EngineConfig) -> Result<Self> {
        if let Some(program) = &config.program {
            let program = if program.exists() {
                program.clone()
            } else {
                which::which(program)
                    .map_err(|_| Error::engine_not_found(&program.display().to_string(), &["PATH"]))?
            };
            return Ok(Self {
                program,
                args: config.args.clone(),
                node_path: config.node_modules.clone(),
            });
        }

        let node = which::which("node").map_err(|_| Error::engine_not_found("node", &["PATH"]))?;

        let search = node_modules_search_path(config);
        let modules_dir = search
            .iter()
            .find(|dir| dir.join(CUCUMBER_CLI).is_file())
            .cloned()
            .ok_or_else(|| {
                let searched: Vec<String> =
                    search.iter().map(|p| p.display().to_string()).collect();
                Error::engine_not_found("@cucumber/cucumber", &searched)
            })?;

        let cli = modules_dir.join(CUCUMBER_CLI);
        let mut node_path = vec![modules_dir];
        node_path.extend(config.node_modules.iter().cloned());
        node_path.dedup();

        Ok(Self {
            program: node,
            args: vec![
                cli.to_string_lossy().into_owned(),
                "--config".to_string(),
                ENGINE_CONFIG_FILE.to_string(),
                FEATURES_DIR.to_string(),
            ],
            node_path,
        })
    }

    fn node_path_env(&self) -> Option<OsString> {
        let inherited = std::env::var_os("NODE_PATH");
        let paths = self
            .node_path
            .iter()
            .cloned()
            .chain(inherited.iter().flat_map(std::env::split_paths));
        std::env::join_paths(paths).ok()
    }
}

fn node_modules_search_path(config: &EngineConfig) -> Vec<PathBuf> {
    let mut dirs = config.node_modules.clone();
    if let Some(node_path) = std::env::var_os("NODE_PATH") {
        dirs.extend(std::env::split_paths(&node_path));
    }
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        dirs.push(exe_dir.join("node_modules"));
    }
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd.join("node_modules"));
    }
    dirs
}

/// Captured result of an engine process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// An engine run that did not exit cleanly
#[derive(Debug)]
pub struct ProcessFailure {
    pub error: Error,
    /// Output captured before the failure, absent if the process never started
    pub output: Option<ProcessOutcome>,
}

impl ProcessFailure {
    fn without_output(error: Error) -> Self {
        Self {
            error,
            output: None,
        }
    }
}

impl From<Error> for ProcessFailure {
    fn from(error: Error) -> Self {
        Self::without_output(error)
    }
}

enum Exit {
    Completed(std::process::ExitStatus),
    TimedOut(Duration),
    Cancelled,
    Lost(std::io::Error),
}

/// Run the engine against a workspace.
///
/// Resolves on a zero exit code. A non-zero exit, spawn failure, timeout or
/// cancellation is returned as a [`ProcessFailure`] carrying whatever output
/// was captured.
pub async fn run(
    command: &EngineCommand,
    workspace: &RunWorkspace,
    env: &SessionEnv,
    limit: Option<Duration>,
    cancel: &CancellationToken,
) -> std::result::Result<ProcessOutcome, ProcessFailure> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .current_dir(workspace.root())
        .envs(env.vars())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(node_path) = command.node_path_env() {
        cmd.env("NODE_PATH", node_path);
    }

    // Own process group so browsers the engine starts die with it
    #[cfg(unix)]
    cmd.process_group(0);

    tracing::debug!(
        program = %command.program.display(),
        "Spawning test engine"
    );

    let mut child = cmd.spawn().map_err(|e| {
        ProcessFailure::without_output(Error::EngineSpawn(format!(
            "{}: {}",
            command.program.display(),
            e
        )))
    })?;

    let stdout_task = child.stdout.take().map(|out| tokio::spawn(capture(out)));
    let stderr_task = child.stderr.take().map(|err| tokio::spawn(capture(err)));

    let deadline = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    let exit = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => Exit::Completed(status),
            Err(e) => {
                tracing::warn!("Lost track of test engine: {}", e);
                terminate(&mut child).await;
                Exit::Lost(e)
            }
        },
        () = cancel.cancelled() => {
            tracing::info!("Cancellation requested; killing test engine");
            terminate(&mut child).await;
            Exit::Cancelled
        }
        () = deadline => {
            let limit = limit.unwrap_or_default();
            tracing::warn!(timeout_ms = limit.as_millis() as u64, "Test engine timed out; killing");
            terminate(&mut child).await;
            Exit::TimedOut(limit)
        }
    };

    let outcome = ProcessOutcome {
        exit_code: match &exit {
            Exit::Completed(status) => status.code(),
            _ => None,
        },
        stdout: collect(stdout_task).await,
        stderr: collect(stderr_task).await,
    };

    let error = match exit {
        Exit::Completed(status) if status.success() => return Ok(outcome),
        Exit::Completed(status) => Error::EngineFailed {
            code: status.code(),
        },
        Exit::TimedOut(limit) => Error::Timeout(limit),
        Exit::Cancelled => Error::Cancelled,
        Exit::Lost(e) => Error::Io(e),
    };

    Err(ProcessFailure {
        error,
        output: Some(outcome),
    })
}

async fn capture<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(buf);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn collect(task: Option<JoinHandle<std::io::Result<Vec<u8>>>>) -> String {
    let Some(task) = task else {
        return String::new();
    };
    match timeout(IO_CAPTURE_TIMEOUT, task).await {
        Ok(Ok(Ok(buf))) => String::from_utf8_lossy(&buf).into_owned(),
        Ok(Ok(Err(e))) => {
            tracing::warn!("Output capture failed: {}", e);
            String::new()
        }
        Ok(Err(e)) => {
            tracing::warn!("Output capture task panicked: {}", e);
            String::new()
        }
        Err(_) => {
            tracing::warn!("Output capture timed out");
            String::new()
        }
    }
}

async fn terminate(child: &mut Child) {
    kill_process_group(child);
    if let Err(e) = child.kill().await {
        tracing::debug!("Kill after group signal: {}", e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::common::config::{BrowserConfig, SessionConfig};
    use crate::request::{RunRequest, ScriptAsset};
    use tempfile::TempDir;

    fn shell(script: &str) -> EngineCommand {
        EngineCommand::resolve(&EngineConfig {
            program: Some(PathBuf::from("sh")),
            args: vec!["-c".to_string(), script.to_string()],
            ..EngineConfig::default()
        })
        .unwrap()
    }

    async fn workspace(temp: &TempDir) -> (RunWorkspace, SessionEnv) {
        let workspace = RunWorkspace::allocate(temp.path());
        let request = RunRequest {
            features: vec![ScriptAsset::new(None, "Feature: X")],
            steps: Vec::new(),
        };
        workspace.materialize(&request, "ts").await.unwrap();
        let env = SessionEnv::new(
            workspace.root(),
            &SessionConfig::default(),
            &BrowserConfig::default(),
            None,
        );
        (workspace, env)
    }

    #[test]
    fn test_resolve_explicit_program_missing() {
        let err = EngineCommand::resolve(&EngineConfig {
            program: Some(PathBuf::from("definitely-not-an-engine-binary")),
            ..EngineConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::EngineNotFound { .. }));
        assert_eq!(err.kind(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_resolve_finds_cli_in_configured_node_modules() {
        if which::which("node").is_err() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("@cucumber/cucumber/bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("cucumber.js"), "").unwrap();

        let command = EngineCommand::resolve(&EngineConfig {
            node_modules: vec![temp.path().to_path_buf()],
            ..EngineConfig::default()
        })
        .unwrap();

        assert_eq!(command.args[0], bin.join("cucumber.js").to_string_lossy());
        assert_eq!(&command.args[1..], ["--config", "cucumber.js", "features"]);
        assert_eq!(command.node_path[0], temp.path());
    }

    #[tokio::test]
    async fn test_zero_exit_captures_output_in_workspace() {
        let temp = TempDir::new().unwrap();
        let (workspace, env) = workspace(&temp).await;

        let outcome = run(
            &shell("echo \"cwd=$(pwd)\"; echo \"dir=$RUN_TMP_DIR\"; echo warn >&2"),
            &workspace,
            &env,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let root = workspace.root().canonicalize().unwrap();
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.stdout.contains(&format!("cwd={}", root.display())));
        assert!(outcome
            .stdout
            .contains(&format!("dir={}", workspace.root().display())));
        assert_eq!(outcome.stderr, "warn\n");
    }

    #[tokio::test]
    async fn test_non_zero_exit_keeps_output() {
        let temp = TempDir::new().unwrap();
        let (workspace, env) = workspace(&temp).await;

        let failure = run(
            &shell("echo partial; echo boom >&2; exit 3"),
            &workspace,
            &env,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(failure.error, Error::EngineFailed { code: Some(3) }));
        let output = failure.output.unwrap();
        assert_eq!(output.stdout, "partial\n");
        assert_eq!(output.stderr, "boom\n");
    }

    #[tokio::test]
    async fn test_timeout_kills_engine() {
        let temp = TempDir::new().unwrap();
        let (workspace, env) = workspace(&temp).await;

        let failure = run(
            &shell("echo started; sleep 30"),
            &workspace,
            &env,
            Some(Duration::from_millis(200)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(failure.error, Error::Timeout(_)));
        assert_eq!(
            failure.error.to_string(),
            "Cucumber run timed out after 0.2 seconds"
        );
        assert_eq!(failure.output.unwrap().stdout, "started\n");
    }

    #[tokio::test]
    async fn test_cancellation_kills_engine() {
        let temp = TempDir::new().unwrap();
        let (workspace, env) = workspace(&temp).await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let failure = run(&shell("sleep 30"), &workspace, &env, None, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(failure.error, Error::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
