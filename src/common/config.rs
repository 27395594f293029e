//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Where run workspaces are created
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    /// Test engine (cucumber-js) settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Shared browser settings
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Per-scenario session timeouts
    #[serde(default)]
    pub session: SessionConfig,

    /// Run limits
    #[serde(default)]
    pub runs: RunsConfig,

    /// Report interpretation
    #[serde(default)]
    pub report: ReportConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted request body
    #[serde(default = "default_max_body_mb")]
    pub max_body_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_body_mb: default_max_body_mb(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_max_body_mb() -> usize {
    5
}

/// Workspace location
#[derive(Debug, Deserialize, Default, Clone)]
pub struct WorkspaceConfig {
    /// Base directory for run workspaces. Defaults to the host temp dir.
    pub base_dir: Option<PathBuf>,
}

impl WorkspaceConfig {
    /// Resolved base directory
    pub fn base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Test engine settings
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Explicit engine executable. When unset, `node` runs the installed
    /// `@cucumber/cucumber` CLI.
    pub program: Option<PathBuf>,

    /// Arguments for an explicit `program`, used verbatim
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra `node_modules` directories to search
    #[serde(default)]
    pub node_modules: Vec<PathBuf>,

    /// Extension given to unnamed step binding files
    #[serde(default = "default_step_extension")]
    pub step_extension: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            node_modules: Vec::new(),
            step_extension: default_step_extension(),
        }
    }
}

fn default_step_extension() -> String {
    "ts".to_string()
}

/// Shared browser settings
#[derive(Debug, Deserialize, Clone)]
pub struct BrowserConfig {
    /// Launch one browser per run and hand it to the engine
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Browser executable. Falls back to searching PATH.
    pub executable: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default = "default_launch_timeout")]
    pub launch_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            executable: None,
            headless: true,
            launch_timeout_secs: default_launch_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_launch_timeout() -> u64 {
    30
}

/// Timeouts applied inside each scenario session, in milliseconds
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_session_timeout")]
    pub step_timeout_ms: u64,

    #[serde(default = "default_session_timeout")]
    pub action_timeout_ms: u64,

    #[serde(default = "default_session_timeout")]
    pub navigation_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: default_session_timeout(),
            action_timeout_ms: default_session_timeout(),
            navigation_timeout_ms: default_session_timeout(),
        }
    }
}

fn default_session_timeout() -> u64 {
    60_000
}

/// Run limits
#[derive(Debug, Deserialize, Clone)]
pub struct RunsConfig {
    /// Kill the engine after this many seconds (0 disables)
    #[serde(default = "default_run_timeout")]
    pub timeout_secs: u64,

    /// Maximum simultaneous runs (0 = unlimited)
    #[serde(default)]
    pub max_concurrent: usize,
}

impl Default for RunsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_run_timeout(),
            max_concurrent: 0,
        }
    }
}

fn default_run_timeout() -> u64 {
    300
}

/// Report interpretation
#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    /// Step/hook statuses that mark a scenario as failed
    #[serde(default = "default_failing_statuses")]
    pub failing_statuses: Vec<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            failing_statuses: default_failing_statuses(),
        }
    }
}

fn default_failing_statuses() -> Vec<String> {
    vec!["failed".to_string()]
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist. Environment
    /// overrides are applied on top.
    pub fn load() -> Result<Self> {
        let mut config = match config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an explicit path, then apply env overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no run could work with
    pub fn validate(&self) -> Result<()> {
        let ext = &self.engine.step_extension;
        if ext.is_empty() || ext.contains(['/', '\\', '.']) {
            return Err(super::Error::Config(format!(
                "engine.step_extension '{}' must be a bare extension such as \"ts\"",
                ext
            )));
        }
        if self.server.max_body_mb == 0 {
            return Err(super::Error::Config(
                "server.max_body_mb must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Apply environment overrides (`PORT`, `RUNNER_TMP_BASE`, `PLAYWRIGHT_HEADLESS`)
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT").and_then(|p| p.trim().parse().ok()) {
            self.server.port = port;
        }
        if let Some(base) = lookup("RUNNER_TMP_BASE").filter(|b| !b.is_empty()) {
            self.workspace.base_dir = Some(PathBuf::from(base));
        }
        if lookup("PLAYWRIGHT_HEADLESS").as_deref() == Some("false") {
            self.browser.headless = false;
        }
    }
}
