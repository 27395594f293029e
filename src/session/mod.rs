//! Scenario session lifecycle
//!
//! The hooks themselves run inside the engine process (see
//! `workspace/support/world.ts`): every scenario opens its own browser
//! context and page, always closes it in teardown, and attaches a screenshot
//! inline when the scenario failed. This module owns the Rust side of that
//! contract: the shared browser process and the environment the hooks read.

mod browser;

pub use browser::BrowserServer;

use std::path::Path;

use crate::common::config::{BrowserConfig, SessionConfig};

/// Workspace path the hooks use to locate run output
pub const ENV_WORKSPACE: &str = "RUN_TMP_DIR";
/// DevTools endpoint of the shared browser
pub const ENV_BROWSER_ENDPOINT: &str = "RUNNER_BROWSER_WS_ENDPOINT";

/// Environment variables handed to the engine for the session hooks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnv {
    vars: Vec<(String, String)>,
}

impl SessionEnv {
    pub fn new(
        workspace_root: &Path,
        session: &SessionConfig,
        browser: &BrowserConfig,
        browser_endpoint: Option<&str>,
    ) -> Self {
        let mut vars = vec![
            (
                ENV_WORKSPACE.to_string(),
                workspace_root.to_string_lossy().into_owned(),
            ),
            (
                "CUCUMBER_TIMEOUT_MS".to_string(),
                session.step_timeout_ms.to_string(),
            ),
            (
                "PLAYWRIGHT_ACTION_TIMEOUT".to_string(),
                session.action_timeout_ms.to_string(),
            ),
            (
                "PLAYWRIGHT_NAVIGATION_TIMEOUT".to_string(),
                session.navigation_timeout_ms.to_string(),
            ),
            (
                "PLAYWRIGHT_HEADLESS".to_string(),
                browser.headless.to_string(),
            ),
        ];

        if let Some(endpoint) = browser_endpoint {
            vars.push((ENV_BROWSER_ENDPOINT.to_string(), endpoint.to_string()));
        }

        Self { vars }
    }

    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars().find(|(k, _)| *k == key).map(|(_, v)| v)
    }
}

/// Start the shared browser for a run, if enabled.
///
/// A browser that cannot be started is not fatal: the hooks then launch
/// their own browser inside the engine process.
pub async fn start_shared_browser(
    config: &BrowserConfig,
    workspace_root: &Path,
) -> Option<BrowserServer> {
    if !config.enabled {
        return None;
    }

    let profile_dir = workspace_root.join(".browser-profile");
    match BrowserServer::launch(config, &profile_dir).await {
        Ok(browser) => Some(browser),
        Err(e) => {
            tracing::warn!("Shared browser unavailable, engine will launch its own: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_env_carries_timeouts_and_workspace() {
        let session = SessionConfig {
            step_timeout_ms: 1_000,
            action_timeout_ms: 2_000,
            navigation_timeout_ms: 3_000,
        };
        let env = SessionEnv::new(
            Path::new("/tmp/run-1"),
            &session,
            &BrowserConfig::default(),
            None,
        );

        assert_eq!(env.get(ENV_WORKSPACE), Some("/tmp/run-1"));
        assert_eq!(env.get("CUCUMBER_TIMEOUT_MS"), Some("1000"));
        assert_eq!(env.get("PLAYWRIGHT_ACTION_TIMEOUT"), Some("2000"));
        assert_eq!(env.get("PLAYWRIGHT_NAVIGATION_TIMEOUT"), Some("3000"));
        assert_eq!(env.get("PLAYWRIGHT_HEADLESS"), Some("true"));
        assert_eq!(env.get(ENV_BROWSER_ENDPOINT), None);
    }

    #[test]
    fn test_session_env_includes_browser_endpoint() {
        let env = SessionEnv::new(
            Path::new("/tmp/run-1"),
            &SessionConfig::default(),
            &BrowserConfig::default(),
            Some("ws://127.0.0.1:9222/devtools/browser/x"),
        );
        assert_eq!(
            env.get(ENV_BROWSER_ENDPOINT),
            Some("ws://127.0.0.1:9222/devtools/browser/x")
        );
    }

    #[tokio::test]
    async fn test_disabled_browser_is_not_started() {
        let config = BrowserConfig {
            enabled: false,
            ..BrowserConfig::default()
        };
        assert!(start_shared_browser(&config, Path::new("/tmp")).await.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_browser_falls_back() {
        let config = BrowserConfig {
            executable: Some("/definitely/not/a/browser".into()),
            ..BrowserConfig::default()
        };
        assert!(start_shared_browser(&config, Path::new("/tmp")).await.is_none());
    }

    #[test]
    fn test_hooks_module_closes_context_and_attaches_inline() {
        let hooks = include_str!("../workspace/support/world.ts");
        assert!(hooks.contains(ENV_BROWSER_ENDPOINT));
        assert!(hooks.contains("connectOverCDP"));
        assert!(hooks.contains("await this.attach(screenshot, 'image/png')"));
        assert!(hooks.contains("await this.closeSession()"));
    }
}
