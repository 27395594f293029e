//! Shared browser process
//!
//! One headless Chromium is started per run and shared by every scenario in
//! that run through its DevTools endpoint. The run owns the process: it is
//! stopped by [`BrowserServer::shutdown`] on every exit path, and killed on
//! drop if a path ever forgets. Chromium forks renderer, GPU and zygote
//! helpers, so the browser gets its own process group and the whole group
//! is killed.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;

use crate::common::config::BrowserConfig;
use crate::common::{kill_process_group, parse_devtools_endpoint, Error, Result};

/// Executables searched in PATH when none is configured
const BROWSER_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
];

/// A running browser that scenario sessions connect to
pub struct BrowserServer {
    process: Child,
    endpoint: String,
}

impl BrowserServer {
    /// Find the browser executable from config or PATH
    pub fn locate(config: &BrowserConfig) -> Result<PathBuf> {
        if let Some(path) = &config.executable {
            if path.exists() {
                return Ok(path.clone());
            }
            return which::which(path)
                .map_err(|_| Error::BrowserLaunch(format!("'{}' not found", path.display())));
        }

        BROWSER_CANDIDATES
            .iter()
            .find_map(|name| which::which(name).ok())
            .or_else(playwright_chromium)
            .ok_or_else(|| {
                Error::BrowserLaunch(format!(
                    "no browser found in PATH (tried {}) or in the Playwright cache",
                    BROWSER_CANDIDATES.join(", ")
                ))
            })
    }

    /// Start the browser with its profile inside `profile_dir` and wait for
    /// the DevTools endpoint.
    pub async fn launch(config: &BrowserConfig, profile_dir: &Path) -> Result<Self> {
        let executable = Self::locate(config)?;

        let mut cmd = Command::new(&executable);
        if config.headless {
            cmd.arg("--headless=new");
        }
        cmd.arg("--remote-debugging-port=0")
            .arg(format!("--user-data-dir={}", profile_dir.display()))
            .args(["--no-first-run", "--no-default-browser-check", "--disable-gpu"])
            .arg("about:blank")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        tracing::debug!(browser = %executable.display(), "Launching shared browser");

        let mut process = cmd.spawn().map_err(|e| {
            Error::BrowserLaunch(format!("Failed to start {}: {}", executable.display(), e))
        })?;

        let stderr = process
            .stderr
            .take()
            .ok_or_else(|| Error::BrowserLaunch("Failed to get browser stderr".to_string()))?;
        let mut lines = BufReader::new(stderr).lines();

        let wait = Duration::from_secs(config.launch_timeout_secs);
        let endpoint = timeout(wait, async {
            while let Some(line) = lines.next_line().await? {
                if let Some(endpoint) = parse_devtools_endpoint(&line) {
                    return Ok(Some(endpoint));
                }
                tracing::trace!(target: "qa_runner::browser", "{}", line);
            }
            Ok::<_, std::io::Error>(None)
        })
        .await;

        let endpoint = match endpoint {
            Ok(Ok(Some(endpoint))) => endpoint,
            Ok(Ok(None)) => {
                stop(&mut process).await;
                return Err(Error::BrowserLaunch(
                    "Browser exited before printing its DevTools endpoint".to_string(),
                ));
            }
            Ok(Err(e)) => {
                stop(&mut process).await;
                return Err(Error::BrowserLaunch(format!(
                    "Failed to read browser output: {}",
                    e
                )));
            }
            Err(_) => {
                stop(&mut process).await;
                return Err(Error::BrowserLaunch(format!(
                    "Timed out after {} seconds waiting for DevTools endpoint",
                    config.launch_timeout_secs
                )));
            }
        };

        // Keep draining stderr so the browser never blocks on a full pipe
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::trace!(target: "qa_runner::browser", "{}", line);
            }
        });

        tracing::info!(endpoint = %endpoint, "Shared browser ready");
        Ok(Self { process, endpoint })
    }

    /// DevTools WebSocket endpoint handed to the engine
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Stop the browser with all its helper processes and wait for it to exit
    pub async fn shutdown(mut self) {
        stop(&mut self.process).await;
    }
}

async fn stop(process: &mut Child) {
    kill_process_group(process);
    if let Err(e) = process.kill().await {
        tracing::warn!("Failed to stop shared browser: {}", e);
    }
}

/// Chromium downloaded by `npx playwright install`, newest revision first.
///
/// Honors `PLAYWRIGHT_BROWSERS_PATH`, else the platform cache dir.
fn playwright_chromium() -> Option<PathBuf> {
    let root = std::env::var_os("PLAYWRIGHT_BROWSERS_PATH")
        .map(PathBuf::from)
        .or_else(|| directories::BaseDirs::new().map(|d| d.cache_dir().join("ms-playwright")))?;

    let mut revisions: Vec<PathBuf> = std::fs::read_dir(&root)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("chromium-"))
        })
        .collect();
    revisions.sort();

    revisions.iter().rev().find_map(|dir| {
        [
            "chrome-linux/chrome",
            "chrome-mac/Chromium.app/Contents/MacOS/Chromium",
            "chrome-win/chrome.exe",
        ]
        .iter()
        .map(|rel| dir.join(rel))
        .find(|path| path.exists())
    })
}

impl Drop for BrowserServer {
    fn drop(&mut self) {
        // Best-effort since we can't await in drop
        kill_process_group(&self.process);
        let _ = self.process.start_kill();
    }
}
