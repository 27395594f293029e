//! Common utilities shared by the CLI, the server and the run engine

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};

/// Parse the DevTools endpoint a Chromium-based browser prints on startup.
///
/// Chromium writes `DevTools listening on ws://127.0.0.1:PORT/devtools/browser/<id>`
/// to stderr once `--remote-debugging-port` is bound.
pub fn parse_devtools_endpoint(line: &str) -> Option<String> {
    const MARKER: &str = "DevTools listening on";
    let start = line.find(MARKER)?;
    let endpoint = line[start + MARKER.len()..].trim();
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        Some(endpoint.to_string())
    } else {
        None
    }
}

/// Kill every process in the group led by `child`.
///
/// The child must have been spawned with `process_group(0)`. Does nothing
/// once the child has been reaped, or on platforms without process groups.
pub(crate) fn kill_process_group(child: &tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // Negative pid addresses the whole process group
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = child;
}
