//! Logging setup
//!
//! Each run executes inside a `run` span holding its `run_id`, so engine,
//! browser and cleanup events can be attributed to the run that caused them.
//! The CLI logs compactly to stderr. The server also appends to a plain-text
//! file that records when each run span opens and closes, with its timings.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::Subscriber;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use super::paths;

const SERVER_LOG_FILE: &str = "server.log";

/// Which entry point is logging; decides the default verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Cli,
    Server,
}

impl LogTarget {
    /// Directives used when `RUST_LOG` is unset
    pub fn default_directives(self) -> &'static str {
        match self {
            LogTarget::Cli => "qa_runner=info,warn",
            LogTarget::Server => "qa_runner=debug,tower_http=info,info",
        }
    }

    fn filter(self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.default_directives()))
    }
}

/// Compact stderr output; span fields such as `run_id` prefix each line
fn console_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(io::stderr)
        .with_target(true)
        .compact()
}

/// Open (creating if needed) the server log inside `dir` for appending
fn open_log_file(dir: &Path) -> io::Result<(PathBuf, File)> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(SERVER_LOG_FILE);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((path, file))
}

/// Initialize tracing for one-shot CLI commands
pub fn init_cli() {
    tracing_subscriber::registry()
        .with(LogTarget::Cli.filter())
        .with(console_layer())
        .init();
}

/// Initialize tracing for the HTTP server.
///
/// Logs go to stderr and, when the platform log directory is usable, to
/// `server.log` inside it. Returns the log file path in that case.
pub fn init_server() -> Option<PathBuf> {
    let opened = paths::log_dir()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no home directory"))
        .and_then(|dir| open_log_file(&dir));

    let (log_file, file_layer) = match opened {
        Ok((path, file)) => {
            let layer = fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);
            (Some(path), Some(layer))
        }
        Err(e) => {
            eprintln!("Warning: Could not open server log, using stderr only: {}", e);
            (None, None)
        }
    };

    tracing_subscriber::registry()
        .with(LogTarget::Server.filter())
        .with(file_layer)
        .with(console_layer())
        .init();

    log_file
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_directives_parse() {
        for target in [LogTarget::Cli, LogTarget::Server] {
            assert!(EnvFilter::try_new(target.default_directives()).is_ok());
        }
        assert!(LogTarget::Server
            .default_directives()
            .starts_with("qa_runner=debug"));
    }

    #[test]
    fn test_open_log_file_creates_dir_and_appends() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("logs");

        let (path, mut file) = open_log_file(&dir).unwrap();
        writeln!(file, "first").unwrap();
        drop(file);

        let (again, mut file) = open_log_file(&dir).unwrap();
        writeln!(file, "second").unwrap();

        assert_eq!(path, again);
        assert_eq!(path, dir.join("server.log"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }
}
