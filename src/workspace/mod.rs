//! Disposable run workspaces
//!
//! Each run gets its own directory under the configured base path:
//!
//! ```text
//! run-<uuid>/
//!   cucumber.js            engine configuration
//!   tsconfig.json          compiler configuration
//!   world.ts               session lifecycle hooks
//!   features/
//!     world.ts             re-export so bindings can `import '../world'`
//!     feature-1.feature    submitted scripts
//!     step_definitions/
//!       steps-1.ts         submitted bindings
//!   report.json            written by the engine
//! ```

use std::io;
use std::path::{Path, PathBuf};

use crate::common::{Error, Result};
use crate::request::{RunRequest, ScriptAsset};

/// Directory holding feature files, relative to the workspace root
pub const FEATURES_DIR: &str = "features";
/// Directory holding step bindings, relative to the features directory
pub const STEP_BINDINGS_DIR: &str = "step_definitions";
/// Support module re-exported next to the features so the engine loads it
pub const FEATURE_SUPPORT_FILE: &str = "world.ts";
/// Entries the workspace itself places in the features directory
pub const RESERVED_FEATURE_NAMES: &[&str] = &[FEATURE_SUPPORT_FILE, STEP_BINDINGS_DIR];
/// Engine configuration file name
pub const ENGINE_CONFIG_FILE: &str = "cucumber.js";
/// Report file the engine writes into the workspace root
pub const REPORT_FILE: &str = "report.json";

const ENGINE_CONFIG: &str = include_str!("support/cucumber.js");
const TSCONFIG: &str = include_str!("support/tsconfig.json");
const SESSION_HOOKS: &str = include_str!("support/world.ts");
const FEATURE_WORLD_REEXPORT: &str = "export * from '../world';\n";

/// A uniquely named directory tree owned by exactly one run
#[derive(Debug, Clone)]
pub struct RunWorkspace {
    id: String,
    root: PathBuf,
    features_path: PathBuf,
    step_bindings_path: PathBuf,
}

impl RunWorkspace {
    /// Pick a fresh workspace location under `base`. Nothing is created yet.
    pub fn allocate(base: &Path) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let root = base.join(format!("run-{}", id));
        let features_path = root.join(FEATURES_DIR);
        let step_bindings_path = features_path.join(STEP_BINDINGS_DIR);

        Self {
            id,
            root,
            features_path,
            step_bindings_path,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn features_path(&self) -> &Path {
        &self.features_path
    }

    pub fn step_bindings_path(&self) -> &Path {
        &self.step_bindings_path
    }

    /// Create the directory tree, write the submitted scripts and seed the
    /// static support files.
    ///
    /// On error the partially written tree is left in place; the caller is
    /// expected to [`remove`](Self::remove) it.
    pub async fn materialize(&self, request: &RunRequest, step_extension: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.step_bindings_path)
            .await
            .map_err(|e| Error::workspace(&self.step_bindings_path, e))?;

        for (index, asset) in request.features.iter().enumerate() {
            let file_name = asset_file_name(asset, "feature", index, "feature");
            write_script(&self.features_path.join(file_name), &asset.content).await?;
        }

        for (index, asset) in request.steps.iter().enumerate() {
            let file_name = asset_file_name(asset, "steps", index, step_extension);
            write_script(&self.step_bindings_path.join(file_name), &asset.content).await?;
        }

        self.seed_support_files().await?;

        tracing::debug!(
            workspace = %self.root.display(),
            features = request.features.len(),
            steps = request.steps.len(),
            "Workspace materialized"
        );
        Ok(())
    }

    async fn seed_support_files(&self) -> Result<()> {
        let files = [
            (self.root.join(ENGINE_CONFIG_FILE), ENGINE_CONFIG),
            (self.root.join("tsconfig.json"), TSCONFIG),
            (self.root.join("world.ts"), SESSION_HOOKS),
            (self.features_path.join(FEATURE_SUPPORT_FILE), FEATURE_WORLD_REEXPORT),
        ];

        for (path, content) in files {
            tokio::fs::write(&path, content)
                .await
                .map_err(|e| Error::workspace(&path, e))?;
        }
        Ok(())
    }

    /// Recursively delete the workspace. A tree that was never created is
    /// not an error.
    pub async fn remove(&self) -> io::Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

fn asset_file_name(asset: &ScriptAsset, prefix: &str, index: usize, extension: &str) -> String {
    match &asset.name {
        Some(name) => name.clone(),
        None => format!("{}-{}.{}", prefix, index + 1, extension),
    }
}

async fn write_script(path: &Path, content: &str) -> Result<()> {
    tokio::fs::write(path, normalize_content(content))
        .await
        .map_err(|e| Error::workspace(path, e))
}

/// Normalize script text so it behaves the same regardless of transport.
///
/// CRLF becomes LF. When the text has no real newline but contains literal
/// `\n` sequences, it was double-escaped somewhere upstream and those
/// sequences are unescaped; likewise for `\t` when there is no real tab.
pub fn normalize_content(text: &str) -> String {
    let mut normalized = text.replace("\r\n", "\n");

    if !normalized.contains('\n') && normalized.contains("\\n") {
        normalized = normalized.replace("\\r\\n", "\n").replace("\\n", "\n");
    }

    if !normalized.contains('\t') && normalized.contains("\\t") {
        normalized = normalized.replace("\\t", "\t");
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request() -> RunRequest {
        RunRequest {
            features: vec![
                ScriptAsset::new(Some("login.feature"), "Feature: Login\r\n  Scenario: ok"),
                ScriptAsset::new(None, "Feature: Second"),
            ],
            steps: vec![ScriptAsset::new(None, "Given('x', () => {});")],
        }
    }

    #[test]
    fn test_normalize_crlf() {
        assert_eq!(normalize_content("a\r\nb\r\n"), "a\nb\n");
    }

    #[test]
    fn test_normalize_double_escaped_newlines_and_tabs() {
        assert_eq!(
            normalize_content("Feature: X\\n\\tScenario: Y\\r\\n"),
            "Feature: X\n\tScenario: Y\n"
        );
    }

    #[test]
    fn test_normalize_keeps_escapes_inside_real_multiline_text() {
        let text = "Given('a \\n b')\n\tWhen x";
        assert_eq!(normalize_content(text), text);
    }

    #[test]
    fn test_allocate_is_unique_and_lazy() {
        let temp = TempDir::new().unwrap();
        let a = RunWorkspace::allocate(temp.path());
        let b = RunWorkspace::allocate(temp.path());

        assert_ne!(a.root(), b.root());
        assert!(a.root().file_name().unwrap().to_str().unwrap().starts_with("run-"));
        assert!(!a.root().exists());
        assert_eq!(a.step_bindings_path(), a.root().join("features/step_definitions"));
    }

    #[tokio::test]
    async fn test_materialize_writes_scripts_and_support_files() {
        let temp = TempDir::new().unwrap();
        let workspace = RunWorkspace::allocate(temp.path());

        workspace.materialize(&request(), "ts").await.unwrap();

        let login = std::fs::read_to_string(workspace.features_path().join("login.feature")).unwrap();
        assert_eq!(login, "Feature: Login\n  Scenario: ok");
        assert!(workspace.features_path().join("feature-2.feature").exists());
        assert!(workspace.step_bindings_path().join("steps-1.ts").exists());

        for support in ["cucumber.js", "tsconfig.json", "world.ts", "features/world.ts"] {
            assert!(workspace.root().join(support).exists(), "missing {}", support);
        }
        let config = std::fs::read_to_string(workspace.root().join("cucumber.js")).unwrap();
        assert!(config.contains("json:report.json"));
    }

    #[tokio::test]
    async fn test_step_extension_is_configurable() {
        let temp = TempDir::new().unwrap();
        let workspace = RunWorkspace::allocate(temp.path());

        workspace.materialize(&request(), "js").await.unwrap();
        assert!(workspace.step_bindings_path().join("steps-1.js").exists());
    }

    #[tokio::test]
    async fn test_remove_deletes_tree_and_tolerates_missing() {
        let temp = TempDir::new().unwrap();
        let workspace = RunWorkspace::allocate(temp.path());

        workspace.remove().await.unwrap();

        workspace.materialize(&request(), "ts").await.unwrap();
        workspace.remove().await.unwrap();
        assert!(!workspace.root().exists());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_materialize_reports_filesystem_error() {
        let temp = TempDir::new().unwrap();
        // A regular file where the base directory should be
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        let workspace = RunWorkspace::allocate(&blocker);
        let err = workspace.materialize(&request(), "ts").await.unwrap_err();
        assert_eq!(err.kind(), "FILESYSTEM_ERROR");
    }
}
