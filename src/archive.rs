//! Project archiving.
//!
//! The project tree is packed once per run into a gzipped tarball under the
//! system temp directory. Every node unpacks the same file; the orchestrator
//! removes it once all nodes have ingested it, and again on teardown.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use uuid::Uuid;

use crate::errors::RunError;
use crate::transport::shell;

/// Directories never shipped to nodes.
pub const DEFAULT_EXCLUDES: [&str; 2] = ["node_modules", ".git"];

#[async_trait]
pub trait Packager: Send + Sync {
    /// Archive `project_dir` and return the archive path.
    async fn pack(&self, project_dir: &Path) -> Result<PathBuf, RunError>;
}

/// Packs with the system `tar`.
#[derive(Debug, Clone)]
pub struct TarPackager {
    out_dir: PathBuf,
    excludes: Vec<String>,
}

impl Default for TarPackager {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl TarPackager {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            excludes: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn command(&self, project_dir: &Path, archive: &Path) -> Command {
        let mut tar = Command::new("tar");
        tar.arg("-czf").arg(archive);
        for pattern in &self.excludes {
            tar.arg(format!("--exclude={}", pattern));
        }
        tar.arg("-C").arg(project_dir).arg(".");
        tar
    }
}

#[async_trait]
impl Packager for TarPackager {
    async fn pack(&self, project_dir: &Path) -> Result<PathBuf, RunError> {
        let archive = self
            .out_dir
            .join(format!("fleetpack-{}.tar.gz", Uuid::new_v4().simple()));
        let out = shell::capture(self.command(project_dir, &archive))
            .await
            .map_err(|e| RunError::Archive(format!("cannot run tar: {}", e)))?;
        if !out.success() {
            let _ = tokio::fs::remove_file(&archive).await;
            return Err(RunError::Archive(format!(
                "tar exited with code {}: {}",
                out.exit_code,
                out.diagnostic()
            )));
        }
        tracing::debug!(archive = %archive.display(), "project archived");
        Ok(archive)
    }
}

/// Delete the archive if it still exists. Failures are logged, never raised.
pub async fn remove(archive: &Path) {
    match tokio::fs::remove_file(archive).await {
        Ok(()) => tracing::debug!(archive = %archive.display(), "archive removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(archive = %archive.display(), error = %e, "failed to remove archive"),
    }
}
