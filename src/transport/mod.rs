//! Node transports: the lifecycle contract and its two backends.
//!
//! | Step                   | [`LocalBackend`]             | [`RemoteBackend`]                          |
//! |------------------------|------------------------------|--------------------------------------------|
//! | `connect`              | no-op                        | start an SSH multiplexing master           |
//! | `send_package`         | unpack archive in place      | upload to temp path, unpack remotely       |
//! | `install_dependencies` | run install command          | run install command with a minimal `PATH`  |
//! | `run_build_range`      | slice units, write sentinel, run build | same, staged locally then uploaded |
//! | `retrieve_artifacts`   | glob + copy                  | helper script lists files, `scp` each one  |
//! | `disconnect`           | no-op                        | stop the master                            |
//!
//! A transport is owned by exactly one node pipeline, which calls
//! `disconnect` exactly once on exit whatever happened before.

pub mod local;
pub mod remote;
pub mod shell;

use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::config::{FleetConfig, NodeType};
use crate::errors::NodeError;
use crate::plan::{Artifact, NodeSpec, UnitRange};
use crate::progress::Sentinel;

pub use local::LocalBackend;
pub use remote::RemoteBackend;

/// Commands and file names every backend needs.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub install_command: String,
    pub build_command: String,
    pub units_file: String,
}

impl BuildSettings {
    pub fn from_config(config: &FleetConfig) -> Self {
        Self {
            install_command: config.install_command.clone(),
            build_command: config.build.command.clone(),
            units_file: config.build.units_file.clone(),
        }
    }
}

/// The node lifecycle, implemented once per substrate.
#[async_trait]
pub trait NodeTransport: Send {
    /// Open the session. Fails with [`NodeError::Connection`].
    async fn connect(&mut self) -> Result<(), NodeError>;

    /// Place the archived project at the working directory. Fails with [`NodeError::Transfer`].
    async fn send_package(&mut self, archive: &Path) -> Result<(), NodeError>;

    /// Run the install command. Fails with [`NodeError::RemoteCommand`].
    async fn install_dependencies(&mut self) -> Result<(), NodeError>;

    /// Slice the units document to `range`, write the sentinel and run the build.
    /// Fails with [`NodeError::Build`] when the build command fails.
    async fn run_build_range(
        &mut self,
        range: UnitRange,
        sentinel: &Sentinel,
    ) -> Result<(), NodeError>;

    /// Copy every file matching each artifact into its local destination.
    /// Returns the number of files copied; zero is valid.
    async fn retrieve_artifacts(&mut self, artifacts: &[Artifact]) -> Result<usize, NodeError>;

    /// Release the session.
    async fn disconnect(&mut self) -> Result<(), NodeError>;
}

/// Creates the transport for a node.
pub trait TransportFactory: Send + Sync {
    fn create(&self, node: &NodeSpec, settings: &Arc<BuildSettings>) -> Box<dyn NodeTransport>;
}

/// Picks the backend from the node's kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTransports;

impl TransportFactory for DefaultTransports {
    fn create(&self, node: &NodeSpec, settings: &Arc<BuildSettings>) -> Box<dyn NodeTransport> {
        match (node.kind, &node.remote) {
            (NodeType::Ssh, Some(target)) => Box::new(RemoteBackend::new(
                &node.working_dir,
                target.clone(),
                settings.clone(),
            )),
            _ => Box::new(LocalBackend::new(&node.working_dir, settings.clone())),
        }
    }
}

/// Write `content` to a uniquely named file in `dir` that is removed when dropped.
pub(crate) fn stage_file(
    dir: &Path,
    prefix: &str,
    content: &str,
) -> Result<tempfile::NamedTempFile, NodeError> {
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .tempfile_in(dir)
        .map_err(|e| NodeError::io("Failed to create staging file", e))?;
    file.write_all(content.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|e| NodeError::io("Failed to write staging file", e))?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_files_have_distinct_names_and_are_removed() {
        let dir = tempfile::TempDir::new().unwrap();
        let a = stage_file(dir.path(), "fleetpack-slice-", "a").unwrap();
        let b = stage_file(dir.path(), "fleetpack-slice-", "b").unwrap();
        assert!(a.path().starts_with(dir.path()));
        assert_ne!(a.path(), b.path());
        assert_eq!(std::fs::read_to_string(a.path()).unwrap(), "a");

        let path = a.path().to_path_buf();
        drop(a);
        assert!(!path.exists());
    }
}
