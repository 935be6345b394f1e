//! Local backend: direct process execution and filesystem copies.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;

use super::shell::{self, CommandOutput};
use super::{BuildSettings, NodeTransport};
use crate::errors::NodeError;
use crate::plan::{Artifact, UnitRange};
use crate::progress::protocol::{SENTINEL_FILE, WORKER_ENV};
use crate::progress::Sentinel;
use crate::units;

pub struct LocalBackend {
    working_dir: PathBuf,
    settings: Arc<BuildSettings>,
}

impl LocalBackend {
    pub fn new(working_dir: impl AsRef<Path>, settings: Arc<BuildSettings>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            settings,
        }
    }

    async fn run(&self, command: Command) -> Result<CommandOutput, NodeError> {
        shell::capture(command).await.map_err(|e| {
            NodeError::io(
                format!("Failed to spawn process in {}", self.working_dir.display()),
                e,
            )
        })
    }

    /// Replace the units document with a slice and write the sentinel.
    ///
    /// Failures here are build failures with no exit code.
    async fn prepare_build(&self, range: UnitRange, sentinel: &Sentinel) -> Result<(), NodeError> {
        let setup_failed = |context: String, e: std::io::Error| NodeError::Build {
            exit_code: -1,
            stderr: format!("{}: {}", context, e),
        };
        let units_path = self.working_dir.join(&self.settings.units_file);
        let preserved = self
            .working_dir
            .join(units::preserved_name(&self.settings.units_file));
        tokio::fs::rename(&units_path, &preserved)
            .await
            .map_err(|e| setup_failed(format!("Failed to preserve {}", units_path.display()), e))?;
        tokio::fs::write(
            &units_path,
            units::slice_document(&self.settings.units_file, range),
        )
        .await
        .map_err(|e| setup_failed(format!("Failed to write {}", units_path.display()), e))?;
        tokio::fs::write(self.working_dir.join(SENTINEL_FILE), sentinel.to_line())
            .await
            .map_err(|e| setup_failed("Failed to write sentinel file".to_string(), e))
    }
}

#[async_trait]
impl NodeTransport for LocalBackend {
    async fn connect(&mut self) -> Result<(), NodeError> {
        Ok(())
    }

    async fn send_package(&mut self, archive: &Path) -> Result<(), NodeError> {
        tokio::fs::create_dir_all(&self.working_dir)
            .await
            .map_err(|e| NodeError::Transfer {
                message: format!("cannot create {}: {}", self.working_dir.display(), e),
            })?;
        let mut tar = Command::new("tar");
        tar.arg("-xzf").arg(archive).arg("-C").arg(&self.working_dir);
        let out = self.run(tar).await?;
        if !out.success() {
            return Err(NodeError::Transfer {
                message: format!("unpack failed ({}): {}", out.exit_code, out.diagnostic()),
            });
        }
        Ok(())
    }

    async fn install_dependencies(&mut self) -> Result<(), NodeError> {
        let command = &self.settings.install_command;
        let out = self.run(shell::sh(command, &self.working_dir)).await?;
        if !out.success() {
            return Err(NodeError::RemoteCommand {
                command: command.clone(),
                exit_code: out.exit_code,
                stderr: out.diagnostic(),
            });
        }
        Ok(())
    }

    async fn run_build_range(
        &mut self,
        range: UnitRange,
        sentinel: &Sentinel,
    ) -> Result<(), NodeError> {
        self.prepare_build(range, sentinel).await?;
        let mut build = shell::sh(&self.settings.build_command, &self.working_dir);
        build.env(WORKER_ENV, "1");
        let out = self.run(build).await?;
        if !out.success() {
            return Err(NodeError::Build {
                exit_code: out.exit_code,
                stderr: out.diagnostic(),
            });
        }
        Ok(())
    }

    async fn retrieve_artifacts(&mut self, artifacts: &[Artifact]) -> Result<usize, NodeError> {
        let mut copied = 0;
        for artifact in artifacts {
            let files = expand_glob(&self.working_dir, &artifact.remote_spec)?;
            tokio::fs::create_dir_all(&artifact.local_destination)
                .await
                .map_err(|e| {
                    NodeError::io(
                        format!("Failed to create {}", artifact.local_destination.display()),
                        e,
                    )
                })?;
            for file in files {
                let Some(name) = file.file_name() else {
                    continue;
                };
                let dest = artifact.local_destination.join(name);
                tokio::fs::copy(&file, &dest).await.map_err(|e| {
                    NodeError::io(format!("Failed to copy {}", file.display()), e)
                })?;
                copied += 1;
            }
        }
        Ok(copied)
    }

    async fn disconnect(&mut self) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Regular files matching `spec`, relative to `root` unless absolute.
fn expand_glob(root: &Path, spec: &str) -> Result<Vec<PathBuf>, NodeError> {
    let pattern = if Path::new(spec).is_absolute() {
        spec.to_string()
    } else {
        root.join(spec).to_string_lossy().into_owned()
    };
    let paths = glob::glob(&pattern).map_err(|e| NodeError::Transfer {
        message: format!("invalid artifact pattern '{}': {}", spec, e),
    })?;
    Ok(paths.flatten().filter(|p| p.is_file()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::UnitSpec;
    use tempfile::TempDir;

    fn settings(install: &str, build: &str) -> Arc<BuildSettings> {
        Arc::new(BuildSettings {
            install_command: install.to_string(),
            build_command: build.to_string(),
            units_file: "units.json".to_string(),
        })
    }

    fn sentinel() -> Sentinel {
        Sentinel {
            node_id: "node-0-test".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8411,
        }
    }

    fn write_units(dir: &Path, count: usize) {
        let units: Vec<UnitSpec> = (0..count)
            .map(|i| UnitSpec {
                name: format!("u{}", i),
                command: "true".to_string(),
                outputs: vec![],
            })
            .collect();
        std::fs::write(dir.join("units.json"), serde_json::to_string(&units).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_install_failure_carries_exit_code_and_stderr() {
        let dir = TempDir::new().unwrap();
        let mut backend = LocalBackend::new(dir.path(), settings("echo broken >&2; exit 4", "true"));
        match backend.install_dependencies().await {
            Err(NodeError::RemoteCommand {
                exit_code, stderr, ..
            }) => {
                assert_eq!(exit_code, 4);
                assert_eq!(stderr, "broken");
            }
            other => panic!("expected RemoteCommand error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_build_range_slices_units_and_writes_sentinel() {
        let dir = TempDir::new().unwrap();
        write_units(dir.path(), 5);
        // The build sees the worker flag and the slice document.
        let build = format!("test \"${}\" = 1 && cat units.json > seen.json", WORKER_ENV);
        let mut backend = LocalBackend::new(dir.path(), settings("true", &build));

        backend
            .run_build_range(UnitRange::new(2, 2), &sentinel())
            .await
            .unwrap();

        let resolved = units::resolve(dir.path(), "units.json").unwrap();
        let names: Vec<_> = resolved.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["u2", "u3"]);
        assert!(dir.path().join("original.units.json").exists());
        assert!(dir.path().join("seen.json").exists());
        assert_eq!(
            Sentinel::read(dir.path()).unwrap(),
            sentinel(),
            "sentinel must round-trip"
        );
    }

    #[tokio::test]
    async fn test_build_failure_is_build_error() {
        let dir = TempDir::new().unwrap();
        write_units(dir.path(), 1);
        let mut backend = LocalBackend::new(dir.path(), settings("true", "exit 9"));
        let err = backend
            .run_build_range(UnitRange::new(0, 1), &sentinel())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Build { exit_code: 9, .. }));
    }

    #[tokio::test]
    async fn test_missing_units_file_is_build_error() {
        let dir = TempDir::new().unwrap();
        let mut backend = LocalBackend::new(dir.path(), settings("true", "touch built"));
        match backend
            .run_build_range(UnitRange::new(0, 1), &sentinel())
            .await
        {
            Err(NodeError::Build { exit_code, stderr }) => {
                assert_eq!(exit_code, -1);
                assert!(stderr.contains("Failed to preserve"), "{}", stderr);
            }
            other => panic!("expected Build error, got {:?}", other),
        }
        assert!(!dir.path().join("built").exists());
    }

    #[tokio::test]
    async fn test_retrieve_copies_matches_and_tolerates_no_matches() {
        let work = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        std::fs::create_dir_all(work.path().join("dist")).unwrap();
        std::fs::write(work.path().join("dist/a.js"), "a").unwrap();
        std::fs::write(work.path().join("dist/b.js"), "b").unwrap();
        std::fs::write(work.path().join("dist/c.css"), "c").unwrap();

        let dest = out.path().join("bundles");
        let artifacts = vec![
            Artifact {
                remote_spec: "dist/*.js".to_string(),
                local_destination: dest.clone(),
            },
            Artifact {
                remote_spec: "missing/*.map".to_string(),
                local_destination: out.path().join("maps"),
            },
        ];
        let mut backend = LocalBackend::new(work.path(), settings("true", "true"));
        let copied = backend.retrieve_artifacts(&artifacts).await.unwrap();

        assert_eq!(copied, 2);
        assert!(dest.join("a.js").exists());
        assert!(dest.join("b.js").exists());
        assert!(!dest.join("c.css").exists());
        assert!(out.path().join("maps").is_dir());
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_are_no_ops() {
        let dir = TempDir::new().unwrap();
        let mut backend = LocalBackend::new(dir.path().join("never-created"), settings("true", "true"));
        backend.connect().await.unwrap();
        backend.disconnect().await.unwrap();
        assert!(!dir.path().join("never-created").exists());
    }
}
