//! SSH backend driven through the OpenSSH client.
//!
//! `connect` starts a background master (`ssh -M -N -f`) on a private
//! control socket; every later `ssh` and `scp` invocation multiplexes over
//! it, so authentication happens once per node. Password credentials go
//! through `sshpass -e` so the secret never appears on a command line.
//!
//! Remote commands run as `cd <workingDir> && export PATH=<minimal> && <cmd>`
//! because a non-interactive session does not read the user's profile.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use uuid::Uuid;

use super::shell::{self, CommandOutput, quote};
use super::{BuildSettings, NodeTransport, stage_file};
use crate::errors::NodeError;
use crate::plan::{Artifact, Credential, RemoteTarget, UnitRange};
use crate::progress::Sentinel;
use crate::progress::protocol::{SENTINEL_FILE, WORKER_ENV};
use crate::units;

/// Lists regular files matching `$2` under `$1`, one per line.
const GLOB_HELPER: &str = r#"cd "$1" || exit 0
for f in $2; do
  [ -f "$f" ] && printf '%s\n' "$f"
done
exit 0
"#;

pub struct RemoteBackend {
    working_dir: String,
    target: RemoteTarget,
    settings: Arc<BuildSettings>,
    control_path: PathBuf,
    /// Where uploads are staged locally.
    staging_dir: PathBuf,
    connected: bool,
    glob_helper: Option<String>,
}

impl RemoteBackend {
    pub fn new(working_dir: &str, target: RemoteTarget, settings: Arc<BuildSettings>) -> Self {
        let tag = Uuid::new_v4().simple().to_string();
        // Unix socket paths are length-limited; keep this short.
        let control_path = std::env::temp_dir().join(format!("fleetpack-{}.ctl", &tag[..12]));
        Self {
            working_dir: working_dir.to_string(),
            target,
            settings,
            control_path,
            staging_dir: std::env::temp_dir(),
            connected: false,
            glob_helper: None,
        }
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    /// Options shared by every ssh and scp invocation.
    fn common_options(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
            "-o".to_string(),
            format!("ServerAliveInterval={}", self.target.keep_alive_secs),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            "ConnectTimeout=20".to_string(),
        ];
        match &self.target.credential {
            Credential::KeyFile(key) => {
                args.push("-i".to_string());
                args.push(key.display().to_string());
            }
            Credential::Password(_) => {
                args.push("-o".to_string());
                args.push("PubkeyAuthentication=no".to_string());
            }
            Credential::Agent => {
                args.push("-o".to_string());
                args.push("BatchMode=yes".to_string());
            }
        }
        args
    }

    /// `program`, wrapped in `sshpass -e` for password credentials.
    fn client(&self, program: &str) -> Command {
        match &self.target.credential {
            Credential::Password(password) => {
                let mut command = Command::new("sshpass");
                command.arg("-e").arg(program).env("SSHPASS", password);
                command
            }
            _ => Command::new(program),
        }
    }

    fn ssh(&self) -> Command {
        let mut command = self.client("ssh");
        command
            .args(self.common_options())
            .arg("-p")
            .arg(self.target.port.to_string());
        command
    }

    fn scp(&self) -> Command {
        let mut command = self.client("scp");
        command
            .arg("-q")
            .args(self.common_options())
            .arg("-P")
            .arg(self.target.port.to_string());
        command
    }

    /// Prefix `script` with the minimal `PATH`.
    fn with_path(&self, script: &str) -> String {
        format!("export PATH={} && {}", quote(&self.target.path_env), script)
    }

    /// `script` run inside the working directory.
    fn in_working_dir(&self, script: &str) -> String {
        format!("cd {} && {}", quote(&self.working_dir), self.with_path(script))
    }

    fn remote_file(&self, name: &str) -> String {
        format!("{}/{}", self.working_dir.trim_end_matches('/'), name)
    }

    async fn exec(&self, script: &str) -> Result<CommandOutput, NodeError> {
        let mut command = self.ssh();
        command.arg(self.target.user_at_host()).arg(script);
        tracing::debug!(host = %self.target.host, script, "remote exec");
        shell::capture(command)
            .await
            .map_err(|e| NodeError::io("Failed to spawn ssh", e))
    }

    async fn put(&self, local: &Path, remote: &str) -> Result<(), NodeError> {
        let mut command = self.scp();
        command
            .arg(local)
            .arg(format!("{}:{}", self.target.user_at_host(), remote));
        let out = shell::capture(command)
            .await
            .map_err(|e| NodeError::io("Failed to spawn scp", e))?;
        if !out.success() {
            return Err(NodeError::Transfer {
                message: format!("upload to {} failed: {}", remote, out.diagnostic()),
            });
        }
        Ok(())
    }

    async fn get(&self, remote: &str, local: &Path) -> Result<(), NodeError> {
        let mut command = self.scp();
        command
            .arg(format!("{}:{}", self.target.user_at_host(), remote))
            .arg(local);
        let out = shell::capture(command)
            .await
            .map_err(|e| NodeError::io("Failed to spawn scp", e))?;
        if !out.success() {
            return Err(NodeError::Transfer {
                message: format!("download of {} failed: {}", remote, out.diagnostic()),
            });
        }
        Ok(())
    }

    /// Upload the glob helper once per session.
    async fn glob_helper(&mut self) -> Result<String, NodeError> {
        if let Some(path) = &self.glob_helper {
            return Ok(path.clone());
        }
        let remote = format!(
            "{}/fleetpack-glob-{}.sh",
            self.target.temp_dir.trim_end_matches('/'),
            Uuid::new_v4().simple()
        );
        let staged = stage_file(&self.staging_dir, "fleetpack-glob-", GLOB_HELPER)?;
        self.put(staged.path(), &remote).await?;
        self.glob_helper = Some(remote.clone());
        Ok(remote)
    }
}

#[async_trait]
impl NodeTransport for RemoteBackend {
    async fn connect(&mut self) -> Result<(), NodeError> {
        let host = self.target.host.clone();
        let connection_err = |message: String| NodeError::Connection {
            host: host.clone(),
            message,
        };

        // `-f` forks the master into the background. Output goes to a file
        // rather than a pipe, or the forked master would hold the pipe open.
        let stderr_log = tempfile::NamedTempFile::new()
            .map_err(|e| NodeError::io("Failed to create ssh log", e))?;
        let stderr_file = stderr_log
            .reopen()
            .map_err(|e| NodeError::io("Failed to open ssh log", e))?;

        let mut command = self.ssh();
        command
            .args(["-M", "-N", "-f", "-o", "ControlPersist=yes"])
            .arg(self.target.user_at_host())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr_file));

        let status = command
            .status()
            .await
            .map_err(|e| connection_err(format!("cannot start ssh: {}", e)))?;
        if !status.success() {
            let log = std::fs::read_to_string(stderr_log.path()).unwrap_or_default();
            return Err(connection_err(log.trim().to_string()));
        }
        self.connected = true;
        tracing::debug!(host = %self.target.host, control = %self.control_path.display(), "ssh master started");
        Ok(())
    }

    async fn send_package(&mut self, archive: &Path) -> Result<(), NodeError> {
        let remote_archive = format!(
            "{}/fleetpack-{}.tar.gz",
            self.target.temp_dir.trim_end_matches('/'),
            Uuid::new_v4().simple()
        );
        self.put(archive, &remote_archive).await?;

        let wd = quote(&self.working_dir);
        let ra = quote(&remote_archive);
        let script = self.with_path(&format!(
            "mkdir -p {wd} && tar -xzf {ra} -C {wd}; status=$?; rm -f {ra}; exit $status"
        ));
        let out = self.exec(&script).await?;
        if !out.success() {
            return Err(NodeError::Transfer {
                message: format!("unpack failed ({}): {}", out.exit_code, out.diagnostic()),
            });
        }
        Ok(())
    }

    async fn install_dependencies(&mut self) -> Result<(), NodeError> {
        let command = self.settings.install_command.clone();
        let out = self.exec(&self.in_working_dir(&command)).await?;
        if !out.success() {
            return Err(NodeError::RemoteCommand {
                command,
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
        let units_file = self.settings.units_file.clone();
        // Staged files are removed on drop, on every exit path.
        let slice = stage_file(
            &self.staging_dir,
            "fleetpack-slice-",
            &units::slice_document(&units_file, range),
        )?;
        let marker = stage_file(&self.staging_dir, "fleetpack-node-", &sentinel.to_line())?;

        let preserve = format!(
            "mv -f {} {}",
            quote(&units_file),
            quote(&units::preserved_name(&units_file))
        );
        let out = self.exec(&self.in_working_dir(&preserve)).await?;
        if !out.success() {
            return Err(NodeError::RemoteCommand {
                command: preserve,
                exit_code: out.exit_code,
                stderr: out.diagnostic(),
            });
        }

        self.put(slice.path(), &self.remote_file(&units_file)).await?;
        self.put(marker.path(), &self.remote_file(SENTINEL_FILE)).await?;

        let build = format!("export {}=1 && {}", WORKER_ENV, self.settings.build_command);
        let out = self.exec(&self.in_working_dir(&build)).await?;
        if !out.success() {
            return Err(NodeError::Build {
                exit_code: out.exit_code,
                stderr: out.diagnostic(),
            });
        }
        Ok(())
    }

    async fn retrieve_artifacts(&mut self, artifacts: &[Artifact]) -> Result<usize, NodeError> {
        if artifacts.is_empty() {
            return Ok(0);
        }
        let helper = self.glob_helper().await?;
        let mut copied = 0;
        for artifact in artifacts {
            tokio::fs::create_dir_all(&artifact.local_destination)
                .await
                .map_err(|e| {
                    NodeError::io(
                        format!("Failed to create {}", artifact.local_destination.display()),
                        e,
                    )
                })?;
            let list = format!(
                "sh {} {} {}",
                quote(&helper),
                quote(&self.working_dir),
                quote(&artifact.remote_spec)
            );
            let out = self.exec(&self.with_path(&list)).await?;
            if !out.success() {
                return Err(NodeError::Transfer {
                    message: format!(
                        "listing '{}' failed: {}",
                        artifact.remote_spec,
                        out.diagnostic()
                    ),
                });
            }
            for file in out.stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
                let Some(name) = Path::new(file).file_name() else {
                    continue;
                };
                let remote = if file.starts_with('/') {
                    file.to_string()
                } else {
                    self.remote_file(file)
                };
                self.get(&remote, &artifact.local_destination.join(name))
                    .await?;
                copied += 1;
            }
        }
        Ok(copied)
    }

    async fn disconnect(&mut self) -> Result<(), NodeError> {
        if !self.connected {
            return Ok(());
        }
        if let Some(helper) = self.glob_helper.take() {
            let _ = self.exec(&format!("rm -f {}", quote(&helper))).await;
        }

        let mut command = self.ssh();
        command
            .arg("-O")
            .arg("exit")
            .arg(self.target.user_at_host());
        let result = shell::capture(command).await;
        self.connected = false;
        let _ = std::fs::remove_file(&self.control_path);

        let out = result.map_err(|e| NodeError::io("Failed to spawn ssh", e))?;
        if !out.success() {
            return Err(NodeError::Connection {
                host: self.target.host.clone(),
                message: format!("closing session: {}", out.diagnostic()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_REMOTE_PATH;

    fn target(credential: Credential) -> RemoteTarget {
        RemoteTarget {
            host: "builder-1".to_string(),
            port: 2222,
            username: "ci".to_string(),
            credential,
            keep_alive_secs: 15,
            temp_dir: "/tmp".to_string(),
            path_env: DEFAULT_REMOTE_PATH.to_string(),
        }
    }

    fn backend(credential: Credential) -> RemoteBackend {
        RemoteBackend::new(
            "/srv/build",
            target(credential),
            Arc::new(BuildSettings {
                install_command: "npm ci".to_string(),
                build_command: "fleetpack worker".to_string(),
                units_file: "fleetpack.units.json".to_string(),
            }),
        )
    }

    fn args(command: &Command) -> Vec<String> {
        command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_ssh_uses_control_socket_keepalive_and_port() {
        let b = backend(Credential::Agent);
        let command = b.ssh();
        assert_eq!(command.as_std().get_program(), "ssh");
        let args = args(&command);
        assert!(args.contains(&format!("ControlPath={}", b.control_path.display())));
        assert!(args.contains(&"ServerAliveInterval=15".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        let p = args.iter().position(|a| a == "-p").unwrap();
        assert_eq!(args[p + 1], "2222");
    }

    #[test]
    fn test_key_credential_passes_identity_file() {
        let b = backend(Credential::KeyFile(PathBuf::from("/home/ci/.ssh/id_ed25519")));
        let args = args(&b.scp());
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i + 1], "/home/ci/.ssh/id_ed25519");
        let p = args.iter().position(|a| a == "-P").unwrap();
        assert_eq!(args[p + 1], "2222");
    }

    #[test]
    fn test_password_credential_goes_through_sshpass_env() {
        let b = backend(Credential::Password("hunter2".to_string()));
        let command = b.ssh();
        assert_eq!(command.as_std().get_program(), "sshpass");
        let args = args(&command);
        assert_eq!(&args[..2], &["-e".to_string(), "ssh".to_string()]);
        assert!(!args.iter().any(|a| a.contains("hunter2")));
        let env: Vec<_> = command.as_std().get_envs().collect();
        assert!(
            env.iter()
                .any(|(k, v)| *k == "SSHPASS" && v.is_some_and(|v| v == "hunter2"))
        );
    }

    #[test]
    fn test_remote_scripts_run_in_working_dir_with_minimal_path() {
        let b = backend(Credential::Agent);
        assert_eq!(
            b.in_working_dir("npm ci"),
            "cd /srv/build && export PATH=/usr/local/bin:/usr/bin:/bin && npm ci"
        );
        assert_eq!(b.remote_file(SENTINEL_FILE), "/srv/build/fleetpack-node.info");
    }

    #[test]
    fn test_control_paths_are_unique_per_backend() {
        let a = backend(Credential::Agent);
        let b = backend(Credential::Agent);
        assert_ne!(a.control_path, b.control_path);
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_a_no_op() {
        let mut b = backend(Credential::Agent);
        b.disconnect().await.unwrap();
        assert!(!b.connected);
    }

    #[tokio::test]
    async fn test_failed_build_range_leaves_no_staged_files() {
        let staging = tempfile::TempDir::new().unwrap();
        let mut unreachable = target(Credential::Agent);
        unreachable.host = "127.0.0.1".to_string();
        unreachable.port = 1;
        let mut b = RemoteBackend::new(
            "/srv/build",
            unreachable,
            Arc::new(BuildSettings {
                install_command: "npm ci".to_string(),
                build_command: "fleetpack worker".to_string(),
                units_file: "fleetpack.units.json".to_string(),
            }),
        )
        .with_staging_dir(staging.path());
        let sentinel = Sentinel {
            node_id: "node-0-abcd1234".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8411,
        };

        let result = b
            .run_build_range(UnitRange { first: 0, count: 3 }, &sentinel)
            .await;
        assert!(result.is_err());
        let left: Vec<_> = std::fs::read_dir(staging.path()).unwrap().collect();
        assert!(left.is_empty(), "staged files left behind: {:?}", left);
    }

    #[test]
    fn test_glob_helper_lists_only_regular_files() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("dist/sub.js")).unwrap();
        std::fs::write(dir.path().join("dist/a.js"), "").unwrap();
        std::fs::write(dir.path().join("dist/b.css"), "").unwrap();
        let helper = dir.path().join("helper.sh");
        std::fs::write(&helper, GLOB_HELPER).unwrap();

        let out = std::process::Command::new("sh")
            .arg(&helper)
            .arg(dir.path())
            .arg("dist/*.js")
            .output()
            .unwrap();
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout), "dist/a.js\n");

        let none = std::process::Command::new("sh")
            .arg(&helper)
            .arg(dir.path())
            .arg("missing/*.map")
            .output()
            .unwrap();
        assert!(none.status.success());
        assert!(none.stdout.is_empty());
    }
}
