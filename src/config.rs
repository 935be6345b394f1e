//! Build-plan configuration.
//!
//! Reads `fleetpack.toml` (or `fleetpack.json`) from the project directory.
//! Layering is file → environment → CLI: the file is parsed first,
//! `FLEETPACK_PROGRESS_PORT` / `FLEETPACK_ADVERTISE_HOST` override the
//! progress section, and the CLI applies its own overrides afterwards.
//!
//! # Configuration File Format
//!
//! ```toml
//! installCommand = "npm install"
//!
//! [build]
//! command = "fleetpack worker"
//! unitsFile = "fleetpack.units.json"
//!
//! [progress]
//! port = 8411
//! advertiseHost = "10.0.0.5"
//!
//! [verify]
//! outputDirectory = "dist"
//! filenameRegex = "\\.js$"
//!
//! [[nodes]]
//! nodeType = "local"
//! weight = 1
//! workingDir = "/tmp/fleet/local"
//!
//! [[nodes]]
//! nodeType = "ssh"
//! weight = 2
//! workingDir = "/srv/build"
//! host = "builder-1"
//! username = "ci"
//! privateKey = "~/.ssh/id_ed25519"
//!
//! [[nodes.artifacts]]
//! remote = "dist/*.js"
//! local = "dist"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file names probed in the project directory, in order.
pub const CONFIG_FILE_NAMES: [&str; 2] = ["fleetpack.toml", "fleetpack.json"];

/// Default port of the progress aggregation endpoint.
pub const DEFAULT_PROGRESS_PORT: u16 = 8411;

/// Default units document name.
pub const DEFAULT_UNITS_FILE: &str = "fleetpack.units.json";

/// Minimal `PATH` exported for commands run over SSH.
pub const DEFAULT_REMOTE_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Which transport drives a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Local,
    Ssh,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeType::Local => write!(f, "local"),
            NodeType::Ssh => write!(f, "ssh"),
        }
    }
}

/// A declared artifact: a path or glob on the node, copied into a local directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub remote: String,
    pub local: PathBuf,
}

/// One worker node entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    pub node_type: NodeType,
    pub weight: f64,
    pub working_dir: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key: Option<PathBuf>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactConfig>,
    #[serde(default)]
    pub temp_dir: Option<String>,
    #[serde(default)]
    pub remote_path: Option<String>,
    #[serde(default)]
    pub keep_alive_secs: Option<u64>,
}

/// Build command and units document location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    #[serde(default = "default_build_command")]
    pub command: String,
    #[serde(default = "default_units_file")]
    pub units_file: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: default_build_command(),
            units_file: default_units_file(),
        }
    }
}

/// Aggregation endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressConfig {
    #[serde(default = "default_progress_port")]
    pub port: u16,
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    /// Host written into each node's sentinel file; must be reachable from the nodes.
    #[serde(default = "default_advertise_host")]
    pub advertise_host: String,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            port: default_progress_port(),
            bind_host: default_bind_host(),
            advertise_host: default_advertise_host(),
        }
    }
}

/// Post-build output check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyConfig {
    pub output_directory: PathBuf,
    #[serde(default)]
    pub filename_regex: Option<String>,
}

/// Top-level build-plan configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetConfig {
    pub nodes: Vec<NodeConfig>,
    #[serde(default = "default_install_command")]
    pub install_command: String,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub verify: Option<VerifyConfig>,
}

fn default_build_command() -> String {
    "fleetpack worker".to_string()
}

fn default_units_file() -> String {
    DEFAULT_UNITS_FILE.to_string()
}

fn default_install_command() -> String {
    "npm install".to_string()
}

fn default_progress_port() -> u16 {
    DEFAULT_PROGRESS_PORT
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_advertise_host() -> String {
    "127.0.0.1".to_string()
}

impl FleetConfig {
    /// Load from an explicit path, or probe the project directory.
    ///
    /// Environment overrides are applied and the result is validated, then
    /// relative local working directories, artifact destinations and the
    /// verify output directory are resolved against `project_dir`.
    pub fn load(project_dir: &Path, explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => project_dir.join(p),
            None => Self::find(project_dir).with_context(|| {
                format!(
                    "No {} found in {}",
                    CONFIG_FILE_NAMES.join(" or "),
                    project_dir.display()
                )
            })?,
        };
        let mut config = Self::load_file(&path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        config.resolve_paths(project_dir);
        Ok(config)
    }

    fn find(project_dir: &Path) -> Option<PathBuf> {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| project_dir.join(name))
            .find(|p| p.exists())
    }

    /// Parse a config file, choosing JSON or TOML by extension.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
            _ => Self::parse_toml(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid TOML")
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("FLEETPACK_PROGRESS_PORT") {
            self.progress.port = port
                .parse()
                .with_context(|| format!("Invalid FLEETPACK_PROGRESS_PORT '{}'", port))?;
        }
        if let Ok(host) = std::env::var("FLEETPACK_ADVERTISE_HOST") {
            self.progress.advertise_host = host;
        }
        Ok(())
    }

    fn resolve_paths(&mut self, project_dir: &Path) {
        for node in &mut self.nodes {
            if node.node_type == NodeType::Local && Path::new(&node.working_dir).is_relative() {
                node.working_dir = project_dir
                    .join(&node.working_dir)
                    .to_string_lossy()
                    .into_owned();
            }
            for artifact in &mut node.artifacts {
                if artifact.local.is_relative() {
                    artifact.local = project_dir.join(&artifact.local);
                }
            }
        }
        if let Some(verify) = &mut self.verify {
            if verify.output_directory.is_relative() {
                verify.output_directory = project_dir.join(&verify.output_directory);
            }
        }
    }

    /// Check structural constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            anyhow::bail!("at least one node must be configured");
        }
        let mut local_dirs: Vec<(usize, PathBuf)> = Vec::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if !node.weight.is_finite() || node.weight <= 0.0 {
                anyhow::bail!("node {}: weight must be a positive number, got {}", i, node.weight);
            }
            if node.working_dir.trim().is_empty() {
                anyhow::bail!("node {}: workingDir must not be empty", i);
            }
            if node.node_type == NodeType::Local {
                // Component-wise, so `/tmp/a/` and `/tmp//a` collide with `/tmp/a`.
                let dir: PathBuf = Path::new(node.working_dir.trim()).components().collect();
                if let Some((first, _)) = local_dirs.iter().find(|(_, d)| *d == dir) {
                    anyhow::bail!(
                        "node {}: workingDir '{}' is already used by local node {}",
                        i,
                        node.working_dir,
                        first
                    );
                }
                local_dirs.push((i, dir));
            }
            if node.node_type == NodeType::Ssh {
                if node.host.as_deref().is_none_or(str::is_empty) {
                    anyhow::bail!("node {}: ssh nodes require 'host'", i);
                }
                if node.username.as_deref().is_none_or(str::is_empty) {
                    anyhow::bail!("node {}: ssh nodes require 'username'", i);
                }
                if node.password.is_some() && node.private_key.is_some() {
                    anyhow::bail!("node {}: set either 'password' or 'privateKey', not both", i);
                }
                if is_loopback(&self.progress.advertise_host) {
                    tracing::warn!(
                        node = i,
                        host = %self.progress.advertise_host,
                        "progress advertise host is loopback; remote node cannot report progress"
                    );
                }
            }
        }
        if let Some(pattern) = self.verify.as_ref().and_then(|v| v.filename_regex.as_deref()) {
            regex::Regex::new(pattern)
                .with_context(|| format!("Invalid verify.filenameRegex '{}'", pattern))?;
        }
        Ok(())
    }

    pub fn has_remote_nodes(&self) -> bool {
        self.nodes.iter().any(|n| n.node_type == NodeType::Ssh)
    }
}

fn is_loopback(host: &str) -> bool {
    host == "localhost"
        || host
            .parse::<std::net::IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
[[nodes]]
nodeType = "local"
weight = 1
workingDir = "/tmp/a"
"#;

    #[test]
    fn test_defaults_are_applied() {
        let config = FleetConfig::parse_toml(MINIMAL).unwrap();
        assert_eq!(config.install_command, "npm install");
        assert_eq!(config.build.command, "fleetpack worker");
        assert_eq!(config.build.units_file, DEFAULT_UNITS_FILE);
        assert_eq!(config.progress.port, DEFAULT_PROGRESS_PORT);
        assert_eq!(config.progress.bind_host, "0.0.0.0");
        assert!(config.verify.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_ssh_node_parses() {
        let toml = r#"
installCommand = "yarn"

[verify]
outputDirectory = "dist"
filenameRegex = "\\.js$"

[[nodes]]
nodeType = "ssh"
weight = 2.5
workingDir = "/srv/build"
host = "builder-1"
port = 2222
username = "ci"
privateKey = "/home/ci/.ssh/id_ed25519"
tempDir = "/var/tmp"

[[nodes.artifacts]]
remote = "dist/*.js"
local = "out"
"#;
        let config = FleetConfig::parse_toml(toml).unwrap();
        let node = &config.nodes[0];
        assert_eq!(node.node_type, NodeType::Ssh);
        assert_eq!(node.port, Some(2222));
        assert_eq!(node.artifacts[0].remote, "dist/*.js");
        assert_eq!(node.temp_dir.as_deref(), Some("/var/tmp"));
        assert_eq!(config.install_command, "yarn");
        assert!(config.has_remote_nodes());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_config_uses_same_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fleetpack.json");
        std::fs::write(
            &path,
            r#"{"nodes":[{"nodeType":"local","weight":1,"workingDir":"w","artifacts":[{"remote":"dist/*","local":"out"}]}],
                "verify":{"outputDirectory":"out"}}"#,
        )
        .unwrap();
        let config = FleetConfig::load(dir.path(), None).unwrap();
        assert_eq!(config.nodes[0].artifacts[0].local, dir.path().join("out"));
        assert_eq!(
            config.verify.unwrap().output_directory,
            dir.path().join("out")
        );
    }

    #[test]
    fn test_missing_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = FleetConfig::load(dir.path(), None).unwrap_err();
        assert!(err.to_string().contains("fleetpack.toml"));
    }

    #[test]
    fn test_rejects_empty_node_list() {
        let config = FleetConfig::parse_toml("nodes = []").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_positive_weight() {
        let toml = MINIMAL.replace("weight = 1", "weight = 0");
        let config = FleetConfig::parse_toml(&toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("weight"));
    }

    #[test]
    fn test_ssh_node_requires_host_and_username() {
        let toml = r#"
[[nodes]]
nodeType = "ssh"
weight = 1
workingDir = "/srv"
username = "ci"
"#;
        let config = FleetConfig::parse_toml(toml).unwrap();
        assert!(config.validate().unwrap_err().to_string().contains("host"));
    }

    #[test]
    fn test_ssh_node_rejects_both_credentials() {
        let toml = r#"
[[nodes]]
nodeType = "ssh"
weight = 1
workingDir = "/srv"
host = "h"
username = "ci"
password = "pw"
privateKey = "/k"
"#;
        let config = FleetConfig::parse_toml(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_local_nodes_cannot_share_working_dir() {
        let toml = format!(
            "{}\n[[nodes]]\nnodeType = \"local\"\nweight = 2\nworkingDir = \"/tmp/a/\"\n",
            MINIMAL
        );
        let config = FleetConfig::parse_toml(&toml).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("already used by local node 0"), "{}", err);

        // The same directory on a remote host is a different place.
        let toml = format!(
            "{}\n[[nodes]]\nnodeType = \"ssh\"\nweight = 1\nworkingDir = \"/tmp/a\"\nhost = \"h\"\nusername = \"u\"\n",
            MINIMAL
        );
        assert!(FleetConfig::parse_toml(&toml).unwrap().validate().is_ok());
    }

    #[test]
    fn test_invalid_filename_regex_is_rejected() {
        let toml = format!("{}\n[verify]\noutputDirectory = \"d\"\nfilenameRegex = \"(\"\n", MINIMAL);
        let config = FleetConfig::parse_toml(&toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_node_type_fails_to_parse() {
        let toml = MINIMAL.replace("\"local\"", "\"docker\"");
        assert!(FleetConfig::parse_toml(&toml).is_err());
    }

    #[test]
    fn test_loopback_detection() {
        assert!(is_loopback("127.0.0.1"));
        assert!(is_loopback("localhost"));
        assert!(is_loopback("::1"));
        assert!(!is_loopback("10.0.0.5"));
        assert!(!is_loopback("builder-1"));
    }
}
