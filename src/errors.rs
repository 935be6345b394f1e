//! Typed error hierarchy for fleetpack.
//!
//! Four enums cover the subsystems:
//! - `NodeError`: one node's pipeline step failed (transport, install, build)
//! - `RunError`: an orchestrated run failed; wraps `NodeError` with the node ID
//! - `UnitsError`: the units document could not be read or resolved
//! - `WorkerError`: the worker runner failed to build its slice

use std::path::PathBuf;

use thiserror::Error;

/// Errors from a single node's pipeline.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("connection to {host} failed: {message}")]
    Connection { host: String, message: String },

    #[error("package transfer failed: {message}")]
    Transfer { message: String },

    #[error("command `{command}` exited with code {exit_code}: {stderr}")]
    RemoteCommand {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("build exited with code {exit_code}: {stderr}")]
    Build { exit_code: i32, stderr: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl NodeError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        NodeError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Errors from the units document.
#[derive(Debug, Error)]
pub enum UnitsError {
    #[error("Failed to read units file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse units file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Units file at {path} is a slice; a full unit list is required")]
    UnexpectedSlice { path: PathBuf },

    #[error("Slice [{first}, +{count}) is out of range for {len} units in {path}")]
    SliceOutOfRange {
        path: PathBuf,
        first: usize,
        count: usize,
        len: usize,
    },
}

/// Errors from the worker runner.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("unit '{name}' exited with code {exit_code}: {stderr}")]
    UnitFailed {
        name: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Failed to spawn unit '{name}': {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Units(#[from] UnitsError),
}

impl WorkerError {
    /// Process exit status, aligned with the orchestrator's categories.
    pub fn exit_code(&self) -> u8 {
        match self {
            WorkerError::UnitFailed { .. } => 13,
            WorkerError::Units(_) => 15,
            WorkerError::SpawnFailed { .. } => 1,
        }
    }
}

/// Errors from an orchestrated run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("node {node_id}: {source}")]
    Node {
        node_id: String,
        #[source]
        source: NodeError,
    },

    #[error("verification failed: {} expected output file(s) missing: {}", missing.len(), missing.join(", "))]
    Verification { missing: Vec<String> },

    #[error("Failed to archive project: {0}")]
    Archive(String),

    #[error("Failed to start progress endpoint on {addr}: {source}")]
    Endpoint {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Units(#[from] UnitsError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RunError {
    /// Process exit status for this failure; each category gets its own code.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Node { source, .. } => match source {
                NodeError::Connection { .. } => 10,
                NodeError::Transfer { .. } => 11,
                NodeError::RemoteCommand { .. } => 12,
                NodeError::Build { .. } => 13,
                NodeError::Io { .. } => 1,
            },
            RunError::Verification { .. } => 14,
            RunError::Config(_) | RunError::Units(_) => 15,
            RunError::Archive(_) => 16,
            RunError::Endpoint { .. } => 17,
            RunError::Other(_) => 1,
        }
    }
}
