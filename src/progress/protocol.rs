//! Wire types shared by the aggregation endpoint and the reporter.
//!
//! ## Sentinel file
//!
//! Written to each node's working directory before the build starts; one
//! line, three comma-separated fields: `nodeID,aggregatorHost,aggregatorPort`.
//!
//! ## Messages
//!
//! One persistent WebSocket per node, text frames carrying JSON:
//!
//! | Direction           | Frame                                                    |
//! |---------------------|----------------------------------------------------------|
//! | reporter → endpoint | `{"type":"moduleComplete","nodeID":"<id>","count":<n>}`  |
//!
//! Frames with any other `type` are ignored. Nothing is sent back.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name of the sentinel in a node's working directory.
pub const SENTINEL_FILE: &str = "fleetpack-node.info";

/// WebSocket subprotocol negotiated by reporter and endpoint.
pub const SUBPROTOCOL: &str = "fleetpack-progress";

/// Environment variable marking a build as spawned by the orchestrator.
pub const WORKER_ENV: &str = "FLEETPACK_WORKER";

/// Completed-unit count reported by one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub node_id: String,
    pub count: u64,
}

/// A frame on the progress socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    #[serde(rename = "moduleComplete")]
    ModuleComplete {
        #[serde(rename = "nodeID")]
        node_id: String,
        count: u64,
    },
    #[serde(other)]
    Unknown,
}

impl WireMessage {
    /// Parse a text frame; `None` if it is not a `moduleComplete` message.
    pub fn parse_progress(text: &str) -> Option<ProgressEvent> {
        match serde_json::from_str::<WireMessage>(text) {
            Ok(WireMessage::ModuleComplete { node_id, count }) => {
                Some(ProgressEvent { node_id, count })
            }
            Ok(WireMessage::Unknown) => None,
            Err(e) => {
                tracing::debug!(error = %e, "discarding malformed progress frame");
                None
            }
        }
    }

    pub fn module_complete(node_id: &str, count: u64) -> Self {
        WireMessage::ModuleComplete {
            node_id: node_id.to_string(),
            count,
        }
    }
}

/// Addressing information a reporter needs, read from the sentinel file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinel {
    pub node_id: String,
    pub host: String,
    pub port: u16,
}

impl Sentinel {
    pub fn to_line(&self) -> String {
        format!("{},{},{}", self.node_id, self.host, self.port)
    }

    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.trim().splitn(3, ',');
        let node_id = fields.next()?.trim();
        let host = fields.next()?.trim();
        let port = fields.next()?.trim().parse().ok()?;
        if node_id.is_empty() || host.is_empty() {
            return None;
        }
        Some(Self {
            node_id: node_id.to_string(),
            host: host.to_string(),
            port,
        })
    }

    /// Read the sentinel from a node working directory.
    pub fn read(root: &Path) -> std::io::Result<Self> {
        let path = root.join(SENTINEL_FILE);
        let content = std::fs::read_to_string(&path)?;
        Self::parse(&content).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("malformed sentinel file {}", path.display()),
            )
        })
    }

    pub fn url(&self) -> String {
        format!("ws://{}:{}/", self.host, self.port)
    }
}

/// Whether this build was spawned by the orchestrator as a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerContext {
    /// Invoked directly; never reports progress.
    #[default]
    Standalone,
    /// Spawned by an orchestrated run; reports progress to the sentinel's endpoint.
    Worker,
}

impl WorkerContext {
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var(WORKER_ENV).ok().as_deref())
    }

    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("1") | Some("true") => WorkerContext::Worker,
            _ => WorkerContext::Standalone,
        }
    }

    pub fn is_worker(&self) -> bool {
        matches!(self, WorkerContext::Worker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_complete_wire_format() {
        let json = serde_json::to_string(&WireMessage::module_complete("node-0-ab", 7)).unwrap();
        assert_eq!(json, r#"{"type":"moduleComplete","nodeID":"node-0-ab","count":7}"#);
    }

    #[test]
    fn test_parse_progress_accepts_module_complete() {
        let event =
            WireMessage::parse_progress(r#"{"type":"moduleComplete","nodeID":"n1","count":3}"#);
        assert_eq!(
            event,
            Some(ProgressEvent {
                node_id: "n1".to_string(),
                count: 3
            })
        );
    }

    #[test]
    fn test_parse_progress_ignores_other_types_and_garbage() {
        assert_eq!(
            WireMessage::parse_progress(r#"{"type":"hello","nodeID":"n1"}"#),
            None
        );
        assert_eq!(WireMessage::parse_progress("not json"), None);
        assert_eq!(WireMessage::parse_progress(r#"{"nodeID":"n1","count":1}"#), None);
    }

    #[test]
    fn test_sentinel_line_format() {
        let sentinel = Sentinel {
            node_id: "node-1-deadbeef".to_string(),
            host: "10.0.0.5".to_string(),
            port: 8411,
        };
        assert_eq!(sentinel.to_line(), "node-1-deadbeef,10.0.0.5,8411");
        assert_eq!(Sentinel::parse(&sentinel.to_line()), Some(sentinel.clone()));
        assert_eq!(sentinel.url(), "ws://10.0.0.5:8411/");
        assert_eq!(Sentinel::parse("node-1-deadbeef,10.0.0.5,8411\n"), Some(sentinel));
    }

    #[test]
    fn test_sentinel_rejects_malformed_lines() {
        assert_eq!(Sentinel::parse(""), None);
        assert_eq!(Sentinel::parse("n1,host"), None);
        assert_eq!(Sentinel::parse("n1,host,notaport"), None);
        assert_eq!(Sentinel::parse(",host,80"), None);
    }

    #[test]
    fn test_worker_context_from_env_value() {
        assert_eq!(WorkerContext::from_env_value(Some("1")), WorkerContext::Worker);
        assert_eq!(WorkerContext::from_env_value(Some("true")), WorkerContext::Worker);
        assert_eq!(WorkerContext::from_env_value(Some("0")), WorkerContext::Standalone);
        assert_eq!(WorkerContext::from_env_value(None), WorkerContext::Standalone);
        assert!(!WorkerContext::default().is_worker());
    }
}
