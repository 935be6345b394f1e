//! Events emitted during an orchestrated run, consumed by the terminal UI.

use serde::Serialize;

use crate::plan::UnitRange;
use crate::progress::ProgressEvent;

/// Pipeline step a node is currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStep {
    Connecting,
    Transferring,
    Installing,
    /// Installed; waiting for every other node to finish installing.
    WaitingForPeers,
    Building,
    Retrieving,
    Disconnecting,
}

impl std::fmt::Display for NodeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStep::Connecting => "connecting",
            NodeStep::Transferring => "transferring project",
            NodeStep::Installing => "installing dependencies",
            NodeStep::WaitingForPeers => "waiting for other nodes",
            NodeStep::Building => "building",
            NodeStep::Retrieving => "retrieving artifacts",
            NodeStep::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

/// Planned assignment for one node, announced once at start.
#[derive(Debug, Clone, Serialize)]
pub struct NodeAssignment {
    pub node_id: String,
    pub label: String,
    pub range: UnitRange,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    PlanReady {
        unit_count: usize,
        nodes: Vec<NodeAssignment>,
    },
    Step {
        node_id: String,
        step: NodeStep,
    },
    /// Accepted progress report from a node's reporter.
    Progress { node_id: String, count: u64 },
    NodeFinished {
        node_id: String,
        artifacts: usize,
    },
    NodeFailed {
        node_id: String,
        error: String,
    },
    /// The node stopped before building because another node failed.
    NodeHalted { node_id: String },
    Verified {
        checked: usize,
        missing: Vec<String>,
    },
}

impl From<ProgressEvent> for RunEvent {
    fn from(event: ProgressEvent) -> Self {
        RunEvent::Progress {
            node_id: event.node_id,
            count: event.count,
        }
    }
}
