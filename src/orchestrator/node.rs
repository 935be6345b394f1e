//! Per-node pipeline.
//!
//! connect → send package → install → *install gate* → build range →
//! retrieve artifacts → disconnect. Steps run strictly in order; the first
//! failing step ends the pipeline. `disconnect` runs exactly once on every
//! exit path and its failure is only logged.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::gate::GateTicket;
use crate::errors::{NodeError, RunError};
use crate::events::{NodeStep, RunEvent};
use crate::plan::NodeSpec;
use crate::progress::Sentinel;
use crate::transport::NodeTransport;

/// How a node's pipeline ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    Completed { artifacts: usize },
    /// Stopped at the install gate because another node failed.
    Halted,
}

#[derive(Debug, Clone)]
pub struct NodeReport {
    pub node: NodeSpec,
    pub outcome: NodeOutcome,
}

/// Shared inputs for one node's pipeline.
pub(crate) struct NodeContext {
    pub archive: Arc<PathBuf>,
    pub sentinel: Sentinel,
    pub events: mpsc::Sender<RunEvent>,
}

impl NodeContext {
    async fn emit(&self, event: RunEvent) {
        self.events.send(event).await.ok();
    }

    async fn step(&self, node: &NodeSpec, step: NodeStep) {
        tracing::debug!(node = %node.node_id, %step, "node step");
        self.emit(RunEvent::Step {
            node_id: node.node_id.clone(),
            step,
        })
        .await;
    }
}

pub(crate) async fn run_node(
    node: NodeSpec,
    mut transport: Box<dyn NodeTransport>,
    ticket: GateTicket,
    ctx: NodeContext,
) -> Result<NodeReport, RunError> {
    let result = drive(&node, transport.as_mut(), ticket, &ctx).await;

    ctx.step(&node, NodeStep::Disconnecting).await;
    if let Err(e) = transport.disconnect().await {
        tracing::warn!(node = %node.node_id, error = %e, "disconnect failed");
    }

    match result {
        Ok(outcome) => {
            let event = match outcome {
                NodeOutcome::Completed { artifacts } => RunEvent::NodeFinished {
                    node_id: node.node_id.clone(),
                    artifacts,
                },
                NodeOutcome::Halted => RunEvent::NodeHalted {
                    node_id: node.node_id.clone(),
                },
            };
            ctx.emit(event).await;
            Ok(NodeReport { node, outcome })
        }
        Err(source) => {
            tracing::error!(node = %node.node_id, error = %source, "node failed");
            ctx.emit(RunEvent::NodeFailed {
                node_id: node.node_id.clone(),
                error: source.to_string(),
            })
            .await;
            Err(RunError::Node {
                node_id: node.node_id,
                source,
            })
        }
    }
}

async fn drive(
    node: &NodeSpec,
    transport: &mut dyn NodeTransport,
    ticket: GateTicket,
    ctx: &NodeContext,
) -> Result<NodeOutcome, NodeError> {
    // An early return drops the ticket, which poisons the gate.
    ctx.step(node, NodeStep::Connecting).await;
    transport.connect().await?;

    ctx.step(node, NodeStep::Transferring).await;
    transport.send_package(&ctx.archive).await?;

    ctx.step(node, NodeStep::Installing).await;
    transport.install_dependencies().await?;

    ctx.step(node, NodeStep::WaitingForPeers).await;
    if !ticket.arrive_and_wait().await {
        tracing::info!(node = %node.node_id, "another node failed; skipping build");
        return Ok(NodeOutcome::Halted);
    }

    ctx.step(node, NodeStep::Building).await;
    transport.run_build_range(node.range, &ctx.sentinel).await?;

    ctx.step(node, NodeStep::Retrieving).await;
    let artifacts = transport.retrieve_artifacts(&node.artifacts).await?;

    Ok(NodeOutcome::Completed { artifacts })
}
