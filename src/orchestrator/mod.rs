//! Orchestrated runs: planning, per-node pipelines and the install gate.
//!
//! [`Orchestrator::run`] partitions the units, starts the progress endpoint,
//! archives the project and runs one pipeline task per node. Pipelines meet
//! at the [`InstallGate`] after installing; once every node has arrived the
//! archive is deleted. The first node error decides the run, the remaining
//! pipelines are drained so each node disconnects, and teardown always
//! closes the endpoint.

pub mod gate;
pub mod node;
pub mod runner;

pub use gate::{GateTicket, InstallGate};
pub use node::{NodeOutcome, NodeReport};
pub use runner::{Orchestrator, RunSummary};
