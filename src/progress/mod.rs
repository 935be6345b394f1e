//! Progress channel between build workers and the orchestrator.
//!
//! - [`ProgressServer`]: aggregation endpoint run by the orchestrator for one run
//! - [`ProgressReporter`]: embedded in the worker build; reports completed units
//! - [`protocol`]: sentinel file, wire frames and worker context shared by both

pub mod protocol;
pub mod reporter;
pub mod server;

pub use protocol::{ProgressEvent, Sentinel, WireMessage, WorkerContext};
pub use reporter::ProgressReporter;
pub use server::{ProgressServer, ProgressTracker};
