//! Distributed build orchestration.
//!
//! A project's units (see [`units`]) are partitioned across a fleet of local
//! and SSH nodes ([`plan`]), each node runs its slice through a
//! [`transport`] backend, and workers report progress back over a
//! WebSocket ([`progress`]) while the [`orchestrator`] drives the run.

pub mod archive;
pub mod config;
pub mod errors;
pub mod events;
pub mod orchestrator;
pub mod plan;
pub mod progress;
pub mod transport;
pub mod ui;
pub mod units;
pub mod verify;
pub mod worker;
