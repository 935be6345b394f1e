//! `fleetpack worker`: build this node's units.

use anyhow::Result;
use std::path::Path;

use fleetpack::progress::WorkerContext;
use fleetpack::worker::run_worker;

pub async fn cmd_worker(root: &Path, units_file: &str, jobs: usize) -> Result<()> {
    let context = WorkerContext::from_env();
    let summary = run_worker(root, units_file, context, jobs).await?;
    println!("Built {} units", summary.built);
    Ok(())
}
