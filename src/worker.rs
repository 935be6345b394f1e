//! Worker runner: builds the units assigned to this working directory.
//!
//! This is the build command a node runs. It resolves the units document
//! (following a slice to its preserved original), builds up to `jobs` units
//! at a time and reports the running completed count through the
//! [`ProgressReporter`] after each one. The first failing unit stops the
//! run; units still in flight are killed when their futures are dropped.

use futures::stream::{self, StreamExt};
use std::path::Path;

use crate::errors::WorkerError;
use crate::progress::{ProgressReporter, WorkerContext};
use crate::transport::shell;
use crate::units::{self, UnitSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSummary {
    pub built: usize,
}

/// Build every unit resolved from `root/units_file`.
pub async fn run_worker(
    root: &Path,
    units_file: &str,
    context: WorkerContext,
    jobs: usize,
) -> Result<WorkerSummary, WorkerError> {
    let units = units::resolve(root, units_file)?;
    tracing::info!(units = units.len(), worker = context.is_worker(), "worker starting");

    let mut reporter = ProgressReporter::start(context, root).await;
    let result = build_all(root, &units, jobs.max(1), &mut reporter).await;
    reporter.finish().await;
    result
}

async fn build_all(
    root: &Path,
    units: &[UnitSpec],
    jobs: usize,
    reporter: &mut ProgressReporter,
) -> Result<WorkerSummary, WorkerError> {
    let mut builds = stream::iter(units)
        .map(|unit| build_unit(root, unit))
        .buffer_unordered(jobs);

    let mut built = 0;
    while let Some(result) = builds.next().await {
        let name = result?;
        built += 1;
        tracing::debug!(unit = %name, built, total = units.len(), "unit built");
        reporter.unit_completed().await;
    }
    Ok(WorkerSummary { built })
}

async fn build_unit(root: &Path, unit: &UnitSpec) -> Result<String, WorkerError> {
    let out = shell::capture(shell::sh(&unit.command, root))
        .await
        .map_err(|source| WorkerError::SpawnFailed {
            name: unit.name.clone(),
            source,
        })?;
    if !out.success() {
        return Err(WorkerError::UnitFailed {
            name: unit.name.clone(),
            exit_code: out.exit_code,
            stderr: out.diagnostic(),
        });
    }
    Ok(unit.name.clone())
}
