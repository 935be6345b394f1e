//! Top-level driver for one orchestrated run.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::gate::InstallGate;
use super::node::{NodeContext, NodeOutcome, NodeReport, run_node};
use crate::archive::{self, Packager, TarPackager};
use crate::config::FleetConfig;
use crate::errors::RunError;
use crate::events::{NodeAssignment, RunEvent};
use crate::plan::BuildPlan;
use crate::progress::{ProgressServer, Sentinel};
use crate::transport::{BuildSettings, DefaultTransports, TransportFactory};
use crate::units::{self, UnitSpec};
use crate::verify;

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub unit_count: usize,
    /// In plan order.
    pub nodes: Vec<NodeReport>,
    /// Output files checked by verification, if it ran.
    pub verified: Option<usize>,
    pub duration: Duration,
}

impl RunSummary {
    pub fn artifacts(&self) -> usize {
        self.nodes
            .iter()
            .map(|r| match r.outcome {
                NodeOutcome::Completed { artifacts } => artifacts,
                NodeOutcome::Halted => 0,
            })
            .sum()
    }
}

pub struct Orchestrator {
    config: FleetConfig,
    project_dir: PathBuf,
    transports: Arc<dyn TransportFactory>,
    packager: Arc<dyn Packager>,
}

impl Orchestrator {
    pub fn new(config: FleetConfig, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            project_dir: project_dir.into(),
            transports: Arc::new(DefaultTransports),
            packager: Arc::new(TarPackager::default()),
        }
    }

    pub fn with_transports(mut self, transports: Arc<dyn TransportFactory>) -> Self {
        self.transports = transports;
        self
    }

    pub fn with_packager(mut self, packager: Arc<dyn Packager>) -> Self {
        self.packager = packager;
        self
    }

    /// Load the project's full unit list.
    pub fn load_units(&self) -> Result<Vec<UnitSpec>, RunError> {
        let path = self.project_dir.join(&self.config.build.units_file);
        Ok(units::load_full(&path)?)
    }

    /// Partition the project's units across the configured nodes.
    pub fn plan(&self) -> Result<(BuildPlan, Vec<UnitSpec>), RunError> {
        let units = self.load_units()?;
        Ok((BuildPlan::new(&self.config, units.len()), units))
    }

    /// Run the whole build. Events are sent on `events` as the run progresses.
    ///
    /// The progress endpoint and the project archive are released before
    /// this returns, on success and on failure.
    ///
    /// A failing node is reported with [`RunEvent::NodeFailed`] as soon as it
    /// fails, but the returned error waits until every other node's pipeline
    /// has ended. Nodes already past the install gate run to completion;
    /// there is no cancellation, so a slow sibling build delays the result.
    pub async fn run(&self, events: mpsc::Sender<RunEvent>) -> Result<RunSummary, RunError> {
        let started = Instant::now();
        let (plan, units) = self.plan()?;
        tracing::info!(units = plan.unit_count, nodes = plan.nodes.len(), "build plan ready");
        events
            .send(RunEvent::PlanReady {
                unit_count: plan.unit_count,
                nodes: plan
                    .nodes
                    .iter()
                    .map(|n| NodeAssignment {
                        node_id: n.node_id.clone(),
                        label: n.label(),
                        range: n.range,
                    })
                    .collect(),
            })
            .await
            .ok();

        let server = ProgressServer::start(self.bind_addr()?, plan.node_ids(), events.clone()).await?;
        let result = self.build(&plan, server.local_addr().port(), &events).await;
        server.shutdown().await;
        let mut nodes = result?;
        nodes.sort_by_key(|r| r.node.index);

        let verified = match &self.config.verify {
            Some(check) => {
                let outcome = verify::verify_outputs(&units, check);
                let (checked, missing) = match &outcome {
                    Ok(report) => (report.checked, Vec::new()),
                    Err(RunError::Verification { missing }) => (0, missing.clone()),
                    Err(_) => (0, Vec::new()),
                };
                events.send(RunEvent::Verified { checked, missing }).await.ok();
                Some(outcome?.checked)
            }
            None => None,
        };

        Ok(RunSummary {
            unit_count: plan.unit_count,
            nodes,
            verified,
            duration: started.elapsed(),
        })
    }

    fn bind_addr(&self) -> Result<SocketAddr, RunError> {
        let progress = &self.config.progress;
        let addr = format!("{}:{}", progress.bind_host, progress.port);
        addr.parse()
            .map_err(|e| RunError::Config(format!("invalid progress bind address '{}': {}", addr, e)))
    }

    /// Pack, fan out and drain. The archive is gone when this returns.
    async fn build(
        &self,
        plan: &BuildPlan,
        port: u16,
        events: &mpsc::Sender<RunEvent>,
    ) -> Result<Vec<NodeReport>, RunError> {
        let archive = self.packager.pack(&self.project_dir).await?;
        let result = self.fan_out(plan, &archive, port, events).await;
        archive::remove(&archive).await;
        result
    }

    async fn fan_out(
        &self,
        plan: &BuildPlan,
        archive: &Path,
        port: u16,
        events: &mpsc::Sender<RunEvent>,
    ) -> Result<Vec<NodeReport>, RunError> {
        let gate = InstallGate::new(plan.nodes.len());
        let settings = Arc::new(BuildSettings::from_config(&self.config));
        let archive = Arc::new(archive.to_path_buf());

        let mut tasks = JoinSet::new();
        for node in &plan.nodes {
            let transport = self.transports.create(node, &settings);
            let ctx = NodeContext {
                archive: archive.clone(),
                sentinel: Sentinel {
                    node_id: node.node_id.clone(),
                    host: self.config.progress.advertise_host.clone(),
                    port,
                },
                events: events.clone(),
            };
            tasks.spawn(run_node(node.clone(), transport, gate.ticket(), ctx));
        }

        // Every node has unpacked the archive (or given up) once all have arrived.
        gate.all_arrived().await;
        archive::remove(&archive).await;

        let mut reports = Vec::with_capacity(plan.nodes.len());
        let mut first_error: Option<RunError> = None;
        while let Some(joined) = tasks.join_next().await {
            let error = match joined {
                Ok(Ok(report)) => {
                    reports.push(report);
                    continue;
                }
                Ok(Err(e)) => e,
                Err(e) => RunError::Other(anyhow::anyhow!("node task panicked: {}", e)),
            };
            if first_error.is_none() {
                first_error = Some(error);
            } else {
                tracing::debug!(error = %error, "additional node failure");
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(reports),
        }
    }
}
