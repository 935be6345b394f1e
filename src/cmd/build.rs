//! `fleetpack build`: one orchestrated run.

use anyhow::Result;
use console::style;
use std::path::Path;
use tokio::sync::mpsc;

use fleetpack::orchestrator::Orchestrator;
use fleetpack::ui::{FleetUI, UiMode};

use super::load_config;

pub async fn cmd_build(
    project_dir: &Path,
    config_path: Option<&Path>,
    port: Option<u16>,
    ui_mode: UiMode,
    verbose: bool,
) -> Result<()> {
    let mut config = load_config(project_dir, config_path)?;
    if let Some(port) = port {
        config.progress.port = port;
    }
    let node_count = config.nodes.len();
    if config.has_remote_nodes() {
        tracing::info!(
            advertise = %config.progress.advertise_host,
            port = config.progress.port,
            "remote nodes report progress to the advertised endpoint"
        );
    }

    let (tx, mut rx) = mpsc::channel(256);
    let ui_task = tokio::spawn(async move {
        let mut ui = FleetUI::new(ui_mode, verbose);
        while let Some(event) = rx.recv().await {
            ui.handle_event(&event);
        }
        ui.finish();
    });

    let result = Orchestrator::new(config, project_dir).run(tx).await;
    let _ = ui_task.await;
    let summary = result?;

    if ui_mode != UiMode::Json {
        println!(
            "{} {} units on {} nodes, {} artifacts retrieved in {:.1}s",
            style("Build complete:").green().bold(),
            summary.unit_count,
            node_count,
            summary.artifacts(),
            summary.duration.as_secs_f64()
        );
        if let Some(checked) = summary.verified {
            println!("Verified {} output files", checked);
        }
    }
    Ok(())
}
