//! `fleetpack plan`: dry run of the partition.

use anyhow::Result;
use console::style;
use std::path::Path;

use fleetpack::orchestrator::Orchestrator;

use super::load_config;

/// Print the partition without contacting any node.
pub fn cmd_plan(project_dir: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(project_dir, config_path)?;
    let (plan, _) = Orchestrator::new(config, project_dir).plan()?;

    println!(
        "{} {} units across {} nodes",
        style("Plan:").bold(),
        plan.unit_count,
        plan.nodes.len()
    );
    for node in &plan.nodes {
        let units = if node.range.is_empty() {
            style("no units".to_string()).dim()
        } else {
            style(format!("units {} ({})", node.range, node.range.count)).cyan()
        };
        println!(
            "  #{} {:<28} weight {:<6} {}",
            node.index,
            node.label(),
            node.weight,
            units
        );
    }
    Ok(())
}
