//! Terminal view of an orchestrated run.
//!
//! Consumes [`RunEvent`]s in one of three modes:
//! - `full`: one progress bar per node plus an overall header bar
//! - `minimal`: one plain line per event
//! - `json`: one JSON object per event, for machine consumption

use console::{Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use crate::events::{NodeAssignment, NodeStep, RunEvent};
use crate::ui::icons::{
    CHECK, CLOCK, CROSS, HAMMER, INBOX, PACKAGE, PAUSE, PLUG, SEARCH, SPARKLE, WRENCH,
};

/// Output mode for the run UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiMode {
    #[default]
    Full,
    Minimal,
    Json,
}

impl std::str::FromStr for UiMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "minimal" => Self::Minimal,
            _ => Self::Full,
        })
    }
}

impl UiMode {
    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

struct NodeView {
    label: String,
    bar: Option<ProgressBar>,
    total: u64,
    reported: u64,
}

pub struct FleetUI {
    mode: UiMode,
    multi: MultiProgress,
    header_bar: Option<ProgressBar>,
    nodes: HashMap<String, NodeView>,
    verbose: bool,
    term: Term,
}

fn step_icon(step: NodeStep) -> &'static console::Emoji<'static, 'static> {
    match step {
        NodeStep::Connecting | NodeStep::Disconnecting => &PLUG,
        NodeStep::Transferring => &PACKAGE,
        NodeStep::Installing => &WRENCH,
        NodeStep::WaitingForPeers => &CLOCK,
        NodeStep::Building => &HAMMER,
        NodeStep::Retrieving => &INBOX,
    }
}

fn node_style(color: &str) -> ProgressStyle {
    let template = format!(
        "  {{prefix:.bold}} [{{bar:30.{color}/white}}] {{pos}}/{{len}} {{msg}}"
    );
    ProgressStyle::default_bar()
        .template(&template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░")
}

impl FleetUI {
    pub fn new(mode: UiMode, verbose: bool) -> Self {
        Self {
            mode,
            multi: MultiProgress::new(),
            header_bar: None,
            nodes: HashMap::new(),
            verbose,
            term: Term::stdout(),
        }
    }

    pub fn handle_event(&mut self, event: &RunEvent) {
        self.track(event);
        match self.mode {
            UiMode::Json => self.handle_json(event),
            UiMode::Minimal => self.handle_minimal(event),
            UiMode::Full => self.handle_full(event),
        }
    }

    /// Last reported count for a node.
    pub fn reported(&self, node_id: &str) -> Option<u64> {
        self.nodes.get(node_id).map(|n| n.reported)
    }

    /// Stop any bars that are still drawing.
    pub fn finish(&self) {
        for view in self.nodes.values() {
            if let Some(bar) = &view.bar {
                if !bar.is_finished() {
                    bar.abandon();
                }
            }
        }
        if let Some(header) = &self.header_bar {
            header.abandon();
        }
    }

    fn label<'a>(&'a self, node_id: &'a str) -> &'a str {
        self.nodes
            .get(node_id)
            .map(|n| n.label.as_str())
            .unwrap_or(node_id)
    }

    /// Mode-independent bookkeeping.
    fn track(&mut self, event: &RunEvent) {
        match event {
            RunEvent::PlanReady { nodes, .. } => {
                for NodeAssignment {
                    node_id,
                    label,
                    range,
                } in nodes
                {
                    self.nodes.insert(
                        node_id.clone(),
                        NodeView {
                            label: label.clone(),
                            bar: None,
                            total: range.count as u64,
                            reported: 0,
                        },
                    );
                }
            }
            RunEvent::Progress { node_id, count } => {
                if let Some(view) = self.nodes.get_mut(node_id) {
                    view.reported = *count;
                }
            }
            _ => {}
        }
    }

    fn handle_json(&self, event: &RunEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = writeln!(&self.term, "{}", json);
        }
    }

    fn handle_minimal(&self, event: &RunEvent) {
        let line = match event {
            RunEvent::PlanReady { unit_count, nodes } => {
                let mut line = format!("Plan: {} units across {} nodes", unit_count, nodes.len());
                for n in nodes {
                    line.push_str(&format!("\n  {} units {}", n.label, n.range));
                }
                line
            }
            RunEvent::Step { node_id, step } => {
                if !self.verbose && *step == NodeStep::Disconnecting {
                    return;
                }
                format!("[{}] {}", self.label(node_id), step)
            }
            RunEvent::Progress { node_id, count } => {
                let total = self.nodes.get(node_id).map(|n| n.total).unwrap_or(0);
                format!("[{}] {}/{}", self.label(node_id), count, total)
            }
            RunEvent::NodeFinished { node_id, artifacts } => {
                format!("✓ {} ({} artifacts)", self.label(node_id), artifacts)
            }
            RunEvent::NodeFailed { node_id, error } => {
                format!("✗ {}: {}", self.label(node_id), error)
            }
            RunEvent::NodeHalted { node_id } => format!("- {} halted", self.label(node_id)),
            RunEvent::Verified { checked, missing } => {
                if missing.is_empty() {
                    format!("Verified {} outputs", checked)
                } else {
                    format!("Missing outputs: {}", missing.join(", "))
                }
            }
        };
        let _ = writeln!(&self.term, "{}", line);
    }

    fn handle_full(&mut self, event: &RunEvent) {
        match event {
            RunEvent::PlanReady { unit_count, nodes } => self.on_plan_ready(*unit_count, nodes),
            RunEvent::Step { node_id, step } => self.on_step(node_id, *step),
            RunEvent::Progress { node_id, count } => self.on_progress(node_id, *count),
            RunEvent::NodeFinished { node_id, artifacts } => {
                self.on_node_finished(node_id, *artifacts)
            }
            RunEvent::NodeFailed { node_id, error } => self.on_node_failed(node_id, error),
            RunEvent::NodeHalted { node_id } => {
                if let Some(bar) = self.nodes.get(node_id).and_then(|n| n.bar.as_ref()) {
                    bar.set_style(node_style("yellow"));
                    bar.abandon_with_message(format!("{}halted", PAUSE));
                }
            }
            RunEvent::Verified { checked, missing } => self.on_verified(*checked, missing),
        }
    }

    fn on_plan_ready(&mut self, unit_count: usize, nodes: &[NodeAssignment]) {
        let header = self.multi.add(ProgressBar::new(unit_count as u64));
        header.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░"),
        );
        header.set_prefix("fleet");
        header.set_message(format!("{} nodes", nodes.len()));
        self.header_bar = Some(header);

        for n in nodes {
            let bar = self.multi.add(ProgressBar::new(n.range.count as u64));
            bar.set_style(node_style("green"));
            bar.set_prefix(format!("[{}]", n.label));
            bar.set_message(format!("queued (units {})", n.range));
            bar.enable_steady_tick(Duration::from_millis(200));
            if let Some(view) = self.nodes.get_mut(&n.node_id) {
                view.bar = Some(bar);
            }
        }
    }

    fn on_step(&self, node_id: &str, step: NodeStep) {
        if let Some(bar) = self.nodes.get(node_id).and_then(|n| n.bar.as_ref()) {
            bar.set_message(format!("{}{}", step_icon(step), step));
        }
        if self.verbose {
            self.multi
                .println(format!(
                    "  {} {}",
                    style(self.label(node_id)).yellow(),
                    style(step).dim()
                ))
                .ok();
        }
    }

    fn on_progress(&self, node_id: &str, count: u64) {
        if let Some(view) = self.nodes.get(node_id) {
            if let Some(bar) = &view.bar {
                bar.set_position(count.min(view.total));
            }
        }
        if let Some(header) = &self.header_bar {
            let overall: u64 = self.nodes.values().map(|n| n.reported.min(n.total)).sum();
            header.set_position(overall);
        }
    }

    fn on_node_finished(&self, node_id: &str, artifacts: usize) {
        if let Some(bar) = self.nodes.get(node_id).and_then(|n| n.bar.as_ref()) {
            // Keep the last reported position; a node is not assumed complete.
            bar.abandon_with_message(format!("{}done, {} artifacts", CHECK, artifacts));
        }
    }

    fn on_node_failed(&self, node_id: &str, error: &str) {
        if let Some(bar) = self.nodes.get(node_id).and_then(|n| n.bar.as_ref()) {
            bar.set_style(node_style("red"));
            bar.abandon_with_message(format!("{}failed", CROSS));
        }
        self.multi
            .println(format!(
                "  {} {} {}",
                CROSS,
                style(self.label(node_id)).red().bold(),
                error
            ))
            .ok();
    }

    fn on_verified(&self, checked: usize, missing: &[String]) {
        let line = if missing.is_empty() {
            format!(
                "{}{} {} output files present",
                SEARCH,
                SPARKLE,
                style(checked).green().bold()
            )
        } else {
            format!(
                "{}{} {} output files missing",
                SEARCH,
                CROSS,
                style(missing.len()).red().bold()
            )
        };
        self.multi.println(line).ok();
    }
}
