//! Weighted partition planner and the per-run build plan.
//!
//! [`partition`] divides `unit_count` units into contiguous ranges, one per
//! node, in node order. Each node's share is rounded up against the units
//! still unassigned, so earlier nodes are favoured under rounding and a later
//! node can end up with an empty range. Downstream code (node IDs, progress
//! totals) relies on exactly this assignment.

use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

use crate::config::{
    ArtifactConfig, DEFAULT_REMOTE_PATH, FleetConfig, NodeConfig, NodeType,
};

/// A contiguous range of unit indices, possibly empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnitRange {
    pub first: usize,
    pub count: usize,
}

impl UnitRange {
    pub fn new(first: usize, count: usize) -> Self {
        Self { first, count }
    }

    /// Inclusive last index, `None` for an empty range.
    pub fn last(&self) -> Option<usize> {
        (self.count > 0).then(|| self.first + self.count - 1)
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// One past the last index.
    pub fn end(&self) -> usize {
        self.first + self.count
    }
}

impl std::fmt::Display for UnitRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.last() {
            Some(last) => write!(f, "{}-{}", self.first, last),
            None => write!(f, "empty@{}", self.first),
        }
    }
}

/// Split `unit_count` units across nodes by weight.
///
/// Nodes are visited in input order. A node's share is
/// `ceil(weight * items_left / remaining_weight)`, capped at `items_left`,
/// where `remaining_weight` sums the weights of this node and every node
/// after it. The last node therefore takes whatever is left and the ranges
/// always cover `[0, unit_count)` exactly.
///
/// Weights are assumed positive and finite (config validation enforces this).
pub fn partition(unit_count: usize, weights: &[f64]) -> Vec<UnitRange> {
    let mut items_left = unit_count;
    let mut next_index = 0;
    let mut ranges = Vec::with_capacity(weights.len());

    for (i, weight) in weights.iter().enumerate() {
        let remaining_weight: f64 = weights[i..].iter().sum();
        let share = if remaining_weight > 0.0 {
            (weight * items_left as f64 / remaining_weight).ceil() as usize
        } else {
            0
        };
        let count = share.min(items_left);
        ranges.push(UnitRange::new(next_index, count));
        items_left -= count;
        next_index += count;
    }

    ranges
}

/// SSH coordinates and credentials for a remote node.
#[derive(Debug, Clone)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    pub keep_alive_secs: u64,
    /// Directory on the remote host used for staged uploads.
    pub temp_dir: String,
    /// `PATH` exported for every remote command.
    pub path_env: String,
}

impl RemoteTarget {
    /// `user@host` as used by ssh and scp.
    pub fn user_at_host(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }
}

/// How a remote session authenticates.
#[derive(Clone)]
pub enum Credential {
    /// Defer to the ssh agent / default identities.
    Agent,
    Password(String),
    KeyFile(PathBuf),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Agent => write!(f, "Agent"),
            Credential::Password(_) => write!(f, "Password(***)"),
            Credential::KeyFile(p) => write!(f, "KeyFile({})", p.display()),
        }
    }
}

/// An artifact to fetch after the build: a path or glob on the node and a local directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub remote_spec: String,
    pub local_destination: PathBuf,
}

impl From<&ArtifactConfig> for Artifact {
    fn from(a: &ArtifactConfig) -> Self {
        Self {
            remote_spec: a.remote.clone(),
            local_destination: a.local.clone(),
        }
    }
}

/// One worker in the plan, with its assigned range.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub index: usize,
    /// Unique for the lifetime of one run.
    pub node_id: String,
    pub kind: NodeType,
    pub weight: f64,
    pub working_dir: String,
    pub remote: Option<RemoteTarget>,
    pub artifacts: Vec<Artifact>,
    pub range: UnitRange,
}

impl NodeSpec {
    /// Short human label, e.g. `local:/tmp/a` or `ssh:builder-1`.
    pub fn label(&self) -> String {
        match &self.remote {
            Some(remote) => format!("ssh:{}", remote.host),
            None => format!("local:{}", self.working_dir),
        }
    }
}

/// The whole job: unit count and the ordered node list.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub unit_count: usize,
    pub nodes: Vec<NodeSpec>,
}

impl BuildPlan {
    /// Partition `unit_count` units across the configured nodes.
    pub fn new(config: &FleetConfig, unit_count: usize) -> Self {
        let weights: Vec<f64> = config.nodes.iter().map(|n| n.weight).collect();
        let ranges = partition(unit_count, &weights);
        let nodes = config
            .nodes
            .iter()
            .zip(ranges)
            .enumerate()
            .map(|(index, (node, range))| node_spec(index, node, range))
            .collect();
        Self { unit_count, nodes }
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.node_id.clone()).collect()
    }
}

fn node_spec(index: usize, node: &NodeConfig, range: UnitRange) -> NodeSpec {
    let short = Uuid::new_v4().simple().to_string();
    let remote = (node.node_type == NodeType::Ssh).then(|| RemoteTarget {
        host: node.host.clone().unwrap_or_default(),
        port: node.port.unwrap_or(22),
        username: node.username.clone().unwrap_or_default(),
        credential: match (&node.password, &node.private_key) {
            (Some(password), _) => Credential::Password(password.clone()),
            (None, Some(key)) => Credential::KeyFile(key.clone()),
            (None, None) => Credential::Agent,
        },
        keep_alive_secs: node.keep_alive_secs.unwrap_or(15),
        temp_dir: node.temp_dir.clone().unwrap_or_else(|| "/tmp".to_string()),
        path_env: node
            .remote_path
            .clone()
            .unwrap_or_else(|| DEFAULT_REMOTE_PATH.to_string()),
    });
    NodeSpec {
        index,
        node_id: format!("node-{}-{}", index, &short[..8]),
        kind: node.node_type,
        weight: node.weight,
        working_dir: node.working_dir.clone(),
        remote,
        artifacts: node.artifacts.iter().map(Artifact::from).collect(),
        range,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(ranges: &[UnitRange]) -> Vec<usize> {
        ranges.iter().map(|r| r.count).collect()
    }

    fn assert_covers(ranges: &[UnitRange], n: usize) {
        let mut next = 0;
        for r in ranges {
            assert_eq!(r.first, next, "ranges must be contiguous: {:?}", ranges);
            next = r.end();
        }
        assert_eq!(next, n, "ranges must cover exactly {} units: {:?}", n, ranges);
    }

    #[test]
    fn test_equal_weights_round_up_towards_first_node() {
        let ranges = partition(10, &[1.0, 1.0, 1.0]);
        assert_eq!(counts(&ranges), vec![4, 3, 3]);
        assert_eq!(ranges[0], UnitRange::new(0, 4));
        assert_eq!(ranges[1], UnitRange::new(4, 3));
        assert_eq!(ranges[2], UnitRange::new(7, 3));
    }

    #[test]
    fn test_single_unit_leaves_second_node_empty() {
        let ranges = partition(1, &[1.0, 1.0]);
        assert_eq!(counts(&ranges), vec![1, 0]);
        assert!(ranges[1].is_empty());
        assert_eq!(ranges[1].first, 1);
        assert_eq!(ranges[1].last(), None);
    }

    #[test]
    fn test_zero_units_gives_all_empty_ranges() {
        let ranges = partition(0, &[1.0, 2.0]);
        assert_eq!(counts(&ranges), vec![0, 0]);
        assert_covers(&ranges, 0);
    }

    #[test]
    fn test_weighted_split() {
        let ranges = partition(9, &[1.0, 2.0]);
        assert_eq!(counts(&ranges), vec![3, 6]);
        assert_covers(&ranges, 9);
    }

    #[test]
    fn test_coverage_for_many_inputs() {
        let weight_sets: [&[f64]; 6] = [
            &[1.0],
            &[1.0, 1.0],
            &[3.0, 1.0, 1.0],
            &[0.5, 0.25, 0.25, 2.0],
            &[1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
            &[10.0, 0.1],
        ];
        for weights in weight_sets {
            for n in 0..50 {
                let ranges = partition(n, weights);
                assert_eq!(ranges.len(), weights.len());
                assert_covers(&ranges, n);
            }
        }
    }

    #[test]
    fn test_partition_is_deterministic() {
        let weights = [1.5, 2.0, 0.7];
        assert_eq!(partition(37, &weights), partition(37, &weights));
    }

    #[test]
    fn test_unit_range_display() {
        assert_eq!(UnitRange::new(4, 3).to_string(), "4-6");
        assert_eq!(UnitRange::new(5, 0).to_string(), "empty@5");
    }

    #[test]
    fn test_build_plan_assigns_unique_node_ids() {
        let config = FleetConfig::parse_toml(
            r#"
[[nodes]]
nodeType = "local"
weight = 1
workingDir = "/tmp/a"

[[nodes]]
nodeType = "ssh"
weight = 1
workingDir = "/srv"
host = "builder-1"
username = "ci"
password = "secret"
"#,
        )
        .unwrap();
        let plan = BuildPlan::new(&config, 5);
        assert_eq!(plan.nodes.len(), 2);
        assert_ne!(plan.nodes[0].node_id, plan.nodes[1].node_id);
        assert!(plan.nodes[0].node_id.starts_with("node-0-"));
        assert_eq!(plan.nodes[0].range, UnitRange::new(0, 3));
        assert_eq!(plan.nodes[1].range, UnitRange::new(3, 2));

        let remote = plan.nodes[1].remote.as_ref().unwrap();
        assert_eq!(remote.port, 22);
        assert_eq!(remote.user_at_host(), "ci@builder-1");
        assert_eq!(remote.path_env, DEFAULT_REMOTE_PATH);
        assert!(matches!(remote.credential, Credential::Password(_)));
        assert!(!format!("{:?}", remote.credential).contains("secret"));
        assert_eq!(plan.nodes[1].label(), "ssh:builder-1");
    }
}
