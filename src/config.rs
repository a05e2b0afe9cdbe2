//! Cluster topology loading and management.
//!
//! Nodes and partitions are declared together in a single YAML document:
//!
//! ```yaml
//! nodes:
//!   n0:
//!     sockets: 2
//!     cores_per_socket: 8
//!     threads_per_core: 2
//!     real_memory_mb: 65536
//!     coord: [0, 0, 0, 0, 0]
//!     region: "rack-a"
//! partitions:
//!   debug:
//!     nodes: ["n0", "n1"]
//!     max_share: 1
//!     force: false
//!     priority: 10
//!     default_time_limit_s: 3600
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use fixedbitset::FixedBitSet;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::model::{Node, NodeId, NodeState, Partition, PartitionId, SharePolicy};

#[derive(Debug, Deserialize)]
struct ClusterConfigFile {
    #[serde(default)]
    nodes: HashMap<String, NodeEntry>,
    #[serde(default)]
    partitions: HashMap<String, PartitionEntry>,
}

#[derive(Debug, Deserialize)]
struct NodeEntry {
    #[serde(default = "default_sockets")]
    sockets: u32,
    #[serde(default = "default_cores")]
    cores_per_socket: u32,
    #[serde(default = "default_threads")]
    threads_per_core: u32,
    #[serde(default = "default_memory_mb")]
    real_memory_mb: u64,
    #[serde(default)]
    coord: Vec<u32>,
    region: Option<String>,
}

fn default_sockets() -> u32 {
    1
}
fn default_cores() -> u32 {
    1
}
fn default_threads() -> u32 {
    1
}
fn default_memory_mb() -> u64 {
    0
}

#[derive(Debug, Deserialize)]
struct PartitionEntry {
    #[serde(default)]
    nodes: Vec<String>,
    #[serde(default)]
    max_share: u32,
    #[serde(default)]
    force: bool,
    #[serde(default)]
    priority: u32,
    default_time_limit_s: Option<u64>,
    #[serde(default)]
    hidden: bool,
}

/// Loads and holds the node/partition inventory. Immutable once loaded
/// except for per-node [`NodeState`] and running counts, which live in
/// [`crate::accounting`] rather than here.
#[derive(Debug, Default)]
pub struct ClusterConfig {
    nodes: Vec<Node>,
    name_to_node: HashMap<String, NodeId>,
    partitions: Vec<Partition>,
    name_to_partition: HashMap<String, PartitionId>,
    loaded: bool,
}

impl ClusterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn load_from_file(&mut self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "loading cluster configuration");
        self.nodes.clear();
        self.name_to_node.clear();
        self.partitions.clear();
        self.name_to_partition.clear();
        self.loaded = false;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot open cluster configuration file: {}", path.display()))?;
        let file: ClusterConfigFile = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse cluster configuration: {}", path.display()))?;

        if file.nodes.is_empty() {
            warn!("no nodes found in cluster configuration");
        }

        let mut names: Vec<&String> = file.nodes.keys().collect();
        names.sort();
        for name in names {
            let entry = &file.nodes[name];
            let id = self.nodes.len() as NodeId;
            let node = Node {
                id,
                name: name.clone(),
                sockets: entry.sockets,
                cores_per_socket: entry.cores_per_socket,
                threads_per_core: entry.threads_per_core,
                real_memory_mb: entry.real_memory_mb,
                state: NodeState::Up,
                coord: entry.coord.clone(),
                region: entry.region.clone(),
            };
            debug!(node = %node.name, cpus = node.cpu_count(), "node loaded");
            self.name_to_node.insert(name.clone(), id);
            self.nodes.push(node);
        }

        let mut pnames: Vec<&String> = file.partitions.keys().collect();
        pnames.sort();
        for name in pnames {
            let entry = &file.partitions[name];
            let id = self.partitions.len() as PartitionId;
            let mut bitmap = FixedBitSet::with_capacity(self.nodes.len());
            for node_name in &entry.nodes {
                match self.name_to_node.get(node_name) {
                    Some(&nid) => bitmap.insert(nid as usize),
                    None => warn!(partition = %name, node = %node_name, "unknown node referenced by partition"),
                }
            }
            let partition = Partition {
                id,
                name: name.clone(),
                nodes: bitmap,
                share: SharePolicy {
                    max_share: entry.max_share,
                    force: entry.force,
                },
                priority: entry.priority,
                default_time_limit_s: entry.default_time_limit_s,
                hidden: entry.hidden,
            };
            self.name_to_partition.insert(name.clone(), id);
            self.partitions.push(partition);
        }

        self.loaded = true;
        info!(
            nodes = self.nodes.len(),
            partitions = self.partitions.len(),
            "cluster configuration loaded"
        );
        Ok(())
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.name_to_node.get(name).map(|&id| &self.nodes[id as usize])
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id as usize)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id as usize)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn partition_by_name(&self, name: &str) -> Option<&Partition> {
        self.name_to_partition
            .get(name)
            .map(|&id| &self.partitions[id as usize])
    }

    pub fn partition(&self, id: PartitionId) -> Option<&Partition> {
        self.partitions.get(id as usize)
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Bitmap of every node belonging to `partition`, empty if unknown.
    pub fn node_bitmap_of_partition(&self, partition: PartitionId) -> FixedBitSet {
        self.partitions
            .get(partition as usize)
            .map(|p| p.nodes.clone())
            .unwrap_or_else(|| FixedBitSet::with_capacity(self.nodes.len()))
    }

    /// Coordinate tuple of `node`, empty slice if the node has none
    /// (non-topology-aware clusters).
    pub fn node_coord(&self, node: NodeId) -> &[u32] {
        self.nodes
            .get(node as usize)
            .map(|n| n.coord.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn yaml_tempfile(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_nodes_and_partitions() {
        let yaml = r#"
nodes:
  n0:
    sockets: 2
    cores_per_socket: 8
    threads_per_core: 2
    real_memory_mb: 65536
  n1:
    sockets: 2
    cores_per_socket: 8
    threads_per_core: 2
    real_memory_mb: 65536
partitions:
  debug:
    nodes: ["n0", "n1"]
    max_share: 1
    priority: 10
"#;
        let f = yaml_tempfile(yaml);
        let mut cfg = ClusterConfig::new();
        cfg.load_from_file(f.path()).unwrap();

        assert!(cfg.is_loaded());
        assert_eq!(cfg.node_count(), 2);
        let n0 = cfg.node_by_name("n0").unwrap();
        assert_eq!(n0.cpu_count(), 32);

        let part = cfg.partition_by_name("debug").unwrap();
        assert!(part.contains_node(n0.id));
        assert_eq!(part.share.max_share, 1);
    }

    #[test]
    fn unknown_node_in_partition_is_skipped_not_fatal() {
        let yaml = r#"
nodes:
  n0:
    real_memory_mb: 1024
partitions:
  p:
    nodes: ["n0", "ghost"]
"#;
        let f = yaml_tempfile(yaml);
        let mut cfg = ClusterConfig::new();
        cfg.load_from_file(f.path()).unwrap();
        let part = cfg.partition_by_name("p").unwrap();
        assert_eq!(part.nodes.count_ones(..), 1);
    }

    #[test]
    fn missing_file_returns_error() {
        let mut cfg = ClusterConfig::new();
        assert!(cfg.load_from_file(Path::new("/nonexistent/cluster.yaml")).is_err());
        assert!(!cfg.is_loaded());
    }
}
