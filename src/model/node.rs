//! Node inventory: hardware shape, liveness, and optional torus coordinate.

use serde::{Deserialize, Serialize};

/// Dense integer handle for a node, replacing pointer-based cross
/// references between job/step/node records with an arena index.
pub type NodeId = u32;

/// Current liveness state of a node. Selectors must treat this as given
/// and never mutate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Up,
    Down,
    Draining,
    Drained,
    Unknown,
}

impl NodeState {
    /// Whether a job may be placed on a node in this state.
    pub fn is_schedulable(self) -> bool {
        matches!(self, NodeState::Up)
    }
}

impl Default for NodeState {
    fn default() -> Self {
        NodeState::Unknown
    }
}

/// Hardware inventory and liveness for one compute node.
///
/// A cluster node: identity, socket/core/thread/memory shape,
/// liveness, and an optional coordinate tuple used only by
/// [`crate::selector::torus::TorusSelector`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub sockets: u32,
    pub cores_per_socket: u32,
    pub threads_per_core: u32,
    pub real_memory_mb: u64,
    pub state: NodeState,
    /// Coordinate tuple for topology-aware selection. Empty when the node
    /// carries no topology information.
    pub coord: Vec<u32>,
    /// Free-text rack/region label. Plays no role in any invariant or
    /// selector; carried purely for operator-facing log lines.
    pub region: Option<String>,
}

impl Node {
    /// Total logical CPU count: sockets × cores-per-socket × threads-per-core.
    pub fn cpu_count(&self) -> u32 {
        self.sockets * self.cores_per_socket * self.threads_per_core
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_count_multiplies_shape() {
        let n = Node {
            id: 0,
            name: "n0".into(),
            sockets: 2,
            cores_per_socket: 8,
            threads_per_core: 2,
            real_memory_mb: 65536,
            state: NodeState::Up,
            coord: vec![],
            region: None,
        };
        assert_eq!(n.cpu_count(), 32);
    }

    #[test]
    fn only_up_is_schedulable() {
        assert!(NodeState::Up.is_schedulable());
        assert!(!NodeState::Down.is_schedulable());
        assert!(!NodeState::Draining.is_schedulable());
        assert!(!NodeState::Drained.is_schedulable());
        assert!(!NodeState::Unknown.is_schedulable());
    }
}
