//! Partition: a named set of nodes with scheduling policy knobs.

use fixedbitset::FixedBitSet;
use serde::{Deserialize, Serialize};

use super::node::NodeId;

pub type PartitionId = u32;

/// Sharing policy for a partition.
///
/// `max_share = 0` means exclusive (one job per node); `max_share = N >
/// 0` permits up to `N` concurrent jobs per node. `force` additionally
/// collapses the per-partition caps on a node into one shared global cap
///
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SharePolicy {
    pub max_share: u32,
    pub force: bool,
}

impl SharePolicy {
    pub const EXCLUSIVE: SharePolicy = SharePolicy {
        max_share: 0,
        force: false,
    };

    /// The effective policy when a job's request is silent about
    /// sharing: non-exclusive, with an effective cap of 1 — resolves the
    /// resolved in favour of
    /// `max_share = 1` rather than `0`.
    pub const SILENT_REQUEST_DEFAULT: SharePolicy = SharePolicy {
        max_share: 1,
        force: false,
    };

    pub fn is_exclusive(&self) -> bool {
        self.max_share == 0
    }
}

/// Named set of nodes with scheduling policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partition {
    pub id: PartitionId,
    pub name: String,
    pub nodes: FixedBitSet,
    pub share: SharePolicy,
    pub priority: u32,
    pub default_time_limit_s: Option<u64>,
    /// `true` if this partition is hidden from default listings (not
    /// used by any invariant here; carried for interface parity with
    /// an `-a` CLI flag, which is itself out of scope).
    pub hidden: bool,
}

impl Partition {
    pub fn contains_node(&self, node: NodeId) -> bool {
        self.nodes.contains(node as usize)
    }
}
