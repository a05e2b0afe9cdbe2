//! Job: a scheduling request and its resolved allocation.

use fixedbitset::FixedBitSet;
use serde::{Deserialize, Serialize};

use crate::assoc::AssocId;
use crate::model::partition::PartitionId;

pub type JobId = u32;

/// Job lifecycle state. Transitions are enforced by
/// [`crate::lifecycle`], not by this type itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Suspended,
    Completing,
    Complete,
    Failed,
    Cancelled,
    Timeout,
}

/// Whether a job wants exclusive use of its nodes, is willing to share,
/// or left the question unspecified (resolved to non-exclusive,
/// effective cap 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SharePreference {
    Exclusive,
    Shared,
    Unspecified,
}

/// Per-task or per-node memory request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum MemoryRequest {
    PerTask(u64),
    PerNode(u64),
    /// No memory constraint requested.
    None,
}

/// Host/port contact for [`crate::notifier`] fan-out. Absent if the
/// submitter did not register for notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientContact {
    pub host: String,
    pub port: u16,
}

/// A job submission and its resolved placement, once scheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub uid: u32,
    pub gid: u32,

    pub min_nodes: u32,
    pub max_nodes: u32,
    pub cpus_requested: u32,
    pub memory: MemoryRequest,
    pub required_features: Vec<String>,
    pub contiguous: bool,
    pub time_limit_s: Option<u64>,
    pub share: SharePreference,

    /// Nodes the job must be placed on (subset of the final allocation).
    pub required_nodes: Vec<u32>,

    pub partition: PartitionId,
    pub state: JobState,

    /// Bitmap of nodes selected for this job. Non-empty only once
    /// RUNNING.
    pub node_bitmap: FixedBitSet,
    /// Per-node CPU allocation, parallel to the set bits of `node_bitmap`
    /// in ascending node-index order.
    pub cpus_per_node: Vec<u32>,
    /// Per-node memory allocation in MB, same ordering as `cpus_per_node`.
    pub mem_per_node: Vec<u64>,

    pub assoc_id: AssocId,
    pub contact: Option<ClientContact>,

    pub submit_time: u64,
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
}

impl Job {
    /// `true` once the scheduler has produced a non-empty placement.
    pub fn is_allocated(&self) -> bool {
        self.node_bitmap.count_ones(..) > 0
    }

    /// Effective max-share this job requests of the nodes it lands on,
    /// independent of the partition's own policy — used only to check
    /// for an outright exclusive request.
    pub fn wants_exclusive(&self) -> bool {
        matches!(self.share, SharePreference::Exclusive)
    }
}
