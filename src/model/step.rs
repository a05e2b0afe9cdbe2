//! Step: a subdivision of a job with its own task layout.

use fixedbitset::FixedBitSet;
use serde::{Deserialize, Serialize};

use crate::model::job::JobId;

pub type StepId = u32;

/// Checkpoint bookkeeping for a step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub enabled: bool,
    pub last_event_time: Option<u64>,
    pub error: Option<(i32, String)>,
}

/// A subdivision of a [`crate::model::job::Job`] with its own node
/// subset and task layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub job_id: JobId,

    pub node_bitmap: FixedBitSet,
    /// Tasks placed on each node, parallel to `node_bitmap`'s set bits in
    /// ascending node-index order.
    pub tasks_per_node: Vec<u32>,
    pub mem_per_task_mb: u64,

    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    pub exit_status: Option<i32>,

    pub checkpoint: CheckpointMeta,
}

impl Step {
    /// Total task count across all nodes.
    pub fn total_tasks(&self) -> u32 {
        self.tasks_per_node.iter().sum()
    }

    /// `true` if this step has no explicit per-task memory charge and
    /// step-level memory accounting should be skipped.
    pub fn skips_memory_accounting(&self) -> bool {
        self.mem_per_task_mb == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_with_tasks(tasks: Vec<u32>) -> Step {
        Step {
            id: 0,
            job_id: 1,
            node_bitmap: FixedBitSet::with_capacity(4),
            tasks_per_node: tasks,
            mem_per_task_mb: 0,
            start_time: None,
            end_time: None,
            exit_status: None,
            checkpoint: CheckpointMeta::default(),
        }
    }

    #[test]
    fn total_tasks_sums_per_node_counts() {
        let step = step_with_tasks(vec![2, 3, 1]);
        assert_eq!(step.total_tasks(), 6);
    }

    #[test]
    fn zero_mem_per_task_skips_accounting() {
        let mut step = step_with_tasks(vec![1]);
        assert!(step.skips_memory_accounting());
        step.mem_per_task_mb = 512;
        assert!(!step.skips_memory_accounting());
    }
}
