//! Resource accounting map: per-node running/total job counts, exclusive
//! holder, and allocated memory — the shared ledger every placement
//! debits and every completion credits.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::model::{Job, JobId, Node, NodeId, Partition, PartitionId, SharePreference, Step};

/// Running/total job counts for one partition on one node.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PartitionCounts {
    pub running: u32,
    pub total: u32,
}

/// One node's ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAccounting {
    pub real_memory_mb: u64,
    pub allocated_memory_mb: u64,
    pub exclusive_holder: Option<JobId>,
    pub partitions: HashMap<PartitionId, PartitionCounts>,
}

impl NodeAccounting {
    fn new(real_memory_mb: u64) -> Self {
        Self {
            real_memory_mb,
            allocated_memory_mb: 0,
            exclusive_holder: None,
            partitions: HashMap::new(),
        }
    }

    /// Total running-job-count across every partition recorded on this
    /// node, used by the FORCE (global-cap) branch of the share check.
    fn total_running(&self) -> u32 {
        self.partitions.values().map(|p| p.running).sum()
    }
}

/// Serializable snapshot returned by [`AccountingMap::dump`] for
/// log/debug surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingSnapshot {
    pub nodes: Vec<NodeAccounting>,
}

/// The live per-node ledger. Synchronous and single-threaded from the
/// scheduler's perspective (spec §5) — callers serialize access via
/// [`crate::controller::Controller`]'s lock.
#[derive(Debug, Clone, Default)]
pub struct AccountingMap {
    nodes: Vec<NodeAccounting>,
}

impl AccountingMap {
    pub fn new(nodes: &[Node]) -> Self {
        Self {
            nodes: nodes.iter().map(|n| NodeAccounting::new(n.real_memory_mb)).collect(),
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeAccounting> {
        self.nodes.get(id as usize)
    }

    /// Debit the map for a newly-placed job. Checked in a pre-pass so
    /// that a failure partway through never leaves a partial debit
    /// (roll back any partial debit).
    pub fn try_add_job(&mut self, job: &Job, partition: &Partition) -> Result<()> {
        let node_ids: Vec<NodeId> = job.node_bitmap.ones().map(|b| b as NodeId).collect();
        if node_ids.is_empty() {
            return Err(Error::NoResources {
                job_id: job.id,
                reason: "job has no allocated nodes".into(),
            });
        }

        for (i, &nid) in node_ids.iter().enumerate() {
            let mem = job.mem_per_node.get(i).copied().unwrap_or(0);
            let na = self
                .nodes
                .get(nid as usize)
                .ok_or_else(|| Error::InvalidNodeName(nid.to_string()))?;

            if na.allocated_memory_mb + mem > na.real_memory_mb {
                return Err(Error::NoResources {
                    job_id: job.id,
                    reason: format!("node {nid} insufficient memory"),
                });
            }
            let wants_excl = matches!(job.share, SharePreference::Exclusive);
            if wants_excl && na.exclusive_holder.is_some() {
                return Err(Error::NoResources {
                    job_id: job.id,
                    reason: format!("node {nid} already exclusively held"),
                });
            }
            if !wants_excl && na.exclusive_holder.is_some() {
                return Err(Error::NoResources {
                    job_id: job.id,
                    reason: format!("node {nid} held exclusively by another job"),
                });
            }
            let running = if partition.share.force {
                na.total_running()
            } else {
                na.partitions.get(&partition.id).map(|c| c.running).unwrap_or(0)
            };
            // max_share = 0 means "exclusive": at most one occupant, same as
            // max_share = 1 but additionally requiring that occupant to hold
            // the node exclusively (checked above).
            let cap = partition.share.max_share.max(1);
            if running >= cap {
                return Err(Error::NoResources {
                    job_id: job.id,
                    reason: format!("node {nid} at share capacity"),
                });
            }
        }

        let wants_excl = matches!(job.share, SharePreference::Exclusive);
        for (i, &nid) in node_ids.iter().enumerate() {
            let mem = job.mem_per_node.get(i).copied().unwrap_or(0);
            let na = &mut self.nodes[nid as usize];
            na.allocated_memory_mb += mem;
            let counts = na.partitions.entry(partition.id).or_default();
            counts.running += 1;
            counts.total += 1;
            if wants_excl {
                na.exclusive_holder = Some(job.id);
            }
        }
        debug!(job_id = job.id, nodes = node_ids.len(), "job debited");
        Ok(())
    }

    /// Re-add running count after a suspend, refusing to proceed if it
    /// would exceed the partition's max-share, e.g. on `resume`.
    /// Unlike [`Self::try_add_job`] this never touches memory, total
    /// count, or the exclusive holder — those were never released by
    /// [`Self::rm_job`]'s `remove_all = false` path.
    pub fn try_resume(&mut self, job: &Job, partition: &Partition) -> Result<()> {
        let node_ids: Vec<NodeId> = job.node_bitmap.ones().map(|b| b as NodeId).collect();
        for &nid in &node_ids {
            let na = self
                .nodes
                .get(nid as usize)
                .ok_or_else(|| Error::InvalidNodeName(nid.to_string()))?;
            let running = if partition.share.force {
                na.total_running()
            } else {
                na.partitions.get(&partition.id).map(|c| c.running).unwrap_or(0)
            };
            let cap = partition.share.max_share.max(1);
            if running >= cap {
                return Err(Error::NoResources {
                    job_id: job.id,
                    reason: format!("node {nid} at share capacity on resume"),
                });
            }
        }
        for &nid in &node_ids {
            let na = &mut self.nodes[nid as usize];
            na.partitions.entry(partition.id).or_default().running += 1;
        }
        Ok(())
    }

    /// Credit a job's debits. `remove_all = false` is suspension
    /// (running-count only); `remove_all = true` is termination (full
    /// credit, memory released, exclusive holder cleared).
    pub fn rm_job(&mut self, job: &Job, partition_id: PartitionId, remove_all: bool) {
        let node_ids: Vec<NodeId> = job.node_bitmap.ones().map(|b| b as NodeId).collect();
        for (i, &nid) in node_ids.iter().enumerate() {
            let Some(na) = self.nodes.get_mut(nid as usize) else {
                continue;
            };
            if let Some(counts) = na.partitions.get_mut(&partition_id) {
                counts.running = clamp_sub(counts.running, 1, "running", job.id);
                if remove_all {
                    counts.total = clamp_sub(counts.total, 1, "total", job.id);
                }
            }
            if remove_all {
                let mem = job.mem_per_node.get(i).copied().unwrap_or(0);
                na.allocated_memory_mb = clamp_sub_u64(na.allocated_memory_mb, mem, "memory", job.id);
                if na.exclusive_holder == Some(job.id) {
                    na.exclusive_holder = None;
                }
            }
        }
    }

    /// Debit a step's per-task memory, unless the step is exempt
    ///
    pub fn add_step(&mut self, step: &Step) {
        if step.skips_memory_accounting() {
            return;
        }
        for (i, nid) in step.node_bitmap.ones().enumerate() {
            let Some(na) = self.nodes.get_mut(nid) else { continue };
            let tasks = step.tasks_per_node.get(i).copied().unwrap_or(0) as u64;
            na.allocated_memory_mb += tasks * step.mem_per_task_mb;
        }
    }

    /// Credit a step's per-task memory back.
    pub fn rm_step(&mut self, step: &Step) {
        if step.skips_memory_accounting() {
            return;
        }
        for (i, nid) in step.node_bitmap.ones().enumerate() {
            let Some(na) = self.nodes.get_mut(nid) else { continue };
            let tasks = step.tasks_per_node.get(i).copied().unwrap_or(0) as u64;
            let amount = tasks * step.mem_per_task_mb;
            na.allocated_memory_mb = clamp_sub_u64(na.allocated_memory_mb, amount, "step memory", step.job_id);
        }
    }

    /// Detached copy used by will-run prediction; never
    /// touches live state.
    pub fn duplicate(&self) -> AccountingMap {
        self.clone()
    }

    pub fn dump(&self) -> AccountingSnapshot {
        AccountingSnapshot {
            nodes: self.nodes.clone(),
        }
    }
}

fn clamp_sub(value: u32, amount: u32, what: &str, job_id: JobId) -> u32 {
    match value.checked_sub(amount) {
        Some(v) => v,
        None => {
            error!(job_id, what, value, amount, "accounting underflow, clamping to zero");
            0
        }
    }
}

fn clamp_sub_u64(value: u64, amount: u64, what: &str, job_id: JobId) -> u64 {
    match value.checked_sub(amount) {
        Some(v) => v,
        None => {
            warn!(job_id, what, value, amount, "accounting underflow, clamping to zero");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixedbitset::FixedBitSet;

    fn node(id: NodeId, mem: u64) -> Node {
        Node {
            id,
            name: format!("n{id}"),
            sockets: 1,
            cores_per_socket: 4,
            threads_per_core: 1,
            real_memory_mb: mem,
            state: crate::model::NodeState::Up,
            coord: vec![],
            region: None,
        }
    }

    fn partition(id: PartitionId, max_share: u32) -> Partition {
        Partition {
            id,
            name: "p".into(),
            nodes: FixedBitSet::with_capacity(4),
            share: crate::model::SharePolicy { max_share, force: false },
            priority: 0,
            default_time_limit_s: None,
            hidden: false,
        }
    }

    fn job_on(nodes: &[usize], mem_per_node: Vec<u64>, share: SharePreference) -> Job {
        let mut bitmap = FixedBitSet::with_capacity(4);
        for &n in nodes {
            bitmap.insert(n);
        }
        Job {
            id: 42,
            uid: 0,
            gid: 0,
            min_nodes: nodes.len() as u32,
            max_nodes: nodes.len() as u32,
            cpus_requested: 1,
            memory: crate::model::MemoryRequest::None,
            required_features: vec![],
            contiguous: false,
            time_limit_s: None,
            share,
            required_nodes: vec![],
            partition: 0,
            state: crate::model::JobState::Running,
            node_bitmap: bitmap,
            cpus_per_node: vec![1; nodes.len()],
            mem_per_node,
            assoc_id: 0,
            contact: None,
            submit_time: 0,
            start_time: None,
            end_time: None,
        }
    }

    #[test]
    fn try_add_job_debits_memory_and_counts() {
        let nodes = vec![node(0, 8192)];
        let mut map = AccountingMap::new(&nodes);
        let part = partition(0, 2);
        let job = job_on(&[0], vec![4096], SharePreference::Shared);

        map.try_add_job(&job, &part).unwrap();
        let na = map.node(0).unwrap();
        assert_eq!(na.allocated_memory_mb, 4096);
        assert_eq!(na.partitions[&0].running, 1);
        assert_eq!(na.partitions[&0].total, 1);
    }

    #[test]
    fn try_add_job_rejects_memory_overcommit() {
        let nodes = vec![node(0, 4096)];
        let mut map = AccountingMap::new(&nodes);
        let part = partition(0, 2);
        let job = job_on(&[0], vec![8192], SharePreference::Shared);

        assert!(map.try_add_job(&job, &part).is_err());
        assert_eq!(map.node(0).unwrap().allocated_memory_mb, 0, "no partial debit on failure");
    }

    #[test]
    fn exclusive_job_blocks_a_second_job_on_same_node() {
        let nodes = vec![node(0, 8192)];
        let mut map = AccountingMap::new(&nodes);
        let part = partition(0, 4);
        let excl = job_on(&[0], vec![1024], SharePreference::Exclusive);
        map.try_add_job(&excl, &part).unwrap();

        let other = job_on(&[0], vec![1024], SharePreference::Shared);
        assert!(map.try_add_job(&other, &part).is_err());
    }

    #[test]
    fn rm_job_remove_all_credits_memory_and_clears_holder() {
        let nodes = vec![node(0, 8192)];
        let mut map = AccountingMap::new(&nodes);
        let part = partition(0, 1);
        let job = job_on(&[0], vec![2048], SharePreference::Exclusive);
        map.try_add_job(&job, &part).unwrap();

        map.rm_job(&job, 0, true);
        let na = map.node(0).unwrap();
        assert_eq!(na.allocated_memory_mb, 0);
        assert_eq!(na.exclusive_holder, None);
        assert_eq!(na.partitions[&0].total, 0);
    }

    #[test]
    fn rm_job_suspend_only_decrements_running() {
        let nodes = vec![node(0, 8192)];
        let mut map = AccountingMap::new(&nodes);
        let part = partition(0, 1);
        let job = job_on(&[0], vec![2048], SharePreference::Shared);
        map.try_add_job(&job, &part).unwrap();

        map.rm_job(&job, 0, false);
        let na = map.node(0).unwrap();
        assert_eq!(na.allocated_memory_mb, 2048, "memory retained across suspend");
        assert_eq!(na.partitions[&0].running, 0);
        assert_eq!(na.partitions[&0].total, 1, "total intact across suspend");
    }

    #[test]
    fn underflow_is_clamped_not_panicking() {
        let nodes = vec![node(0, 8192)];
        let mut map = AccountingMap::new(&nodes);
        let job = job_on(&[0], vec![1024], SharePreference::Shared);
        map.rm_job(&job, 0, true);
        assert_eq!(map.node(0).unwrap().allocated_memory_mb, 0);
    }
}
