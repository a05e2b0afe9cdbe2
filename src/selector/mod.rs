//! Node-selection plugins choosing placement for a job.

pub mod linear;
mod prefilter;
pub mod torus;
pub mod willrun;

use fixedbitset::FixedBitSet;

use crate::accounting::AccountingMap;
use crate::error::Result;
use crate::model::{Job, NodeId, Partition, PartitionId, Step};

pub use prefilter::prefilter;

/// Which question `job_test` is answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTestMode {
    RunNow,
    TestOnly,
    WillRun,
}

#[derive(Debug, Clone)]
pub enum JobTestResult {
    Success {
        node_bitmap: FixedBitSet,
        cpus_per_node: Vec<u32>,
    },
    NoResources,
    WillRunAt(u64),
}

/// A node-selection algorithm. `LinearSelector` and `TorusSelector` are
/// the two in-tree variants, chosen as a tagged type at `Controller`
/// construction rather than via dynamic plugin loading (this is a
/// Notes: "function-table polymorphism" recast as a trait object set
/// fixed at startup).
pub trait Selector: std::fmt::Debug {
    /// Produce a placement for `job` from `candidate`, already narrowed
    /// by [`prefilter`]. `required_nodes` must all appear in the result.
    fn job_test(
        &self,
        job: &Job,
        mode: JobTestMode,
        candidate: &FixedBitSet,
        min_nodes: u32,
        max_nodes: u32,
        required_nodes: &[NodeId],
        cpu_count: &dyn Fn(NodeId) -> u32,
        coord: &dyn Fn(NodeId) -> Vec<u32>,
    ) -> JobTestResult;

    fn job_begin(&self, job: &Job, partition: &Partition, accounting: &mut AccountingMap) -> Result<()> {
        accounting.try_add_job(job, partition)
    }

    fn job_fini(&self, job: &Job, partition_id: PartitionId, accounting: &mut AccountingMap) {
        accounting.rm_job(job, partition_id, true)
    }

    fn job_suspend(&self, job: &Job, partition_id: PartitionId, accounting: &mut AccountingMap) {
        accounting.rm_job(job, partition_id, false)
    }

    fn job_resume(&self, job: &Job, partition: &Partition, accounting: &mut AccountingMap) -> Result<()> {
        accounting.try_resume(job, partition)
    }

    fn step_begin(&self, step: &Step, accounting: &mut AccountingMap) {
        accounting.add_step(step)
    }

    fn step_fini(&self, step: &Step, accounting: &mut AccountingMap) {
        accounting.rm_step(step)
    }
}

/// The two in-tree selector variants, held by `Controller` as a tagged
/// enum (`Selector = Linear | Torus |
/// ConsumableResource`; the latter has no counterpart here).
#[derive(Debug)]
pub enum AnySelector {
    Linear(linear::LinearSelector),
    Torus(torus::TorusSelector),
}

impl Selector for AnySelector {
    fn job_test(
        &self,
        job: &Job,
        mode: JobTestMode,
        candidate: &FixedBitSet,
        min_nodes: u32,
        max_nodes: u32,
        required_nodes: &[NodeId],
        cpu_count: &dyn Fn(NodeId) -> u32,
        coord: &dyn Fn(NodeId) -> Vec<u32>,
    ) -> JobTestResult {
        match self {
            AnySelector::Linear(s) => {
                s.job_test(job, mode, candidate, min_nodes, max_nodes, required_nodes, cpu_count, coord)
            }
            AnySelector::Torus(s) => {
                s.job_test(job, mode, candidate, min_nodes, max_nodes, required_nodes, cpu_count, coord)
            }
        }
    }
}
