//! Common pre-filter shared by every selector.

use fixedbitset::FixedBitSet;

use crate::accounting::AccountingMap;
use crate::model::{Job, MemoryRequest, NodeId, Partition};

use super::JobTestMode;

/// Narrows `candidate` to nodes where the job's memory request fits,
/// there is no conflicting exclusive holder, and the partition's share
/// cap has room — unless `mode` is `TestOnly`, in which case the memory
/// and exclusivity checks are suppressed ("could this ever run").
pub fn prefilter(
    candidate: &FixedBitSet,
    job: &Job,
    partition: &Partition,
    accounting: &AccountingMap,
    mode: JobTestMode,
    cpu_count: &dyn Fn(NodeId) -> u32,
) -> FixedBitSet {
    let mut out = FixedBitSet::with_capacity(candidate.len());
    let wants_excl = job.wants_exclusive();

    for node in candidate.ones() {
        let nid = node as NodeId;
        let Some(na) = accounting.node(nid) else {
            continue;
        };

        if mode != JobTestMode::TestOnly {
            let required_mem = match job.memory {
                MemoryRequest::PerNode(m) => m,
                MemoryRequest::PerTask(m) => m.saturating_mul(cpu_count(nid) as u64),
                MemoryRequest::None => 0,
            };
            if na.allocated_memory_mb + required_mem > na.real_memory_mb {
                continue;
            }
            let occupied_exclusively = na.exclusive_holder.is_some();
            if occupied_exclusively || (wants_excl && na.partitions.values().any(|c| c.running > 0)) {
                continue;
            }
        }

        let running = if partition.share.force {
            na.partitions.values().map(|c| c.running).sum::<u32>()
        } else {
            na.partitions.get(&partition.id).map(|c| c.running).unwrap_or(0)
        };
        let cap = partition.share.max_share.max(1);
        if running >= cap {
            continue;
        }

        out.insert(node);
    }
    out
}
