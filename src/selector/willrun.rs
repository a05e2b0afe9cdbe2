//! Will-run prediction: simulate running-job completion to answer "when
//! would this job be able to run".

use fixedbitset::FixedBitSet;

use crate::accounting::AccountingMap;
use crate::model::{Job, NodeId, Partition};

use super::{prefilter, JobTestMode, JobTestResult, Selector};

/// A running job as seen by the predictor: just enough to simulate its
/// termination on a detached accounting map.
pub struct RunningJob<'a> {
    pub job: &'a Job,
    pub partition_id: crate::model::PartitionId,
    pub end_time: u64,
}

/// Clones `accounting`, then retires each of `running` (sorted by
/// ascending end time) one at a time, retrying `job_test(RunNow)` after
/// each retirement. The first retry that succeeds returns
/// `WillRunAt(end_time_of_last_removed_job)`, clamped to `now + 1` if
/// that time has already passed.
pub fn predict(
    selector: &dyn Selector,
    job: &Job,
    candidate: &FixedBitSet,
    partition: &Partition,
    accounting: &AccountingMap,
    mut running: Vec<RunningJob<'_>>,
    min_nodes: u32,
    max_nodes: u32,
    required_nodes: &[NodeId],
    cpu_count: &dyn Fn(NodeId) -> u32,
    coord: &dyn Fn(NodeId) -> Vec<u32>,
    now: u64,
) -> JobTestResult {
    running.sort_by_key(|r| r.end_time);

    let mut sim = accounting.duplicate();
    for r in &running {
        sim.rm_job(r.job, r.partition_id, true);

        let filtered = prefilter(candidate, job, partition, &sim, JobTestMode::RunNow, cpu_count);
        let result = selector.job_test(
            job,
            JobTestMode::RunNow,
            &filtered,
            min_nodes,
            max_nodes,
            required_nodes,
            cpu_count,
            coord,
        );
        if matches!(result, JobTestResult::Success { .. }) {
            let at = if r.end_time <= now { now + 1 } else { r.end_time };
            return JobTestResult::WillRunAt(at);
        }
    }
    JobTestResult::NoResources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobState, MemoryRequest, PartitionId, SharePolicy, SharePreference};
    use crate::selector::linear::LinearSelector;

    fn node(mem: u64) -> crate::model::Node {
        crate::model::Node {
            id: 0,
            name: "n0".into(),
            sockets: 1,
            cores_per_socket: 4,
            threads_per_core: 1,
            real_memory_mb: mem,
            state: crate::model::NodeState::Up,
            coord: vec![],
            region: None,
        }
    }

    fn partition(max_share: u32) -> Partition {
        Partition {
            id: 0,
            name: "p".into(),
            nodes: FixedBitSet::with_capacity(1),
            share: SharePolicy { max_share, force: false },
            priority: 0,
            default_time_limit_s: None,
            hidden: false,
        }
    }

    fn job_with_share(id: u32, share: SharePreference) -> Job {
        let mut bitmap = FixedBitSet::with_capacity(1);
        bitmap.insert(0);
        Job {
            id,
            uid: 0,
            gid: 0,
            min_nodes: 1,
            max_nodes: 1,
            cpus_requested: 1,
            memory: MemoryRequest::None,
            required_features: vec![],
            contiguous: false,
            time_limit_s: None,
            share,
            required_nodes: vec![],
            partition: 0,
            state: JobState::Running,
            node_bitmap: bitmap,
            cpus_per_node: vec![1],
            mem_per_node: vec![0],
            assoc_id: 0,
            contact: None,
            submit_time: 0,
            start_time: None,
            end_time: None,
        }
    }

    #[test]
    fn predicts_run_time_after_exclusive_job_frees_node() {
        let nodes = vec![node(4096)];
        let mut accounting = AccountingMap::new(&nodes);
        let part = partition(1);

        let occupant = job_with_share(1, SharePreference::Exclusive);
        accounting.try_add_job(&occupant, &part).unwrap();

        let mut candidate = FixedBitSet::with_capacity(1);
        candidate.insert(0);

        let pending = job_with_share(2, SharePreference::Shared);
        let selector = LinearSelector;

        let running = vec![RunningJob {
            job: &occupant,
            partition_id: 0 as PartitionId,
            end_time: 500,
        }];

        let result = predict(
            &selector,
            &pending,
            &candidate,
            &part,
            &accounting,
            running,
            1,
            1,
            &[],
            &|_| 1,
            &|_| Vec::new(),
            100,
        );
        assert!(matches!(result, JobTestResult::WillRunAt(500)));
    }
}
