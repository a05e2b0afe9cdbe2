//! Linear selector: best-fit over maximal runs of consecutive node
//! indices (a "consec-sets" scan).

use fixedbitset::FixedBitSet;

use crate::model::{Job, NodeId};

use super::{JobTestMode, JobTestResult, Selector};

#[derive(Debug, Default)]
pub struct LinearSelector;

struct ConsecSet {
    nodes: Vec<NodeId>,
    total_cpus: u32,
}

impl ConsecSet {
    fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }
}

fn consec_sets(candidate: &FixedBitSet, cpu_count: &dyn Fn(NodeId) -> u32) -> Vec<ConsecSet> {
    let mut sets = Vec::new();
    let mut current: Vec<NodeId> = Vec::new();

    for bit in 0..candidate.len() {
        let present = candidate.contains(bit);
        let node = bit as NodeId;
        if present {
            if let Some(&last) = current.last() {
                if node != last + 1 {
                    sets.push(finish_set(std::mem::take(&mut current), cpu_count));
                }
            }
            current.push(node);
        } else if !current.is_empty() {
            sets.push(finish_set(std::mem::take(&mut current), cpu_count));
        }
    }
    if !current.is_empty() {
        sets.push(finish_set(current, cpu_count));
    }
    sets
}

fn finish_set(nodes: Vec<NodeId>, cpu_count: &dyn Fn(NodeId) -> u32) -> ConsecSet {
    let total_cpus = nodes.iter().map(|&n| cpu_count(n)).sum();
    ConsecSet { nodes, total_cpus }
}

fn is_sufficient(set: &ConsecSet, job: &Job, min_nodes: u32, _max_nodes: u32) -> bool {
    set.nodes.len() as u32 >= min_nodes && set.total_cpus >= job.cpus_requested
}

/// Pick the specific nodes within `set` to satisfy the job, expanding
/// outward from the required-node region (upward, i.e. increasing
/// index, first) when required nodes are present, otherwise filling
/// left-to-right.
fn pick_within_set(
    set: &ConsecSet,
    job: &Job,
    max_nodes: u32,
    required_nodes: &[NodeId],
    cpu_count: &dyn Fn(NodeId) -> u32,
) -> Vec<NodeId> {
    let present_required: Vec<NodeId> = required_nodes
        .iter()
        .copied()
        .filter(|n| set.contains(*n))
        .collect();

    let mut chosen: Vec<NodeId> = present_required.clone();
    let mut cpu_total: u32 = chosen.iter().map(|&n| cpu_count(n)).sum();

    if !present_required.is_empty() {
        let lo = *present_required.iter().min().unwrap();
        let hi = *present_required.iter().max().unwrap();
        let mut up = hi + 1;
        let mut down = lo.checked_sub(1);
        loop {
            if chosen.len() as u32 >= max_nodes || cpu_total >= job.cpus_requested && chosen.len() as u32 >= job.min_nodes
            {
                break;
            }
            let mut advanced = false;
            if set.contains(up) && chosen.len() < set.nodes.len() {
                chosen.push(up);
                cpu_total += cpu_count(up);
                up += 1;
                advanced = true;
                if chosen.len() as u32 >= max_nodes {
                    break;
                }
            }
            if let Some(d) = down {
                if set.contains(d) {
                    chosen.push(d);
                    cpu_total += cpu_count(d);
                    down = d.checked_sub(1);
                    advanced = true;
                } else {
                    down = None;
                }
            }
            if !advanced {
                break;
            }
        }
    } else {
        for &n in &set.nodes {
            if chosen.len() as u32 >= max_nodes {
                break;
            }
            if cpu_total >= job.cpus_requested && chosen.len() as u32 >= job.min_nodes {
                break;
            }
            chosen.push(n);
            cpu_total += cpu_count(n);
        }
    }
    chosen.sort_unstable();
    chosen
}

impl Selector for LinearSelector {
    fn job_test(
        &self,
        job: &Job,
        mode: JobTestMode,
        candidate: &FixedBitSet,
        min_nodes: u32,
        max_nodes: u32,
        required_nodes: &[NodeId],
        cpu_count: &dyn Fn(NodeId) -> u32,
        _coord: &dyn Fn(NodeId) -> Vec<u32>,
    ) -> JobTestResult {
        let sets = consec_sets(candidate, cpu_count);
        if sets.is_empty() {
            return JobTestResult::NoResources;
        }

        let target_set = if !required_nodes.is_empty() {
            let required_node = required_nodes[0];
            match sets.iter().find(|s| s.contains(required_node)) {
                Some(s) if is_sufficient(s, job, min_nodes, max_nodes) => Some(s),
                _ => None,
            }
        } else {
            sets.iter()
                .filter(|s| is_sufficient(s, job, min_nodes, max_nodes))
                .max_by_key(|s| s.nodes.len())
        };

        let Some(set) = target_set else {
            return JobTestResult::NoResources;
        };

        if job.contiguous && set.nodes.len() < min_nodes as usize {
            return JobTestResult::NoResources;
        }

        let chosen = pick_within_set(set, job, max_nodes, required_nodes, cpu_count);
        if (chosen.len() as u32) < min_nodes {
            return JobTestResult::NoResources;
        }

        if mode == JobTestMode::TestOnly {
            // "could this ever run" — the candidate set already answers that.
        }

        let mut node_bitmap = FixedBitSet::with_capacity(candidate.len());
        let mut cpus_per_node = Vec::with_capacity(chosen.len());
        for &n in &chosen {
            node_bitmap.insert(n as usize);
            cpus_per_node.push(cpu_count(n));
        }
        JobTestResult::Success {
            node_bitmap,
            cpus_per_node,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobState, MemoryRequest, SharePreference};

    fn job(min_nodes: u32, max_nodes: u32, cpus: u32, contiguous: bool, required: Vec<NodeId>) -> Job {
        Job {
            id: 1,
            uid: 0,
            gid: 0,
            min_nodes,
            max_nodes,
            cpus_requested: cpus,
            memory: MemoryRequest::None,
            required_features: vec![],
            contiguous,
            time_limit_s: None,
            share: SharePreference::Shared,
            required_nodes: required,
            partition: 0,
            state: JobState::Pending,
            node_bitmap: FixedBitSet::with_capacity(10),
            cpus_per_node: vec![],
            mem_per_node: vec![],
            assoc_id: 0,
            contact: None,
            submit_time: 0,
            start_time: None,
            end_time: None,
        }
    }

    fn all_free_bitmap(n: usize) -> FixedBitSet {
        let mut b = FixedBitSet::with_capacity(n);
        b.insert_range(0..n);
        b
    }

    #[test]
    fn contiguous_best_fit_picks_first_three_free_nodes() {
        let selector = LinearSelector;
        let candidate = all_free_bitmap(10);
        let j = job(3, 3, 3, true, vec![]);

        let result = selector.job_test(&j, JobTestMode::RunNow, &candidate, 3, 3, &[], &|_| 1, &|_: NodeId| Vec::new());
        match result {
            JobTestResult::Success { node_bitmap, .. } => {
                let chosen: Vec<usize> = node_bitmap.ones().collect();
                assert_eq!(chosen, vec![0, 1, 2]);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn required_node_expands_upward_first() {
        let selector = LinearSelector;
        let candidate = all_free_bitmap(10);
        let j = job(3, 3, 3, false, vec![5]);

        let result = selector.job_test(&j, JobTestMode::RunNow, &candidate, 3, 3, &[5], &|_| 1, &|_: NodeId| Vec::new());
        match result {
            JobTestResult::Success { node_bitmap, .. } => {
                let chosen: Vec<usize> = node_bitmap.ones().collect();
                assert_eq!(chosen, vec![4, 5, 6]);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn no_sufficient_set_yields_no_resources() {
        let selector = LinearSelector;
        let mut candidate = FixedBitSet::with_capacity(10);
        candidate.insert(0);
        let j = job(3, 3, 3, false, vec![]);

        let result = selector.job_test(&j, JobTestMode::RunNow, &candidate, 3, 3, &[], &|_| 1, &|_: NodeId| Vec::new());
        assert!(matches!(result, JobTestResult::NoResources));
    }
}
