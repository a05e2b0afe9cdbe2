//! 3D-torus selector: distance-minimising placement over a coordinate
//! grid.
//!
//! Despite the name, per-axis distance does not wrap: a resolved design
//! choice in favour of straight Manhattan distance over the coordinate
//! axes rather than modular wraparound.

use fixedbitset::FixedBitSet;

use crate::model::{Job, NodeId};

use super::{JobTestMode, JobTestResult, Selector};

#[derive(Debug, Default)]
pub struct TorusSelector;

fn manhattan_distance(a: &[u32], b: &[u32]) -> u64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x as i64 - y as i64).unsigned_abs())
        .sum()
}

/// Index of the most significant axis on which `a` and `b` differ, so
/// that among equal-distance neighbours the one that moved along an
/// earlier (more significant) axis sorts first. `usize::MAX` if they
/// don't differ at all.
fn first_diff_axis(a: &[u32], b: &[u32]) -> usize {
    a.iter().zip(b.iter()).position(|(&x, &y)| x != y).unwrap_or(usize::MAX)
}

impl Selector for TorusSelector {
    fn job_test(
        &self,
        job: &Job,
        _mode: JobTestMode,
        candidate: &FixedBitSet,
        min_nodes: u32,
        max_nodes: u32,
        required_nodes: &[NodeId],
        cpu_count: &dyn Fn(NodeId) -> u32,
        coord: &dyn Fn(NodeId) -> Vec<u32>,
    ) -> JobTestResult {
        let candidates: Vec<NodeId> = candidate.ones().map(|b| b as NodeId).collect();
        if candidates.is_empty() {
            return JobTestResult::NoResources;
        }

        let focus = required_nodes.first().copied().unwrap_or(candidates[0]);
        let focus_coord = coord(focus);

        let mut ranked: Vec<(NodeId, u64, usize, bool)> = candidates
            .iter()
            .map(|&n| {
                let n_coord = coord(n);
                (
                    n,
                    manhattan_distance(&focus_coord, &n_coord),
                    first_diff_axis(&focus_coord, &n_coord),
                    required_nodes.contains(&n),
                )
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.3.cmp(&a.3) // required nodes first
                .then(a.1.cmp(&b.1)) // then increasing distance
                .then(a.2.cmp(&b.2)) // ties broken by most significant differing axis
                .then(a.0.cmp(&b.0)) // final tiebreak: node index
        });

        let mut chosen = Vec::new();
        let mut cpu_total = 0u32;
        for (node, _dist, _axis, is_required) in &ranked {
            if chosen.len() as u32 >= max_nodes {
                break;
            }
            if !is_required && cpu_total >= job.cpus_requested && chosen.len() as u32 >= min_nodes {
                break;
            }
            chosen.push(*node);
            cpu_total += cpu_count(*node);
        }

        if (chosen.len() as u32) < min_nodes || cpu_total < job.cpus_requested {
            return JobTestResult::NoResources;
        }

        let mut node_bitmap = FixedBitSet::with_capacity(candidate.len());
        let mut cpus_per_node = Vec::with_capacity(chosen.len());
        chosen.sort_unstable();
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

    /// 4x4x4x4x2 grid flattened row-major.
    fn coord_of(n: NodeId) -> Vec<u32> {
        let dims = [4u32, 4, 4, 4, 2];
        let mut idx = n;
        let mut c = vec![0u32; dims.len()];
        for i in (0..dims.len()).rev() {
            c[i] = idx % dims[i];
            idx /= dims[i];
        }
        c
    }

    fn node_index(c: [u32; 5]) -> NodeId {
        let dims = [4u32, 4, 4, 4, 2];
        let mut idx = 0u32;
        for i in 0..dims.len() {
            idx = idx * dims[i] + c[i];
        }
        idx
    }

    fn job(min_nodes: u32, max_nodes: u32, cpus: u32, required: Vec<NodeId>) -> Job {
        Job {
            id: 1,
            uid: 0,
            gid: 0,
            min_nodes,
            max_nodes,
            cpus_requested: cpus,
            memory: MemoryRequest::None,
            required_features: vec![],
            contiguous: false,
            time_limit_s: None,
            share: SharePreference::Shared,
            required_nodes: required,
            partition: 0,
            state: JobState::Pending,
            node_bitmap: FixedBitSet::with_capacity(512),
            cpus_per_node: vec![],
            mem_per_node: vec![],
            assoc_id: 0,
            contact: None,
            submit_time: 0,
            start_time: None,
            end_time: None,
        }
    }

    #[test]
    fn manhattan_distance_does_not_wrap() {
        // Opposite ends of a 4-wide axis: wrapped distance would be 1, but
        // non-wrapping distance is 3.
        assert_eq!(manhattan_distance(&[0], &[3]), 3);
    }

    #[test]
    fn picks_unit_axis_neighbours_around_required_node() {
        let selector = TorusSelector;
        let total_nodes = 4 * 4 * 4 * 4 * 2;
        let mut candidate = FixedBitSet::with_capacity(total_nodes);
        candidate.insert_range(0..total_nodes);

        let focus = node_index([0, 0, 0, 0, 0]);
        let j = job(4, 4, 4, vec![focus]);

        let result = selector.job_test(
            &j,
            JobTestMode::RunNow,
            &candidate,
            4,
            4,
            &[focus],
            &|_| 1,
            &coord_of,
        );

        match result {
            JobTestResult::Success { node_bitmap, .. } => {
                let chosen: Vec<usize> = node_bitmap.ones().collect();
                assert_eq!(chosen.len(), 4);
                assert!(chosen.contains(&(focus as usize)));
                let expected_neighbours = [
                    node_index([1, 0, 0, 0, 0]),
                    node_index([0, 1, 0, 0, 0]),
                    node_index([0, 0, 1, 0, 0]),
                ];
                for n in expected_neighbours {
                    assert!(chosen.contains(&(n as usize)), "expected neighbour {n} selected");
                }
            }
            other => panic!("expected success, got {other:?}"),
        }
    }
}
