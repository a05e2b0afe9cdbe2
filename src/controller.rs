//! Composition root: wires the cluster inventory, association tree,
//! accounting map, reservation manager, selector, plugin stack, and
//! notifier behind a single lock, and drives the job/step lifecycle
//! over them.
//!
//! The scheduler itself is synchronous and single-threaded behind
//! [`ControllerState`]'s mutex. Notification fan-out ([`Notifier`])
//! runs on `tokio` blocking tasks over data cloned out from under the
//! lock, so the lock is never held across an `.await`.

use std::collections::HashMap;
use std::sync::Mutex;

use fixedbitset::FixedBitSet;
use tracing::{info, instrument, warn};

use crate::accounting::AccountingMap;
use crate::assoc::{AssocId, AssociationTree};
use crate::checkpoint::{self, CheckpointEvent, CheckpointOp};
use crate::config::ClusterConfig;
use crate::error::{Error, Result};
use crate::lifecycle;
use crate::model::{
    ClientContact, Job, JobId, JobState, MemoryRequest, NodeId, PartitionId, SharePreference, Step, StepId,
};
use crate::notifier::{Event, Notifier};
use crate::plugin::PluginStack;
use crate::reservation::ReservationManager;
use crate::selector::{prefilter, AnySelector, JobTestMode, JobTestResult, Selector};

/// Parameters for a new job submission; resolved into a [`Job`] in the
/// `Pending` state.
#[derive(Debug, Clone)]
pub struct JobSubmission {
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
    pub required_nodes: Vec<NodeId>,
    pub partition: PartitionId,
    pub assoc_id: AssocId,
    pub contact: Option<ClientContact>,
}

struct ControllerState {
    cluster: ClusterConfig,
    assoc: AssociationTree,
    accounting: AccountingMap,
    reservations: ReservationManager,
    selector: AnySelector,
    plugins: PluginStack,
    jobs: HashMap<JobId, Job>,
    steps: HashMap<StepId, Step>,
    next_job_id: JobId,
    next_step_id: StepId,
}

/// The controller: every mutation goes through `state`'s lock, held for
/// the shortest span that keeps a single scheduling decision atomic.
pub struct Controller {
    state: Mutex<ControllerState>,
    notifier: Notifier,
}

impl Controller {
    pub fn new(cluster: ClusterConfig, selector: AnySelector, notifier: Notifier) -> Self {
        let accounting = AccountingMap::new(cluster.nodes());
        Self {
            state: Mutex::new(ControllerState {
                cluster,
                assoc: AssociationTree::new(),
                accounting,
                reservations: ReservationManager::new(),
                selector,
                plugins: PluginStack::new(),
                jobs: HashMap::new(),
                steps: HashMap::new(),
                next_job_id: 1,
                next_step_id: 1,
            }),
            notifier,
        }
    }

    /// Registers a plugin provider before the controller begins serving
    /// requests. Not exposed after startup: the hook stack is fixed for
    /// the daemon's lifetime, like the selector.
    pub fn register_plugin(&self, provider: Box<dyn crate::plugin::HookProvider>, required: bool) {
        self.state.lock().unwrap().plugins.register(provider, required);
    }

    #[instrument(skip(self, req))]
    pub fn submit_job(&self, req: JobSubmission, now: u64) -> Result<JobId> {
        let mut state = self.state.lock().unwrap();
        if state.cluster.partition(req.partition).is_none() {
            return Err(Error::InvalidPartition(req.partition.to_string()));
        }
        let id = state.next_job_id;
        state.next_job_id += 1;
        let node_bits = state.cluster.node_count();
        let job = Job {
            id,
            uid: req.uid,
            gid: req.gid,
            min_nodes: req.min_nodes,
            max_nodes: req.max_nodes,
            cpus_requested: req.cpus_requested,
            memory: req.memory,
            required_features: req.required_features,
            contiguous: req.contiguous,
            time_limit_s: req.time_limit_s,
            share: req.share,
            required_nodes: req.required_nodes,
            partition: req.partition,
            state: JobState::Pending,
            node_bitmap: FixedBitSet::with_capacity(node_bits),
            cpus_per_node: Vec::new(),
            mem_per_node: Vec::new(),
            assoc_id: req.assoc_id,
            contact: req.contact,
            submit_time: now,
            start_time: None,
            end_time: None,
        };
        info!(job_id = id, partition = req.partition, "job submitted");
        state.jobs.insert(id, job);
        Ok(id)
    }

    /// Attempts to place and start `job_id` right now. On success the
    /// job transitions PENDING → RUNNING and the accounting map is
    /// debited; on `NoResources` the job stays PENDING.
    #[instrument(skip(self))]
    pub fn try_schedule_now(&self, job_id: JobId, now: u64) -> Result<JobTestResult> {
        let mut state = self.state.lock().unwrap();
        let result = Self::run_job_test(&mut state, job_id, JobTestMode::RunNow, now)?;
        if let JobTestResult::Success { ref node_bitmap, ref cpus_per_node } = result {
            let node_bitmap = node_bitmap.clone();
            let cpus_per_node = cpus_per_node.clone();
            let mem_per_node = Self::resolve_mem_per_node(&state, job_id, &node_bitmap)?;

            let partition_id;
            {
                let job = state.jobs.get_mut(&job_id).unwrap();
                job.node_bitmap = node_bitmap;
                job.cpus_per_node = cpus_per_node;
                job.mem_per_node = mem_per_node;
                partition_id = job.partition;
            }
            let partition = state
                .cluster
                .partition(partition_id)
                .ok_or_else(|| Error::InvalidPartition(partition_id.to_string()))?
                .clone();
            let job = state.jobs.get_mut(&job_id).unwrap();
            match lifecycle::begin(job, &partition, &state.selector, &mut state.accounting, now) {
                Ok(()) => {
                    let contact = job.contact.clone();
                    drop(state);
                    self.notifier.notify_job(job_id, contact.as_ref(), Event::Allocated);
                }
                Err(e) => {
                    warn!(job_id, error = %e, "placement refused at begin, retracting");
                    lifecycle::retract_placement(job);
                    return Err(e);
                }
            }
        }
        Ok(result)
    }

    /// Answers "could this job ever run, and when" without mutating any
    /// state.
    #[instrument(skip(self))]
    pub fn will_run(&self, job_id: JobId, now: u64) -> Result<JobTestResult> {
        let mut state = self.state.lock().unwrap();
        let (candidate, partition, min_nodes, max_nodes, required_nodes) = Self::prepare_candidate(&state, job_id, now, JobTestMode::WillRun)?;

        let running: Vec<crate::selector::willrun::RunningJob> = state
            .jobs
            .values()
            .filter(|j| j.state == JobState::Running)
            .map(|j| crate::selector::willrun::RunningJob {
                job: j,
                partition_id: j.partition,
                end_time: j.start_time.unwrap_or(now) + j.time_limit_s.unwrap_or(3600),
            })
            .collect();

        let job = state.jobs.get(&job_id).ok_or_else(|| Error::not_found(format!("job {job_id}")))?;
        let cluster = &state.cluster;
        let cpu_count = |nid: NodeId| cluster.node(nid).map(|n| n.cpu_count()).unwrap_or(0);
        let coord = |nid: NodeId| cluster.node_coord(nid).to_vec();

        let result = crate::selector::willrun::predict(
            &state.selector,
            job,
            &candidate,
            &partition,
            &state.accounting,
            running,
            min_nodes,
            max_nodes,
            &required_nodes,
            &cpu_count,
            &coord,
            now,
        );
        Ok(result)
    }

    pub fn suspend_job(&self, job_id: JobId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let ControllerState { jobs, selector, accounting, .. } = &mut *state;
        let job = jobs.get_mut(&job_id).ok_or_else(|| Error::not_found(format!("job {job_id}")))?;
        let partition_id = job.partition;
        lifecycle::suspend(job, partition_id, &*selector, accounting)
    }

    pub fn resume_job(&self, job_id: JobId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let partition_id = state.jobs.get(&job_id).ok_or_else(|| Error::not_found(format!("job {job_id}")))?.partition;
        let partition = state
            .cluster
            .partition(partition_id)
            .ok_or_else(|| Error::InvalidPartition(partition_id.to_string()))?
            .clone();
        let ControllerState { jobs, selector, accounting, .. } = &mut *state;
        let job = jobs.get_mut(&job_id).unwrap();
        lifecycle::resume(job, &partition, &*selector, accounting)
    }

    pub fn complete_job(&self, job_id: JobId, final_state: JobState, now: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let partition_id = state.jobs.get(&job_id).ok_or_else(|| Error::not_found(format!("job {job_id}")))?.partition;
        let mut step_ids: Vec<StepId> = state.steps.values().filter(|s| s.job_id == job_id).map(|s| s.id).collect();
        step_ids.sort_unstable();
        let mut steps: Vec<Step> = step_ids.iter().filter_map(|id| state.steps.remove(id)).collect();

        let ControllerState { jobs, selector, accounting, .. } = &mut *state;
        let job = jobs.get_mut(&job_id).unwrap();
        lifecycle::complete(job, &mut steps, partition_id, &*selector, accounting, final_state, now)?;
        let contact = job.contact.clone();
        let exit_status = 0;
        for step in steps {
            state.steps.insert(step.id, step);
        }
        drop(state);
        self.notifier.notify_job(job_id, contact.as_ref(), Event::Completed { exit_status });
        Ok(())
    }

    pub fn begin_step(&self, job_id: JobId, node_bitmap: FixedBitSet, tasks_per_node: Vec<u32>, mem_per_task_mb: u64, now: u64) -> Result<StepId> {
        let mut state = self.state.lock().unwrap();
        if !state.jobs.contains_key(&job_id) {
            return Err(Error::not_found(format!("job {job_id}")));
        }
        let id = state.next_step_id;
        state.next_step_id += 1;
        let mut step = Step {
            id,
            job_id,
            node_bitmap,
            tasks_per_node,
            mem_per_task_mb,
            start_time: None,
            end_time: None,
            exit_status: None,
            checkpoint: crate::model::CheckpointMeta::default(),
        };
        lifecycle::step_begin(&mut step, &state.selector, &mut state.accounting, now);
        state.steps.insert(id, step);
        Ok(id)
    }

    pub fn finish_step(&self, step_id: StepId, exit_status: i32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let ControllerState { steps, selector, accounting, .. } = &mut *state;
        let step = steps.get_mut(&step_id).ok_or_else(|| Error::not_found(format!("step {step_id}")))?;
        lifecycle::step_fini(step, &*selector, accounting);
        step.exit_status = Some(exit_status);
        Ok(())
    }

    pub fn checkpoint_step(&self, step_id: StepId, op: CheckpointOp, now: u64) -> Result<CheckpointEvent> {
        let mut state = self.state.lock().unwrap();
        let step = state.steps.get_mut(&step_id).ok_or_else(|| Error::not_found(format!("step {step_id}")))?;
        checkpoint::apply(&mut step.checkpoint, op, now)
    }

    pub fn dump_reservations(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let state = self.state.lock().unwrap();
        let all: Vec<_> = state.reservations.list().cloned().collect();
        crate::reservation::persistence::dump_state(path, &all, &state.cluster)
    }

    pub fn load_reservations(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        let loaded = crate::reservation::persistence::load_state(path, &state.cluster)?;
        for resv in loaded {
            state.reservations.restore(resv);
        }
        Ok(())
    }

    fn resolve_mem_per_node(state: &ControllerState, job_id: JobId, node_bitmap: &FixedBitSet) -> Result<Vec<u64>> {
        let job = state.jobs.get(&job_id).ok_or_else(|| Error::not_found(format!("job {job_id}")))?;
        let per_node: Vec<u64> = node_bitmap
            .ones()
            .map(|nid| match job.memory {
                MemoryRequest::PerNode(m) => m,
                MemoryRequest::PerTask(m) => {
                    let cpus = state.cluster.node(nid as NodeId).map(|n| n.cpu_count()).unwrap_or(1);
                    m.saturating_mul(cpus as u64)
                }
                MemoryRequest::None => 0,
            })
            .collect();
        Ok(per_node)
    }

    fn prepare_candidate(
        state: &ControllerState,
        job_id: JobId,
        now: u64,
        mode: JobTestMode,
    ) -> Result<(FixedBitSet, crate::model::Partition, u32, u32, Vec<NodeId>)> {
        let job = state.jobs.get(&job_id).ok_or_else(|| Error::not_found(format!("job {job_id}")))?;
        let partition = state
            .cluster
            .partition(job.partition)
            .ok_or_else(|| Error::InvalidPartition(job.partition.to_string()))?
            .clone();

        let (account, user) = Self::account_user_of(state, job.assoc_id);

        let mut candidate = partition.nodes.clone();
        for nid in partition.nodes.ones() {
            let node_up = state.cluster.node(nid as NodeId).map(|n| n.state.is_schedulable()).unwrap_or(false);
            if !node_up {
                candidate.set(nid, false);
                continue;
            }
            let reserved_against = state
                .reservations
                .covering(nid, state.cluster.node_count(), now)
                .any(|r| !r.permits(&account, &user));
            if reserved_against {
                candidate.set(nid, false);
            }
        }

        let filtered = prefilter(&candidate, job, &partition, &state.accounting, mode, &|nid| {
            state.cluster.node(nid).map(|n| n.cpu_count()).unwrap_or(0)
        });

        Ok((filtered, partition, job.min_nodes, job.max_nodes, job.required_nodes.clone()))
    }

    fn account_user_of(state: &ControllerState, assoc_id: AssocId) -> (String, String) {
        match state.assoc.get(assoc_id) {
            Some(a) => (a.account.clone(), a.user.clone().unwrap_or_default()),
            None => (String::new(), String::new()),
        }
    }

    fn run_job_test(state: &mut ControllerState, job_id: JobId, mode: JobTestMode, now: u64) -> Result<JobTestResult> {
        let (candidate, _partition, min_nodes, max_nodes, required_nodes) = Self::prepare_candidate(state, job_id, now, mode)?;
        let job = state.jobs.get(&job_id).ok_or_else(|| Error::not_found(format!("job {job_id}")))?;
        let cluster = &state.cluster;
        let cpu_count = |nid: NodeId| cluster.node(nid).map(|n| n.cpu_count()).unwrap_or(0);
        let coord = |nid: NodeId| cluster.node_coord(nid).to_vec();
        let result = state.selector.job_test(job, mode, &candidate, min_nodes, max_nodes, &required_nodes, &cpu_count, &coord);
        Ok(result)
    }
}
