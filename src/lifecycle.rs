//! Job/step lifecycle state machine.
//!
//! ```text
//! PENDING ─ schedule ─► RUNNING ─ complete ─► COMPLETING ─► COMPLETE|FAILED|CANCELLED|TIMEOUT
//!                         │  ▲
//!                     suspend resume
//!                         ▼  │
//!                      SUSPENDED
//! ```

use tracing::{info, warn};

use crate::accounting::AccountingMap;
use crate::error::{Error, Result};
use crate::model::{Job, JobState, Partition, Step};
use crate::selector::Selector;

/// Moves `job` from PENDING to RUNNING: debits the map, stamps start
/// time. The caller is expected to have already set `job.node_bitmap`
/// etc. from a successful `job_test`.
pub fn begin(
    job: &mut Job,
    partition: &Partition,
    selector: &dyn Selector,
    accounting: &mut AccountingMap,
    now: u64,
) -> Result<()> {
    if job.state != JobState::Pending {
        return Err(Error::AlreadyRunning {
            what: format!("job {}", job.id),
        });
    }
    selector.job_begin(job, partition, accounting)?;
    job.state = JobState::Running;
    job.start_time = Some(now);
    info!(job_id = job.id, "job began running");
    Ok(())
}

/// A placement made by `job_test` but refused at `begin` time (race
/// with a reservation or a node going down) must return cleanly to
/// PENDING with no partial debit — since `selector.job_begin` never ran,
/// there is nothing to undo here; this exists to make that guarantee
/// explicit at the call site.
pub fn retract_placement(job: &mut Job) {
    job.node_bitmap.clear();
    job.cpus_per_node.clear();
    job.mem_per_node.clear();
    job.state = JobState::Pending;
}

pub fn suspend(job: &mut Job, partition_id: crate::model::PartitionId, selector: &dyn Selector, accounting: &mut AccountingMap) -> Result<()> {
    if job.state != JobState::Running {
        return Err(Error::ReservationInvalid(format!(
            "job {} is not running, cannot suspend",
            job.id
        )));
    }
    selector.job_suspend(job, partition_id, accounting);
    job.state = JobState::Suspended;
    info!(job_id = job.id, "job suspended");
    Ok(())
}

/// Re-adds running count, refusing to proceed (leaving the job
/// SUSPENDED) if the node's running count would exceed its partition's
/// max-share.
pub fn resume(job: &mut Job, partition: &Partition, selector: &dyn Selector, accounting: &mut AccountingMap) -> Result<()> {
    if job.state != JobState::Suspended {
        return Err(Error::ReservationInvalid(format!(
            "job {} is not suspended, cannot resume",
            job.id
        )));
    }
    selector.job_resume(job, partition, accounting)?;
    job.state = JobState::Running;
    info!(job_id = job.id, "job resumed");
    Ok(())
}

/// Completes `job`: every step is finished first, then the map is
/// credited fully.
pub fn complete(
    job: &mut Job,
    steps: &mut [Step],
    partition_id: crate::model::PartitionId,
    selector: &dyn Selector,
    accounting: &mut AccountingMap,
    final_state: JobState,
    now: u64,
) -> Result<()> {
    if !matches!(final_state, JobState::Complete | JobState::Failed | JobState::Cancelled | JobState::Timeout) {
        return Err(Error::UnexpectedMessage(format!(
            "{final_state:?} is not a terminal job state"
        )));
    }
    job.state = JobState::Completing;
    for step in steps.iter_mut() {
        if step.end_time.is_none() {
            step_fini(step, selector, accounting);
        }
    }
    selector.job_fini(job, partition_id, accounting);
    job.state = final_state;
    job.end_time = Some(now);
    info!(job_id = job.id, state = ?final_state, "job completed");
    Ok(())
}

pub fn step_begin(step: &mut Step, selector: &dyn Selector, accounting: &mut AccountingMap, now: u64) {
    selector.step_begin(step, accounting);
    step.start_time = Some(now);
}

pub fn step_fini(step: &mut Step, selector: &dyn Selector, accounting: &mut AccountingMap) {
    if step.end_time.is_some() {
        warn!(step_id = step.id, "step_fini called twice, ignoring");
        return;
    }
    selector.step_fini(step, accounting);
    step.end_time = Some(step.start_time.unwrap_or(0));
}
