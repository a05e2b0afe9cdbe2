//! Step checkpoint operation surface.
//!
//! Plugin-dispatched checkpoint backends are collapsed to a plain state
//! machine over [`CheckpointMeta`]: there is exactly one checkpoint
//! backend in this crate (filesystem-based), so a dispatch table has no
//! reason to exist here.

use std::path::PathBuf;

use tracing::info;

use crate::error::{Error, Result};
use crate::model::{CheckpointMeta, StepId};

/// A checkpoint operation requested against a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointOp {
    Able,
    Disable,
    Enable,
    Create,
    Vacate,
    Restart,
    Error,
}

/// Result of a successful checkpoint operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointEvent {
    pub op: CheckpointOp,
    pub event_time: u64,
}

/// Assembles the on-disk checkpoint path for one task of one step:
/// `<base_dir>/<job_id>.<step_id>/<program>.<proc_id>.ckpt`.
///
/// A pure function rather than an environment reader —
/// the caller resolves `CHECKPOINT_PATH`/`JOBID`/`STEPID`/`PROCID` and
/// passes them in, so this is testable without an environment.
pub fn ckpt_path(base_dir: &str, job_id: u32, step_id: StepId, program: &str, proc_id: u32) -> PathBuf {
    PathBuf::from(base_dir)
        .join(format!("{job_id}.{step_id}"))
        .join(format!("{program}.{proc_id}.ckpt"))
}

/// Applies `op` to `meta`, returning the resulting event. `now` is the
/// caller-supplied event timestamp (unix seconds).
pub fn apply(meta: &mut CheckpointMeta, op: CheckpointOp, now: u64) -> Result<CheckpointEvent> {
    match op {
        CheckpointOp::Able => {
            if !meta.enabled {
                return Err(Error::ReservationInvalid("checkpointing is disabled for this step".into()));
            }
        }
        CheckpointOp::Disable => {
            meta.enabled = false;
        }
        CheckpointOp::Enable => {
            meta.enabled = true;
        }
        CheckpointOp::Create | CheckpointOp::Vacate => {
            if !meta.enabled {
                return Err(Error::ReservationInvalid("checkpointing is disabled for this step".into()));
            }
            meta.last_event_time = Some(now);
            meta.error = None;
        }
        CheckpointOp::Restart => {
            if meta.last_event_time.is_none() {
                return Err(Error::not_found("no prior checkpoint to restart from"));
            }
        }
        CheckpointOp::Error => {
            if let Some((code, msg)) = &meta.error {
                info!(code, msg = %msg, "checkpoint error queried");
            }
        }
    }
    Ok(CheckpointEvent { op, event_time: now })
}

/// Records a checkpoint failure reported by a task (the `ckpt_comp`
/// completion callback in the original).
pub fn record_error(meta: &mut CheckpointMeta, error_code: i32, error_msg: String, now: u64) {
    meta.last_event_time = Some(now);
    meta.error = Some((error_code, error_msg));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ckpt_path_joins_job_step_program_and_proc() {
        let path = ckpt_path("/var/ckpt", 42, 3, "app", 7);
        assert_eq!(path, PathBuf::from("/var/ckpt/42.3/app.7.ckpt"));
    }

    #[test]
    fn create_requires_checkpointing_enabled() {
        let mut meta = CheckpointMeta::default();
        assert!(apply(&mut meta, CheckpointOp::Create, 100).is_err());
        apply(&mut meta, CheckpointOp::Enable, 100).unwrap();
        let event = apply(&mut meta, CheckpointOp::Create, 200).unwrap();
        assert_eq!(event.event_time, 200);
        assert_eq!(meta.last_event_time, Some(200));
    }

    #[test]
    fn restart_requires_a_prior_checkpoint() {
        let mut meta = CheckpointMeta::default();
        assert!(apply(&mut meta, CheckpointOp::Restart, 100).is_err());
        meta.last_event_time = Some(50);
        assert!(apply(&mut meta, CheckpointOp::Restart, 100).is_ok());
    }

    #[test]
    fn record_error_is_visible_to_error_op() {
        let mut meta = CheckpointMeta::default();
        record_error(&mut meta, 5, "disk full".into(), 300);
        assert_eq!(meta.error, Some((5, "disk full".to_string())));
        apply(&mut meta, CheckpointOp::Error, 301).unwrap();
    }
}
