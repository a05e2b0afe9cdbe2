//! Controller notifier: best-effort fan-out of lifecycle events to
//! registered client contacts.
//!
//! Dispatch happens off the caller's thread whenever a `tokio` runtime
//! is reachable, so notifying never holds up the scheduler lock the
//! caller is about to drop or has just dropped. Outside a runtime
//! (plain unit tests, for instance) it falls back to calling the
//! transport inline.

use std::sync::Arc;

use tracing::{debug, info};

use crate::model::{ClientContact, JobId, NodeId, Step, StepId};

/// Events the notifier pushes toward a registered client.
#[derive(Debug, Clone)]
pub enum Event {
    Allocated,
    PredictedTimeout { in_seconds: u64 },
    ImminentTimeout,
    Completed { exit_status: i32 },
    NodeFailure { node: NodeId },
}

/// Outbound transport for notifier fan-out. The crate ships only a
/// logging implementation since the wire transport is explicitly out of
/// scope; embedders supply their own.
pub trait NotifyTransport: std::fmt::Debug {
    fn notify(&self, contact: &ClientContact, job_id: JobId, step_id: Option<StepId>, event: &Event);
}

/// Logs every notification instead of sending it anywhere.
#[derive(Debug, Default)]
pub struct LoggingTransport;

impl NotifyTransport for LoggingTransport {
    fn notify(&self, contact: &ClientContact, job_id: JobId, step_id: Option<StepId>, event: &Event) {
        info!(
            host = %contact.host,
            port = contact.port,
            job_id,
            ?step_id,
            ?event,
            "notify"
        );
    }
}

/// Fans events out to registered contacts. Single attempt, no retries,
/// no backpressure — a dropped notification is never retried.
#[derive(Debug)]
pub struct Notifier {
    transport: Arc<dyn NotifyTransport + Send + Sync>,
}

impl Notifier {
    pub fn new(transport: Box<dyn NotifyTransport + Send + Sync>) -> Self {
        Self { transport: Arc::from(transport) }
    }

    /// Fire-and-forget: notify a job's own contact, if it registered
    /// one.
    pub fn notify_job(&self, job_id: JobId, contact: Option<&ClientContact>, event: Event) {
        let Some(contact) = contact else {
            debug!(job_id, "job has no registered contact, skipping notification");
            return;
        };
        self.dispatch(contact.clone(), job_id, None, event);
    }

    /// Walks `steps`, sending `event` to every step that registered a
    /// contact. When `event` is a node-failure event, only steps whose
    /// node set includes `failed_node` are notified.
    pub fn notify_steps(&self, job_id: JobId, steps: &[(Step, Option<ClientContact>)], event: Event) {
        for (step, contact) in steps {
            if let Event::NodeFailure { node } = &event {
                if !step.node_bitmap.contains(*node as usize) {
                    continue;
                }
            }
            let Some(contact) = contact else { continue };
            self.dispatch(contact.clone(), job_id, Some(step.id), event.clone());
        }
    }

    /// Sends on a `tokio` blocking task when a runtime is reachable from
    /// the caller's thread, otherwise calls the transport directly.
    fn dispatch(&self, contact: ClientContact, job_id: JobId, step_id: Option<StepId>, event: Event) {
        let transport = self.transport.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || transport.notify(&contact, job_id, step_id, &event));
            }
            Err(_) => transport.notify(&contact, job_id, step_id, &event),
        }
    }
}
