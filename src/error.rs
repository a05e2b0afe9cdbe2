//! Structured error types shared across the controller.
//!
//! Mirrors the two-layer error design of a SPANK-style scheduler core: a
//! single top-level [`Error`] enum carrying one variant per named error
//! kind, plus [`AdmissionReason`] as a detail enum for per-node rejections
//! during selection. Every request-facing API in this crate returns
//! `Result<_, Error>` — there is no errno-style side channel.
//!
//! `anyhow` is reserved for the ambient edges (reading a config file,
//! writing a persistence snapshot) where the caller only needs "it
//! failed, here's why" rather than a kind the caller might match on.

use thiserror::Error;

/// Top-level controller error. One variant per error kind named in the
/// error handling design.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid time value: {0}")]
    InvalidTimeValue(String),

    #[error("invalid node name: {0}")]
    InvalidNodeName(String),

    #[error("invalid partition: {0}")]
    InvalidPartition(String),

    #[error("invalid account: {0}")]
    InvalidAccount(String),

    #[error("invalid user: {0}")]
    InvalidUser(String),

    #[error("reservation request is invalid: {0}")]
    ReservationInvalid(String),

    #[error("reservation name '{0}' already in use")]
    ReservationNameDup(String),

    #[error("{what} already exists")]
    AlreadyExists { what: String },

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("no resources available for job {job_id}: {reason}")]
    NoResources { job_id: u32, reason: String },

    #[error("{what} is already running")]
    AlreadyRunning { what: String },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("socket error: {0}")]
    SocketError(String),

    #[error("database connection error: {0}")]
    DbConnection(String),

    #[error("no change in data")]
    NoChangeInData,

    #[error("{what} has running jobs attached")]
    HasJobs { what: String },
}

impl Error {
    /// Construct [`Error::NotFound`] for `what`.
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound { what: what.into() }
    }
}

/// Result alias for controller-facing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Detailed reason a single node refused a job during admission control in
/// the [`crate::selector`] pre-filter. Carried inside
/// [`Error::NoResources`]-producing call sites as a log field and in
/// [`crate::selector::willrun`] retries; never surfaced as its own
/// `Error` variant since it is per-node, not per-request.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionReason {
    /// The node does not exist in the loaded cluster configuration.
    NodeNotFound { node: String },
    /// Adding the job's memory request would exceed the node's real memory.
    InsufficientMemory { required_mb: u64, available_mb: u64 },
    /// The node already has an incompatible exclusive job holder.
    ExclusiveConflict { holder_job_id: u32 },
    /// The partition's max-share (or the FORCE global cap) would be
    /// exceeded by admitting this job.
    ShareExceeded { running: u32, max_share: u32 },
    /// The node is covered by an active reservation the job is not
    /// authorised to use.
    ReservedByOther { reservation: String },
    /// The node is not in the UP state.
    NodeNotUp,
}

impl std::fmt::Display for AdmissionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionReason::NodeNotFound { node } => {
                write!(f, "node '{node}' not found")
            }
            AdmissionReason::InsufficientMemory {
                required_mb,
                available_mb,
            } => write!(
                f,
                "requires {required_mb}MB but node only has {available_mb}MB available"
            ),
            AdmissionReason::ExclusiveConflict { holder_job_id } => {
                write!(f, "node exclusively held by job {holder_job_id}")
            }
            AdmissionReason::ShareExceeded { running, max_share } => write!(
                f,
                "running job count {running} would exceed max-share {max_share}"
            ),
            AdmissionReason::ReservedByOther { reservation } => {
                write!(f, "node reserved by '{reservation}'")
            }
            AdmissionReason::NodeNotUp => write!(f, "node is not in the UP state"),
        }
    }
}
