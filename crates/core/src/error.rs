use thiserror::Error;

use crate::types::TaskId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedError {
    #[error("admission rejected: utilization {utilization:.3} exceeds bound {bound:.3}")]
    RejectedByAdmission { utilization: f64, bound: f64 },

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task already registered: {0}")]
    AlreadyRegistered(TaskId),

    #[error("task registry full ({capacity} tasks)")]
    ResourceExhausted { capacity: usize },

    #[error("invalid task parameters: {0}")]
    InvalidParameters(String),

    #[error("scheduler is shut down")]
    Shutdown,

    #[error("runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, SchedError>;
