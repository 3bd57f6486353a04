use crate::job::{JobId, JobState};
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {id} is {actual}, expected it to be active under the caller's lease")]
    WrongState { id: JobId, actual: JobState },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StorageError),
}

impl QueueError {
    /// Transient failures are worth retrying with backoff; the rest signal
    /// misuse or a lost race.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::StoreUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
