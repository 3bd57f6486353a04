mod api;
pub mod clock;
pub mod config;
mod dashboard;
pub mod dispatcher;
pub mod engine;
pub mod error;
mod inspect;
pub mod job;
mod jobqueue;
pub mod retry;
pub mod scheduler;
pub mod storage;
pub mod telemetry;
pub mod worker;

pub use api::{SubmitJobRequest, SubmitJobResponse};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, QueueConfig};
pub use dispatcher::{DispatchError, Dispatcher, HttpDispatcher};
pub use engine::{FailOutcome, QueueEngine};
pub use error::QueueError;
pub use inspect::Inspector;
pub use job::{ClaimedJob, Job, JobId, JobState, Lease, NewJob, QueueStats};
pub use jobqueue::{JobQueue, StartupError};
pub use retry::RetryPolicy;
pub use storage::{SqliteStorage, Storage, StorageError};
