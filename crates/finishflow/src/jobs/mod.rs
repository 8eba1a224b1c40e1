pub mod error_codes;
pub mod handlers;
pub mod memory;
pub mod model;
pub mod payload;
pub mod pg;
pub mod retry;
pub mod runner;
pub mod store;
pub mod timeline;

pub use handlers::{build_registry, HandlerRegistry, JobContext, JobError};
pub use memory::MemoryJobStore;
pub use model::{Job, JobAttempt, JobStatus, NewJob};
pub use payload::{EmailJob, JobPayload, PayloadError};
pub use pg::PgJobStore;
pub use runner::{JobOutcome, JobRunner, RunnerConfig, SweepReport};
pub use store::{JobFilter, JobStore, StatusCounts};
