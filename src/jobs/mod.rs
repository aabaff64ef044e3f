//! Background job orchestration: registry, queue and workers.

pub mod runner;
pub mod store;

pub use runner::{start_queue, Task};
pub use store::{JobRecord, JobStatus, JobStore, Submission};
