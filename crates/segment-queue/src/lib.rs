//! Bounded-concurrency scheduling of segment transcription jobs.

pub mod config;
pub mod job;
pub mod queue;

pub use config::{retry_delay_ms, QueueConfig, QueueConfigPatch};
pub use job::{Job, JobStatus};
pub use queue::{PumpOutcome, QueueStats, SegmentQueue};
