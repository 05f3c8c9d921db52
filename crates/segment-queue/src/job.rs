use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Transient scheduling handle for one segment. The durable Segment row
/// is the source of truth; a Job never outlives a disagreement with it.
#[derive(Debug, Clone)]
pub struct Job {
	pub job_id: Uuid,
	pub segment_id: String,
	pub task_id: String,
	pub blob_path: String,
	/// Higher dispatches sooner.
	pub priority: i64,
	pub attempts: u32,
	pub max_attempts: u32,
	pub status: JobStatus,
	pub scheduled_at: DateTime<Utc>,
	pub created_at: DateTime<Utc>,
	pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
	Pending,
	Processing,
	Completed,
	Failed,
	Retrying,
}

impl JobStatus {
	#[must_use]
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::Completed | Self::Failed)
	}
}

impl Job {
	#[must_use]
	pub fn new(segment_id: String, task_id: String, blob_path: String, priority: i64, max_attempts: u32) -> Self {
		let now = Utc::now();
		Self {
			job_id: Uuid::new_v4(),
			segment_id,
			task_id,
			blob_path,
			priority,
			attempts: 0,
			max_attempts,
			status: JobStatus::Pending,
			scheduled_at: now,
			created_at: now,
			last_error: None,
		}
	}
}
