//! Contracts with the durable stores. The task/segment store exclusively
//! owns durable state; everything else in the system holds transient
//! handles that reconcile against it.

use async_trait::async_trait;

use crate::error::BridgeError;
use crate::models::{NewSegment, NewTask, Segment, SegmentPatch, Task, TaskPatch, TaskStatus};

#[async_trait]
pub trait TaskSegmentStore: Send + Sync {
	async fn create_task(&self, new: NewTask) -> Result<Task, BridgeError>;

	async fn get_task(&self, task_id: &str) -> Result<Option<Task>, BridgeError>;

	async fn update_task(&self, task_id: &str, patch: TaskPatch) -> Result<Task, BridgeError>;

	/// Compare-and-set terminal transition: applies `patch` and moves the
	/// task from `processing` to `status`. Returns `None` when the task was
	/// already terminal, which makes completion racing a no-op.
	async fn finalize_task(&self, task_id: &str, status: TaskStatus, patch: TaskPatch) -> Result<Option<Task>, BridgeError>;

	async fn create_segment(&self, new: NewSegment) -> Result<Segment, BridgeError>;

	async fn get_segment(&self, segment_id: &str) -> Result<Option<Segment>, BridgeError>;

	async fn update_segment(&self, segment_id: &str, patch: SegmentPatch) -> Result<Segment, BridgeError>;

	/// Segments for a task, ordered by `start_seconds` ascending.
	async fn get_segments_by_task_id(&self, task_id: &str) -> Result<Vec<Segment>, BridgeError>;

	async fn find_segment_by_provider_request_id(&self, request_id: &str) -> Result<Option<Segment>, BridgeError>;

	/// Conditional SQL-expression increment; never read-then-write.
	async fn increment_completed_segments(&self, task_id: &str) -> Result<Task, BridgeError>;

	/// Store-`pending` segments across all tasks, used by queue reconciliation.
	async fn list_pending_segments(&self) -> Result<Vec<Segment>, BridgeError>;

	async fn count_tasks(&self, status: Option<TaskStatus>) -> Result<i64, BridgeError>;
}

#[derive(Debug, Clone)]
pub struct BlobEntry {
	pub name: String,
}

/// Binary payload storage. Paths are organized as `uploads/<task>/…`,
/// `converted/<task>/…`, and `segments/<task>/segment_<k>.mp3`.
#[async_trait]
pub trait BlobStore: Send + Sync {
	async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), BridgeError>;

	async fn download(&self, path: &str) -> Result<Vec<u8>, BridgeError>;

	async fn remove_many(&self, paths: &[String]) -> Result<(), BridgeError>;

	async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>, BridgeError>;
}
