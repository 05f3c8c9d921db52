//! In-memory implementations of the store contracts, used by tests and
//! local development runs. Semantics mirror the SQLite store, including
//! the compare-and-set finalization.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use bridge_core::{BlobEntry, BlobStore, BridgeError, NewSegment, NewTask, Segment, SegmentPatch, SegmentStatus, Task, TaskPatch, TaskSegmentStore, TaskStatus};

#[derive(Default)]
struct MemoryInner {
	tasks: HashMap<String, Task>,
	segments: HashMap<String, Segment>,
}

#[derive(Default)]
pub struct MemoryStore {
	inner: RwLock<MemoryInner>,
}

impl MemoryStore {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}
}

fn apply_task_patch(task: &mut Task, patch: TaskPatch) {
	if let Some(v) = patch.total_segments {
		task.total_segments = Some(v);
	}
	if let Some(v) = patch.completed_segments {
		task.completed_segments = v;
	}
	if let Some(v) = patch.final_transcript {
		task.final_transcript = Some(v);
	}
	if let Some(v) = patch.error_message {
		task.error_message = Some(v);
	}
	if let Some(v) = patch.delivery_status {
		task.delivery_status = Some(v);
	}
	if let Some(v) = patch.delivery_attempts {
		task.delivery_attempts = Some(v);
	}
	if let Some(v) = patch.delivery_error {
		task.delivery_error = Some(v);
	}
	if let Some(v) = patch.completed_at {
		task.completed_at = Some(v);
	}
}

fn apply_segment_patch(segment: &mut Segment, patch: SegmentPatch) {
	if let Some(v) = patch.status {
		segment.status = v;
	}
	if let Some(v) = patch.transcript_text {
		segment.transcript_text = Some(v);
	}
	if let Some(v) = patch.language_code {
		segment.language_code = Some(v);
	}
	if let Some(v) = patch.provider_request_id {
		segment.provider_request_id = Some(v);
	}
	if let Some(v) = patch.error_message {
		segment.error_message = Some(v);
	}
	if let Some(v) = patch.completed_at {
		segment.completed_at = Some(v);
	}
	segment.updated_at = Utc::now();
}

#[async_trait]
impl TaskSegmentStore for MemoryStore {
	async fn create_task(&self, new: NewTask) -> Result<Task, BridgeError> {
		let task = Task {
			task_id: Uuid::new_v4().to_string(),
			client_callback_url: new.client_callback_url,
			original_filename: new.original_filename,
			status: TaskStatus::Processing,
			total_segments: None,
			completed_segments: 0,
			final_transcript: None,
			error_message: None,
			delivery_status: None,
			delivery_attempts: None,
			delivery_error: None,
			created_at: Utc::now(),
			completed_at: None,
		};

		self.inner.write().await.tasks.insert(task.task_id.clone(), task.clone());
		Ok(task)
	}

	async fn get_task(&self, task_id: &str) -> Result<Option<Task>, BridgeError> {
		Ok(self.inner.read().await.tasks.get(task_id).cloned())
	}

	async fn update_task(&self, task_id: &str, patch: TaskPatch) -> Result<Task, BridgeError> {
		let mut inner = self.inner.write().await;
		let task = inner.tasks.get_mut(task_id).ok_or_else(|| BridgeError::not_found(format!("task {task_id}")))?;
		apply_task_patch(task, patch);
		Ok(task.clone())
	}

	async fn finalize_task(&self, task_id: &str, status: TaskStatus, patch: TaskPatch) -> Result<Option<Task>, BridgeError> {
		let mut inner = self.inner.write().await;
		let task = inner.tasks.get_mut(task_id).ok_or_else(|| BridgeError::not_found(format!("task {task_id}")))?;

		if task.status != TaskStatus::Processing {
			return Ok(None);
		}

		task.status = status;
		apply_task_patch(task, patch);
		Ok(Some(task.clone()))
	}

	async fn create_segment(&self, new: NewSegment) -> Result<Segment, BridgeError> {
		if !new.is_valid() {
			return Err(BridgeError::validation(format!(
				"segment bounds invalid: start={} end={}",
				new.start_seconds, new.end_seconds
			)));
		}

		let now = Utc::now();
		let segment = Segment {
			segment_id: Uuid::new_v4().to_string(),
			task_id: new.task_id,
			blob_path: new.blob_path,
			start_seconds: new.start_seconds,
			end_seconds: new.end_seconds,
			status: SegmentStatus::Pending,
			transcript_text: None,
			language_code: None,
			provider_request_id: None,
			error_message: None,
			created_at: now,
			updated_at: now,
			completed_at: None,
		};

		self.inner.write().await.segments.insert(segment.segment_id.clone(), segment.clone());
		Ok(segment)
	}

	async fn get_segment(&self, segment_id: &str) -> Result<Option<Segment>, BridgeError> {
		Ok(self.inner.read().await.segments.get(segment_id).cloned())
	}

	async fn update_segment(&self, segment_id: &str, patch: SegmentPatch) -> Result<Segment, BridgeError> {
		let mut inner = self.inner.write().await;
		let segment = inner
			.segments
			.get_mut(segment_id)
			.ok_or_else(|| BridgeError::not_found(format!("segment {segment_id}")))?;
		apply_segment_patch(segment, patch);
		Ok(segment.clone())
	}

	async fn get_segments_by_task_id(&self, task_id: &str) -> Result<Vec<Segment>, BridgeError> {
		let inner = self.inner.read().await;
		let mut segments: Vec<Segment> = inner.segments.values().filter(|s| s.task_id == task_id).cloned().collect();
		segments.sort_by(|a, b| a.start_seconds.total_cmp(&b.start_seconds));
		Ok(segments)
	}

	async fn find_segment_by_provider_request_id(&self, request_id: &str) -> Result<Option<Segment>, BridgeError> {
		let inner = self.inner.read().await;
		Ok(inner.segments.values().find(|s| s.provider_request_id.as_deref() == Some(request_id)).cloned())
	}

	async fn increment_completed_segments(&self, task_id: &str) -> Result<Task, BridgeError> {
		let mut inner = self.inner.write().await;
		let task = inner.tasks.get_mut(task_id).ok_or_else(|| BridgeError::not_found(format!("task {task_id}")))?;
		task.completed_segments += 1;
		Ok(task.clone())
	}

	async fn list_pending_segments(&self) -> Result<Vec<Segment>, BridgeError> {
		let inner = self.inner.read().await;
		let mut segments: Vec<Segment> = inner.segments.values().filter(|s| s.status == SegmentStatus::Pending).cloned().collect();
		segments.sort_by(|a, b| a.task_id.cmp(&b.task_id).then(a.start_seconds.total_cmp(&b.start_seconds)));
		Ok(segments)
	}

	async fn count_tasks(&self, status: Option<TaskStatus>) -> Result<i64, BridgeError> {
		let inner = self.inner.read().await;
		let count = inner.tasks.values().filter(|t| status.map_or(true, |s| t.status == s)).count();
		Ok(count as i64)
	}
}

#[derive(Default)]
pub struct MemoryBlobStore {
	blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
	async fn upload(&self, path: &str, bytes: Vec<u8>, _content_type: &str) -> Result<(), BridgeError> {
		self.blobs.write().await.insert(path.to_owned(), bytes);
		Ok(())
	}

	async fn download(&self, path: &str) -> Result<Vec<u8>, BridgeError> {
		self
			.blobs
			.read()
			.await
			.get(path)
			.cloned()
			.ok_or_else(|| BridgeError::not_found(format!("blob {path}")))
	}

	async fn remove_many(&self, paths: &[String]) -> Result<(), BridgeError> {
		let mut blobs = self.blobs.write().await;
		for path in paths {
			blobs.remove(path);
		}
		Ok(())
	}

	async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>, BridgeError> {
		let blobs = self.blobs.read().await;
		let mut entries: Vec<BlobEntry> = blobs.keys().filter(|k| k.starts_with(prefix)).map(|k| BlobEntry { name: k.clone() }).collect();
		entries.sort_by(|a, b| a.name.cmp(&b.name));
		Ok(entries)
	}
}
