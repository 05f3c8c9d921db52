//! Decides, after every terminal segment transition, whether the owning
//! task is finished, and drives assembly plus client notification when
//! it is.
//!
//! Multiple provider callbacks for one task can race into this code; the
//! store's compare-and-set finalization makes the terminal transition
//! (and therefore the delivery) happen exactly once.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::assembler::{self, AssembledTranscript};
use crate::error::BridgeError;
use crate::models::{SegmentStatus, Task, TaskPatch, TaskStatus};
use crate::store::TaskSegmentStore;

/// What to do when a task finishes with failed segments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompletionPolicy {
	/// Any failed segment fails the task.
	#[default]
	Strict,
	/// Assemble from the completed segments alone.
	Lenient,
}

/// Outbound notification seam; implemented by the webhook delivery
/// service. Notification failures never alter a task's terminal status.
#[async_trait]
pub trait ResultNotifier: Send + Sync {
	async fn notify_success(&self, task: &Task, transcript: &AssembledTranscript) -> Result<(), BridgeError>;

	async fn notify_failure(&self, task: &Task, error_message: &str) -> Result<(), BridgeError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
	/// Segments still in flight.
	Pending { completed: i64, failed: i64, total: i64 },
	/// Another caller already finalized the task.
	AlreadyTerminal,
	Completed,
	Failed { failed_segments: i64 },
}

pub struct CompletionCoordinator {
	store: Arc<dyn TaskSegmentStore>,
	notifier: Arc<dyn ResultNotifier>,
	policy: CompletionPolicy,
}

impl CompletionCoordinator {
	pub fn new(store: Arc<dyn TaskSegmentStore>, notifier: Arc<dyn ResultNotifier>, policy: CompletionPolicy) -> Self {
		Self { store, notifier, policy }
	}

	/// Re-check a task after one of its segments reached a terminal state.
	///
	/// Idempotent: calling this on an already-terminal task is a no-op and
	/// at most one delivery is enqueued per task.
	///
	/// # Errors
	/// Returns an error when the task is unknown or the store fails.
	pub async fn check_task_completion(&self, task_id: &str) -> Result<CompletionOutcome, BridgeError> {
		let Some(task) = self.store.get_task(task_id).await? else {
			return Err(BridgeError::not_found(format!("task {task_id}")));
		};

		if task.status.is_terminal() {
			debug!(task_id, status = %task.status, "task already terminal, skipping completion check");
			return Ok(CompletionOutcome::AlreadyTerminal);
		}

		let segments = self.store.get_segments_by_task_id(task_id).await?;
		let completed = segments.iter().filter(|s| s.status == SegmentStatus::Completed).count() as i64;
		let failed = segments.iter().filter(|s| s.status == SegmentStatus::Failed).count() as i64;
		let total = task.total_segments.unwrap_or(segments.len() as i64);

		self.store
			.update_task(
				task_id,
				TaskPatch {
					completed_segments: Some(completed),
					..TaskPatch::default()
				},
			)
			.await?;

		// A task the splitter has not populated yet can never be terminal.
		if total == 0 || completed + failed < total {
			debug!(task_id, completed, failed, total, "task not yet complete");
			return Ok(CompletionOutcome::Pending { completed, failed, total });
		}

		if failed == 0 || (self.policy == CompletionPolicy::Lenient && completed > 0) {
			self.complete_task(&task, &segments, failed).await
		} else {
			self.fail_task(&task, failed).await
		}
	}

	async fn complete_task(&self, task: &Task, segments: &[crate::models::Segment], failed: i64) -> Result<CompletionOutcome, BridgeError> {
		let transcript = match assembler::assemble(segments) {
			Ok(t) => t,
			// All terminal but nothing usable to assemble; the task cannot succeed.
			Err(e) => return self.fail_with_message(task, failed, &e.to_string()).await,
		};

		let patch = TaskPatch {
			final_transcript: Some(transcript.text.clone()),
			completed_at: Some(Utc::now()),
			..TaskPatch::default()
		};

		let Some(finalized) = self.store.finalize_task(&task.task_id, TaskStatus::Completed, patch).await? else {
			return Ok(CompletionOutcome::AlreadyTerminal);
		};

		info!(
			task_id = %task.task_id,
			segments = segments.len(),
			failed_segments = failed,
			transcript_chars = transcript.text.len(),
			"task completed"
		);

		if let Err(e) = self.notifier.notify_success(&finalized, &transcript).await {
			warn!(task_id = %task.task_id, error = %e, "result delivery failed; task remains completed");
		}

		Ok(CompletionOutcome::Completed)
	}

	async fn fail_task(&self, task: &Task, failed: i64) -> Result<CompletionOutcome, BridgeError> {
		let message = format!("{failed} segments failed to process");
		self.fail_with_message(task, failed, &message).await
	}

	async fn fail_with_message(&self, task: &Task, failed: i64, message: &str) -> Result<CompletionOutcome, BridgeError> {
		let patch = TaskPatch {
			error_message: Some(message.to_owned()),
			completed_at: Some(Utc::now()),
			..TaskPatch::default()
		};

		let Some(finalized) = self.store.finalize_task(&task.task_id, TaskStatus::Failed, patch).await? else {
			return Ok(CompletionOutcome::AlreadyTerminal);
		};

		info!(task_id = %task.task_id, failed_segments = failed, error = message, "task failed");

		if let Err(e) = self.notifier.notify_failure(&finalized, message).await {
			warn!(task_id = %task.task_id, error = %e, "failure delivery failed; task remains failed");
		}

		Ok(CompletionOutcome::Failed { failed_segments: failed })
	}
}
