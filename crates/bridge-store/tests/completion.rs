//! Completion coordination driven against the real SQLite store.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;

use bridge_core::{
	AssembledTranscript, BridgeError, CompletionCoordinator, CompletionOutcome, CompletionPolicy, NewSegment, NewTask, ResultNotifier, SegmentPatch, SegmentStatus,
	Task, TaskPatch, TaskSegmentStore, TaskStatus,
};
use bridge_store::SqliteBridgeStore;

#[derive(Debug, Clone, PartialEq)]
enum Notification {
	Success { task_id: String, text: String },
	Failure { task_id: String, error: String },
}

#[derive(Default)]
struct RecordingNotifier {
	notifications: Mutex<Vec<Notification>>,
}

#[async_trait]
impl ResultNotifier for RecordingNotifier {
	async fn notify_success(&self, task: &Task, transcript: &AssembledTranscript) -> Result<(), BridgeError> {
		self.notifications.lock().await.push(Notification::Success {
			task_id: task.task_id.clone(),
			text: transcript.text.clone(),
		});
		Ok(())
	}

	async fn notify_failure(&self, task: &Task, error_message: &str) -> Result<(), BridgeError> {
		self.notifications.lock().await.push(Notification::Failure {
			task_id: task.task_id.clone(),
			error: error_message.to_owned(),
		});
		Ok(())
	}
}

struct Fixture {
	store: Arc<SqliteBridgeStore>,
	notifier: Arc<RecordingNotifier>,
	coordinator: CompletionCoordinator,
	task: Task,
	segment_ids: Vec<String>,
}

async fn fixture(segment_count: u32, policy: CompletionPolicy) -> Fixture {
	let store = Arc::new(SqliteBridgeStore::in_memory().await.unwrap());
	let notifier = Arc::new(RecordingNotifier::default());
	let coordinator = CompletionCoordinator::new(store.clone(), notifier.clone(), policy);

	let task = store
		.create_task(NewTask {
			client_callback_url: "https://client.example/hook".into(),
			original_filename: "meeting.mp3".into(),
		})
		.await
		.unwrap();

	store
		.update_task(
			&task.task_id,
			TaskPatch {
				total_segments: Some(i64::from(segment_count)),
				..TaskPatch::default()
			},
		)
		.await
		.unwrap();

	let mut segment_ids = Vec::new();
	for index in 0..segment_count {
		let start = f64::from(index) * 15.0;
		let segment = store
			.create_segment(NewSegment {
				task_id: task.task_id.clone(),
				blob_path: format!("segments/{}/segment_{index}.mp3", task.task_id),
				start_seconds: start,
				end_seconds: start + 15.0,
			})
			.await
			.unwrap();
		segment_ids.push(segment.segment_id);
	}

	Fixture {
		store,
		notifier,
		coordinator,
		task,
		segment_ids,
	}
}

async fn complete_segment(store: &SqliteBridgeStore, segment_id: &str, text: &str) {
	store
		.update_segment(
			segment_id,
			SegmentPatch {
				status: Some(SegmentStatus::Completed),
				transcript_text: Some(text.to_owned()),
				completed_at: Some(Utc::now()),
				..SegmentPatch::default()
			},
		)
		.await
		.unwrap();
}

async fn fail_segment(store: &SqliteBridgeStore, segment_id: &str) {
	store
		.update_segment(
			segment_id,
			SegmentPatch {
				status: Some(SegmentStatus::Failed),
				error_message: Some("provider exploded".to_owned()),
				completed_at: Some(Utc::now()),
				..SegmentPatch::default()
			},
		)
		.await
		.unwrap();
}

#[tokio::test]
async fn pending_while_segments_in_flight() {
	let fx = fixture(2, CompletionPolicy::Strict).await;

	complete_segment(&fx.store, &fx.segment_ids[0], "Hello world").await;

	let outcome = fx.coordinator.check_task_completion(&fx.task.task_id).await.unwrap();
	assert_eq!(
		outcome,
		CompletionOutcome::Pending {
			completed: 1,
			failed: 0,
			total: 2
		}
	);

	let task = fx.store.get_task(&fx.task.task_id).await.unwrap().unwrap();
	assert_eq!(task.status, TaskStatus::Processing);
	assert_eq!(task.completed_segments, 1);
	assert!(fx.notifier.notifications.lock().await.is_empty());
}

#[tokio::test]
async fn all_completed_assembles_and_notifies_once() {
	let fx = fixture(2, CompletionPolicy::Strict).await;

	complete_segment(&fx.store, &fx.segment_ids[0], "Hello world").await;
	complete_segment(&fx.store, &fx.segment_ids[1], "this is a test").await;

	let outcome = fx.coordinator.check_task_completion(&fx.task.task_id).await.unwrap();
	assert_eq!(outcome, CompletionOutcome::Completed);

	let task = fx.store.get_task(&fx.task.task_id).await.unwrap().unwrap();
	assert_eq!(task.status, TaskStatus::Completed);
	assert_eq!(task.final_transcript.as_deref(), Some("Hello world this is a test"));
	assert!(task.completed_at.is_some());

	// A duplicate trigger is a no-op and does not re-deliver.
	let again = fx.coordinator.check_task_completion(&fx.task.task_id).await.unwrap();
	assert_eq!(again, CompletionOutcome::AlreadyTerminal);

	let notifications = fx.notifier.notifications.lock().await;
	assert_eq!(
		*notifications,
		vec![Notification::Success {
			task_id: fx.task.task_id.clone(),
			text: "Hello world this is a test".to_owned()
		}]
	);
}

#[tokio::test]
async fn strict_policy_fails_task_on_any_failed_segment() {
	let fx = fixture(2, CompletionPolicy::Strict).await;

	complete_segment(&fx.store, &fx.segment_ids[0], "Good").await;
	fail_segment(&fx.store, &fx.segment_ids[1]).await;

	let outcome = fx.coordinator.check_task_completion(&fx.task.task_id).await.unwrap();
	assert_eq!(outcome, CompletionOutcome::Failed { failed_segments: 1 });

	let task = fx.store.get_task(&fx.task.task_id).await.unwrap().unwrap();
	assert_eq!(task.status, TaskStatus::Failed);
	assert_eq!(task.error_message.as_deref(), Some("1 segments failed to process"));
	assert!(task.completed_at.is_some());

	let notifications = fx.notifier.notifications.lock().await;
	assert_eq!(
		*notifications,
		vec![Notification::Failure {
			task_id: fx.task.task_id.clone(),
			error: "1 segments failed to process".to_owned()
		}]
	);
}

#[tokio::test]
async fn lenient_policy_assembles_from_survivors() {
	let fx = fixture(2, CompletionPolicy::Lenient).await;

	complete_segment(&fx.store, &fx.segment_ids[0], "Good").await;
	fail_segment(&fx.store, &fx.segment_ids[1]).await;

	let outcome = fx.coordinator.check_task_completion(&fx.task.task_id).await.unwrap();
	assert_eq!(outcome, CompletionOutcome::Completed);

	let task = fx.store.get_task(&fx.task.task_id).await.unwrap().unwrap();
	assert_eq!(task.status, TaskStatus::Completed);
	assert_eq!(task.final_transcript.as_deref(), Some("Good"));
}

#[tokio::test]
async fn all_failed_fails_even_under_lenient() {
	let fx = fixture(2, CompletionPolicy::Lenient).await;

	fail_segment(&fx.store, &fx.segment_ids[0]).await;
	fail_segment(&fx.store, &fx.segment_ids[1]).await;

	let outcome = fx.coordinator.check_task_completion(&fx.task.task_id).await.unwrap();
	assert_eq!(outcome, CompletionOutcome::Failed { failed_segments: 2 });

	let task = fx.store.get_task(&fx.task.task_id).await.unwrap().unwrap();
	assert_eq!(task.status, TaskStatus::Failed);
	assert_eq!(task.error_message.as_deref(), Some("2 segments failed to process"));
}

#[tokio::test]
async fn unknown_task_is_an_error() {
	let fx = fixture(1, CompletionPolicy::Strict).await;
	let err = fx.coordinator.check_task_completion("no-such-task").await.unwrap_err();
	assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn completed_segments_counter_matches_store() {
	let fx = fixture(3, CompletionPolicy::Strict).await;

	complete_segment(&fx.store, &fx.segment_ids[0], "a").await;
	complete_segment(&fx.store, &fx.segment_ids[2], "c").await;

	fx.coordinator.check_task_completion(&fx.task.task_id).await.unwrap();

	let task = fx.store.get_task(&fx.task.task_id).await.unwrap().unwrap();
	let segments = fx.store.get_segments_by_task_id(&fx.task.task_id).await.unwrap();
	let completed_in_store = segments.iter().filter(|s| s.status == SegmentStatus::Completed).count() as i64;
	assert_eq!(task.completed_segments, completed_in_store);
}
