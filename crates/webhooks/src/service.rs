//! Bridges the completion coordinator to the deliverer: builds the
//! payload, runs the delivery, and writes the outcome summary back onto
//! the task record.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use bridge_core::{AssembledTranscript, BridgeError, DeliveryStatus, ResultNotifier, Task, TaskPatch, TaskSegmentStore};

use crate::deliverer::WebhookDeliverer;
use crate::payload::WebhookPayload;

pub struct DeliveryService {
	deliverer: WebhookDeliverer,
	store: Arc<dyn TaskSegmentStore>,
}

impl DeliveryService {
	pub fn new(deliverer: WebhookDeliverer, store: Arc<dyn TaskSegmentStore>) -> Self {
		Self { deliverer, store }
	}

	async fn deliver_and_record(&self, task: &Task, payload: &WebhookPayload) -> Result<(), BridgeError> {
		let report = self.deliverer.deliver(&task.client_callback_url, payload).await?;

		info!(
			task_id = %task.task_id,
			final_status = %report.final_status,
			attempts = report.attempts.len(),
			"delivery finished"
		);

		// Summary only; a failed delivery never rewrites the task's own
		// error_message or success status.
		let delivery_error = match report.final_status {
			DeliveryStatus::Delivered => None,
			DeliveryStatus::Failed => report.last_error(),
		};

		self
			.store
			.update_task(
				&task.task_id,
				TaskPatch {
					delivery_status: Some(report.final_status),
					delivery_attempts: Some(report.attempts.len() as i64),
					delivery_error,
					..TaskPatch::default()
				},
			)
			.await?;

		Ok(())
	}
}

#[async_trait]
impl ResultNotifier for DeliveryService {
	async fn notify_success(&self, task: &Task, transcript: &AssembledTranscript) -> Result<(), BridgeError> {
		let payload = WebhookPayload::success(task, transcript);
		self.deliver_and_record(task, &payload).await
	}

	async fn notify_failure(&self, task: &Task, error_message: &str) -> Result<(), BridgeError> {
		let payload = WebhookPayload::failure(task, error_message);
		self.deliver_and_record(task, &payload).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::extract::State;
	use axum::http::{HeaderMap, StatusCode};
	use axum::routing::post;
	use axum::Router;
	use chrono::Utc;
	use std::net::SocketAddr;
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::time::Duration;
	use tokio::sync::Mutex;

	use bridge_core::{AssembledSegment, NewTask, TaskPatch, TaskSegmentStore, TaskStatus, TranscriptMetadata};
	use bridge_store::MemoryStore;

	use crate::deliverer::DeliveryConfig;
	use crate::signature::verify_body;

	#[derive(Debug, Clone)]
	struct Received {
		attempt_header: String,
		signature: String,
		body: String,
	}

	#[derive(Clone)]
	struct HookState {
		hits: Arc<AtomicU32>,
		received: Arc<Mutex<Vec<Received>>>,
		/// How many requests to reject with 500 before accepting.
		fail_first: u32,
	}

	async fn hook(State(state): State<HookState>, headers: HeaderMap, body: String) -> StatusCode {
		let hit = state.hits.fetch_add(1, Ordering::SeqCst) + 1;

		state.received.lock().await.push(Received {
			attempt_header: headers.get("X-Webhook-Attempt").and_then(|v| v.to_str().ok()).unwrap_or_default().to_owned(),
			signature: headers.get("X-Webhook-Signature").and_then(|v| v.to_str().ok()).unwrap_or_default().to_owned(),
			body,
		});

		if hit <= state.fail_first {
			StatusCode::INTERNAL_SERVER_ERROR
		} else {
			StatusCode::OK
		}
	}

	async fn spawn_hook(fail_first: u32) -> (String, HookState) {
		let state = HookState {
			hits: Arc::new(AtomicU32::new(0)),
			received: Arc::new(Mutex::new(Vec::new())),
			fail_first,
		};

		let app = Router::new().route("/hook", post(hook)).with_state(state.clone());
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr: SocketAddr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			axum::serve(listener, app).await.unwrap();
		});

		(format!("http://{addr}/hook"), state)
	}

	fn fast_config() -> DeliveryConfig {
		DeliveryConfig {
			max_attempts: 5,
			timeout: Duration::from_secs(5),
			base_delay_ms: 10,
			max_delay_ms: 50,
			jitter_ratio: 0.0,
			min_delay_ms: 10,
		}
	}

	async fn completed_task(store: &MemoryStore, url: &str) -> Task {
		let task = store
			.create_task(NewTask {
				client_callback_url: url.to_owned(),
				original_filename: "meeting.mp3".into(),
			})
			.await
			.unwrap();

		store
			.finalize_task(
				&task.task_id,
				TaskStatus::Completed,
				TaskPatch {
					final_transcript: Some("Hello world this is a test".into()),
					completed_at: Some(Utc::now()),
					..TaskPatch::default()
				},
			)
			.await
			.unwrap()
			.unwrap()
	}

	fn transcript() -> AssembledTranscript {
		AssembledTranscript {
			text: "Hello world this is a test".into(),
			segments: vec![
				AssembledSegment {
					start_seconds: 0.0,
					end_seconds: 15.0,
					text: "Hello world".into(),
				},
				AssembledSegment {
					start_seconds: 15.0,
					end_seconds: 30.0,
					text: "this is a test".into(),
				},
			],
			metadata: TranscriptMetadata {
				total_duration: 30.0,
				language_code: "en".into(),
				confidence: 0.95,
			},
		}
	}

	#[tokio::test]
	async fn retries_until_the_endpoint_accepts() {
		let (url, hook_state) = spawn_hook(2).await;
		let store = Arc::new(MemoryStore::new());
		let task = completed_task(&store, &url).await;

		let deliverer = WebhookDeliverer::new(fast_config(), "signing-secret").unwrap();
		let service = DeliveryService::new(deliverer, store.clone());

		service.notify_success(&task, &transcript()).await.unwrap();

		let received = hook_state.received.lock().await.clone();
		assert_eq!(received.len(), 3);

		// Attempt headers increment; payload bytes never change.
		let attempts: Vec<&str> = received.iter().map(|r| r.attempt_header.as_str()).collect();
		assert_eq!(attempts, vec!["1", "2", "3"]);
		assert_eq!(received[0].body, received[2].body);

		// Every attempt carried a valid signature over the exact body.
		for r in &received {
			assert!(verify_body("signing-secret", &r.body, &r.signature));
		}

		let value: serde_json::Value = serde_json::from_str(&received[0].body).unwrap();
		assert_eq!(value["status"], "completed");
		assert_eq!(value["metadata"]["wordCount"], 6);
		assert_eq!(value["metadata"]["segmentCount"], 2);

		// Delivery summary landed on the task without touching error_message.
		let task = store.get_task(&task.task_id).await.unwrap().unwrap();
		assert_eq!(task.delivery_status, Some(DeliveryStatus::Delivered));
		assert_eq!(task.delivery_attempts, Some(3));
		assert!(task.delivery_error.is_none());
		assert!(task.error_message.is_none());
		assert_eq!(task.status, TaskStatus::Completed);
	}

	#[tokio::test]
	async fn exhausted_attempts_record_a_failed_delivery() {
		let (url, hook_state) = spawn_hook(u32::MAX).await;
		let store = Arc::new(MemoryStore::new());
		let task = completed_task(&store, &url).await;

		let deliverer = WebhookDeliverer::new(fast_config(), "signing-secret").unwrap();
		let service = DeliveryService::new(deliverer, store.clone());

		service.notify_success(&task, &transcript()).await.unwrap();

		assert_eq!(hook_state.received.lock().await.len(), 5);

		// The task keeps its success status; only the summary says the
		// notification never landed.
		let task = store.get_task(&task.task_id).await.unwrap().unwrap();
		assert_eq!(task.status, TaskStatus::Completed);
		assert_eq!(task.delivery_status, Some(DeliveryStatus::Failed));
		assert_eq!(task.delivery_attempts, Some(5));
		assert!(task.delivery_error.as_deref().unwrap().contains("500"));
	}

	#[tokio::test]
	async fn failure_notification_carries_the_error() {
		let (url, hook_state) = spawn_hook(0).await;
		let store = Arc::new(MemoryStore::new());

		let task = store
			.create_task(NewTask {
				client_callback_url: url.clone(),
				original_filename: "meeting.mp3".into(),
			})
			.await
			.unwrap();
		let task = store
			.finalize_task(
				&task.task_id,
				TaskStatus::Failed,
				TaskPatch {
					error_message: Some("1 segments failed to process".into()),
					completed_at: Some(Utc::now()),
					..TaskPatch::default()
				},
			)
			.await
			.unwrap()
			.unwrap();

		let deliverer = WebhookDeliverer::new(fast_config(), "signing-secret").unwrap();
		let service = DeliveryService::new(deliverer, store.clone());

		service.notify_failure(&task, "1 segments failed to process").await.unwrap();

		let received = hook_state.received.lock().await.clone();
		assert_eq!(received.len(), 1);

		let value: serde_json::Value = serde_json::from_str(&received[0].body).unwrap();
		assert_eq!(value["status"], "failed");
		assert_eq!(value["error"], "1 segments failed to process");
		assert!(value.get("transcription").is_none());
		assert!(value.get("metadata").is_none());

		let task = store.get_task(&task.task_id).await.unwrap().unwrap();
		assert_eq!(task.delivery_status, Some(DeliveryStatus::Delivered));
		// The upstream failure reason is preserved verbatim.
		assert_eq!(task.error_message.as_deref(), Some("1 segments failed to process"));
	}
}
