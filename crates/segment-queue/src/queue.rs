//! In-memory job table and scheduler.
//!
//! The queue turns store-`pending` segments into terminal ones while
//! respecting the concurrency cap and the attempt budget. It is safe to
//! drive from a long-lived ticker or from stateless pump invocations:
//! every `force_process` starts by reconciling the job table against the
//! durable store, which always wins.

use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use bridge_core::{BlobStore, BridgeError, CompletionCoordinator, Segment, SegmentPatch, SegmentStatus, TaskSegmentStore};
use circuit_breaker::{BreakerError, CircuitBreaker};
use scribe_client::{DispatchOutcome, DispatchRequest, TranscriptionDispatch};

use crate::config::{retry_delay_ms, QueueConfig, QueueConfigPatch};
use crate::job::{Job, JobStatus};

/// Message fragments that mark a failure as transient even when the
/// error type itself does not say so.
const RETRYABLE_PATTERNS: &[&str] = &[
	"timeout",
	"timed out",
	"connection refused",
	"connection reset",
	"network",
	"too many requests",
	"rate limit",
	"service unavailable",
	"bad gateway",
	"gateway timeout",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpOutcome {
	pub processed: usize,
	pub remaining: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
	pub total: usize,
	pub pending: usize,
	pub processing: usize,
	pub retrying: usize,
	pub completed: usize,
	pub failed: usize,
	pub max_concurrent: usize,
}

pub struct SegmentQueue {
	store: Arc<dyn TaskSegmentStore>,
	blobs: Arc<dyn BlobStore>,
	dispatch: Arc<dyn TranscriptionDispatch>,
	breaker: Arc<CircuitBreaker>,
	coordinator: Arc<CompletionCoordinator>,
	config: RwLock<QueueConfig>,
	jobs: Mutex<HashMap<Uuid, Job>>,
}

impl SegmentQueue {
	pub fn new(
		store: Arc<dyn TaskSegmentStore>,
		blobs: Arc<dyn BlobStore>,
		dispatch: Arc<dyn TranscriptionDispatch>,
		breaker: Arc<CircuitBreaker>,
		coordinator: Arc<CompletionCoordinator>,
		config: QueueConfig,
	) -> Self {
		Self {
			store,
			blobs,
			dispatch,
			breaker,
			coordinator,
			config: RwLock::new(config),
			jobs: Mutex::new(HashMap::new()),
		}
	}

	/// Create a job for one store-`pending` segment.
	///
	/// A stale enqueue for a segment that already has a live job returns
	/// the existing job id.
	///
	/// # Errors
	/// Rejects segments that are not `pending` in the store.
	pub async fn enqueue_segment(&self, segment: &Segment, priority: i64) -> Result<Uuid, BridgeError> {
		if segment.status != SegmentStatus::Pending {
			return Err(BridgeError::validation(format!(
				"segment {} is {}, only pending segments can be enqueued",
				segment.segment_id, segment.status
			)));
		}

		let max_attempts = self.config.read().await.max_attempts;
		let mut jobs = self.jobs.lock().await;

		if let Some(existing) = jobs.values().find(|j| j.segment_id == segment.segment_id && !j.status.is_terminal()) {
			debug!(segment_id = %segment.segment_id, job_id = %existing.job_id, "segment already enqueued");
			return Ok(existing.job_id);
		}

		let job = Job::new(segment.segment_id.clone(), segment.task_id.clone(), segment.blob_path.clone(), priority, max_attempts);
		let job_id = job.job_id;
		jobs.insert(job_id, job);

		debug!(segment_id = %segment.segment_id, %job_id, priority, "segment enqueued");
		Ok(job_id)
	}

	/// Enqueue a task's segments so that earlier audio wins ties:
	/// `priority = N - index` over start order.
	///
	/// # Errors
	/// Propagates the first enqueue failure.
	pub async fn enqueue_segments(&self, segments: &[Segment], task_id: &str) -> Result<Vec<Uuid>, BridgeError> {
		let mut ordered: Vec<&Segment> = segments.iter().collect();
		ordered.sort_by(|a, b| a.start_seconds.total_cmp(&b.start_seconds));

		let total = ordered.len() as i64;
		let mut job_ids = Vec::with_capacity(ordered.len());
		for (index, segment) in ordered.into_iter().enumerate() {
			let priority = total - index as i64;
			job_ids.push(self.enqueue_segment(segment, priority).await?);
		}

		info!(task_id, segments = job_ids.len(), "task segments enqueued");
		Ok(job_ids)
	}

	/// Synchronous pump: reconcile with the store, then dispatch due jobs
	/// up to the free concurrency slots and wait for that batch.
	///
	/// # Errors
	/// Fails when reconciliation cannot read the store.
	pub async fn force_process(&self, max_jobs: Option<usize>) -> Result<PumpOutcome, BridgeError> {
		self.reconcile().await?;

		let config = self.config.read().await.clone();
		let now = Utc::now();

		let batch: Vec<Job> = {
			let mut jobs = self.jobs.lock().await;

			// Retrying jobs whose backoff elapsed become pending again.
			for job in jobs.values_mut() {
				if job.status == JobStatus::Retrying && job.scheduled_at <= now {
					job.status = JobStatus::Pending;
				}
			}

			let processing = jobs.values().filter(|j| j.status == JobStatus::Processing).count();
			let slots = config.max_concurrent.saturating_sub(processing);
			let limit = max_jobs.map_or(slots, |m| m.min(slots));

			let mut due: Vec<Uuid> = {
				let mut eligible: Vec<&Job> = jobs.values().filter(|j| j.status == JobStatus::Pending && j.scheduled_at <= now).collect();
				// Stable on ties: priority first, then earlier schedule.
				eligible.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.scheduled_at.cmp(&b.scheduled_at)));
				eligible.iter().take(limit).map(|j| j.job_id).collect()
			};

			due
				.drain(..)
				.map(|job_id| {
					let job = jobs.get_mut(&job_id).expect("selected job exists");
					job.status = JobStatus::Processing;
					job.attempts += 1;
					job.clone()
				})
				.collect()
		};

		let processed = batch.len();
		if processed > 0 {
			debug!(processed, "dispatching job batch");
		}

		join_all(batch.into_iter().map(|job| self.execute_job(job))).await;

		let remaining = {
			let jobs = self.jobs.lock().await;
			jobs.values().filter(|j| matches!(j.status, JobStatus::Pending | JobStatus::Retrying)).count()
		};

		Ok(PumpOutcome { processed, remaining })
	}

	/// Fail every pending/retrying job of a task without touching jobs
	/// that are already in flight. Returns how many were cancelled.
	pub async fn cancel_task_jobs(&self, task_id: &str) -> usize {
		let mut jobs = self.jobs.lock().await;
		let mut cancelled = 0;

		for job in jobs.values_mut() {
			if job.task_id == task_id && matches!(job.status, JobStatus::Pending | JobStatus::Retrying) {
				job.status = JobStatus::Failed;
				job.last_error = Some("cancelled".to_owned());
				cancelled += 1;
			}
		}

		if cancelled > 0 {
			info!(task_id, cancelled, "task jobs cancelled");
		}
		cancelled
	}

	pub async fn stats(&self) -> QueueStats {
		let jobs = self.jobs.lock().await;
		let mut stats = QueueStats {
			total: jobs.len(),
			max_concurrent: self.config.read().await.max_concurrent,
			..QueueStats::default()
		};

		for job in jobs.values() {
			match job.status {
				JobStatus::Pending => stats.pending += 1,
				JobStatus::Processing => stats.processing += 1,
				JobStatus::Retrying => stats.retrying += 1,
				JobStatus::Completed => stats.completed += 1,
				JobStatus::Failed => stats.failed += 1,
			}
		}

		stats
	}

	pub async fn configure(&self, patch: QueueConfigPatch) {
		self.config.write().await.apply(patch);
	}

	/// Drop terminal jobs older than `older_than`. Returns how many were
	/// removed.
	pub async fn cleanup_old_jobs(&self, older_than: Duration) -> usize {
		let cutoff = Utc::now() - chrono::Duration::milliseconds(older_than.as_millis() as i64);
		let mut jobs = self.jobs.lock().await;
		let before = jobs.len();
		jobs.retain(|_, job| !(job.status.is_terminal() && job.created_at < cutoff));
		before - jobs.len()
	}

	/// Realign the job table with the durable store.
	///
	/// (a) Jobs whose segment is already terminal in the store (or gone)
	/// are discarded; the store wins. (b) Store-`pending` segments with no
	/// live job are adopted, earlier audio getting higher priority.
	async fn reconcile(&self) -> Result<(), BridgeError> {
		let live: Vec<(Uuid, String)> = {
			let jobs = self.jobs.lock().await;
			jobs
				.values()
				.filter(|j| !j.status.is_terminal())
				.map(|j| (j.job_id, j.segment_id.clone()))
				.collect()
		};

		for (job_id, segment_id) in live {
			match self.store.get_segment(&segment_id).await? {
				Some(segment) if segment.status.is_terminal() => {
					self.jobs.lock().await.remove(&job_id);
					debug!(%segment_id, status = %segment.status, "job discarded, segment already terminal in store");
				}
				Some(_) => {}
				None => {
					self.jobs.lock().await.remove(&job_id);
					warn!(%segment_id, "job discarded, segment missing from store");
				}
			}
		}

		let pending = self.store.list_pending_segments().await?;
		let max_attempts = self.config.read().await.max_attempts;

		let mut jobs = self.jobs.lock().await;
		// Any job, terminal or not: a cancelled job must keep its segment
		// from being silently re-adopted on the next pump.
		let known: std::collections::HashSet<String> = jobs.values().map(|j| j.segment_id.clone()).collect();

		let mut per_task_total: HashMap<String, i64> = HashMap::new();
		for segment in &pending {
			*per_task_total.entry(segment.task_id.clone()).or_insert(0) += 1;
		}

		let mut per_task_index: HashMap<String, i64> = HashMap::new();
		for segment in &pending {
			let index = per_task_index.entry(segment.task_id.clone()).or_insert(0);
			let priority = per_task_total[&segment.task_id] - *index;
			*index += 1;

			if known.contains(&segment.segment_id) {
				continue;
			}

			let job = Job::new(segment.segment_id.clone(), segment.task_id.clone(), segment.blob_path.clone(), priority, max_attempts);
			debug!(segment_id = %segment.segment_id, job_id = %job.job_id, priority, "pending segment adopted from store");
			jobs.insert(job.job_id, job);
		}

		Ok(())
	}

	async fn execute_job(&self, job: Job) {
		if let Err(err) = self.try_execute(&job).await {
			self.handle_failure(&job, err).await;
		}
	}

	async fn try_execute(&self, job: &Job) -> Result<(), BridgeError> {
		self
			.store
			.update_segment(
				&job.segment_id,
				SegmentPatch {
					status: Some(SegmentStatus::Processing),
					..SegmentPatch::default()
				},
			)
			.await?;

		let audio = self.blobs.download(&job.blob_path).await?;
		let filename = job.blob_path.rsplit('/').next().unwrap_or("segment.mp3").to_owned();
		let request = DispatchRequest::new(audio, filename);

		let outcome = match self.breaker.call(self.dispatch.dispatch(request)).await {
			Ok(outcome) => outcome,
			Err(BreakerError::Open { name }) => return Err(BridgeError::CircuitBreakerOpen { name }),
			Err(BreakerError::Inner(err)) => return Err(err),
		};

		match outcome {
			DispatchOutcome::Queued { request_id } => {
				// The segment stays `processing` until the provider calls
				// back with the transcript.
				self
					.store
					.update_segment(
						&job.segment_id,
						SegmentPatch {
							provider_request_id: Some(request_id.clone()),
							..SegmentPatch::default()
						},
					)
					.await?;

				self.mark_job(job.job_id, JobStatus::Completed, None).await;
				debug!(segment_id = %job.segment_id, %request_id, "segment dispatched, awaiting callback");
			}
			DispatchOutcome::Inline { text, language_code } => {
				self
					.store
					.update_segment(
						&job.segment_id,
						SegmentPatch {
							status: Some(SegmentStatus::Completed),
							transcript_text: Some(text),
							language_code,
							completed_at: Some(Utc::now()),
							..SegmentPatch::default()
						},
					)
					.await?;
				self.store.increment_completed_segments(&job.task_id).await?;

				self.mark_job(job.job_id, JobStatus::Completed, None).await;
				info!(segment_id = %job.segment_id, "segment transcribed inline");

				self.trigger_completion(&job.task_id).await;
			}
		}

		Ok(())
	}

	async fn handle_failure(&self, job: &Job, err: BridgeError) {
		let retryable = is_retryable_failure(&err);
		let config = self.config.read().await.clone();

		if retryable && job.attempts < config.max_attempts {
			let delay_ms = retry_delay_ms(&config, job.attempts);
			let next_attempt_at = Utc::now() + chrono::Duration::milliseconds(delay_ms as i64);

			{
				let mut jobs = self.jobs.lock().await;
				if let Some(stored) = jobs.get_mut(&job.job_id) {
					stored.status = JobStatus::Retrying;
					stored.scheduled_at = next_attempt_at;
					stored.last_error = Some(err.to_string());
				}
			}

			warn!(
				segment_id = %job.segment_id,
				attempt = job.attempts,
				max_attempts = config.max_attempts,
				delay_ms,
				error = %err,
				"segment dispatch failed, retry scheduled"
			);

			// Reset so reconciliation re-picks the segment even if this
			// process never pumps again.
			if let Err(store_err) = self
				.store
				.update_segment(
					&job.segment_id,
					SegmentPatch {
						status: Some(SegmentStatus::Pending),
						..SegmentPatch::default()
					},
				)
				.await
			{
				warn!(segment_id = %job.segment_id, error = %store_err, "failed to reset segment for retry");
			}

			return;
		}

		self.mark_job(job.job_id, JobStatus::Failed, Some(err.to_string())).await;

		warn!(
			segment_id = %job.segment_id,
			attempts = job.attempts,
			retryable,
			error = %err,
			"segment failed permanently"
		);

		if let Err(store_err) = self
			.store
			.update_segment(
				&job.segment_id,
				SegmentPatch {
					status: Some(SegmentStatus::Failed),
					error_message: Some(err.to_string()),
					completed_at: Some(Utc::now()),
					..SegmentPatch::default()
				},
			)
			.await
		{
			warn!(segment_id = %job.segment_id, error = %store_err, "failed to persist segment failure");
		}

		self.trigger_completion(&job.task_id).await;
	}

	async fn mark_job(&self, job_id: Uuid, status: JobStatus, last_error: Option<String>) {
		let mut jobs = self.jobs.lock().await;
		if let Some(job) = jobs.get_mut(&job_id) {
			job.status = status;
			if last_error.is_some() {
				job.last_error = last_error;
			}
		}
	}

	async fn trigger_completion(&self, task_id: &str) {
		if let Err(err) = self.coordinator.check_task_completion(task_id).await {
			warn!(task_id, error = %err, "completion check failed");
		}
	}
}

/// Taxonomy classification plus message-pattern fallback for errors
/// that arrive untyped from the provider wrapper.
fn is_retryable_failure(err: &BridgeError) -> bool {
	if err.is_retryable() {
		return true;
	}

	let message = err.to_string().to_lowercase();
	RETRYABLE_PATTERNS.iter().any(|p| message.contains(p))
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use bridge_core::{AssembledTranscript, CompletionPolicy, NewSegment, NewTask, ResultNotifier, Task, TaskPatch, TaskStatus};
	use bridge_store::{MemoryBlobStore, MemoryStore};
	use circuit_breaker::BreakerConfig;
	use std::collections::VecDeque;
	use std::sync::atomic::{AtomicUsize, Ordering};

	struct NoopNotifier;

	#[async_trait]
	impl ResultNotifier for NoopNotifier {
		async fn notify_success(&self, _task: &Task, _transcript: &AssembledTranscript) -> Result<(), BridgeError> {
			Ok(())
		}

		async fn notify_failure(&self, _task: &Task, _error_message: &str) -> Result<(), BridgeError> {
			Ok(())
		}
	}

	/// Replays a scripted sequence of outcomes, then answers `Queued` with
	/// fresh request ids.
	#[derive(Default)]
	struct ScriptedDispatch {
		script: Mutex<VecDeque<Result<DispatchOutcome, BridgeError>>>,
		filenames: Mutex<Vec<String>>,
		counter: AtomicUsize,
	}

	impl ScriptedDispatch {
		async fn push(&self, result: Result<DispatchOutcome, BridgeError>) {
			self.script.lock().await.push_back(result);
		}

		async fn calls(&self) -> usize {
			self.filenames.lock().await.len()
		}
	}

	#[async_trait]
	impl TranscriptionDispatch for ScriptedDispatch {
		async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchOutcome, BridgeError> {
			self.filenames.lock().await.push(request.filename);
			if let Some(result) = self.script.lock().await.pop_front() {
				return result;
			}
			let n = self.counter.fetch_add(1, Ordering::SeqCst);
			Ok(DispatchOutcome::Queued { request_id: format!("req-{n}") })
		}
	}

	struct Harness {
		store: Arc<MemoryStore>,
		blobs: Arc<MemoryBlobStore>,
		dispatch: Arc<ScriptedDispatch>,
		queue: SegmentQueue,
	}

	fn harness_with(config: QueueConfig, breaker_config: BreakerConfig) -> Harness {
		let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
		let blobs = Arc::new(MemoryBlobStore::new());
		let dispatch = Arc::new(ScriptedDispatch::default());
		let breaker = Arc::new(CircuitBreaker::new("scribe", breaker_config));
		let coordinator = Arc::new(CompletionCoordinator::new(store.clone(), Arc::new(NoopNotifier), CompletionPolicy::Strict));

		let queue = SegmentQueue::new(store.clone(), blobs.clone(), dispatch.clone(), breaker, coordinator, config);

		Harness { store, blobs, dispatch, queue }
	}

	fn harness(config: QueueConfig) -> Harness {
		harness_with(config, BreakerConfig::default())
	}

	async fn seed_task(h: &Harness, segment_starts: &[f64]) -> (Task, Vec<Segment>) {
		let task = h
			.store
			.create_task(NewTask {
				client_callback_url: "https://client.example/hook".into(),
				original_filename: "long.mp3".into(),
			})
			.await
			.unwrap();

		h.store
			.update_task(
				&task.task_id,
				TaskPatch {
					total_segments: Some(segment_starts.len() as i64),
					..TaskPatch::default()
				},
			)
			.await
			.unwrap();

		let mut segments = Vec::new();
		for (index, start) in segment_starts.iter().enumerate() {
			let blob_path = format!("segments/{}/segment_{index}.mp3", task.task_id);
			h.blobs.upload(&blob_path, vec![0_u8; 16], "audio/mpeg").await.unwrap();

			let segment = h
				.store
				.create_segment(NewSegment {
					task_id: task.task_id.clone(),
					blob_path,
					start_seconds: *start,
					end_seconds: start + 900.0,
				})
				.await
				.unwrap();
			segments.push(segment);
		}

		(task, segments)
	}

	#[tokio::test]
	async fn dispatch_order_follows_start_seconds() {
		let h = harness(QueueConfig::default());
		// Created out of order on purpose; index in the blob path tracks
		// creation order, not chronology.
		let (task, segments) = seed_task(&h, &[1800.0, 0.0, 900.0]).await;

		h.queue.enqueue_segments(&segments, &task.task_id).await.unwrap();
		let outcome = h.queue.force_process(None).await.unwrap();

		assert_eq!(outcome.processed, 3);
		assert_eq!(outcome.remaining, 0);

		let filenames = h.dispatch.filenames.lock().await.clone();
		// start 0.0 is segment_1, start 900 is segment_2, start 1800 is segment_0
		assert_eq!(filenames, vec!["segment_1.mp3", "segment_2.mp3", "segment_0.mp3"]);
	}

	#[tokio::test]
	async fn concurrency_cap_bounds_each_pump() {
		let h = harness(QueueConfig {
			max_concurrent: 2,
			..QueueConfig::default()
		});
		let (task, segments) = seed_task(&h, &[0.0, 900.0, 1800.0, 2700.0, 3600.0]).await;

		h.queue.enqueue_segments(&segments, &task.task_id).await.unwrap();

		let first = h.queue.force_process(None).await.unwrap();
		assert_eq!(first.processed, 2);
		assert_eq!(first.remaining, 3);

		let second = h.queue.force_process(None).await.unwrap();
		assert_eq!(second.processed, 2);
		assert_eq!(second.remaining, 1);

		let third = h.queue.force_process(None).await.unwrap();
		assert_eq!(third.processed, 1);
		assert_eq!(third.remaining, 0);
	}

	#[tokio::test]
	async fn max_jobs_further_limits_a_pump() {
		let h = harness(QueueConfig::default());
		let (task, segments) = seed_task(&h, &[0.0, 900.0, 1800.0]).await;

		h.queue.enqueue_segments(&segments, &task.task_id).await.unwrap();
		let outcome = h.queue.force_process(Some(1)).await.unwrap();
		assert_eq!(outcome.processed, 1);
		assert_eq!(outcome.remaining, 2);
	}

	#[tokio::test]
	async fn queued_outcome_stores_request_id_and_leaves_segment_processing() {
		let h = harness(QueueConfig::default());
		let (task, segments) = seed_task(&h, &[0.0]).await;

		h.queue.enqueue_segments(&segments, &task.task_id).await.unwrap();
		h.queue.force_process(None).await.unwrap();

		let segment = h.store.get_segment(&segments[0].segment_id).await.unwrap().unwrap();
		assert_eq!(segment.status, SegmentStatus::Processing);
		assert_eq!(segment.provider_request_id.as_deref(), Some("req-0"));

		let stats = h.queue.stats().await;
		assert_eq!(stats.completed, 1);
		assert_eq!(stats.processing, 0);
	}

	#[tokio::test]
	async fn inline_outcome_completes_segment_and_task() {
		let h = harness(QueueConfig::default());
		let (task, segments) = seed_task(&h, &[0.0]).await;

		h.dispatch
			.push(Ok(DispatchOutcome::Inline {
				text: "short clip".into(),
				language_code: Some("en".into()),
			}))
			.await;

		h.queue.enqueue_segments(&segments, &task.task_id).await.unwrap();
		h.queue.force_process(None).await.unwrap();

		let segment = h.store.get_segment(&segments[0].segment_id).await.unwrap().unwrap();
		assert_eq!(segment.status, SegmentStatus::Completed);
		assert_eq!(segment.transcript_text.as_deref(), Some("short clip"));

		// Single-segment task: inline completion drives the coordinator all
		// the way to a terminal task.
		let task = h.store.get_task(&task.task_id).await.unwrap().unwrap();
		assert_eq!(task.status, TaskStatus::Completed);
		assert_eq!(task.final_transcript.as_deref(), Some("short clip"));
	}

	#[tokio::test]
	async fn retryable_failures_back_off_then_succeed() {
		let h = harness(QueueConfig {
			base_delay_ms: 50,
			max_delay_ms: 200,
			..QueueConfig::default()
		});
		let (task, segments) = seed_task(&h, &[0.0]).await;

		h.dispatch.push(Err(BridgeError::external("scribe", "provider error (500): boom"))).await;
		h.dispatch.push(Err(BridgeError::external("scribe", "provider error (500): boom"))).await;

		h.queue.enqueue_segments(&segments, &task.task_id).await.unwrap();

		// Attempt 1 fails; the job backs off and the segment is reset.
		let first = h.queue.force_process(None).await.unwrap();
		assert_eq!(first.processed, 1);
		let segment = h.store.get_segment(&segments[0].segment_id).await.unwrap().unwrap();
		assert_eq!(segment.status, SegmentStatus::Pending);
		assert_eq!(h.queue.stats().await.retrying, 1);

		// Not due yet: an immediate pump dispatches nothing.
		let idle = h.queue.force_process(None).await.unwrap();
		assert_eq!(idle.processed, 0);

		tokio::time::sleep(Duration::from_millis(80)).await;
		let second = h.queue.force_process(None).await.unwrap();
		assert_eq!(second.processed, 1);

		tokio::time::sleep(Duration::from_millis(150)).await;
		let third = h.queue.force_process(None).await.unwrap();
		assert_eq!(third.processed, 1);

		// Three dispatch calls total; the last one was accepted.
		assert_eq!(h.dispatch.calls().await, 3);
		let segment = h.store.get_segment(&segments[0].segment_id).await.unwrap().unwrap();
		assert_eq!(segment.status, SegmentStatus::Processing);
		assert!(segment.provider_request_id.is_some());
	}

	#[tokio::test]
	async fn non_retryable_failure_fails_segment_and_task_on_first_attempt() {
		let h = harness(QueueConfig::default());
		let (task, segments) = seed_task(&h, &[0.0]).await;

		h.dispatch.push(Err(BridgeError::authentication("Invalid API key"))).await;

		h.queue.enqueue_segments(&segments, &task.task_id).await.unwrap();
		h.queue.force_process(None).await.unwrap();

		assert_eq!(h.dispatch.calls().await, 1);

		let segment = h.store.get_segment(&segments[0].segment_id).await.unwrap().unwrap();
		assert_eq!(segment.status, SegmentStatus::Failed);
		assert!(segment.error_message.as_deref().unwrap().contains("Invalid API key"));

		let task = h.store.get_task(&task.task_id).await.unwrap().unwrap();
		assert_eq!(task.status, TaskStatus::Failed);
		assert_eq!(task.error_message.as_deref(), Some("1 segments failed to process"));
	}

	#[tokio::test]
	async fn attempt_budget_exhaustion_fails_the_segment() {
		let h = harness(QueueConfig {
			max_attempts: 2,
			base_delay_ms: 5,
			..QueueConfig::default()
		});
		let (task, segments) = seed_task(&h, &[0.0]).await;

		h.dispatch.push(Err(BridgeError::external("scribe", "boom"))).await;
		h.dispatch.push(Err(BridgeError::external("scribe", "boom"))).await;

		h.queue.enqueue_segments(&segments, &task.task_id).await.unwrap();
		h.queue.force_process(None).await.unwrap();
		tokio::time::sleep(Duration::from_millis(20)).await;
		h.queue.force_process(None).await.unwrap();

		let segment = h.store.get_segment(&segments[0].segment_id).await.unwrap().unwrap();
		assert_eq!(segment.status, SegmentStatus::Failed);
		assert_eq!(h.queue.stats().await.failed, 1);
	}

	#[tokio::test]
	async fn breaker_open_is_a_retryable_failure() {
		let h = harness_with(
			QueueConfig {
				base_delay_ms: 5,
				..QueueConfig::default()
			},
			BreakerConfig {
				failure_threshold: 1,
				..BreakerConfig::default()
			},
		);
		let (task, segments) = seed_task(&h, &[0.0, 900.0]).await;

		// First dispatch trips the breaker; the second is rejected by it.
		h.dispatch.push(Err(BridgeError::external("scribe", "connection reset"))).await;

		h.queue.enqueue_segments(&segments, &task.task_id).await.unwrap();
		h.queue.force_process(None).await.unwrap();

		// Only one request reached the provider.
		assert_eq!(h.dispatch.calls().await, 1);

		let stats = h.queue.stats().await;
		assert_eq!(stats.retrying, 2);

		let jobs_with_breaker_error = {
			let jobs = h.queue.jobs.lock().await;
			jobs
				.values()
				.filter(|j| j.last_error.as_deref().is_some_and(|e| e.contains("circuit breaker")))
				.count()
		};
		assert_eq!(jobs_with_breaker_error, 1);
	}

	#[tokio::test]
	async fn enqueue_rejects_non_pending_segments() {
		let h = harness(QueueConfig::default());
		let (_, segments) = seed_task(&h, &[0.0]).await;

		let processing = h
			.store
			.update_segment(
				&segments[0].segment_id,
				SegmentPatch {
					status: Some(SegmentStatus::Processing),
					..SegmentPatch::default()
				},
			)
			.await
			.unwrap();

		let err = h.queue.enqueue_segment(&processing, 1).await.unwrap_err();
		assert_eq!(err.status_code(), 400);
	}

	#[tokio::test]
	async fn enqueue_is_idempotent_per_segment() {
		let h = harness(QueueConfig::default());
		let (_, segments) = seed_task(&h, &[0.0]).await;

		let first = h.queue.enqueue_segment(&segments[0], 1).await.unwrap();
		let second = h.queue.enqueue_segment(&segments[0], 9).await.unwrap();
		assert_eq!(first, second);
		assert_eq!(h.queue.stats().await.total, 1);
	}

	#[tokio::test]
	async fn reconcile_discards_jobs_for_terminal_segments() {
		let h = harness(QueueConfig::default());
		let (task, segments) = seed_task(&h, &[0.0]).await;

		h.queue.enqueue_segments(&segments, &task.task_id).await.unwrap();

		// The inbound webhook completed the segment behind the queue's back.
		h.store
			.update_segment(
				&segments[0].segment_id,
				SegmentPatch {
					status: Some(SegmentStatus::Completed),
					transcript_text: Some("done elsewhere".into()),
					completed_at: Some(Utc::now()),
					..SegmentPatch::default()
				},
			)
			.await
			.unwrap();

		let outcome = h.queue.force_process(None).await.unwrap();
		assert_eq!(outcome.processed, 0);
		assert_eq!(h.dispatch.calls().await, 0);
		assert_eq!(h.queue.stats().await.total, 0);
	}

	#[tokio::test]
	async fn reconcile_adopts_store_pending_segments() {
		let h = harness(QueueConfig::default());
		let (_, segments) = seed_task(&h, &[0.0, 900.0]).await;

		// Nothing enqueued in this process; a previous (serverless)
		// invocation created the segments.
		let outcome = h.queue.force_process(None).await.unwrap();
		assert_eq!(outcome.processed, 2);

		let filenames = h.dispatch.filenames.lock().await.clone();
		assert_eq!(filenames, vec!["segment_0.mp3", "segment_1.mp3"]);

		for segment in &segments {
			let segment = h.store.get_segment(&segment.segment_id).await.unwrap().unwrap();
			assert_eq!(segment.status, SegmentStatus::Processing);
		}
	}

	#[tokio::test]
	async fn cancel_affects_only_pending_and_retrying_jobs() {
		let h = harness(QueueConfig::default());
		let (task, segments) = seed_task(&h, &[0.0, 900.0]).await;

		h.queue.enqueue_segments(&segments, &task.task_id).await.unwrap();
		let cancelled = h.queue.cancel_task_jobs(&task.task_id).await;
		assert_eq!(cancelled, 2);

		let stats = h.queue.stats().await;
		assert_eq!(stats.failed, 2);

		// Cancelled jobs are not re-adopted by reconciliation.
		let outcome = h.queue.force_process(None).await.unwrap();
		assert_eq!(outcome.processed, 0);
		assert_eq!(h.dispatch.calls().await, 0);

		assert_eq!(h.queue.cancel_task_jobs("unknown-task").await, 0);
	}

	#[tokio::test]
	async fn cleanup_drops_old_terminal_jobs() {
		let h = harness(QueueConfig::default());
		let (task, segments) = seed_task(&h, &[0.0]).await;

		h.queue.enqueue_segments(&segments, &task.task_id).await.unwrap();
		h.queue.force_process(None).await.unwrap();
		assert_eq!(h.queue.stats().await.completed, 1);

		assert_eq!(h.queue.cleanup_old_jobs(Duration::from_secs(3600)).await, 0);
		assert_eq!(h.queue.cleanup_old_jobs(Duration::ZERO).await, 1);
		assert_eq!(h.queue.stats().await.total, 0);
	}

	#[test]
	fn message_patterns_classify_untyped_errors() {
		assert!(is_retryable_failure(&BridgeError::internal("upstream gateway timeout")));
		assert!(is_retryable_failure(&BridgeError::internal("503 service unavailable")));
		assert!(is_retryable_failure(&BridgeError::business("too many requests, slow down")));
		assert!(!is_retryable_failure(&BridgeError::internal("file not found in bucket")));
		assert!(!is_retryable_failure(&BridgeError::validation("unsupported codec")));
	}
}
