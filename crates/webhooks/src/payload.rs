//! The JSON body POSTed to the client's callback URL.
//!
//! `taskId` plus `completedAt` double as idempotency hints: retries carry
//! the same body byte-for-byte, so receivers can deduplicate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bridge_core::{AssembledTranscript, Task, TaskStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadMetadata {
	pub total_duration: f64,
	pub language_code: String,
	pub confidence: f64,
	pub word_count: usize,
	pub segment_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
	pub task_id: String,
	pub status: TaskStatus,
	pub original_filename: String,
	pub completed_at: Option<DateTime<Utc>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub processing_time_ms: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub transcription: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub metadata: Option<PayloadMetadata>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl WebhookPayload {
	#[must_use]
	pub fn success(task: &Task, transcript: &AssembledTranscript) -> Self {
		Self {
			task_id: task.task_id.clone(),
			status: TaskStatus::Completed,
			original_filename: task.original_filename.clone(),
			completed_at: task.completed_at,
			processing_time_ms: task.processing_time_ms(),
			transcription: Some(transcript.text.clone()),
			metadata: Some(PayloadMetadata {
				total_duration: transcript.metadata.total_duration,
				language_code: transcript.metadata.language_code.clone(),
				confidence: transcript.metadata.confidence,
				word_count: transcript.text.split_whitespace().count(),
				segment_count: transcript.segments.len(),
			}),
			error: None,
		}
	}

	#[must_use]
	pub fn failure(task: &Task, error_message: &str) -> Self {
		Self {
			task_id: task.task_id.clone(),
			status: TaskStatus::Failed,
			original_filename: task.original_filename.clone(),
			completed_at: task.completed_at,
			processing_time_ms: task.processing_time_ms(),
			transcription: None,
			metadata: None,
			error: Some(error_message.to_owned()),
		}
	}
}
