use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BridgeError;
use crate::models::delivery::DeliveryStatus;

/// Terminal statuses are absorbing; the store enforces this with a
/// compare-and-set on finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
	Processing,
	Completed,
	Failed,
}

impl TaskStatus {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Processing => "processing",
			Self::Completed => "completed",
			Self::Failed => "failed",
		}
	}

	#[must_use]
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::Completed | Self::Failed)
	}
}

impl fmt::Display for TaskStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for TaskStatus {
	type Err = BridgeError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"processing" => Ok(Self::Processing),
			"completed" => Ok(Self::Completed),
			"failed" => Ok(Self::Failed),
			other => Err(BridgeError::validation(format!("unknown task status '{other}'"))),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
	pub task_id: String,
	pub client_callback_url: String,
	pub original_filename: String,
	pub status: TaskStatus,
	pub total_segments: Option<i64>,
	pub completed_segments: i64,
	pub final_transcript: Option<String>,
	pub error_message: Option<String>,
	pub delivery_status: Option<DeliveryStatus>,
	pub delivery_attempts: Option<i64>,
	pub delivery_error: Option<String>,
	pub created_at: DateTime<Utc>,
	pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
	/// Wall-clock time from creation to completion, for the delivery payload.
	#[must_use]
	pub fn processing_time_ms(&self) -> Option<i64> {
		self.completed_at.map(|done| (done - self.created_at).num_milliseconds())
	}
}

#[derive(Debug, Clone)]
pub struct NewTask {
	pub client_callback_url: String,
	pub original_filename: String,
}

/// Partial update; `None` fields are left untouched by the store.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
	pub total_segments: Option<i64>,
	pub completed_segments: Option<i64>,
	pub final_transcript: Option<String>,
	pub error_message: Option<String>,
	pub delivery_status: Option<DeliveryStatus>,
	pub delivery_attempts: Option<i64>,
	pub delivery_error: Option<String>,
	pub completed_at: Option<DateTime<Utc>>,
}
