use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BridgeError;

/// Lifecycle: `pending → processing → (completed | failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
	Pending,
	Processing,
	Completed,
	Failed,
}

impl SegmentStatus {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "pending",
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

impl fmt::Display for SegmentStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for SegmentStatus {
	type Err = BridgeError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"pending" => Ok(Self::Pending),
			"processing" => Ok(Self::Processing),
			"completed" => Ok(Self::Completed),
			"failed" => Ok(Self::Failed),
			other => Err(BridgeError::validation(format!("unknown segment status '{other}'"))),
		}
	}
}

/// A contiguous time-range slice of the input audio, transcribed
/// independently. The set of segments for a task is immutable once the
/// split step has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
	pub segment_id: String,
	pub task_id: String,
	pub blob_path: String,
	pub start_seconds: f64,
	pub end_seconds: f64,
	pub status: SegmentStatus,
	pub transcript_text: Option<String>,
	pub language_code: Option<String>,
	pub provider_request_id: Option<String>,
	pub error_message: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewSegment {
	pub task_id: String,
	pub blob_path: String,
	pub start_seconds: f64,
	pub end_seconds: f64,
}

impl NewSegment {
	#[must_use]
	pub fn is_valid(&self) -> bool {
		self.start_seconds >= 0.0 && self.start_seconds < self.end_seconds
	}
}

/// Partial update; `None` fields are left untouched by the store.
#[derive(Debug, Clone, Default)]
pub struct SegmentPatch {
	pub status: Option<SegmentStatus>,
	pub transcript_text: Option<String>,
	pub language_code: Option<String>,
	pub provider_request_id: Option<String>,
	pub error_message: Option<String>,
	pub completed_at: Option<DateTime<Utc>>,
}
