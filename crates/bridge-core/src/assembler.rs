//! Deterministic chronological merge of completed segment transcripts.
//!
//! Completion order of segments is undefined; this module restores
//! chronological order from `start_seconds` and flags continuity issues
//! without ever failing assembly over them.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::BridgeError;
use crate::models::{Segment, SegmentStatus};

pub const DEFAULT_LANGUAGE: &str = "en";

/// Placeholder until per-segment confidence is threaded through from the
/// provider callbacks.
pub const DEFAULT_CONFIDENCE: f64 = 0.95;

/// Gaps longer than this between adjacent segments are reported.
pub const GAP_WARN_SECONDS: f64 = 1.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssembledSegment {
	pub start_seconds: f64,
	pub end_seconds: f64,
	pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptMetadata {
	pub total_duration: f64,
	pub language_code: String,
	pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssembledTranscript {
	pub text: String,
	pub segments: Vec<AssembledSegment>,
	pub metadata: TranscriptMetadata,
}

#[derive(Debug, Clone)]
pub struct ReadyCheck {
	pub ready: bool,
	pub missing_segment_ids: Vec<String>,
}

/// Combine completed segments into one chronological transcript.
///
/// Failed segments are filtered out; segments whose transcript trims to
/// nothing are dropped. Gap and overlap warnings are diagnostics only.
///
/// # Errors
/// Returns `BridgeError::BusinessLogic` when no segment contributes text.
pub fn assemble(segments: &[Segment]) -> Result<AssembledTranscript, BridgeError> {
	let mut kept: Vec<&Segment> = segments
		.iter()
		.filter(|s| s.status == SegmentStatus::Completed && s.transcript_text.as_deref().is_some_and(|t| !t.trim().is_empty()))
		.collect();

	if kept.is_empty() {
		return Err(BridgeError::business("no completed segments with transcript text to assemble"));
	}

	kept.sort_by(|a, b| a.start_seconds.total_cmp(&b.start_seconds));

	for pair in kept.windows(2) {
		let gap = pair[1].start_seconds - pair[0].end_seconds;
		if gap > GAP_WARN_SECONDS {
			warn!(
				prev_segment = %pair[0].segment_id,
				next_segment = %pair[1].segment_id,
				gap_seconds = gap,
				"gap between adjacent segments"
			);
		} else if gap < 0.0 {
			warn!(
				prev_segment = %pair[0].segment_id,
				next_segment = %pair[1].segment_id,
				overlap_seconds = -gap,
				"overlap between adjacent segments"
			);
		}
	}

	let assembled: Vec<AssembledSegment> = kept
		.iter()
		.map(|s| AssembledSegment {
			start_seconds: s.start_seconds,
			end_seconds: s.end_seconds,
			text: s.transcript_text.as_deref().unwrap_or_default().trim().to_owned(),
		})
		.collect();

	let text = assembled.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join(" ");

	let start = kept.iter().map(|s| s.start_seconds).fold(f64::INFINITY, f64::min);
	let end = kept.iter().map(|s| s.end_seconds).fold(f64::NEG_INFINITY, f64::max);

	let language_code = kept
		.iter()
		.find_map(|s| s.language_code.as_deref().filter(|l| !l.is_empty()))
		.unwrap_or(DEFAULT_LANGUAGE)
		.to_owned();

	Ok(AssembledTranscript {
		text,
		segments: assembled,
		metadata: TranscriptMetadata {
			total_duration: end - start,
			language_code,
			confidence: DEFAULT_CONFIDENCE,
		},
	})
}

/// A task is ready for assembly once no segment is `pending` or
/// `processing`. Failed segments do not block readiness.
#[must_use]
pub fn check_ready(segments: &[Segment]) -> ReadyCheck {
	let missing: Vec<String> = segments.iter().filter(|s| !s.status.is_terminal()).map(|s| s.segment_id.clone()).collect();

	ReadyCheck {
		ready: missing.is_empty(),
		missing_segment_ids: missing,
	}
}
