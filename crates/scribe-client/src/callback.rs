//! Payload shapes for the provider's webhook callbacks.

use serde::{Deserialize, Serialize};

/// The only discriminator acted on: a finished speech-to-text round-trip.
pub const TRANSCRIPTION_COMPLETED: &str = "speech_to_text_transcription";

/// Failure callbacks carry an error string instead of a transcription.
pub const TRANSCRIPTION_FAILED: &str = "speech_to_text_failed";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCallback {
	#[serde(rename = "type")]
	pub kind: String,
	pub event_timestamp: Option<i64>,
	pub data: CallbackData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackData {
	pub request_id: String,
	pub transcription: Option<CallbackTranscription>,
	pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackTranscription {
	pub text: String,
	pub language_code: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub words: Option<Vec<CallbackWord>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackWord {
	pub text: String,
	pub start: Option<f64>,
	pub end: Option<f64>,
	#[serde(rename = "type")]
	pub kind: Option<String>,
}

impl ProviderCallback {
	#[must_use]
	pub fn is_completion(&self) -> bool {
		self.kind == TRANSCRIPTION_COMPLETED
	}

	#[must_use]
	pub fn is_failure(&self) -> bool {
		self.kind == TRANSCRIPTION_FAILED
	}
}
