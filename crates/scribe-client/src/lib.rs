//! HTTP client for the external speech-to-text provider.
//!
//! Dispatch uses the provider's asynchronous mode: we upload one segment
//! with `webhook=true` and the provider later POSTs the transcript to a
//! preconfigured callback URL. The synchronous reply carries either the
//! request id for that round-trip or, for small inputs, an inline
//! transcript.

pub mod callback;
pub mod client;
pub mod signature;

use async_trait::async_trait;

use bridge_core::BridgeError;

pub use callback::{CallbackTranscription, CallbackWord, ProviderCallback, TRANSCRIPTION_COMPLETED, TRANSCRIPTION_FAILED};
pub use client::{ScribeClient, ScribeConfig};
pub use signature::{sign_callback, verify_callback_signature};

/// Default per-call deadline; segment uploads are large.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct DispatchRequest {
	pub audio: Vec<u8>,
	pub filename: String,
	pub language_code: Option<String>,
	pub diarize: bool,
	pub tag_audio_events: bool,
}

impl DispatchRequest {
	#[must_use]
	pub fn new(audio: Vec<u8>, filename: impl Into<String>) -> Self {
		Self {
			audio,
			filename: filename.into(),
			language_code: None,
			diarize: false,
			tag_audio_events: false,
		}
	}
}

/// Synchronous reply to a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
	/// Provider accepted the segment and will call back with the result.
	Queued { request_id: String },
	/// Provider transcribed inline (synchronous mode).
	Inline { text: String, language_code: Option<String> },
}

/// Seam between the queue and the provider, so dispatch can be scripted
/// in tests.
#[async_trait]
pub trait TranscriptionDispatch: Send + Sync {
	async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchOutcome, BridgeError>;
}
