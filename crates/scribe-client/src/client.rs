use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use bridge_core::BridgeError;

use crate::{DispatchOutcome, DispatchRequest, TranscriptionDispatch, DEFAULT_TIMEOUT_SECS};

const DEFAULT_API_URL: &str = "https://api.elevenlabs.io/v1/speech-to-text";
const DEFAULT_MODEL_ID: &str = "scribe_v1";

#[derive(Debug, Clone)]
pub struct ScribeConfig {
	pub api_url: String,
	pub api_key: String,
	pub model_id: String,
	pub timeout: Duration,
}

impl ScribeConfig {
	#[must_use]
	pub fn new(api_key: impl Into<String>) -> Self {
		Self {
			api_url: DEFAULT_API_URL.to_owned(),
			api_key: api_key.into(),
			model_id: DEFAULT_MODEL_ID.to_owned(),
			timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
		}
	}
}

/// Reply shape: async mode answers with a `task_id`, sync mode with the
/// transcript inline.
#[derive(Debug, Deserialize)]
struct SyncReply {
	task_id: Option<String>,
	text: Option<String>,
	language_code: Option<String>,
}

pub struct ScribeClient {
	http: reqwest::Client,
	config: ScribeConfig,
}

impl ScribeClient {
	/// # Errors
	/// Fails when the underlying HTTP client cannot be constructed.
	pub fn new(config: ScribeConfig) -> Result<Self, BridgeError> {
		let http = reqwest::Client::builder()
			.timeout(config.timeout)
			.build()
			.map_err(|e| BridgeError::internal(format!("failed to build http client: {e}")))?;

		Ok(Self { http, config })
	}

	fn build_form(&self, request: DispatchRequest) -> Result<reqwest::multipart::Form, BridgeError> {
		let part = reqwest::multipart::Part::bytes(request.audio)
			.file_name(request.filename)
			.mime_str("audio/mpeg")
			.map_err(|e| BridgeError::internal(format!("invalid mime type: {e}")))?;

		// The callback URL is a deployment property configured with the
		// provider; the request only opts in to webhook mode.
		let mut form = reqwest::multipart::Form::new()
			.part("file", part)
			.text("model_id", self.config.model_id.clone())
			.text("diarize", bool_str(request.diarize))
			.text("tag_audio_events", bool_str(request.tag_audio_events))
			.text("webhook", "true");

		if let Some(lang) = request.language_code {
			form = form.text("language_code", lang);
		}

		Ok(form)
	}
}

#[async_trait]
impl TranscriptionDispatch for ScribeClient {
	async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchOutcome, BridgeError> {
		let form = self.build_form(request)?;

		let response = self
			.http
			.post(&self.config.api_url)
			.header("xi-api-key", &self.config.api_key)
			.multipart(form)
			.send()
			.await
			.map_err(transport_error)?;

		let status = response.status();
		if !status.is_success() {
			let retry_after = response
				.headers()
				.get("retry-after")
				.and_then(|v| v.to_str().ok())
				.and_then(|v| v.parse::<u64>().ok());
			let body = response.text().await.unwrap_or_else(|_| "unknown error".to_owned());
			return Err(status_error(status.as_u16(), &body, retry_after));
		}

		let reply: SyncReply = response.json().await.map_err(|e| BridgeError::external("scribe", format!("invalid reply: {e}")))?;

		match (reply.task_id, reply.text) {
			(Some(request_id), _) => {
				debug!(%request_id, "segment queued with provider");
				Ok(DispatchOutcome::Queued { request_id })
			}
			(None, Some(text)) => Ok(DispatchOutcome::Inline {
				text,
				language_code: reply.language_code,
			}),
			(None, None) => Err(BridgeError::external("scribe", "reply carried neither task_id nor text")),
		}
	}
}

fn bool_str(value: bool) -> String {
	if value { "true" } else { "false" }.to_owned()
}

fn transport_error(err: reqwest::Error) -> BridgeError {
	if err.is_timeout() {
		BridgeError::timeout(format!("provider request timed out: {err}"))
	} else {
		BridgeError::external("scribe", format!("request failed: {err}"))
	}
}

/// Map a non-2xx provider status onto the error taxonomy.
fn status_error(status: u16, body: &str, retry_after: Option<u64>) -> BridgeError {
	match status {
		401 | 403 => BridgeError::authentication(format!("provider rejected credentials ({status}): {body}")),
		408 => BridgeError::timeout(format!("provider timed out ({status}): {body}")),
		429 => BridgeError::RateLimit {
			message: format!("provider rate limit ({status}): {body}"),
			retry_after_secs: retry_after,
		},
		400..=499 => BridgeError::validation(format!("provider rejected request ({status}): {body}")),
		_ => BridgeError::external("scribe", format!("provider error ({status}): {body}")),
	}
}
