//! Inbound provider callbacks.
//!
//! Everything past the signature and shape checks is acknowledged with
//! 200: a definitively-bad payload must not goad the provider into
//! replaying it, and an unknown segment is the provider's problem to
//! age out, not ours to error on.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use bridge_core::{BridgeError, Segment, SegmentPatch, SegmentStatus, TaskSegmentStore};
use scribe_client::{verify_callback_signature, ProviderCallback};

use crate::error::ServerError;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "elevenlabs-signature";

#[derive(Debug, Deserialize)]
pub struct WebhookParams {
	#[serde(rename = "segmentId")]
	pub segment_id: Option<String>,
}

pub async fn receive_transcription(
	State(state): State<AppState>,
	Query(params): Query<WebhookParams>,
	headers: HeaderMap,
	body: String,
) -> Result<Json<Value>, ServerError> {
	if let Some(secret) = &state.config.provider_webhook_secret {
		let header = headers
			.get(SIGNATURE_HEADER)
			.and_then(|v| v.to_str().ok())
			.ok_or_else(|| BridgeError::authentication("missing callback signature header"))?;
		verify_callback_signature(header, &body, secret)?;
	} else {
		warn!("no provider webhook secret configured, accepting callback unverified");
	}

	let callback: ProviderCallback = serde_json::from_str(&body).map_err(|e| BridgeError::validation(format!("malformed callback body: {e}")))?;

	if callback.data.request_id.is_empty() {
		return Err(BridgeError::validation("callback missing request_id").into());
	}

	if !callback.is_completion() && !callback.is_failure() {
		info!(kind = %callback.kind, "ignoring callback of unhandled kind");
		return Ok(acknowledged());
	}

	if callback.is_completion() && callback.data.transcription.is_none() {
		return Err(BridgeError::validation("completion callback missing transcription").into());
	}

	let Some(segment) = lookup_segment(&state, params.segment_id.as_deref(), &callback.data.request_id).await? else {
		info!(request_id = %callback.data.request_id, "callback for unknown segment, acknowledging");
		return Ok(acknowledged());
	};

	if segment.status.is_terminal() {
		info!(segment_id = %segment.segment_id, status = %segment.status, "duplicate callback ignored");
		return Ok(acknowledged());
	}

	if let Err(err) = apply_callback(&state, &segment, &callback).await {
		warn!(segment_id = %segment.segment_id, error = %err, "failed to apply callback");
		return Ok(acknowledged());
	}

	if let Err(err) = state.coordinator.check_task_completion(&segment.task_id).await {
		warn!(task_id = %segment.task_id, error = %err, "completion check failed after callback");
	}

	Ok(acknowledged())
}

fn acknowledged() -> Json<Value> {
	Json(json!({ "received": true }))
}

/// An explicit `segmentId` query parameter wins the lookup, but a
/// disagreement with the callback's request id is worth a log line.
async fn lookup_segment(state: &AppState, segment_id: Option<&str>, request_id: &str) -> Result<Option<Segment>, BridgeError> {
	if let Some(segment_id) = segment_id {
		if let Some(segment) = state.store.get_segment(segment_id).await? {
			if segment.provider_request_id.as_deref() != Some(request_id) {
				warn!(
					segment_id,
					request_id,
					stored_request_id = segment.provider_request_id.as_deref().unwrap_or("<none>"),
					"segmentId parameter disagrees with callback request_id"
				);
			}
			return Ok(Some(segment));
		}
		warn!(segment_id, "segmentId parameter references no known segment, falling back to request_id");
	}

	state.store.find_segment_by_provider_request_id(request_id).await
}

async fn apply_callback(state: &AppState, segment: &Segment, callback: &ProviderCallback) -> Result<(), BridgeError> {
	if callback.is_completion() {
		let transcription = callback.data.transcription.as_ref().ok_or_else(|| BridgeError::validation("completion callback missing transcription"))?;

		state
			.store
			.update_segment(
				&segment.segment_id,
				SegmentPatch {
					status: Some(SegmentStatus::Completed),
					transcript_text: Some(transcription.text.clone()),
					language_code: transcription.language_code.clone(),
					completed_at: Some(Utc::now()),
					..SegmentPatch::default()
				},
			)
			.await?;

		state.store.increment_completed_segments(&segment.task_id).await?;
		state.metrics.callbacks_total.with_label_values(&["completed"]).inc();
		info!(segment_id = %segment.segment_id, chars = transcription.text.len(), "segment transcript received");
	} else {
		let error_message = callback.data.error.clone().unwrap_or_else(|| "provider reported failure".to_owned());

		state
			.store
			.update_segment(
				&segment.segment_id,
				SegmentPatch {
					status: Some(SegmentStatus::Failed),
					error_message: Some(error_message.clone()),
					completed_at: Some(Utc::now()),
					..SegmentPatch::default()
				},
			)
			.await?;

		state.metrics.callbacks_total.with_label_values(&["failed"]).inc();
		warn!(segment_id = %segment.segment_id, error = %error_message, "provider reported segment failure");
	}

	Ok(())
}
