//! Targeted or bulk cleanup of terminal tasks' leftovers.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

use bridge_core::{BlobStore, BridgeError, TaskSegmentStore};

use crate::error::ServerError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CleanupRequest {
	#[serde(rename = "taskId")]
	pub task_id: Option<String>,
	#[serde(default)]
	pub force: bool,
}

pub async fn cleanup(State(state): State<AppState>, body: Option<Json<CleanupRequest>>) -> Result<Json<Value>, ServerError> {
	let request = body.map(|Json(b)| b).unwrap_or_default();

	if let Some(task_id) = request.task_id {
		let task = state
			.store
			.get_task(&task_id)
			.await?
			.ok_or_else(|| BridgeError::not_found(format!("task {task_id}")))?;

		if !task.status.is_terminal() && !request.force {
			return Err(BridgeError::business("task is still processing; pass force=true to clean up anyway").into());
		}

		let mut removed = 0;
		for prefix in [format!("uploads/{task_id}/"), format!("converted/{task_id}/"), format!("segments/{task_id}/")] {
			let paths: Vec<String> = state.blobs.list(&prefix).await?.into_iter().map(|e| e.name).collect();
			removed += paths.len();
			state.blobs.remove_many(&paths).await?;
		}

		info!(task_id, removed, "task blobs cleaned up");
		return Ok(Json(json!({ "taskId": task_id, "blobsRemoved": removed })));
	}

	let older_than = Duration::from_secs(state.config.cleanup_interval_hours * 3600);
	let swept = state.queue.cleanup_old_jobs(older_than).await;
	Ok(Json(json!({ "jobsRemoved": swept })))
}
