use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use bridge_core::{TaskSegmentStore, TaskStatus};

use crate::error::ServerError;
use crate::state::AppState;

pub async fn health() -> Json<Value> {
	Json(json!({ "status": "ok", "service": "bridge_server" }))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<Value>, ServerError> {
	let processing = state.store.count_tasks(Some(TaskStatus::Processing)).await?;
	let completed = state.store.count_tasks(Some(TaskStatus::Completed)).await?;
	let failed = state.store.count_tasks(Some(TaskStatus::Failed)).await?;
	let queue = state.queue.stats().await;

	Ok(Json(json!({
		"tasks": {
			"processing": processing,
			"completed": completed,
			"failed": failed,
		},
		"queue": {
			"total": queue.total,
			"pending": queue.pending,
			"processing": queue.processing,
			"retrying": queue.retrying,
			"completed": queue.completed,
			"failed": queue.failed,
			"maxConcurrent": queue.max_concurrent,
		},
	})))
}

pub async fn metrics_handler(State(state): State<AppState>) -> String {
	state.metrics.render()
}
