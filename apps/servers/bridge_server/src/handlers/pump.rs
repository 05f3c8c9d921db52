//! Queue pump endpoint, the external scheduler's entry point in
//! serverless deployments. A GET variant exists for cron services that
//! cannot POST.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ServerError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PumpRequest {
	#[serde(rename = "maxJobs")]
	pub max_jobs: Option<usize>,
}

pub async fn pump(State(state): State<AppState>, body: Option<Json<PumpRequest>>) -> Result<Json<Value>, ServerError> {
	let max_jobs = body.and_then(|Json(b)| b.max_jobs);
	run_pump(&state, max_jobs).await
}

pub async fn pump_get(State(state): State<AppState>) -> Result<Json<Value>, ServerError> {
	run_pump(&state, None).await
}

async fn run_pump(state: &AppState, max_jobs: Option<usize>) -> Result<Json<Value>, ServerError> {
	let outcome = state.queue.force_process(max_jobs).await?;

	state.metrics.pump_runs_total.inc();
	state.metrics.pump_processed_total.inc_by(outcome.processed as u64);

	Ok(Json(json!({
		"processed": outcome.processed,
		"remaining": outcome.remaining,
	})))
}
