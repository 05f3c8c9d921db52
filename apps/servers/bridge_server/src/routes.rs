use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{cleanup, health, pump, webhook};
use crate::state::AppState;

pub fn api_routes() -> Router<AppState> {
	Router::new()
		.route("/health", get(health::health))
		.route("/metrics", get(health::metrics_handler))
		.route("/api/stats", get(health::stats))
		.route("/api/webhooks/transcription", post(webhook::receive_transcription))
		.route("/api/queue/pump", post(pump::pump).get(pump::pump_get))
		.route("/api/cleanup", post(cleanup::cleanup))
}
