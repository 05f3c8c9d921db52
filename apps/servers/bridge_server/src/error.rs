use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use bridge_core::BridgeError;

/// Boundary wrapper mapping the core taxonomy onto HTTP responses.
#[derive(Debug)]
pub struct ServerError(pub BridgeError);

impl From<BridgeError> for ServerError {
	fn from(err: BridgeError) -> Self {
		Self(err)
	}
}

impl IntoResponse for ServerError {
	fn into_response(self) -> Response {
		let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

		if status.is_server_error() {
			tracing::error!(code = self.0.code(), error = %self.0, "request failed");
		}

		let body = Json(json!({
			"error": {
				"code": self.0.code(),
				"message": self.0.to_string(),
				"retryable": self.0.is_retryable(),
			}
		}));

		(status, body).into_response()
	}
}
