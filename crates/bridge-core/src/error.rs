use serde_json::Value;
use thiserror::Error;

/// Broad classification used at propagation boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
	Validation,
	Authentication,
	Authorization,
	NotFound,
	ExternalService,
	RateLimit,
	Timeout,
	CircuitBreaker,
	Database,
	BusinessLogic,
	System,
}

#[derive(Debug, Error)]
pub enum BridgeError {
	#[error("validation failed: {message}")]
	Validation { message: String, details: Option<Value> },

	#[error("authentication failed: {message}")]
	Authentication { message: String },

	#[error("not authorized: {message}")]
	Authorization { message: String },

	#[error("{resource} not found")]
	NotFound { resource: String },

	#[error("{service} error: {message}")]
	ExternalService { service: String, message: String },

	#[error("rate limited: {message}")]
	RateLimit { message: String, retry_after_secs: Option<u64> },

	#[error("operation timed out: {message}")]
	Timeout { message: String },

	#[error("circuit breaker '{name}' is open")]
	CircuitBreakerOpen { name: String },

	#[error("database error: {message}")]
	Database { message: String },

	#[error("{message}")]
	BusinessLogic { message: String, details: Option<Value> },

	#[error("internal error: {message}")]
	Internal { message: String },
}

impl BridgeError {
	pub fn validation(message: impl Into<String>) -> Self {
		Self::Validation {
			message: message.into(),
			details: None,
		}
	}

	pub fn authentication(message: impl Into<String>) -> Self {
		Self::Authentication { message: message.into() }
	}

	pub fn not_found(resource: impl Into<String>) -> Self {
		Self::NotFound { resource: resource.into() }
	}

	pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
		Self::ExternalService {
			service: service.into(),
			message: message.into(),
		}
	}

	pub fn timeout(message: impl Into<String>) -> Self {
		Self::Timeout { message: message.into() }
	}

	pub fn database(message: impl Into<String>) -> Self {
		Self::Database { message: message.into() }
	}

	pub fn business(message: impl Into<String>) -> Self {
		Self::BusinessLogic {
			message: message.into(),
			details: None,
		}
	}

	pub fn internal(message: impl Into<String>) -> Self {
		Self::Internal { message: message.into() }
	}

	#[must_use]
	pub const fn category(&self) -> ErrorCategory {
		match self {
			Self::Validation { .. } => ErrorCategory::Validation,
			Self::Authentication { .. } => ErrorCategory::Authentication,
			Self::Authorization { .. } => ErrorCategory::Authorization,
			Self::NotFound { .. } => ErrorCategory::NotFound,
			Self::ExternalService { .. } => ErrorCategory::ExternalService,
			Self::RateLimit { .. } => ErrorCategory::RateLimit,
			Self::Timeout { .. } => ErrorCategory::Timeout,
			Self::CircuitBreakerOpen { .. } => ErrorCategory::CircuitBreaker,
			Self::Database { .. } => ErrorCategory::Database,
			Self::BusinessLogic { .. } => ErrorCategory::BusinessLogic,
			Self::Internal { .. } => ErrorCategory::System,
		}
	}

	/// Stable machine-readable code carried on API responses and logs.
	#[must_use]
	pub const fn code(&self) -> &'static str {
		match self {
			Self::Validation { .. } => "VALIDATION_ERROR",
			Self::Authentication { .. } => "AUTHENTICATION_ERROR",
			Self::Authorization { .. } => "AUTHORIZATION_ERROR",
			Self::NotFound { .. } => "NOT_FOUND",
			Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
			Self::RateLimit { .. } => "RATE_LIMIT_EXCEEDED",
			Self::Timeout { .. } => "TIMEOUT",
			Self::CircuitBreakerOpen { .. } => "CIRCUIT_BREAKER_OPEN",
			Self::Database { .. } => "DATABASE_ERROR",
			Self::BusinessLogic { .. } => "BUSINESS_LOGIC_ERROR",
			Self::Internal { .. } => "INTERNAL_ERROR",
		}
	}

	/// Whether the queue may schedule another attempt for this failure.
	#[must_use]
	pub const fn is_retryable(&self) -> bool {
		match self {
			Self::ExternalService { .. } | Self::RateLimit { .. } | Self::Timeout { .. } | Self::CircuitBreakerOpen { .. } | Self::Database { .. } => true,
			Self::Validation { .. }
			| Self::Authentication { .. }
			| Self::Authorization { .. }
			| Self::NotFound { .. }
			| Self::BusinessLogic { .. }
			| Self::Internal { .. } => false,
		}
	}

	#[must_use]
	pub const fn status_code(&self) -> u16 {
		match self {
			Self::Validation { .. } => 400,
			Self::Authentication { .. } => 401,
			Self::Authorization { .. } => 403,
			Self::NotFound { .. } => 404,
			Self::ExternalService { .. } => 502,
			Self::RateLimit { .. } => 429,
			Self::Timeout { .. } => 408,
			Self::CircuitBreakerOpen { .. } => 503,
			Self::Database { .. } => 500,
			Self::BusinessLogic { .. } => 422,
			Self::Internal { .. } => 500,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn retryable_matches_category() {
		assert!(BridgeError::external("scribe", "boom").is_retryable());
		assert!(BridgeError::timeout("slow upload").is_retryable());
		assert!(BridgeError::database("locked").is_retryable());
		assert!(BridgeError::CircuitBreakerOpen { name: "scribe".into() }.is_retryable());
		assert!(BridgeError::RateLimit {
			message: "too many requests".into(),
			retry_after_secs: Some(30),
		}
		.is_retryable());

		assert!(!BridgeError::validation("bad payload").is_retryable());
		assert!(!BridgeError::authentication("invalid api key").is_retryable());
		assert!(!BridgeError::not_found("segment").is_retryable());
		assert!(!BridgeError::business("empty transcript").is_retryable());
	}

	#[test]
	fn status_codes() {
		assert_eq!(BridgeError::validation("x").status_code(), 400);
		assert_eq!(BridgeError::authentication("x").status_code(), 401);
		assert_eq!(BridgeError::not_found("x").status_code(), 404);
		assert_eq!(BridgeError::external("p", "x").status_code(), 502);
		assert_eq!(
			BridgeError::RateLimit {
				message: "x".into(),
				retry_after_secs: None
			}
			.status_code(),
			429
		);
		assert_eq!(BridgeError::timeout("x").status_code(), 408);
		assert_eq!(BridgeError::CircuitBreakerOpen { name: "p".into() }.status_code(), 503);
		assert_eq!(BridgeError::business("x").status_code(), 422);
	}

	#[test]
	fn codes_are_stable() {
		assert_eq!(BridgeError::validation("x").code(), "VALIDATION_ERROR");
		assert_eq!(BridgeError::CircuitBreakerOpen { name: "p".into() }.code(), "CIRCUIT_BREAKER_OPEN");
		assert_eq!(BridgeError::internal("x").code(), "INTERNAL_ERROR");
	}
}
