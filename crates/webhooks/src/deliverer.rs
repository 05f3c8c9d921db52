//! At-least-once delivery of the final result to the client's callback
//! URL, with a bounded, jittered retry schedule and a per-attempt log.

use chrono::Utc;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info, warn};

use bridge_core::{BridgeError, DeliveryAttempt, DeliveryStatus};

use crate::payload::WebhookPayload;
use crate::signature::sign_body;

pub const USER_AGENT: &str = "TranscribeBridge/1";

const RESPONSE_BODY_LIMIT: usize = 1024;

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
	pub max_attempts: u32,
	/// Per-attempt timeout.
	pub timeout: Duration,
	pub base_delay_ms: u64,
	pub max_delay_ms: u64,
	/// Uniform jitter applied to each delay, as a fraction of it.
	pub jitter_ratio: f64,
	/// No jittered delay goes below this.
	pub min_delay_ms: u64,
}

impl Default for DeliveryConfig {
	fn default() -> Self {
		Self {
			max_attempts: 5,
			timeout: Duration::from_secs(30),
			base_delay_ms: 1000,
			max_delay_ms: 60_000,
			jitter_ratio: 0.25,
			min_delay_ms: 1000,
		}
	}
}

#[derive(Debug, Clone)]
pub struct DeliveryReport {
	pub final_status: DeliveryStatus,
	pub attempts: Vec<DeliveryAttempt>,
}

impl DeliveryReport {
	#[must_use]
	pub fn last_error(&self) -> Option<String> {
		self.attempts.last().and_then(|a| {
			a.error
				.clone()
				.or_else(|| a.status_code.map(|code| format!("endpoint answered {code}")))
		})
	}
}

pub struct WebhookDeliverer {
	http: reqwest::Client,
	config: DeliveryConfig,
	signing_secret: String,
}

impl WebhookDeliverer {
	/// # Errors
	/// Fails when the underlying HTTP client cannot be constructed.
	pub fn new(config: DeliveryConfig, signing_secret: impl Into<String>) -> Result<Self, BridgeError> {
		let http = reqwest::Client::builder()
			.timeout(config.timeout)
			.build()
			.map_err(|e| BridgeError::internal(format!("failed to build http client: {e}")))?;

		Ok(Self {
			http,
			config,
			signing_secret: signing_secret.into(),
		})
	}

	/// POST `payload` to `url` until a 2xx lands or the attempt budget is
	/// spent. The body is serialized once and reused byte-for-byte, so
	/// every attempt carries an identical payload.
	///
	/// # Errors
	/// Only serialization can fail; HTTP failures are recorded in the
	/// report, not returned.
	pub async fn deliver(&self, url: &str, payload: &WebhookPayload) -> Result<DeliveryReport, BridgeError> {
		let body = serde_json::to_string(payload).map_err(|e| BridgeError::internal(format!("failed to serialize webhook payload: {e}")))?;
		let signature = sign_body(&self.signing_secret, &body);

		let mut attempts = Vec::with_capacity(self.config.max_attempts as usize);

		for attempt_number in 1..=self.config.max_attempts {
			if attempt_number >= 2 {
				let delay = self.delay_before_attempt(attempt_number);
				debug!(url, attempt = attempt_number, delay_ms = delay.as_millis() as u64, "waiting before redelivery");
				tokio::time::sleep(delay).await;
			}

			let attempt = self.attempt(url, &body, &signature, attempt_number).await;
			let succeeded = attempt.success;
			attempts.push(attempt);

			if succeeded {
				info!(url, attempts = attempt_number, "webhook delivered");
				return Ok(DeliveryReport {
					final_status: DeliveryStatus::Delivered,
					attempts,
				});
			}
		}

		warn!(url, attempts = attempts.len(), "webhook delivery exhausted all attempts");
		Ok(DeliveryReport {
			final_status: DeliveryStatus::Failed,
			attempts,
		})
	}

	async fn attempt(&self, url: &str, body: &str, signature: &str, attempt_number: u32) -> DeliveryAttempt {
		let started_at = Utc::now();

		let result = self
			.http
			.post(url)
			.header("Content-Type", "application/json")
			.header("User-Agent", USER_AGENT)
			.header("X-Webhook-Timestamp", started_at.timestamp_millis().to_string())
			.header("X-Webhook-Attempt", attempt_number.to_string())
			.header("X-Webhook-Signature", signature)
			.body(body.to_owned())
			.send()
			.await;

		match result {
			Ok(response) => {
				let status = response.status().as_u16();
				let success = (200..300).contains(&status);
				let response_body = response.text().await.ok().map(|text| {
					if text.len() > RESPONSE_BODY_LIMIT {
						text.chars().take(RESPONSE_BODY_LIMIT).collect()
					} else {
						text
					}
				});

				if !success {
					warn!(url, attempt = attempt_number, status, "webhook attempt rejected");
				}

				DeliveryAttempt {
					attempt_number,
					started_at,
					status_code: Some(status),
					response_body,
					error: None,
					success,
				}
			}
			Err(err) => {
				let error = if err.is_timeout() { "timeout".to_owned() } else { err.to_string() };
				warn!(url, attempt = attempt_number, error = %error, "webhook attempt failed");

				DeliveryAttempt {
					attempt_number,
					started_at,
					status_code: None,
					response_body: None,
					error: Some(error),
					success: false,
				}
			}
		}
	}

	fn delay_before_attempt(&self, attempt_number: u32) -> Duration {
		let jitter = rand::thread_rng().gen_range(-self.config.jitter_ratio..=self.config.jitter_ratio);
		Duration::from_millis(jittered_delay_ms(&self.config, attempt_number, jitter))
	}
}

/// Delay before attempt `k ≥ 2`: `min(base × 2^(k−2), max)`, jittered by
/// the sampled fraction and floored at `min_delay_ms`.
fn jittered_delay_ms(config: &DeliveryConfig, attempt_number: u32, jitter: f64) -> u64 {
	let exponent = attempt_number.saturating_sub(2);
	let base = config.base_delay_ms.saturating_mul(2u64.saturating_pow(exponent));
	let capped = base.min(config.max_delay_ms);
	let jittered = (capped as f64 * (1.0 + jitter)).round() as u64;
	jittered.max(config.min_delay_ms)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn backoff_schedule_without_jitter() {
		let config = DeliveryConfig::default();
		assert_eq!(jittered_delay_ms(&config, 2, 0.0), 1000);
		assert_eq!(jittered_delay_ms(&config, 3, 0.0), 2000);
		assert_eq!(jittered_delay_ms(&config, 4, 0.0), 4000);
		assert_eq!(jittered_delay_ms(&config, 5, 0.0), 8000);
	}

	#[test]
	fn backoff_is_monotone_and_capped() {
		let config = DeliveryConfig::default();
		let mut prev = 0;
		for attempt in 2..=20 {
			let delay = jittered_delay_ms(&config, attempt, 0.0);
			assert!(delay >= prev, "attempt {attempt}");
			assert!(delay <= config.max_delay_ms);
			prev = delay;
		}
		assert_eq!(prev, config.max_delay_ms);
	}

	#[test]
	fn jitter_stays_within_bounds_and_floor() {
		let config = DeliveryConfig::default();

		// ±25% around 1000ms would dip to 750, but the floor holds.
		assert_eq!(jittered_delay_ms(&config, 2, -0.25), 1000);
		assert_eq!(jittered_delay_ms(&config, 2, 0.25), 1250);

		assert_eq!(jittered_delay_ms(&config, 4, -0.25), 3000);
		assert_eq!(jittered_delay_ms(&config, 4, 0.25), 5000);
	}
}
