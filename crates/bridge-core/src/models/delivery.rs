use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
	Delivered,
	Failed,
}

impl DeliveryStatus {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Delivered => "delivered",
			Self::Failed => "failed",
		}
	}
}

impl fmt::Display for DeliveryStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One outbound POST to the client callback URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
	pub attempt_number: u32,
	pub started_at: DateTime<Utc>,
	pub status_code: Option<u16>,
	pub response_body: Option<String>,
	pub error: Option<String>,
	pub success: bool,
}
