#[derive(Debug, Clone)]
pub struct QueueConfig {
	/// Concurrency slots: at most this many jobs in flight.
	pub max_concurrent: usize,
	/// Whole attempts per job, first try included.
	pub max_attempts: u32,
	/// Milliseconds before the first retry.
	pub base_delay_ms: u64,
	/// Dimensionless backoff factor.
	pub backoff_multiplier: u32,
	/// Ceiling on any computed retry delay, milliseconds.
	pub max_delay_ms: u64,
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self {
			max_concurrent: 8,
			max_attempts: 3,
			base_delay_ms: 1000,
			backoff_multiplier: 2,
			max_delay_ms: 30_000,
		}
	}
}

/// Partial override for `configure`.
#[derive(Debug, Clone, Default)]
pub struct QueueConfigPatch {
	pub max_concurrent: Option<usize>,
	pub max_attempts: Option<u32>,
	pub base_delay_ms: Option<u64>,
	pub backoff_multiplier: Option<u32>,
	pub max_delay_ms: Option<u64>,
}

impl QueueConfig {
	pub fn apply(&mut self, patch: QueueConfigPatch) {
		if let Some(v) = patch.max_concurrent {
			self.max_concurrent = v;
		}
		if let Some(v) = patch.max_attempts {
			self.max_attempts = v;
		}
		if let Some(v) = patch.base_delay_ms {
			self.base_delay_ms = v;
		}
		if let Some(v) = patch.backoff_multiplier {
			self.backoff_multiplier = v;
		}
		if let Some(v) = patch.max_delay_ms {
			self.max_delay_ms = v;
		}
	}
}

/// Delay before the next try after `attempt` (1-based) failed:
/// `min(base × multiplier^(attempt−1), max)`.
#[must_use]
pub fn retry_delay_ms(config: &QueueConfig, attempt: u32) -> u64 {
	let factor = u64::from(config.backoff_multiplier).saturating_pow(attempt.saturating_sub(1));
	config.base_delay_ms.saturating_mul(factor).min(config.max_delay_ms)
}
