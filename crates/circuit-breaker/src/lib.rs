//! Per-dependency circuit breaker.
//!
//! One breaker guards one named external dependency and is shared by all
//! concurrent callers. State lives behind a plain mutex; the guarded
//! future is never awaited while the lock is held.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct BreakerConfig {
	/// Consecutive counted failures before the breaker opens.
	pub failure_threshold: u32,
	/// How long an open breaker rejects before allowing a probe.
	pub recovery_timeout: Duration,
	/// Error-message substrings (matched case-insensitively) that
	/// propagate to the caller without counting toward the threshold.
	pub expected_errors: Vec<String>,
}

impl Default for BreakerConfig {
	fn default() -> Self {
		Self {
			failure_threshold: DEFAULT_FAILURE_THRESHOLD,
			recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
			expected_errors: Vec::new(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
	Closed,
	Open,
	HalfOpen,
}

impl fmt::Display for BreakerState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Closed => f.write_str("closed"),
			Self::Open => f.write_str("open"),
			Self::HalfOpen => f.write_str("half_open"),
		}
	}
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
	#[error("circuit breaker '{name}' is open")]
	Open { name: String },

	#[error(transparent)]
	Inner(E),
}

#[derive(Debug)]
struct Inner {
	state: BreakerState,
	consecutive_failures: u32,
	next_attempt_at: Option<Instant>,
	/// A half-open breaker admits exactly one in-flight probe.
	probing: bool,
}

pub struct CircuitBreaker {
	name: String,
	config: BreakerConfig,
	inner: Mutex<Inner>,
}

impl CircuitBreaker {
	#[must_use]
	pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
		Self {
			name: name.into(),
			config,
			inner: Mutex::new(Inner {
				state: BreakerState::Closed,
				consecutive_failures: 0,
				next_attempt_at: None,
				probing: false,
			}),
		}
	}

	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	#[must_use]
	pub fn state(&self) -> BreakerState {
		self.inner.lock().expect("breaker lock poisoned").state
	}

	/// Run `fut` through the breaker.
	///
	/// # Errors
	/// `BreakerError::Open` when the breaker rejects the call without
	/// executing it; `BreakerError::Inner` carries the dependency's own
	/// failure through.
	pub async fn call<T, E, Fut>(&self, fut: Fut) -> Result<T, BreakerError<E>>
	where
		E: fmt::Display,
		Fut: Future<Output = Result<T, E>>,
	{
		self.admit()?;

		match fut.await {
			Ok(value) => {
				self.on_success();
				Ok(value)
			}
			Err(err) => {
				self.on_failure(&err.to_string());
				Err(BreakerError::Inner(err))
			}
		}
	}

	fn admit<E>(&self) -> Result<(), BreakerError<E>> {
		let mut inner = self.inner.lock().expect("breaker lock poisoned");
		match inner.state {
			BreakerState::Closed => Ok(()),
			BreakerState::Open => {
				let due = inner.next_attempt_at.is_some_and(|at| Instant::now() >= at);
				if due {
					info!(breaker = %self.name, "circuit breaker half-open, allowing probe");
					inner.state = BreakerState::HalfOpen;
					inner.probing = true;
					Ok(())
				} else {
					Err(BreakerError::Open { name: self.name.clone() })
				}
			}
			BreakerState::HalfOpen => {
				if inner.probing {
					Err(BreakerError::Open { name: self.name.clone() })
				} else {
					inner.probing = true;
					Ok(())
				}
			}
		}
	}

	fn on_success(&self) {
		let mut inner = self.inner.lock().expect("breaker lock poisoned");
		if inner.state != BreakerState::Closed {
			info!(breaker = %self.name, "circuit breaker closed");
		}
		inner.state = BreakerState::Closed;
		inner.consecutive_failures = 0;
		inner.next_attempt_at = None;
		inner.probing = false;
	}

	fn on_failure(&self, message: &str) {
		let expected = {
			let needle = message.to_lowercase();
			self.config.expected_errors.iter().any(|e| needle.contains(&e.to_lowercase()))
		};

		let mut inner = self.inner.lock().expect("breaker lock poisoned");
		inner.probing = false;

		if expected {
			// Propagates to the caller but does not count toward opening.
			return;
		}

		match inner.state {
			BreakerState::HalfOpen => {
				warn!(breaker = %self.name, "probe failed, circuit breaker re-opened");
				inner.state = BreakerState::Open;
				inner.next_attempt_at = Some(Instant::now() + self.config.recovery_timeout);
			}
			BreakerState::Closed | BreakerState::Open => {
				inner.consecutive_failures += 1;
				if inner.state == BreakerState::Closed && inner.consecutive_failures >= self.config.failure_threshold {
					warn!(
						breaker = %self.name,
						failures = inner.consecutive_failures,
						recovery_secs = self.config.recovery_timeout.as_secs(),
						"failure threshold reached, circuit breaker opened"
					);
					inner.state = BreakerState::Open;
					inner.next_attempt_at = Some(Instant::now() + self.config.recovery_timeout);
				}
			}
		}
	}
}

/// Breakers keyed by dependency name, built at startup and passed
/// explicitly to whoever dials out.
#[derive(Default)]
pub struct BreakerRegistry {
	breakers: RwLock<HashMap<String, std::sync::Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get_or_create(&self, name: &str, config: BreakerConfig) -> std::sync::Arc<CircuitBreaker> {
		if let Some(existing) = self.breakers.read().expect("registry lock poisoned").get(name) {
			return existing.clone();
		}

		let mut breakers = self.breakers.write().expect("registry lock poisoned");
		breakers
			.entry(name.to_owned())
			.or_insert_with(|| std::sync::Arc::new(CircuitBreaker::new(name, config)))
			.clone()
	}

	#[must_use]
	pub fn get(&self, name: &str) -> Option<std::sync::Arc<CircuitBreaker>> {
		self.breakers.read().expect("registry lock poisoned").get(name).cloned()
	}
}
