//! Pull-based service metrics, registered on a registry owned by the
//! app state rather than a process-wide default.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use bridge_core::BridgeError;

pub struct Metrics {
	registry: Registry,
	pub callbacks_total: IntCounterVec,
	pub pump_runs_total: IntCounter,
	pub pump_processed_total: IntCounter,
}

impl Metrics {
	/// # Errors
	/// Fails when a collector cannot be registered (duplicate names).
	pub fn new() -> Result<Self, BridgeError> {
		let registry = Registry::new();

		let callbacks_total = IntCounterVec::new(
			Opts::new("bridge_callbacks_total", "Provider callbacks received, by result"),
			&["result"],
		)
		.map_err(metrics_err)?;
		let pump_runs_total = IntCounter::new("bridge_pump_runs_total", "Queue pump invocations").map_err(metrics_err)?;
		let pump_processed_total = IntCounter::new("bridge_pump_processed_total", "Jobs dispatched by the pump").map_err(metrics_err)?;

		registry.register(Box::new(callbacks_total.clone())).map_err(metrics_err)?;
		registry.register(Box::new(pump_runs_total.clone())).map_err(metrics_err)?;
		registry.register(Box::new(pump_processed_total.clone())).map_err(metrics_err)?;

		Ok(Self {
			registry,
			callbacks_total,
			pump_runs_total,
			pump_processed_total,
		})
	}

	/// Text exposition format for the `/metrics` endpoint.
	#[must_use]
	pub fn render(&self) -> String {
		let mut buffer = Vec::new();
		let encoder = TextEncoder::new();
		if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
			return String::new();
		}
		String::from_utf8(buffer).unwrap_or_default()
	}
}

fn metrics_err(err: prometheus::Error) -> BridgeError {
	BridgeError::internal(format!("metrics registration failed: {err}"))
}
