mod config;
mod error;
mod handlers;
mod metrics;
mod routes;
mod state;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt::format::JsonFields, util::SubscriberInitExt, Layer};

use bridge_core::{BlobStore, CompletionCoordinator, CompletionPolicy, TaskSegmentStore};
use bridge_store::{FsBlobStore, SqliteBridgeStore};
use circuit_breaker::{BreakerConfig, BreakerRegistry};
use scribe_client::{ScribeClient, ScribeConfig};
use segment_queue::{QueueConfig, SegmentQueue};
use webhooks::{DeliveryConfig, DeliveryService, WebhookDeliverer};

use config::Config;
use metrics::Metrics;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
	dotenvy::dotenv().ok();

	let config = Config::parse();
	config.validate().map_err(anyhow::Error::msg)?;
	init_tracing(&config);

	info!(
		port = config.port,
		callback_base_url = %config.callback_base_url,
		max_concurrent = config.max_concurrent_requests,
		segment_minutes = config.segment_duration_minutes,
		pump_interval_ms = config.pump_interval_ms,
		"🚀 starting transcription bridge"
	);

	let store: Arc<dyn TaskSegmentStore> = Arc::new(SqliteBridgeStore::connect(&config.database_url).await?);
	let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&config.blob_root));

	// One breaker per external dependency, shared by every dispatch.
	let breakers = BreakerRegistry::new();
	let scribe_breaker = breakers.get_or_create(
		"scribe",
		BreakerConfig {
			// Rejected inputs and bad credentials are the request's fault,
			// not the provider's health.
			expected_errors: vec!["invalid api key".to_owned(), "unauthorized".to_owned(), "validation".to_owned()],
			..BreakerConfig::default()
		},
	);

	let scribe = ScribeClient::new(ScribeConfig {
		timeout: Duration::from_secs(config.provider_timeout_secs),
		..ScribeConfig::new(config.provider_api_key.clone())
	})?;

	let deliverer = WebhookDeliverer::new(
		DeliveryConfig {
			timeout: Duration::from_secs(config.delivery_timeout_secs),
			..DeliveryConfig::default()
		},
		config.outbound_signing_secret.clone(),
	)?;
	let delivery = Arc::new(DeliveryService::new(deliverer, store.clone()));

	let policy = if config.lenient_completion { CompletionPolicy::Lenient } else { CompletionPolicy::Strict };
	let coordinator = Arc::new(CompletionCoordinator::new(store.clone(), delivery, policy));

	let queue = Arc::new(SegmentQueue::new(
		store.clone(),
		blobs.clone(),
		Arc::new(scribe),
		scribe_breaker,
		coordinator.clone(),
		QueueConfig {
			max_concurrent: config.max_concurrent_requests,
			..QueueConfig::default()
		},
	));

	let app_state = AppState {
		store,
		blobs,
		queue: queue.clone(),
		coordinator,
		metrics: Arc::new(Metrics::new()?),
		config: Arc::new(config.clone()),
	};

	let shutdown = CancellationToken::new();
	spawn_pump_ticker(&config, queue.clone(), shutdown.clone());
	spawn_cleanup_ticker(&config, queue, shutdown.clone());

	let app = routes::api_routes().with_state(app_state).layer(TraceLayer::new_for_http());

	let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
	info!(addr = %listener.local_addr()?, "listening");

	let server = axum::serve(listener, app);

	tokio::select! {
		result = server => {
			if let Err(e) = result {
				error!(error = %e, "server exited unexpectedly");
			}
		}
		() = wait_for_shutdown_signal() => {
			info!("🛑 shutdown signal received");
		}
	}

	shutdown.cancel();
	// Give the tickers a moment to notice before the process exits.
	tokio::time::sleep(Duration::from_millis(200)).await;
	info!("✅ shutdown complete");

	Ok(())
}

/// Long-lived deployments drive the queue internally; serverless ones
/// leave `pump_interval_ms` at 0 and rely on the pump endpoint.
fn spawn_pump_ticker(config: &Config, queue: Arc<SegmentQueue>, shutdown: CancellationToken) {
	if config.pump_interval_ms == 0 {
		info!("internal pump disabled, queue driven by the pump endpoint");
		return;
	}

	let interval = Duration::from_millis(config.pump_interval_ms);
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(interval);
		loop {
			tokio::select! {
				() = shutdown.cancelled() => break,
				_ = ticker.tick() => {
					if let Err(e) = queue.force_process(None).await {
						warn!(error = %e, "pump tick failed");
					}
				}
			}
		}
	});
}

fn spawn_cleanup_ticker(config: &Config, queue: Arc<SegmentQueue>, shutdown: CancellationToken) {
	let interval = Duration::from_secs(config.cleanup_interval_hours * 3600);
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(interval);
		// The first tick fires immediately; skip it.
		ticker.tick().await;
		loop {
			tokio::select! {
				() = shutdown.cancelled() => break,
				_ = ticker.tick() => {
					let swept = queue.cleanup_old_jobs(interval).await;
					info!(swept, "old queue jobs swept");
				}
			}
		}
	});
}

async fn wait_for_shutdown_signal() {
	let ctrl_c = async {
		signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}

fn init_tracing(config: &Config) {
	use tracing_subscriber::layer::SubscriberExt;

	let filter = EnvFilter::try_new(&config.rust_log).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::registry()
		.with(if config.log_json {
			Box::new(
				tracing_subscriber::fmt::layer()
					.fmt_fields(JsonFields::default())
					.event_format(tracing_subscriber::fmt::format().json().flatten_event(true).with_span_list(false))
					.with_filter(filter),
			) as Box<dyn Layer<_> + Send + Sync>
		} else {
			Box::new(tracing_subscriber::fmt::layer().with_filter(filter))
		})
		.init();
}
