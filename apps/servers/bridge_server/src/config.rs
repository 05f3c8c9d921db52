use clap::Parser;

/// Deployment configuration. The required settings have no default on
/// purpose: a deployment missing its provider key, store location, or
/// callback base fails at startup, not at first use.
#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
	#[arg(long, env = "PORT", default_value = "3000", help = "HTTP listen port")]
	pub port: u16,

	#[arg(long, env = "DATABASE_URL", help = "SQLite database URL, e.g. sqlite://bridge.db")]
	pub database_url: String,

	#[arg(long, env = "BLOB_ROOT", default_value = "./data/blobs", help = "Root directory for stored audio blobs")]
	pub blob_root: String,

	#[arg(long, env = "CALLBACK_BASE_URL", help = "Public base URL the provider's webhook is configured against")]
	pub callback_base_url: String,

	#[arg(long, env = "PROVIDER_API_KEY", help = "API key for the transcription provider")]
	pub provider_api_key: String,

	#[arg(long, env = "PROVIDER_WEBHOOK_SECRET", help = "Shared secret for inbound callback signatures; permissive when unset")]
	pub provider_webhook_secret: Option<String>,

	#[arg(long, env = "OUTBOUND_SIGNING_SECRET", help = "HMAC secret for signing outbound client notifications")]
	pub outbound_signing_secret: String,

	#[arg(long, env = "MAX_CONCURRENT_REQUESTS", default_value = "8", help = "Concurrency slots for provider dispatches")]
	pub max_concurrent_requests: usize,

	#[arg(long, env = "SEGMENT_DURATION_MINUTES", default_value = "15", help = "Segment length the splitter produces")]
	pub segment_duration_minutes: u64,

	#[arg(long, env = "CLEANUP_INTERVAL_HOURS", default_value = "24", help = "How often terminal queue jobs are swept")]
	pub cleanup_interval_hours: u64,

	#[arg(long, env = "PUMP_INTERVAL_MS", default_value = "0", help = "Internal pump interval; 0 relies on the external pump endpoint")]
	pub pump_interval_ms: u64,

	#[arg(long, env = "PROVIDER_TIMEOUT_SECS", default_value = "300", help = "Per-call deadline for provider dispatches")]
	pub provider_timeout_secs: u64,

	#[arg(long, env = "DELIVERY_TIMEOUT_SECS", default_value = "30", help = "Per-attempt timeout for outbound deliveries")]
	pub delivery_timeout_secs: u64,

	#[arg(long, env = "LENIENT_COMPLETION", help = "Assemble from completed segments even when some failed")]
	pub lenient_completion: bool,

	#[arg(long, env = "RUST_LOG", default_value = "info", help = "Tracing filter directive")]
	pub rust_log: String,

	#[arg(long, env = "LOG_JSON", help = "Emit logs as JSON")]
	pub log_json: bool,
}

impl Config {
	/// # Errors
	/// Returns a description of the first nonsensical setting.
	pub fn validate(&self) -> Result<(), String> {
		if self.max_concurrent_requests == 0 {
			return Err("MAX_CONCURRENT_REQUESTS must be at least 1".to_owned());
		}
		if self.segment_duration_minutes == 0 {
			return Err("SEGMENT_DURATION_MINUTES must be at least 1".to_owned());
		}
		if self.outbound_signing_secret.is_empty() {
			return Err("OUTBOUND_SIGNING_SECRET must not be empty".to_owned());
		}
		Ok(())
	}
}
