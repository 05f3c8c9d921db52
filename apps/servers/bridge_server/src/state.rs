use std::sync::Arc;

use bridge_core::{BlobStore, CompletionCoordinator, TaskSegmentStore};
use segment_queue::SegmentQueue;

use crate::config::Config;
use crate::metrics::Metrics;

/// Everything a handler needs, built once at startup. No module-level
/// singletons anywhere in the service.
#[derive(Clone)]
pub struct AppState {
	pub store: Arc<dyn TaskSegmentStore>,
	pub blobs: Arc<dyn BlobStore>,
	pub queue: Arc<SegmentQueue>,
	pub coordinator: Arc<CompletionCoordinator>,
	pub metrics: Arc<Metrics>,
	pub config: Arc<Config>,
}
