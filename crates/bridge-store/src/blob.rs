//! Filesystem-backed blob store. Blob paths map directly onto files
//! under a configured root directory.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;

use bridge_core::{BlobEntry, BlobStore, BridgeError};

pub struct FsBlobStore {
	root: PathBuf,
}

impl FsBlobStore {
	#[must_use]
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	fn resolve(&self, path: &str) -> Result<PathBuf, BridgeError> {
		let relative = Path::new(path);
		// Blob paths are relative keys; anything that climbs out of the
		// root is rejected.
		let climbs = relative.components().any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
		if climbs {
			return Err(BridgeError::validation(format!("invalid blob path '{path}'")));
		}
		Ok(self.root.join(relative))
	}
}

#[async_trait]
impl BlobStore for FsBlobStore {
	async fn upload(&self, path: &str, bytes: Vec<u8>, _content_type: &str) -> Result<(), BridgeError> {
		let target = self.resolve(path)?;
		if let Some(parent) = target.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| BridgeError::internal(format!("failed to create blob directory: {e}")))?;
		}

		fs::write(&target, bytes)
			.await
			.map_err(|e| BridgeError::internal(format!("failed to write blob '{path}': {e}")))?;

		debug!(path, "blob stored");
		Ok(())
	}

	async fn download(&self, path: &str) -> Result<Vec<u8>, BridgeError> {
		let target = self.resolve(path)?;
		match fs::read(&target).await {
			Ok(bytes) => Ok(bytes),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BridgeError::not_found(format!("blob {path}"))),
			Err(e) => Err(BridgeError::internal(format!("failed to read blob '{path}': {e}"))),
		}
	}

	async fn remove_many(&self, paths: &[String]) -> Result<(), BridgeError> {
		for path in paths {
			let target = self.resolve(path)?;
			match fs::remove_file(&target).await {
				Ok(()) => {}
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
				Err(e) => return Err(BridgeError::internal(format!("failed to remove blob '{path}': {e}"))),
			}
		}
		Ok(())
	}

	async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>, BridgeError> {
		let mut entries = Vec::new();
		let mut stack = vec![self.root.clone()];

		while let Some(dir) = stack.pop() {
			let mut reader = match fs::read_dir(&dir).await {
				Ok(reader) => reader,
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
				Err(e) => return Err(BridgeError::internal(format!("failed to list blobs: {e}"))),
			};

			while let Some(entry) = reader.next_entry().await.map_err(|e| BridgeError::internal(format!("failed to list blobs: {e}")))? {
				let path = entry.path();
				if path.is_dir() {
					stack.push(path);
					continue;
				}

				if let Ok(relative) = path.strip_prefix(&self.root) {
					let name = relative.to_string_lossy().replace('\\', "/");
					if name.starts_with(prefix) {
						entries.push(BlobEntry { name });
					}
				}
			}
		}

		entries.sort_by(|a, b| a.name.cmp(&b.name));
		Ok(entries)
	}
}
