//! SQLite-backed implementation of the task/segment store contract.
//!
//! All queries are runtime-checked with explicit binds. Terminal task
//! transitions and the completed-segment counter are guarded inside the
//! database (`WHERE status = 'processing'`, `completed_segments + 1`),
//! never with read-then-write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

use bridge_core::{BridgeError, NewSegment, NewTask, Segment, SegmentPatch, SegmentStatus, Task, TaskPatch, TaskSegmentStore, TaskStatus};

const SCHEMA: &str = include_str!("schema.sql");

#[derive(Clone)]
pub struct SqliteBridgeStore {
	pool: SqlitePool,
}

impl SqliteBridgeStore {
	/// Open (creating if missing) and apply the schema.
	///
	/// # Errors
	/// Returns `BridgeError::Database` when the database cannot be opened
	/// or the schema cannot be applied.
	pub async fn connect(url: &str) -> Result<Self, BridgeError> {
		let options = SqliteConnectOptions::from_str(url).map_err(db_err)?.create_if_missing(true);

		let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await.map_err(db_err)?;

		let store = Self { pool };
		store.apply_schema().await?;
		Ok(store)
	}

	/// Single-connection in-memory database, for tests and local runs.
	///
	/// # Errors
	/// Returns `BridgeError::Database` when the pool cannot be created.
	pub async fn in_memory() -> Result<Self, BridgeError> {
		let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(db_err)?;
		let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await.map_err(db_err)?;

		let store = Self { pool };
		store.apply_schema().await?;
		Ok(store)
	}

	async fn apply_schema(&self) -> Result<(), BridgeError> {
		for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
			sqlx::query(statement).execute(&self.pool).await.map_err(db_err)?;
		}
		debug!("store schema applied");
		Ok(())
	}

	async fn fetch_task(&self, task_id: &str) -> Result<Option<Task>, BridgeError> {
		let row = sqlx::query("SELECT * FROM tasks WHERE task_id = ?")
			.bind(task_id)
			.fetch_optional(&self.pool)
			.await
			.map_err(db_err)?;

		row.as_ref().map(task_from_row).transpose()
	}

	async fn fetch_segment(&self, segment_id: &str) -> Result<Option<Segment>, BridgeError> {
		let row = sqlx::query("SELECT * FROM segments WHERE segment_id = ?")
			.bind(segment_id)
			.fetch_optional(&self.pool)
			.await
			.map_err(db_err)?;

		row.as_ref().map(segment_from_row).transpose()
	}
}

#[async_trait]
impl TaskSegmentStore for SqliteBridgeStore {
	async fn create_task(&self, new: NewTask) -> Result<Task, BridgeError> {
		let task_id = Uuid::new_v4().to_string();
		let created_at = Utc::now();

		sqlx::query("INSERT INTO tasks (task_id, client_callback_url, original_filename, status, completed_segments, created_at) VALUES (?, ?, ?, ?, 0, ?)")
			.bind(&task_id)
			.bind(&new.client_callback_url)
			.bind(&new.original_filename)
			.bind(TaskStatus::Processing.as_str())
			.bind(created_at)
			.execute(&self.pool)
			.await
			.map_err(db_err)?;

		self.fetch_task(&task_id).await?.ok_or_else(|| BridgeError::database("task vanished after insert"))
	}

	async fn get_task(&self, task_id: &str) -> Result<Option<Task>, BridgeError> {
		self.fetch_task(task_id).await
	}

	async fn update_task(&self, task_id: &str, patch: TaskPatch) -> Result<Task, BridgeError> {
		let result = sqlx::query(
			"UPDATE tasks SET \
			 total_segments = COALESCE(?, total_segments), \
			 completed_segments = COALESCE(?, completed_segments), \
			 final_transcript = COALESCE(?, final_transcript), \
			 error_message = COALESCE(?, error_message), \
			 delivery_status = COALESCE(?, delivery_status), \
			 delivery_attempts = COALESCE(?, delivery_attempts), \
			 delivery_error = COALESCE(?, delivery_error), \
			 completed_at = COALESCE(?, completed_at) \
			 WHERE task_id = ?",
		)
		.bind(patch.total_segments)
		.bind(patch.completed_segments)
		.bind(patch.final_transcript)
		.bind(patch.error_message)
		.bind(patch.delivery_status.map(|s| s.as_str()))
		.bind(patch.delivery_attempts)
		.bind(patch.delivery_error)
		.bind(patch.completed_at)
		.bind(task_id)
		.execute(&self.pool)
		.await
		.map_err(db_err)?;

		if result.rows_affected() == 0 {
			return Err(BridgeError::not_found(format!("task {task_id}")));
		}

		self.fetch_task(task_id).await?.ok_or_else(|| BridgeError::not_found(format!("task {task_id}")))
	}

	async fn finalize_task(&self, task_id: &str, status: TaskStatus, patch: TaskPatch) -> Result<Option<Task>, BridgeError> {
		let result = sqlx::query(
			"UPDATE tasks SET \
			 status = ?, \
			 final_transcript = COALESCE(?, final_transcript), \
			 error_message = COALESCE(?, error_message), \
			 completed_at = COALESCE(?, completed_at) \
			 WHERE task_id = ? AND status = 'processing'",
		)
		.bind(status.as_str())
		.bind(patch.final_transcript)
		.bind(patch.error_message)
		.bind(patch.completed_at)
		.bind(task_id)
		.execute(&self.pool)
		.await
		.map_err(db_err)?;

		if result.rows_affected() == 0 {
			// Either unknown or already terminal; the caller treats both
			// as "someone else won the race" after existence is confirmed.
			return match self.fetch_task(task_id).await? {
				Some(_) => Ok(None),
				None => Err(BridgeError::not_found(format!("task {task_id}"))),
			};
		}

		self.fetch_task(task_id).await
	}

	async fn create_segment(&self, new: NewSegment) -> Result<Segment, BridgeError> {
		if !new.is_valid() {
			return Err(BridgeError::validation(format!(
				"segment bounds invalid: start={} end={}",
				new.start_seconds, new.end_seconds
			)));
		}

		let segment_id = Uuid::new_v4().to_string();
		let now = Utc::now();

		sqlx::query("INSERT INTO segments (segment_id, task_id, blob_path, start_seconds, end_seconds, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)")
			.bind(&segment_id)
			.bind(&new.task_id)
			.bind(&new.blob_path)
			.bind(new.start_seconds)
			.bind(new.end_seconds)
			.bind(SegmentStatus::Pending.as_str())
			.bind(now)
			.bind(now)
			.execute(&self.pool)
			.await
			.map_err(db_err)?;

		self
			.fetch_segment(&segment_id)
			.await?
			.ok_or_else(|| BridgeError::database("segment vanished after insert"))
	}

	async fn get_segment(&self, segment_id: &str) -> Result<Option<Segment>, BridgeError> {
		self.fetch_segment(segment_id).await
	}

	async fn update_segment(&self, segment_id: &str, patch: SegmentPatch) -> Result<Segment, BridgeError> {
		let result = sqlx::query(
			"UPDATE segments SET \
			 status = COALESCE(?, status), \
			 transcript_text = COALESCE(?, transcript_text), \
			 language_code = COALESCE(?, language_code), \
			 provider_request_id = COALESCE(?, provider_request_id), \
			 error_message = COALESCE(?, error_message), \
			 completed_at = COALESCE(?, completed_at), \
			 updated_at = ? \
			 WHERE segment_id = ?",
		)
		.bind(patch.status.map(|s| s.as_str()))
		.bind(patch.transcript_text)
		.bind(patch.language_code)
		.bind(patch.provider_request_id)
		.bind(patch.error_message)
		.bind(patch.completed_at)
		.bind(Utc::now())
		.bind(segment_id)
		.execute(&self.pool)
		.await
		.map_err(db_err)?;

		if result.rows_affected() == 0 {
			return Err(BridgeError::not_found(format!("segment {segment_id}")));
		}

		self
			.fetch_segment(segment_id)
			.await?
			.ok_or_else(|| BridgeError::not_found(format!("segment {segment_id}")))
	}

	async fn get_segments_by_task_id(&self, task_id: &str) -> Result<Vec<Segment>, BridgeError> {
		let rows = sqlx::query("SELECT * FROM segments WHERE task_id = ? ORDER BY start_seconds ASC")
			.bind(task_id)
			.fetch_all(&self.pool)
			.await
			.map_err(db_err)?;

		rows.iter().map(segment_from_row).collect()
	}

	async fn find_segment_by_provider_request_id(&self, request_id: &str) -> Result<Option<Segment>, BridgeError> {
		let row = sqlx::query("SELECT * FROM segments WHERE provider_request_id = ?")
			.bind(request_id)
			.fetch_optional(&self.pool)
			.await
			.map_err(db_err)?;

		row.as_ref().map(segment_from_row).transpose()
	}

	async fn increment_completed_segments(&self, task_id: &str) -> Result<Task, BridgeError> {
		let result = sqlx::query("UPDATE tasks SET completed_segments = completed_segments + 1 WHERE task_id = ?")
			.bind(task_id)
			.execute(&self.pool)
			.await
			.map_err(db_err)?;

		if result.rows_affected() == 0 {
			return Err(BridgeError::not_found(format!("task {task_id}")));
		}

		self.fetch_task(task_id).await?.ok_or_else(|| BridgeError::not_found(format!("task {task_id}")))
	}

	async fn list_pending_segments(&self) -> Result<Vec<Segment>, BridgeError> {
		let rows = sqlx::query("SELECT * FROM segments WHERE status = 'pending' ORDER BY task_id, start_seconds ASC")
			.fetch_all(&self.pool)
			.await
			.map_err(db_err)?;

		rows.iter().map(segment_from_row).collect()
	}

	async fn count_tasks(&self, status: Option<TaskStatus>) -> Result<i64, BridgeError> {
		let count: i64 = match status {
			Some(status) => sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE status = ?")
				.bind(status.as_str())
				.fetch_one(&self.pool)
				.await
				.map_err(db_err)?,
			None => sqlx::query_scalar("SELECT COUNT(*) FROM tasks").fetch_one(&self.pool).await.map_err(db_err)?,
		};

		Ok(count)
	}
}

fn db_err(err: sqlx::Error) -> BridgeError {
	BridgeError::database(err.to_string())
}

fn task_from_row(row: &SqliteRow) -> Result<Task, BridgeError> {
	let status: String = row.try_get("status").map_err(db_err)?;
	let delivery_status: Option<String> = row.try_get("delivery_status").map_err(db_err)?;

	Ok(Task {
		task_id: row.try_get("task_id").map_err(db_err)?,
		client_callback_url: row.try_get("client_callback_url").map_err(db_err)?,
		original_filename: row.try_get("original_filename").map_err(db_err)?,
		status: status.parse()?,
		total_segments: row.try_get("total_segments").map_err(db_err)?,
		completed_segments: row.try_get("completed_segments").map_err(db_err)?,
		final_transcript: row.try_get("final_transcript").map_err(db_err)?,
		error_message: row.try_get("error_message").map_err(db_err)?,
		delivery_status: match delivery_status.as_deref() {
			Some("delivered") => Some(bridge_core::DeliveryStatus::Delivered),
			Some("failed") => Some(bridge_core::DeliveryStatus::Failed),
			_ => None,
		},
		delivery_attempts: row.try_get("delivery_attempts").map_err(db_err)?,
		delivery_error: row.try_get("delivery_error").map_err(db_err)?,
		created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(db_err)?,
		completed_at: row.try_get::<Option<DateTime<Utc>>, _>("completed_at").map_err(db_err)?,
	})
}

fn segment_from_row(row: &SqliteRow) -> Result<Segment, BridgeError> {
	let status: String = row.try_get("status").map_err(db_err)?;

	Ok(Segment {
		segment_id: row.try_get("segment_id").map_err(db_err)?,
		task_id: row.try_get("task_id").map_err(db_err)?,
		blob_path: row.try_get("blob_path").map_err(db_err)?,
		start_seconds: row.try_get("start_seconds").map_err(db_err)?,
		end_seconds: row.try_get("end_seconds").map_err(db_err)?,
		status: status.parse()?,
		transcript_text: row.try_get("transcript_text").map_err(db_err)?,
		language_code: row.try_get("language_code").map_err(db_err)?,
		provider_request_id: row.try_get("provider_request_id").map_err(db_err)?,
		error_message: row.try_get("error_message").map_err(db_err)?,
		created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(db_err)?,
		updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(db_err)?,
		completed_at: row.try_get::<Option<DateTime<Utc>>, _>("completed_at").map_err(db_err)?,
	})
}
