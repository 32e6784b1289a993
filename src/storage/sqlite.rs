//! SQLite event backend
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers (API queries) never block the writer
//! - **Migrations**: Schema versioning with sqlx

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{EventBackend, EventQuery, HealthStatus};
use super::error::{StorageError, StorageResult};
use super::schema::EventRow;
use crate::Event;

pub struct SqliteEventBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteEventBackend {
    /// Opens (or creates) the database file and brings the schema up to date
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite event store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn row_to_event(row: SqliteRow) -> StorageResult<Event> {
        EventRow {
            id: Some(row.try_get("id")?),
            monitor_id: row.try_get("monitor_id")?,
            event_type: row.try_get("event_type")?,
            timestamp_ms: row.try_get("timestamp")?,
            message: row.try_get("message")?,
            value: row.try_get("value")?,
            threshold: row.try_get("threshold")?,
        }
        .into_event()
    }
}

#[async_trait]
impl EventBackend for SqliteEventBackend {
    #[instrument(skip(self, event), fields(monitor = event.monitor_id))]
    async fn append(&self, event: Event) -> StorageResult<i64> {
        let row = EventRow::from_event(&event);

        let result = sqlx::query(
            r#"
            INSERT INTO events (timestamp, monitor_id, event_type, message, value, threshold)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.timestamp_ms)
        .bind(row.monitor_id)
        .bind(&row.event_type)
        .bind(&row.message)
        .bind(row.value)
        .bind(row.threshold)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!("stored event {id}");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn query_range(&self, query: EventQuery) -> StorageResult<Vec<Event>> {
        let limit = query
            .limit
            .and_then(|limit| i64::try_from(limit).ok())
            .unwrap_or(-1);

        let rows = sqlx::query(
            r#"
            SELECT id, timestamp, monitor_id, event_type, message, value, threshold
            FROM events
            WHERE timestamp >= ? AND timestamp <= ?
              AND (? IS NULL OR monitor_id = ?)
            ORDER BY timestamp ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(query.start.timestamp_millis())
        .bind(query.end.timestamp_millis())
        .bind(query.monitor_id)
        .bind(query.monitor_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let events = rows
            .into_iter()
            .map(Self::row_to_event)
            .collect::<StorageResult<Vec<_>>>()?;
        debug!("query returned {} events", events.len());
        Ok(events)
    }

    #[instrument(skip(self))]
    async fn query_recent(&self, limit: usize) -> StorageResult<Vec<Event>> {
        let rows = sqlx::query(
            r#"
            SELECT id, timestamp, monitor_id, event_type, message, value, threshold
            FROM events
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    #[instrument(skip(self), fields(older_than = %older_than))]
    async fn prune(&self, older_than: DateTime<Utc>) -> StorageResult<usize> {
        let result = sqlx::query("DELETE FROM events WHERE timestamp < ?")
            .bind(older_than.timestamp_millis())
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} old events", deleted);
        Ok(deleted)
    }

    async fn count(&self) -> StorageResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite event store operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite event store");
        self.pool.close().await;
        Ok(())
    }
}
