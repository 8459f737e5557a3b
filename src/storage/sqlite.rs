//! SQLite storage backend implementation
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Status reads are not blocked by history writes
//! - **Connection pooling**: Shared between the scheduler and all workers
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! Timestamps are stored as unix nanoseconds so that a stored
//! `last_outcome_at` compares equal to the outcome it came from.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use crate::model::{FailureReason, Monitor, MonitorStatus, ProbeKind, ProbeOutcome, StatusRecord};

const MONITOR_COLUMNS: &str =
    "id, name, target, kind, interval_ms, active, notifications, status, last_checked";

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Open (or create) the database and run migrations
    ///
    /// ```no_run
    /// # use uptime_engine::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./uptime.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn to_nanos(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_nanos_opt().unwrap_or(i64::MAX)
    }

    fn from_nanos(nanos: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(nanos)
    }

    fn decode<T: std::str::FromStr<Err = String>>(raw: &str) -> StorageResult<T> {
        raw.parse().map_err(StorageError::Malformed)
    }

    fn monitor_from_row(row: &SqliteRow) -> StorageResult<Monitor> {
        let kind: String = row.try_get("kind")?;
        let status: String = row.try_get("status")?;
        let notifications: String = row.try_get("notifications")?;

        Ok(Monitor {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            target: row.try_get("target")?,
            kind: Self::decode::<ProbeKind>(&kind)?,
            interval: Duration::from_millis(row.try_get::<i64, _>("interval_ms")?.max(0) as u64),
            active: row.try_get("active")?,
            notifications: serde_json::from_str(&notifications)?,
            status: Self::decode::<MonitorStatus>(&status)?,
            last_checked: row
                .try_get::<Option<i64>, _>("last_checked")?
                .map(Self::from_nanos),
        })
    }

    fn status_from_row(row: &SqliteRow) -> StorageResult<StatusRecord> {
        let status: String = row.try_get("status")?;
        let last_reason: Option<String> = row.try_get("last_reason")?;

        Ok(StatusRecord {
            monitor_id: row.try_get("monitor_id")?,
            status: Self::decode::<MonitorStatus>(&status)?,
            consecutive_failures: row.try_get::<i64, _>("consecutive_failures")? as u32,
            consecutive_successes: row.try_get::<i64, _>("consecutive_successes")? as u32,
            last_transition_at: row
                .try_get::<Option<i64>, _>("last_transition_at")?
                .map(Self::from_nanos),
            last_outcome_at: row
                .try_get::<Option<i64>, _>("last_outcome_at")?
                .map(Self::from_nanos),
            last_reason: last_reason
                .as_deref()
                .map(Self::decode::<FailureReason>)
                .transpose()?,
            last_message: row.try_get("last_message")?,
        })
    }

    fn outcome_from_row(row: &SqliteRow) -> StorageResult<ProbeOutcome> {
        let reason: Option<String> = row.try_get("reason")?;

        Ok(ProbeOutcome {
            monitor_id: row.try_get("monitor_id")?,
            timestamp: Self::from_nanos(row.try_get("timestamp")?),
            success: row.try_get("success")?,
            latency: Duration::from_millis(row.try_get::<i64, _>("latency_ms")?.max(0) as u64),
            reason: reason
                .as_deref()
                .map(Self::decode::<FailureReason>)
                .transpose()?,
            status_code: row
                .try_get::<Option<i64>, _>("status_code")?
                .map(|code| code as u16),
            message: row.try_get("message")?,
        })
    }

    async fn write_status<'e, E>(executor: E, record: &StatusRecord) -> StorageResult<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO statuses (
                monitor_id, status, consecutive_failures, consecutive_successes,
                last_transition_at, last_outcome_at, last_reason, last_message
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (monitor_id) DO UPDATE SET
                status = excluded.status,
                consecutive_failures = excluded.consecutive_failures,
                consecutive_successes = excluded.consecutive_successes,
                last_transition_at = excluded.last_transition_at,
                last_outcome_at = excluded.last_outcome_at,
                last_reason = excluded.last_reason,
                last_message = excluded.last_message
            "#,
        )
        .bind(&record.monitor_id)
        .bind(record.status.to_string())
        .bind(i64::from(record.consecutive_failures))
        .bind(i64::from(record.consecutive_successes))
        .bind(record.last_transition_at.as_ref().map(Self::to_nanos))
        .bind(record.last_outcome_at.as_ref().map(Self::to_nanos))
        .bind(record.last_reason.map(|r| r.to_string()))
        .bind(&record.last_message)
        .execute(executor)
        .await?;

        Ok(())
    }

    async fn write_monitor_status<'e, E>(executor: E, record: &StatusRecord) -> StorageResult<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query("UPDATE monitors SET status = ? WHERE id = ?")
            .bind(record.status.to_string())
            .bind(&record.monitor_id)
            .execute(executor)
            .await?;

        Ok(())
    }

    async fn write_check<'e, E>(executor: E, outcome: &ProbeOutcome) -> StorageResult<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO checks (monitor_id, timestamp, success, latency_ms, reason, status_code, message)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&outcome.monitor_id)
        .bind(Self::to_nanos(&outcome.timestamp))
        .bind(outcome.success)
        .bind(outcome.latency.as_millis() as i64)
        .bind(outcome.reason.map(|r| r.to_string()))
        .bind(outcome.status_code.map(i64::from))
        .bind(&outcome.message)
        .execute(executor)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self))]
    async fn load_active_monitors(&self) -> StorageResult<Vec<Monitor>> {
        let sql = format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE active = 1 ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let monitors = rows
            .iter()
            .map(Self::monitor_from_row)
            .collect::<StorageResult<Vec<_>>>()?;
        debug!("loaded {} active monitors", monitors.len());
        Ok(monitors)
    }

    async fn load_monitors(&self) -> StorageResult<Vec<Monitor>> {
        let sql = format!("SELECT {MONITOR_COLUMNS} FROM monitors ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::monitor_from_row).collect()
    }

    async fn load_monitor(&self, monitor_id: &str) -> StorageResult<Option<Monitor>> {
        let sql = format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(monitor_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::monitor_from_row).transpose()
    }

    #[instrument(skip(self, monitor), fields(monitor = %monitor.id))]
    async fn upsert_monitor(&self, monitor: &Monitor) -> StorageResult<()> {
        let notifications = serde_json::to_string(&monitor.notifications)?;

        sqlx::query(
            r#"
            INSERT INTO monitors (id, name, target, kind, interval_ms, active, notifications)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                target = excluded.target,
                kind = excluded.kind,
                interval_ms = excluded.interval_ms,
                active = excluded.active,
                notifications = excluded.notifications
            "#,
        )
        .bind(&monitor.id)
        .bind(&monitor.name)
        .bind(&monitor.target)
        .bind(monitor.kind.to_string())
        .bind(monitor.interval.as_millis() as i64)
        .bind(monitor.active)
        .bind(notifications)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_monitor(&self, monitor_id: &str) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        for sql in [
            "DELETE FROM checks WHERE monitor_id = ?",
            "DELETE FROM statuses WHERE monitor_id = ?",
            "DELETE FROM monitors WHERE id = ?",
        ] {
            sqlx::query(sql).bind(monitor_id).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_status(&self, monitor_id: &str) -> StorageResult<Option<StatusRecord>> {
        let row = sqlx::query(
            r#"
            SELECT monitor_id, status, consecutive_failures, consecutive_successes,
                   last_transition_at, last_outcome_at, last_reason, last_message
            FROM statuses
            WHERE monitor_id = ?
            "#,
        )
        .bind(monitor_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::status_from_row).transpose()
    }

    async fn save_status(&self, record: &StatusRecord) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::write_status(&mut *tx, record).await?;
        Self::write_monitor_status(&mut *tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn append_history(&self, outcome: &ProbeOutcome) -> StorageResult<()> {
        Self::write_check(&self.pool, outcome).await
    }

    #[instrument(skip(self, record, outcome), fields(monitor = %record.monitor_id))]
    async fn commit_check(&self, record: &StatusRecord, outcome: &ProbeOutcome) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::write_status(&mut *tx, record).await?;
        Self::write_monitor_status(&mut *tx, record).await?;
        Self::write_check(&mut *tx, outcome).await?;
        tx.commit().await?;

        debug!("committed check ({})", record.status);
        Ok(())
    }

    async fn latest_checks(&self, monitor_id: &str, limit: usize) -> StorageResult<Vec<ProbeOutcome>> {
        let rows = sqlx::query(
            r#"
            SELECT monitor_id, timestamp, success, latency_ms, reason, status_code, message
            FROM checks
            WHERE monitor_id = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(monitor_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut checks = rows
            .iter()
            .map(Self::outcome_from_row)
            .collect::<StorageResult<Vec<_>>>()?;
        // Reverse to get chronological order (oldest first)
        checks.reverse();
        Ok(checks)
    }

    async fn update_scheduling_meta(
        &self,
        monitor_id: &str,
        last_checked: DateTime<Utc>,
        next_due: DateTime<Utc>,
    ) -> StorageResult<()> {
        let result = sqlx::query("UPDATE monitors SET last_checked = ?, next_due = ? WHERE id = ?")
            .bind(Self::to_nanos(&last_checked))
            .bind(Self::to_nanos(&next_due))
            .bind(monitor_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(monitor_id.to_string()));
        }
        Ok(())
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
                    message: "SQLite backend operational".to_string(),
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
        info!("closing SQLite connection pool");
        self.pool.close().await;
        Ok(())
    }
}
