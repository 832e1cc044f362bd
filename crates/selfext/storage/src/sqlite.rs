//! SQLite adapter.
//!
//! The ledger table is guarded by triggers that abort any UPDATE or DELETE,
//! so the append-only contract holds even for ad-hoc SQL against the file.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use selfext_provenance::canonical_json;
use selfext_types::{
    LifecycleAppend, LifecycleEvent, LifecycleEventType, LifecycleReceipt, PromotionControlState,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tokio::sync::Mutex;
use tracing::debug;

use crate::chain::{compute_event_hash, timestamp_text};
use crate::normalize::normalize;
use crate::traits::{LifecycleLedger, PromotionControlStore, QueryWindow};
use crate::{StorageError, StorageResult};

const EVENT_COLUMNS: &str = "id, run_id, correlation_id, stage, event_type, actor_source, \
     tool_name, tool_call_id, goal_id, cycle_id, sub_goal_id, payload, created_at, \
     previous_hash, hash";

/// SQLite-backed storage adapter.
pub struct SqliteStore {
    pool: SqlitePool,
    // Serialises read-last-then-insert within this process.
    append_lock: Mutex<()>,
}

impl SqliteStore {
    /// Connect and initialize the schema.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::connect_with_options(database_url, 5).await
    }

    /// Connect with an explicit pool size. In-memory databases always use a
    /// single, never-recycled connection so the data outlives idle periods.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
    ) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StorageError::Config(format!("bad sqlite url: {e}")))?
            .create_if_missing(true);

        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect sqlite: {e}")))?;
        Self::from_pool(pool).await
    }

    /// Create adapter from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> StorageResult<Self> {
        let store = Self {
            pool,
            append_lock: Mutex::new(()),
        };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> StorageResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS self_extension_lifecycle_events (
                id INTEGER PRIMARY KEY,
                run_id TEXT NOT NULL,
                correlation_id TEXT,
                stage TEXT NOT NULL,
                event_type TEXT NOT NULL,
                actor_source TEXT NOT NULL,
                tool_name TEXT,
                tool_call_id TEXT,
                goal_id TEXT,
                cycle_id TEXT,
                sub_goal_id TEXT,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                previous_hash TEXT,
                hash TEXT NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_self_extension_events_run
                ON self_extension_lifecycle_events (run_id, id)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_self_extension_events_type
                ON self_extension_lifecycle_events (event_type, id)
            "#,
            r#"
            CREATE TRIGGER IF NOT EXISTS self_extension_events_no_update
            BEFORE UPDATE ON self_extension_lifecycle_events
            BEGIN
                SELECT RAISE(ABORT, 'lifecycle events are append-only');
            END
            "#,
            r#"
            CREATE TRIGGER IF NOT EXISTS self_extension_events_no_delete
            BEFORE DELETE ON self_extension_lifecycle_events
            BEGIN
                SELECT RAISE(ABORT, 'lifecycle events are append-only');
            END
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS self_extension_promotion_control (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                paused INTEGER NOT NULL,
                reason TEXT,
                updated_by TEXT,
                updated_at TEXT
            )
            "#,
        ];

        for statement in ddl {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }

    async fn fetch_events(
        &self,
        sql: &str,
        binds: EventQuery<'_>,
    ) -> StorageResult<Vec<LifecycleEvent>> {
        let query = sqlx::query(sql);
        let query = match binds {
            EventQuery::None => query,
            EventQuery::Text(value) => query.bind(value),
            EventQuery::Window(window) => query
                .bind(limit_value(window)?)
                .bind(to_i64(window.offset)?),
        };
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        rows.iter().map(row_to_event).collect()
    }
}

enum EventQuery<'a> {
    None,
    Text(&'a str),
    Window(QueryWindow),
}

#[async_trait]
impl LifecycleLedger for SqliteStore {
    async fn append(&self, event: LifecycleAppend) -> StorageResult<LifecycleReceipt> {
        let _guard = self.append_lock.lock().await;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let last = sqlx::query(
            "SELECT id, hash FROM self_extension_lifecycle_events ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        let (id, previous_hash) = match last {
            Some(row) => {
                let id: i64 = row
                    .try_get("id")
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
                let hash: String = row
                    .try_get("hash")
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
                (id + 1, Some(hash))
            }
            None => (1_i64, None),
        };

        let pending = normalize(event, Utc::now());
        let hash = compute_event_hash(id, &pending, previous_hash.as_deref());
        let stored = pending.into_event(id, previous_hash, hash);

        sqlx::query(
            r#"
            INSERT INTO self_extension_lifecycle_events
                (id, run_id, correlation_id, stage, event_type, actor_source, tool_name,
                 tool_call_id, goal_id, cycle_id, sub_goal_id, payload, created_at,
                 previous_hash, hash)
            VALUES
                (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(stored.id)
        .bind(&stored.run_id)
        .bind(&stored.correlation_id)
        .bind(&stored.stage)
        .bind(stored.event_type.as_str())
        .bind(&stored.actor_source)
        .bind(&stored.tool_name)
        .bind(&stored.tool_call_id)
        .bind(&stored.goal_id)
        .bind(&stored.cycle_id)
        .bind(&stored.sub_goal_id)
        .bind(canonical_json(&stored.payload))
        .bind(timestamp_text(&stored.created_at))
        .bind(&stored.previous_hash)
        .bind(&stored.hash)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_conflict)?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        debug!(id = stored.id, run_id = %stored.run_id, event_type = %stored.event_type, "Appended lifecycle event");
        Ok(stored.receipt())
    }

    async fn list_run(&self, run_id: &str) -> StorageResult<Vec<LifecycleEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM self_extension_lifecycle_events \
             WHERE run_id = ? ORDER BY id ASC"
        );
        self.fetch_events(&sql, EventQuery::Text(run_id)).await
    }

    async fn list_recent(&self, window: QueryWindow) -> StorageResult<Vec<LifecycleEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM self_extension_lifecycle_events \
             ORDER BY id DESC LIMIT ? OFFSET ?"
        );
        self.fetch_events(&sql, EventQuery::Window(window)).await
    }

    async fn latest_per_run(&self, window: QueryWindow) -> StorageResult<Vec<LifecycleEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM self_extension_lifecycle_events \
             WHERE id IN (SELECT MAX(id) FROM self_extension_lifecycle_events GROUP BY run_id) \
             ORDER BY id DESC LIMIT ? OFFSET ?"
        );
        self.fetch_events(&sql, EventQuery::Window(window)).await
    }

    async fn latest_of_type(
        &self,
        event_type: LifecycleEventType,
    ) -> StorageResult<Option<LifecycleEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM self_extension_lifecycle_events \
             WHERE event_type = ? ORDER BY id DESC LIMIT 1"
        );
        let mut rows = self
            .fetch_events(&sql, EventQuery::Text(event_type.as_str()))
            .await?;
        Ok(rows.pop())
    }
}

#[async_trait]
impl PromotionControlStore for SqliteStore {
    async fn get_control(&self) -> StorageResult<Option<PromotionControlState>> {
        let row = sqlx::query(
            "SELECT paused, reason, updated_by, updated_at \
             FROM self_extension_promotion_control WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(PromotionControlState {
            paused: row
                .try_get::<i64, _>("paused")
                .map_err(|e| StorageError::Backend(e.to_string()))?
                != 0,
            reason: row
                .try_get("reason")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
            updated_by: row
                .try_get("updated_by")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
            updated_at: row
                .try_get::<Option<String>, _>("updated_at")
                .map_err(|e| StorageError::Backend(e.to_string()))?
                .map(|text| parse_timestamp(&text))
                .transpose()?,
        }))
    }

    async fn put_control(&self, state: PromotionControlState) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO self_extension_promotion_control (id, paused, reason, updated_by, updated_at)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                paused = excluded.paused,
                reason = excluded.reason,
                updated_by = excluded.updated_by,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(i64::from(state.paused))
        .bind(state.reason)
        .bind(state.updated_by)
        .bind(state.updated_at.as_ref().map(timestamp_text))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(())
    }
}

fn row_to_event(row: &SqliteRow) -> StorageResult<LifecycleEvent> {
    let get_err = |e: sqlx::Error| StorageError::Backend(e.to_string());

    let event_type: String = row.try_get("event_type").map_err(get_err)?;
    let payload: String = row.try_get("payload").map_err(get_err)?;
    let created_at: String = row.try_get("created_at").map_err(get_err)?;

    Ok(LifecycleEvent {
        id: row.try_get("id").map_err(get_err)?,
        run_id: row.try_get("run_id").map_err(get_err)?,
        correlation_id: row.try_get("correlation_id").map_err(get_err)?,
        stage: row.try_get("stage").map_err(get_err)?,
        event_type: LifecycleEventType::from_str(&event_type)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?,
        actor_source: row.try_get("actor_source").map_err(get_err)?,
        tool_name: row.try_get("tool_name").map_err(get_err)?,
        tool_call_id: row.try_get("tool_call_id").map_err(get_err)?,
        goal_id: row.try_get("goal_id").map_err(get_err)?,
        cycle_id: row.try_get("cycle_id").map_err(get_err)?,
        sub_goal_id: row.try_get("sub_goal_id").map_err(get_err)?,
        payload: serde_json::from_str(&payload)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?,
        created_at: parse_timestamp(&created_at)?,
        previous_hash: row.try_get("previous_hash").map_err(get_err)?,
        hash: row.try_get("hash").map_err(get_err)?,
    })
}

fn parse_timestamp(text: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp {text:?}: {e}")))
}

fn map_sqlx_conflict(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StorageError::Conflict(db_err.message().to_string());
        }
    }
    StorageError::Backend(err.to_string())
}

fn limit_value(window: QueryWindow) -> StorageResult<i64> {
    // SQLite reads a negative LIMIT as "no limit".
    if window.limit == 0 {
        Ok(-1)
    } else {
        to_i64(window.limit)
    }
}

fn to_i64(value: usize) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::Backend(format!("query window value {value} exceeds i64 range")))
}
