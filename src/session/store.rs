use crate::session::error::{SessionError, SessionResult};
use crate::session::types::{SessionStatus, UploadSession};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Durable upload sessions in SQLite.
///
/// Timestamps are stored as epoch milliseconds and the uploaded index set as a
/// JSON array.
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    /// Open (creating if needed) the database at `url` and initialize the schema.
    pub async fn new(url: &str) -> SessionResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // Every connection to `:memory:` is a separate database.
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS upload_sessions (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                directory TEXT NOT NULL,
                total_size INTEGER NOT NULL,
                chunk_size INTEGER NOT NULL,
                total_chunks INTEGER NOT NULL,
                uploaded_chunks TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_upload_sessions_status ON upload_sessions(status, expires_at)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// In-memory database (for testing)
    pub async fn new_in_memory() -> SessionResult<Self> {
        Self::new("sqlite::memory:").await
    }

    /// Insert a new session; fails if the id already exists.
    pub async fn insert(&self, session: &UploadSession) -> SessionResult<()> {
        self.write(session, "INSERT").await
    }

    /// Insert or overwrite.
    pub async fn save(&self, session: &UploadSession) -> SessionResult<()> {
        self.write(session, "INSERT OR REPLACE").await
    }

    async fn write(&self, session: &UploadSession, verb: &str) -> SessionResult<()> {
        let uploaded_json = serde_json::to_string(&session.uploaded_chunks)?;

        let sql = format!(
            r#"
            {verb} INTO upload_sessions
            (id, filename, directory, total_size, chunk_size, total_chunks,
             uploaded_chunks, status, created_at, updated_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#
        );

        sqlx::query(&sql)
            .bind(&session.id)
            .bind(&session.filename)
            .bind(&session.directory)
            .bind(to_i64(session.total_size)?)
            .bind(to_i64(session.chunk_size)?)
            .bind(i64::from(session.total_chunks))
            .bind(uploaded_json)
            .bind(session.status.as_str())
            .bind(session.created_at.timestamp_millis())
            .bind(session.updated_at.timestamp_millis())
            .bind(session.expires_at.timestamp_millis())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn load(&self, id: &str) -> SessionResult<Option<UploadSession>> {
        let row = sqlx::query("SELECT * FROM upload_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| session_from_row(&r)).transpose()
    }

    pub async fn delete(&self, id: &str) -> SessionResult<bool> {
        let result = sqlx::query("DELETE FROM upload_sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Open sessions that have not yet expired at `now`.
    pub async fn count_open(&self, now: DateTime<Utc>) -> SessionResult<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM upload_sessions WHERE status = ? AND expires_at > ?",
        )
        .bind(SessionStatus::Open.as_str())
        .bind(now.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.try_get("count")?;
        Ok(count.max(0) as u64)
    }

    /// Open sessions whose expiry is at or before `now`.
    pub async fn list_expired(&self, now: DateTime<Utc>) -> SessionResult<Vec<UploadSession>> {
        let rows = sqlx::query(
            "SELECT * FROM upload_sessions WHERE status = ? AND expires_at <= ? ORDER BY expires_at",
        )
        .bind(SessionStatus::Open.as_str())
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(session_from_row).collect()
    }

    /// Delete completed and cancelled sessions last touched before `cutoff`.
    pub async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> SessionResult<u64> {
        let result = sqlx::query(
            "DELETE FROM upload_sessions WHERE status != ? AND updated_at < ?",
        )
        .bind(SessionStatus::Open.as_str())
        .bind(cutoff.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> SessionResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM upload_sessions")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("count")?)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn session_from_row(row: &SqliteRow) -> SessionResult<UploadSession> {
    let uploaded: BTreeSet<u32> =
        serde_json::from_str(&row.try_get::<String, _>("uploaded_chunks")?)?;
    let status = row
        .try_get::<String, _>("status")?
        .parse::<SessionStatus>()
        .map_err(SessionError::SerializationError)?;

    Ok(UploadSession {
        id: row.try_get("id")?,
        filename: row.try_get("filename")?,
        directory: row.try_get("directory")?,
        total_size: from_i64(row.try_get("total_size")?)?,
        chunk_size: from_i64(row.try_get("chunk_size")?)?,
        total_chunks: u32::try_from(row.try_get::<i64, _>("total_chunks")?)
            .map_err(|e| SessionError::SerializationError(e.to_string()))?,
        uploaded_chunks: uploaded,
        status,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
        expires_at: from_millis(row.try_get("expires_at")?)?,
    })
}

fn to_i64(value: u64) -> SessionResult<i64> {
    i64::try_from(value).map_err(|e| SessionError::SerializationError(e.to_string()))
}

fn from_i64(value: i64) -> SessionResult<u64> {
    u64::try_from(value).map_err(|e| SessionError::SerializationError(e.to_string()))
}

fn from_millis(ms: i64) -> SessionResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| SessionError::SerializationError(format!("invalid timestamp: {ms}")))
}
