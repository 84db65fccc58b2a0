use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};

#[derive(Debug)]
pub enum StoreError {
    Timeout,
    InvalidResult(String),
    UnknownUser,
    Sqlx(sqlx::Error),
    Migrate(sqlx::migrate::MigrateError),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Timeout => write!(f, "store operation timed out"),
            StoreError::InvalidResult(reason) => write!(f, "invalid result: {}", reason),
            StoreError::UnknownUser => write!(f, "result references an unknown user"),
            StoreError::Sqlx(err) => write!(f, "store sql error: {}", err),
            StoreError::Migrate(err) => write!(f, "store migration error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        StoreError::Sqlx(value)
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(value: sqlx::migrate::MigrateError) -> Self {
        StoreError::Migrate(value)
    }
}

/// A result row as it leaves the repository. `is_normal` is stored as a
/// 0/1 integer and decoded back to the identical boolean on every read.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResultRecord {
    pub id: i64,
    pub user_id: i64,
    pub prediction: String,
    pub confidence: f64,
    pub timestamp: i64,
    pub original: Option<String>,
    pub binary: Option<String>,
    pub contours: Option<String>,
    pub overlay: Option<String>,
    pub is_normal: bool,
    pub created_at: String,
}

pub struct NewResult<'a> {
    pub user_id: i64,
    pub prediction: &'a str,
    pub confidence: f64,
    pub timestamp: i64,
    pub original: Option<&'a str>,
    pub binary: Option<&'a str>,
    pub contours: Option<&'a str>,
    pub overlay: Option<&'a str>,
    pub is_normal: bool,
}

impl NewResult<'_> {
    pub fn validate(&self) -> Result<(), String> {
        if self.prediction.trim().is_empty() {
            return Err("prediction must be non-empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!(
                "confidence must be within [0, 1], got {}",
                self.confidence
            ));
        }
        Ok(())
    }
}

/// Repository handle over the relational store. Constructed once at process
/// start and passed to the HTTP layer; closed on shutdown.
#[derive(Clone)]
pub struct ResultStore {
    pool: SqlitePool,
    write_timeout: Duration,
}

impl ResultStore {
    pub async fn connect(path: &Path, write_timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|err| {
                StoreError::Sqlx(sqlx::Error::Io(err))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        Self::connect_with(options, write_timeout).await
    }

    /// In-memory store for tests. The single pooled connection keeps the
    /// database alive for the lifetime of the handle.
    pub async fn connect_in_memory(write_timeout: Duration) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);

        Self::connect_with(options, write_timeout).await
    }

    async fn connect_with(
        options: SqliteConnectOptions,
        write_timeout: Duration,
    ) -> Result<Self, StoreError> {
        // SQLite permits only one writer; a single pooled connection avoids
        // "database is locked" failures under concurrent requests.
        let pool = tokio::time::timeout(
            Duration::from_secs(2),
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(options),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(Self {
            pool,
            write_timeout,
        })
    }

    pub async fn connect_and_migrate(
        path: &Path,
        write_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let store = Self::connect(path, write_timeout).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        tokio::time::timeout(
            Duration::from_secs(10),
            sqlx::migrate!("./migrations").run(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    /// Inserts a new result and returns its generated identifier. The
    /// boolean flag is bound as a 0/1 integer; confidence outside [0, 1]
    /// is rejected before the insert is attempted.
    pub async fn create_result(&self, result: &NewResult<'_>) -> Result<i64, StoreError> {
        result
            .validate()
            .map_err(StoreError::InvalidResult)?;

        let done = tokio::time::timeout(
            self.write_timeout,
            sqlx::query(
                "INSERT INTO results (user_id, prediction, confidence, timestamp, original, binary, contours, overlay, is_normal) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .bind(result.user_id)
            .bind(result.prediction)
            .bind(result.confidence)
            .bind(result.timestamp)
            .bind(result.original)
            .bind(result.binary)
            .bind(result.contours)
            .bind(result.overlay)
            .bind(if result.is_normal { 1_i64 } else { 0_i64 })
            .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)?
        .map_err(classify_sqlx_error)?;

        Ok(done.last_insert_rowid())
    }

    /// All results owned by the given user, newest timestamp first.
    pub async fn results_for_user(&self, user_id: i64) -> Result<Vec<ResultRecord>, StoreError> {
        let rows = tokio::time::timeout(
            self.write_timeout,
            sqlx::query(
                "SELECT id, user_id, prediction, confidence, timestamp, original, binary, contours, overlay, is_normal, created_at FROM results WHERE user_id = ?1 ORDER BY timestamp DESC",
            )
            .bind(user_id)
            .fetch_all(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(rows.iter().map(record_from_row).collect())
    }

    pub async fn result_by_id(&self, id: i64) -> Result<Option<ResultRecord>, StoreError> {
        let row = tokio::time::timeout(
            self.write_timeout,
            sqlx::query(
                "SELECT id, user_id, prediction, confidence, timestamp, original, binary, contours, overlay, is_normal, created_at FROM results WHERE id = ?1",
            )
            .bind(id)
            .fetch_optional(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(row.as_ref().map(record_from_row))
    }

    /// Deletes only when both id and owner match. Returns whether a row was
    /// removed; callers cannot distinguish "not found" from "not yours".
    pub async fn delete_result(&self, id: i64, user_id: i64) -> Result<bool, StoreError> {
        let done = tokio::time::timeout(
            self.write_timeout,
            sqlx::query("DELETE FROM results WHERE id = ?1 AND user_id = ?2")
                .bind(id)
                .bind(user_id)
                .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(done.rows_affected() > 0)
    }

    pub async fn create_user(&self, username: &str) -> Result<i64, StoreError> {
        let done = tokio::time::timeout(
            self.write_timeout,
            sqlx::query("INSERT INTO users (username) VALUES (?1)")
                .bind(username)
                .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(done.last_insert_rowid())
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        tokio::time::timeout(
            self.write_timeout,
            sqlx::query("SELECT 1").execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn record_from_row(row: &SqliteRow) -> ResultRecord {
    ResultRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        prediction: row.get("prediction"),
        confidence: row.get("confidence"),
        timestamp: row.get("timestamp"),
        original: row.get("original"),
        binary: row.get("binary"),
        contours: row.get("contours"),
        overlay: row.get("overlay"),
        is_normal: row.get::<i64, _>("is_normal") == 1,
        created_at: row.get("created_at"),
    }
}

fn classify_sqlx_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err
        && matches!(db.kind(), sqlx::error::ErrorKind::ForeignKeyViolation)
    {
        return StoreError::UnknownUser;
    }
    StoreError::Sqlx(err)
}
