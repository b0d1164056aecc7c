//! SQLite subscriber backend
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode** with `synchronous = FULL`: a committed row survives power loss
//! - **Migrations**: Schema versioning with sqlx
//! - Timestamps are stored as RFC 3339 text, so a reload returns the exact value written

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use crate::{RecipientId, Subscriber};

use super::backend::SubscriberBackend;
use super::error::{StorageError, StorageResult};

pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Open (or create) the database at `db_path` and run migrations.
    ///
    /// ```no_run
    /// # use nockbot::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./subscribers.db").await?;
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
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn encode_timestamp(at: &DateTime<Utc>) -> String {
        at.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    fn decode_timestamp(recipient_id: &str, raw: &str) -> StorageResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|at| at.with_timezone(&Utc))
            .map_err(|e| {
                StorageError::SerializationError(format!(
                    "subscriber {recipient_id} has invalid subscribed_at {raw:?}: {e}"
                ))
            })
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SubscriberBackend for SqliteBackend {
    #[instrument(skip(self))]
    async fn load(&self) -> StorageResult<Vec<Subscriber>> {
        let rows = sqlx::query("SELECT recipient_id, subscribed_at FROM subscribers")
            .fetch_all(&self.pool)
            .await?;

        let subscribers = rows
            .into_iter()
            .map(|row| -> StorageResult<Subscriber> {
                let recipient_id: String = row.try_get("recipient_id")?;
                let raw: String = row.try_get("subscribed_at")?;
                Ok(Subscriber {
                    subscribed_at: Self::decode_timestamp(&recipient_id, &raw)?,
                    recipient_id: RecipientId::new(recipient_id),
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;

        debug!("loaded {} subscribers", subscribers.len());
        Ok(subscribers)
    }

    #[instrument(skip(self, subscriber), fields(recipient = %subscriber.recipient_id))]
    async fn insert(&self, subscriber: &Subscriber) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscribers (recipient_id, subscribed_at)
            VALUES (?, ?)
            ON CONFLICT (recipient_id) DO UPDATE SET
                subscribed_at = excluded.subscribed_at
            "#,
        )
        .bind(subscriber.recipient_id.as_str())
        .bind(Self::encode_timestamp(&subscriber.subscribed_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, recipient_id: &RecipientId) -> StorageResult<()> {
        sqlx::query("DELETE FROM subscribers WHERE recipient_id = ?")
            .bind(recipient_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sqlite database at {}", self.db_path)
    }
}
