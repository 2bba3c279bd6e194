use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, postgres::PgPoolOptions, types::Json};
use tracing::{debug, error, info};

use crate::{
    clients::Ledger,
    models::{event::Event, ledger::LedgerRecord, status::DeliveryStatus},
};

#[derive(FromRow)]
struct NotificationRow {
    id: String,
    event_id: String,
    event_type: String,
    payload: serde_json::Value,
    status: String,
    attempt_count: i32,
    last_attempt_timestamp: Option<DateTime<Utc>>,
}

impl TryFrom<NotificationRow> for LedgerRecord {
    type Error = Error;

    fn try_from(row: NotificationRow) -> Result<Self, Error> {
        Ok(Self {
            notification_id: row.id,
            event_id: row.event_id,
            event_type: row.event_type,
            payload: row.payload,
            status: row.status.parse()?,
            attempt_count: row.attempt_count,
            last_attempt_timestamp: row.last_attempt_timestamp,
        })
    }
}

/// Ledger backed by the `notifications` table. The pool is shared by every
/// in-flight message handler.
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL database");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        info!("PostgreSQL connection established");

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), Error> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| anyhow!("Database migration failed: {}", e))?;

        info!("Ledger schema is up to date");

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("PostgreSQL pool closed");
    }
}

#[async_trait]
impl Ledger for PostgresLedger {
    async fn is_handled(&self, event_id: &str) -> Result<bool> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM notifications WHERE event_id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| anyhow!("Ledger lookup failed: {}", e))?;

        match status {
            Some(status) => Ok(status.parse::<DeliveryStatus>()?.is_terminal()),
            None => Ok(false),
        }
    }

    async fn create_if_absent(&self, event: &Event) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO notifications (id, event_id, event_type, payload, status, attempt_count)
            VALUES ($1, $2, $3, $4, $5, 0)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event.notification_id())
        .bind(&event.id)
        .bind(&event.event_type)
        .bind(Json(&event.payload))
        .bind(DeliveryStatus::Queued.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, event_id = %event.id, "Failed to create ledger record");
            anyhow!("Ledger insert failed: {}", e)
        })?;

        if result.rows_affected() == 0 {
            debug!(event_id = %event.id, "Ledger record already exists");
        }

        Ok(())
    }

    async fn update_status(&self, event_id: &str, status: DeliveryStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notifications
            SET status = $1,
                last_attempt_timestamp = NOW(),
                attempt_count = attempt_count + 1
            WHERE event_id = $2
            "#,
        )
        .bind(status.as_str())
        .bind(event_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, event_id, status = %status, "Failed to update ledger status");
            anyhow!("Ledger update failed: {}", e)
        })?;

        debug!(event_id, status = %status, "Ledger status updated");

        Ok(())
    }

    async fn find(&self, event_id: &str) -> Result<Option<LedgerRecord>> {
        let row = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, event_id, event_type, payload, status, attempt_count, last_attempt_timestamp
            FROM notifications
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!("Ledger lookup failed: {}", e))?;

        row.map(LedgerRecord::try_from).transpose()
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!("Database health check failed: {}", e))?;

        Ok(())
    }
}
