//! error_log.rs
//!
//! Hobby-scale stand-in for a hosted error tracker: failures are written
//! to the `error_logs` table and queried back with SQL. If the insert
//! itself fails the error is echoed to the log and the request carries
//! on; tracking must never break the app.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use tracing::error;

use crate::database::Database;

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLogEntry {
    pub id: i64,
    pub level: String,
    pub component: Option<String>,
    pub message: String,
    pub context: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ErrorTracker {
    db: Database,
}

impl ErrorTracker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn log_error(
        &self,
        component: &str,
        message: &str,
        context: Option<serde_json::Value>,
    ) {
        self.insert("error", component, message, context).await;
    }

    pub async fn log_warning(
        &self,
        component: &str,
        message: &str,
        context: Option<serde_json::Value>,
    ) {
        self.insert("warn", component, message, context).await;
    }

    async fn insert(
        &self,
        level: &str,
        component: &str,
        message: &str,
        context: Option<serde_json::Value>,
    ) {
        let result = sqlx::query(
            "INSERT INTO error_logs (level, component, message, context)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(level)
        .bind(component)
        .bind(message)
        .bind(context)
        .execute(&self.db.pool)
        .await;

        if let Err(e) = result {
            error!("failed to persist error log ({component}: {message}): {e}");
        }
    }

    /// Most recent entries, newest first. Admin surface only.
    pub async fn recent(&self, limit: i64) -> Result<Vec<ErrorLogEntry>, sqlx::Error> {
        sqlx::query_as::<_, ErrorLogEntry>(
            "SELECT * FROM error_logs ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit.clamp(1, 200))
        .fetch_all(&self.db.pool)
        .await
    }
}
