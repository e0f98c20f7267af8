//! Notification sink
//!
//! Fire-and-forget event rows consumed by the delivery pipeline elsewhere.
//! Insert failures are logged and never propagate: a state transition must
//! not roll back because a notification could not be written.

use serde::Serialize;
use sqlx::types::chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::ApiResult;

/// Persisted notification row
#[derive(Debug, Serialize, sqlx::FromRow, Clone)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct NotificationService {
    db_pool: PgPool,
}

impl NotificationService {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Emit a notification. Never fails from the caller's perspective.
    pub async fn notify(&self, user_id: Uuid, kind: &str, message: &str) {
        let result = sqlx::query(
            "INSERT INTO notifications (user_id, kind, message) VALUES ($1, $2, $3)",
        )
        .bind(user_id)
        .bind(kind)
        .bind(message)
        .execute(&self.db_pool)
        .await;

        if let Err(e) = result {
            tracing::error!(
                user_id = %user_id,
                kind = %kind,
                error = %e,
                "Failed to persist notification"
            );
        }
    }

    /// A user's notifications, newest first
    pub async fn list_for_user(&self, user_id: Uuid) -> ApiResult<Vec<Notification>> {
        let rows = sqlx::query_as::<_, Notification>(
            "SELECT * FROM notifications WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(rows)
    }
}
