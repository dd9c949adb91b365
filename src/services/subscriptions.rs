//! User to app subscriptions.

use crate::models::subscription::SubscriptionEntry;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("You are already subscribed to this app")]
    AlreadySubscribed,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Clone)]
pub struct SubscriptionService {
    db: Arc<SqlitePool>,
}

impl SubscriptionService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Record that `user_id` subscribes to `app_id`. A second subscription to
    /// the same app is refused rather than overwritten, so the first
    /// subscription time is kept.
    pub async fn subscribe(
        &self,
        app_id: &str,
        user_id: &str,
    ) -> Result<SubscriptionEntry, SubscriptionError> {
        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM subscriptions WHERE app_id = ? AND user_id = ?",
        )
        .bind(app_id)
        .bind(user_id)
        .fetch_one(&*self.db)
        .await?;
        if existing > 0 {
            return Err(SubscriptionError::AlreadySubscribed);
        }

        let entry = SubscriptionEntry {
            app_id: app_id.to_string(),
            user_id: user_id.to_string(),
            subscription_time: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO subscriptions (app_id, user_id, subscription_time) VALUES (?, ?, ?)",
        )
        .bind(&entry.app_id)
        .bind(&entry.user_id)
        .bind(entry.subscription_time)
        .execute(&*self.db)
        .await
        .map_err(|err| match err {
            // Lost a race with a concurrent subscribe for the same pair.
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                SubscriptionError::AlreadySubscribed
            }
            other => SubscriptionError::Sqlx(other),
        })?;

        info!(app_id, user_id, "subscribed user to app");
        Ok(entry)
    }

    /// App ids the user is subscribed to, oldest subscription first.
    pub async fn subscribed_app_ids(
        &self,
        user_id: &str,
    ) -> Result<Vec<String>, SubscriptionError> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT app_id FROM subscriptions WHERE user_id = ?
             ORDER BY subscription_time ASC, app_id ASC",
        )
        .bind(user_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(ids)
    }
}
