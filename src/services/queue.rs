//! Durable at-least-once message queue on SQLite.
//!
//! `receive` leases messages by pushing their `visible_at` forward; a message
//! that is not acknowledged before the lease runs out becomes visible again
//! and is redelivered.

use crate::models::queue::QueueMessage;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::{sync::Arc, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Producer side of the queue.
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Enqueue `body`, returning the message id.
    async fn send(&self, queue: &str, body: String) -> Result<i64, QueueError>;
}

#[derive(Clone)]
pub struct SqliteQueue {
    db: Arc<SqlitePool>,
}

impl SqliteQueue {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Serialize `message` as JSON and enqueue it.
    pub async fn send_json<T: serde::Serialize + Sync>(
        &self,
        queue: &str,
        message: &T,
    ) -> Result<i64, QueueError> {
        let body = serde_json::to_string(message)?;
        self.send(queue, body).await
    }

    /// Lease up to `max` visible messages for `visibility`.
    pub async fn receive(
        &self,
        queue: &str,
        max: i64,
        visibility: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        self.receive_at(queue, max, visibility, Utc::now().timestamp_millis())
            .await
    }

    async fn receive_at(
        &self,
        queue: &str,
        max: i64,
        visibility: Duration,
        now_ms: i64,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let lease_until = now_ms.saturating_add(visibility.as_millis() as i64);
        let mut messages = sqlx::query_as::<_, QueueMessage>(
            r#"
            UPDATE queue_messages
            SET visible_at = ?, receive_count = receive_count + 1
            WHERE id IN (
                SELECT id FROM queue_messages
                WHERE queue = ? AND visible_at <= ?
                ORDER BY id ASC
                LIMIT ?
            )
            RETURNING id, queue, body, receive_count
            "#,
        )
        .bind(lease_until)
        .bind(queue)
        .bind(now_ms)
        .bind(max)
        .fetch_all(&*self.db)
        .await?;
        messages.sort_by_key(|m| m.id);
        Ok(messages)
    }

    /// Remove a message for good.
    pub async fn ack(&self, id: i64) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM queue_messages WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Messages currently stored for `queue`, leased or not.
    #[cfg(test)]
    pub async fn depth(&self, queue: &str) -> Result<i64, QueueError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM queue_messages WHERE queue = ?",
        )
        .bind(queue)
        .fetch_one(&*self.db)
        .await?;
        Ok(count)
    }
}

#[async_trait]
impl EventQueue for SqliteQueue {
    async fn send(&self, queue: &str, body: String) -> Result<i64, QueueError> {
        let now = Utc::now();
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO queue_messages (queue, body, receive_count, visible_at, created_at)
             VALUES (?, ?, 0, ?, ?)
             RETURNING id",
        )
        .bind(queue)
        .bind(body)
        .bind(now.timestamp_millis())
        .bind(now)
        .fetch_one(&*self.db)
        .await?;
        Ok(id)
    }
}
