//! Rows of the durable message queue.

use sqlx::FromRow;

/// A leased queue message. `receive_count` includes the current delivery.
#[derive(Clone, FromRow, Debug)]
pub struct QueueMessage {
    pub id: i64,
    pub queue: String,
    pub body: String,
    pub receive_count: i64,
}
