//! Background consumers for the durable queue.
//!
//! A consumer leases a batch, hands each message to its [`MessageHandler`]
//! and acts on the returned [`Disposition`]. Messages that keep failing are
//! dropped once they have been delivered more than `max_receive_count` times.

use crate::{
    config::QueueSettings,
    models::{event::ObjectCreatedEvent, queue::QueueMessage},
    services::{
        extractor::{ExtractOutcome, PackageExtractor},
        persister::{MetadataPersister, PersistError},
        queue::{QueueError, SqliteQueue},
    },
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What to do with a message after handling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Done; remove it.
    Ack,
    /// Leave it leased so it is redelivered after the visibility timeout.
    Retry,
    /// It can never succeed; remove it and log.
    Drop,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &QueueMessage) -> Disposition;
}

#[async_trait]
impl MessageHandler for PackageExtractor {
    async fn handle(&self, message: &QueueMessage) -> Disposition {
        let event: ObjectCreatedEvent = match serde_json::from_str(&message.body) {
            Ok(event) => event,
            Err(err) => {
                error!(message_id = message.id, error = %err, "malformed object-created event");
                return Disposition::Drop;
            }
        };
        match self.process(&event.bucket, &event.key).await {
            Ok(ExtractOutcome::Processed(_) | ExtractOutcome::Skipped) => Disposition::Ack,
            Err(err) => {
                error!(
                    message_id = message.id,
                    bucket = %event.bucket,
                    key = %event.key,
                    error = %err,
                    "archive extraction failed"
                );
                Disposition::Retry
            }
        }
    }
}

#[async_trait]
impl MessageHandler for MetadataPersister {
    async fn handle(&self, message: &QueueMessage) -> Disposition {
        match self.consume(&message.body).await {
            Ok(_) => Disposition::Ack,
            Err(PersistError::Malformed(reason)) => {
                error!(message_id = message.id, %reason, "dropping malformed metadata event");
                Disposition::Drop
            }
            Err(err @ PersistError::Store(_)) => {
                error!(message_id = message.id, error = %err, "failed to persist metadata event");
                Disposition::Retry
            }
        }
    }
}

/// Lease one batch from `queue_name` and dispatch it. Returns how many
/// messages were received.
pub async fn poll_once(
    queue: &SqliteQueue,
    queue_name: &str,
    handler: &dyn MessageHandler,
    settings: &QueueSettings,
) -> Result<usize, QueueError> {
    let messages = queue
        .receive(queue_name, settings.batch_size, settings.visibility_timeout)
        .await?;
    let received = messages.len();

    for message in messages {
        if message.receive_count > settings.max_receive_count {
            error!(
                queue = %message.queue,
                message_id = message.id,
                receive_count = message.receive_count,
                body = %message.body,
                "message exceeded max receive count, dropping"
            );
            queue.ack(message.id).await?;
            continue;
        }

        match handler.handle(&message).await {
            Disposition::Ack => queue.ack(message.id).await?,
            Disposition::Drop => {
                warn!(queue = %message.queue, message_id = message.id, "message dropped");
                queue.ack(message.id).await?;
            }
            Disposition::Retry => debug!(
                queue = queue_name,
                message_id = message.id,
                receive_count = message.receive_count,
                "message left for redelivery"
            ),
        }
    }

    Ok(received)
}

/// Poll `queue_name` forever. Sleeps for the poll interval whenever the
/// queue is empty or the poll itself failed.
pub async fn run_consumer(
    queue: SqliteQueue,
    queue_name: &'static str,
    handler: Arc<dyn MessageHandler>,
    settings: QueueSettings,
) {
    info!(
        queue = queue_name,
        poll_ms = settings.poll_interval.as_millis() as u64,
        max_receive_count = settings.max_receive_count,
        "consumer started"
    );
    loop {
        match poll_once(&queue, queue_name, handler.as_ref(), &settings).await {
            Ok(0) => tokio::time::sleep(settings.poll_interval).await,
            Ok(_) => {}
            Err(err) => {
                error!(queue = queue_name, error = %err, "queue poll failed");
                tokio::time::sleep(settings.poll_interval).await;
            }
        }
    }
}
