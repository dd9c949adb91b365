//! User metadata attached to stored objects.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata key recording which publisher an upload credential was issued to.
pub const PUBLISHER_ID_KEY: &str = "publisher-id";

/// Key-value metadata entries attached to an object.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ObjectMetadata {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Reference to the associated object.
    pub object_id: Uuid,

    pub key: String,

    pub value: String,
}
