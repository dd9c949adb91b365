//! Application state shared across handlers.

use crate::services::{
    catalog::CatalogQueryEngine, presign::UploadAuthorizer, queue::SqliteQueue,
    roles::RoleDirectory, storage_service::StorageService, subscriptions::SubscriptionService,
};

#[derive(Clone)]
pub struct AppState {
    /// Object store for raw uploads and extracted app files.
    pub storage: StorageService,
    /// Producer side of the ingestion queues.
    pub queue: SqliteQueue,
    pub uploads: UploadAuthorizer,
    pub catalog: CatalogQueryEngine,
    pub subscriptions: SubscriptionService,
    pub roles: RoleDirectory,
    /// Bucket served to clients by `GET /objects`.
    pub apps_bucket: String,
}
