use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use models::event::{APP_METADATA_QUEUE, OBJECT_CREATED_QUEUE};
use services::{
    catalog::{CatalogQueryEngine, SqliteCatalogStore},
    extractor::PackageExtractor,
    persister::MetadataPersister,
    presign::UploadAuthorizer,
    queue::SqliteQueue,
    roles::RoleDirectory,
    storage_service::StorageService,
    subscriptions::SubscriptionService,
    worker::run_consumer,
};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!(
        addr = %cfg.addr(),
        storage_dir = %cfg.storage_dir,
        database_url = %cfg.database_url,
        public_base_url = %cfg.public_base_url,
        layout = %cfg.storage_layout,
        "starting appstore"
    );

    // --- Initialize SQLite and schema ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);
    db::run_migrations(&db).await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize core services ---
    let storage = StorageService::new(db.clone(), cfg.storage_dir.clone());
    let queue = SqliteQueue::new(db.clone());
    let catalog_store = Arc::new(SqliteCatalogStore::new(db.clone()));
    let subscriptions = SubscriptionService::new(db.clone());

    let extractor = PackageExtractor::new(
        Arc::new(storage.clone()),
        Arc::new(queue.clone()),
        cfg.apps_bucket.clone(),
        cfg.storage_layout,
    )
    .with_size_limit(cfg.max_package_bytes);
    let persister = MetadataPersister::new(catalog_store.clone());

    // --- Start background consumers ---
    tokio::spawn(run_consumer(
        queue.clone(),
        OBJECT_CREATED_QUEUE,
        Arc::new(extractor),
        cfg.queue,
    ));
    tokio::spawn(run_consumer(
        queue.clone(),
        APP_METADATA_QUEUE,
        Arc::new(persister),
        cfg.queue,
    ));

    let state = AppState {
        storage,
        queue,
        uploads: UploadAuthorizer::new(
            cfg.signing_secret.as_bytes(),
            cfg.public_base_url.clone(),
            cfg.uploads_bucket.clone(),
            cfg.upload_url_ttl,
        ),
        catalog: CatalogQueryEngine::new(catalog_store, subscriptions.clone()),
        subscriptions,
        roles: RoleDirectory::new(db),
        apps_bucket: cfg.apps_bucket.clone(),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
