//! Defines the HTTP surface of the service.
//!
//! ## Structure
//! - **Health**: `GET /healthz`, `GET /readyz`
//! - **Publishing**
//!   - `POST /publish/{app_slug}/version/{version_id}`: presigned upload URL
//!   - `PUT  /objects/{bucket}/{*key}`: signed archive upload
//! - **Catalog**
//!   - `GET  /apps`: paginated listing (`limit`, `cursor`, `getSubscribed`)
//!   - `GET  /apps/{app_id}`: single entry
//!   - `POST /subscribe?appID=`: subscribe the caller
//!   - `GET  /objects/{bucket}/{*key}`: extracted app files
//! - **Users**
//!   - `GET  /user-role`: the caller's roles
//!   - `PUT  /user-role`: replace the caller's roles
//!   - `POST /user-role/enroll`: grant the roles chosen at sign-up
//!
//! The wildcard `*key` allows nested keys like `app/digits/js/app.js`.

use crate::{
    handlers::{
        catalog_handlers::{get_app, list_apps, subscribe},
        health_handlers::{healthz, readyz},
        object_handlers::{get_object, upload_object},
        publish_handlers::publish_app,
        user_handlers::{enroll_user, get_user_roles, update_user_role},
    },
    errors::AppError,
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;

/// Build the router. Handlers share `AppState`; every request gets a trace
/// span.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/publish/{app_slug}/version/{version_id}", post(publish_app))
        .route("/objects/{bucket}/{*key}", put(upload_object).get(get_object))
        .route("/apps", get(list_apps))
        .route("/apps/{app_id}", get(get_app))
        .route("/subscribe", post(subscribe))
        .route("/user-role", get(get_user_roles).put(update_user_role))
        .route("/user-role/enroll", post(enroll_user))
        .fallback(route_not_found)
        .layer(TraceLayer::new_for_http())
}

async fn route_not_found() -> AppError {
    AppError::not_found("Route not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::QueueSettings,
        db::memory_pool,
        handlers::auth::CLAIMS_HEADER,
        models::claims::Role,
        models::event::{APP_METADATA_QUEUE, OBJECT_CREATED_QUEUE},
        services::{
            catalog::{CatalogQueryEngine, SqliteCatalogStore},
            extractor::{PackageExtractor, StorageLayout},
            persister::MetadataPersister,
            presign::UploadAuthorizer,
            queue::SqliteQueue,
            roles::RoleDirectory,
            storage_service::StorageService,
            subscriptions::SubscriptionService,
            worker::poll_once,
        },
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode, header},
        response::Response,
    };
    use serde_json::{Value, json};
    use std::{
        io::{Cursor, Write},
        sync::Arc,
        time::Duration,
    };
    use tempfile::TempDir;
    use tower::ServiceExt;
    use zip::{ZipWriter, write::SimpleFileOptions};

    const BASE_URL: &str = "http://localhost:3000";
    const PUBLISHER: &str = r#"{"sub": "pub-user", "cognito:groups": "[Publisher]"}"#;
    const SUBSCRIBER: &str = r#"{"sub": "sub-user", "cognito:groups": "[Subscriber]"}"#;

    struct TestApp {
        router: Router,
        state: AppState,
        extractor: PackageExtractor,
        persister: MetadataPersister,
        _dir: TempDir,
    }

    async fn test_app() -> TestApp {
        let dir = TempDir::new().unwrap();
        let pool = Arc::new(memory_pool().await);
        let storage = StorageService::new(pool.clone(), dir.path());
        let queue = SqliteQueue::new(pool.clone());
        let catalog_store = Arc::new(SqliteCatalogStore::new(pool.clone()));
        let subscriptions = SubscriptionService::new(pool.clone());
        let state = AppState {
            storage: storage.clone(),
            queue: queue.clone(),
            uploads: UploadAuthorizer::new(
                "test-secret",
                BASE_URL,
                "uploads",
                Duration::from_secs(900),
            ),
            catalog: CatalogQueryEngine::new(catalog_store.clone(), subscriptions.clone()),
            subscriptions,
            roles: RoleDirectory::new(pool),
            apps_bucket: "apps".into(),
        };
        TestApp {
            router: routes().with_state(state.clone()),
            extractor: PackageExtractor::new(
                Arc::new(storage),
                Arc::new(queue),
                "apps",
                StorageLayout::Flat,
            ),
            persister: MetadataPersister::new(catalog_store),
            state,
            _dir: dir,
        }
    }

    impl TestApp {
        async fn call(
            &self,
            method: Method,
            uri: &str,
            claims: Option<&str>,
            body: Body,
        ) -> Response {
            let mut request = Request::builder().method(method).uri(uri);
            if let Some(claims) = claims {
                request = request.header(CLAIMS_HEADER, claims);
            }
            self.router
                .clone()
                .oneshot(request.body(body).unwrap())
                .await
                .unwrap()
        }

        async fn call_json(
            &self,
            method: Method,
            uri: &str,
            claims: Option<&str>,
            body: Body,
        ) -> (StatusCode, Value) {
            let response = self.call(method, uri, claims, body).await;
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }

        /// Run both consumers until their queues are drained.
        async fn drain_queues(&self) {
            let settings = QueueSettings {
                visibility_timeout: Duration::ZERO,
                ..QueueSettings::default()
            };
            poll_once(&self.state.queue, OBJECT_CREATED_QUEUE, &self.extractor, &settings)
                .await
                .unwrap();
            poll_once(&self.state.queue, APP_METADATA_QUEUE, &self.persister, &settings)
                .await
                .unwrap();
        }
    }

    fn descriptor() -> Value {
        json!({
            "manifest": {
                "name": "Digit Recognizer",
                "short_name": "Digits",
                "start_url": "/index.html",
                "display": "standalone",
                "description": "Recognises handwritten digits",
                "icons": [{"src": "icon.png", "sizes": "192x192", "type": "image/png"}]
            },
            "files": [
                {"filename": "index.html", "size": 1024, "type": "text/html"},
                {"filename": "app.js", "size": 2048, "type": "application/javascript"},
                {"filename": "model.onnx", "size": 4096, "type": "application/octet-stream"}
            ],
            "entrypoint": "index.html",
            "version_notes": "first release",
            "publisher_id": "pub-1"
        })
    }

    fn archive() -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in [
            ("index.html", &b"<html></html>"[..]),
            ("app.js", b"console.log(1)"),
            ("model.onnx", b"onnx"),
            ("manifest.json", br#"{"name": "Digit Recognizer", "description": "Reads digits"}"#),
        ] {
            writer.start_file(name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    /// Publish, upload and process one package; returns its app id.
    async fn publish_digits(app: &TestApp) -> String {
        let (status, body) = app
            .call_json(
                Method::POST,
                "/publish/digits/version/v1",
                Some(PUBLISHER),
                Body::from(descriptor().to_string()),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let url = body["presigned_url"].as_str().unwrap();
        let path = url.strip_prefix(BASE_URL).unwrap().to_string();

        let upload = app.call(Method::PUT, &path, None, Body::from(archive())).await;
        assert_eq!(upload.status(), StatusCode::OK);
        app.drain_queues().await;

        let (_, page) = app
            .call_json(Method::GET, "/apps", Some(SUBSCRIBER), Body::empty())
            .await;
        page["apps"][0]["appId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_checks_and_fallback() {
        let app = test_app().await;
        let (status, body) = app.call_json(Method::GET, "/healthz", None, Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = app.call_json(Method::GET, "/readyz", None, Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["sqlite"]["ok"], true);
        assert_eq!(body["checks"]["disk"]["ok"], true);

        let (status, body) = app.call_json(Method::GET, "/nowhere", None, Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"error": "Route not found", "status": 404}));
    }

    #[tokio::test]
    async fn publish_requires_publisher_role() {
        let app = test_app().await;
        let uri = "/publish/digits/version/v1";
        let body = || Body::from(descriptor().to_string());

        let (status, json) = app.call_json(Method::POST, uri, None, body()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"], "no group information");

        let (status, json) = app.call_json(Method::POST, uri, Some(SUBSCRIBER), body()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"], "role required");

        let bad_format = r#"{"sub": "u", "cognito:groups": "Publisher"}"#;
        let (status, json) = app.call_json(Method::POST, uri, Some(bad_format), body()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"], "invalid format");

        let (status, _) = app.call_json(Method::POST, uri, Some("not json"), body()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn publish_validates_the_descriptor() {
        let app = test_app().await;
        let uri = "/publish/digits/version/v1";

        let (status, json) = app
            .call_json(Method::POST, uri, Some(PUBLISHER), Body::from("{not json"))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Invalid request body");

        let mut missing_html = descriptor();
        missing_html["files"] = json!([
            {"filename": "app.js", "size": 10, "type": "application/javascript"},
            {"filename": "model.onnx", "size": 10, "type": "application/octet-stream"}
        ]);
        let (status, json) = app
            .call_json(Method::POST, uri, Some(PUBLISHER), Body::from(missing_html.to_string()))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "There must be at least one html file");

        let (status, json) = app
            .call_json(Method::POST, uri, Some(PUBLISHER), Body::from(descriptor().to_string()))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Presigned URL generated successfully");
        let key = json["upload_key"].as_str().unwrap();
        assert!(key.starts_with("uploads/digits/v1/") && key.ends_with(".zip"));
        assert!(json["presigned_url"].as_str().unwrap().starts_with(BASE_URL));
        assert!(json["expires_at"].is_string());
    }

    #[tokio::test]
    async fn presigned_upload_is_single_use_and_queues_extraction() {
        let app = test_app().await;
        let (_, json) = app
            .call_json(
                Method::POST,
                "/publish/digits/version/v1",
                Some(PUBLISHER),
                Body::from(descriptor().to_string()),
            )
            .await;
        let path = json["presigned_url"]
            .as_str()
            .unwrap()
            .strip_prefix(BASE_URL)
            .unwrap()
            .to_string();

        let tampered = path.replace("publisher=pub-1", "publisher=pub-2");
        let (status, json) = app
            .call_json(Method::PUT, &tampered, None, Body::from(archive()))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"], "invalid upload signature");

        let unsigned = path.split('?').next().unwrap();
        let (status, _) = app.call_json(Method::PUT, unsigned, None, Body::from(archive())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let first = app.call(Method::PUT, &path, None, Body::from(archive())).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert!(first.headers().contains_key(header::ETAG));
        assert_eq!(app.state.queue.depth(OBJECT_CREATED_QUEUE).await.unwrap(), 1);

        let (status, json) = app.call_json(Method::PUT, &path, None, Body::from(archive())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"], "upload credential already used");
        assert_eq!(app.state.queue.depth(OBJECT_CREATED_QUEUE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_queueing_leaves_the_upload_credential_usable() {
        let app = test_app().await;
        let (_, json) = app
            .call_json(
                Method::POST,
                "/publish/digits/version/v1",
                Some(PUBLISHER),
                Body::from(descriptor().to_string()),
            )
            .await;
        let url = json["presigned_url"].as_str().unwrap();
        let path = url.strip_prefix(BASE_URL).unwrap().to_string();

        sqlx::query("DROP TABLE queue_messages")
            .execute(&*app.state.storage.db)
            .await
            .unwrap();
        let failed = app.call(Method::PUT, &path, None, Body::from(archive())).await;
        assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);

        crate::db::run_migrations(&app.state.storage.db).await.unwrap();
        let retried = app.call(Method::PUT, &path, None, Body::from(archive())).await;
        assert_eq!(retried.status(), StatusCode::OK);
        assert_eq!(app.state.queue.depth(OBJECT_CREATED_QUEUE).await.unwrap(), 1);

        app.drain_queues().await;
        let (_, page) = app
            .call_json(Method::GET, "/apps", Some(SUBSCRIBER), Body::empty())
            .await;
        assert_eq!(page["count"], 1);
    }

    #[tokio::test]
    async fn uploaded_package_is_listed_and_served() {
        let app = test_app().await;
        let app_id = publish_digits(&app).await;

        let (status, page) = app
            .call_json(Method::GET, "/apps", Some(SUBSCRIBER), Body::empty())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["count"], 1);
        assert!(page.get("nextCursor").is_none());
        let listed = &page["apps"][0];
        assert_eq!(listed["appSlug"], "digits");
        assert_eq!(listed["appName"], "Digit Recognizer");
        assert_eq!(listed["appDescription"], "Reads digits");
        assert_eq!(listed["publisherId"], "pub-1");
        assert_eq!(listed["storagePath"], "app/digits/");

        let (status, json) = app
            .call_json(Method::GET, &format!("/apps/{}", app_id), Some(PUBLISHER), Body::empty())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["app"]["appId"], app_id.as_str());

        let (status, json) = app
            .call_json(Method::GET, "/apps/missing", Some(SUBSCRIBER), Body::empty())
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "app not found");

        let file = app
            .call(Method::GET, "/objects/apps/app/digits/index.html", None, Body::empty())
            .await;
        assert_eq!(file.status(), StatusCode::OK);
        assert_eq!(file.headers()[header::CONTENT_TYPE], "text/html");
        let bytes = to_bytes(file.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"<html></html>");

        let hidden = app
            .call(Method::GET, "/objects/uploads/uploads/digits/v1/x.zip", None, Body::empty())
            .await;
        assert_eq!(hidden.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listing_rejects_bad_parameters() {
        let app = test_app().await;
        for uri in ["/apps?limit=0", "/apps?limit=101", "/apps?limit=abc"] {
            let (status, json) = app
                .call_json(Method::GET, uri, Some(SUBSCRIBER), Body::empty())
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(
                json["error"],
                "invalid limit parameter. must be a positive number between 1 and 100"
            );
        }
        let (status, json) = app
            .call_json(Method::GET, "/apps?cursor=garbage", Some(SUBSCRIBER), Body::empty())
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "invalid cursor");

        let (status, _) = app.call_json(Method::GET, "/apps", None, Body::empty()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn subscribing_filters_the_listing() {
        let app = test_app().await;
        let app_id = publish_digits(&app).await;

        let (status, json) = app
            .call_json(Method::GET, "/apps?getSubscribed=true", Some(SUBSCRIBER), Body::empty())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 0);

        let (status, json) = app
            .call_json(Method::POST, "/subscribe", Some(SUBSCRIBER), Body::empty())
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "appID is required");

        let uri = format!("/subscribe?appID={}", app_id);
        let (status, json) = app
            .call_json(Method::POST, &uri, Some(SUBSCRIBER), Body::empty())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Successfully subscribed to app");

        let (status, json) = app
            .call_json(Method::POST, &uri, Some(SUBSCRIBER), Body::empty())
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"], "You are already subscribed to this app");

        let (_, json) = app
            .call_json(Method::GET, "/apps?getSubscribed=true", Some(SUBSCRIBER), Body::empty())
            .await;
        assert_eq!(json["count"], 1);
        assert_eq!(json["apps"][0]["appId"], app_id.as_str());

        let no_sub = r#"{"cognito:groups": "[Subscriber]"}"#;
        let (status, json) = app
            .call_json(Method::POST, &uri, Some(no_sub), Body::empty())
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "User ID not found in token");
    }

    #[tokio::test]
    async fn user_roles_are_replaced() {
        let app = test_app().await;
        let claims = r#"{"sub": "user-1", "username": "alice"}"#;
        let (status, json) = app
            .call_json(
                Method::PUT,
                "/user-role",
                Some(claims),
                Body::from(r#"{"newRole": ["publisher", "Subscriber", "admin"]}"#),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "User roles updated successfully");
        assert_eq!(json["roles"], json!(["Publisher", "Subscriber"]));

        let (status, json) = app
            .call_json(Method::PUT, "/user-role", Some(claims), Body::from("nope"))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Invalid request body");

        assert_eq!(
            app.state.roles.roles("alice").await.unwrap(),
            vec![Role::Publisher, Role::Subscriber]
        );
    }

    #[tokio::test]
    async fn enrollment_adds_roles_and_they_can_be_read_back() {
        let app = test_app().await;
        let claims = r#"{"sub": "user-2", "username": "bob"}"#;

        let (status, json) = app
            .call_json(Method::GET, "/user-role", Some(claims), Body::empty())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!({"roles": []}));

        let (status, json) = app
            .call_json(Method::POST, "/user-role/enroll", Some(claims), Body::empty())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "User enrolled successfully");
        assert_eq!(json["roles"], json!(["Subscriber"]));

        let (status, json) = app
            .call_json(
                Method::POST,
                "/user-role/enroll",
                Some(claims),
                Body::from(r#"{"preferredRoles": "Publisher, admin"}"#),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["roles"], json!(["Publisher", "Subscriber"]));

        let (_, json) = app
            .call_json(Method::GET, "/user-role", Some(claims), Body::empty())
            .await;
        assert_eq!(json["roles"], json!(["Publisher", "Subscriber"]));

        let (status, json) = app
            .call_json(Method::POST, "/user-role/enroll", Some(claims), Body::from("nope"))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Invalid request body");

        let (status, _) = app.call_json(Method::GET, "/user-role", None, Body::empty()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
