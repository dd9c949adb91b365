//! Catalog storage and paginated listing.
//!
//! Listings walk the table in insertion order and resume after the entry
//! named by the cursor. The scan asks for one row more than the page size;
//! seeing that extra row is the only signal that another page exists.

use crate::{
    models::catalog::{CatalogEntry, CatalogPage, CatalogRow, Cursor},
    services::subscriptions::{SubscriptionError, SubscriptionService},
};
use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_PAGE_SIZE: i64 = 12;
pub const MAX_PAGE_SIZE: i64 = 100;

const INVALID_LIMIT: &str =
    "invalid limit parameter. must be a positive number between 1 and 100";
const INVALID_CURSOR: &str = "invalid cursor";

const ENTRY_COLUMNS: &str = "app_id, app_slug, version_id, publisher_id, upload_timestamp, \
     version_number, storage_path, app_name, app_description, manifest_content, processed_files";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{0}")]
    InvalidArgument(&'static str),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("stored catalog entry is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error(transparent)]
    Subscriptions(#[from] SubscriptionError),
}

/// One bounded read of the catalog.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanRequest {
    pub limit: i64,
    /// Resume strictly after the entry with this app id.
    pub exclusive_start: Option<String>,
    /// Restrict to these app ids.
    pub app_ids: Option<Vec<String>>,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn insert(&self, entry: &CatalogEntry) -> Result<(), CatalogError>;

    /// Entries in native order, honouring `request`.
    async fn scan(&self, request: ScanRequest) -> Result<Vec<CatalogEntry>, CatalogError>;

    async fn get(&self, app_id: &str) -> Result<Option<CatalogEntry>, CatalogError>;
}

/// `catalog_entries` table; `seq` gives the native order.
#[derive(Clone)]
pub struct SqliteCatalogStore {
    db: Arc<SqlitePool>,
}

impl SqliteCatalogStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalogStore {
    async fn insert(&self, entry: &CatalogEntry) -> Result<(), CatalogError> {
        let processed_files = serde_json::to_string(&entry.processed_files)?;
        sqlx::query(
            r#"
            INSERT INTO catalog_entries (
                app_id, app_slug, version_id, publisher_id, upload_timestamp, version_number,
                storage_path, app_name, app_description, manifest_content, processed_files
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.app_id)
        .bind(&entry.app_slug)
        .bind(&entry.version_id)
        .bind(&entry.publisher_id)
        .bind(entry.upload_timestamp)
        .bind(entry.version_number)
        .bind(&entry.storage_path)
        .bind(&entry.app_name)
        .bind(&entry.app_description)
        .bind(&entry.manifest_content)
        .bind(processed_files)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn scan(&self, request: ScanRequest) -> Result<Vec<CatalogEntry>, CatalogError> {
        if request.app_ids.as_ref().is_some_and(Vec::is_empty) {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT ");
        qb.push(ENTRY_COLUMNS);
        qb.push(" FROM catalog_entries WHERE 1 = 1");
        if let Some(start) = request.exclusive_start {
            // Unknown ids compare against NULL and match nothing.
            qb.push(" AND seq > (SELECT seq FROM catalog_entries WHERE app_id = ");
            qb.push_bind(start);
            qb.push(")");
        }
        if let Some(app_ids) = request.app_ids {
            qb.push(" AND (");
            let mut clause = qb.separated(" OR ");
            for app_id in app_ids {
                clause.push("app_id = ");
                clause.push_bind_unseparated(app_id);
            }
            qb.push(")");
        }
        qb.push(" ORDER BY seq ASC LIMIT ");
        qb.push_bind(request.limit);

        let rows = qb
            .build_query_as::<CatalogRow>()
            .fetch_all(&*self.db)
            .await?;
        rows.into_iter()
            .map(|row| CatalogEntry::try_from(row).map_err(CatalogError::from))
            .collect()
    }

    async fn get(&self, app_id: &str) -> Result<Option<CatalogEntry>, CatalogError> {
        let row = sqlx::query_as::<_, CatalogRow>(&format!(
            "SELECT {} FROM catalog_entries WHERE app_id = ?",
            ENTRY_COLUMNS
        ))
        .bind(app_id)
        .fetch_optional(&*self.db)
        .await?;
        row.map(CatalogEntry::try_from)
            .transpose()
            .map_err(CatalogError::from)
    }
}

/// Raw listing parameters as they arrive on the query string.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListRequest<'a> {
    pub limit: Option<&'a str>,
    pub cursor: Option<&'a str>,
    /// Only list apps this user is subscribed to.
    pub subscribed_user: Option<&'a str>,
}

#[derive(Clone)]
pub struct CatalogQueryEngine {
    store: Arc<dyn CatalogStore>,
    subscriptions: SubscriptionService,
}

impl CatalogQueryEngine {
    pub fn new(store: Arc<dyn CatalogStore>, subscriptions: SubscriptionService) -> Self {
        Self {
            store,
            subscriptions,
        }
    }

    pub async fn list(&self, request: ListRequest<'_>) -> Result<CatalogPage, CatalogError> {
        let limit = parse_limit(request.limit)?;
        let exclusive_start = request
            .cursor
            .filter(|raw| !raw.is_empty())
            .map(decode_cursor)
            .transpose()?
            .map(|cursor| cursor.app_id);

        let app_ids = match request.subscribed_user {
            Some(user_id) => {
                let ids = self.subscriptions.subscribed_app_ids(user_id).await?;
                if ids.is_empty() {
                    debug!(user_id, "user has no subscriptions");
                    return Ok(CatalogPage::empty());
                }
                Some(ids)
            }
            None => None,
        };

        debug!(limit, cursor = ?exclusive_start, filtered = app_ids.is_some(), "scanning catalog");
        let mut apps = self
            .store
            .scan(ScanRequest {
                limit: limit + 1,
                exclusive_start,
                app_ids,
            })
            .await?;

        let next_cursor = if apps.len() as i64 > limit {
            apps.truncate(limit as usize);
            apps.last().map(|last| encode_cursor(&last.app_id)).transpose()?
        } else {
            None
        };

        Ok(CatalogPage {
            count: apps.len(),
            apps,
            next_cursor,
        })
    }

    pub async fn get(&self, app_id: &str) -> Result<Option<CatalogEntry>, CatalogError> {
        self.store.get(app_id).await
    }
}

fn parse_limit(raw: Option<&str>) -> Result<i64, CatalogError> {
    let Some(raw) = raw.filter(|raw| !raw.is_empty()) else {
        return Ok(DEFAULT_PAGE_SIZE);
    };
    match raw.parse::<i64>() {
        Ok(limit) if (1..=MAX_PAGE_SIZE).contains(&limit) => Ok(limit),
        _ => Err(CatalogError::InvalidArgument(INVALID_LIMIT)),
    }
}

fn decode_cursor(raw: &str) -> Result<Cursor, CatalogError> {
    let decoded =
        urlencoding::decode(raw).map_err(|_| CatalogError::InvalidArgument(INVALID_CURSOR))?;
    serde_json::from_str::<Cursor>(&decoded)
        .map_err(|_| CatalogError::InvalidArgument(INVALID_CURSOR))
}

fn encode_cursor(app_id: &str) -> Result<String, CatalogError> {
    let cursor = Cursor {
        app_id: app_id.to_string(),
    };
    Ok(serde_json::to_string(&cursor)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(app_id: &str) -> CatalogEntry {
        CatalogEntry {
            app_id: app_id.into(),
            app_slug: format!("slug-{}", app_id),
            version_id: "v1".into(),
            publisher_id: "pub-1".into(),
            upload_timestamp: Utc::now(),
            version_number: 1,
            storage_path: format!("app/slug-{}/", app_id),
            app_name: app_id.to_uppercase(),
            app_description: String::new(),
            manifest_content: None,
            processed_files: vec![format!("app/slug-{}/index.html", app_id)],
        }
    }

    /// Counts scans so tests can assert none happened.
    struct CountingStore {
        inner: SqliteCatalogStore,
        scans: AtomicUsize,
    }

    #[async_trait]
    impl CatalogStore for CountingStore {
        async fn insert(&self, entry: &CatalogEntry) -> Result<(), CatalogError> {
            self.inner.insert(entry).await
        }

        async fn scan(&self, request: ScanRequest) -> Result<Vec<CatalogEntry>, CatalogError> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            self.inner.scan(request).await
        }

        async fn get(&self, app_id: &str) -> Result<Option<CatalogEntry>, CatalogError> {
            self.inner.get(app_id).await
        }
    }

    struct Fixture {
        store: Arc<CountingStore>,
        subscriptions: SubscriptionService,
        engine: CatalogQueryEngine,
    }

    async fn fixture(app_ids: &[&str]) -> Fixture {
        let pool = Arc::new(memory_pool().await);
        let store = Arc::new(CountingStore {
            inner: SqliteCatalogStore::new(pool.clone()),
            scans: AtomicUsize::new(0),
        });
        for app_id in app_ids {
            store.insert(&entry(app_id)).await.unwrap();
        }
        let subscriptions = SubscriptionService::new(pool);
        let engine = CatalogQueryEngine::new(store.clone(), subscriptions.clone());
        Fixture {
            store,
            subscriptions,
            engine,
        }
    }

    fn ids(page: &CatalogPage) -> Vec<&str> {
        page.apps.iter().map(|app| app.app_id.as_str()).collect()
    }

    fn list<'a>(limit: Option<&'a str>, cursor: Option<&'a str>) -> ListRequest<'a> {
        ListRequest {
            limit,
            cursor,
            subscribed_user: None,
        }
    }

    #[tokio::test]
    async fn entries_round_trip_through_the_store() {
        let fx = fixture(&[]).await;
        let original = entry("a");
        fx.store.insert(&original).await.unwrap();
        assert_eq!(fx.engine.get("a").await.unwrap(), Some(original));
        assert_eq!(fx.engine.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn short_read_has_no_next_cursor() {
        let fx = fixture(&["a", "b"]).await;
        let page = fx.engine.list(list(Some("2"), None)).await.unwrap();
        assert_eq!(ids(&page), vec!["a", "b"]);
        assert_eq!(page.count, 2);
        assert_eq!(page.next_cursor, None);
    }

    #[tokio::test]
    async fn extra_row_yields_cursor_at_last_kept_entry() {
        let fx = fixture(&["a", "b", "c"]).await;
        let page = fx.engine.list(list(Some("2"), None)).await.unwrap();
        assert_eq!(ids(&page), vec!["a", "b"]);
        assert_eq!(page.next_cursor.as_deref(), Some(r#"{"appId":"b"}"#));
    }

    #[tokio::test]
    async fn pages_resume_after_the_cursor() {
        let fx = fixture(&["a", "b", "c", "d", "e"]).await;
        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let encoded = cursor.as_deref().map(|c| urlencoding::encode(c).into_owned());
            let page = fx
                .engine
                .list(list(Some("2"), encoded.as_deref()))
                .await
                .unwrap();
            seen.extend(ids(&page).into_iter().map(String::from));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, vec!["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn plain_json_cursor_is_accepted() {
        let fx = fixture(&["a", "b", "c"]).await;
        let page = fx
            .engine
            .list(list(None, Some(r#"{"appId":"a"}"#)))
            .await
            .unwrap();
        assert_eq!(ids(&page), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn unknown_cursor_yields_an_empty_page() {
        let fx = fixture(&["a", "b"]).await;
        let page = fx
            .engine
            .list(list(None, Some(r#"{"appId":"gone"}"#)))
            .await
            .unwrap();
        assert_eq!(page, CatalogPage::empty());
    }

    #[tokio::test]
    async fn limit_defaults_and_bounds() {
        let app_ids: Vec<String> = (0..15).map(|i| format!("app-{:02}", i)).collect();
        let refs: Vec<&str> = app_ids.iter().map(String::as_str).collect();
        let fx = fixture(&refs).await;

        let page = fx.engine.list(ListRequest::default()).await.unwrap();
        assert_eq!(page.count, 12);
        assert!(page.next_cursor.is_some());

        assert_eq!(fx.engine.list(list(Some("1"), None)).await.unwrap().count, 1);
        assert_eq!(fx.engine.list(list(Some("100"), None)).await.unwrap().count, 15);

        for bad in ["0", "101", "-1", "ten", "1.5"] {
            let err = fx.engine.list(list(Some(bad), None)).await.unwrap_err();
            assert_eq!(err.to_string(), INVALID_LIMIT, "{bad}");
        }
    }

    #[tokio::test]
    async fn malformed_cursors_are_invalid_arguments() {
        let fx = fixture(&["a"]).await;
        for bad in ["not-json", "%7B%22appId%22", r#"{"appId":5}"#, "[]", "%E0%A4%A"] {
            let err = fx.engine.list(list(None, Some(bad))).await.unwrap_err();
            assert!(
                matches!(err, CatalogError::InvalidArgument(msg) if msg == INVALID_CURSOR),
                "{bad}"
            );
        }
    }

    #[tokio::test]
    async fn subscription_filter_restricts_results() {
        let fx = fixture(&["a", "b", "c", "d"]).await;
        fx.subscriptions.subscribe("b", "user-1").await.unwrap();
        fx.subscriptions.subscribe("d", "user-1").await.unwrap();
        fx.subscriptions.subscribe("a", "user-2").await.unwrap();

        let request = ListRequest {
            subscribed_user: Some("user-1"),
            ..ListRequest::default()
        };
        let page = fx.engine.list(request).await.unwrap();
        assert_eq!(ids(&page), vec!["b", "d"]);

        let first = fx
            .engine
            .list(ListRequest {
                limit: Some("1"),
                ..request
            })
            .await
            .unwrap();
        assert_eq!(ids(&first), vec!["b"]);
        let rest = fx
            .engine
            .list(ListRequest {
                limit: Some("1"),
                cursor: first.next_cursor.as_deref(),
                ..request
            })
            .await
            .unwrap();
        assert_eq!(ids(&rest), vec!["d"]);
        assert_eq!(rest.next_cursor, None);
    }

    #[tokio::test]
    async fn no_subscriptions_skips_the_scan() {
        let fx = fixture(&["a", "b"]).await;
        let page = fx
            .engine
            .list(ListRequest {
                subscribed_user: Some("lonely"),
                ..ListRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(page, CatalogPage::empty());
        assert_eq!(fx.store.scans.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn page_serializes_in_camel_case() {
        let fx = fixture(&["a", "b"]).await;
        let page = fx.engine.list(list(Some("1"), None)).await.unwrap();
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["count"], 1);
        assert_eq!(json["nextCursor"], r#"{"appId":"a"}"#);
        assert_eq!(json["apps"][0]["appSlug"], "slug-a");
        assert_eq!(json["apps"][0]["versionNumber"], 1);
    }
}
