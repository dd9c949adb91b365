//! src/services/storage_service.rs
//!
//! StorageService: the durable object store behind uploads and extracted
//! app files. Metadata lives in SQLite; payloads live on disk sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`.

use crate::models::{metadata::ObjectMetadata, object::StoredObject};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut, stream};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Blob operations the ingestion pipeline depends on.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write (or overwrite) an object.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        data: Bytes,
    ) -> StorageResult<StoredObject>;

    /// Read an object's full payload.
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes>;

    /// User metadata recorded with the object.
    async fn metadata(&self, bucket: &str, key: &str) -> StorageResult<HashMap<String, String>>;

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()>;
}

/// StorageService provides the object operations:
/// - Upload an object (writes bytes to disk and upserts metadata into SQLite)
/// - Get object (reads metadata from SQLite and payload from disk)
/// - List keys under a prefix
/// - Delete object (removes the row and the payload)
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

impl StorageService {
    /// Create a new StorageService backed by the provided SQLite pool and
    /// using `base_path` as the root directory for object payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Rejects keys that begin or end with `/` or have a `..` segment.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.ends_with('/') || key.split('/').any(|seg| seg == "..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    fn ensure_bucket_name_safe(&self, name: &str) -> StorageResult<()> {
        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(StorageError::InvalidBucketName {
                name: name.to_string(),
                reason: "must be between 3 and 63 characters".into(),
            });
        }

        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(StorageError::InvalidBucketName {
                name: name.to_string(),
                reason: "allowed characters are lowercase letters, digits, dots, and hyphens"
                    .into(),
            });
        }

        if name.starts_with('.')
            || name.ends_with('.')
            || name.starts_with('-')
            || name.ends_with('-')
            || name.contains("..")
        {
            return Err(StorageError::InvalidBucketName {
                name: name.to_string(),
                reason: "must start and end with a lowercase letter or digit".into(),
            });
        }

        Ok(())
    }

    fn ensure_location_safe(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.ensure_bucket_name_safe(bucket)?;
        self.ensure_key_safe(key)
    }

    /// Compute the physical base folder path for a bucket.
    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(bucket_name);
        path
    }

    /// Two-level shard identifiers: the first two bytes of MD5(bucket/key)
    /// as lowercase hex.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Combines base_path/bucket/{shard}/{shard}/{key}.
    /// Parent directories may not exist yet.
    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_object(&self, bucket: &str, key: &str) -> StorageResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(
            "SELECT id, bucket, key, filename, content_type, size_bytes, etag, last_modified
             FROM objects
             WHERE bucket = ? AND key = ?",
        )
        .bind(bucket)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    /// Stream-upload an object to disk and update metadata.
    ///
    /// - Writes bytes incrementally to a temporary file.
    /// - Computes MD5/etag and size while streaming.
    /// - Atomically renames into final location.
    /// - Upserts the object row and replaces its user metadata.
    pub async fn upload_object_stream<S>(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        user_metadata: &[(String, String)],
        stream: S,
    ) -> StorageResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        self.ensure_location_safe(bucket, key)?;

        let file_path = self.object_path(bucket, key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }

        let filename = key.rsplit('/').next().unwrap_or(key).to_string();
        let etag = format!("{:x}", digest.compute());

        let mut tx = self.db.begin().await?;
        let object = sqlx::query_as::<_, StoredObject>(
            r#"
            INSERT INTO objects (
                id, bucket, key, filename, content_type, size_bytes, etag, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket, key) DO UPDATE SET
                filename = excluded.filename,
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING id, bucket, key, filename, content_type, size_bytes, etag, last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket)
        .bind(key)
        .bind(&filename)
        .bind(content_type)
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM object_metadata WHERE object_id = ?")
            .bind(object.id)
            .execute(&mut *tx)
            .await?;
        for (meta_key, meta_value) in user_metadata {
            sqlx::query(
                "INSERT INTO object_metadata (id, object_id, key, value) VALUES (?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4())
            .bind(object.id)
            .bind(meta_key)
            .bind(meta_value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(bucket, key, size_bytes, "stored object");
        Ok(object)
    }

    /// Write an in-memory payload.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        data: Bytes,
    ) -> StorageResult<StoredObject> {
        let body = stream::once(async move { Ok::<_, io::Error>(data) });
        self.upload_object_stream(bucket, key, content_type, &[], body)
            .await
    }

    /// Fetch an object for reading.
    ///
    /// Returns metadata and an opened File handle ready for streaming out.
    /// Returns ObjectNotFound if metadata exists but physical file is missing.
    pub async fn get_object_reader(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<(StoredObject, File)> {
        self.ensure_location_safe(bucket, key)?;
        let object = self.fetch_object(bucket, key).await?;

        let file_path = self.object_path(bucket, key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok((object, file))
    }

    /// Read the whole payload into memory.
    pub async fn get_object_bytes(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        self.ensure_location_safe(bucket, key)?;
        self.fetch_object(bucket, key).await?;
        let file_path = self.object_path(bucket, key);
        match fs::read(&file_path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    #[cfg(test)]
    pub async fn get_object_metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<StoredObject> {
        self.ensure_location_safe(bucket, key)?;
        self.fetch_object(bucket, key).await
    }

    /// User metadata for an object as a key/value map.
    pub async fn get_user_metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<HashMap<String, String>> {
        self.ensure_location_safe(bucket, key)?;
        let object = self.fetch_object(bucket, key).await?;
        let rows = sqlx::query_as::<_, ObjectMetadata>(
            "SELECT id, object_id, key, value FROM object_metadata WHERE object_id = ?",
        )
        .bind(object.id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().map(|row| (row.key, row.value)).collect())
    }

    /// Keys in `bucket` starting with `prefix`, in lexicographic order.
    #[cfg(test)]
    pub async fn list_keys(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        self.ensure_bucket_name_safe(bucket)?;
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT key FROM objects
             WHERE bucket = ? AND substr(key, 1, length(?)) = ?
             ORDER BY key ASC",
        )
        .bind(bucket)
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&*self.db)
        .await?;
        Ok(keys)
    }

    /// Remember that an upload to `bucket/key` was accepted. Returns `false`
    /// when one was already recorded.
    pub async fn record_upload_receipt(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        let result = sqlx::query(
            "INSERT INTO upload_receipts (bucket, key, received_at) VALUES (?, ?, ?)
             ON CONFLICT(bucket, key) DO NOTHING",
        )
        .bind(bucket)
        .bind(key)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Forget a recorded upload so the same credential can be used again.
    pub async fn release_upload_receipt(&self, bucket: &str, key: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM upload_receipts WHERE bucket = ? AND key = ?")
            .bind(bucket)
            .bind(key)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Delete an object row, its metadata and its payload.
    ///
    /// - Deletes physical file (already-missing files are fine)
    /// - Prunes empty bucket directories
    pub async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<StoredObject> {
        self.ensure_location_safe(bucket, key)?;
        let object = self.fetch_object(bucket, key).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM object_metadata WHERE object_id = ?")
            .bind(object.id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM objects WHERE id = ?")
            .bind(object.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let file_path = self.object_path(bucket, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(bucket);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }

        Ok(object)
    }

    /// Recursively remove empty directories up to bucket root.
    ///
    /// Stops when:
    /// - directory not empty
    /// - directory not found
    /// - reached root
    /// - encountered unexpected I/O errors
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for StorageService {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        data: Bytes,
    ) -> StorageResult<StoredObject> {
        self.put_object(bucket, key, Some(content_type.to_string()), data)
            .await
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        self.get_object_bytes(bucket, key).await
    }

    async fn metadata(&self, bucket: &str, key: &str) -> StorageResult<HashMap<String, String>> {
        self.get_user_metadata(bucket, key).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.delete_object(bucket, key).await.map(|_| ())
    }
}
