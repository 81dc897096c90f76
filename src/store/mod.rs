//! Object store facade
//!
//! [`ObjectStore`] presents list / upload / download / exists / delete on a
//! single bucket and hides pagination and transfer-strategy selection behind
//! plain async calls. The actual storage API sits behind the [`ObjectBackend`]
//! trait; [`crate::s3::S3Client`] talks to S3-compatible services and
//! [`memory::MemoryBackend`] keeps everything in process.
//!
//! Listings are assembled from sequential pages without snapshot isolation.
//! If the bucket changes while a listing is in progress the result may match
//! neither the old nor the new contents exactly.

pub mod error;
pub mod memory;

pub use error::{ErrorKind, Result, StoreError};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Content type used when the caller does not supply one
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Metadata snapshot of one stored object
///
/// Taken at listing (or stat) time; it owns no backend resources and may be
/// stale by the time it is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Object key, unique within the bucket
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Backend-assigned time of the last write
    pub last_modified: DateTime<Utc>,
    /// Opaque content fingerprint, without surrounding quotes
    pub etag: String,
}

/// One page of a listing as returned by a backend
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,
    /// Cursor for the next request; `None` once the backend stops truncating
    pub next_cursor: Option<String>,
}

/// Storage API the facade delegates to
///
/// Implementations must be safe to call from many tasks at once. Failures are
/// reported through [`StoreError`] with not-found, permission and transient
/// conditions mapped to their dedicated variants.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Scheme used in locators (`s3` in `s3://bucket/key`)
    fn scheme(&self) -> &str;

    /// Fetch one bounded listing page
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        cursor: Option<&str>,
        max_keys: Option<usize>,
    ) -> Result<ListPage>;

    /// Single-request write of an in-memory payload
    async fn put_bytes(&self, bucket: &str, key: &str, data: Bytes, content_type: &str)
        -> Result<()>;

    /// Managed transfer of a local file; the backend picks single or multipart
    async fn put_file(&self, bucket: &str, key: &str, path: &Path, content_type: &str)
        -> Result<()>;

    /// Read the whole body into memory
    async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Bytes>;

    /// Stream the body into `path`, returning the number of bytes written
    async fn get_to_file(&self, bucket: &str, key: &str, path: &Path) -> Result<u64>;

    /// Metadata-only lookup
    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectInfo>;

    /// Remove `key`; returns whether the backend reported a removal
    async fn delete(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Release pooled connections. Must be idempotent.
    fn close(&self) {}
}

/// Facade over one bucket of an [`ObjectBackend`]
///
/// Cheap to share behind an `Arc`; it holds no mutable state besides the
/// closed flag.
pub struct ObjectStore {
    bucket: String,
    backend: Arc<dyn ObjectBackend>,
    page_size: Option<usize>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("bucket", &self.bucket)
            .field("scheme", &self.backend.scheme())
            .field("page_size", &self.page_size)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl ObjectStore {
    /// Create a facade for `bucket`. Performs no I/O.
    pub fn new(bucket: impl Into<String>, backend: Arc<dyn ObjectBackend>) -> Result<Self> {
        let bucket = bucket.into();
        if bucket.trim().is_empty() {
            return Err(StoreError::Configuration(
                "bucket name must not be empty".to_string(),
            ));
        }

        Ok(Self {
            bucket,
            backend,
            page_size: None,
            closed: AtomicBool::new(false),
        })
    }

    /// Request at most `page_size` keys per listing round trip
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Display locator for `key`, e.g. `s3://bucket/key`
    pub fn locator(&self, key: &str) -> String {
        format!("{}://{}/{}", self.backend.scheme(), self.bucket, key)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// List every object under `prefix` as one materialized sequence.
    ///
    /// Order is whatever the backend yields (lexicographic for S3).
    pub async fn list_objects(
        &self,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ObjectInfo>> {
        let objects: Vec<ObjectInfo> = self.list_pages(prefix, cancel).try_concat().await?;
        debug!(bucket = %self.bucket, prefix = %prefix, count = objects.len(), "listed objects");
        Ok(objects)
    }

    /// Enumerate objects under `prefix` page by page.
    ///
    /// Cursors never leave the facade; each item is the content of one page.
    pub fn list_pages<'a>(
        &'a self,
        prefix: &'a str,
        cancel: &'a CancellationToken,
    ) -> impl Stream<Item = Result<Vec<ObjectInfo>>> + 'a {
        // State: Some(cursor) while more pages remain
        stream::try_unfold(Some(None::<String>), move |state| async move {
            let Some(cursor) = state else {
                return Ok(None);
            };

            let page = self
                .run(
                    cancel,
                    self.backend
                        .list_page(&self.bucket, prefix, cursor.as_deref(), self.page_size),
                )
                .await?;

            let next = match page.next_cursor {
                Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                    return Err(StoreError::backend(format!(
                        "listing cursor did not advance past {next:?}"
                    )));
                }
                Some(next) => Some(Some(next)),
                None => None,
            };

            Ok(Some((page.objects, next)))
        })
    }

    /// Write `data` to `key` in one request, replacing any existing object.
    ///
    /// Returns the object's locator.
    pub async fn upload_from_bytes(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        content_type: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        validate_key(key)?;
        let data = data.into();
        let size = data.len();
        let content_type = content_type.unwrap_or(DEFAULT_CONTENT_TYPE);

        self.run(
            cancel,
            self.backend.put_bytes(&self.bucket, key, data, content_type),
        )
        .await?;

        info!(bucket = %self.bucket, key = %key, size, "uploaded object");
        Ok(self.locator(key))
    }

    /// Upload a local file to `key` using the backend's managed transfer.
    ///
    /// A missing `path` fails with [`StoreError::NotFound`]. Without an
    /// explicit content type one is guessed from the file extension.
    pub async fn upload_from_path(
        &self,
        key: &str,
        path: impl AsRef<Path>,
        content_type: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        validate_key(key)?;
        let path = path.as_ref();

        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(format!(
                    "local file {}",
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            )));
        }

        let content_type = match content_type {
            Some(ct) => ct.to_string(),
            None => mime_guess::from_path(path)
                .first_raw()
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string(),
        };

        self.run(
            cancel,
            self.backend.put_file(&self.bucket, key, path, &content_type),
        )
        .await?;

        info!(
            bucket = %self.bucket,
            key = %key,
            size = metadata.len(),
            source = %path.display(),
            "uploaded file"
        );
        Ok(self.locator(key))
    }

    /// Fetch the full body of `key` into memory
    pub async fn download(&self, key: &str, cancel: &CancellationToken) -> Result<Bytes> {
        validate_key(key)?;
        let data = self
            .run(cancel, self.backend.get_bytes(&self.bucket, key))
            .await?;
        debug!(bucket = %self.bucket, key = %key, size = data.len(), "downloaded object");
        Ok(data)
    }

    /// Stream `key` into `destination` without buffering it in memory.
    ///
    /// The body lands in a sibling partial file that is renamed over
    /// `destination` only once complete; on failure or cancellation the
    /// partial file is removed and `destination` is left untouched.
    pub async fn download_to_path(
        &self,
        key: &str,
        destination: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        validate_key(key)?;
        let destination = destination.as_ref();
        let partial = partial_path(destination)?;

        let result = self
            .run(
                cancel,
                self.backend.get_to_file(&self.bucket, key, &partial),
            )
            .await;

        let written = match result {
            Ok(written) => written,
            Err(e) => {
                remove_partial(&partial).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&partial, destination).await {
            remove_partial(&partial).await;
            return Err(e.into());
        }

        info!(
            bucket = %self.bucket,
            key = %key,
            size = written,
            destination = %destination.display(),
            "downloaded object to file"
        );
        Ok(written)
    }

    /// Delete `key`. Deleting an absent key succeeds.
    pub async fn delete(&self, key: &str, cancel: &CancellationToken) -> Result<bool> {
        validate_key(key)?;
        let removed = match self
            .run(cancel, self.backend.delete(&self.bucket, key))
            .await
        {
            Ok(removed) => removed,
            Err(StoreError::NotFound(_)) => true,
            Err(e) => return Err(e),
        };
        debug!(bucket = %self.bucket, key = %key, removed, "deleted object");
        Ok(removed)
    }

    /// Metadata-only existence check.
    ///
    /// Only "not found" becomes `false`; permission, throttling and every
    /// other failure propagate.
    pub async fn exists(&self, key: &str, cancel: &CancellationToken) -> Result<bool> {
        validate_key(key)?;
        match self.run(cancel, self.backend.head(&self.bucket, key)).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Metadata-only lookup returning the object's record
    pub async fn stat(&self, key: &str, cancel: &CancellationToken) -> Result<ObjectInfo> {
        validate_key(key)?;
        self.run(cancel, self.backend.head(&self.bucket, key)).await
    }

    /// Check that the bucket is reachable and listable
    pub async fn health_check(&self, cancel: &CancellationToken) -> Result<()> {
        self.run(
            cancel,
            self.backend.list_page(&self.bucket, "", None, Some(1)),
        )
        .await
        .map(|_| ())
    }

    /// Release the backend's pooled connections. Safe to call repeatedly.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.backend.close();
        info!(bucket = %self.bucket, "object store closed");
    }

    /// Run `f` with this store and close it on every exit path,
    /// including early returns, errors and the future being dropped.
    pub async fn scoped<F, Fut, T>(self: Arc<Self>, f: F) -> Result<T>
    where
        F: FnOnce(Arc<ObjectStore>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        struct CloseGuard(Arc<ObjectStore>);

        impl Drop for CloseGuard {
            fn drop(&mut self) {
                self.0.close();
            }
        }

        let _guard = CloseGuard(Arc::clone(&self));
        f(self).await
    }

    /// Race `fut` against `cancel`; dropping the loser aborts in-flight I/O
    async fn run<T, F>(&self, cancel: &CancellationToken, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StoreError::Cancelled),
            res = fut => res,
        }
    }
}

impl Drop for ObjectStore {
    fn drop(&mut self) {
        self.close();
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StoreError::backend("object key must not be empty"));
    }
    Ok(())
}

/// Sibling path used while a download is in flight
fn partial_path(destination: &Path) -> Result<PathBuf> {
    static SEQ: AtomicU64 = AtomicU64::new(0);

    let name = destination.file_name().ok_or_else(|| {
        StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} has no file name", destination.display()),
        ))
    })?;
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    Ok(destination.with_file_name(format!(
        ".{}.{}-{}.partial",
        name.to_string_lossy(),
        std::process::id(),
        seq
    )))
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial download"),
    }
}
