//! In-process [`ObjectBackend`]
//!
//! Keeps objects in a sorted map so listings come back in key order, the
//! same way S3 returns them. Page size, latency and failures can be tuned to
//! exercise the facade's pagination, cancellation and error paths.

use super::{ErrorKind, ListPage, ObjectBackend, ObjectInfo, Result, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Default number of keys per listing page (matches S3)
const DEFAULT_PAGE_SIZE: usize = 1000;

/// Size of the chunks written by [`MemoryBackend::get_to_file`]
const WRITE_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    etag: String,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn info(&self, key: &str) -> ObjectInfo {
        ObjectInfo {
            key: key.to_string(),
            size: self.data.len() as u64,
            last_modified: self.last_modified,
            etag: self.etag.clone(),
        }
    }
}

/// Object backend that lives entirely in memory
pub struct MemoryBackend {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    page_size: usize,
    latency: Option<Duration>,
    denied: RwLock<HashSet<String>>,
    fail_next: Mutex<Option<ErrorKind>>,
    stall_cursor: AtomicBool,
    closed: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            latency: None,
            denied: RwLock::new(HashSet::new()),
            fail_next: Mutex::new(None),
            stall_cursor: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Upper bound on keys per page, applied on top of the caller's `max_keys`
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Sleep this long before every operation (and between file chunks)
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Store an object directly, bypassing the facade
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        let data = data.into();
        let object = stored(data, super::DEFAULT_CONTENT_TYPE);
        write_lock(&self.objects).insert(key.into(), object);
    }

    /// Every access to `key` fails with [`StoreError::Permission`]
    pub fn deny(&self, key: impl Into<String>) {
        write_lock(&self.denied).insert(key.into());
    }

    /// The next operation of any kind fails with an error of `kind`
    pub fn fail_next(&self, kind: ErrorKind) {
        *lock(&self.fail_next) = Some(kind);
    }

    /// Echo the request cursor back instead of advancing it
    pub fn stall_cursor(&self) {
        self.stall_cursor.store(true, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        read_lock(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        read_lock(&self.objects)
            .get(key)
            .map(|o| o.content_type.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Common preamble: closed check, latency, injected faults, access control
    async fn enter(&self, key: Option<&str>) -> Result<()> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(kind) = lock(&self.fail_next).take() {
            return Err(StoreError::from_kind(kind, "injected failure"));
        }
        if let Some(key) = key {
            if read_lock(&self.denied).contains(key) {
                return Err(StoreError::Permission(format!("access denied to {key}")));
            }
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<StoredObject> {
        read_lock(&self.objects)
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    fn scheme(&self) -> &str {
        "mem"
    }

    async fn list_page(
        &self,
        _bucket: &str,
        prefix: &str,
        cursor: Option<&str>,
        max_keys: Option<usize>,
    ) -> Result<ListPage> {
        self.enter(None).await?;

        let limit = max_keys.unwrap_or(self.page_size).min(self.page_size).max(1);
        let start = match cursor {
            Some(after) => Bound::Excluded(after.to_string()),
            None => Bound::Included(prefix.to_string()),
        };

        let objects = read_lock(&self.objects);
        let mut matching = objects
            .range((start, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix));

        let page: Vec<ObjectInfo> = matching
            .by_ref()
            .take(limit)
            .map(|(key, obj)| obj.info(key))
            .collect();
        let truncated = matching.next().is_some();

        let next_cursor = if !truncated {
            None
        } else if self.stall_cursor.load(Ordering::Relaxed) && cursor.is_some() {
            cursor.map(str::to_string)
        } else {
            page.last().map(|o| o.key.clone())
        };

        Ok(ListPage {
            objects: page,
            next_cursor,
        })
    }

    async fn put_bytes(
        &self,
        _bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<()> {
        self.enter(Some(key)).await?;
        write_lock(&self.objects).insert(key.to_string(), stored(data, content_type));
        Ok(())
    }

    async fn put_file(
        &self,
        _bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<()> {
        self.enter(Some(key)).await?;
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(format!("local file {}", path.display())));
            }
            Err(e) => return Err(e.into()),
        };
        write_lock(&self.objects).insert(key.to_string(), stored(data.into(), content_type));
        Ok(())
    }

    async fn get_bytes(&self, _bucket: &str, key: &str) -> Result<Bytes> {
        self.enter(Some(key)).await?;
        Ok(self.get(key)?.data)
    }

    async fn get_to_file(&self, _bucket: &str, key: &str, path: &Path) -> Result<u64> {
        self.enter(Some(key)).await?;
        let object = self.get(key)?;

        let mut file = tokio::fs::File::create(path).await?;
        let mut written = 0u64;
        for chunk in object.data.chunks(WRITE_CHUNK) {
            file.write_all(chunk).await?;
            written += chunk.len() as u64;
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
        }
        file.flush().await?;
        Ok(written)
    }

    async fn head(&self, _bucket: &str, key: &str) -> Result<ObjectInfo> {
        self.enter(Some(key)).await?;
        Ok(self.get(key)?.info(key))
    }

    async fn delete(&self, _bucket: &str, key: &str) -> Result<bool> {
        self.enter(Some(key)).await?;
        write_lock(&self.objects).remove(key);
        // S3 reports success for absent keys too
        Ok(true)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

fn stored(data: Bytes, content_type: &str) -> StoredObject {
    StoredObject {
        etag: format!("{:x}", md5::compute(&data)),
        data,
        content_type: content_type.to_string(),
        last_modified: Utc::now(),
    }
}

// A poisoned lock only means another test thread panicked mid-update;
// the map itself is still usable.
fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

fn lock<T>(lock: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|e| e.into_inner())
}
