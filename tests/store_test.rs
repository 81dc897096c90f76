use bucketstore::{CancellationToken, ErrorKind, MemoryBackend, ObjectStore, StoreError};
use bytes::Bytes;
use futures::TryStreamExt;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn store_with(backend: &Arc<MemoryBackend>) -> ObjectStore {
    ObjectStore::new("test-bucket", backend.clone()).unwrap()
}

fn seeded(page_size: usize, keys: &[&str]) -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new().with_page_size(page_size));
    for key in keys {
        backend.insert(*key, format!("body of {key}"));
    }
    backend
}

const KEYS: &[&str] = &[
    "logs/2024/01.txt",
    "logs/2024/02.txt",
    "logs/2024/03.txt",
    "logs/2025/01.txt",
    "reports/q1.pdf",
];

#[tokio::test]
async fn test_listing_independent_of_page_size() {
    let cancel = CancellationToken::new();

    for page_size in [1, 2, 3, KEYS.len(), 1000] {
        let backend = seeded(page_size, KEYS);
        let store = store_with(&backend);

        let keys: Vec<String> = store
            .list_objects("", &cancel)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, KEYS, "page size {page_size}");
    }
}

#[tokio::test]
async fn test_listing_filters_by_prefix() {
    let cancel = CancellationToken::new();
    let backend = seeded(2, KEYS);
    let store = store_with(&backend);

    let objects = store.list_objects("logs/2024/", &cancel).await.unwrap();
    assert_eq!(objects.len(), 3);
    assert!(objects.iter().all(|o| o.key.starts_with("logs/2024/")));

    let objects = store.list_objects("reports/", &cancel).await.unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].size, "body of reports/q1.pdf".len() as u64);
}

#[tokio::test]
async fn test_empty_listing() {
    let cancel = CancellationToken::new();
    let backend = seeded(2, KEYS);
    let store = store_with(&backend);

    assert!(store.list_objects("missing/", &cancel).await.unwrap().is_empty());

    let empty = Arc::new(MemoryBackend::new());
    assert!(store_with(&empty).list_objects("", &cancel).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_store_page_size_caps_requests() {
    let cancel = CancellationToken::new();
    let backend = seeded(1000, KEYS);
    let store = store_with(&backend).with_page_size(2);

    let pages: Vec<Vec<_>> = store.list_pages("", &cancel).try_collect().await.unwrap();
    let sizes: Vec<usize> = pages.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
}

#[tokio::test]
async fn test_upload_and_download_bytes() {
    let cancel = CancellationToken::new();
    let backend = Arc::new(MemoryBackend::new());
    let store = store_with(&backend);

    let locator = store
        .upload_from_bytes("greeting.txt", "hello world", Some("text/plain"), &cancel)
        .await
        .unwrap();
    assert_eq!(locator, "mem://test-bucket/greeting.txt");
    assert_eq!(backend.content_type("greeting.txt").as_deref(), Some("text/plain"));

    let data = store.download("greeting.txt", &cancel).await.unwrap();
    assert_eq!(data, Bytes::from("hello world"));
}

#[tokio::test]
async fn test_empty_payload_roundtrip() {
    let cancel = CancellationToken::new();
    let backend = Arc::new(MemoryBackend::new());
    let store = store_with(&backend);

    store
        .upload_from_bytes("empty", Bytes::new(), None, &cancel)
        .await
        .unwrap();
    assert_eq!(
        backend.content_type("empty").as_deref(),
        Some("application/octet-stream")
    );
    assert!(store.download("empty", &cancel).await.unwrap().is_empty());

    let info = store.stat("empty", &cancel).await.unwrap();
    assert_eq!(info.size, 0);
}

#[tokio::test]
async fn test_upload_overwrites() {
    let cancel = CancellationToken::new();
    let backend = Arc::new(MemoryBackend::new());
    let store = store_with(&backend);

    store.upload_from_bytes("k", "first", None, &cancel).await.unwrap();
    store.upload_from_bytes("k", "second", None, &cancel).await.unwrap();

    assert_eq!(backend.len(), 1);
    assert_eq!(store.download("k", &cancel).await.unwrap(), Bytes::from("second"));
}

#[tokio::test]
async fn test_upload_from_path_guesses_content_type() {
    let cancel = CancellationToken::new();
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let store = store_with(&backend);

    let json = dir.path().join("report.json");
    std::fs::write(&json, br#"{"ok":true}"#).unwrap();
    store
        .upload_from_path("reports/report.json", &json, None, &cancel)
        .await
        .unwrap();
    assert_eq!(
        backend.content_type("reports/report.json").as_deref(),
        Some("application/json")
    );

    let blob = dir.path().join("blob.unknownext");
    std::fs::write(&blob, vec![7u8; 4096]).unwrap();
    store.upload_from_path("blob", &blob, None, &cancel).await.unwrap();
    assert_eq!(
        backend.content_type("blob").as_deref(),
        Some("application/octet-stream")
    );

    store
        .upload_from_path("forced", &json, Some("text/plain"), &cancel)
        .await
        .unwrap();
    assert_eq!(backend.content_type("forced").as_deref(), Some("text/plain"));

    assert_eq!(store.download("blob", &cancel).await.unwrap().len(), 4096);
}

#[tokio::test]
async fn test_upload_missing_file_is_not_found() {
    let cancel = CancellationToken::new();
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let store = store_with(&backend);

    let err = store
        .upload_from_path("k", dir.path().join("nope.bin"), None, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(backend.is_empty());

    let err = store
        .upload_from_path("k", dir.path(), None, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[tokio::test]
async fn test_download_to_path() {
    let cancel = CancellationToken::new();
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let store = store_with(&backend);

    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    store
        .upload_from_bytes("big.bin", payload.clone(), None, &cancel)
        .await
        .unwrap();

    let dest = dir.path().join("big.bin");
    std::fs::write(&dest, b"stale").unwrap();

    let written = store.download_to_path("big.bin", &dest, &cancel).await.unwrap();
    assert_eq!(written, payload.len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), payload);

    // Only the destination remains; no partial files
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_download_missing_leaves_destination_untouched() {
    let cancel = CancellationToken::new();
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let store = store_with(&backend);

    let err = store.download("absent", &cancel).await.unwrap_err();
    assert!(err.is_not_found());

    let dest = dir.path().join("out.bin");
    std::fs::write(&dest, b"keep me").unwrap();
    let err = store
        .download_to_path("absent", &dest, &cancel)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(std::fs::read(&dest).unwrap(), b"keep me");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_cancelled_download_removes_partial_file() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MemoryBackend::new().with_latency(Duration::from_millis(50)));
    backend.insert("slow.bin", vec![1u8; 512 * 1024]);
    let store = Arc::new(store_with(&backend));

    let cancel = CancellationToken::new();
    let dest = dir.path().join("slow.bin");

    let task = {
        let store = store.clone();
        let cancel = cancel.clone();
        let dest = dest.clone();
        tokio::spawn(async move { store.download_to_path("slow.bin", &dest, &cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(120)).await;
    cancel.cancel();

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, StoreError::Cancelled));
    assert!(!dest.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let backend = seeded(2, KEYS);
    let store = store_with(&backend);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = store.list_objects("", &cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    let err = store
        .upload_from_bytes("new", "x", None, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(backend.content_type("new").is_none());
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let cancel = CancellationToken::new();
    let backend = seeded(10, &["a", "b"]);
    let store = store_with(&backend);

    assert!(store.exists("a", &cancel).await.unwrap());
    store.delete("a", &cancel).await.unwrap();
    assert!(!store.exists("a", &cancel).await.unwrap());

    // Second delete of the same key still succeeds
    store.delete("a", &cancel).await.unwrap();
    store.delete("never-existed", &cancel).await.unwrap();
    assert_eq!(backend.len(), 1);
}

#[tokio::test]
async fn test_exists_propagates_permission_errors() {
    let cancel = CancellationToken::new();
    let backend = seeded(10, &["secret", "public"]);
    backend.deny("secret");
    let store = store_with(&backend);

    assert!(store.exists("public", &cancel).await.unwrap());
    assert!(!store.exists("missing", &cancel).await.unwrap());

    let err = store.exists("secret", &cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permission);
    let err = store.download("secret", &cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permission);
}

#[tokio::test]
async fn test_transient_failure_is_not_retried() {
    let cancel = CancellationToken::new();
    let backend = Arc::new(MemoryBackend::new());
    let store = store_with(&backend);

    backend.fail_next(ErrorKind::TransientBackend);
    let err = store
        .upload_from_bytes("k", "v", None, &cancel)
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert!(backend.is_empty());

    store.upload_from_bytes("k", "v", None, &cancel).await.unwrap();
    assert_eq!(backend.len(), 1);

    backend.fail_next(ErrorKind::TransientBackend);
    let err = store.exists("k", &cancel).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let cancel = CancellationToken::new();
    let backend = seeded(10, &["a"]);
    let store = store_with(&backend);

    store.close();
    store.close();
    assert!(store.is_closed());
    assert!(backend.is_closed());

    let err = store.list_objects("", &cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Closed);
    let err = store.exists("a", &cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Closed);
}

#[tokio::test]
async fn test_drop_closes_backend() {
    let backend = seeded(10, &["a"]);
    let store = store_with(&backend);
    assert!(!backend.is_closed());
    drop(store);
    assert!(backend.is_closed());
}

#[tokio::test]
async fn test_scoped_closes_on_success_and_error() {
    let cancel = CancellationToken::new();
    let cancel = &cancel;

    let backend = seeded(10, &["a", "b"]);
    let store = Arc::new(store_with(&backend));
    let count = store
        .clone()
        .scoped(|store| async move { Ok(store.list_objects("", cancel).await?.len()) })
        .await
        .unwrap();
    assert_eq!(count, 2);
    assert!(store.is_closed());
    assert!(backend.is_closed());

    let backend = seeded(10, &["a"]);
    let store = Arc::new(store_with(&backend));
    let err = store
        .clone()
        .scoped(|store| async move { store.download("missing", cancel).await })
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(store.is_closed());
}

#[tokio::test]
async fn test_concurrent_operations_share_one_store() {
    let cancel = CancellationToken::new();
    let backend = Arc::new(MemoryBackend::new().with_page_size(3));
    let store = Arc::new(store_with(&backend));

    let mut tasks = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            let key = format!("jobs/{i:02}");
            store
                .upload_from_bytes(&key, format!("payload {i}"), None, &cancel)
                .await?;
            store.download(&key, &cancel).await
        }));
    }

    for (i, task) in tasks.into_iter().enumerate() {
        let data = task.await.unwrap().unwrap();
        assert_eq!(data, Bytes::from(format!("payload {i}")));
    }

    let listed = store.list_objects("jobs/", &cancel).await.unwrap();
    assert_eq!(listed.len(), 16);
}
