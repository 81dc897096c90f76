//! Basic usage example for bucketstore
//!
//! Runs against S3 when `S3_BUCKET` and credentials are available in the
//! environment, otherwise against the in-memory backend.
//!
//! Run with:
//! ```
//! cargo run --example basic_usage
//! ```

use bucketstore::{config, CancellationToken, Core, MemoryBackend, ObjectStore, StoreError};
use std::sync::Arc;

async fn open_store() -> anyhow::Result<Arc<ObjectStore>> {
    let config = config::load_from_env()?;
    let has_bucket = config
        .get_profile(None)
        .and_then(|(_, profile)| profile.bucket.as_ref())
        .is_some();

    if has_bucket {
        match Core::new(config).await {
            Ok(core) => return core.open(None).await,
            Err(e) => println!("No usable S3 credentials ({e:#}), using the memory backend\n"),
        }
    }

    let backend = Arc::new(MemoryBackend::new().with_page_size(2));
    Ok(Arc::new(ObjectStore::new("demo-bucket", backend)?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let store = open_store().await?;
    let cancel = CancellationToken::new();

    println!("bucketstore - Basic Usage Example");
    println!("=================================\n");

    let outcome = store
        .clone()
        .scoped(|store| async move {
            // Example 1: Upload from memory
            println!("1. Uploading objects...");
            for name in ["a.txt", "b.txt", "c.txt"] {
                let locator = store
                    .upload_from_bytes(
                        &format!("demo/{name}"),
                        format!("Hello from {name}"),
                        Some("text/plain"),
                        &cancel,
                    )
                    .await?;
                println!("   Uploaded {locator}");
            }
            println!();

            // Example 2: Download into memory
            println!("2. Downloading object...");
            let data = store.download("demo/a.txt", &cancel).await?;
            println!("   Content: {}\n", String::from_utf8_lossy(&data));

            // Example 3: List (pagination is handled internally)
            println!("3. Listing objects with prefix 'demo/'...");
            for info in store.list_objects("demo/", &cancel).await? {
                println!("   - {} ({} bytes)", info.key, info.size);
            }
            println!();

            // Example 4: Existence checks
            println!("4. Checking existence...");
            println!("   demo/a.txt exists: {}", store.exists("demo/a.txt", &cancel).await?);
            println!("   demo/z.txt exists: {}\n", store.exists("demo/z.txt", &cancel).await?);

            // Example 5: Delete (idempotent)
            println!("5. Deleting objects...");
            for name in ["a.txt", "b.txt", "c.txt", "c.txt"] {
                store.delete(&format!("demo/{name}"), &cancel).await?;
            }
            println!("   Remaining: {}", store.list_objects("demo/", &cancel).await?.len());

            Ok::<_, StoreError>(())
        })
        .await;

    println!("\nStore closed: {}", store.is_closed());
    outcome?;
    Ok(())
}
