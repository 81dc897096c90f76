use crate::cli::ObjectPath;
use crate::core::Core;
use crate::store::{ObjectInfo, ObjectStore, StoreError};
use anyhow::{Context, Result};
use futures::TryStreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt::Write as FmtWrite;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Utility functions
// ============================================================================

/// Format bytes in human-readable form (B, KiB, MiB, ...)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

    if bytes == 0 {
        return "0B".to_string();
    }

    let bytes_f64 = bytes as f64;
    let exponent = ((bytes_f64.ln() / 1024_f64.ln()).floor() as usize).min(UNITS.len() - 1);
    let value = bytes_f64 / 1024_f64.powi(exponent as i32);

    if exponent == 0 {
        format!("{}B", bytes)
    } else if value >= 10.0 {
        format!("{:.0}{}", value, UNITS[exponent])
    } else {
        format!("{:.1}{}", value, UNITS[exponent])
    }
}

/// One `ls` line: `[2026-01-22 20:44:33 UTC]  1.2MiB key`
fn write_listing_line(buf: &mut String, info: &ObjectInfo) {
    buf.clear();
    let _ = write!(
        buf,
        "[{}] {:>7} {}",
        info.last_modified.format("%Y-%m-%d %H:%M:%S UTC"),
        format_bytes(info.size),
        info.key
    );
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

async fn open_store(core: &Core, path: &ObjectPath) -> Result<Arc<ObjectStore>> {
    core.open(path.bucket.as_deref()).await
}

// ============================================================================
// Commands
// ============================================================================

/// List objects under a prefix, streaming page by page
pub async fn cmd_ls(
    core: &Core,
    path: &str,
    max_keys: usize,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let path = ObjectPath::parse(path)?;
    let store = open_store(core, &path).await?;
    let locator = store.locator(&path.key);

    store
        .clone()
        .scoped(|store| async move {
            let mut out = std::io::BufWriter::with_capacity(64 * 1024, std::io::stdout());
            let mut line = String::with_capacity(256);
            let mut shown = 0usize;
            let mut total_bytes = 0u64;

            let mut pages = std::pin::pin!(store.list_pages(&path.key, cancel));
            'pages: while let Some(page) = pages.try_next().await? {
                for info in page {
                    if max_keys > 0 && shown >= max_keys {
                        break 'pages;
                    }
                    if json {
                        let rendered = serde_json::to_string(&info)
                            .map_err(|e| StoreError::backend(e.to_string()))?;
                        writeln!(out, "{}", rendered)?;
                    } else {
                        write_listing_line(&mut line, &info);
                        writeln!(out, "{}", line)?;
                    }
                    shown += 1;
                    total_bytes += info.size;
                }
            }
            out.flush()?;

            tracing::debug!(objects = shown, bytes = total_bytes, "listing complete");
            Ok(())
        })
        .await
        .with_context(|| format!("Failed to list {}", locator))
}

/// Upload a local file
pub async fn cmd_put(
    core: &Core,
    source: &str,
    destination: &str,
    content_type: Option<&str>,
    cancel: &CancellationToken,
) -> Result<()> {
    let source = Path::new(source);
    let mut path = ObjectPath::parse(destination)?;
    if path.key.is_empty() || path.key.ends_with('/') {
        let name = source
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("{} has no file name", source.display()))?;
        path.key.push_str(&name.to_string_lossy());
    }

    let store = open_store(core, &path).await?;
    let pb = spinner(format!("uploading {}", source.display()));
    let result = store
        .clone()
        .scoped(|store| async move {
            store
                .upload_from_path(&path.key, source, content_type, cancel)
                .await
        })
        .await;
    pb.finish_and_clear();

    let locator = result.with_context(|| format!("Failed to upload {}", source.display()))?;
    println!("{}", locator);
    Ok(())
}

/// Download an object to a local file
pub async fn cmd_get(
    core: &Core,
    source: &str,
    destination: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let path = ObjectPath::parse(source)?;
    let key = path.require_key()?.to_string();

    let mut dest = std::path::PathBuf::from(destination);
    if dest.is_dir() {
        let name = key.rsplit('/').next().unwrap_or(&key);
        dest.push(name);
    }

    let store = open_store(core, &path).await?;
    let pb = spinner(format!("downloading {}", key));
    let result = store
        .clone()
        .scoped(|store| {
            let dest = dest.clone();
            let key = key.clone();
            async move { store.download_to_path(&key, &dest, cancel).await }
        })
        .await;
    pb.finish_and_clear();

    let written = result.with_context(|| format!("Failed to download {}", key))?;
    println!("{} -> {} ({})", key, dest.display(), format_bytes(written));
    Ok(())
}

/// Write an object's body to stdout
pub async fn cmd_cat(core: &Core, source: &str, cancel: &CancellationToken) -> Result<()> {
    let path = ObjectPath::parse(source)?;
    let key = path.require_key()?.to_string();
    let store = open_store(core, &path).await?;

    let data = store
        .clone()
        .scoped(|store| async move { store.download(&key, cancel).await })
        .await
        .with_context(|| format!("Failed to read {}", source))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    out.write_all(&data)?;
    out.flush()?;
    Ok(())
}

/// Delete an object
pub async fn cmd_rm(core: &Core, target: &str, cancel: &CancellationToken) -> Result<()> {
    let path = ObjectPath::parse(target)?;
    let key = path.require_key()?.to_string();
    let store = open_store(core, &path).await?;
    let locator = store.locator(&key);

    store
        .clone()
        .scoped(|store| async move { store.delete(&key, cancel).await })
        .await
        .with_context(|| format!("Failed to remove {}", locator))?;

    println!("Removed {}", locator);
    Ok(())
}

/// Show object metadata
pub async fn cmd_stat(
    core: &Core,
    target: &str,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let path = ObjectPath::parse(target)?;
    let key = path.require_key()?.to_string();
    let store = open_store(core, &path).await?;
    let locator = store.locator(&key);

    let info = store
        .clone()
        .scoped(|store| async move { store.stat(&key, cancel).await })
        .await;

    let info = match info {
        Ok(info) => info,
        Err(StoreError::NotFound(_)) => anyhow::bail!("Object not found: {}", locator),
        Err(e) => return Err(e).with_context(|| format!("Failed to stat {}", locator)),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("Object: {}", locator);
        println!("Size: {} ({} bytes)", format_bytes(info.size), info.size);
        println!(
            "Last Modified: {}",
            info.last_modified.format("%Y-%m-%d %H:%M:%S UTC")
        );
        if !info.etag.is_empty() {
            println!("ETag: {}", info.etag);
        }
    }
    Ok(())
}

/// Check that the bucket is reachable with the resolved credentials
pub async fn cmd_health(core: &Core, bucket: Option<&str>, cancel: &CancellationToken) -> Result<()> {
    let store = core.open(bucket).await?;
    let name = store.bucket().to_string();
    let started = std::time::Instant::now();

    store
        .clone()
        .scoped(|store| async move { store.health_check(cancel).await })
        .await
        .with_context(|| format!("Bucket {} is not reachable", name))?;

    println!("OK {} ({} ms)", name, started.elapsed().as_millis());
    Ok(())
}
