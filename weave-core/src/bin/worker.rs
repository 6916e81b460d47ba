//! Worker binary
//!
//! Runs a group of in-process workers against one store: each opens the
//! object, writes its parts, and closes. The object is then checked with a
//! HEAD and each worker's metrics are printed.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use weave_core::collective::local::LocalGroup;
use weave_core::storage::{MemoryStore, ObjectStore, S3Client};
use weave_core::{Layout, OpenOptions, Weave, WeaveConfig, WeaveError};

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, WeaveError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value.parse().map_err(|e| WeaveError::Config {
            reason: format!("{}={}: {}", name, value, e),
        }),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = WeaveConfig::from_env()?;
    let workers: u32 = env_or("WEAVE_WORKERS", 4)?;
    let parts: u64 = env_or("WEAVE_PARTS", 4)?;
    let block_size: usize = env_or("WEAVE_BLOCK_SIZE", 5 * 1024 * 1024)?;
    let key = std::env::var("WEAVE_KEY").unwrap_or_else(|_| "weave/testfile".into());
    let dry_run: bool = env_or("WEAVE_DRY_RUN", false)?;

    if workers == 0 {
        return Err(WeaveError::Config {
            reason: "WEAVE_WORKERS must be positive".into(),
        }
        .into());
    }

    let store: Arc<dyn ObjectStore> = if dry_run {
        info!("Dry run against an in-memory store");
        Arc::new(MemoryStore::new(config.s3.bucket.clone()))
    } else {
        info!("Connecting to storage at {}", config.s3.endpoint);
        let client = S3Client::new(config.s3.clone())?;
        if config.ensure_bucket {
            client.ensure_bucket().await?;
        }
        Arc::new(client)
    };

    info!(
        "Starting {} workers: {} parts of {} bytes each into {} ({:?})",
        workers, parts, block_size, key, config.layout
    );

    let group = LocalGroup::new(workers);
    let start = Instant::now();
    let mut handles = Vec::new();
    for endpoint in group.endpoints() {
        let weave = Weave::new(store.clone(), Arc::new(endpoint), config.clone());
        let key = match config.layout {
            Layout::Shared => key.clone(),
            Layout::FilePerProcess => format!("{}.{:08}", key, weave.rank()),
        };
        handles.push(tokio::spawn(async move {
            let result = run_worker(&weave, &key, parts, block_size).await;
            (weave, result)
        }));
    }

    let mut failed = false;
    for handle in handles {
        let (weave, result) = handle.await?;
        if let Err(e) = result {
            error!("Worker {} failed: {}", weave.rank(), e);
            failed = true;
        }
        println!("# rank {}\n{}", weave.rank(), weave.metrics().export());
    }
    if let Some(reason) = group.abort_reason() {
        return Err(format!("run aborted: {}", reason).into());
    }
    if failed {
        return Err("one or more workers failed".into());
    }

    let expected = parts * block_size as u64;
    if config.layout == Layout::Shared {
        match store.head(&key).await? {
            Some(meta) if meta.size == workers as u64 * expected => {
                info!("{} complete: {} bytes", key, meta.size)
            }
            Some(meta) => error!(
                "{} has {} bytes, expected {}",
                key,
                meta.size,
                workers as u64 * expected
            ),
            None => error!("{} missing after close", key),
        }
    }
    info!("Finished in {:?}", start.elapsed());
    Ok(())
}

async fn run_worker(weave: &Weave, key: &str, parts: u64, block_size: usize) -> weave_core::Result<()> {
    let mut handle = weave.open(key, OpenOptions::write().truncate(true)).await?;
    let fill = b'a' + (weave.rank() % 26) as u8;
    for _ in 0..parts {
        handle.write(Bytes::from(vec![fill; block_size])).await?;
    }
    handle.close().await
}
