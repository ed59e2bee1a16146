//! Compress Cache demo
//!
//! Loads each file named on the command line through a compressing cache,
//! requesting every file twice concurrently, then prints cache statistics.
//!
//! Configuration comes from `CACHE_*` environment variables, logging from
//! `RUST_LOG`.

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use compress_cache::events::{CacheEvent, CacheEventKind, QueueEventKind};
use compress_cache::{CacheConfig, CompressingCache};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "compress_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CacheConfig::from_env();
    info!(
        "Configuration loaded: max_items={}, max_age_ms={}, max_bytes={}, prune_delay_ms={}",
        config.max_items, config.max_age_ms, config.max_bytes, config.prune_delay_ms
    );

    let cache = CompressingCache::builder()
        .config(&config)
        .loader(|path: String| async move {
            tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path))
        })
        .build();

    cache.events().subscribe(CacheEventKind::ItemsEvicted, |event| {
        if let CacheEvent::ItemsEvicted(keys) = event {
            info!("Evicted {} entries: {:?}", keys.len(), keys);
        }
    });
    cache.load_events().subscribe(QueueEventKind::OperationStart, |event| {
        info!("Loading {:?}", event);
    });

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        warn!("No files given, nothing to load");
    }

    for path in &paths {
        let (first, second) = tokio::join!(cache.get_text(path), cache.get_text(path));
        match (first, second) {
            (Ok(Some(text)), Ok(_)) => {
                let zipped = cache.get_zip(path).await?.map(|b| b.len()).unwrap_or(0);
                info!("{}: {} bytes, {} compressed", path, text.len(), zipped);
            }
            (Ok(None), _) => warn!("{}: no value", path),
            (Err(e), _) | (_, Err(e)) => warn!("{}: {}", path, e),
        }
    }

    let stats = cache.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
