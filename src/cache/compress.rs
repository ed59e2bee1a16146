//! Compressing Cache Module
//!
//! Text cache that stores gzip bytes, optionally populating misses through a
//! caller-supplied loader. Compression and loads are coalesced per key by
//! operation queues, so concurrent readers never repeat either.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::cache::{CacheStats, EvictionCache, EvictionPolicy};
use crate::codec;
use crate::config::{CacheConfig, DEFAULT_PRUNE_DELAY_MS};
use crate::error::{CacheError, Result};
use crate::events::{CacheEvent, EventBus, QueueEvent};
use crate::queue::OperationQueue;

// == Compressing Cache ==
/// Cache of text values held as gzip bytes.
///
/// Clones share storage and queues.
#[derive(Debug, Clone)]
pub struct CompressingCache {
    store: EvictionCache<Bytes>,
    zip_queue: OperationQueue<String, Bytes>,
    load_queue: OperationQueue<String, String>,
    removals: Arc<Mutex<Removals>>,
}

// == Removal Tracking ==
/// Snapshot of a key's removal generation, taken before work starts.
type Ticket = (u64, u64);

/// Counts removals per key, plus a cache-wide epoch bumped by `clear`.
///
/// A write carrying a ticket that no longer matches raced a removal and is
/// dropped.
#[derive(Debug, Default)]
struct Removals {
    epoch: u64,
    keys: HashMap<String, u64>,
}

impl Removals {
    fn ticket(&self, key: &str) -> Ticket {
        (self.epoch, self.keys.get(key).copied().unwrap_or(0))
    }

    fn remove(&mut self, key: &str) {
        *self.keys.entry(key.to_string()).or_default() += 1;
    }

    fn clear(&mut self) {
        self.epoch += 1;
        self.keys.clear();
    }
}

impl CompressingCache {
    // == Constructors ==
    /// Cache without a loader or eviction thresholds.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn with_policy(policy: EvictionPolicy) -> Self {
        Self::builder().policy(policy).build()
    }

    /// Cache that populates misses by calling `loader` with the key.
    pub fn with_loader<F, Fut>(loader: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        Self::builder().loader(loader).build()
    }

    pub fn builder() -> CompressingCacheBuilder {
        CompressingCacheBuilder::default()
    }

    // == Add Text ==
    /// Compresses `text` and stores it under `key`. Empty text is ignored.
    ///
    /// Concurrent calls for one key share a single compression, seeded by the
    /// first caller's text.
    ///
    /// Fails with [`CacheError::Cancelled`] if `key` is removed before the
    /// compressed value is stored.
    pub async fn add_text(&self, key: &str, text: impl Into<String>) -> Result<()> {
        let ticket = self.ticket(key);
        self.compress_and_store(key, text.into(), ticket).await
    }

    async fn compress_and_store(&self, key: &str, text: String, ticket: Ticket) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        if let Some(zipped) = self.zip_queue.process(key, Some(text)).await? {
            self.commit(key, ticket, zipped)?;
        }
        Ok(())
    }

    fn ticket(&self, key: &str) -> Ticket {
        self.removals.lock().ticket(key)
    }

    /// Stores `zipped` unless `key` was removed after `ticket` was taken.
    fn commit(&self, key: &str, ticket: Ticket, zipped: Bytes) -> Result<()> {
        // held across the write so a removal lands entirely before or after it
        let removals = self.removals.lock();
        if removals.ticket(key) != ticket {
            debug!("Dropping value for {}, removed while in flight", key);
            return Err(CacheError::Cancelled(key.to_string()));
        }
        self.store.add(key, zipped);
        Ok(())
    }

    // == Get Zip ==
    /// Returns the compressed bytes for `key`.
    ///
    /// Waits for an in-flight compression, or loads and compresses the value
    /// when a loader is configured. A loader returning empty text yields
    /// `None` and stores nothing. Emits [`CacheEvent::KeyNotFound`] when
    /// nothing can produce the value.
    pub async fn get_zip(&self, key: &str) -> Result<Option<Bytes>> {
        if let Some(bytes) = self.store.get(key) {
            return Ok(Some(bytes));
        }

        if let Some(compressing) = self.zip_queue.join(key) {
            return compressing
                .await
                .map(|bytes| Some(bytes).filter(|bytes| !bytes.is_empty()));
        }

        if self.load_queue.is_ready() {
            debug!("Loading {} for compression", key);
            let ticket = self.ticket(key);
            let zipped = self
                .load_queue
                .pipe(key, None)
                .to(&self.zip_queue)
                .await?
                .filter(|bytes| !bytes.is_empty());
            if let Some(bytes) = &zipped {
                self.commit(key, ticket, bytes.clone())?;
            }
            return Ok(zipped);
        }

        self.not_found(key);
        Ok(None)
    }

    // == Get Text ==
    /// Returns the text for `key`.
    ///
    /// Text still being compressed is returned from the pending compression's
    /// input, and an in-flight load is awaited directly, so neither waits on
    /// a compress/decompress round trip.
    pub async fn get_text(&self, key: &str) -> Result<Option<String>> {
        if let Some(text) = self.zip_queue.get(key).and_then(|pending| pending.input) {
            return Ok(Some(text));
        }

        if let Some(loading) = self.load_queue.join(key) {
            return loading.await.map(Some);
        }

        if let Some(bytes) = self.store.get(key) {
            return codec::decompress(bytes).await.map(Some);
        }

        if self.load_queue.is_ready() {
            debug!("Loading {} on cache miss", key);
            let ticket = self.ticket(key);
            let Some(text) = self.load_queue.process(key, None).await? else {
                return Ok(None);
            };
            self.compress_and_store(key, text.clone(), ticket).await?;
            return Ok(Some(text));
        }

        self.not_found(key);
        Ok(None)
    }

    fn not_found(&self, key: &str) {
        debug!("Key not found: {}", key);
        self.store
            .events()
            .emit(CacheEvent::KeyNotFound(key.to_string()));
    }

    // == Remove ==
    /// Removes `key` and cancels any compression or load in flight for it.
    ///
    /// Work started before the removal never writes `key` back, even if it
    /// is between stages when the removal lands; its callers get
    /// [`CacheError::Cancelled`].
    pub fn remove(&self, key: &str) -> &Self {
        self.removals.lock().remove(key);
        self.store.remove(key);
        self.zip_queue.cancel(key);
        self.load_queue.cancel(key);
        self
    }

    // == Clear ==
    pub fn clear(&self) -> &Self {
        self.removals.lock().clear();
        self.store.clear();
        self.zip_queue.clear();
        self.load_queue.clear();
        self
    }

    // == Delegates ==
    pub fn has_loader(&self) -> bool {
        self.load_queue.is_ready()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.store.contains(key, false)
    }

    pub fn update_policy(&self, policy: EvictionPolicy) -> &Self {
        self.store.update_policy(policy);
        self
    }

    /// Aggregate compressed size in bytes.
    pub fn size(&self) -> Option<usize> {
        self.store.size()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    /// Underlying byte store.
    pub fn store(&self) -> &EvictionCache<Bytes> {
        &self.store
    }

    pub fn events(&self) -> &EventBus<CacheEvent> {
        self.store.events()
    }

    pub fn compression_events(&self) -> &EventBus<QueueEvent> {
        self.zip_queue.events()
    }

    pub fn load_events(&self) -> &EventBus<QueueEvent> {
        self.load_queue.events()
    }
}

impl Default for CompressingCache {
    fn default() -> Self {
        Self::new()
    }
}

// == Builder ==
/// Configures a [`CompressingCache`].
pub struct CompressingCacheBuilder {
    load_queue: OperationQueue<String, String>,
    policy: EvictionPolicy,
    prune_delay: Duration,
}

impl Default for CompressingCacheBuilder {
    fn default() -> Self {
        Self {
            load_queue: OperationQueue::idle(),
            policy: EvictionPolicy::default(),
            prune_delay: Duration::from_millis(DEFAULT_PRUNE_DELAY_MS),
        }
    }
}

impl CompressingCacheBuilder {
    /// Sets the loader used to populate misses.
    ///
    /// A loader combined with a small `max_items` can keep reloading the
    /// values it evicts.
    pub fn loader<F, Fut>(mut self, loader: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        self.load_queue = OperationQueue::new(loader);
        self
    }

    pub fn policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn prune_delay(mut self, delay: Duration) -> Self {
        self.prune_delay = delay;
        self
    }

    /// Applies policy and prune delay from a [`CacheConfig`].
    pub fn config(self, config: &CacheConfig) -> Self {
        self.policy(config.policy()).prune_delay(config.prune_delay())
    }

    pub fn build(self) -> CompressingCache {
        CompressingCache {
            store: EvictionCache::with_prune_delay(self.policy, self.prune_delay),
            zip_queue: OperationQueue::new(|text: String| async move {
                if text.is_empty() {
                    return Ok(Bytes::new());
                }
                codec::compress(text).await.map_err(anyhow::Error::from)
            }),
            load_queue: self.load_queue,
            removals: Arc::new(Mutex::new(Removals::default())),
        }
    }
}
