//! Operation Queue Module
//!
//! Coalesces concurrent requests for the same key into one asynchronous
//! operation. The first caller for a key starts the operation; callers that
//! arrive while it is in flight wait for the same outcome.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::events::{EventBus, QueueEvent};

/// Type-erased asynchronous operation run by a queue.
pub type Operation<I, V> = Arc<dyn Fn(I) -> BoxFuture<'static, anyhow::Result<V>> + Send + Sync>;

type Waiter<V> = oneshot::Sender<Result<V>>;

// == Pending Entry ==
struct Pending<I, V> {
    /// Distinguishes this run from a later run under the same key
    id: u64,
    /// Input supplied by the first caller
    input: Option<I>,
    waiters: Vec<Waiter<V>>,
}

/// Read-only view of an in-flight operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation<I> {
    pub key: String,
    /// Input the first caller supplied, if any
    pub input: Option<I>,
    /// Callers currently waiting for the outcome
    pub waiters: usize,
}

struct QueueInner<I, V> {
    op: Option<Operation<I, V>>,
    pending: Mutex<HashMap<String, Pending<I, V>>>,
    next_id: AtomicU64,
    events: EventBus<QueueEvent>,
}

impl<I, V: Clone> QueueInner<I, V> {
    fn settle(&self, key: &str, id: u64, outcome: Result<V>) {
        let waiters = {
            let mut pending = self.pending.lock();
            // a cancelled run may have been replaced by a newer one
            let current = pending.get(key).is_some_and(|entry| entry.id == id);
            if !current {
                debug!("Discarding outcome of cancelled operation for {}", key);
                return;
            }
            pending
                .remove(key)
                .map(|entry| entry.waiters)
                .unwrap_or_default()
        };

        debug!("Operation settled for {} with {} waiters", key, waiters.len());
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        self.events.emit(QueueEvent::OperationEnd(key.to_string()));
    }

    /// Rejects the waiters of a cancelled entry and closes its run.
    fn abandon(&self, key: &str, waiters: Vec<Waiter<V>>) {
        for waiter in waiters {
            let _ = waiter.send(Err(CacheError::Cancelled(key.to_string())));
        }
        self.events.emit(QueueEvent::OperationEnd(key.to_string()));
    }
}

// == Operation Queue ==
/// Single-flight executor keyed by string.
///
/// For any number of concurrent `process` calls on one key the operation runs
/// once, and every caller receives the same value or error. Operations run on
/// spawned tasks, so they finish even if every caller stops waiting.
pub struct OperationQueue<I, V> {
    inner: Arc<QueueInner<I, V>>,
}

impl<I, V> Clone for OperationQueue<I, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I, V> OperationQueue<I, V>
where
    I: Clone + From<String> + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    // == Constructors ==
    /// Creates a queue running `operation` for each key.
    pub fn new<F, Fut>(operation: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let op: Operation<I, V> = Arc::new(move |input| operation(input).boxed());
        Self::from_operation(Some(op))
    }

    /// Creates a queue without an operation. It is never ready and every
    /// `process` call resolves to `None`.
    pub fn idle() -> Self {
        Self::from_operation(None)
    }

    fn from_operation(op: Option<Operation<I, V>>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                op,
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                events: EventBus::new(),
            }),
        }
    }

    /// Whether the queue has an operation to run.
    pub fn is_ready(&self) -> bool {
        self.inner.op.is_some()
    }

    // == Process ==
    /// Resolves the operation for `key`.
    ///
    /// If an operation for `key` is in flight this waits for it and `input`
    /// is ignored. Otherwise the operation starts with `input`, or with the
    /// key itself when no input is given.
    pub async fn process(&self, key: &str, input: Option<I>) -> Result<Option<V>> {
        let Some(op) = self.inner.op.clone() else {
            return Ok(None);
        };

        let (receiver, start) = {
            let mut pending = self.inner.pending.lock();
            let (sender, receiver) = oneshot::channel();

            match pending.get_mut(key) {
                Some(entry) => {
                    entry.waiters.push(sender);
                    (receiver, None)
                }
                None => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let operation_input = input.clone().unwrap_or_else(|| I::from(key.to_string()));
                    pending.insert(
                        key.to_string(),
                        Pending {
                            id,
                            input,
                            waiters: vec![sender],
                        },
                    );
                    (receiver, Some((id, operation_input)))
                }
            }
        };

        if let Some((id, operation_input)) = start {
            self.start(key.to_string(), id, op, operation_input);
        }

        wait(key.to_string(), receiver).await.map(Some)
    }

    fn start(&self, key: String, id: u64, op: Operation<I, V>, input: I) {
        self.inner.events.emit(QueueEvent::OperationStart(key.clone()));
        debug!("Operation started for {}", key);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(op(input)).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(CacheError::operation(key.as_str(), e)),
                Err(_) => Err(CacheError::Internal(format!("Operation for {} panicked", key))),
            };
            inner.settle(&key, id, outcome);
        });
    }

    // == Join ==
    /// Waits for the in-flight operation on `key` without ever starting one.
    ///
    /// Returns `None` when nothing is in flight.
    pub fn join(&self, key: &str) -> Option<impl Future<Output = Result<V>> + Send + 'static> {
        let receiver = {
            let mut pending = self.inner.pending.lock();
            let entry = pending.get_mut(key)?;
            let (sender, receiver) = oneshot::channel();
            entry.waiters.push(sender);
            receiver
        };
        Some(wait(key.to_string(), receiver))
    }

    // == Pipe ==
    /// Chains this queue's result for `key` into another queue.
    pub fn pipe(&self, key: &str, input: Option<I>) -> Pipe<'_, I, V> {
        Pipe {
            source: self,
            key: key.to_string(),
            input,
        }
    }

    // == Inspection ==
    /// Returns the in-flight entry for `key`.
    pub fn get(&self, key: &str) -> Option<PendingOperation<I>> {
        self.inner
            .pending
            .lock()
            .get(key)
            .map(|entry| PendingOperation {
                key: key.to_string(),
                input: entry.input.clone(),
                waiters: entry.waiters.len(),
            })
    }

    pub fn has(&self, key: &str) -> bool {
        self.inner.pending.lock().contains_key(key)
    }

    /// Number of keys with an operation in flight.
    pub fn len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.pending.lock().is_empty()
    }

    // == Cancel ==
    /// Detaches every caller waiting on `key`, rejecting them with
    /// [`CacheError::Cancelled`]. The operation itself keeps running, but its
    /// outcome is discarded. Returns whether anything was in flight.
    ///
    /// The run's [`QueueEvent::OperationEnd`] fires here rather than when the
    /// abandoned operation finishes.
    pub fn cancel(&self, key: &str) -> bool {
        let entry = self.inner.pending.lock().remove(key);
        match entry {
            Some(entry) => {
                debug!("Operation cancelled for {}", key);
                self.inner.abandon(key, entry.waiters);
                true
            }
            None => false,
        }
    }

    // == Clear ==
    /// Cancels every in-flight entry.
    pub fn clear(&self) {
        let drained: Vec<(String, Pending<I, V>)> = self.inner.pending.lock().drain().collect();
        for (key, entry) in drained {
            self.inner.abandon(&key, entry.waiters);
        }
    }

    // == Events ==
    /// Start and end notifications. Every run that starts gets exactly one
    /// end, on settlement or on cancellation.
    pub fn events(&self) -> &EventBus<QueueEvent> {
        &self.inner.events
    }
}

impl<I, V> fmt::Debug for OperationQueue<I, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationQueue")
            .field("ready", &self.inner.op.is_some())
            .field("pending", &self.inner.pending.lock().len())
            .finish()
    }
}

async fn wait<V>(key: String, receiver: oneshot::Receiver<Result<V>>) -> Result<V> {
    match receiver.await {
        Ok(outcome) => outcome,
        // sender dropped without a message
        Err(_) => Err(CacheError::Cancelled(key)),
    }
}

// == Pipe ==
/// Two-stage continuation created by [`OperationQueue::pipe`].
pub struct Pipe<'a, I, V> {
    source: &'a OperationQueue<I, V>,
    key: String,
    input: Option<I>,
}

impl<'a, I, V> Pipe<'a, I, V>
where
    I: Clone + From<String> + Send + Sync + 'static,
    V: Clone + From<String> + Send + Sync + 'static,
{
    /// Resolves the source queue for the key, then feeds the value into
    /// `target` under the same key. A source that yields nothing short
    /// circuits to `None`.
    pub async fn to<U>(self, target: &OperationQueue<V, U>) -> Result<Option<U>>
    where
        U: Clone + Send + 'static,
    {
        match self.source.process(&self.key, self.input).await? {
            Some(value) => target.process(&self.key, Some(value)).await,
            None => Ok(None),
        }
    }
}
