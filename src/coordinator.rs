//! Request coordinator - at most one in-flight operation per key.
//!
//! [`RequestCoordinator::coordinate`] wraps any asynchronous fetch. The first
//! caller for a key starts the operation; every caller arriving while it is
//! still registered awaits the same shared result instead of starting another.
//!
//! ```text
//! caller A ──coordinate("offerings:cat")──► produce() ──┐
//! caller B ──coordinate("offerings:cat")──► (joins) ────┼──► same Result
//! caller C ──coordinate("offerings:cat")──► (joins) ────┘
//! ```
//!
//! Registration happens synchronously inside `coordinate`, before the
//! returned future is first polled, so two callers can never both start an
//! operation for the same key. The operation is driven by its own task: it
//! runs to completion even when every caller gave up (timeout or drop), and its
//! registration is removed when it settles, but only if the registration still
//! belongs to that operation.
//!
//! The coordinator does not touch the cache store. Combining coordination with
//! caching is up to the caller (see [`crate::service::CatalogCache`]).

use crate::error::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

type SharedValue = Arc<dyn Any + Send + Sync>;
type SharedOperation = Shared<BoxFuture<'static, Result<SharedValue>>>;

/// One outstanding operation.
struct PendingOperation {
    id: u64,
    future: SharedOperation,
}

/// Per-call options.
#[derive(Clone, Debug, Default)]
pub struct CoordinateOptions {
    /// Give up waiting after this long. The operation itself keeps running.
    pub timeout: Option<Duration>,
}

impl CoordinateOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Deduplicates concurrent asynchronous operations by key.
///
/// Clones share the same registry.
#[derive(Clone, Default)]
pub struct RequestCoordinator {
    pending: Arc<DashMap<String, PendingOperation>>,
    next_id: Arc<AtomicU64>,
}

impl RequestCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `produce` for `key`, or join the operation already running for it.
    ///
    /// Must be called from within a Tokio runtime: the operation is spawned
    /// onto it so that it settles even if every caller stops waiting.
    ///
    /// # Errors
    ///
    /// - the error `produce` settled with, shared by every caller
    /// - `Error::Timeout` if `opts.timeout` elapsed first (this caller only)
    /// - `Error::TypeMismatch` if the running operation for `key` produces a
    ///   different type than `T`
    pub fn coordinate<T, F, Fut>(
        &self,
        key: &str,
        produce: F,
        opts: CoordinateOptions,
    ) -> impl Future<Output = Result<T>> + Send + 'static
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let operation = match self.pending.entry(key.to_string()) {
            Entry::Occupied(existing) => {
                debug!("» Joining in-flight operation for {}", key);
                existing.get().future.clone()
            }
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let operation = async move {
                    produce()
                        .await
                        .map(|value| Arc::new(value) as SharedValue)
                }
                .boxed()
                .shared();

                slot.insert(PendingOperation {
                    id,
                    future: operation.clone(),
                });
                debug!("» Started operation #{} for {}", id, key);

                self.drive(key.to_string(), id, operation.clone());
                operation
            }
        };

        let key = key.to_string();
        async move {
            let settled = match opts.timeout {
                Some(limit) => match tokio::time::timeout(limit, operation).await {
                    Ok(settled) => settled,
                    Err(_) => {
                        debug!("✗ Gave up waiting for {} after {:?}", key, limit);
                        return Err(Error::Timeout(format!(
                            "{} did not complete within {:?}",
                            key, limit
                        )));
                    }
                },
                None => operation.await,
            };

            let value = settled?;
            value
                .downcast::<T>()
                .map(|value| (*value).clone())
                .map_err(|_| {
                    Error::TypeMismatch(format!(
                        "operation for {} does not produce {}",
                        key,
                        std::any::type_name::<T>()
                    ))
                })
        }
    }

    /// Spawn the task that runs an operation to completion and unregisters it.
    fn drive(&self, key: String, id: u64, operation: SharedOperation) {
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            let outcome = operation.await;
            if let Err(e) = &outcome {
                debug!("✗ Operation #{} for {} failed: {}", id, key, e);
            }
            // A newer operation may have replaced ours; leave it alone.
            let removed = pending.remove_if(&key, |_, op| op.id == id).is_some();
            debug!(
                "✓ Operation #{} for {} settled{}",
                id,
                key,
                if removed { "" } else { " (registration already replaced)" }
            );
        });
    }

    /// Whether an operation is registered for `key`.
    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    /// Number of registered operations.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop the registration for `key` so the next caller starts a new
    /// operation. The dropped operation still runs to completion.
    pub fn forget(&self, key: &str) {
        if self.pending.remove(key).is_some() {
            debug!("» Forgot in-flight operation for {}", key);
        }
    }
}
