//! Cache store - typed key → entry table with per-kind TTL and persistence.
//!
//! Values are held as JSON values so that any serde type can be stored and a
//! persisted record can be rehydrated without knowing its Rust type up front.
//! Reads deserialize into the type the caller asks for; a value that does not
//! fit is reported as a miss.
//!
//! # Expiry
//!
//! An entry is live iff `now - stored_at < ttl`. Expired entries are dropped
//! lazily on read. [`CacheStore::purge_expired`] sweeps them eagerly but is
//! never needed for correctness.
//!
//! Store times are wall-clock milliseconds so persisted records keep their
//! age across restarts. If the clock steps backwards, entries stay live until
//! it catches up.
//!
//! # Write ordering
//!
//! Every write and every clear takes a ticket from one counter. A write whose
//! ticket is older than the entry it would replace, or older than a clear of
//! its key, is dropped. Long fetches take their ticket with
//! [`CacheStore::begin_write`] before they start, so a slow fetch settling
//! after a reload or a clear cannot bring back its older value. A lazy
//! rehydration is dropped the same way when a clear lands during the backend
//! read, and it never replaces a value written in memory.
//!
//! # Persistence
//!
//! When the kind's policy is persistent, `set` also writes an envelope to the
//! backend under `policy.storage_prefix + key`. On a memory miss, `get`
//! rehydrates from the backend (lazily, one key at a time). Backend failures
//! are logged and swallowed: losing persistence never fails a cache call.

use crate::backend::PersistentBackend;
use crate::error::{Error, Result};
use crate::key::CacheKey;
use crate::observability::{CacheMetrics, NoOpMetrics};
use crate::policy::{Policy, PolicyTable};
use crate::serialization::{decode_entry, encode_entry, now_ms};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One cached value with its store time.
#[derive(Clone, Debug)]
struct StoredEntry {
    value: Arc<Value>,
    /// Milliseconds since the Unix epoch.
    stored_at: u64,
    ttl: Duration,
    /// Write ticket this entry was stored with.
    seq: u64,
    /// Backend key the entry was persisted under, if any.
    persisted_as: Option<String>,
}

impl StoredEntry {
    fn is_live_at(&self, now: u64) -> bool {
        is_live(self.stored_at, self.ttl, now)
    }
}

fn is_live(stored_at: u64, ttl: Duration, now: u64) -> bool {
    (now.saturating_sub(stored_at) as u128) < ttl.as_millis()
}

/// Position of a write in the store's write order.
///
/// Obtained from [`CacheStore::begin_write`] and passed to
/// [`CacheStore::set_if_current`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct WriteTicket(u64);

/// Outcome of offering an entry to the memory table.
enum Admission {
    Stored(Arc<Value>),
    /// A newer write already holds the key.
    Superseded(Arc<Value>),
    /// The key was cleared after the ticket was taken.
    Cleared,
}

fn decode_value<T: DeserializeOwned>(value: &Value) -> Result<T> {
    T::deserialize(value).map_err(|e| Error::DeserializationError(e.to_string()))
}

/// Store statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total_entries: usize,
    pub expired_entries: usize,
}

/// The canonical cache for every resource kind.
///
/// Construct one per process and share it (`Arc<CacheStore<B>>`) with the
/// coordinator, the validation reader and the prefetch scheduler.
///
/// # Example
///
/// ```no_run
/// use catalog_cache::backend::InMemoryBackend;
/// use catalog_cache::key::CacheKey;
/// use catalog_cache::policy::PolicyTable;
/// use catalog_cache::store::CacheStore;
///
/// #[tokio::main]
/// async fn main() {
///     let store = CacheStore::new(InMemoryBackend::new(), PolicyTable::default());
///     let key = CacheKey::offering_list("cat-1");
///
///     store.set(&key, &vec!["off-1", "off-2"]).await;
///     let offerings: Option<Vec<String>> = store.get(&key).await;
///     assert_eq!(offerings.map(|o| o.len()), Some(2));
/// }
/// ```
pub struct CacheStore<B: PersistentBackend> {
    entries: DashMap<String, StoredEntry>,
    backend: B,
    policies: PolicyTable,
    metrics: Box<dyn CacheMetrics>,
    sequence: AtomicU64,
    /// Ticket of the last `clear` per key.
    cleared: DashMap<String, u64>,
    /// Ticket of the last `clear_all`.
    cleared_all: AtomicU64,
}

impl<B: PersistentBackend> CacheStore<B> {
    /// Create a store over a persistent backend.
    pub fn new(backend: B, policies: PolicyTable) -> Self {
        CacheStore {
            entries: DashMap::new(),
            backend,
            policies,
            metrics: Box::new(NoOpMetrics),
            // Ticket 0 is reserved for rehydrated entries.
            sequence: AtomicU64::new(1),
            cleared: DashMap::new(),
            cleared_all: AtomicU64::new(0),
        }
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Box<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Get backend reference (for advanced use).
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Live value for `key`, or `None` if absent or expired.
    ///
    /// Falls back to the persistent backend when the kind is persistent and
    /// the key is not in memory. Every failure along the way is a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let timer = Instant::now();
        let value = match self.memory_get(key) {
            Some(value) => Some(value),
            None => self.rehydrate(key).await,
        };

        match value {
            Some(value) => match decode_value(&value) {
                Ok(decoded) => {
                    self.metrics.record_hit(key.as_str(), timer.elapsed());
                    Some(decoded)
                }
                Err(e) => {
                    self.metrics.record_error(key.as_str(), &e.to_string());
                    self.metrics.record_miss(key.as_str(), timer.elapsed());
                    None
                }
            },
            None => {
                self.metrics.record_miss(key.as_str(), timer.elapsed());
                None
            }
        }
    }

    /// Memory-only read. Never touches the persistent backend.
    pub fn peek<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let value = self.memory_get(key)?;
        decode_value(&value).ok()
    }

    /// Whether a live entry for `key` is held in memory.
    pub fn contains_live(&self, key: &CacheKey) -> bool {
        self.memory_get(key).is_some()
    }

    fn memory_get(&self, key: &CacheKey) -> Option<Arc<Value>> {
        let now = now_ms();
        let stale_at = {
            let entry = self.entries.get(key.as_str())?;
            if entry.is_live_at(now) {
                debug!("✓ Store GET {} -> HIT", key);
                return Some(entry.value.clone());
            }
            entry.stored_at
        };

        // Only drop the entry we saw expire, not a newer one written meanwhile.
        self.entries
            .remove_if(key.as_str(), |_, entry| entry.stored_at == stale_at);
        debug!("✓ Store GET {} -> EXPIRED", key);
        None
    }

    async fn rehydrate(&self, key: &CacheKey) -> Option<Arc<Value>> {
        let policy = self.policies.get(key.kind());
        if !policy.persistent {
            return None;
        }

        let ticket = self.begin_write();
        let storage_key = policy.storage_key(key.as_str());
        let raw = match self.backend.get(&storage_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                self.metrics.record_error(key.as_str(), &e.to_string());
                return None;
            }
        };

        let persisted = match decode_entry(&raw) {
            Ok(persisted) => persisted,
            Err(e) => {
                self.metrics.record_error(key.as_str(), &e.to_string());
                self.delete_persisted(&storage_key).await;
                return None;
            }
        };

        if !is_live(persisted.stored_at, policy.ttl, now_ms()) {
            debug!("✓ Store REHYDRATE {} -> EXPIRED", key);
            self.delete_persisted(&storage_key).await;
            return None;
        }

        let rehydrated = StoredEntry {
            value: Arc::new(persisted.value),
            stored_at: persisted.stored_at,
            ttl: policy.ttl,
            // Older than any write, so a fetch settling later still lands.
            seq: 0,
            persisted_as: Some(storage_key),
        };

        match self.admit(key, rehydrated, ticket) {
            Admission::Stored(value) => {
                debug!("✓ Store REHYDRATE {} -> HIT", key);
                Some(value)
            }
            Admission::Superseded(value) => Some(value),
            Admission::Cleared => {
                debug!("✓ Store REHYDRATE {} -> CLEARED during read", key);
                None
            }
        }
    }

    /// Take a ticket for a write that will happen later.
    pub fn begin_write(&self) -> WriteTicket {
        WriteTicket(self.sequence.fetch_add(1, Ordering::SeqCst))
    }

    fn is_cleared_since(&self, key: &str, seq: u64) -> bool {
        seq < self.cleared_all.load(Ordering::SeqCst)
            || self.cleared.get(key).is_some_and(|cleared| seq < *cleared)
    }

    /// Insert `entry` unless `key` was cleared after `ticket` was taken or a
    /// newer write got there first.
    fn admit(&self, key: &CacheKey, entry: StoredEntry, ticket: WriteTicket) -> Admission {
        // The shard lock is held from here on, so a concurrent clear either
        // sees this insert and removes it, or has already left its fence.
        let slot = self.entries.entry(key.as_str().to_string());
        if self.is_cleared_since(key.as_str(), ticket.0) {
            return Admission::Cleared;
        }

        match slot {
            Entry::Occupied(current) if current.get().seq > entry.seq => {
                Admission::Superseded(current.get().value.clone())
            }
            Entry::Occupied(mut current) => {
                let value = entry.value.clone();
                current.insert(entry);
                Admission::Stored(value)
            }
            Entry::Vacant(vacant) => {
                let value = entry.value.clone();
                vacant.insert(entry);
                Admission::Stored(value)
            }
        }
    }

    /// Store `value` under `key` with the policy of the key's kind.
    ///
    /// Never fails: serialization and persistence errors are logged and the
    /// call degrades to an in-memory store (or to nothing if the value cannot
    /// be represented at all).
    pub async fn set<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T) {
        let policy = self.policies.get(key.kind()).clone();
        let ticket = self.begin_write();
        self.write(key, value, &policy, ticket).await;
    }

    /// Store `value` under `key` with an explicit policy.
    ///
    /// A record persisted under a storage prefix other than the kind's is
    /// removed by `clear` and `clear_all` while its entry is in memory, but
    /// is never rehydrated.
    pub async fn set_with_policy<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
        policy: &Policy,
    ) {
        let ticket = self.begin_write();
        self.write(key, value, policy, ticket).await;
    }

    /// Store a fetched `value` unless `key` was cleared or written again
    /// since `ticket` was taken.
    ///
    /// Returns whether the value was stored.
    pub async fn set_if_current<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
        ticket: WriteTicket,
    ) -> bool {
        let policy = self.policies.get(key.kind()).clone();
        self.write(key, value, &policy, ticket).await
    }

    async fn write<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
        policy: &Policy,
        ticket: WriteTicket,
    ) -> bool {
        let timer = Instant::now();
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                error!("Cache value for {} is not serializable: {}", key, e);
                self.metrics.record_error(key.as_str(), &e.to_string());
                return false;
            }
        };

        let stored_at = now_ms();
        let persisted = if policy.persistent {
            match encode_entry(&value, stored_at) {
                Ok(raw) => Some((policy.storage_key(key.as_str()), raw)),
                Err(e) => {
                    self.metrics.record_error(key.as_str(), &e.to_string());
                    None
                }
            }
        } else {
            None
        };

        let entry = StoredEntry {
            value: Arc::new(value),
            stored_at,
            ttl: policy.ttl,
            seq: ticket.0,
            persisted_as: persisted.as_ref().map(|(storage_key, _)| storage_key.clone()),
        };
        match self.admit(key, entry, ticket) {
            Admission::Stored(_) => {}
            Admission::Superseded(_) => {
                debug!("✗ Store SET {} skipped, a newer value is stored", key);
                return false;
            }
            Admission::Cleared => {
                debug!("✗ Store SET {} skipped, cleared since the write began", key);
                return false;
            }
        }
        debug!("✓ Store SET {} (TTL: {:?})", key, policy.ttl);

        if let Some((storage_key, raw)) = persisted {
            if let Err(e) = self.backend.set(&storage_key, raw).await {
                warn!("⚠ Failed to persist {}: {}", key, e);
                self.metrics.record_error(key.as_str(), &e.to_string());
            }
            // A clear that ran during the backend write may have deleted
            // before the record landed.
            if self.is_cleared_since(key.as_str(), ticket.0) {
                self.delete_persisted(&storage_key).await;
            }
        }

        self.metrics.record_set(key.as_str(), timer.elapsed());
        true
    }

    /// Remove one entry from memory and from the persistent backend.
    ///
    /// Writes and rehydrations that began before the clear are dropped.
    pub async fn clear(&self, key: &CacheKey) {
        let timer = Instant::now();
        let fence = self.begin_write().0;
        self.cleared
            .entry(key.as_str().to_string())
            .and_modify(|cleared| *cleared = (*cleared).max(fence))
            .or_insert(fence);
        let removed = self.entries.remove(key.as_str());

        let policy = self.policies.get(key.kind());
        let table_key = policy.persistent.then(|| policy.storage_key(key.as_str()));
        let entry_key = removed.and_then(|(_, entry)| entry.persisted_as);
        if let Some(storage_key) = &table_key {
            self.delete_persisted(storage_key).await;
        }
        if let Some(storage_key) = entry_key.filter(|k| Some(k) != table_key.as_ref()) {
            self.delete_persisted(&storage_key).await;
        }

        debug!("✓ Store CLEAR {}", key);
        self.metrics.record_delete(key.as_str(), timer.elapsed());
    }

    /// Remove every entry, including persisted records under any persistent
    /// policy's storage prefix.
    pub async fn clear_all(&self) {
        let fence = self.begin_write().0;
        self.cleared_all.fetch_max(fence, Ordering::SeqCst);
        self.cleared.retain(|_, cleared| *cleared > fence);

        let mut known: Vec<String> = Vec::new();
        let mut entry_keys: Vec<String> = Vec::new();
        for entry in self.entries.iter() {
            known.push(entry.key().clone());
            entry_keys.extend(entry.persisted_as.clone());
        }
        self.entries.clear();

        let prefixes: Vec<String> = self
            .policies
            .persistent_kinds()
            .map(|(_, policy)| policy.storage_prefix.clone())
            .collect();

        let mut persisted: Vec<String> = match self.backend.keys().await {
            Ok(keys) => keys
                .into_iter()
                .filter(|k| prefixes.iter().any(|p| k.starts_with(p.as_str())))
                .collect(),
            Err(e) => {
                debug!("Backend cannot list keys ({}), clearing known keys only", e);
                known
                    .iter()
                    .flat_map(|key| prefixes.iter().map(move |p| format!("{}{}", p, key)))
                    .collect()
            }
        };
        for storage_key in entry_keys {
            if !persisted.contains(&storage_key) {
                persisted.push(storage_key);
            }
        }

        for storage_key in persisted {
            self.delete_persisted(&storage_key).await;
        }

        warn!("⚠ Store CLEAR_ALL executed - all cache cleared!");
    }

    async fn delete_persisted(&self, storage_key: &str) {
        if let Err(e) = self.backend.delete(storage_key).await {
            warn!("⚠ Failed to delete persisted {}: {}", storage_key, e);
            self.metrics.record_error(storage_key, &e.to_string());
        }
    }

    /// Drop expired in-memory entries. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live_at(now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!("✓ Store PURGE removed {} expired entries", purged);
        }
        purged
    }

    /// Number of in-memory entries, live or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Memory statistics.
    pub fn stats(&self) -> StoreStats {
        let now = now_ms();
        StoreStats {
            total_entries: self.entries.len(),
            expired_entries: self
                .entries
                .iter()
                .filter(|entry| !entry.is_live_at(now))
                .count(),
        }
    }
}
