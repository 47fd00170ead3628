use alloy_primitives::Address;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::key::QueryKey;
use crate::api::{ContractReader, Fact, ReadCall};
use crate::error::{QuestError, Result};
use crate::events::Event;

/// What the cache currently holds for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotState {
    /// Never fetched.
    Missing,
    /// Fetched within its staleness window and not invalidated.
    Fresh(Fact),
    /// Fetched, but old or invalidated. Still displayable.
    Stale(Fact),
    /// Last fetch failed. Always refetched on the next read.
    Failed(String),
}

#[derive(Debug)]
struct Entry {
    outcome: Result<Fact>,
    fetched_at: Instant,
    stale_time: Duration,
    invalidated: bool,
}

impl Entry {
    fn is_fresh(&self, now: Instant) -> bool {
        self.outcome.is_ok() && !self.invalidated && now.duration_since(self.fetched_at) < self.stale_time
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<QueryKey, Entry>,
    /// Bumped when a cached or in-flight key is invalidated so reads that
    /// started earlier cannot land as fresh.
    generations: HashMap<QueryKey, u64>,
    /// Reads currently awaiting the reader, per key.
    in_flight: HashMap<QueryKey, usize>,
}

/// Counts one pending read; released on completion or cancellation.
struct InFlight<'a> {
    cache: &'a QueryCache,
    key: QueryKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut inner = self.cache.lock();
        if let Some(count) = inner.in_flight.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                inner.in_flight.remove(&self.key);
            }
        }
    }
}

/// Shared cache of remote reads, keyed by [`QueryKey`].
///
/// One instance is shared (via `Arc`) by every quest, so an invalidation by
/// any writer is seen by all readers of the key. The lock is never held
/// across an await.
#[derive(Debug)]
pub struct QueryCache {
    inner: Mutex<Inner>,
    default_stale_time: Duration,
    events: Option<mpsc::Sender<Event>>,
}

impl QueryCache {
    pub fn new(default_stale_time: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            default_stale_time,
            events: None,
        }
    }

    /// Report invalidations on an event channel.
    pub fn with_events(mut self, tx: mpsc::Sender<Event>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn default_stale_time(&self) -> Duration {
        self.default_stale_time
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves the map consistent; keep going.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the cached fact when fresh, otherwise read through `reader`.
    ///
    /// Reads that need an account fail with `NotConnected` without touching
    /// the reader when `account` is `None`.
    pub async fn fetch(
        &self,
        reader: &dyn ContractReader,
        call: &ReadCall,
        account: Option<Address>,
        stale_time: Option<Duration>,
    ) -> Result<Fact> {
        if call.method.needs_account() && account.is_none() {
            return Err(QuestError::NotConnected);
        }

        let key = QueryKey::for_read(call, account);
        let stale_time = stale_time.unwrap_or(self.default_stale_time);

        let generation = {
            let mut inner = self.lock();
            if let Some(entry) = inner.entries.get(&key) {
                if entry.is_fresh(Instant::now()) {
                    if let Ok(fact) = &entry.outcome {
                        return Ok(fact.clone());
                    }
                }
            }
            *inner.in_flight.entry(key.clone()).or_insert(0) += 1;
            inner.generations.get(&key).copied().unwrap_or(0)
        };
        let _pending = InFlight {
            cache: self,
            key: key.clone(),
        };

        debug!(key = %key, "fetching");
        let outcome = reader.read(call, account).await;
        if let Err(e) = &outcome {
            warn!(key = %key, error = %e, "read failed");
        }

        {
            let mut inner = self.lock();
            let current = inner.generations.get(&key).copied().unwrap_or(0);
            inner.entries.insert(
                key,
                Entry {
                    outcome: outcome.clone(),
                    fetched_at: Instant::now(),
                    stale_time,
                    invalidated: current != generation,
                },
            );
        }
        outcome
    }

    /// Inspect a key without fetching.
    pub fn peek(&self, key: &QueryKey) -> SnapshotState {
        let inner = self.lock();
        let Some(entry) = inner.entries.get(key) else {
            return SnapshotState::Missing;
        };
        match &entry.outcome {
            Err(e) => SnapshotState::Failed(e.to_string()),
            Ok(fact) if entry.is_fresh(Instant::now()) => SnapshotState::Fresh(fact.clone()),
            Ok(fact) => SnapshotState::Stale(fact.clone()),
        }
    }

    /// Mark one key stale. Returns true if anything was cached under it.
    pub fn invalidate(&self, key: &QueryKey) -> bool {
        let existed = self.mark(std::slice::from_ref(key)) > 0;
        self.notify(vec![key.clone()]);
        existed
    }

    /// Mark every key stale, each exactly once. Returns how many were cached.
    pub fn invalidate_all(&self, keys: &[QueryKey]) -> usize {
        let mut unique: Vec<QueryKey> = keys.to_vec();
        unique.sort();
        unique.dedup();
        let count = self.mark(&unique);
        self.notify(unique);
        count
    }

    /// Mark every cached key matching `pred` stale.
    pub fn invalidate_where(&self, pred: impl Fn(&QueryKey) -> bool) -> usize {
        let keys: Vec<QueryKey> = {
            let inner = self.lock();
            inner.entries.keys().filter(|k| pred(k)).cloned().collect()
        };
        if keys.is_empty() {
            return 0;
        }
        self.invalidate_all(&keys)
    }

    fn mark(&self, keys: &[QueryKey]) -> usize {
        let mut inner = self.lock();
        let mut count = 0;
        for key in keys {
            if let Some(entry) = inner.entries.get_mut(key) {
                entry.invalidated = true;
                count += 1;
            } else if !inner.in_flight.contains_key(key) {
                // Nothing cached or pending; nothing to guard
                continue;
            }
            *inner.generations.entry(key.clone()).or_insert(0) += 1;
        }
        debug!(keys = keys.len(), cached = count, "invalidated");
        count
    }

    fn notify(&self, keys: Vec<QueryKey>) {
        if let Some(tx) = &self.events {
            if let Err(e) = tx.try_send(Event::Invalidated { keys }) {
                debug!(error = %e, "invalidation event dropped");
            }
        }
    }

    /// Number of keys currently cached.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
