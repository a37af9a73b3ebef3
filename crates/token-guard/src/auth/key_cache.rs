//! Signing key cache with TTL expiry and single-flight fetch coordination.
//!
//! # Concurrency
//!
//! - Entries live behind a `tokio::sync::RwLock`; lookups take the read lock
//! - A successful fetch inserts every key of the new set under one write lock
//! - At most one JWKS fetch is in flight per cache. Callers that miss while a
//!   fetch is running await that fetch instead of starting their own
//! - The fetch runs on its own task, so it completes and populates the cache
//!   even if every caller waiting on it is cancelled

use crate::auth::keys::{KeySet, SigningKey};
use crate::errors::VerificationError;
use crate::observability::metrics;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Outcome of one JWKS fetch, shared between every caller awaiting it.
type SharedFetch = Shared<BoxFuture<'static, Result<Arc<KeySet>, VerificationError>>>;

/// A cached key. Replaced on refresh, never mutated in place.
#[derive(Debug, Clone)]
struct CacheEntry {
    key: Arc<SigningKey>,
    fetched_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) < self.ttl
    }
}

#[derive(Default)]
struct FlightState {
    next_generation: u64,
    current: Option<(u64, SharedFetch)>,
    /// Most recent successful fetch and when it completed.
    last: Option<(Instant, Arc<KeySet>)>,
}

/// Resolved signing keys keyed by `kid`, shared by all verifications of one
/// verifier instance.
pub struct KeyCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    flight: Mutex<FlightState>,
}

impl KeyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            flight: Mutex::new(FlightState::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh key for `kid`, or `None` on miss or expiry.
    pub async fn get(&self, kid: &str) -> Option<Arc<SigningKey>> {
        let now = Instant::now();
        let entries = self.entries.read().await;

        match entries.get(kid) {
            Some(entry) if entry.is_fresh(now) => {
                tracing::trace!(target: "guard.cache", kid = %kid, "Key cache hit");
                metrics::record_jwks_cache_lookup("hit");
                Some(Arc::clone(&entry.key))
            }
            Some(_) => {
                tracing::debug!(target: "guard.cache", kid = %kid, "Key cache entry expired");
                metrics::record_jwks_cache_lookup("miss");
                None
            }
            None => {
                tracing::debug!(target: "guard.cache", kid = %kid, "Key cache miss");
                metrics::record_jwks_cache_lookup("miss");
                None
            }
        }
    }

    /// Insert or replace every key in `keys` atomically.
    ///
    /// Kids absent from `keys` keep their existing entries until their own
    /// TTL lapses; lapsed entries are pruned here.
    pub async fn put(&self, keys: &KeySet) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        entries.retain(|_, entry| entry.is_fresh(now));
        for key in keys.keys() {
            entries.insert(
                key.kid().to_string(),
                CacheEntry {
                    key: Arc::clone(key),
                    fetched_at: now,
                    ttl: self.ttl,
                },
            );
        }

        tracing::debug!(
            target: "guard.cache",
            inserted = keys.len(),
            cached = entries.len(),
            "Key cache updated"
        );
    }

    /// Number of entries currently held, fresh or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Run `fetch` unless an equivalent fetch is already running or has just
    /// completed, and return its key set.
    ///
    /// - If a fetch is in flight, await it instead of starting another
    /// - If a fetch completed at or after `observed_at` (the moment the caller
    ///   saw its cache miss), reuse that result
    /// - Otherwise start `fetch` on a new task; the task stores the keys in
    ///   this cache before any waiter is woken
    ///
    /// # Errors
    ///
    /// Returns whatever error the fetch produced. Failed fetches are not
    /// remembered; the next caller starts a new one.
    pub async fn fetch_once<F, Fut>(
        self: &Arc<Self>,
        observed_at: Instant,
        fetch: F,
    ) -> Result<Arc<KeySet>, VerificationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<KeySet, VerificationError>> + Send + 'static,
    {
        let shared = {
            let mut flight = self.flight.lock().unwrap_or_else(PoisonError::into_inner);

            if let Some((_, in_flight)) = &flight.current {
                tracing::debug!(target: "guard.cache", "Joining in-flight JWKS fetch");
                in_flight.clone()
            } else if let Some(keys) = flight
                .last
                .as_ref()
                .filter(|(completed_at, _)| *completed_at >= observed_at)
                .map(|(_, keys)| Arc::clone(keys))
            {
                tracing::debug!(target: "guard.cache", "Reusing JWKS fetch completed after miss");
                return Ok(keys);
            } else {
                let generation = flight.next_generation;
                flight.next_generation = flight.next_generation.wrapping_add(1);

                let shared = self.spawn_fetch(generation, fetch());
                flight.current = Some((generation, shared.clone()));
                shared
            }
        };

        shared.await
    }

    fn spawn_fetch<Fut>(self: &Arc<Self>, generation: u64, fetch: Fut) -> SharedFetch
    where
        Fut: Future<Output = Result<KeySet, VerificationError>> + Send + 'static,
    {
        let cache = Arc::clone(self);

        let task = tokio::spawn(async move {
            // Clears the in-flight slot on every exit path, including panics
            let _flight = FlightGuard {
                cache: Arc::clone(&cache),
                generation,
            };

            let keys = Arc::new(fetch.await?);
            cache.put(&keys).await;
            cache.record_completed(Arc::clone(&keys));
            Ok::<_, VerificationError>(keys)
        });

        task.map(|joined| {
            joined.unwrap_or_else(|e| {
                tracing::error!(target: "guard.cache", error = %e, "JWKS fetch task failed");
                Err(VerificationError::KeyResolution(
                    "JWKS fetch task failed".to_string(),
                ))
            })
        })
        .boxed()
        .shared()
    }

    fn record_completed(&self, keys: Arc<KeySet>) {
        let mut flight = self.flight.lock().unwrap_or_else(PoisonError::into_inner);
        flight.last = Some((Instant::now(), keys));
    }
}

struct FlightGuard {
    cache: Arc<KeyCache>,
    generation: u64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut flight = self
            .cache
            .flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if matches!(&flight.current, Some((generation, _)) if *generation == self.generation) {
            flight.current = None;
        }
    }
}
