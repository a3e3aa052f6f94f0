// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! daws-cache
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Single-flight coalescing for concurrent identical computations.
pub mod flight;

use chrono::{DateTime, Duration, Utc};
use daws_core::{Envelope, ErrorEnvelope, Fingerprint, STUB_TTL_CAP_SECS};
use lru::LruCache;
use serde::Serialize;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use tracing::debug;

use flight::Role;
pub use flight::SingleFlight;

/// Cache sizing and stub handling knobs.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of live entries before LRU eviction.
    pub capacity: usize,
    /// Hard cap on the lifetime of stub entries, in seconds.
    pub stub_ttl_cap_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 4096,
            stub_ttl_cap_secs: STUB_TTL_CAP_SECS,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedEntry {
    envelope: Envelope,
    expires_at: DateTime<Utc>,
}

impl CachedEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Point-in-time counters for cache behavior.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Lookups that returned a live entry.
    pub hits: u64,
    /// Lookups that found nothing, or only an expired entry.
    pub misses: u64,
    /// Entries written.
    pub inserts: u64,
    /// Entries dropped by bulk invalidation or rollover.
    pub invalidated: u64,
    /// Callers that waited on another caller's flight instead of producing.
    pub coalesced: u64,
}

/// Fingerprint-keyed envelope cache with TTL and LRU eviction.
///
/// Entries expire at `computed_at + ttl_seconds` from their provenance. Stub
/// envelopes are clamped to [`CacheConfig::stub_ttl_cap_secs`] regardless of
/// their declared TTL. Expired entries are purged before capacity eviction,
/// so LRU only ever competes among live data.
pub struct FingerprintCache {
    entries: Mutex<LruCache<Fingerprint, CachedEntry>>,
    flights: SingleFlight,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    invalidated: AtomicU64,
    coalesced: AtomicU64,
}

impl FingerprintCache {
    /// Create a cache with the given configuration.
    ///
    /// A zero capacity is bumped to one.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity.max(1)).expect("nonzero capacity");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            flights: SingleFlight::default(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            invalidated: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    /// Look up or produce the value for `fingerprint`, coalescing concurrent
    /// identical requests.
    ///
    /// On a cache hit the cached envelope is returned and the producer never
    /// runs. On a miss, the first caller becomes the holder and runs the
    /// producer; every concurrent caller with the same fingerprint waits on
    /// the holder and shares its result — success or structured error —
    /// without invoking the producer itself. If the holder is cancelled
    /// before publishing, the next waiter retries and becomes the new holder.
    ///
    /// # Errors
    ///
    /// Propagates the producer's structured error to the holder and to every
    /// waiter of the same flight.
    pub async fn single_flight<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        producer: F,
    ) -> Result<Envelope, ErrorEnvelope>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Envelope, ErrorEnvelope>>,
    {
        let mut producer = Some(producer);
        loop {
            if let Some(hit) = self.get(&fingerprint) {
                return Ok(hit);
            }
            match self.flights.begin(&fingerprint) {
                Role::Holder(mut guard) => {
                    let produce = producer.take().expect("holder role is entered once");
                    let result = produce().await;
                    if let Ok(envelope) = &result {
                        self.insert(fingerprint.clone(), envelope.clone());
                    }
                    guard.publish(&result);
                    return result;
                }
                Role::Waiter(flight) => {
                    self.coalesced.fetch_add(1, Relaxed);
                    match flight.join().await {
                        Some(result) => return result,
                        // Holder was cancelled before producing; retry.
                        None => continue,
                    }
                }
            }
        }
    }

    /// Look up a live entry, promoting it in LRU order.
    ///
    /// An expired entry counts as a miss and is removed on the way out.
    #[must_use]
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Envelope> {
        let now = Utc::now();
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let expired = match entries.peek(fingerprint) {
            Some(entry) => entry.is_expired(now),
            None => {
                self.misses.fetch_add(1, Relaxed);
                return None;
            }
        };
        if expired {
            entries.pop(fingerprint);
            self.misses.fetch_add(1, Relaxed);
            return None;
        }
        let entry = entries.get(fingerprint).expect("live entry just peeked");
        self.hits.fetch_add(1, Relaxed);
        Some(entry.envelope.clone())
    }

    /// Store an envelope under its fingerprint.
    ///
    /// The expiry is `computed_at + ttl`, with stub envelopes clamped to the
    /// configured cap. Envelopes that are already expired are not stored.
    pub fn insert(&self, fingerprint: Fingerprint, envelope: Envelope) {
        let mut ttl = envelope.meta.ttl_seconds;
        if envelope.is_stub() {
            ttl = ttl.min(self.config.stub_ttl_cap_secs);
        }
        let expires_at = envelope.meta.computed_at + Duration::seconds(ttl as i64);
        let now = Utc::now();
        if expires_at <= now {
            debug!(target: "daws.cache", %fingerprint, "skipping already-expired entry");
            return;
        }
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        if entries.len() == entries.cap().get() {
            Self::purge_expired(&mut entries, now);
        }
        entries.put(fingerprint, CachedEntry { envelope, expires_at });
        self.inserts.fetch_add(1, Relaxed);
    }

    /// Remove every entry for which `predicate` returns `true`.
    pub fn invalidate<P>(&self, predicate: P)
    where
        P: Fn(&Fingerprint, &Envelope) -> bool,
    {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let doomed: Vec<Fingerprint> = entries
            .iter()
            .filter(|&(fp, entry)| predicate(fp, &entry.envelope))
            .map(|(fp, _)| fp.clone())
            .collect();
        for fp in doomed {
            entries.pop(&fp);
            self.invalidated.fetch_add(1, Relaxed);
        }
    }

    /// Drop every entry priced against a pack other than `active_pack`.
    ///
    /// Called at pricing-pack rollover.
    pub fn rollover(&self, active_pack: &str) {
        debug!(target: "daws.cache", %active_pack, "pricing pack rollover");
        self.invalidate(|_, env| env.meta.pricing_pack_id != active_pack);
    }

    /// Number of entries currently held (including not-yet-purged expired
    /// ones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock poisoned").len()
    }

    /// `true` when the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot the behavior counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Relaxed),
            misses: self.misses.load(Relaxed),
            inserts: self.inserts.load(Relaxed),
            invalidated: self.invalidated.load(Relaxed),
            coalesced: self.coalesced.load(Relaxed),
        }
    }

    fn purge_expired(entries: &mut LruCache<Fingerprint, CachedEntry>, now: DateTime<Utc>) {
        let expired: Vec<Fingerprint> = entries
            .iter()
            .filter(|&(_, entry)| entry.is_expired(now))
            .map(|(fp, _)| fp.clone())
            .collect();
        for fp in expired {
            entries.pop(&fp);
        }
    }
}

impl Default for FingerprintCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl std::fmt::Debug for FingerprintCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintCache")
            .field("len", &self.len())
            .field("capacity", &self.config.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daws_core::{ImplementationStatus, Provenance};
    use serde_json::json;

    fn fp(n: u32) -> Fingerprint {
        Fingerprint::compute(
            "test.cap",
            json!({"n": n}).as_object().unwrap(),
            "PP1",
        )
    }

    fn envelope(pack: &str, ttl: u64) -> Envelope {
        Envelope::wrap(json!({"v": 1}), Provenance::new("test", None, ttl, pack))
    }

    #[test]
    fn get_returns_live_entries_and_drops_expired() {
        let cache = FingerprintCache::default();
        let mut env = envelope("PP1", 3600);
        cache.insert(fp(1), env.clone());
        assert!(cache.get(&fp(1)).is_some());

        // Backdate computed_at so the entry is expired on arrival.
        env.meta.computed_at = Utc::now() - Duration::seconds(7200);
        cache.insert(fp(2), env);
        assert!(cache.get(&fp(2)).is_none());
    }

    #[test]
    fn stub_ttl_is_capped_on_insert() {
        let cache = FingerprintCache::default();
        let mut env = envelope("PP1", 3600);
        env.meta.status = ImplementationStatus::Stub;
        // Older than the stub cap but well within the declared TTL.
        env.meta.computed_at = Utc::now() - Duration::seconds(STUB_TTL_CAP_SECS as i64 + 5);
        cache.insert(fp(1), env);
        assert!(cache.get(&fp(1)).is_none(), "stub must expire at the cap");
    }

    #[test]
    fn rollover_drops_only_foreign_packs() {
        let cache = FingerprintCache::default();
        cache.insert(fp(1), envelope("PP_2025-10-20", 3600));
        cache.insert(fp(2), envelope("PP_2025-10-21", 3600));
        cache.rollover("PP_2025-10-21");
        assert!(cache.get(&fp(1)).is_none());
        assert!(cache.get(&fp(2)).is_some());
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let cache = FingerprintCache::new(CacheConfig {
            capacity: 2,
            ..CacheConfig::default()
        });
        cache.insert(fp(1), envelope("PP1", 3600));
        cache.insert(fp(2), envelope("PP1", 3600));
        // Touch 1 so 2 becomes the LRU victim.
        let _ = cache.get(&fp(1));
        cache.insert(fp(3), envelope("PP1", 3600));
        assert!(cache.get(&fp(1)).is_some());
        assert!(cache.get(&fp(2)).is_none());
        assert!(cache.get(&fp(3)).is_some());
    }

    #[test]
    fn stats_count_hits_and_misses() {
        let cache = FingerprintCache::default();
        cache.insert(fp(1), envelope("PP1", 3600));
        let _ = cache.get(&fp(1));
        let _ = cache.get(&fp(9));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.inserts, 1);
    }
}
