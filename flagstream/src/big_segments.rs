// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or MIT.
// see LICENSE for license details.

//! Big segment membership: tri-state (included/excluded/unknown) lookups
//! against an externally-hosted membership store, cached with an LRU+TTL
//! cache and coalesced with [`crate::single_flight::SingleFlight`], plus a
//! background poller tracking whether that store's data is stale.

use crate::broadcaster::{Broadcaster, Subscription};
use crate::lru_cache::LruCache;
use crate::single_flight::SingleFlight;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

const LOG_TARGET: &str = "flagstream::big_segments";

/// Per-segment membership state for a context key, as returned by a
/// [`BigSegmentStore`].
#[derive(Debug, Clone, Default)]
pub struct Membership {
    /// Segment keys the context is explicitly included in.
    pub included: Vec<String>,
    /// Segment keys the context is explicitly excluded from.
    pub excluded: Vec<String>,
}

/// Tri-state answer to "is this context in this segment", per-segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentMatch {
    /// The context is included in the segment.
    Included,
    /// The context is excluded from the segment.
    Excluded,
    /// No membership data is available for this segment/context pair.
    Unknown,
}

impl Membership {
    /// Resolve membership for one segment key. Inclusion dominates
    /// exclusion if a context key somehow appears in both lists.
    pub fn check(&self, segment_key: &str) -> SegmentMatch {
        if self.included.iter().any(|k| k == segment_key) {
            SegmentMatch::Included
        } else if self.excluded.iter().any(|k| k == segment_key) {
            SegmentMatch::Excluded
        } else {
            SegmentMatch::Unknown
        }
    }
}

/// The disposition attached to one [`BigSegmentManager::get_membership`]
/// call: whether the answer came back from a healthy store, a store whose
/// data is known stale, or whether the store itself errored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipStatus {
    /// The store (or cache) answered and its data is not known stale.
    Healthy,
    /// The store (or cache) answered, but the store's data is stale per the
    /// last status poll.
    Stale,
    /// The store query itself failed; the membership result is `None` and
    /// was not cached.
    StoreError,
}

/// Availability/freshness of the big segment store, as last observed by the
/// background status poller. Broadcast to [`BigSegmentManager::subscribe_status`]
/// subscribers on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BigSegmentStoreStatus {
    /// Whether the last metadata poll succeeded.
    pub available: bool,
    /// Whether the store's last-updated time is at least `stale_after` old.
    pub stale: bool,
}

/// External membership store this manager queries and polls.
#[async_trait]
pub trait BigSegmentStore: Send + Sync {
    /// Fetch membership for a single context key hash. `Ok(None)` means the
    /// store successfully answered "no membership record for this context",
    /// distinct from a store error.
    async fn get_membership(
        &self,
        context_key_hash: &str,
    ) -> Result<Option<Membership>, crate::Error>;

    /// Fetch the store's last-updated timestamp, used to detect staleness.
    async fn get_metadata(&self) -> Result<StoreMetadata, crate::Error>;

    /// Release any resources (connections, file handles) the store holds.
    async fn close(&self) -> Result<(), crate::Error> {
        Ok(())
    }
}

/// Metadata describing the freshness of a [`BigSegmentStore`]'s data.
#[derive(Debug, Clone)]
pub struct StoreMetadata {
    /// When the store's synchronization process last wrote data, if known.
    pub last_up_to_date: Option<std::time::SystemTime>,
}

/// Configuration for a [`BigSegmentManager`].
#[derive(Debug, Clone)]
pub struct BigSegmentsConfig {
    /// Maximum number of context keys cached at once.
    pub cache_capacity: usize,
    /// TTL applied to each cached membership result.
    pub cache_ttl: Duration,
    /// Interval between status polls.
    pub status_poll_interval: Duration,
    /// A store whose last-updated time is older than this is considered
    /// stale. The status poller's tick interval is clamped to at most this
    /// value so staleness is never reported later than it's true.
    pub stale_after: Duration,
    /// How often the cache janitor sweeps expired entries.
    pub janitor_interval: Duration,
}

impl Default for BigSegmentsConfig {
    fn default() -> Self {
        BigSegmentsConfig {
            cache_capacity: 1000,
            cache_ttl: Duration::from_secs(5 * 60),
            status_poll_interval: Duration::from_secs(5),
            stale_after: Duration::from_secs(2 * 60),
            janitor_interval: Duration::from_secs(30),
        }
    }
}

/// Hashes a context key into the form a [`BigSegmentStore`] keys membership
/// records by: SHA-256 then standard (not URL-safe) base64.
pub fn hash_context_key(context_key: &str) -> String {
    let digest = Sha256::digest(context_key.as_bytes());
    BASE64_STANDARD.encode(digest)
}

/// Resolves big segment membership for context keys, with caching,
/// single-flight coalescing, and background staleness tracking.
pub struct BigSegmentManager {
    store: Arc<dyn BigSegmentStore>,
    cache: Arc<LruCache<String, Option<Arc<Membership>>>>,
    single_flight: SingleFlight<String, Option<Arc<Membership>>, String>,
    status: RwLock<Option<BigSegmentStoreStatus>>,
    status_broadcaster: Broadcaster<BigSegmentStoreStatus>,
    stale_after: Duration,
    halt: Arc<Notify>,
    stopped: AtomicBool,
    janitor: RwLock<Option<JoinHandle<()>>>,
    poller: RwLock<Option<JoinHandle<()>>>,
}

impl BigSegmentManager {
    /// Construct a manager around `store` and spawn its cache janitor.
    /// Call [`BigSegmentManager::spawn_status_poller`] separately, once the
    /// manager is held behind an `Arc`, to start the background staleness
    /// poll.
    pub fn new(store: Arc<dyn BigSegmentStore>, config: &BigSegmentsConfig) -> Arc<Self> {
        let cache = LruCache::new(config.cache_capacity, config.cache_ttl);
        let janitor = cache.spawn_janitor(config.janitor_interval);
        Arc::new(BigSegmentManager {
            store,
            cache,
            single_flight: SingleFlight::new(),
            status: RwLock::new(None),
            status_broadcaster: Broadcaster::new(16),
            stale_after: config.stale_after,
            halt: Arc::new(Notify::new()),
            stopped: AtomicBool::new(false),
            janitor: RwLock::new(Some(janitor)),
            poller: RwLock::new(None),
        })
    }

    /// Current store availability/staleness, as of the last poll. If no
    /// poll has completed yet (cold start), performs one synchronous
    /// metadata query and blocks until it succeeds or fails, per the
    /// documented cold-start behavior.
    pub async fn get_status(&self) -> BigSegmentStoreStatus {
        if let Some(status) = *self.status.read() {
            return status;
        }
        self.poll_status_once().await
    }

    /// Subscribe to every future status transition.
    pub fn subscribe_status(&self) -> Subscription<BigSegmentStoreStatus> {
        self.status_broadcaster.subscribe()
    }

    /// Resolve membership for `context_key`: cache hit first, then the store
    /// (with single-flight coalescing across concurrent callers for the same
    /// key). `None` means "no membership record" and is cached just like a
    /// positive result; a store error returns `(None, StoreError)` and is
    /// never cached, so the next call retries the store.
    pub async fn get_membership(
        &self,
        context_key: &str,
    ) -> (Option<Arc<Membership>>, MembershipStatus) {
        let hashed = hash_context_key(context_key);

        if let Some(cached) = self.cache.get(&hashed) {
            return (cached, self.overlay_staleness(MembershipStatus::Healthy));
        }

        let store = Arc::clone(&self.store);
        let hashed_for_call = hashed.clone();
        let result = self
            .single_flight
            .run(hashed.clone(), move || async move {
                store
                    .get_membership(&hashed_for_call)
                    .await
                    .map(|membership| membership.map(Arc::new))
                    .map_err(|e| e.to_string())
            })
            .await;

        match result {
            Ok(membership) => {
                self.cache.insert(hashed, membership.clone());
                (membership, self.overlay_staleness(MembershipStatus::Healthy))
            }
            Err(error) => {
                tracing::warn!(target: LOG_TARGET, %error, "big segment store lookup failed");
                (None, MembershipStatus::StoreError)
            }
        }
    }

    /// Resolve membership for `context_key` against every segment in
    /// `segment_keys` in one call, built on [`Self::get_membership`]. A
    /// convenience for an `Evaluator` checking several segment references at
    /// once; the membership status is not surfaced here (`None` or a store
    /// error both resolve every segment to [`SegmentMatch::Unknown`]).
    pub async fn check_membership(
        &self,
        context_key: &str,
        segment_keys: &[String],
    ) -> HashMap<String, SegmentMatch> {
        let (membership, _status) = self.get_membership(context_key).await;
        segment_keys
            .iter()
            .map(|segment_key| {
                let result = membership
                    .as_ref()
                    .map(|m| m.check(segment_key))
                    .unwrap_or(SegmentMatch::Unknown);
                (segment_key.clone(), result)
            })
            .collect()
    }

    fn overlay_staleness(&self, base: MembershipStatus) -> MembershipStatus {
        let is_stale = self.status.read().map(|s| s.stale).unwrap_or(false);
        if is_stale && base == MembershipStatus::Healthy {
            MembershipStatus::Stale
        } else {
            base
        }
    }

    /// Spawn the background task polling [`BigSegmentStore::get_metadata`]
    /// on `config.status_poll_interval` (clamped to at most
    /// `config.stale_after`) to keep [`BigSegmentManager::get_status`]
    /// current. The handle is kept internally and joined on
    /// [`BigSegmentManager::close`].
    pub fn spawn_status_poller(self: &Arc<Self>, config: &BigSegmentsConfig) {
        let manager = Arc::clone(self);
        let interval = config.status_poll_interval.min(config.stale_after);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        manager.poll_status_once().await;
                    }
                    _ = manager.halt.notified() => {
                        tracing::debug!(target: LOG_TARGET, "status poller stopping");
                        return;
                    }
                }
            }
        });
        *self.poller.write() = Some(handle);
    }

    async fn poll_status_once(&self) -> BigSegmentStoreStatus {
        let new_status = match self.store.get_metadata().await {
            Ok(metadata) => match metadata.last_up_to_date {
                Some(updated_at) => match updated_at.elapsed() {
                    Ok(age) => BigSegmentStoreStatus {
                        available: true,
                        stale: age >= self.stale_after,
                    },
                    Err(_) => BigSegmentStoreStatus {
                        available: true,
                        stale: false,
                    },
                },
                None => BigSegmentStoreStatus {
                    available: true,
                    stale: true,
                },
            },
            Err(error) => {
                tracing::warn!(target: LOG_TARGET, %error, "big segment store status poll failed");
                BigSegmentStoreStatus {
                    available: false,
                    stale: true,
                }
            }
        };

        let changed = {
            let mut guard = self.status.write();
            let changed = *guard != Some(new_status);
            *guard = Some(new_status);
            changed
        };
        if changed {
            self.status_broadcaster.publish(new_status);
        }
        new_status
    }

    /// Stop the background status poller and cache janitor, close the
    /// status broadcaster, and close the underlying store. Idempotent.
    pub async fn close(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.halt.notify_waiters();
        }
        self.cache.stop_janitor();
        if let Some(handle) = self.poller.write().take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.janitor.write().take() {
            let _ = handle.await;
        }
        self.status_broadcaster.close();
        if let Err(error) = self.store.close().await {
            tracing::warn!(target: LOG_TARGET, %error, "error closing big segment store");
        }
    }
}
