// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or MIT.
// see LICENSE for license details.

//! Coalesces concurrent lookups for the same key into a single in-flight
//! call, so that a big-segment membership cache miss for a hot context key
//! doesn't fan out into one store query per waiting caller.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Deduplicates concurrent async calls keyed by `K`, sharing one `V` result
/// (or a cloned error `E`) across every caller that asked for the same key
/// while a call was in flight.
pub struct SingleFlight<K, V, E> {
    inflight: Mutex<HashMap<K, broadcast::Sender<Result<V, E>>>>,
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Construct an empty coalescer.
    pub fn new() -> Self {
        SingleFlight {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` for `key` unless a call for the same key is already in
    /// flight, in which case await that call's result instead. Every caller
    /// for a given key during the window it's in flight receives the same
    /// `Result`.
    pub async fn run<F, Fut>(&self, key: K, f: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, E>>,
    {
        let mut receiver = {
            let mut guard = self.inflight.lock();
            if let Some(sender) = guard.get(&key) {
                Some(sender.subscribe())
            } else {
                let (sender, _) = broadcast::channel(1);
                guard.insert(key.clone(), sender);
                None
            }
        };

        if let Some(receiver) = receiver.as_mut() {
            // Another caller is already running `f`; wait for its result.
            return match receiver.recv().await {
                Ok(result) => result,
                Err(_) => {
                    // The leader's sender was dropped without sending, which
                    // should not happen in practice; treat as if we'd become
                    // the leader and run `f` ourselves.
                    self.run_as_leader(key, f).await
                }
            };
        }

        self.run_as_leader(key, f).await
    }

    async fn run_as_leader<F, Fut>(&self, key: K, f: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, E>>,
    {
        let result = f().await;
        if let Some(sender) = self.inflight.lock().remove(&key) {
            // No receivers is not an error: every waiter may have already
            // given up or there may have been none to begin with.
            let _ = sender.send(result.clone());
        }
        result
    }

    /// Number of keys currently in flight. Exposed for tests and metrics,
    /// not needed for correctness.
    pub fn in_flight_count(&self) -> usize {
        self.inflight.lock().len()
    }
}

impl<K, V, E> Default for SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        SingleFlight::new()
    }
}
