// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or MIT.
// see LICENSE for license details.

//! Publish/subscribe fan-out used to notify data source status listeners.
//!
//! Built on one bounded [`tokio::sync::mpsc`] channel per subscriber rather
//! than [`tokio::sync::broadcast`]'s single shared ring buffer, so that one
//! slow subscriber overflowing its channel only drops messages for itself
//! instead of forcing every other subscriber to skip ahead too.

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// A fan-out point for values of type `T`. Subscribers each get their own
/// bounded channel; a publish that would block on a full channel instead
/// drops the new value for that subscriber and leaves its queue as-is, so
/// publishing never blocks the caller.
pub struct Broadcaster<T> {
    subscribers: Mutex<Vec<mpsc::Sender<T>>>,
    capacity: usize,
    closed: std::sync::atomic::AtomicBool,
}

/// A subscription handle returned by [`Broadcaster::subscribe`].
pub struct Subscription<T> {
    receiver: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    /// Await the next published value. Returns `None` once the broadcaster
    /// is dropped.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }
}

impl<T: Clone> Broadcaster<T> {
    /// Construct a broadcaster whose per-subscriber channels hold up to
    /// `capacity` unreceived messages before the oldest is dropped to make
    /// room for a new one.
    pub fn new(capacity: usize) -> Self {
        Broadcaster {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Register a new subscriber and return its handle. Once [`Self::close`]
    /// has been called, the returned subscription is already at end-of-stream
    /// (`recv` immediately returns `None`): a closed broadcaster never gains
    /// new live listeners.
    pub fn subscribe(&self) -> Subscription<T> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        if !self.closed.load(std::sync::atomic::Ordering::SeqCst) {
            self.subscribers.lock().push(sender);
        }
        Subscription { receiver }
    }

    /// Publish `value` to every current subscriber. Subscribers whose
    /// channel is closed are pruned; subscribers whose channel is full have
    /// the new value dropped for them rather than blocking this call or
    /// affecting any other subscriber.
    pub fn publish(&self, value: T) {
        let mut guard = self.subscribers.lock();
        guard.retain(|sender| {
            match sender.try_send(value.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!(target: "flagstream::broadcaster", "subscriber channel full, dropping message");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Current number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Close the broadcaster: every current subscriber's channel is closed
    /// (their next `recv` returns `None`), and no future [`Self::subscribe`]
    /// call registers a new live listener. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        self.subscribers.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn published_values_reach_all_subscribers() {
        let broadcaster: Broadcaster<i32> = Broadcaster::new(4);
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();
        broadcaster.publish(1);
        assert_eq!(a.recv().await, Some(1));
        assert_eq!(b.recv().await, Some(1));
    }

    #[tokio::test]
    async fn full_channel_drops_for_that_subscriber_without_blocking() {
        let broadcaster: Broadcaster<i32> = Broadcaster::new(1);
        let mut slow = broadcaster.subscribe();
        broadcaster.publish(1);
        broadcaster.publish(2);
        // The channel has capacity 1; the second publish was dropped for
        // this subscriber rather than blocking `publish`.
        assert_eq!(slow.recv().await, Some(1));
    }

    #[tokio::test]
    async fn close_ends_existing_subscriptions_and_rejects_new_ones() {
        let broadcaster: Broadcaster<i32> = Broadcaster::new(4);
        let mut existing = broadcaster.subscribe();
        broadcaster.close();
        assert_eq!(existing.recv().await, None);

        let mut after_close = broadcaster.subscribe();
        assert_eq!(after_close.recv().await, None);
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned_on_next_publish() {
        let broadcaster: Broadcaster<i32> = Broadcaster::new(4);
        let subscription = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);
        drop(subscription);
        broadcaster.publish(1);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }
}
