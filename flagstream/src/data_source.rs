// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or MIT.
// see LICENSE for license details.

//! The data source state machine: keeps [`crate::store::MemoryStore`] in
//! sync with the origin service, either by polling or by a long-lived
//! streaming connection, and exposes its own health as a small state machine
//! subscribers can watch.

use crate::broadcaster::{Broadcaster, Subscription};
use crate::store::MemoryStore;
use flagstream_transport::{
    BackoffConfig, CodecOutcome, PollingConfig, PollingRequester, PollingResponse, ProtocolCodec,
    ReconnectBackoff, StreamingConfig, StreamingSubscriber,
};
use futures::StreamExt;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

const LOG_TARGET: &str = "flagstream::data_source";

/// Broad category of the error carried by an [`ErrorInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// DNS, TCP, or TLS failure talking to the origin.
    Network,
    /// The origin responded with an HTTP status outside the 2xx/304 range.
    ErrorResponse,
    /// A polling document or SSE event body could not be parsed.
    InvalidData,
    /// The transport configuration itself was invalid.
    Config,
    /// The server sent a `goodbye` event ending the connection.
    Goodbye,
}

/// A record of the error that caused a [`DataSourceStatus`] transition,
/// broadcast alongside the status so a subscriber can tell *why* the source
/// went `Interrupted` or `Off` rather than just that it did.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorInfo {
    /// Broad category of the error.
    pub kind: ErrorKind,
    /// The HTTP status code associated with the error, if any.
    pub code: Option<u16>,
    /// Human-readable detail, suitable for logging.
    pub message: String,
    /// When this error was observed.
    pub timestamp: SystemTime,
}

impl ErrorInfo {
    fn from_transport_error(error: &flagstream_transport::Error) -> Self {
        let kind = match error {
            flagstream_transport::Error::Network(_) => ErrorKind::Network,
            flagstream_transport::Error::ErrorResponse { .. } => ErrorKind::ErrorResponse,
            flagstream_transport::Error::InvalidData(_) => ErrorKind::InvalidData,
            flagstream_transport::Error::Config(_) => ErrorKind::Config,
            _ => ErrorKind::Network,
        };
        ErrorInfo {
            kind,
            code: error.status_code(),
            message: error.to_string(),
            timestamp: SystemTime::now(),
        }
    }

    fn goodbye(reason: Option<&str>) -> Self {
        ErrorInfo {
            kind: ErrorKind::Goodbye,
            code: None,
            message: reason.unwrap_or("server closed the connection").to_string(),
            timestamp: SystemTime::now(),
        }
    }
}

/// Health of a data source, in the order it's expected to be observed:
/// `Initializing` until the first successful sync, then `Valid` while
/// healthy, `Interrupted` during a recoverable outage, and `Off` once the
/// source has given up permanently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSourceStatus {
    /// No successful sync has completed yet.
    Initializing,
    /// The store reflects a successful sync and the source is healthy.
    Valid,
    /// A recoverable error is being retried; the store still holds the last
    /// good data.
    Interrupted,
    /// The source has stopped permanently (explicitly closed, or an
    /// unrecoverable error); it will not reconnect.
    Off,
}

impl DataSourceStatus {
    fn is_terminal_for_readiness(self) -> bool {
        matches!(self, DataSourceStatus::Valid | DataSourceStatus::Off)
    }
}

struct StatusTracker {
    status: RwLock<DataSourceStatus>,
    last_error: RwLock<Option<ErrorInfo>>,
    broadcaster: Broadcaster<(DataSourceStatus, Option<ErrorInfo>)>,
    ready: Notify,
    ready_fired: AtomicBool,
    became_valid: AtomicBool,
}

impl StatusTracker {
    fn new() -> Self {
        StatusTracker {
            status: RwLock::new(DataSourceStatus::Initializing),
            last_error: RwLock::new(None),
            broadcaster: Broadcaster::new(16),
            ready: Notify::new(),
            ready_fired: AtomicBool::new(false),
            became_valid: AtomicBool::new(false),
        }
    }

    fn get(&self) -> DataSourceStatus {
        *self.status.read()
    }

    fn last_error(&self) -> Option<ErrorInfo> {
        self.last_error.read().clone()
    }

    fn set(&self, new_status: DataSourceStatus, error: Option<ErrorInfo>) {
        *self.status.write() = new_status;
        if new_status == DataSourceStatus::Valid {
            self.became_valid.store(true, Ordering::SeqCst);
            *self.last_error.write() = None;
        } else if error.is_some() {
            *self.last_error.write() = error.clone();
        }
        self.broadcaster.publish((new_status, error));
        if new_status.is_terminal_for_readiness() && !self.ready_fired.swap(true, Ordering::SeqCst)
        {
            self.ready.notify_waiters();
        }
    }

    async fn wait_ready(&self) -> Result<(), crate::Error> {
        // Registering interest before checking the flag (rather than after)
        // avoids the race where a status transition completes between the
        // check and the await.
        let notified = self.ready.notified();
        if !self.ready_fired.load(Ordering::SeqCst) {
            notified.await;
        }
        if self.get() == DataSourceStatus::Off && !self.became_valid.load(Ordering::SeqCst) {
            Err(crate::Error::ClosedBeforeReady)
        } else {
            Ok(())
        }
    }

    /// Transition to `Off` and close the status broadcaster: the terminal
    /// step of the background task's lifecycle, run exactly once whether the
    /// task exits via halt or via an unrecoverable error.
    fn shut_down(&self) {
        self.set(DataSourceStatus::Off, None);
        self.broadcaster.close();
    }

    /// Like [`Self::shut_down`], but records the error that forced the
    /// shutdown.
    fn shut_down_with_error(&self, error: ErrorInfo) {
        self.set(DataSourceStatus::Off, Some(error));
        self.broadcaster.close();
    }
}

/// A running background sync of [`MemoryStore`] from the origin service.
#[async_trait::async_trait]
pub trait DataSource: Send + Sync {
    /// Current health of the source.
    fn status(&self) -> DataSourceStatus;

    /// The error that caused the most recent non-`Valid` status transition,
    /// if any. Cleared when the source returns to `Valid`.
    fn last_error(&self) -> Option<ErrorInfo>;

    /// Subscribe to every future status transition, paired with the error
    /// (if any) that caused it.
    fn subscribe_status(&self) -> Subscription<(DataSourceStatus, Option<ErrorInfo>)>;

    /// Wait until the source reaches `Valid` for the first time, or returns
    /// [`crate::Error::ClosedBeforeReady`] if it reaches `Off` without ever
    /// doing so (e.g. the very first connection attempt fails with an
    /// unrecoverable error). Resolves immediately if that point has already
    /// passed.
    async fn wait_ready(&self) -> Result<(), crate::Error>;

    /// Request the source stop; it transitions to `Off` and its background
    /// task exits. Idempotent.
    fn close(&self);
}

/// Syncs the store by polling an HTTP endpoint on an interval.
pub struct PollingDataSource {
    tracker: Arc<StatusTracker>,
    halt: Arc<Notify>,
    closed: AtomicBool,
}

impl PollingDataSource {
    /// Start polling in the background. The returned handle owns the
    /// background task for as long as it's alive; dropping it does not stop
    /// the task (call [`DataSource::close`] for that), matching the
    /// ambient convention of explicit over implicit lifecycle control.
    pub fn spawn(
        store: Arc<MemoryStore>,
        client: reqwest::Client,
        config: PollingConfig,
        backoff_config: BackoffConfig,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let tracker = Arc::new(StatusTracker::new());
        let halt = Arc::new(Notify::new());
        let source = Arc::new(PollingDataSource {
            tracker: Arc::clone(&tracker),
            halt: Arc::clone(&halt),
            closed: AtomicBool::new(false),
        });

        let poll_interval = config.poll_interval;
        let mut requester = PollingRequester::new(client, config);
        let handle = tokio::spawn(async move {
            let mut codec = ProtocolCodec::new();
            let mut backoff = ReconnectBackoff::new(backoff_config);

            loop {
                let sleep = tokio::select! {
                    _ = halt.notified() => {
                        tracker.shut_down();
                        return;
                    }
                    result = requester.poll() => {
                        match apply_polling_result(result, &store, &mut codec) {
                            PollOutcome::Ok => {
                                tracker.set(DataSourceStatus::Valid, None);
                                backoff.reset();
                                poll_interval
                            }
                            PollOutcome::Recoverable(info) => {
                                tracker.set(DataSourceStatus::Interrupted, Some(info));
                                backoff.next_delay(flagstream_transport::thread_rng_jitter)
                            }
                            PollOutcome::Unrecoverable(info) => {
                                tracker.shut_down_with_error(info);
                                return;
                            }
                        }
                    }
                };
                tokio::select! {
                    _ = halt.notified() => {
                        tracker.shut_down();
                        return;
                    }
                    _ = tokio::time::sleep(sleep) => {}
                }
            }
        });

        (source, handle)
    }
}

enum PollOutcome {
    Ok,
    Recoverable(ErrorInfo),
    Unrecoverable(ErrorInfo),
}

fn apply_polling_result(
    result: Result<PollingResponse, flagstream_transport::Error>,
    store: &MemoryStore,
    codec: &mut ProtocolCodec,
) -> PollOutcome {
    match result {
        Ok(PollingResponse::NotModified) => PollOutcome::Ok,
        Ok(PollingResponse::Data(envelope)) => {
            let mut error_info = None;
            for event in &envelope.events {
                match codec.handle_event(event) {
                    Ok(CodecOutcome::Complete(change_set)) => store.apply_change_set(change_set),
                    Ok(CodecOutcome::Pending) => {}
                    Ok(CodecOutcome::Goodbye(payload)) => {
                        if payload.catastrophe && !payload.silent {
                            return PollOutcome::Unrecoverable(ErrorInfo::goodbye(
                                payload.reason.as_deref(),
                            ));
                        }
                    }
                    Err(error) => {
                        tracing::warn!(target: LOG_TARGET, %error, "malformed polling event, discarding in-progress change set");
                        error_info = Some(ErrorInfo::from_transport_error(&error));
                        codec.reset();
                    }
                }
            }
            match error_info {
                Some(info) => PollOutcome::Recoverable(info),
                None => PollOutcome::Ok,
            }
        }
        Err(error) => {
            tracing::warn!(target: LOG_TARGET, %error, "poll failed");
            let info = ErrorInfo::from_transport_error(&error);
            if error.is_recoverable() {
                PollOutcome::Recoverable(info)
            } else {
                PollOutcome::Unrecoverable(info)
            }
        }
    }
}

#[async_trait::async_trait]
impl DataSource for PollingDataSource {
    fn status(&self) -> DataSourceStatus {
        self.tracker.get()
    }

    fn last_error(&self) -> Option<ErrorInfo> {
        self.tracker.last_error()
    }

    fn subscribe_status(&self) -> Subscription<(DataSourceStatus, Option<ErrorInfo>)> {
        self.tracker.broadcaster.subscribe()
    }

    async fn wait_ready(&self) -> Result<(), crate::Error> {
        self.tracker.wait_ready().await
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.halt.notify_waiters();
        }
    }
}

/// Syncs the store from a long-lived server-sent-events connection,
/// reconnecting with backoff on any recoverable error.
pub struct StreamingDataSource {
    tracker: Arc<StatusTracker>,
    halt: Arc<Notify>,
    closed: AtomicBool,
}

impl StreamingDataSource {
    /// Start streaming in the background.
    pub fn spawn(
        store: Arc<MemoryStore>,
        client: reqwest::Client,
        config: StreamingConfig,
        backoff_config: BackoffConfig,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let tracker = Arc::new(StatusTracker::new());
        let halt = Arc::new(Notify::new());
        let source = Arc::new(StreamingDataSource {
            tracker: Arc::clone(&tracker),
            halt: Arc::clone(&halt),
            closed: AtomicBool::new(false),
        });

        let subscriber = StreamingSubscriber::new(client, config);
        let handle = tokio::spawn(async move {
            let mut backoff = ReconnectBackoff::new(backoff_config);

            loop {
                let connected_at = Instant::now();
                let connect_result = subscriber.connect().await;
                let mut stream = match connect_result {
                    Ok(stream) => stream,
                    Err(error) => {
                        tracing::warn!(target: LOG_TARGET, %error, "stream connect failed");
                        let info = ErrorInfo::from_transport_error(&error);
                        if !error.is_recoverable() {
                            tracker.shut_down_with_error(info);
                            return;
                        }
                        tracker.set(DataSourceStatus::Interrupted, Some(info));
                        if !sleep_or_halt(&halt, backoff.next_delay(flagstream_transport::thread_rng_jitter)).await {
                            tracker.shut_down();
                            return;
                        }
                        continue;
                    }
                };

                let mut codec = ProtocolCodec::new();
                let mut disconnect_reason = DisconnectReason::StreamEnded;

                loop {
                    tokio::select! {
                        _ = halt.notified() => {
                            tracker.shut_down();
                            return;
                        }
                        next = stream.next() => {
                            match next {
                                None => break,
                                Some(Ok(event)) => match codec.handle_event(&event) {
                                    Ok(CodecOutcome::Complete(change_set)) => {
                                        store.apply_change_set(change_set);
                                        tracker.set(DataSourceStatus::Valid, None);
                                    }
                                    Ok(CodecOutcome::Pending) => {}
                                    Ok(CodecOutcome::Goodbye(payload)) => {
                                        if payload.catastrophe && !payload.silent {
                                            disconnect_reason = DisconnectReason::Unrecoverable(
                                                ErrorInfo::goodbye(payload.reason.as_deref()),
                                            );
                                        }
                                        break;
                                    }
                                    Err(error) => {
                                        tracing::warn!(target: LOG_TARGET, %error, "malformed stream event, discarding in-progress change set and reconnecting");
                                        let info = ErrorInfo::from_transport_error(&error);
                                        codec.reset();
                                        disconnect_reason = DisconnectReason::Recoverable(info);
                                        break;
                                    }
                                },
                                Some(Err(error)) => {
                                    tracing::warn!(target: LOG_TARGET, %error, "stream read failed");
                                    let info = ErrorInfo::from_transport_error(&error);
                                    disconnect_reason = if error.is_recoverable() {
                                        DisconnectReason::Recoverable(info)
                                    } else {
                                        DisconnectReason::Unrecoverable(info)
                                    };
                                    break;
                                }
                            }
                        }
                    }
                }

                match disconnect_reason {
                    DisconnectReason::Unrecoverable(info) => {
                        tracker.shut_down_with_error(info);
                        return;
                    }
                    DisconnectReason::Recoverable(info) => {
                        backoff.record_uptime(connected_at.elapsed());
                        tracker.set(DataSourceStatus::Interrupted, Some(info));
                    }
                    DisconnectReason::StreamEnded => {
                        backoff.record_uptime(connected_at.elapsed());
                        tracker.set(DataSourceStatus::Interrupted, None);
                    }
                }
                if !sleep_or_halt(&halt, backoff.next_delay(flagstream_transport::thread_rng_jitter)).await {
                    tracker.shut_down();
                    return;
                }
            }
        });

        (source, handle)
    }
}

enum DisconnectReason {
    StreamEnded,
    Recoverable(ErrorInfo),
    Unrecoverable(ErrorInfo),
}

/// Sleeps for `duration`, or returns `false` early if `halt` fires first.
async fn sleep_or_halt(halt: &Notify, duration: Duration) -> bool {
    tokio::select! {
        _ = halt.notified() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[async_trait::async_trait]
impl DataSource for StreamingDataSource {
    fn status(&self) -> DataSourceStatus {
        self.tracker.get()
    }

    fn last_error(&self) -> Option<ErrorInfo> {
        self.tracker.last_error()
    }

    fn subscribe_status(&self) -> Subscription<(DataSourceStatus, Option<ErrorInfo>)> {
        self.tracker.broadcaster.subscribe()
    }

    async fn wait_ready(&self) -> Result<(), crate::Error> {
        self.tracker.wait_ready().await
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.halt.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flagstream_transport::{flag_kind, WireEvent};
    use std::sync::Arc;

    fn put_event(key: &str, version: i64) -> WireEvent {
        WireEvent {
            name: "put-object".to_string(),
            data: serde_json::json!({"version": version, "kind": "flag", "key": key, "object": {}}),
        }
    }

    #[test]
    fn full_transfer_updates_store_through_apply_polling_result() {
        let store = MemoryStore::new();
        let mut codec = ProtocolCodec::new();
        let envelope = flagstream_transport::PollingEnvelope {
            events: vec![
                WireEvent {
                    name: "server-intent".to_string(),
                    data: serde_json::json!({"payloads": [{"intentCode": "xfer-full"}]}),
                },
                put_event("a", 1),
                WireEvent {
                    name: "payload-transferred".to_string(),
                    data: serde_json::json!({}),
                },
            ],
        };
        let outcome = apply_polling_result(Ok(PollingResponse::Data(envelope)), &store, &mut codec);
        assert!(matches!(outcome, PollOutcome::Ok));
        assert!(store.is_initialized());
        assert_eq!(store.get(&flag_kind(), "a").unwrap().version, 1);
    }

    #[test]
    fn goodbye_catastrophe_is_unrecoverable_with_goodbye_kind() {
        let store = MemoryStore::new();
        let mut codec = ProtocolCodec::new();
        let envelope = flagstream_transport::PollingEnvelope {
            events: vec![WireEvent {
                name: "goodbye".to_string(),
                data: serde_json::json!({"reason": "shutting down", "catastrophe": true}),
            }],
        };
        let outcome = apply_polling_result(Ok(PollingResponse::Data(envelope)), &store, &mut codec);
        match outcome {
            PollOutcome::Unrecoverable(info) => {
                assert_eq!(info.kind, ErrorKind::Goodbye);
                assert_eq!(info.message, "shutting down");
            }
            _ => panic!("expected an unrecoverable outcome"),
        }
    }

    #[test]
    fn malformed_event_is_recoverable_and_does_not_partially_apply() {
        let store = MemoryStore::new();
        let mut codec = ProtocolCodec::new();
        let envelope = flagstream_transport::PollingEnvelope {
            events: vec![
                WireEvent {
                    name: "server-intent".to_string(),
                    data: serde_json::json!({"payloads": [{"intentCode": "xfer-full"}]}),
                },
                WireEvent {
                    name: "put-object".to_string(),
                    data: serde_json::json!({"version": "not-a-number"}),
                },
            ],
        };
        let outcome = apply_polling_result(Ok(PollingResponse::Data(envelope)), &store, &mut codec);
        assert!(matches!(outcome, PollOutcome::Recoverable(_)));
        assert!(!store.is_initialized());
    }

    #[test]
    fn unrecoverable_transport_error_is_unrecoverable_with_status_code() {
        let store = MemoryStore::new();
        let mut codec = ProtocolCodec::new();
        let outcome = apply_polling_result(
            Err(flagstream_transport::Error::ErrorResponse { status: 401 }),
            &store,
            &mut codec,
        );
        match outcome {
            PollOutcome::Unrecoverable(info) => {
                assert_eq!(info.kind, ErrorKind::ErrorResponse);
                assert_eq!(info.code, Some(401));
            }
            _ => panic!("expected an unrecoverable outcome"),
        }
    }

    #[tokio::test]
    async fn status_starts_initializing() {
        let tracker = StatusTracker::new();
        assert_eq!(tracker.get(), DataSourceStatus::Initializing);
    }

    #[tokio::test]
    async fn wait_ready_resolves_once_valid() {
        let tracker = Arc::new(StatusTracker::new());
        let waiter_tracker = Arc::clone(&tracker);
        let waiter = tokio::spawn(async move {
            waiter_tracker.wait_ready().await.unwrap();
        });
        tokio::task::yield_now().await;
        tracker.set(DataSourceStatus::Valid, None);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn wait_ready_errors_if_closed_before_ever_becoming_valid() {
        let tracker = StatusTracker::new();
        let info = ErrorInfo::from_transport_error(&flagstream_transport::Error::ErrorResponse {
            status: 401,
        });
        tracker.shut_down_with_error(info);
        let result = tokio::time::timeout(Duration::from_millis(50), tracker.wait_ready())
            .await
            .expect("wait_ready should resolve immediately");
        assert!(matches!(result, Err(crate::Error::ClosedBeforeReady)));
        assert_eq!(tracker.last_error().unwrap().code, Some(401));
    }

    #[tokio::test]
    async fn wait_ready_succeeds_if_already_valid_before_closing() {
        let tracker = StatusTracker::new();
        tracker.set(DataSourceStatus::Valid, None);
        tracker.shut_down();
        let result = tokio::time::timeout(Duration::from_millis(50), tracker.wait_ready())
            .await
            .expect("wait_ready should resolve immediately");
        assert!(result.is_ok());
    }
}
