// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or MIT.
// see LICENSE for license details.

//! Errors produced by the flag data plane above the transport layer.

/// Errors that can occur while syncing the store, resolving big-segment
/// membership, or running hooks.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A transport-level failure from the polling or streaming connection.
    #[error(transparent)]
    Transport(#[from] flagstream_transport::Error),
    /// The configured big segment store returned an error.
    #[error("big segment store error: {0}")]
    BigSegmentStore(String),
    /// The data source was closed before it ever became initialized.
    #[error("data source closed before becoming initialized")]
    ClosedBeforeReady,
}

impl Error {
    /// Whether the condition that produced this error can reasonably be
    /// retried. Delegates to [`flagstream_transport::Error::is_recoverable`]
    /// for transport errors; big-segment-store errors are treated as
    /// recoverable since the next lookup is independent.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Transport(e) => e.is_recoverable(),
            Error::BigSegmentStore(_) => true,
            Error::ClosedBeforeReady => false,
        }
    }
}
