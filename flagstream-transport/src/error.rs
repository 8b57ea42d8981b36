// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or MIT.
// see LICENSE for license details.

//! Errors produced while polling or streaming flag data from the origin service.

/// Errors that can occur in the transport layer: building requests, talking to the
/// network, or making sense of what comes back.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A transport-level failure (DNS, TCP, TLS) talking to the origin.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    /// The origin responded with an HTTP status outside the 2xx/304 range.
    #[error("origin responded with status {status}")]
    ErrorResponse {
        /// The HTTP status code returned.
        status: u16,
    },
    /// A `server-intent`/`put-object`/`delete-object`/`payload-transferred` event body
    /// could not be parsed, or the overall polling document was malformed JSON.
    #[error("invalid data: {0}")]
    InvalidData(String),
    /// The base URI or request configuration was invalid; this cannot be recovered
    /// from by retrying.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether a retry (with backoff) is appropriate for this error, per the
    /// disposition table: network errors, 400/408/429/5xx are recoverable;
    /// 401/403 and other 4xx are not; invalid data is recoverable (the stream or
    /// poll loop restarts); configuration errors are never recoverable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::ErrorResponse { status } => match *status {
                400 | 408 | 429 => true,
                s if s >= 500 => true,
                _ => false,
            },
            Error::InvalidData(_) => true,
            Error::Config(_) => false,
        }
    }

    /// The HTTP status code associated with this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::ErrorResponse { status } => Some(*status),
            _ => None,
        }
    }
}
