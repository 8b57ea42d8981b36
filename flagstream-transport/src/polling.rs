// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or MIT.
// see LICENSE for license details.

//! HTTP polling transport: fetches the events envelope on an interval, using
//! conditional requests (`If-None-Match`/`ETag`) to avoid re-parsing unchanged
//! responses.

use crate::wire::PollingEnvelope;
use crate::Error;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

const LOG_TARGET: &str = "flagstream-polling";

/// Configuration for a [`PollingRequester`].
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Base URI of the polling endpoint.
    pub base_url: Url,
    /// Interval between polls when the previous one succeeded.
    pub poll_interval: Duration,
    /// Optional server-side filter key, forwarded as a query parameter.
    pub filter: Option<String>,
    /// Additional headers sent with every request (e.g. authorization).
    pub headers: Vec<(String, String)>,
}

impl PollingConfig {
    /// Construct a polling config with the spec's default 30 second interval
    /// and no filter.
    pub fn new(base_url: Url) -> Self {
        PollingConfig {
            base_url,
            poll_interval: Duration::from_secs(30),
            filter: None,
            headers: Vec::new(),
        }
    }
}

/// The outcome of a single poll.
#[derive(Debug)]
pub enum PollingResponse {
    /// The server returned `304 Not Modified`; the caller's state is already
    /// current and nothing needs to be re-parsed.
    NotModified,
    /// A fresh envelope of events to apply.
    Data(PollingEnvelope),
}

/// Performs conditional HTTP GETs against the polling endpoint and decodes
/// the response body.
pub struct PollingRequester {
    client: Client,
    config: PollingConfig,
    last_etag: Option<String>,
}

impl PollingRequester {
    /// Build a requester from an existing [`reqwest::Client`] (so callers can
    /// share connection pools/TLS config across requesters) and a
    /// [`PollingConfig`].
    pub fn new(client: Client, config: PollingConfig) -> Self {
        PollingRequester {
            client,
            config,
            last_etag: None,
        }
    }

    /// The configured poll interval.
    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    /// Perform one poll. On success, the response's `ETag` (if present) is
    /// remembered and sent as `If-None-Match` on the next call.
    pub async fn poll(&mut self) -> Result<PollingResponse, Error> {
        let mut request = self.client.get(self.config.base_url.clone());
        if let Some(filter) = &self.config.filter {
            request = request.query(&[("filter", filter.as_str())]);
        }
        for (name, value) in &self.config.headers {
            request = request.header(name, value);
        }
        if let Some(etag) = &self.last_etag {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag.as_str());
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            tracing::debug!(target: LOG_TARGET, "poll returned 304, no change");
            return Ok(PollingResponse::NotModified);
        }
        if !status.is_success() {
            tracing::warn!(target: LOG_TARGET, %status, "poll returned non-success status");
            return Err(Error::ErrorResponse {
                status: status.as_u16(),
            });
        }

        if let Some(etag) = response.headers().get(reqwest::header::ETAG) {
            if let Ok(etag) = etag.to_str() {
                self.last_etag = Some(etag.to_string());
            }
        }

        let bytes = response.bytes().await?;
        let envelope: PollingEnvelope = serde_json::from_slice(&bytes).map_err(|e| {
            let preview: String = String::from_utf8_lossy(&bytes).chars().take(200).collect();
            tracing::warn!(target: LOG_TARGET, error = %e, body = %preview, "malformed polling response body");
            Error::InvalidData(format!("malformed polling response: {e}"))
        })?;
        Ok(PollingResponse::Data(envelope))
    }

    /// Forget any remembered `ETag`, forcing the next poll to fetch fresh
    /// data unconditionally. Used when the caller has reason to believe its
    /// local state may be stale despite an unchanged resource (e.g. after
    /// recovering from a long network interruption).
    pub fn clear_etag(&mut self) {
        self.last_etag = None;
    }
}
