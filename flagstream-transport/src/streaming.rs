// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or MIT.
// see LICENSE for license details.

//! Server-sent-events transport: opens a long-lived HTTP connection and
//! yields [`WireEvent`]s parsed out of the SSE frames as they arrive.
//!
//! No SSE client crate appears anywhere in the dependency stack this crate
//! draws from, so the frame parser ([`SseBuffer`]) is hand-rolled against the
//! subset of the format this protocol actually uses: `event:`/`data:` fields,
//! frames terminated by a blank line, multi-line `data:` joined with `\n`.

use crate::wire::WireEvent;
use crate::Error;
use futures::stream::{self, Stream};
use futures::StreamExt;
use reqwest::Client;
use std::collections::VecDeque;
use std::time::Duration;
use url::Url;

const LOG_TARGET: &str = "flagstream-streaming";

/// Configuration for a [`StreamingSubscriber`].
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Base URI of the streaming endpoint.
    pub base_url: Url,
    /// Optional server-side filter key, forwarded as a query parameter.
    pub filter: Option<String>,
    /// Additional headers sent with the connection request.
    pub headers: Vec<(String, String)>,
    /// If no bytes (not even a heart-beat) arrive within this window, the
    /// connection is considered dead and is torn down.
    pub read_timeout: Duration,
    /// Initial connection timeout.
    pub connect_timeout: Duration,
}

impl StreamingConfig {
    /// Construct a streaming config with a 5 minute read timeout, matching
    /// the spec's heart-beat cadence with generous slack.
    pub fn new(base_url: Url) -> Self {
        StreamingConfig {
            base_url,
            filter: None,
            headers: Vec::new(),
            read_timeout: Duration::from_secs(5 * 60),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Opens SSE connections to the streaming endpoint.
pub struct StreamingSubscriber {
    client: Client,
    config: StreamingConfig,
}

impl StreamingSubscriber {
    /// Build a subscriber from an existing [`reqwest::Client`] and a
    /// [`StreamingConfig`].
    pub fn new(client: Client, config: StreamingConfig) -> Self {
        StreamingSubscriber { client, config }
    }

    /// Open one streaming connection and return a stream of decoded
    /// [`WireEvent`]s. The stream ends (`None`) when the server closes the
    /// connection cleanly; it yields `Err` on network errors, malformed SSE
    /// framing, or a read timeout, any of which the caller should treat as a
    /// signal to reconnect (with backoff).
    pub async fn connect(
        &self,
    ) -> Result<impl Stream<Item = Result<WireEvent, Error>> + Send, Error> {
        let mut request = self
            .client
            .get(self.config.base_url.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .timeout(self.config.connect_timeout);
        if let Some(filter) = &self.config.filter {
            request = request.query(&[("filter", filter.as_str())]);
        }
        for (name, value) in &self.config.headers {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(target: LOG_TARGET, %status, "stream connect rejected");
            return Err(Error::ErrorResponse {
                status: status.as_u16(),
            });
        }
        tracing::debug!(target: LOG_TARGET, "stream connected");

        let byte_stream = response.bytes_stream();
        let read_timeout = self.config.read_timeout;
        let state = StreamState {
            bytes: Box::pin(byte_stream),
            buffer: SseBuffer::new(),
            pending: VecDeque::new(),
        };

        Ok(stream::unfold(state, move |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Some((Ok(event), state));
                }
                let next = tokio::time::timeout(read_timeout, state.bytes.next()).await;
                match next {
                    Err(_) => {
                        tracing::warn!(target: LOG_TARGET, "stream read timed out");
                        return Some((
                            Err(Error::InvalidData("stream read timed out".to_string())),
                            state,
                        ));
                    }
                    Ok(None) => return None,
                    Ok(Some(Err(e))) => return Some((Err(Error::from(e)), state)),
                    Ok(Some(Ok(chunk))) => match state.buffer.push(&chunk) {
                        Ok(events) => {
                            state.pending.extend(events);
                            continue;
                        }
                        Err(e) => return Some((Err(e), state)),
                    },
                }
            }
        }))
    }
}

struct StreamState {
    bytes: std::pin::Pin<
        Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>,
    >,
    buffer: SseBuffer,
    pending: VecDeque<WireEvent>,
}

/// Accumulates raw bytes into complete SSE frames and decodes each into a
/// [`WireEvent`].
struct SseBuffer {
    text: String,
}

impl SseBuffer {
    fn new() -> Self {
        SseBuffer {
            text: String::new(),
        }
    }

    /// Feed a chunk of bytes, returning any complete events it produced
    /// (a chunk may contain zero, one, or several frames).
    fn push(&mut self, chunk: &[u8]) -> Result<Vec<WireEvent>, Error> {
        self.text.push_str(&String::from_utf8_lossy(chunk));
        let mut events = Vec::new();
        while let Some(index) = self.text.find("\n\n") {
            let frame = self.text[..index].to_string();
            self.text.drain(..index + 2);
            if let Some(event) = parse_frame(&frame)? {
                events.push(event);
            }
        }
        Ok(events)
    }
}

fn parse_frame(frame: &str) -> Result<Option<WireEvent>, Error> {
    let mut name: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in frame.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("event:") {
            name = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
        // id:/retry: fields carry no meaning for this protocol and are skipped.
    }

    let Some(name) = name else {
        if !data_lines.is_empty() {
            tracing::warn!(target: LOG_TARGET, "sse frame with data but no event name, skipping");
        }
        return Ok(None);
    };

    let data = if data_lines.is_empty() {
        serde_json::Value::Null
    } else {
        let joined = data_lines.join("\n");
        serde_json::from_str(&joined).map_err(|e| {
            let preview: String = joined.chars().take(200).collect();
            tracing::warn!(target: LOG_TARGET, error = %e, data = %preview, "malformed sse event data");
            Error::InvalidData(format!("malformed sse event data: {e}"))
        })?
    };

    Ok(Some(WireEvent { name, data }))
}
