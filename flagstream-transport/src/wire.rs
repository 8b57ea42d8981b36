// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or MIT.
// see LICENSE for license details.

//! JSON shapes exchanged with the origin service, for both the polling and
//! streaming transports. See the wire protocol description in the data plane
//! specification: a polling document is a `{"events": [...]}` envelope whose
//! events have exactly the same `name`/`data` shape as the SSE events streamed
//! over the long-lived connection.

use serde::Deserialize;
use serde_json::Value;

/// The body of a successful (non-304) polling response.
#[derive(Debug, Deserialize)]
pub struct PollingEnvelope {
    /// The ordered list of protocol events carried by this poll.
    pub events: Vec<WireEvent>,
}

/// A single named protocol event, as seen both inline in a [`PollingEnvelope`]
/// and as an individual SSE frame on the streaming connection.
#[derive(Debug, Clone, Deserialize)]
pub struct WireEvent {
    /// The event name (`server-intent`, `put-object`, `delete-object`,
    /// `payload-transferred`, `heart-beat`, `goodbye`, or `error`).
    pub name: String,
    /// The event's JSON payload, interpreted according to `name`.
    pub data: Value,
}

/// Payload of a `server-intent` event.
#[derive(Debug, Deserialize)]
pub struct ServerIntentPayload {
    /// One or more intent declarations; the first is authoritative.
    pub payloads: Vec<IntentCode>,
}

/// A single intent code entry inside a `server-intent` payload.
#[derive(Debug, Deserialize)]
pub struct IntentCode {
    /// The raw wire intent code (`"xfer-full"`, `"xfer-changes"`, or `"none"`).
    #[serde(rename = "intentCode")]
    pub intent_code: String,
}

/// Payload of a `put-object` event.
#[derive(Debug, Deserialize)]
pub struct PutObjectPayload {
    /// The version this upsert was observed at.
    pub version: i64,
    /// The item's kind (`flag`, `segment`, ...).
    pub kind: String,
    /// The item's key within its kind.
    pub key: String,
    /// The item's payload.
    pub object: Value,
}

/// Payload of a `delete-object` event.
#[derive(Debug, Deserialize)]
pub struct DeleteObjectPayload {
    /// The version this tombstone was observed at.
    pub version: i64,
    /// The item's kind (`flag`, `segment`, ...).
    pub kind: String,
    /// The item's key within its kind.
    pub key: String,
}

/// Payload of a `goodbye` event.
#[derive(Debug, Default, Deserialize)]
pub struct GoodbyePayload {
    /// Server-supplied human-readable reason for the disconnect, if any.
    #[serde(default)]
    pub reason: Option<String>,
    /// Whether the caller should suppress surfacing this as a visible error.
    #[serde(default)]
    pub silent: bool,
    /// Whether the server considers this disconnect unrecoverable: retrying
    /// will not help, so the data source should stop rather than reconnect.
    #[serde(default)]
    pub catastrophe: bool,
}
