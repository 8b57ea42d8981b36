// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or MIT.
// see LICENSE for license details.

//! Parses the named event stream (shared by the polling and streaming
//! transports) into [`ChangeSet`]s.
//!
//! [`ProtocolCodec`] is a small state machine: `server-intent` starts a new
//! change set, `put-object`/`delete-object` accumulate items into it, and
//! `payload-transferred` terminates it with a selector. `heart-beat` and
//! unknown event names are no-ops (forward compatibility); malformed JSON in
//! any event aborts whatever was accumulating.

use crate::model::{ChangeSet, Collection, CollectionItem, Intent, ItemDescriptor, Kind, Selector};
use crate::wire::{
    DeleteObjectPayload, GoodbyePayload, PutObjectPayload, ServerIntentPayload, WireEvent,
};
use crate::Error;
use std::collections::HashMap;
use std::sync::Arc;

const LOG_TARGET: &str = "flagstream-protocol-codec";

/// What happened as a result of feeding one [`WireEvent`] to the codec.
#[derive(Debug)]
pub enum CodecOutcome {
    /// The event was consumed but did not complete a change set (e.g. a
    /// `put-object` accumulating into an in-progress transfer, or a
    /// `heart-beat`).
    Pending,
    /// A `payload-transferred` event completed the accumulating change set.
    Complete(ChangeSet),
    /// The server sent `goodbye`; the connection should be closed. The caller
    /// decides whether to reconnect based on the payload's flags.
    Goodbye(GoodbyePayload),
}

/// Accumulates a sequence of named protocol events into [`ChangeSet`]s.
///
/// One codec instance is owned by a single data source's background task and
/// fed events in order; it is not `Send`-shared across concurrent streams.
#[derive(Debug, Default)]
pub struct ProtocolCodec {
    state: Option<Accumulator>,
}

#[derive(Debug)]
struct Accumulator {
    intent: Intent,
    // kind -> key -> descriptor, preserving first-seen kind order for output.
    kinds_seen: Vec<Kind>,
    items: HashMap<Kind, HashMap<Arc<str>, ItemDescriptor>>,
}

impl Accumulator {
    fn new(intent: Intent) -> Self {
        Accumulator {
            intent,
            kinds_seen: Vec::new(),
            items: HashMap::new(),
        }
    }

    fn upsert(&mut self, kind: Kind, key: Arc<str>, item: ItemDescriptor) {
        if !self.items.contains_key(&kind) {
            self.kinds_seen.push(kind.clone());
        }
        self.items.entry(kind).or_default().insert(key, item);
    }

    fn into_change_set(self, intent: Intent, selector: Selector) -> ChangeSet {
        let mut items = self.items;
        let collections = self
            .kinds_seen
            .into_iter()
            .map(|kind| {
                let by_key = items.remove(&kind).unwrap_or_default();
                let items = by_key
                    .into_iter()
                    .map(|(key, item)| CollectionItem { key, item })
                    .collect();
                Collection { kind, items }
            })
            .collect();
        ChangeSet {
            intent,
            collections,
            selector,
        }
    }
}

impl ProtocolCodec {
    /// Construct a fresh codec with no change set in progress.
    pub fn new() -> Self {
        ProtocolCodec::default()
    }

    /// Discard any change set currently accumulating. Called when a
    /// connection is torn down so the next one starts clean.
    pub fn reset(&mut self) {
        self.state = None;
    }

    /// Feed one named event to the codec.
    ///
    /// Returns `Err` (and resets the accumulator) on malformed JSON in any
    /// event's `data` field, or on an explicit `error` event. Unknown event
    /// names and unknown kinds inside `put-object`/`delete-object` are logged
    /// and skipped, not treated as errors.
    pub fn handle_event(&mut self, event: &WireEvent) -> Result<CodecOutcome, Error> {
        match event.name.as_str() {
            "server-intent" => self.handle_server_intent(event),
            "put-object" => self.handle_put_object(event),
            "delete-object" => self.handle_delete_object(event),
            "payload-transferred" => self.handle_payload_transferred(event),
            "heart-beat" => Ok(CodecOutcome::Pending),
            "goodbye" => self.handle_goodbye(event),
            "error" => {
                let message = event
                    .data
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("server reported a stream error")
                    .to_string();
                self.state = None;
                Err(Error::InvalidData(message))
            }
            other => {
                tracing::warn!(target: LOG_TARGET, event = other, "unknown event name, skipping");
                Ok(CodecOutcome::Pending)
            }
        }
    }

    fn handle_server_intent(&mut self, event: &WireEvent) -> Result<CodecOutcome, Error> {
        let payload: ServerIntentPayload = serde_json::from_value(event.data.clone())
            .map_err(|e| Error::InvalidData(format!("malformed server-intent: {e}")))?;
        let code = payload
            .payloads
            .first()
            .map(|p| p.intent_code.as_str())
            .unwrap_or("none");
        let intent = Intent::from_wire(code)
            .ok_or_else(|| Error::InvalidData(format!("unknown intentCode: {code}")))?;

        // A new server-intent always discards whatever was accumulating:
        // the spec guarantees no partial data is ever applied, so a fresh
        // intent (even `none`) supersedes an in-progress transfer rather
        // than being merged with it.
        self.state = None;

        if intent == Intent::None {
            return Ok(CodecOutcome::Complete(ChangeSet::none()));
        }

        self.state = Some(Accumulator::new(intent));
        Ok(CodecOutcome::Pending)
    }

    fn handle_put_object(&mut self, event: &WireEvent) -> Result<CodecOutcome, Error> {
        let payload: PutObjectPayload = serde_json::from_value(event.data.clone())
            .map_err(|e| self.abort(format!("malformed put-object: {e}")))?;
        let Some(acc) = self.state.as_mut() else {
            tracing::warn!(target: LOG_TARGET, "put-object with no server-intent in progress, skipping");
            return Ok(CodecOutcome::Pending);
        };
        acc.upsert(
            Kind::new(payload.kind),
            Arc::from(payload.key),
            ItemDescriptor::present(payload.version, payload.object),
        );
        Ok(CodecOutcome::Pending)
    }

    fn handle_delete_object(&mut self, event: &WireEvent) -> Result<CodecOutcome, Error> {
        let payload: DeleteObjectPayload = serde_json::from_value(event.data.clone())
            .map_err(|e| self.abort(format!("malformed delete-object: {e}")))?;
        let Some(acc) = self.state.as_mut() else {
            tracing::warn!(target: LOG_TARGET, "delete-object with no server-intent in progress, skipping");
            return Ok(CodecOutcome::Pending);
        };
        acc.upsert(
            Kind::new(payload.kind),
            Arc::from(payload.key),
            ItemDescriptor::tombstone(payload.version),
        );
        Ok(CodecOutcome::Pending)
    }

    fn handle_payload_transferred(&mut self, event: &WireEvent) -> Result<CodecOutcome, Error> {
        let Some(acc) = self.state.take() else {
            tracing::warn!(
                target: LOG_TARGET,
                "payload-transferred with no server-intent in progress, ignoring"
            );
            return Ok(CodecOutcome::Pending);
        };
        let selector = Selector(Some(event.data.clone()));
        let intent = acc.intent;
        Ok(CodecOutcome::Complete(acc.into_change_set(intent, selector)))
    }

    fn handle_goodbye(&mut self, event: &WireEvent) -> Result<CodecOutcome, Error> {
        let payload: GoodbyePayload = serde_json::from_value(event.data.clone())
            .unwrap_or_default();
        self.state = None;
        Ok(CodecOutcome::Goodbye(payload))
    }

    /// Abort the in-progress change set and return an `InvalidData` error
    /// carrying `message`.
    fn abort(&mut self, message: String) -> Error {
        self.state = None;
        Error::InvalidData(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(name: &str, data: serde_json::Value) -> WireEvent {
        WireEvent {
            name: name.to_string(),
            data,
        }
    }

    #[test]
    fn full_transfer_round_trip() {
        let mut codec = ProtocolCodec::new();
        assert!(matches!(
            codec
                .handle_event(&event(
                    "server-intent",
                    json!({"payloads": [{"intentCode": "xfer-full"}]})
                ))
                .unwrap(),
            CodecOutcome::Pending
        ));
        codec
            .handle_event(&event(
                "put-object",
                json!({"version": 10, "kind": "flag", "key": "f", "object": {"on": true}}),
            ))
            .unwrap();
        let outcome = codec
            .handle_event(&event("payload-transferred", json!({"cursor": "abc"})))
            .unwrap();
        let CodecOutcome::Complete(cs) = outcome else {
            panic!("expected a completed change set");
        };
        assert_eq!(cs.intent, Intent::TransferFull);
        assert_eq!(cs.collections.len(), 1);
        assert_eq!(cs.collections[0].kind, flag_kind());
        assert_eq!(cs.collections[0].items[0].item.version, 10);
    }

    use crate::model::flag_kind;

    #[test]
    fn malformed_put_object_aborts_change_set() {
        let mut codec = ProtocolCodec::new();
        codec
            .handle_event(&event(
                "server-intent",
                json!({"payloads": [{"intentCode": "xfer-changes"}]}),
            ))
            .unwrap();
        codec
            .handle_event(&event(
                "put-object",
                json!({"version": 1, "kind": "flag", "key": "f", "object": {}}),
            ))
            .unwrap();
        let err = codec
            .handle_event(&event("put-object", json!({"version": "not-a-number"})))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
        // The accumulator was reset: a subsequent payload-transferred finds nothing in progress.
        let outcome = codec
            .handle_event(&event("payload-transferred", json!({})))
            .unwrap();
        assert!(matches!(outcome, CodecOutcome::Pending));
    }

    #[test]
    fn server_intent_none_yields_empty_change_set() {
        let mut codec = ProtocolCodec::new();
        let outcome = codec
            .handle_event(&event(
                "server-intent",
                json!({"payloads": [{"intentCode": "none"}]}),
            ))
            .unwrap();
        let CodecOutcome::Complete(cs) = outcome else {
            panic!("expected an immediate empty change set");
        };
        assert_eq!(cs.intent, Intent::None);
        assert!(cs.collections.is_empty());
    }

    #[test]
    fn server_intent_none_mid_stream_discards_partial_accumulation() {
        let mut codec = ProtocolCodec::new();
        codec
            .handle_event(&event(
                "server-intent",
                json!({"payloads": [{"intentCode": "xfer-full"}]}),
            ))
            .unwrap();
        codec
            .handle_event(&event(
                "put-object",
                json!({"version": 1, "kind": "flag", "key": "f", "object": {}}),
            ))
            .unwrap();
        let outcome = codec
            .handle_event(&event(
                "server-intent",
                json!({"payloads": [{"intentCode": "none"}]}),
            ))
            .unwrap();
        let CodecOutcome::Complete(cs) = outcome else {
            panic!("expected an immediate empty change set");
        };
        assert!(cs.collections.is_empty());
    }

    #[test]
    fn heart_beat_is_ignored() {
        let mut codec = ProtocolCodec::new();
        let outcome = codec.handle_event(&event("heart-beat", json!({}))).unwrap();
        assert!(matches!(outcome, CodecOutcome::Pending));
    }

    #[test]
    fn unknown_event_name_is_skipped_not_an_error() {
        let mut codec = ProtocolCodec::new();
        let outcome = codec
            .handle_event(&event("some-future-event", json!({"whatever": 1})))
            .unwrap();
        assert!(matches!(outcome, CodecOutcome::Pending));
    }

    #[test]
    fn explicit_error_event_invalidates_accumulation() {
        let mut codec = ProtocolCodec::new();
        codec
            .handle_event(&event(
                "server-intent",
                json!({"payloads": [{"intentCode": "xfer-changes"}]}),
            ))
            .unwrap();
        let err = codec
            .handle_event(&event("error", json!({"message": "internal error"})))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn goodbye_resets_accumulation_and_reports_flags() {
        let mut codec = ProtocolCodec::new();
        codec
            .handle_event(&event(
                "server-intent",
                json!({"payloads": [{"intentCode": "xfer-full"}]}),
            ))
            .unwrap();
        let outcome = codec
            .handle_event(&event(
                "goodbye",
                json!({"reason": "restart", "silent": false, "catastrophe": true}),
            ))
            .unwrap();
        let CodecOutcome::Goodbye(payload) = outcome else {
            panic!("expected a goodbye outcome");
        };
        assert!(payload.catastrophe);
        assert!(!payload.silent);
    }
}
