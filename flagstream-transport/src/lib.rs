// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or MIT.
// see LICENSE for license details.

//! Low level HTTP transport for the flagstream data plane: polling with
//! conditional caching, and server-sent-events streaming, both decoding the
//! same named-event wire format into [`model::ChangeSet`]s via [`codec::ProtocolCodec`].
//!
//! This crate knows nothing about storing the resulting data; it only
//! fetches bytes off the wire and turns them into typed change sets. See the
//! `flagstream` crate for the store, data source state machine, and
//! everything built on top of this transport.

mod backoff;
mod codec;
mod error;
mod model;
mod polling;
mod streaming;
mod wire;

pub use backoff::{thread_rng_jitter, BackoffConfig, ReconnectBackoff};
pub use codec::{CodecOutcome, ProtocolCodec};
pub use error::Error;
pub use model::{flag_kind, segment_kind, ChangeSet, Collection, CollectionItem, Intent, ItemDescriptor, Kind, Selector};
pub use polling::{PollingConfig, PollingRequester, PollingResponse};
pub use streaming::{StreamingConfig, StreamingSubscriber};
pub use wire::{DeleteObjectPayload, GoodbyePayload, PollingEnvelope, PutObjectPayload, ServerIntentPayload, WireEvent};
