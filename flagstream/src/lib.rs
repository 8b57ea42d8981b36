// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or MIT.
// see LICENSE for license details.

//! The in-process data plane for a feature flag evaluation client: keeps a
//! [`store::MemoryStore`] of flags and segments in sync with an origin
//! service (by [`data_source::PollingDataSource`] or
//! [`data_source::StreamingDataSource`]), resolves big segment membership
//! via [`big_segments::BigSegmentManager`], and runs evaluation lifecycle
//! hooks through [`hooks::HookRunner`].
//!
//! Evaluating a flag against this data (target matching, rollouts,
//! prerequisites) is out of scope for this crate; it is the concern of an
//! `Evaluator` built on top, which reads through
//! [`evaluation_glue::EvaluationGlue`]'s [`evaluation_glue::DataProvider`]
//! and [`evaluation_glue::BigSegmentProvider`] and runs its evaluation calls
//! through [`evaluation_glue::EvaluationGlue::evaluate`] so the configured
//! hooks observe them.

pub mod big_segments;
pub mod broadcaster;
pub mod config;
pub mod data_source;
mod error;
pub mod evaluation_glue;
pub mod hooks;
pub mod lru_cache;
pub mod single_flight;
pub mod store;

pub use crate::error::Error;

pub use big_segments::{
    BigSegmentManager, BigSegmentStore, BigSegmentStoreStatus, Membership, MembershipStatus,
    SegmentMatch,
};
pub use broadcaster::{Broadcaster, Subscription};
pub use config::Config;
pub use data_source::{
    DataSource, DataSourceStatus, ErrorInfo, ErrorKind, PollingDataSource, StreamingDataSource,
};
pub use evaluation_glue::{BigSegmentProvider, DataProvider, EvaluationGlue};
pub use hooks::{EvaluationContext, EvaluationOutcome, Hook, HookRunner};
pub use lru_cache::LruCache;
pub use single_flight::SingleFlight;
pub use store::MemoryStore;

pub use flagstream_transport as transport;
