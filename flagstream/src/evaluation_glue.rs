// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or MIT.
// see LICENSE for license details.

//! Adapts [`MemoryStore`], [`BigSegmentManager`], and [`HookRunner`] onto the
//! read interfaces an external flag evaluation algorithm needs.
//!
//! The algorithm itself — prerequisite walks, clause matching, rollout
//! bucketing — is not this crate's concern; an `Evaluator` built on top reads
//! flag/segment data through [`DataProvider`], resolves big segment rules
//! through [`BigSegmentProvider`], and is expected to run its evaluation
//! logic through [`EvaluationGlue::evaluate`] so the configured hooks observe
//! every call the same way regardless of which provider methods it used.

use crate::big_segments::{BigSegmentManager, Membership, MembershipStatus};
use crate::hooks::{EvaluationContext, EvaluationOutcome, HookRunner};
use crate::store::MemoryStore;
use async_trait::async_trait;
use flagstream_transport::{flag_kind, segment_kind, ItemDescriptor};
use std::future::Future;
use std::sync::Arc;

/// Read-only flag/segment lookups an external evaluation algorithm needs.
pub trait DataProvider: Send + Sync {
    /// Look up a feature flag by key.
    fn get_feature_flag(&self, key: &str) -> Option<ItemDescriptor>;
    /// Look up a segment by key.
    fn get_segment(&self, key: &str) -> Option<ItemDescriptor>;
}

impl DataProvider for MemoryStore {
    fn get_feature_flag(&self, key: &str) -> Option<ItemDescriptor> {
        self.get(&flag_kind(), key)
    }

    fn get_segment(&self, key: &str) -> Option<ItemDescriptor> {
        self.get(&segment_kind(), key)
    }
}

/// Big-segment membership lookups an external evaluation algorithm needs.
#[async_trait]
pub trait BigSegmentProvider: Send + Sync {
    /// Resolve membership for a context key, with the same cache/single-flight
    /// behavior as [`BigSegmentManager::get_membership`].
    async fn get_membership(&self, context_key: &str) -> (Option<Arc<Membership>>, MembershipStatus);
}

#[async_trait]
impl BigSegmentProvider for BigSegmentManager {
    async fn get_membership(&self, context_key: &str) -> (Option<Arc<Membership>>, MembershipStatus) {
        self.get_membership(context_key).await
    }
}

/// Bundles this crate's three owned components behind the shapes an external
/// evaluation algorithm consumes, and runs that algorithm's hook-observable
/// calls through the configured [`HookRunner`].
///
/// Big segment support is optional: a `Config` with no `BigSegmentsConfig`
/// produces an `EvaluationGlue` with `big_segments: None`, and
/// [`EvaluationGlue::big_segments`] returns `None` so a caller can fall back
/// to treating every segment reference as unknown.
pub struct EvaluationGlue {
    store: Arc<MemoryStore>,
    big_segments: Option<Arc<BigSegmentManager>>,
    hooks: Arc<HookRunner>,
    hooks_enabled: bool,
}

impl EvaluationGlue {
    /// Wire together the store, an optional big segment manager, and the
    /// hook runner an `Evaluator` should use. `hooks_enabled` should be taken
    /// from [`crate::config::HooksConfig::enabled`]; when `false`,
    /// [`Self::evaluate`] runs the supplied closure without invoking any
    /// hook stage.
    pub fn new(
        store: Arc<MemoryStore>,
        big_segments: Option<Arc<BigSegmentManager>>,
        hooks: Arc<HookRunner>,
        hooks_enabled: bool,
    ) -> Self {
        EvaluationGlue {
            store,
            big_segments,
            hooks,
            hooks_enabled,
        }
    }

    /// The flag/segment data provider.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// The big segment membership provider, if big segments are configured.
    pub fn big_segments(&self) -> Option<&Arc<BigSegmentManager>> {
        self.big_segments.as_ref()
    }

    /// The hook runner driving before/after stages around evaluations.
    pub fn hooks(&self) -> &Arc<HookRunner> {
        &self.hooks
    }

    /// Run `evaluate` wrapped in the configured hooks' before/after stages:
    /// `before` runs for every registered hook, then `evaluate`, then
    /// `after` runs for every hook that ran `before`, paired with its own
    /// series data. A hook stage error is isolated by [`HookRunner`] and
    /// never reaches `evaluate` or the caller. If this glue was constructed
    /// with `hooks_enabled: false`, neither stage runs at all.
    pub async fn evaluate<F, Fut>(&self, context: EvaluationContext, evaluate: F) -> EvaluationOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EvaluationOutcome>,
    {
        if !self.hooks_enabled {
            return evaluate().await;
        }
        let series_data = self.hooks.run_before(&context).await;
        let outcome = evaluate().await;
        self.hooks.run_after(&context, &outcome, series_data).await;
        outcome
    }
}
