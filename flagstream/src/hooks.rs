// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or MIT.
// see LICENSE for license details.

//! Ordered Before/After evaluation hooks.
//!
//! Hooks never cross a process boundary (unlike the store's
//! [`flagstream_transport::ItemDescriptor`]), so per-hook series data is kept
//! as `Box<dyn Any + Send>` rather than a serializable value.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::any::Any;
use std::sync::Arc;

const LOG_TARGET: &str = "flagstream::hooks";

/// Context passed to a hook describing the evaluation in progress.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    /// The flag key being evaluated.
    pub flag_key: String,
    /// A human-readable name for the calling method, for diagnostics.
    pub method: &'static str,
}

/// The result of an evaluation, passed to `after` stages.
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    /// Whether the evaluation completed without falling back to a default.
    pub succeeded: bool,
    /// A short reason string for the outcome, e.g. `"FLAG_NOT_FOUND"`.
    pub reason: &'static str,
}

/// Opaque per-hook state threaded from a hook's `before` stage to its
/// matching `after` stage for the same evaluation.
pub type SeriesData = Box<dyn Any + Send>;

/// A single evaluation lifecycle hook.
///
/// A stage that returns `Err` does not abort the evaluation or the other
/// hooks' stages: [`HookRunner`] logs the error (flag key, stage, hook name)
/// and moves on to the next hook, leaving this hook's series data slot as it
/// was before the failing stage ran.
#[async_trait]
pub trait Hook: Send + Sync {
    /// A name used in logs when this hook errors.
    fn name(&self) -> &str;

    /// Called before evaluation. The returned [`SeriesData`] (if any) is
    /// passed back to [`Hook::after`] for the same evaluation.
    async fn before(&self, context: &EvaluationContext) -> Result<Option<SeriesData>, String> {
        let _ = context;
        Ok(None)
    }

    /// Called after evaluation, with the [`SeriesData`] this hook's
    /// `before` returned for the same evaluation (`None` if `before`
    /// returned `None`, was not called, or errored).
    async fn after(
        &self,
        context: &EvaluationContext,
        outcome: &EvaluationOutcome,
        series_data: Option<SeriesData>,
    ) -> Result<(), String> {
        let _ = (context, outcome, series_data);
        Ok(())
    }
}

/// Runs the configured hooks' `before` and `after` stages around an
/// evaluation, in registration order for `before` and reverse order for
/// `after`, matching the nesting discipline of a middleware stack.
pub struct HookRunner {
    hooks: RwLock<Vec<Arc<dyn Hook>>>,
}

impl HookRunner {
    /// Construct a runner with no hooks registered.
    pub fn new() -> Self {
        HookRunner {
            hooks: RwLock::new(Vec::new()),
        }
    }

    /// Register a hook, appended after any already registered.
    pub fn add_hook(&self, hook: Arc<dyn Hook>) {
        self.hooks.write().push(hook);
    }

    /// Current number of registered hooks.
    pub fn hook_count(&self) -> usize {
        self.hooks.read().len()
    }

    /// Run every hook's `before` stage against `context`, in registration
    /// order. Returns each hook's series data, indexed the same way so
    /// [`HookRunner::run_after`] can pair them back up; a hook's own list
    /// snapshot is taken once up front so hooks added mid-run do not
    /// participate in this evaluation's `after` stage.
    pub async fn run_before(&self, context: &EvaluationContext) -> Vec<Option<SeriesData>> {
        let snapshot = self.hooks.read().clone();
        let mut series_data = Vec::with_capacity(snapshot.len());
        for hook in &snapshot {
            match hook.before(context).await {
                Ok(data) => series_data.push(data),
                Err(error) => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        flag_key = %context.flag_key,
                        stage = "before",
                        hook = hook.name(),
                        %error,
                        "hook stage errored"
                    );
                    series_data.push(None);
                }
            }
        }
        series_data
    }

    /// Run every hook's `after` stage against `context` and `outcome`, in
    /// reverse registration order, pairing each hook with the series data
    /// [`HookRunner::run_before`] collected for it. `series_data` must have
    /// come from the matching `run_before` call for the same snapshot of
    /// hooks; a mismatched length truncates to the shorter of the two
    /// rather than panicking.
    pub async fn run_after(
        &self,
        context: &EvaluationContext,
        outcome: &EvaluationOutcome,
        mut series_data: Vec<Option<SeriesData>>,
    ) {
        let snapshot = self.hooks.read().clone();
        let pairs = snapshot.len().min(series_data.len());
        for index in (0..pairs).rev() {
            let hook = &snapshot[index];
            let data = series_data[index].take();
            if let Err(error) = hook.after(context, outcome, data).await {
                tracing::warn!(
                    target: LOG_TARGET,
                    flag_key = %context.flag_key,
                    stage = "after",
                    hook = hook.name(),
                    %error,
                    "hook stage errored"
                );
            }
        }
    }
}

impl Default for HookRunner {
    fn default() -> Self {
        HookRunner::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct RecordingHook {
        name: String,
        order: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Hook for RecordingHook {
        fn name(&self) -> &str {
            &self.name
        }

        async fn before(&self, _context: &EvaluationContext) -> Result<Option<SeriesData>, String> {
            self.order.lock().unwrap().push(format!("before:{}", self.name));
            Ok(Some(Box::new(self.name.clone())))
        }

        async fn after(
            &self,
            _context: &EvaluationContext,
            _outcome: &EvaluationOutcome,
            series_data: Option<SeriesData>,
        ) -> Result<(), String> {
            let tag = series_data
                .and_then(|d| d.downcast::<String>().ok())
                .map(|s| *s)
                .unwrap_or_default();
            self.order
                .lock()
                .unwrap()
                .push(format!("after:{}:{}", self.name, tag));
            Ok(())
        }
    }

    #[tokio::test]
    async fn before_runs_in_order_after_runs_in_reverse() {
        let order = Arc::new(StdMutex::new(Vec::new()));
        let runner = HookRunner::new();
        runner.add_hook(Arc::new(RecordingHook {
            name: "a".to_string(),
            order: Arc::clone(&order),
        }));
        runner.add_hook(Arc::new(RecordingHook {
            name: "b".to_string(),
            order: Arc::clone(&order),
        }));

        let context = EvaluationContext {
            flag_key: "flag".to_string(),
            method: "bool_variation",
        };
        let series = runner.run_before(&context).await;
        let outcome = EvaluationOutcome {
            succeeded: true,
            reason: "TARGET_MATCH",
        };
        runner.run_after(&context, &outcome, series).await;

        let recorded = order.lock().unwrap().clone();
        assert_eq!(
            recorded,
            vec!["before:a", "before:b", "after:b:b", "after:a:a"]
        );
    }

    #[tokio::test]
    async fn hook_added_after_before_snapshot_is_excluded_from_after() {
        let runner = HookRunner::new();
        let count = Arc::new(AtomicUsize::new(0));

        struct CountingHook(Arc<AtomicUsize>);
        #[async_trait]
        impl Hook for CountingHook {
            fn name(&self) -> &str {
                "counting"
            }
            async fn after(
                &self,
                _context: &EvaluationContext,
                _outcome: &EvaluationOutcome,
                _series_data: Option<SeriesData>,
            ) -> Result<(), String> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let context = EvaluationContext {
            flag_key: "flag".to_string(),
            method: "bool_variation",
        };
        let series = runner.run_before(&context).await;
        runner.add_hook(Arc::new(CountingHook(Arc::clone(&count))));
        let outcome = EvaluationOutcome {
            succeeded: true,
            reason: "TARGET_MATCH",
        };
        runner.run_after(&context, &outcome, series).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    struct FailingHook;

    #[async_trait]
    impl Hook for FailingHook {
        fn name(&self) -> &str {
            "failing"
        }

        async fn before(&self, _context: &EvaluationContext) -> Result<Option<SeriesData>, String> {
            Err("boom".to_string())
        }

        async fn after(
            &self,
            _context: &EvaluationContext,
            _outcome: &EvaluationOutcome,
            _series_data: Option<SeriesData>,
        ) -> Result<(), String> {
            Err("boom".to_string())
        }
    }

    #[tokio::test]
    async fn a_failing_hook_stage_does_not_stop_other_hooks_from_running() {
        let order = Arc::new(StdMutex::new(Vec::new()));
        let runner = HookRunner::new();
        runner.add_hook(Arc::new(FailingHook));
        runner.add_hook(Arc::new(RecordingHook {
            name: "b".to_string(),
            order: Arc::clone(&order),
        }));

        let context = EvaluationContext {
            flag_key: "flag".to_string(),
            method: "bool_variation",
        };
        let series = runner.run_before(&context).await;
        // The failing hook's before errored, so its slot is `None`; the
        // other hook still ran and got its own series data.
        assert!(series[0].is_none());
        assert!(series[1].is_some());

        let outcome = EvaluationOutcome {
            succeeded: true,
            reason: "TARGET_MATCH",
        };
        runner.run_after(&context, &outcome, series).await;

        // `b`'s after stage still ran despite `failing`'s after erroring.
        let recorded = order.lock().unwrap().clone();
        assert_eq!(recorded, vec!["before:b", "after:b:b"]);
    }
}
