// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or MIT.
// see LICENSE for license details.

//! Reconnect backoff for the streaming and polling transports.
//!
//! Unlike a plain exponential backoff iterator, this tracks how long the
//! previous connection attempt stayed up: a connection that ran cleanly for
//! longer than `reset_after` is treated as healthy, and the next failure
//! starts again from `initial_delay` instead of continuing to climb.

use std::time::Duration;

/// Backoff policy: initial delay, growth factor, ceiling, and the
/// clean-connection window after which the delay resets.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound on the computed delay, before jitter.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each consecutive failure.
    pub multiplier: f64,
    /// Fraction of the computed delay randomized away, in both directions.
    pub jitter_ratio: f64,
    /// A connection that stays up at least this long resets the backoff.
    pub reset_after: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_ratio: 0.5,
            reset_after: Duration::from_secs(60),
        }
    }
}

/// Stateful reconnect backoff. One instance is owned by a single streaming or
/// polling data source and carried across reconnect attempts.
#[derive(Debug)]
pub struct ReconnectBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ReconnectBackoff {
    /// Build a backoff in its initial (no failures yet) state.
    pub fn new(config: BackoffConfig) -> Self {
        ReconnectBackoff { config, attempt: 0 }
    }

    /// Compute the delay before the next attempt and advance the internal
    /// failure counter. Jitter is applied by the caller-supplied `jitter`
    /// closure, which receives `(low, high)` bounds and should return a value
    /// in that range (kept as a parameter so callers can inject a seeded RNG
    /// in tests; production callers pass [`rand::random_range`]-backed
    /// closures).
    pub fn next_delay(&mut self, jitter: impl FnOnce(Duration, Duration) -> Duration) -> Duration {
        let unjittered = self.unjittered_delay();
        self.attempt = self.attempt.saturating_add(1);
        let spread = unjittered.mul_f64(self.config.jitter_ratio);
        let low = unjittered.saturating_sub(spread);
        let high = unjittered.saturating_add(spread);
        if low >= high {
            unjittered
        } else {
            jitter(low, high)
        }
    }

    fn unjittered_delay(&self) -> Duration {
        let factor = self.config.multiplier.powi(self.attempt as i32);
        let scaled = self.config.initial_delay.mul_f64(factor);
        scaled.min(self.config.max_delay)
    }

    /// Record that a connection attempt succeeded and stayed up for
    /// `uptime`. Resets the failure counter if `uptime >= reset_after`.
    pub fn record_uptime(&mut self, uptime: Duration) {
        if uptime >= self.config.reset_after {
            self.attempt = 0;
        }
    }

    /// Reset the backoff to its initial state immediately, e.g. when the
    /// caller is told to stop retrying and later restarts fresh.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Draw a jittered duration uniformly from `[low, high]` using [`rand`].
/// The default jitter function passed to [`ReconnectBackoff::next_delay`] in
/// non-test code.
pub fn thread_rng_jitter(low: Duration, high: Duration) -> Duration {
    if low >= high {
        return low;
    }
    use rand::Rng;
    let low_nanos = low.as_nanos() as u64;
    let high_nanos = high.as_nanos() as u64;
    let picked = rand::thread_rng().gen_range(low_nanos..=high_nanos);
    Duration::from_nanos(picked)
}
