//! Execution statistics.

use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::duration_ms;

/// Statistics for one execution, or one unit within it.
///
/// Created fresh by every execution and never stored on an instance.
#[derive(Debug, Clone)]
pub struct Stats {
    /// When the execution started
    pub start: Instant,
    /// When it settled
    pub end: Instant,
    /// Time between start and end
    pub elapsed: Duration,
    /// Budget it ran under
    pub timeout: Duration,
    /// Predicate and callback invocations made directly by this unit
    pub runs: u32,
    /// Last resolved value
    pub value: Value,
    /// Whether this was a "stays true" convergence
    pub always: bool,
    /// Stats of the units executed within this one
    pub sub_stats: Vec<Stats>,
}

impl Stats {
    /// Start measuring now
    #[must_use]
    pub fn begin(timeout: Duration, always: bool) -> Self {
        let start = Instant::now();
        Self {
            start,
            end: start,
            elapsed: Duration::ZERO,
            timeout,
            runs: 0,
            value: Value::Null,
            always,
            sub_stats: Vec::new(),
        }
    }

    /// Stop measuring, recording the final value
    #[must_use]
    pub fn finish(mut self, value: Value) -> Self {
        self.end = Instant::now();
        self.elapsed = self.end.duration_since(self.start);
        self.value = value;
        self
    }

    /// Fold a finished unit into this one
    pub fn record(&mut self, sub: Self) {
        self.sub_stats.push(sub);
    }

    /// Invocations made by this unit and every unit executed within it
    #[must_use]
    pub fn total_runs(&self) -> u32 {
        self.sub_stats
            .iter()
            .fold(self.runs, |total, sub| total.saturating_add(sub.total_runs()))
    }

    /// Budget left at this moment
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.start.elapsed())
    }

    /// Elapsed time in milliseconds
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        duration_ms(self.elapsed)
    }
}
