//! Queue and convergence executor.
//!
//! Drains an instance's queue in authored order:
//!
//! ```text
//! queue:  when(a) when(b) always(c) perform(f) catch(h)
//!         └────┬──────┘   └───┬───┘ └───┬────┘ └──┬───┘
//! units:   Converge(Once) Converge(Cont) Callback  Catch
//! ```
//!
//! Consecutive assertions with the same mode form one convergence unit whose
//! predicate is their short-circuiting conjunction. Callbacks run once. Catch
//! units are skipped unless an earlier unit fails.
//!
//! Nested instances returned from callbacks are not awaited recursively:
//! the executor suspends the current frame, pushes a frame for the nested
//! queue with the remaining budget, and resumes the parent once it settles.

use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use crate::config::{duration_ms, ConvergeConfig};
use crate::meta::Meta;
use crate::poll::{check_signal, poll, PollMode, PollOptions};
use crate::result::{ConvergeError, ConvergeResult};
use crate::stats::Stats;
use crate::step::{AssertionStep, CallbackStep, CatchStep, Mode, Outcome, Step, Verdict};

/// One schedulable piece of a planned queue
#[derive(Debug, Clone)]
pub enum Unit {
    /// Assertions converging together
    Converge {
        /// Assertions, in authored order
        steps: Vec<AssertionStep>,
        /// Shared mode
        mode: Mode,
    },
    /// Runs once
    Callback(CallbackStep),
    /// Handles failures of earlier units
    Catch(CatchStep),
}

/// Group a queue into units.
///
/// A group closes at the first non-assertion step, at a change of mode, or
/// at the end of the queue.
#[must_use]
pub fn plan(queue: &[Step]) -> Vec<Unit> {
    let mut units: Vec<Unit> = Vec::new();
    for step in queue {
        match step {
            Step::Assertion(assertion) => match units.last_mut() {
                Some(Unit::Converge { steps, mode }) if *mode == assertion.mode() => {
                    steps.push(assertion.clone());
                }
                _ => units.push(Unit::Converge {
                    steps: vec![assertion.clone()],
                    mode: assertion.mode(),
                }),
            },
            Step::Callback(callback) => units.push(Unit::Callback(callback.clone())),
            Step::Catch(catch) => units.push(Unit::Catch(catch.clone())),
        }
    }
    units
}

/// Evaluate a group once: each assertion sees the value produced by the one
/// before it, and the first failure short-circuits
fn check_group(steps: &[AssertionStep], seed: &Value) -> ConvergeResult<Verdict> {
    let mut value = seed.clone();
    for step in steps {
        value = step.check(&value)?;
    }
    Ok(Verdict::Pass(value))
}

/// Signal a frame watches: its own, the enclosing frame's, or a token that
/// fires when either does
fn watch(
    own: Option<&CancellationToken>,
    inherited: Option<CancellationToken>,
) -> (Option<CancellationToken>, Option<DropGuard>) {
    match (own, inherited) {
        (Some(own), Some(outer)) => {
            let either = outer.child_token();
            if own.is_cancelled() {
                either.cancel();
            } else {
                let own = own.clone();
                let linked = either.clone();
                drop(tokio::spawn(async move {
                    tokio::select! {
                        () = own.cancelled() => linked.cancel(),
                        () = linked.cancelled() => {}
                    }
                }));
            }
            (Some(either.clone()), Some(either.drop_guard()))
        }
        (own, inherited) => (own.cloned().or(inherited), None),
    }
}

enum Transition {
    /// Run the unit under the cursor
    Advance,
    /// Interpret a callback or catch result
    Dispatch(ConvergeResult<Outcome>),
    /// Suspend the current frame and run a nested queue
    Enter(Box<Frame>),
    /// The current frame settled
    Leave(ConvergeResult<Stats>),
}

/// Execution state of one queue
struct Frame {
    id: uuid::Uuid,
    units: Vec<Unit>,
    cursor: usize,
    value: Value,
    stats: Stats,
    config: ConvergeConfig,
    signal: Option<CancellationToken>,
    /// Cancels the relay linking two signals once the frame is dropped
    _relay: Option<DropGuard>,
}

impl Frame {
    fn new(
        meta: &Meta,
        seed: Value,
        timeout: Duration,
        inherited: Option<CancellationToken>,
    ) -> Self {
        let (signal, relay) = watch(meta.signal(), inherited);
        Self {
            id: meta.id(),
            units: plan(meta.queue()),
            cursor: 0,
            value: seed,
            stats: Stats::begin(timeout, false),
            config: *meta.config(),
            signal,
            _relay: relay,
        }
    }

    /// Convergence window for the unit under the cursor
    fn window(&self, mode: Mode) -> Duration {
        let remaining = self.stats.remaining();
        match mode {
            Mode::Once => remaining,
            Mode::Continuous(Some(window)) => window.min(remaining),
            Mode::Continuous(None) if self.cursor + 1 == self.units.len() => remaining,
            Mode::Continuous(None) => self
                .config
                .default_always_window(self.stats.timeout)
                .min(remaining),
        }
    }

    async fn advance(&mut self) -> Transition {
        if let Err(error) = check_signal(self.signal.as_ref()) {
            return self.recover(error);
        }
        let Some(unit) = self.units.get(self.cursor).cloned() else {
            let stats = std::mem::replace(&mut self.stats, Stats::begin(Duration::ZERO, false));
            return Transition::Leave(Ok(stats.finish(self.value.clone())));
        };

        match unit {
            Unit::Converge { steps, mode } => {
                let options = PollOptions::new(self.window(mode))
                    .with_mode(if mode.is_continuous() {
                        PollMode::Continuous
                    } else {
                        PollMode::Once
                    })
                    .with_interval(self.config.interval())
                    .with_reliability(self.config.reliability)
                    .with_signal(self.signal.clone());
                let seed = self.value.clone();
                self.cursor += 1;
                match poll(|| check_group(&steps, &seed), &options).await {
                    Ok(sub) => {
                        debug!(
                            id = %self.id,
                            assertions = steps.len(),
                            runs = sub.runs,
                            elapsed_ms = sub.elapsed_ms(),
                            always = sub.always,
                            "convergence resolved"
                        );
                        self.value = sub.value.clone();
                        self.stats.record(sub);
                        Transition::Advance
                    }
                    Err(error) => self.recover(error),
                }
            }
            Unit::Callback(callback) => {
                self.cursor += 1;
                self.stats.runs += 1;
                Transition::Dispatch(callback.invoke(&self.value))
            }
            Unit::Catch(_) => {
                self.cursor += 1;
                Transition::Advance
            }
        }
    }

    async fn dispatch(&mut self, result: ConvergeResult<Outcome>) -> Transition {
        match result {
            Ok(Outcome::Value(value)) => {
                self.value = value;
                Transition::Advance
            }
            Ok(Outcome::Deferred(future)) => {
                let settled = match &self.signal {
                    Some(token) => tokio::select! {
                        () = token.cancelled() => Err(ConvergeError::AbortedByCaller),
                        settled = future => settled,
                    },
                    None => future.await,
                };
                Transition::Dispatch(settled)
            }
            Ok(Outcome::Nested(meta)) if meta.queue().is_empty() => Transition::Advance,
            Ok(Outcome::Nested(meta)) => {
                let remaining = self.stats.remaining();
                debug!(
                    id = %self.id,
                    nested = %meta.id(),
                    remaining_ms = duration_ms(remaining),
                    "entering nested queue"
                );
                Transition::Enter(Box::new(Self::new(
                    &meta,
                    self.value.clone(),
                    remaining,
                    self.signal.clone(),
                )))
            }
            Err(error) => self.recover(error),
        }
    }

    /// Fold a settled nested frame back into this one
    fn absorb(&mut self, result: ConvergeResult<Stats>) -> Transition {
        match result {
            Ok(sub) => {
                self.value = sub.value.clone();
                self.stats.record(sub);
                Transition::Advance
            }
            Err(error) => self.recover(error),
        }
    }

    /// Hand `error` to the next catch unit, or settle the frame with it
    fn recover(&mut self, error: ConvergeError) -> Transition {
        let found = self
            .units
            .iter()
            .enumerate()
            .skip(self.cursor)
            .find_map(|(index, unit)| match unit {
                Unit::Catch(catch) => Some((index, catch.clone())),
                _ => None,
            });
        match found {
            Some((index, catch)) => {
                self.cursor = index + 1;
                self.stats.runs += 1;
                Transition::Dispatch(catch.handle(&self.value, error))
            }
            None => Transition::Leave(Err(error)),
        }
    }
}

/// Execute `meta`'s queue with its own budget, starting from a null value
pub async fn execute(meta: &Meta) -> ConvergeResult<Stats> {
    execute_within(meta, Value::Null, meta.timeout()).await
}

/// Execute `meta`'s queue under `timeout`, currying `seed` into the first step
pub async fn execute_within(meta: &Meta, seed: Value, timeout: Duration) -> ConvergeResult<Stats> {
    debug!(
        id = %meta.id(),
        steps = meta.queue().len(),
        timeout_ms = duration_ms(timeout),
        "execution started"
    );
    let mut frame = Frame::new(meta, seed, timeout, None);
    let mut suspended: Vec<Frame> = Vec::new();
    let mut next = Transition::Advance;

    loop {
        next = match next {
            Transition::Advance => frame.advance().await,
            Transition::Dispatch(result) => frame.dispatch(result).await,
            Transition::Enter(child) => {
                suspended.push(std::mem::replace(&mut frame, *child));
                Transition::Advance
            }
            Transition::Leave(result) => match suspended.pop() {
                Some(parent) => {
                    frame = parent;
                    frame.absorb(result)
                }
                None => {
                    match &result {
                        Ok(stats) => debug!(
                            id = %meta.id(),
                            runs = stats.total_runs(),
                            elapsed_ms = stats.elapsed_ms(),
                            "execution finished"
                        ),
                        Err(error) => debug!(id = %meta.id(), %error, "execution failed"),
                    }
                    return result;
                }
            },
        };
    }
}
