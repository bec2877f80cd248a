//! Queue steps.
//!
//! A [`Step`] is one queued unit of work: an assertion polled until it
//! converges, a callback run once, or a catch handler. Each step carries the
//! metadata of the instance it was queued on (its owner), which supplies the
//! scope and failure-message context when it runs.

use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::interactor::Interactor;
use crate::meta::Meta;
use crate::result::{ConvergeError, ConvergeResult};

/// Template used when an assertion fails without a message of its own
pub const DEFAULT_ASSERTION_MESSAGE: &str = "expected {scope} {not}to satisfy the assertion";

/// Shared predicate function
pub type PredicateFn = Arc<dyn Fn(&StepContext<'_>) -> ConvergeResult<Verdict> + Send + Sync>;

/// Shared callback function
pub type CallbackFn = Arc<dyn Fn(&StepContext<'_>) -> ConvergeResult<Outcome> + Send + Sync>;

/// Shared catch handler
pub type CatchFn =
    Arc<dyn Fn(&StepContext<'_>, ConvergeError) -> ConvergeResult<Outcome> + Send + Sync>;

// =============================================================================
// CONTEXT
// =============================================================================

/// What a step function sees when it runs
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    owner: &'a Meta,
    value: &'a Value,
}

impl<'a> StepContext<'a> {
    /// Create a context
    #[must_use]
    pub const fn new(owner: &'a Meta, value: &'a Value) -> Self {
        Self { owner, value }
    }

    /// Metadata of the instance the step was queued on
    #[must_use]
    pub const fn owner(&self) -> &'a Meta {
        self.owner
    }

    /// Value curried from the previous step
    #[must_use]
    pub const fn value(&self) -> &'a Value {
        self.value
    }

    /// Owner's scope
    #[must_use]
    pub const fn scope(&self) -> &'a crate::scope::Scope {
        self.owner.scope()
    }

    /// Owner's auxiliary state entry
    #[must_use]
    pub fn state(&self, key: &str) -> Option<&'a Value> {
        self.owner.state(key)
    }
}

// =============================================================================
// VERDICT
// =============================================================================

/// What a predicate said on one tick
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Passed, producing a value (`Value::Null` when there is none)
    Pass(Value),
    /// Returned a literal `false`
    False,
    /// Returned a deferred value; predicates must be synchronous
    Deferred,
}

/// Conversion of predicate return values
pub trait IntoVerdict {
    /// Convert into a verdict, or the failure the predicate raised
    fn into_verdict(self) -> ConvergeResult<Verdict>;
}

impl IntoVerdict for Verdict {
    fn into_verdict(self) -> ConvergeResult<Verdict> {
        Ok(self)
    }
}

impl IntoVerdict for bool {
    fn into_verdict(self) -> ConvergeResult<Verdict> {
        Ok(if self {
            Verdict::Pass(Value::Bool(true))
        } else {
            Verdict::False
        })
    }
}

impl IntoVerdict for () {
    fn into_verdict(self) -> ConvergeResult<Verdict> {
        Ok(Verdict::Pass(Value::Null))
    }
}

impl IntoVerdict for Value {
    fn into_verdict(self) -> ConvergeResult<Verdict> {
        Ok(match self {
            Self::Bool(false) => Verdict::False,
            other => Verdict::Pass(other),
        })
    }
}

impl<T> IntoVerdict for BoxFuture<'_, T> {
    fn into_verdict(self) -> ConvergeResult<Verdict> {
        Ok(Verdict::Deferred)
    }
}

impl<T, E> IntoVerdict for Result<T, E>
where
    T: IntoVerdict,
    E: Into<ConvergeError>,
{
    fn into_verdict(self) -> ConvergeResult<Verdict> {
        self.map_err(Into::into).and_then(IntoVerdict::into_verdict)
    }
}

// =============================================================================
// OUTCOME
// =============================================================================

/// What a callback or catch handler produced
pub enum Outcome {
    /// A plain value, curried into the next step
    Value(Value),
    /// An instance whose queue runs to completion within the remaining budget
    Nested(Box<Meta>),
    /// A value that settles later
    Deferred(BoxFuture<'static, ConvergeResult<Outcome>>),
}

impl Outcome {
    /// Run `instance`'s queue in place of a plain value
    #[must_use]
    pub fn nested<I: Interactor>(instance: &I) -> Self {
        Self::Nested(Box::new(instance.meta().clone()))
    }

    /// Suspend until `future` settles
    pub fn deferred<F, R>(future: F) -> Self
    where
        F: Future<Output = R> + Send + 'static,
        R: IntoOutcome,
    {
        Self::Deferred(Box::pin(async move { future.await.into_outcome() }))
    }
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Nested(meta) => f
                .debug_tuple("Nested")
                .field(&meta.queue().len())
                .finish(),
            Self::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

/// Conversion of callback return values
pub trait IntoOutcome {
    /// Convert into an outcome, or the failure the callback raised
    fn into_outcome(self) -> ConvergeResult<Outcome>;
}

impl IntoOutcome for Outcome {
    fn into_outcome(self) -> ConvergeResult<Outcome> {
        Ok(self)
    }
}

impl IntoOutcome for () {
    fn into_outcome(self) -> ConvergeResult<Outcome> {
        Ok(Outcome::Value(Value::Null))
    }
}

impl IntoOutcome for Value {
    fn into_outcome(self) -> ConvergeResult<Outcome> {
        Ok(Outcome::Value(self))
    }
}

impl<T, E> IntoOutcome for Result<T, E>
where
    T: IntoOutcome,
    E: Into<ConvergeError>,
{
    fn into_outcome(self) -> ConvergeResult<Outcome> {
        self.map_err(Into::into).and_then(IntoOutcome::into_outcome)
    }
}

// =============================================================================
// STEPS
// =============================================================================

/// How an assertion converges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Pass once before the deadline
    #[default]
    Once,
    /// Keep passing for a window; `None` picks the default window
    Continuous(Option<Duration>),
}

impl Mode {
    /// Whether this is a "stays true" assertion
    #[must_use]
    pub const fn is_continuous(&self) -> bool {
        matches!(self, Self::Continuous(_))
    }
}

/// Predicate polled until it converges
#[derive(Clone)]
pub struct AssertionStep {
    predicate: PredicateFn,
    owner: Arc<Meta>,
    mode: Mode,
    expected: bool,
    message: Option<String>,
}

impl AssertionStep {
    /// Create an assertion owned by `owner`
    pub fn new<F, R>(owner: Arc<Meta>, predicate: F) -> Self
    where
        F: Fn(&StepContext<'_>) -> R + Send + Sync + 'static,
        R: IntoVerdict,
    {
        Self {
            predicate: Arc::new(move |ctx: &StepContext<'_>| predicate(ctx).into_verdict()),
            owner,
            mode: Mode::Once,
            expected: true,
            message: None,
        }
    }

    /// Set the convergence mode
    #[must_use]
    pub const fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Set whether the predicate is expected to pass
    #[must_use]
    pub const fn with_expected(mut self, expected: bool) -> Self {
        self.expected = expected;
        self
    }

    /// Set the failure message template
    #[must_use]
    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }

    /// Convergence mode
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// False for negated assertions
    #[must_use]
    pub const fn expected(&self) -> bool {
        self.expected
    }

    /// Evaluate once against the curried value.
    ///
    /// Negated assertions pass when the predicate fails and fail when it
    /// passes; a passing negation hands the input value on unchanged. Fatal
    /// errors and deferred results are never inverted.
    pub fn check(&self, value: &Value) -> ConvergeResult<Value> {
        let owner = self.owner.as_ref();
        let ctx = StepContext::new(owner, value);
        let template = self.message.as_deref().unwrap_or(DEFAULT_ASSERTION_MESSAGE);
        let formatter = owner.formatter();

        match (self.predicate)(&ctx) {
            Ok(Verdict::Deferred) => Err(ConvergeError::usage(
                "predicate returned a deferred value; predicates must be synchronous",
            )),
            Err(error) if error.is_fatal() => Err(error),
            Ok(Verdict::Pass(value)) if self.expected => Ok(value),
            Ok(Verdict::False) if self.expected => {
                Err(ConvergeError::explicit_false(template).bind(owner, formatter, true))
            }
            Err(error) if self.expected => Err(error.bind(owner, formatter, true)),
            Ok(Verdict::Pass(_)) => {
                Err(ConvergeError::explicit_false(template).bind(owner, formatter, false))
            }
            Ok(Verdict::False) | Err(_) => Ok(value.clone()),
        }
    }
}

/// Function run exactly once
#[derive(Clone)]
pub struct CallbackStep {
    callback: CallbackFn,
    owner: Arc<Meta>,
}

impl CallbackStep {
    /// Create a callback owned by `owner`
    pub fn new<F, R>(owner: Arc<Meta>, callback: F) -> Self
    where
        F: Fn(&StepContext<'_>) -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        Self {
            callback: Arc::new(move |ctx: &StepContext<'_>| callback(ctx).into_outcome()),
            owner,
        }
    }

    /// Invoke with the curried value; failures are bound to the owner
    pub fn invoke(&self, value: &Value) -> ConvergeResult<Outcome> {
        let owner = self.owner.as_ref();
        (self.callback)(&StepContext::new(owner, value))
            .map_err(|error| error.bind(owner, owner.formatter(), true))
    }
}

/// Rejection handler for failures of earlier steps
#[derive(Clone)]
pub struct CatchStep {
    handler: CatchFn,
    owner: Arc<Meta>,
}

impl CatchStep {
    /// Create a handler owned by `owner`
    pub fn new<F, R>(owner: Arc<Meta>, handler: F) -> Self
    where
        F: Fn(&StepContext<'_>, ConvergeError) -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        Self {
            handler: Arc::new(move |ctx: &StepContext<'_>, error: ConvergeError| {
                handler(ctx, error).into_outcome()
            }),
            owner,
        }
    }

    /// Handle `error`; the error is bound to the owner first, and whatever
    /// the handler raises is bound to it too
    pub fn handle(&self, value: &Value, error: ConvergeError) -> ConvergeResult<Outcome> {
        let owner = self.owner.as_ref();
        let formatter = owner.formatter();
        let error = error.bind(owner, formatter, true);
        (self.handler)(&StepContext::new(owner, value), error)
            .map_err(|error| error.bind(owner, formatter, true))
    }
}

/// Step discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    /// See [`Step::Assertion`]
    Assertion,
    /// See [`Step::Callback`]
    Callback,
    /// See [`Step::Catch`]
    Catch,
}

/// One queued unit of work
#[derive(Clone)]
pub enum Step {
    /// Predicate polled until it converges
    Assertion(AssertionStep),
    /// Function run exactly once
    Callback(CallbackStep),
    /// Handler for failures of earlier steps
    Catch(CatchStep),
}

impl Step {
    /// Step discriminant
    #[must_use]
    pub const fn kind(&self) -> StepKind {
        match self {
            Self::Assertion(_) => StepKind::Assertion,
            Self::Callback(_) => StepKind::Callback,
            Self::Catch(_) => StepKind::Catch,
        }
    }

    /// Metadata of the instance the step was queued on
    #[must_use]
    pub fn owner(&self) -> &Meta {
        match self {
            Self::Assertion(step) => &step.owner,
            Self::Callback(step) => &step.owner,
            Self::Catch(step) => &step.owner,
        }
    }

    /// Same step, owned by `owner`
    #[must_use]
    pub fn with_owner(&self, owner: Arc<Meta>) -> Self {
        match self {
            Self::Assertion(step) => Self::Assertion(AssertionStep {
                owner,
                ..step.clone()
            }),
            Self::Callback(step) => Self::Callback(CallbackStep {
                owner,
                ..step.clone()
            }),
            Self::Catch(step) => Self::Catch(CatchStep {
                owner,
                ..step.clone()
            }),
        }
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("Step");
        let _ = debug
            .field("kind", &self.kind())
            .field("owner", &self.owner().describe());
        if let Self::Assertion(step) = self {
            let _ = debug
                .field("mode", &step.mode)
                .field("expected", &step.expected);
        }
        debug.finish()
    }
}

impl std::fmt::Debug for AssertionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssertionStep")
            .field("mode", &self.mode())
            .field("expected", &self.expected())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for CallbackStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackStep").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for CatchStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatchStep").finish_non_exhaustive()
    }
}
