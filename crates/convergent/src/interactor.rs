//! Authoring surface.
//!
//! A concrete family is any type that owns a [`Meta`] and implements
//! [`Interactor`]. Every builder method returns a new instance of the same
//! family; the receiver is never touched.
//!
//! ```no_run
//! use convergent::prelude::*;
//! use std::time::Duration;
//!
//! # async fn demo() -> ConvergeResult<()> {
//! let ready = Convergence::new()
//!     .timeout(Duration::from_millis(500))
//!     .when(|_| true)
//!     .perform(|_| serde_json::json!("clicked"));
//! let clicked = ready.await?;
//! assert_eq!(clicked, "clicked");
//! # Ok(())
//! # }
//! ```

use futures::future::BoxFuture;
use serde_json::Value;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::ConvergeConfig;
use crate::executor;
use crate::format::ErrorFormatter;
use crate::meta::{AssertPatch, Family, Meta, Patch};
use crate::result::{ConvergeError, ConvergeResult};
use crate::scope::Scope;
use crate::scoped::Scoped;
use crate::stats::Stats;
use crate::step::{
    AssertionStep, CallbackStep, CatchStep, IntoOutcome, IntoVerdict, Mode, Step, StepContext,
};

/// An immutable, queued description of future interactions and assertions
pub trait Interactor: Clone + Send + Sync + 'static {
    /// Metadata of this instance
    fn meta(&self) -> &Meta;

    /// Wrap metadata produced by a builder call
    fn from_meta(meta: Meta) -> Self;

    // =========================================================================
    // CONSTRUCTION
    // =========================================================================

    /// Fresh instance of this family scoped to `scope`
    #[must_use]
    fn scoped(scope: impl Into<Scope>) -> Self {
        Self::from_meta(Meta::new(Family::of::<Self>()).with_scope(scope))
    }

    /// Adopt `meta`, failing if it belongs to another family
    fn try_from_meta(meta: Meta) -> ConvergeResult<Self> {
        meta.ensure_family::<Self>()?;
        Ok(Self::from_meta(meta))
    }

    /// Merge `patch` into a copy of this instance
    #[must_use]
    fn with_patch(&self, patch: Patch) -> Self {
        Self::from_meta(self.meta().merge(patch))
    }

    // =========================================================================
    // CONFIGURATION
    // =========================================================================

    /// Set the total budget
    #[must_use]
    fn timeout(&self, timeout: Duration) -> Self {
        self.with_patch(Patch::new().timeout(timeout))
    }

    /// Current total budget
    fn timeout_duration(&self) -> Duration {
        self.meta().timeout()
    }

    /// Set the poll cadence
    #[must_use]
    fn interval(&self, interval: Duration) -> Self {
        self.with_patch(Patch {
            interval: Some(interval),
            ..Patch::default()
        })
    }

    /// Require `reliability` consecutive passing ticks per convergence
    #[must_use]
    fn reliability(&self, reliability: u32) -> Self {
        self.with_patch(Patch {
            reliability: Some(reliability),
            ..Patch::default()
        })
    }

    /// Abort execution when `token` is cancelled
    #[must_use]
    fn abort_on(&self, token: CancellationToken) -> Self {
        self.with_patch(Patch {
            signal: Some(token),
            ..Patch::default()
        })
    }

    /// Render failure messages with `formatter`
    #[must_use]
    fn formatter(&self, formatter: impl ErrorFormatter + 'static) -> Self {
        self.with_patch(Patch {
            formatter: Some(Arc::new(formatter)),
            ..Patch::default()
        })
    }

    /// Set an auxiliary state entry
    #[must_use]
    fn with_state(&self, key: impl Into<String>, value: Value) -> Self {
        self.with_patch(Patch::new().state(key, value))
    }

    /// Auxiliary state entry
    fn state(&self, key: &str) -> Option<&Value> {
        self.meta().state(key)
    }

    // =========================================================================
    // EXPECTATION STATE
    // =========================================================================

    /// Negate subsequent assertions; calling it again restores them
    #[must_use]
    fn not(&self) -> Self {
        self.with_patch(Patch::new().assert(AssertPatch {
            expected: Some(!self.meta().assert_state().expected()),
            ..AssertPatch::default()
        }))
    }

    /// Failure template for subsequent assertions (`{scope}`, `{not}`)
    #[must_use]
    fn message(&self, template: impl Into<String>) -> Self {
        self.with_patch(Patch::new().assert(AssertPatch {
            message_format: Some(template.into()),
            ..AssertPatch::default()
        }))
    }

    /// Subsequent [`when`](Self::when) assertions must hold for `window`
    #[must_use]
    fn remains(&self, window: Duration) -> Self {
        self.with_patch(Patch::new().assert(AssertPatch {
            remains: Some(Some(window)),
            ..AssertPatch::default()
        }))
    }

    // =========================================================================
    // STEPS
    // =========================================================================

    /// Queue an assertion that must pass once before the deadline
    #[must_use]
    fn when<F, R>(&self, predicate: F) -> Self
    where
        F: Fn(&StepContext<'_>) -> R + Send + Sync + 'static,
        R: IntoVerdict,
    {
        let assert = self.meta().assert_state();
        let mode = assert
            .remains()
            .map_or(Mode::Once, |window| Mode::Continuous(Some(window)));
        self.push_assertion(mode, assert.message_format().map(str::to_string), predicate)
    }

    /// Queue an assertion that must keep passing for the default window
    #[must_use]
    fn always<F, R>(&self, predicate: F) -> Self
    where
        F: Fn(&StepContext<'_>) -> R + Send + Sync + 'static,
        R: IntoVerdict,
    {
        let message = self.meta().assert_state().message_format().map(str::to_string);
        self.push_assertion(Mode::Continuous(None), message, predicate)
    }

    /// Queue an assertion that must keep passing for `window`
    #[must_use]
    fn always_for<F, R>(&self, window: Duration, predicate: F) -> Self
    where
        F: Fn(&StepContext<'_>) -> R + Send + Sync + 'static,
        R: IntoVerdict,
    {
        let message = self.meta().assert_state().message_format().map(str::to_string);
        self.push_assertion(Mode::Continuous(Some(window)), message, predicate)
    }

    /// Register a named validation and queue it as an assertion
    #[must_use]
    fn validate<F, R>(
        &self,
        name: impl Into<String>,
        template: impl Into<String>,
        predicate: F,
    ) -> Self
    where
        F: Fn(&StepContext<'_>) -> R + Send + Sync + 'static,
        R: IntoVerdict,
    {
        let template = template.into();
        let mut validations = std::collections::BTreeMap::new();
        let _ = validations.insert(name.into(), template.clone());
        let registered = self.with_patch(Patch::new().assert(AssertPatch {
            validations,
            ..AssertPatch::default()
        }));
        let mode = self
            .meta()
            .assert_state()
            .remains()
            .map_or(Mode::Once, |window| Mode::Continuous(Some(window)));
        registered.push_assertion(mode, Some(template), predicate)
    }

    #[doc(hidden)]
    #[must_use]
    fn push_assertion<F, R>(&self, mode: Mode, message: Option<String>, predicate: F) -> Self
    where
        F: Fn(&StepContext<'_>) -> R + Send + Sync + 'static,
        R: IntoVerdict,
    {
        let step = AssertionStep::new(self.meta().snapshot(), predicate)
            .with_mode(mode)
            .with_expected(self.meta().assert_state().expected())
            .with_message(message);
        self.with_patch(Patch::new().step(Step::Assertion(step)))
    }

    /// Queue a callback run exactly once with the curried value
    #[must_use]
    fn perform<F, R>(&self, callback: F) -> Self
    where
        F: Fn(&StepContext<'_>) -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        let step = CallbackStep::new(self.meta().snapshot(), callback);
        self.with_patch(Patch::new().step(Step::Callback(step)))
    }

    /// Queue a handler for failures of earlier steps
    #[must_use]
    fn catch<F, R>(&self, handler: F) -> Self
    where
        F: Fn(&StepContext<'_>, ConvergeError) -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        let step = CatchStep::new(self.meta().snapshot(), handler);
        self.with_patch(Patch::new().step(Step::Catch(step)))
    }

    /// Queue every step of `other` after this instance's steps.
    ///
    /// Appended steps keep their own owners.
    #[must_use]
    fn append<O: Interactor>(&self, other: &O) -> Self {
        self.with_patch(Patch::new().steps(other.meta().queue().iter().cloned()))
    }

    // =========================================================================
    // COMPOSITION
    // =========================================================================

    /// Nest `child` under this instance
    fn nest<C: Interactor>(&self, child: C) -> Scoped<Self, C> {
        Scoped::new(self.clone(), child)
    }

    // =========================================================================
    // EXECUTION
    // =========================================================================

    /// Run the queue within this instance's budget
    fn execute(&self) -> BoxFuture<'static, ConvergeResult<Stats>> {
        self.execute_from(Value::Null)
    }

    /// Run the queue, currying `seed` into the first step
    fn execute_from(&self, seed: Value) -> BoxFuture<'static, ConvergeResult<Stats>> {
        let meta = self.meta().clone();
        Box::pin(async move { executor::execute_within(&meta, seed, meta.timeout()).await })
    }

    /// Run the queue and resolve to the last curried value
    fn resolve(&self) -> BoxFuture<'static, ConvergeResult<Value>> {
        let execution = self.execute();
        Box::pin(async move { execution.await.map(|stats| stats.value) })
    }
}

/// General-purpose family
#[derive(Clone, Debug)]
pub struct Convergence {
    meta: Meta,
}

impl Convergence {
    /// Unscoped instance with the default config
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ConvergeConfig::default())
    }

    /// Unscoped instance seeded from `config`
    #[must_use]
    pub fn with_config(config: ConvergeConfig) -> Self {
        Self {
            meta: Meta::with_config(Family::of::<Self>(), config),
        }
    }
}

impl Default for Convergence {
    fn default() -> Self {
        Self::new()
    }
}

impl Interactor for Convergence {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn from_meta(meta: Meta) -> Self {
        Self { meta }
    }
}

impl IntoFuture for Convergence {
    type Output = ConvergeResult<Value>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        self.resolve()
    }
}
