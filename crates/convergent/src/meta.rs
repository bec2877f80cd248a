//! Metadata Store and Builder
//!
//! Every instance carries one immutable [`Meta`]. Builder calls never touch
//! it: they describe a [`Patch`] and [`Meta::merge`] produces a fresh copy.
//!
//! Merge rules:
//! - queues concatenate (previous ++ new)
//! - map-valued fields shallow-merge, new keys override
//! - scalar fields are replaced
//!
//! The parent link and `is_top` are not patchable; they change only when an
//! instance is nested under another (see [`crate::Scoped`]).

use serde_json::Value;
use std::any::TypeId;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{duration_ms, ConvergeConfig};
use crate::format::{DefaultFormatter, ErrorFormatter};
use crate::result::{ConvergeError, ConvergeResult};
use crate::scope::Scope;
use crate::step::Step;

static DEFAULT_FORMATTER: DefaultFormatter = DefaultFormatter;

// =============================================================================
// FAMILY
// =============================================================================

/// Type identity of the concrete instance type metadata belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Family {
    id: TypeId,
    name: &'static str,
}

impl Family {
    /// Family of `T`
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Whether this is the family of `T`
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }

    /// Type name, for diagnostics
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

// =============================================================================
// ASSERTION STATE
// =============================================================================

/// Expectation state applied to assertions as they are queued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertState {
    expected: bool,
    message_format: Option<String>,
    remains: Option<Duration>,
    validations: BTreeMap<String, String>,
}

impl Default for AssertState {
    fn default() -> Self {
        Self {
            expected: true,
            message_format: None,
            remains: None,
            validations: BTreeMap::new(),
        }
    }
}

impl AssertState {
    /// False while assertions are negated
    #[must_use]
    pub const fn expected(&self) -> bool {
        self.expected
    }

    /// Template used for failures of newly queued assertions
    #[must_use]
    pub fn message_format(&self) -> Option<&str> {
        self.message_format.as_deref()
    }

    /// When set, newly queued `when` assertions must hold for this long
    #[must_use]
    pub const fn remains(&self) -> Option<Duration> {
        self.remains
    }

    /// Named validations and their message templates
    #[must_use]
    pub const fn validations(&self) -> &BTreeMap<String, String> {
        &self.validations
    }

    fn merged(&self, patch: AssertPatch) -> Self {
        let mut validations = self.validations.clone();
        validations.extend(patch.validations);
        Self {
            expected: patch.expected.unwrap_or(self.expected),
            message_format: patch.message_format.or_else(|| self.message_format.clone()),
            remains: patch.remains.unwrap_or(self.remains),
            validations,
        }
    }
}

/// Delta for [`AssertState`]
#[derive(Debug, Clone, Default)]
pub struct AssertPatch {
    /// Replace the expectation
    pub expected: Option<bool>,
    /// Replace the message template
    pub message_format: Option<String>,
    /// Replace the `remains` window (`Some(None)` clears it)
    pub remains: Option<Option<Duration>>,
    /// Validations merged over the existing ones
    pub validations: BTreeMap<String, String>,
}

// =============================================================================
// PATCH
// =============================================================================

/// A delta merged into a previous instance's metadata
#[derive(Clone, Default)]
pub struct Patch {
    /// Replace the scope
    pub scope: Option<Scope>,
    /// Replace the total budget
    pub timeout: Option<Duration>,
    /// Replace the poll cadence
    pub interval: Option<Duration>,
    /// Replace the reliability
    pub reliability: Option<u32>,
    /// Steps appended after the existing queue
    pub queue: Vec<Step>,
    /// Assertion state delta
    pub assert: AssertPatch,
    /// Auxiliary state merged over the existing entries
    pub state: BTreeMap<String, Value>,
    /// Replace the abort signal
    pub signal: Option<CancellationToken>,
    /// Replace the error formatter
    pub formatter: Option<Arc<dyn ErrorFormatter>>,
}

impl Patch {
    /// Create an empty patch
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the scope
    #[must_use]
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Replace the budget
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Append a step
    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.queue.push(step);
        self
    }

    /// Append several steps
    #[must_use]
    pub fn steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.queue.extend(steps);
        self
    }

    /// Set an auxiliary state entry
    #[must_use]
    pub fn state(mut self, key: impl Into<String>, value: Value) -> Self {
        let _ = self.state.insert(key.into(), value);
        self
    }

    /// Replace the assertion state delta
    #[must_use]
    pub fn assert(mut self, assert: AssertPatch) -> Self {
        self.assert = assert;
        self
    }
}

impl std::fmt::Debug for Patch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Patch")
            .field("scope", &self.scope)
            .field("timeout", &self.timeout)
            .field("queue_len", &self.queue.len())
            .field("assert", &self.assert)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// META
// =============================================================================

/// Immutable metadata attached to every instance
#[derive(Clone)]
pub struct Meta {
    family: Family,
    id: Uuid,
    scope: Scope,
    parent: Option<Arc<Meta>>,
    is_top: bool,
    config: ConvergeConfig,
    queue: Arc<[Step]>,
    assert: AssertState,
    state: BTreeMap<String, Value>,
    signal: Option<CancellationToken>,
    formatter: Option<Arc<dyn ErrorFormatter>>,
}

impl Meta {
    /// Fresh metadata for a family, seeded from the default config
    #[must_use]
    pub fn new(family: Family) -> Self {
        Self::with_config(family, ConvergeConfig::default())
    }

    /// Fresh metadata for a family, seeded from `config`
    #[must_use]
    pub fn with_config(family: Family, config: ConvergeConfig) -> Self {
        Self {
            family,
            id: Uuid::new_v4(),
            scope: Scope::Root,
            parent: None,
            is_top: true,
            config,
            queue: Arc::from(Vec::new()),
            assert: AssertState::default(),
            state: BTreeMap::new(),
            signal: None,
            formatter: None,
        }
    }

    /// Set the scope of freshly constructed metadata
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<Scope>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Merge a delta into a copy of this metadata
    #[must_use]
    pub fn merge(&self, patch: Patch) -> Self {
        let mut next = self.clone();
        if let Some(scope) = patch.scope {
            next.scope = scope;
        }
        if let Some(timeout) = patch.timeout {
            next.config.timeout_ms = duration_ms(timeout);
        }
        if let Some(interval) = patch.interval {
            next.config.interval_ms = duration_ms(interval).max(1);
        }
        if let Some(reliability) = patch.reliability {
            next.config.reliability = reliability.max(1);
        }
        if !patch.queue.is_empty() {
            next.queue = self.queue.iter().cloned().chain(patch.queue).collect();
        }
        next.assert = self.assert.merged(patch.assert);
        next.state.extend(patch.state);
        if patch.signal.is_some() {
            next.signal = patch.signal;
        }
        if patch.formatter.is_some() {
            next.formatter = patch.formatter;
        }
        next
    }

    /// Copy bound under `parent`
    #[must_use]
    pub fn rebound(&self, parent: &Self) -> Self {
        self.with_parent_link(Some(parent.snapshot()))
    }

    /// Copy with the parent link stripped
    #[must_use]
    pub fn orphaned(&self) -> Self {
        self.with_parent_link(None)
    }

    /// Queue-less copy, used wherever metadata is captured as an owner or
    /// ancestor
    #[must_use]
    pub fn snapshot(&self) -> Arc<Self> {
        let mut owner = self.clone();
        owner.queue = Arc::from(Vec::new());
        Arc::new(owner)
    }

    pub(crate) fn with_parent_link(&self, parent: Option<Arc<Self>>) -> Self {
        let mut next = self.clone();
        next.is_top = parent.is_none();
        next.parent = parent;
        next
    }

    /// Fail unless this metadata belongs to `T`
    pub fn ensure_family<T: 'static>(&self) -> ConvergeResult<()> {
        if self.family.is::<T>() {
            Ok(())
        } else {
            Err(ConvergeError::usage(format!(
                "metadata of {} cannot construct {}",
                self.family.name(),
                std::any::type_name::<T>()
            )))
        }
    }

    /// Describe the instance and its ancestry, e.g. `"li" within "ul"`
    #[must_use]
    pub fn describe(&self) -> String {
        let own = self.scope.describe();
        match &self.parent {
            Some(parent) if !self.is_top && !parent.scope.is_root() => {
                format!("{own} within {}", parent.describe())
            }
            _ => own,
        }
    }

    /// Family this metadata belongs to
    #[must_use]
    pub const fn family(&self) -> Family {
        self.family
    }

    /// Identity token, preserved across builder calls
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Scope descriptor
    #[must_use]
    pub const fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Parent metadata, if nested
    #[must_use]
    pub fn parent(&self) -> Option<&Self> {
        self.parent.as_deref()
    }

    pub(crate) const fn parent_link(&self) -> Option<&Arc<Self>> {
        self.parent.as_ref()
    }

    /// Number of ancestors
    #[must_use]
    pub fn depth(&self) -> usize {
        std::iter::successors(self.parent(), |meta| meta.parent()).count()
    }

    /// False once nested under another instance
    #[must_use]
    pub const fn is_top(&self) -> bool {
        self.is_top
    }

    /// Effective configuration
    #[must_use]
    pub const fn config(&self) -> &ConvergeConfig {
        &self.config
    }

    /// Total budget
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    /// Poll cadence
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.config.interval()
    }

    /// Consecutive passing ticks required
    #[must_use]
    pub fn reliability(&self) -> u32 {
        self.config.reliability.max(1)
    }

    /// Ordered step queue
    #[must_use]
    pub fn queue(&self) -> &[Step] {
        &self.queue
    }

    /// Assertion expectation state
    #[must_use]
    pub const fn assert_state(&self) -> &AssertState {
        &self.assert
    }

    /// Auxiliary state entry
    #[must_use]
    pub fn state(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// All auxiliary state
    #[must_use]
    pub const fn state_map(&self) -> &BTreeMap<String, Value> {
        &self.state
    }

    /// Abort signal, if any
    #[must_use]
    pub const fn signal(&self) -> Option<&CancellationToken> {
        self.signal.as_ref()
    }

    /// Formatter used for this instance's failure messages
    #[must_use]
    pub fn formatter(&self) -> &dyn ErrorFormatter {
        match &self.formatter {
            Some(formatter) => formatter.as_ref(),
            None => &DEFAULT_FORMATTER,
        }
    }
}

impl std::fmt::Debug for Meta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Meta")
            .field("family", &self.family.name())
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("parent", &self.parent.as_ref().map(|p| p.describe()))
            .field("is_top", &self.is_top)
            .field("config", &self.config)
            .field("queue", &self.queue)
            .field("assert", &self.assert)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
