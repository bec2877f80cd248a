//! Convergent: Immutable Interaction Queues with Convergent Execution
//!
//! Test authors describe UI interactions and assertions as immutable,
//! composable instances. Nothing runs until an instance is executed; then
//! every queued assertion is polled until it converges or its share of the
//! budget runs out.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   CONVERGENT Architecture                       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌────────────┐    ┌────────────┐            │
//! │   │ Interactor │    │ Executor   │    │ Poll Loop  │            │
//! │   │ (builder)  │───►│ (frames,   │───►│ (10ms      │            │
//! │   │ Meta+Patch │    │  units)    │    │  cadence)  │            │
//! │   └────────────┘    └────────────┘    └────────────┘            │
//! │         │                 │                  │                  │
//! │         ▼                 ▼                  ▼                  │
//! │   ┌────────────┐    ┌────────────┐    ┌────────────┐            │
//! │   │ Scoped     │    │ Stats      │    │ Converge   │            │
//! │   │ (chaining) │    │ (per run)  │    │ Error      │            │
//! │   └────────────┘    └────────────┘    └────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use convergent::prelude::*;
//! use std::time::Duration;
//!
//! # async fn demo() -> ConvergeResult<()> {
//! let stats = Convergence::new()
//!     .timeout(Duration::from_millis(100))
//!     .when(|_| true)
//!     .always_for(Duration::from_millis(30), |_| true)
//!     .execute()
//!     .await?;
//! assert_eq!(stats.sub_stats.len(), 2);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

#[allow(clippy::missing_errors_doc, clippy::must_use_candidate)]
mod config;
mod format;
#[allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]
mod meta;
mod result;
mod scope;
#[allow(clippy::missing_errors_doc, clippy::type_complexity)]
mod step;
mod stats;

/// Convergence primitive: polls one predicate until it converges
#[allow(clippy::missing_errors_doc)]
pub mod poll;

/// Queue executor: runs an instance's steps in authored order
#[allow(clippy::missing_errors_doc)]
pub mod executor;

#[allow(
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use
)]
mod interactor;
mod scoped;

pub use config::{
    ConvergeConfig, ALWAYS_DIVISOR, DEFAULT_INTERVAL_MS, DEFAULT_RELIABILITY, DEFAULT_TIMEOUT_MS,
    MIN_ALWAYS_MS,
};
pub use format::{DefaultFormatter, ErrorFormatter, NOT_PLACEHOLDER, SCOPE_PLACEHOLDER};
pub use interactor::{Convergence, Interactor};
pub use meta::{AssertPatch, AssertState, Family, Meta, Patch};
pub use result::{ConvergeError, ConvergeResult, ErrorKind};
pub use scope::{Scope, ScopeResolver};
pub use scoped::Scoped;
pub use stats::Stats;
pub use step::{
    AssertionStep, CallbackStep, CatchStep, IntoOutcome, IntoVerdict, Mode, Outcome, Step,
    StepContext, StepKind, Verdict, DEFAULT_ASSERTION_MESSAGE,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::config::*;
    pub use super::format::*;
    pub use super::interactor::*;
    pub use super::meta::*;
    pub use super::result::*;
    pub use super::scope::*;
    pub use super::scoped::*;
    pub use super::stats::*;
    pub use super::step::*;
    pub use tokio_util::sync::CancellationToken;
}
