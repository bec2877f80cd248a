//! Scope descriptors.
//!
//! A scope names the part of the page an instance acts on. The core never
//! resolves scopes itself; concrete predicates and callbacks do that through
//! a [`ScopeResolver`]. The core only uses a scope to describe an instance in
//! failure messages.

use serde::{Deserialize, Serialize};

use crate::meta::Meta;
use crate::result::ConvergeResult;

/// Scope an instance is bound to
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Scope {
    /// The whole page
    #[default]
    Root,
    /// CSS selector (e.g., "li.todo")
    Selector(String),
    /// Human label supplied by a concrete family
    Named(String),
}

impl Scope {
    /// Create a selector scope
    #[must_use]
    pub fn selector(selector: impl Into<String>) -> Self {
        Self::Selector(selector.into())
    }

    /// Create a named scope
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Whether this is the page root
    #[must_use]
    pub const fn is_root(&self) -> bool {
        matches!(self, Self::Root)
    }

    /// Selector text, if this scope has one
    #[must_use]
    pub fn as_selector(&self) -> Option<&str> {
        match self {
            Self::Selector(s) => Some(s),
            _ => None,
        }
    }

    /// Human-readable description used in failure messages
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Root => "document".to_string(),
            Self::Selector(s) => format!("{s:?}"),
            Self::Named(name) => name.clone(),
        }
    }
}

impl From<&str> for Scope {
    fn from(selector: &str) -> Self {
        Self::selector(selector)
    }
}

impl From<String> for Scope {
    fn from(selector: String) -> Self {
        Self::Selector(selector)
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Resolves an instance's scope against a page.
///
/// Implemented by whatever owns the page model. Only predicates and
/// callbacks call into it; the executor never does.
pub trait ScopeResolver {
    /// Resolved node type
    type Node;

    /// Resolve exactly one node for the instance, failing if none matches
    fn resolve_one(&self, meta: &Meta) -> ConvergeResult<Self::Node>;

    /// Resolve every node matching the instance
    fn resolve_all(&self, meta: &Meta) -> Vec<Self::Node>;
}
