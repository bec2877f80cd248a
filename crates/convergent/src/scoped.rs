//! Chaining across scope boundaries.
//!
//! A [`Scoped`] pairs a parent instance with a child bound under it, so one
//! fluent chain can step into a child scope and come back out:
//!
//! ```text
//! list.item("li")            Scoped<TodoList, TodoItem>
//!     .chain(|i| i.toggle())  -> TodoList, one step appended
//! ```
//!
//! Wrapped calls run against an orphaned copy of the child, so they never
//! see the parent. Steps they queue are re-owned by the bound child before
//! being appended to the parent, which keeps failure messages describing
//! the full ancestry.

use std::sync::Arc;

use crate::interactor::Interactor;
use crate::meta::Patch;
use crate::step::Step;

/// A child instance bound under a parent instance
#[derive(Debug, Clone)]
pub struct Scoped<P, C> {
    parent: P,
    child: C,
}

impl<P: Interactor, C: Interactor> Scoped<P, C> {
    /// Bind `child` under `parent`
    #[must_use]
    pub fn new(parent: P, child: C) -> Self {
        let child = C::from_meta(child.meta().rebound(parent.meta()));
        Self { parent, child }
    }

    /// The parent instance
    #[must_use]
    pub const fn parent(&self) -> &P {
        &self.parent
    }

    /// The child instance, bound under the parent
    #[must_use]
    pub const fn child(&self) -> &C {
        &self.child
    }

    /// Run a self-returning call on the child and hand control back to the
    /// parent.
    ///
    /// The child's whole queue, including steps it held before it was bound,
    /// is appended to the parent's queue; the parent is returned. Steps owned by the child are re-owned under the parent so
    /// their messages read e.g. `"li" within "ul"`.
    #[must_use]
    pub fn chain<F>(&self, f: F) -> P
    where
        F: FnOnce(C) -> C,
    {
        let bound = self.child.meta();
        let raw = f(C::from_meta(bound.orphaned()));
        let parent_link = bound.parent_link().cloned();
        let steps = raw.meta().queue().iter().map(|step| {
            let owner = step.owner();
            if owner.id() == bound.id() && owner.is_top() {
                step.with_owner(Arc::new(owner.with_parent_link(parent_link.clone())))
            } else {
                step.clone()
            }
        });
        self.parent.with_patch(Patch::new().steps(steps.collect::<Vec<Step>>()))
    }

    /// Re-attach a hierarchy built by a factory on the child under the
    /// bound child
    #[must_use]
    pub fn nest<G, F>(&self, f: F) -> Scoped<C, G>
    where
        G: Interactor,
        F: FnOnce(&C) -> G,
    {
        let raw = f(&C::from_meta(self.child.meta().orphaned()));
        Scoped::new(self.child.clone(), raw)
    }

    /// Call an accessor on the child without exposing the parent
    pub fn read<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&C) -> T,
    {
        f(&C::from_meta(self.child.meta().orphaned()))
    }

    /// Leave the parent behind and stay inside the child scope
    #[must_use]
    pub fn unscoped(&self) -> C {
        C::from_meta(self.child.meta().orphaned())
    }

    /// Split into parent and bound child
    #[must_use]
    pub fn into_parts(self) -> (P, C) {
        (self.parent, self.child)
    }
}
