//! Online query scope
//!
//! While an [`OnlineGuard`] is alive on the current thread,
//! [`DataFrame::query`](crate::DataFrame::query) and
//! [`DataFrame::apply`](crate::DataFrame::apply) run on the innermost
//! [`SearchBackend`] instead of iterating local rows. Scopes nest; dropping
//! a guard restores the previous mode. Guards are not `Send`, so a scope
//! never leaks to another thread.

use crate::criteria::Criteria;
use portex_core::{Result, Value};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

/// Remote sheet a query runs against
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchTarget {
    /// Dataset name
    pub dataset: String,
    /// Commit the sheet was read at
    pub commit_id: String,
    /// Sheet name
    pub sheet: String,
}

/// Search collaborator executing criteria on the server.
pub trait SearchBackend: Send + Sync {
    /// Rows of `target` matching `criteria` (all rows when `None`), in row order.
    fn search(&self, target: &SearchTarget, criteria: Option<&Criteria>) -> Result<Vec<Value>>;
}

thread_local! {
    static BACKENDS: RefCell<Vec<Arc<dyn SearchBackend>>> = const { RefCell::new(Vec::new()) };
}

/// Scope guard for online mode; leaving scope pops the backend.
#[must_use = "online mode ends when the guard is dropped"]
pub struct OnlineGuard {
    _not_send: PhantomData<*const ()>,
}

impl Drop for OnlineGuard {
    fn drop(&mut self) {
        BACKENDS.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Enter online mode on the current thread.
pub fn enter(backend: Arc<dyn SearchBackend>) -> OnlineGuard {
    BACKENDS.with(|stack| stack.borrow_mut().push(backend));
    OnlineGuard {
        _not_send: PhantomData,
    }
}

/// Run `f` in online mode.
pub fn online<T>(backend: Arc<dyn SearchBackend>, f: impl FnOnce() -> T) -> T {
    let _guard = enter(backend);
    f()
}

/// True inside an online scope.
pub fn is_online() -> bool {
    BACKENDS.with(|stack| !stack.borrow().is_empty())
}

pub(crate) fn current() -> Option<Arc<dyn SearchBackend>> {
    BACKENDS.with(|stack| stack.borrow().last().cloned())
}
