use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Scope {
    index: u64,
    min: u64,
    max: u64,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    scopes: Mutex<Vec<Scope>>,
}

/// Cooperative cancellation token carrying a stack of nested progress scopes.
///
/// Clones share state; the caller keeps one to cancel or poll progress
/// while the worker pushes and pops scopes around its enumeration loops.
#[derive(Debug, Clone, Default)]
pub struct Cancellable {
    inner: Arc<Inner>,
}

impl Cancellable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Opens a nested scope inside the current position.
    pub fn push(&self) {
        let mut scopes = self.inner.scopes.lock().unwrap_or_else(|e| e.into_inner());
        scopes.push(Scope {
            index: 0,
            min: 0,
            max: 0,
        });
    }

    /// Closes the innermost scope; the parent's fraction applies again.
    pub fn pop(&self) {
        let mut scopes = self.inner.scopes.lock().unwrap_or_else(|e| e.into_inner());
        scopes.pop();
    }

    /// Positions the innermost scope at `index` of `min..max`.
    pub fn set_total(&self, index: u64, min: u64, max: u64) {
        let mut scopes = self.inner.scopes.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(scope) = scopes.last_mut() {
            *scope = Scope { index, min, max };
        }
    }

    pub fn depth(&self) -> usize {
        self.inner
            .scopes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Overall completion in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        let scopes = self.inner.scopes.lock().unwrap_or_else(|e| e.into_inner());
        let mut lo = 0.0_f64;
        let mut span = 1.0_f64;
        for scope in scopes.iter() {
            if scope.max <= scope.min {
                continue;
            }
            let width = (scope.max - scope.min) as f64;
            let offset = scope.index.clamp(scope.min, scope.max) - scope.min;
            lo += span * offset as f64 / width;
            span /= width;
        }
        lo.clamp(0.0, 1.0)
    }
}
