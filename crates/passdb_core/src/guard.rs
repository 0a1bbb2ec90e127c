//! Single-writer enforcement.

use crate::error::{CoreError, CoreResult};
use std::sync::atomic::{AtomicBool, Ordering};

/// A non-reentrant "mutation in progress" flag.
///
/// Unlike a mutex, entering while the flag is set fails immediately
/// instead of blocking. That also catches a listener callback trying to
/// mutate the document that is notifying it.
#[derive(Debug, Default)]
pub struct MutationGuard {
    busy: AtomicBool,
}

impl MutationGuard {
    /// Creates an idle guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a mutation as started.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConcurrentMutation`] if one is already running.
    pub fn enter(&self) -> CoreResult<MutationToken<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| CoreError::ConcurrentMutation)?;
        Ok(MutationToken { guard: self })
    }

    /// Returns true while a mutation is running.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Proof that a mutation is running; releases the guard on drop.
#[must_use = "the guard is released as soon as the token is dropped"]
#[derive(Debug)]
pub struct MutationToken<'a> {
    guard: &'a MutationGuard,
}

impl Drop for MutationToken<'_> {
    fn drop(&mut self) {
        self.guard.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn second_enter_fails_fast() {
        let guard = MutationGuard::new();
        let token = guard.enter().unwrap();
        assert!(guard.is_busy());
        assert!(matches!(guard.enter(), Err(CoreError::ConcurrentMutation)));
        drop(token);
        assert!(!guard.is_busy());
        assert!(guard.enter().is_ok());
    }

    #[test]
    fn other_thread_sees_busy_guard() {
        let guard = Arc::new(MutationGuard::new());
        let _token = guard.enter().unwrap();
        let other = guard.clone();
        let result = std::thread::spawn(move || other.enter().map(|_| ()))
            .join()
            .unwrap();
        assert!(matches!(result, Err(CoreError::ConcurrentMutation)));
    }
}
