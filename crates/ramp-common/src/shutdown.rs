//! Cooperative shutdown signalling.
//!
//! The ramp loop polls a [`ShutdownSignal`] once per tick. Whoever owns the
//! process (signal handlers, tests, an embedding application) decides when
//! it flips.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Query for a process-wide stop request.
pub trait ShutdownSignal {
    /// Returns true once shutdown has been requested.
    fn shutdown_requested(&self) -> bool;
}

impl<F> ShutdownSignal for F
where
    F: Fn() -> bool,
{
    fn shutdown_requested(&self) -> bool {
        self()
    }
}

/// Cloneable atomic shutdown flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    requested: Arc<AtomicBool>,
}

impl ShutdownFlag {
    /// Create a flag in the "running" state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown (can be called from any thread).
    pub fn request_shutdown(&self) {
        self.requested.store(true, Ordering::Relaxed);
    }
}

impl ShutdownSignal for ShutdownFlag {
    #[inline]
    fn shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_is_shared_between_clones() {
        let flag = ShutdownFlag::new();
        let observer = flag.clone();
        assert!(!observer.shutdown_requested());

        flag.request_shutdown();
        assert!(observer.shutdown_requested());
    }

    #[test]
    fn test_closure_signal() {
        let never = || false;
        assert!(!never.shutdown_requested());

        let flag = ShutdownFlag::new();
        flag.request_shutdown();
        let via_closure = || flag.shutdown_requested();
        assert!(via_closure.shutdown_requested());
    }
}
