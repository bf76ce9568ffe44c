//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples the client, injector and orchestrator
//! from the wall clock. Every wait in this crate goes through
//! [`Environment::sleep`], and every elapsed-time measurement through
//! [`Environment::now`]:
//!
//! - `SystemEnv` sleeps for real, in short slices, checking a
//!   [`CancelToken`] between slices so a 35 s fault delay can be
//!   interrupted from a signal handler.
//! - `SimEnv` (bootoracle-harness) advances a virtual clock instantly, so
//!   timeout scenarios run in microseconds.
//!
//! # Invariants
//!
//! - Monotonicity: `now()` never goes backwards
//! - Bounded waits: `sleep(d)` returns after at most `d` plus one slice

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use thiserror::Error;

/// A wait was cut short by a cancel request.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("wait interrupted")]
pub struct Interrupted;

/// Clock and sleep provider.
pub trait Environment: Clone {
    /// Current time.
    fn now(&self) -> Instant;

    /// Blocks for `duration`.
    ///
    /// # Errors
    ///
    /// `Interrupted` if a cancel request arrives before the duration
    /// elapses.
    fn sleep(&self, duration: Duration) -> Result<(), Interrupted>;

    /// Whether a cancel request is pending.
    fn is_interrupted(&self) -> bool;

    /// Time elapsed since `start`.
    fn elapsed_since(&self, start: Instant) -> Duration {
        self.now().saturating_duration_since(start)
    }
}

/// Shared cancel flag.
///
/// Clones observe the same flag; cancelling any clone cancels all.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Real clock with interruptible sleeps.
#[derive(Debug, Clone)]
pub struct SystemEnv {
    cancel: CancelToken,
    slice: Duration,
}

impl SystemEnv {
    /// Sleep granularity between cancel checks
    pub const DEFAULT_SLICE: Duration = Duration::from_millis(50);

    /// Creates an environment with its own cancel token.
    #[must_use]
    pub fn new() -> Self {
        Self::with_cancel(CancelToken::new())
    }

    /// Creates an environment observing `cancel`.
    #[must_use]
    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self { cancel, slice: Self::DEFAULT_SLICE }
    }

    /// Token that interrupts this environment's waits
    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

impl Default for SystemEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let deadline = Instant::now() + duration;
        loop {
            if self.cancel.is_cancelled() {
                return Err(Interrupted);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            std::thread::sleep(remaining.min(self.slice));
        }
    }

    fn is_interrupted(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_sleep_returns_immediately() {
        let env = SystemEnv::new();
        env.cancel_token().cancel();

        let start = Instant::now();
        assert_eq!(env.sleep(Duration::from_secs(30)), Err(Interrupted));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(env.is_interrupted());
    }

    #[test]
    fn short_sleep_completes() {
        let env = SystemEnv::new();
        let start = env.now();
        env.sleep(Duration::from_millis(5)).unwrap();
        assert!(env.elapsed_since(start) >= Duration::from_millis(5));
    }

    #[test]
    fn clones_share_cancellation() {
        let token = CancelToken::new();
        let env = SystemEnv::with_cancel(token.clone());
        token.cancel();
        assert!(env.clone().is_interrupted());
    }
}
