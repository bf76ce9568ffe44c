//! Virtual-clock Environment implementation for deterministic testing.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use bootoracle_core::env::{CancelToken, Environment, Interrupted};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Simulation environment with virtual time and a seeded RNG.
///
/// - **Virtual Time**: `now()` is a fixed base instant plus a shared offset.
///   `sleep()` advances the offset and returns immediately, so a 35 s
///   session timeout costs nothing.
/// - **Seeded RNG**: `random_bytes()` draws from a ChaCha20Rng seeded with a
///   fixed value, so device noise is reproducible.
///
/// Clones share the clock, the RNG and the cancel token. The device model
/// and the client must use clones of the same `SimEnv` to agree on time.
#[derive(Clone, Debug)]
pub struct SimEnv {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
    rng: Arc<Mutex<ChaCha20Rng>>,
    cancel: CancelToken,
}

impl SimEnv {
    /// Create a new SimEnv with default seed (0)
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Create a new SimEnv with a specific seed
    pub fn with_seed(seed: u64) -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            cancel: CancelToken::new(),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, duration: Duration) {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner) += duration;
    }

    /// Virtual time since creation.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Token that interrupts this environment's sleeps
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Fills `dest` from the seeded RNG.
    pub fn random_bytes(&self, dest: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(dest);
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        if self.cancel.is_cancelled() {
            return Err(Interrupted);
        }
        self.advance(duration);
        Ok(())
    }

    fn is_interrupted(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_env_time_advances() {
        let env = SimEnv::new();

        let start = env.now();
        env.sleep(Duration::from_secs(35)).unwrap();
        let end = env.now();

        assert_eq!(end - start, Duration::from_secs(35));
        assert_eq!(env.elapsed(), Duration::from_secs(35));
    }

    #[test]
    fn sim_env_clones_share_clock() {
        let env1 = SimEnv::new();
        let env2 = env1.clone();

        env1.advance(Duration::from_millis(500));
        assert_eq!(env2.elapsed(), Duration::from_millis(500));
    }

    #[test]
    fn sim_env_rng_is_deterministic() {
        let run_test = |seed: u64| -> Vec<u8> {
            let env = SimEnv::with_seed(seed);
            let mut bytes = vec![0u8; 64];
            env.random_bytes(&mut bytes);
            bytes
        };

        assert_eq!(run_test(12345), run_test(12345));
        assert_ne!(run_test(12345), run_test(54321));
    }

    #[test]
    fn cancelled_sleep_does_not_advance() {
        let env = SimEnv::new();
        env.cancel_token().cancel();

        assert_eq!(env.sleep(Duration::from_secs(3)), Err(Interrupted));
        assert_eq!(env.elapsed(), Duration::ZERO);
        assert!(env.is_interrupted());
    }
}
