//! crates/sync_core/src/clock.rs
//!
//! The `Clock` external collaborator: wall-clock seconds, as a trait so
//! tests can substitute a deterministic clock instead of `SystemTime::now`.

use std::time::{SystemTime, UNIX_EPOCH};

/// A source of wall-clock seconds.
pub trait Clock: Send + Sync {
    /// Current time in seconds since the epoch.
    fn now_secs(&self) -> f64;
}

/// The real system clock, backed by [`SystemTime::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
pub mod test_support {
    //! A fixed, manually-advanced clock for deterministic tests elsewhere in
    //! the workspace.
    use super::Clock;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// A clock whose value is set explicitly by the test driving it.
    #[derive(Debug, Default)]
    pub struct FakeClock {
        micros: AtomicU64,
    }

    impl FakeClock {
        /// A fake clock starting at `secs`.
        #[must_use]
        pub fn at(secs: f64) -> Self {
            let clock = Self::default();
            clock.set(secs);
            clock
        }

        /// Set the current time to `secs`.
        pub fn set(&self, secs: f64) {
            self.micros.store((secs * 1_000_000.0) as u64, Ordering::SeqCst);
        }
    }

    impl Clock for FakeClock {
        fn now_secs(&self) -> f64 {
            self.micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
        }
    }
}
