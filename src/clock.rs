// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Epoch clock for scheduler classes.
//!
//! [Clock] tracks either real time or a user-supplied time source for [crate::scheduler::Scheduler] and
//! [crate::scheduler::ThreadPool]. The default construction reports seconds elapsed since the first sample of a
//! monotonic instant. A custom clock is built from any time function - simulation time, a replay clock, or a
//! stepping clock for tests.
//!
//! [Clock::epoch] always reports the last stored time value, while [Clock::update] samples the time function and
//! stores it. The time is kept as an atomic 64-bit tick scaled by the quantisation value (default 1 microsecond
//! per tick), so [Clock::update], [Clock::epoch] and [Clock::tick] are thread safe provided the time function is.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::{
    sync::{
        atomic::{
            AtomicU64,
            Ordering,
        },
        Arc,
        OnceLock,
    },
    time::Instant,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Default quantisation between floating point seconds and the fixed point [Clock::tick] value.
pub const DEFAULT_QUANTISATION: f64 = 1e-6;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Signature for the time evaluation function.
pub type TimeFunction = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Monotonic seconds source. Clones share the stored tick.
#[derive(Clone)]
pub struct Clock {
    /// Last stored time, in ticks of `quantisation` seconds.
    time: Arc<AtomicU64>,
    /// Seconds per tick.
    quantisation: f64,
    /// Time function sampled by [Clock::update].
    now: TimeFunction,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Clock {
    /// Creates a clock with a custom time function and quantisation.
    pub fn new<F: Fn() -> f64 + Send + Sync + 'static>(now: F, quantisation: f64) -> Self {
        Self {
            time: Arc::new(AtomicU64::new(0)),
            quantisation,
            now: Arc::new(now),
        }
    }

    /// Creates a clock using the default time function and the given quantisation.
    pub fn with_quantisation(quantisation: f64) -> Self {
        Self::new(monotonic_time_function, quantisation)
    }

    /// Creates a clock whose time function advances by `step_s` seconds on every sample, starting at zero. Useful
    /// for simulations and deterministic tests.
    pub fn stepping(step_s: f64) -> Self {
        let samples: AtomicU64 = AtomicU64::new(0);
        Self::new(
            move || samples.fetch_add(1, Ordering::Relaxed) as f64 * step_s,
            DEFAULT_QUANTISATION,
        )
    }

    /// Get the quantisation value set on construction.
    pub fn quantisation(&self) -> f64 {
        self.quantisation
    }

    /// Get the current epoch time from the last [Clock::update] call.
    pub fn epoch(&self) -> f64 {
        self.time.load(Ordering::Acquire) as f64 * self.quantisation
    }

    /// Get the current tick value from the last [Clock::update] call.
    pub fn tick(&self) -> u64 {
        self.time.load(Ordering::Acquire)
    }

    /// Update the stored time by sampling the time function.
    /// Returns the new epoch time, unquantised.
    pub fn update(&self) -> f64 {
        let now_s: f64 = (self.now)();
        let tick: u64 = (now_s / self.quantisation) as u64;
        self.time.store(tick, Ordering::Release);
        now_s
    }
}

/// Implements the default time function.
/// Returns the epoch time (seconds) since the first call to this function.
fn monotonic_time_function() -> f64 {
    static BASE_TIME: OnceLock<Instant> = OnceLock::new();
    BASE_TIME.get_or_init(Instant::now).elapsed().as_secs_f64()
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Default Trait Implementation for Clock
impl Default for Clock {
    /// Creates a real-time clock with the default quantisation.
    fn default() -> Self {
        Self::with_quantisation(DEFAULT_QUANTISATION)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use crate::clock::{
        Clock,
        DEFAULT_QUANTISATION,
    };
    use ::anyhow::Result;

    /// The stored epoch is quantised, so compare it within a tick.
    fn ensure_close(observed: f64, expected: f64) -> Result<()> {
        if (observed - expected).abs() > 1e-5 {
            anyhow::bail!("expected {} within a tick, observed {}", expected, observed);
        }
        Ok(())
    }

    #[test]
    fn stepping_clock_advances_by_a_fixed_step() -> Result<()> {
        let clock: Clock = Clock::stepping(0.25);

        crate::ensure_eq!(clock.epoch(), 0.0);
        crate::ensure_eq!(clock.update(), 0.0);
        crate::ensure_eq!(clock.update(), 0.25);
        crate::ensure_eq!(clock.update(), 0.5);
        ensure_close(clock.epoch(), 0.5)?;

        Ok(())
    }

    #[test]
    fn epoch_reports_the_quantised_stored_sample() -> Result<()> {
        let clock: Clock = Clock::new(|| 1.25, 0.5);

        crate::ensure_eq!(clock.update(), 1.25);
        crate::ensure_eq!(clock.tick(), 2);
        crate::ensure_eq!(clock.epoch(), 1.0);

        Ok(())
    }

    #[test]
    fn clones_share_the_stored_time() -> Result<()> {
        let clock: Clock = Clock::stepping(1.0);
        let observer: Clock = clock.clone();

        clock.update();
        clock.update();
        ensure_close(observer.epoch(), 1.0)?;

        Ok(())
    }

    #[test]
    fn default_time_function_is_monotonic() -> Result<()> {
        let clock: Clock = Clock::default();

        crate::ensure_eq!(clock.quantisation(), DEFAULT_QUANTISATION);
        let first: f64 = clock.update();
        let second: f64 = clock.update();
        if second < first {
            anyhow::bail!("time went backwards: {} -> {}", first, second);
        }

        Ok(())
    }
}
