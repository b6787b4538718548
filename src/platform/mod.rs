//! Platform Abstraction Layer
//!
//! Traits for the host facilities the scheduler reads but does not own:
//!
//! - Monotonic time (for delays)
//! - CPU usage accounting (for quota checks)
//!
//! The kernel is platform-agnostic. Only these implementations know about
//! the host environment.

#[cfg(target_arch = "wasm32")]
pub mod web;

use std::cell::Cell;

/// Monotonic time source
pub trait Clock {
    /// Current time in milliseconds since some fixed origin
    fn now_ms(&self) -> f64;
}

/// Host CPU accounting, refreshed by the host at least once per tick
///
/// All three readings share one unit (whatever the host reports).
pub trait CpuMeter {
    fn current_usage(&self) -> f64;
    fn average_usage(&self) -> f64;
    fn max_budget(&self) -> f64;
}

/// Wall-clock time from `std::time::Instant`
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: std::time::Instant,
}

#[cfg(not(target_arch = "wasm32"))]
impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Clock that only moves when told to (simulations, tests)
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<f64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, now_ms: f64) {
        self.now.set(now_ms);
    }

    pub fn advance(&self, ms: f64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.now.get()
    }
}

/// CPU meter with settable readings (simulations, tests)
#[derive(Debug)]
pub struct ManualMeter {
    current: Cell<f64>,
    average: Cell<f64>,
    max: Cell<f64>,
}

impl ManualMeter {
    /// Idle meter with the given budget
    pub fn new(max_budget: f64) -> Self {
        Self {
            current: Cell::new(0.0),
            average: Cell::new(0.0),
            max: Cell::new(max_budget),
        }
    }

    pub fn set_usage(&self, current: f64, average: f64) {
        self.current.set(current);
        self.average.set(average);
    }

    pub fn set_budget(&self, max_budget: f64) {
        self.max.set(max_budget);
    }
}

impl CpuMeter for ManualMeter {
    fn current_usage(&self) -> f64 {
        self.current.get()
    }

    fn average_usage(&self) -> f64 {
        self.average.get()
    }

    fn max_budget(&self) -> f64 {
        self.max.get()
    }
}
