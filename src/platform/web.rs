//! Browser Platform Implementation
//!
//! Time comes from `performance.now()`, the same origin requestAnimationFrame
//! timestamps use.

use super::Clock;

/// Clock backed by the window's Performance object
pub struct PerformanceClock {
    performance: Option<web_sys::Performance>,
}

impl PerformanceClock {
    pub fn new() -> Self {
        Self {
            performance: web_sys::window().and_then(|w| w.performance()),
        }
    }
}

impl Default for PerformanceClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for PerformanceClock {
    fn now_ms(&self) -> f64 {
        // No window (e.g. a worker without Performance): time stands still
        self.performance.as_ref().map_or(0.0, |p| p.now())
    }
}
