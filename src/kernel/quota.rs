//! CPU quota cooperation
//!
//! Long-running tasks call [`QuotaMonitor::quota`] inside tight loops. When the
//! host-reported usage crosses the requested fraction of the per-tick budget the
//! task gives the rest of the tick back to the host.

use super::task::yield_now;
use crate::config::SchedulerConfig;
use crate::platform::CpuMeter;
use log::trace;
use std::rc::Rc;

/// Answers "should the caller yield now?" from fresh host readings
#[derive(Clone)]
pub struct QuotaMonitor {
    meter: Rc<dyn CpuMeter>,
    default_percent: f64,
}

impl QuotaMonitor {
    pub fn new(meter: Rc<dyn CpuMeter>) -> Self {
        Self::with_config(meter, &SchedulerConfig::default())
    }

    pub fn with_config(meter: Rc<dyn CpuMeter>, config: &SchedulerConfig) -> Self {
        Self {
            meter,
            default_percent: config.quota_percent,
        }
    }

    /// Whether `max(current, average)` usage has reached `percent` of the budget
    ///
    /// `percent <= 0` always yields; values above 1 are treated as 1.
    pub fn should_yield(&self, percent: f64) -> bool {
        if percent <= 0.0 {
            return true;
        }
        let percent = percent.min(1.0);
        let usage = self.meter.current_usage().max(self.meter.average_usage());
        usage >= percent * self.meter.max_budget()
    }

    /// Suspend once if the threshold is met, otherwise return immediately
    pub async fn quota(&self, percent: f64) {
        if self.should_yield(percent) {
            trace!("quota {:.2} reached, yielding", percent);
            yield_now().await;
        }
    }

    /// [`quota`](Self::quota) at the configured default fraction
    pub async fn checkpoint(&self) {
        self.quota(self.default_percent).await;
    }

    pub fn default_percent(&self) -> f64 {
        self.default_percent
    }
}

impl std::fmt::Debug for QuotaMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaMonitor")
            .field("default_percent", &self.default_percent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{Channel, Outcome, Scheduler, TaskFactory, TaskState};
    use crate::platform::{ManualClock, ManualMeter};

    fn monitor(max: f64) -> (QuotaMonitor, Rc<ManualMeter>) {
        let meter = Rc::new(ManualMeter::new(max));
        (QuotaMonitor::new(meter.clone()), meter)
    }

    #[test]
    fn test_non_positive_percent_always_yields() {
        let (quota, _) = monitor(100.0);
        assert!(quota.should_yield(0.0));
        assert!(quota.should_yield(-0.5));
    }

    #[test]
    fn test_full_percent_yields_only_at_saturation() {
        let (quota, meter) = monitor(100.0);

        meter.set_usage(99.9, 10.0);
        assert!(!quota.should_yield(1.0));
        assert!(!quota.should_yield(7.0));

        meter.set_usage(100.0, 10.0);
        assert!(quota.should_yield(1.0));
        assert!(quota.should_yield(7.0));
    }

    #[test]
    fn test_uses_larger_of_current_and_average() {
        let (quota, meter) = monitor(100.0);

        meter.set_usage(10.0, 60.0);
        assert!(quota.should_yield(0.5));

        meter.set_usage(60.0, 10.0);
        assert!(quota.should_yield(0.5));

        meter.set_usage(40.0, 45.0);
        assert!(!quota.should_yield(0.5));
    }

    #[test]
    fn test_readings_are_not_cached() {
        let (quota, meter) = monitor(10.0);
        assert!(!quota.should_yield(0.5));
        meter.set_usage(5.0, 0.0);
        assert!(quota.should_yield(0.5));
    }

    fn quota_then_done(sched: &Scheduler, quota: QuotaMonitor) -> TaskFactory<(), &'static str> {
        sched.task(move |()| {
            let quota = quota.clone();
            async move {
                quota.quota(1.0).await;
                "done"
            }
        })
    }

    #[test]
    fn test_under_budget_task_completes_on_second_tick() {
        let (quota, meter) = monitor(100.0);
        let sched = Scheduler::new(Rc::new(ManualClock::new()));
        let handle = quota_then_done(&sched, quota).start(());

        // Below max: no yield, the function returns during tick 1
        meter.set_usage(50.0, 50.0);
        sched.tick(&Channel::PRIMARY);
        assert!(!handle.is_complete());

        meter.set_usage(100.0, 100.0);
        sched.tick(&Channel::PRIMARY);
        assert_eq!(handle.outcome(), Some(Outcome::Success("done")));
    }

    #[test]
    fn test_saturated_quota_adds_a_tick() {
        let (quota, meter) = monitor(100.0);
        let sched = Scheduler::new(Rc::new(ManualClock::new()));
        let handle = quota_then_done(&sched, quota).start(());

        meter.set_usage(100.0, 100.0);
        sched.tick(&Channel::PRIMARY);
        assert_eq!(handle.state(), TaskState::Suspended);

        meter.set_usage(10.0, 10.0);
        sched.tick(&Channel::PRIMARY);
        assert!(!handle.is_complete());

        sched.tick(&Channel::PRIMARY);
        assert_eq!(handle.outcome(), Some(Outcome::Success("done")));
    }
}
