//! Timer System
//!
//! The timed-suspend facility behind [`Scheduler::delay`](super::Scheduler::delay).
//!
//! Design:
//! - TimerQueue is a min-heap sorted by deadline
//! - Each timer wakes exactly one task when it expires
//! - The scheduler processes the queue at the start of every tick
//! - Time comes from the injected [`Clock`](crate::platform::Clock)

use super::executor::Inner;
use super::task::TaskId;
use crate::platform::Clock;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

/// Unique identifier for a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// Timer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Timer is active and waiting
    Pending,
    /// Timer has fired
    Fired,
    /// Timer was cancelled
    Cancelled,
}

/// A one-shot timer that fires at a deadline
#[derive(Debug)]
pub struct Timer {
    pub id: TimerId,
    /// When this timer should fire (monotonic milliseconds)
    pub deadline: f64,
    /// Task to wake when the timer fires
    pub wake_task: TaskId,
    pub state: TimerState,
}

impl Timer {
    pub fn new(id: TimerId, deadline: f64, wake_task: TaskId) -> Self {
        Self {
            id,
            deadline,
            wake_task,
            state: TimerState::Pending,
        }
    }

    pub fn is_expired(&self, now: f64) -> bool {
        self.state == TimerState::Pending && now >= self.deadline
    }

    /// Fire the timer, returning the task to wake
    pub fn fire(&mut self) -> Option<TaskId> {
        if self.state == TimerState::Pending {
            self.state = TimerState::Fired;
            Some(self.wake_task)
        } else {
            None
        }
    }
}

/// Entry in the timer heap (for ordering)
#[derive(Debug)]
struct TimerEntry {
    deadline: f64,
    id: TimerId,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (smallest deadline first)
        other
            .deadline
            .partial_cmp(&self.deadline)
            .unwrap_or(Ordering::Equal)
    }
}

/// Timer queue - manages all active timers
#[derive(Debug)]
pub struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    timers: HashMap<TimerId, Timer>,
    next_id: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            timers: HashMap::new(),
            next_id: 1,
        }
    }

    /// Schedule a timer firing `delay_ms` after `now`
    pub fn schedule(&mut self, delay_ms: f64, now: f64, wake_task: TaskId) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        let deadline = now + delay_ms;
        self.heap.push(TimerEntry { deadline, id });
        self.timers.insert(id, Timer::new(id, deadline, wake_task));

        id
    }

    /// Cancel a timer
    ///
    /// Returns false if the timer doesn't exist or already fired.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.timers.get_mut(&id) {
            Some(timer) if timer.state == TimerState::Pending => {
                timer.state = TimerState::Cancelled;
                true
            }
            _ => false,
        }
    }

    /// Process expired timers, returning tasks to wake
    pub fn tick(&mut self, now: f64) -> Vec<TaskId> {
        let mut tasks_to_wake = Vec::new();

        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let Some(entry) = self.heap.pop() else {
                break;
            };

            if let Some(timer) = self.timers.get_mut(&entry.id)
                && timer.is_expired(now)
                && let Some(task_id) = timer.fire()
            {
                tasks_to_wake.push(task_id);
            }
        }

        // Clean up fired/cancelled timers
        self.timers.retain(|_, t| t.state == TimerState::Pending);

        tasks_to_wake
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.timers
            .get(&id)
            .map(|t| t.state == TimerState::Pending)
            .unwrap_or(false)
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [`Scheduler::delay`](super::Scheduler::delay)
///
/// Always suspends at least once. Inside a scheduler task the task is parked
/// on a timer and not resumed again until the timer fires; elsewhere it falls
/// back to re-polling the clock.
pub struct Delay {
    inner: Weak<RefCell<Inner>>,
    clock: Rc<dyn Clock>,
    duration_ms: f64,
    deadline: Option<f64>,
    timer: Option<TimerId>,
}

impl Delay {
    pub(crate) fn new(inner: Weak<RefCell<Inner>>, clock: Rc<dyn Clock>, duration_ms: f64) -> Self {
        Self {
            inner,
            clock,
            duration_ms: duration_ms.max(0.0),
            deadline: None,
            timer: None,
        }
    }
}

impl Future for Delay {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let now = self.clock.now_ms();
        let deadline = match self.deadline {
            Some(deadline) if now >= deadline => return Poll::Ready(()),
            Some(deadline) => deadline,
            None => {
                let deadline = now + self.duration_ms;
                self.deadline = Some(deadline);
                deadline
            }
        };

        let parked = self.inner.upgrade().and_then(|inner| {
            let mut inner = inner.borrow_mut();
            let task = inner.current?;
            match self.timer {
                Some(timer) if inner.timers.is_pending(timer) => Some(timer),
                _ => Some(inner.timers.schedule(deadline - now, now, task)),
            }
        });

        match parked {
            Some(timer) => self.timer = Some(timer),
            None => cx.waker().wake_by_ref(),
        }
        Poll::Pending
    }
}

impl Drop for Delay {
    fn drop(&mut self) {
        if let Some(timer) = self.timer
            && let Some(inner) = self.inner.upgrade()
            && let Ok(mut inner) = inner.try_borrow_mut()
        {
            inner.timers.cancel(timer);
        }
    }
}
