//! Scheduler driver for cooperative, tick-driven tasks
//!
//! Designed for hosts that hand out a bounded slice of CPU per cycle:
//! - Tick-based execution (the host calls [`Scheduler::tick`] once per cycle per channel)
//! - At most one resume step per live task per tick
//! - Registration order is resume order within a channel
//! - Proper wake semantics (a task parked on a timer is not resumed until it fires)
//! - A task that finishes on one tick is finalized on its channel's next tick:
//!   the outcome becomes visible and the registration is removed there
//! - Panics inside a task become a faulted outcome, never a driver crash
//!
//! Fault capture needs unwinding. On `wasm32-unknown-unknown` panics abort:
//! the panic hook reports the message, the module traps inside [`Scheduler::tick`]
//! and the frame loop stops. Faulted outcomes are only produced on targets
//! built with `panic = "unwind"`.

use super::task::{BoxFuture, Completion, Outcome, Slot, TaskFault, TaskHandle, TaskId, TaskState};
use super::timer::{Delay, TimerQueue};
use crate::config::SchedulerConfig;
use crate::platform::Clock;
use futures::FutureExt;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

/// A periodic-callback channel: one host cadence that drives a set of tasks
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(Cow<'static, str>);

impl Channel {
    /// The host's primary per-cycle channel
    pub const PRIMARY: Channel = Channel(Cow::Borrowed("tick"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::PRIMARY
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Suspendable execution state of one task
enum ExecContext {
    /// Entry point not invoked yet; runs on the first resume
    Pending(Box<dyn FnOnce() -> BoxFuture<()>>),
    /// Yielded at least once
    Suspended(BoxFuture<()>),
    /// Returned or faulted; outcome staged until the next tick
    Finished,
}

/// A registered task as the driver sees it
struct TaskRecord {
    id: TaskId,
    context: ExecContext,
    slot: Rc<dyn Completion>,
}

impl TaskRecord {
    fn is_finished(&self) -> bool {
        matches!(self.context, ExecContext::Finished)
    }

    /// Advance the execution context by one step
    fn resume(self, waker: &Waker) -> TaskRecord {
        let TaskRecord { id, context, slot } = self;
        slot.set_state(TaskState::Running);

        let step = panic::catch_unwind(AssertUnwindSafe(move || {
            let mut future = match context {
                ExecContext::Pending(entry) => entry(),
                ExecContext::Suspended(future) => future,
                ExecContext::Finished => return None,
            };
            let mut cx = Context::from_waker(waker);
            match future.as_mut().poll(&mut cx) {
                Poll::Ready(()) => None,
                Poll::Pending => Some(future),
            }
        }));

        let context = match step {
            Ok(Some(future)) => ExecContext::Suspended(future),
            Ok(None) => ExecContext::Finished,
            Err(payload) => {
                let fault = TaskFault {
                    task: id,
                    message: panic_message(payload.as_ref()),
                };
                warn!("{}", fault);
                slot.fault(fault);
                ExecContext::Finished
            }
        };
        slot.set_state(TaskState::Suspended);
        TaskRecord { id, context, slot }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

/// Scheduler state shared by every clone of a [`Scheduler`]
pub(crate) struct Inner {
    /// Registry: channel -> live tasks in registration order
    channels: BTreeMap<Channel, BTreeMap<TaskId, TaskRecord>>,
    /// Tasks started since the last integration
    pending_spawn: VecDeque<(Channel, TaskRecord)>,
    pub(crate) timers: TimerQueue,
    /// Task inside a resume step, if any
    pub(crate) current: Option<TaskId>,
    next_id: u64,
}

impl Inner {
    fn integrate_pending(&mut self) {
        while let Some((channel, task)) = self.pending_spawn.pop_front() {
            self.channels.entry(channel).or_default().insert(task.id, task);
        }
    }

    fn is_live(&self, task_id: TaskId) -> bool {
        self.current == Some(task_id)
            || self.channels.values().any(|tasks| tasks.contains_key(&task_id))
            || self.pending_spawn.iter().any(|(_, t)| t.id == task_id)
    }

    fn live_count(&self) -> usize {
        self.channels.values().map(BTreeMap::len).sum::<usize>() + self.pending_spawn.len()
    }
}

/// The scheduler - drives tasks cooperatively, one step per tick
///
/// Clones share the same registry, so a task may hold a clone to start
/// further tasks or to sleep.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<RefCell<Inner>>,
    /// Tasks that should be resumed on their channel's next tick (signaled by waker)
    ready: Rc<RefCell<HashSet<TaskId>>>,
    clock: Rc<dyn Clock>,
    default_channel: Channel,
}

impl Scheduler {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self::with_config(clock, &SchedulerConfig::default())
    }

    pub fn with_config(clock: Rc<dyn Clock>, config: &SchedulerConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                channels: BTreeMap::new(),
                pending_spawn: VecDeque::new(),
                timers: TimerQueue::new(),
                current: None,
                next_id: 0,
            })),
            ready: Rc::new(RefCell::new(HashSet::new())),
            clock,
            default_channel: config.default_channel.clone(),
        }
    }

    /// Wrap a function as a task factory
    ///
    /// Nothing runs yet: each [`TaskFactory::start`] creates an independent
    /// task whose function is invoked on its first tick.
    pub fn task<A, F, Fut>(&self, func: F) -> TaskFactory<A, Fut::Output>
    where
        A: 'static,
        F: Fn(A) -> Fut + 'static,
        Fut: Future + 'static,
        Fut::Output: 'static,
    {
        TaskFactory {
            scheduler: self.clone(),
            func: Rc::new(move |args: A| func(args).boxed_local()),
            channel: self.default_channel.clone(),
        }
    }

    /// Start a one-off task on the default channel
    pub fn spawn<Fut>(&self, future: Fut) -> TaskHandle<Fut::Output>
    where
        Fut: Future + 'static,
        Fut::Output: 'static,
    {
        let channel = self.default_channel.clone();
        self.start_boxed(channel, future.boxed_local())
    }

    fn start_boxed<T: 'static>(&self, channel: Channel, future: BoxFuture<T>) -> TaskHandle<T> {
        let slot = Rc::new(Slot::new());
        let done = slot.clone();
        let entry: Box<dyn FnOnce() -> BoxFuture<()>> = Box::new(move || {
            async move {
                let value = future.await;
                done.stage(Outcome::Success(value));
            }
            .boxed_local()
        });

        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = TaskId(inner.next_id);
            inner.next_id += 1;
            let record = TaskRecord {
                id,
                context: ExecContext::Pending(entry),
                slot: slot.clone(),
            };
            // Integrated at the next tick boundary, even when started mid-tick
            inner.pending_spawn.push_back((channel.clone(), record));
            id
        };
        self.ready.borrow_mut().insert(id);
        debug!("registered {} on channel {}", id, channel);

        TaskHandle::new(id, channel, slot)
    }

    /// Run one tick of the given channel
    ///
    /// Fires expired timers, then visits every ready task on `channel` once, in
    /// registration order. A task whose previous resume finished is finalized
    /// instead of resumed. Returns the number of tasks resumed.
    pub fn tick(&self, channel: &Channel) -> usize {
        let now = self.clock.now_ms();
        let ids: Vec<TaskId> = {
            let mut inner = self.inner.borrow_mut();
            inner.integrate_pending();

            let woken = inner.timers.tick(now);
            let mut ready = self.ready.borrow_mut();
            ready.extend(woken);
            // Wakers can outlive their task
            ready.retain(|id| inner.is_live(*id));

            inner
                .channels
                .get(channel)
                .map(|tasks| tasks.keys().filter(|id| ready.contains(*id)).copied().collect())
                .unwrap_or_default()
        };

        let mut resumed = 0;
        for task_id in ids {
            // Remove from ready set before resuming
            self.ready.borrow_mut().remove(&task_id);

            // Take the record out so the task body can reach the scheduler
            let record = {
                let mut inner = self.inner.borrow_mut();
                let Some(record) = inner.channels.get_mut(channel).and_then(|t| t.remove(&task_id))
                else {
                    continue;
                };
                if record.is_finished() {
                    record.slot.publish();
                    debug!("{} completed, deregistered from channel {}", task_id, channel);
                    continue;
                }
                inner.current = Some(task_id);
                record
            };

            let waker = self.create_waker(task_id);
            let record = record.resume(&waker);
            resumed += 1;

            if record.is_finished() {
                // Finalized on this channel's next tick
                self.ready.borrow_mut().insert(task_id);
            }
            let mut inner = self.inner.borrow_mut();
            inner.current = None;
            inner.channels.entry(channel.clone()).or_default().insert(task_id, record);
        }

        // Integrate any tasks started during this tick
        let mut inner = self.inner.borrow_mut();
        inner.integrate_pending();
        if inner.channels.get(channel).is_some_and(BTreeMap::is_empty) {
            inner.channels.remove(channel);
        }
        trace!("tick {}: resumed {} task(s)", channel, resumed);

        resumed
    }

    /// Tick every channel with live tasks until none remain or `max_ticks`
    /// rounds have run. For contexts with no host cadence (tests, CLIs).
    /// Returns the number of rounds run.
    pub fn run_until_idle(&self, max_ticks: usize) -> usize {
        let mut rounds = 0;
        while rounds < max_ticks && self.has_tasks() {
            let channels: Vec<Channel> = {
                let mut inner = self.inner.borrow_mut();
                inner.integrate_pending();
                inner.channels.keys().cloned().collect()
            };
            for channel in &channels {
                self.tick(channel);
            }
            rounds += 1;
        }
        rounds
    }

    /// Suspend the calling task for `ms` milliseconds of clock time
    pub fn delay(&self, ms: f64) -> Delay {
        Delay::new(Rc::downgrade(&self.inner), self.clock.clone(), ms)
    }

    /// The task currently inside a resume step
    pub fn current_task(&self) -> Option<TaskId> {
        self.inner.borrow().current
    }

    /// Whether a task still holds a driver registration
    ///
    /// True until the tick that publishes the task's outcome.
    pub fn is_registered(&self, task_id: TaskId) -> bool {
        self.inner.borrow().is_live(task_id)
    }

    pub fn has_tasks(&self) -> bool {
        self.task_count() > 0
    }

    /// Number of live tasks, including any being resumed right now
    pub fn task_count(&self) -> usize {
        let inner = self.inner.borrow();
        inner.live_count() + usize::from(inner.current.is_some())
    }

    /// Number of live tasks registered on `channel`
    pub fn channel_task_count(&self, channel: &Channel) -> usize {
        let inner = self.inner.borrow();
        inner.channels.get(channel).map_or(0, BTreeMap::len)
            + inner.pending_spawn.iter().filter(|(c, _)| c == channel).count()
    }

    pub fn default_channel(&self) -> &Channel {
        &self.default_channel
    }

    pub fn clock(&self) -> &Rc<dyn Clock> {
        &self.clock
    }

    /// Create a waker that marks a task as ready
    fn create_waker(&self, task_id: TaskId) -> Waker {
        let state = Box::new(WakerState {
            task_id,
            ready_set: self.ready.clone(),
        });
        let ptr = Box::into_raw(state) as *const ();
        let raw = RawWaker::new(ptr, &WAKER_VTABLE);
        unsafe { Waker::from_raw(raw) }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.task_count())
            .field("default_channel", &self.default_channel)
            .finish()
    }
}

/// A function wrapped for repeated task creation
///
/// Returned by [`Scheduler::task`]. Every [`start`](TaskFactory::start) yields a
/// task with its own execution context and driver registration.
pub struct TaskFactory<A, T> {
    scheduler: Scheduler,
    func: Rc<dyn Fn(A) -> BoxFuture<T>>,
    channel: Channel,
}

impl<A: 'static, T: 'static> TaskFactory<A, T> {
    /// Drive tasks from this factory with another channel's ticks
    pub fn on_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Create and register one task; its function runs on the first tick
    pub fn start(&self, args: A) -> TaskHandle<T> {
        let func = self.func.clone();
        // Defer the call itself so the function runs inside the first resume
        let future = async move { func(args).await }.boxed_local();
        self.scheduler.start_boxed(self.channel.clone(), future)
    }
}

impl<A, T> Clone for TaskFactory<A, T> {
    fn clone(&self) -> Self {
        Self {
            scheduler: self.scheduler.clone(),
            func: self.func.clone(),
            channel: self.channel.clone(),
        }
    }
}

/// Shared state for waker to signal task readiness
struct WakerState {
    task_id: TaskId,
    ready_set: Rc<RefCell<HashSet<TaskId>>>,
}

// Waker implementation that properly signals task readiness

const WAKER_VTABLE: RawWakerVTable =
    RawWakerVTable::new(waker_clone, waker_wake, waker_wake_by_ref, waker_drop);

unsafe fn waker_clone(ptr: *const ()) -> RawWaker {
    unsafe {
        let state = &*(ptr as *const WakerState);
        let cloned = Box::new(WakerState {
            task_id: state.task_id,
            ready_set: state.ready_set.clone(),
        });
        RawWaker::new(Box::into_raw(cloned) as *const (), &WAKER_VTABLE)
    }
}

unsafe fn waker_wake(ptr: *const ()) {
    unsafe {
        let state = Box::from_raw(ptr as *mut WakerState);
        state.ready_set.borrow_mut().insert(state.task_id);
    }
}

unsafe fn waker_wake_by_ref(ptr: *const ()) {
    unsafe {
        let state = &*(ptr as *const WakerState);
        state.ready_set.borrow_mut().insert(state.task_id);
    }
}

unsafe fn waker_drop(ptr: *const ()) {
    unsafe {
        drop(Box::from_raw(ptr as *mut WakerState));
    }
}
