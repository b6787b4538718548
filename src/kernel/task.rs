//! Task abstraction
//!
//! A Task is one resumable unit of work. The scheduler owns its execution
//! context and advances it one step per host tick; everyone else only sees a
//! [`TaskHandle`], which exposes the state and the completion slot.

use super::executor::Channel;
use futures::future::LocalBoxFuture;
use std::cell::{Cell, RefCell};
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Unique identifier for a task
///
/// Allocated from a sequence counter, so ordering by id is registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Task execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Registered, entry point not yet invoked
    Pending,
    /// Inside a resume step
    Running,
    /// Yielded, or finished with the outcome not yet published; waiting for
    /// a later tick
    Suspended,
    /// Outcome stored, driver registration removed
    Completed,
}

/// A task that panicked during a resume step
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{task} faulted: {message}")]
pub struct TaskFault {
    pub task: TaskId,
    pub message: String,
}

/// Terminal payload of a task
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The task function returned normally
    Success(T),
    /// The task function panicked; the panic never reaches the driver
    Faulted(TaskFault),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// The returned value, dropping any fault
    pub fn success(self) -> Option<T> {
        match self {
            Outcome::Success(value) => Some(value),
            Outcome::Faulted(_) => None,
        }
    }

    pub fn into_result(self) -> Result<T, TaskFault> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Faulted(fault) => Err(fault),
        }
    }
}

/// A boxed, single-threaded future representing a task body
pub type BoxFuture<T> = LocalBoxFuture<'static, T>;

/// Completion slot shared between the driver and all handles of one task.
///
/// The finishing resume only stages the outcome; the driver publishes it on the
/// channel's next tick, and only then do handles and joins see it.
pub(crate) struct Slot<T> {
    state: Cell<TaskState>,
    staged: RefCell<Option<Outcome<T>>>,
    outcome: RefCell<Option<Outcome<T>>>,
}

impl<T> Slot<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Cell::new(TaskState::Pending),
            staged: RefCell::new(None),
            outcome: RefCell::new(None),
        }
    }

    /// Hold the outcome until the next tick. Only the first call has any effect.
    pub(crate) fn stage(&self, outcome: Outcome<T>) {
        let mut staged = self.staged.borrow_mut();
        if staged.is_none() && self.outcome.borrow().is_none() {
            *staged = Some(outcome);
        }
    }
}

/// Type-erased view of a [`Slot`], as seen by the driver
pub(crate) trait Completion {
    fn set_state(&self, state: TaskState);
    fn fault(&self, fault: TaskFault);
    /// Move the staged outcome into view and mark the task Completed
    fn publish(&self);
}

impl<T> Completion for Slot<T> {
    fn set_state(&self, state: TaskState) {
        // Completed is terminal
        if self.state.get() != TaskState::Completed {
            self.state.set(state);
        }
    }

    fn fault(&self, fault: TaskFault) {
        self.stage(Outcome::Faulted(fault));
    }

    fn publish(&self) {
        if let Some(outcome) = self.staged.borrow_mut().take() {
            *self.outcome.borrow_mut() = Some(outcome);
        }
        self.state.set(TaskState::Completed);
    }
}

/// Handle to a started task
///
/// Cloning a handle is cheap; every clone observes the same completion slot.
pub struct TaskHandle<T> {
    id: TaskId,
    channel: Channel,
    slot: Rc<Slot<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(id: TaskId, channel: Channel, slot: Rc<Slot<T>>) -> Self {
        Self { id, channel, slot }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Channel whose ticks drive this task
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn state(&self) -> TaskState {
        self.slot.state.get()
    }

    pub fn is_complete(&self) -> bool {
        self.slot.outcome.borrow().is_some()
    }

    /// Wait for the task from inside another task
    pub fn join(&self) -> Join<T> {
        Join {
            slot: self.slot.clone(),
        }
    }
}

impl<T: Clone> TaskHandle<T> {
    /// A copy of the outcome, or `None` while the task is still live
    pub fn outcome(&self) -> Option<Outcome<T>> {
        self.slot.outcome.borrow().clone()
    }
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            channel: self.channel.clone(),
            slot: self.slot.clone(),
        }
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("state", &self.state())
            .finish()
    }
}

impl<T: Clone> IntoFuture for TaskHandle<T> {
    type Output = Outcome<T>;
    type IntoFuture = Join<T>;

    fn into_future(self) -> Join<T> {
        self.join()
    }
}

/// Future returned by [`TaskHandle::join`]
///
/// Suspends the awaiting task once per tick until the joined task's outcome is
/// present. The joined task is not touched; its own registration drives it.
pub struct Join<T> {
    slot: Rc<Slot<T>>,
}

impl<T: Clone> Future for Join<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.slot.outcome.borrow().as_ref() {
            return Poll::Ready(outcome.clone());
        }
        // Re-check on the next tick
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// The suspension primitive: give control back to the driver until the next tick
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Future returned by [`yield_now`]
#[derive(Debug)]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
