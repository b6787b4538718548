//! The kernel - task execution, suspension, and host adapters
//!
//! Synchronous mental model, async implementation:
//! - Tasks read as straight-line code and suspend only at explicit points
//! - The host ticks the scheduler; the scheduler never blocks the host
//! - Small, auditable core

pub mod adapter;
pub mod events;
pub mod executor;
pub mod http;
pub mod quota;
pub mod task;
pub mod timer;

pub use adapter::{CallbackOperation, CallbackResult, Response, adapt};
pub use events::{EventBus, wait_for};
pub use executor::{Channel, Scheduler, TaskFactory};
pub use quota::QuotaMonitor;
pub use task::{Join, Outcome, TaskFault, TaskHandle, TaskId, TaskState, yield_now};
pub use timer::Delay;
