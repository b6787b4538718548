//! tickslice - cooperative task scheduling under a per-tick CPU budget
//!
//! Application code reads as straight-line blocking logic (issue a request,
//! wait for an event, sleep) while each task is really advanced one step per
//! host tick and gives control back whenever the host budget runs low.
//!
//! Design principles:
//! - The host owns the clock: nothing runs outside [`kernel::Scheduler::tick`]
//! - Suspension happens only at explicit points (`yield_now`, joins, delays, quota)
//! - Failures are values: adapters normalize them, task panics become outcomes
//!   (where panics unwind; wasm32-unknown-unknown aborts instead)
//!
//! Platform support:
//! - Native: [`platform::SystemClock`], ticks driven by the embedding host
//! - Browser (wasm32-unknown-unknown): requestAnimationFrame drives the ticks

pub mod config;
pub mod error;
pub mod kernel;
pub mod platform;
pub mod runtime;

pub use config::SchedulerConfig;
pub use error::{Error, Result};
pub use kernel::{
    CallbackResult, Channel, EventBus, Outcome, QuotaMonitor, Scheduler, TaskFactory, TaskHandle,
    TaskState, yield_now,
};
