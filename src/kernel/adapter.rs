//! Callback adapters
//!
//! Turns "start an operation, get called back on success or failure" host APIs
//! into task factories. The adapted task:
//! 1. yields once per tick while the operation cannot be issued,
//! 2. issues it with two callbacks that fill a local result and clear `waiting`,
//! 3. yields once per tick while `waiting`,
//! 4. returns the normalized [`CallbackResult`].
//!
//! There is no backoff: a host that stays unready keeps the task polling once
//! per tick.

use super::executor::{Scheduler, TaskFactory};
use super::task::yield_now;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

/// Status synthesized for every failure callback
pub const FAILURE_STATUS: u16 = 400;

pub type Headers = BTreeMap<String, String>;

/// What a host hands to the success callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub body: String,
    pub headers: Headers,
    pub status: u16,
}

pub type OnSuccess = Box<dyn FnOnce(Response)>;
pub type OnFailure = Box<dyn FnOnce(String)>;

/// Normalized result of an adapted operation
///
/// Success and failure share this shape; failures carry the reason as
/// `content`, no headers, and [`FAILURE_STATUS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackResult {
    pub content: String,
    pub length: usize,
    pub headers: Headers,
    pub status: u16,
}

impl CallbackResult {
    pub fn failure(reason: impl Into<String>) -> Self {
        let content = reason.into();
        Self {
            length: content.len(),
            content,
            headers: Headers::new(),
            status: FAILURE_STATUS,
        }
    }
}

impl From<Response> for CallbackResult {
    fn from(response: Response) -> Self {
        Self {
            length: response.body.len(),
            content: response.body,
            headers: response.headers,
            status: response.status,
        }
    }
}

/// A callback-style host operation
pub trait CallbackOperation: 'static {
    type Args: 'static;

    /// Whether another operation may be issued right now
    fn is_ready(&self) -> bool;

    /// Start the operation. Exactly one of the callbacks is expected to run,
    /// now or on a later tick.
    fn issue(&self, args: Self::Args, on_success: OnSuccess, on_failure: OnFailure);
}

/// Run one operation to completion inside the current task
pub async fn invoke<Op>(op: &Op, args: Op::Args) -> CallbackResult
where
    Op: CallbackOperation + ?Sized,
{
    while !op.is_ready() {
        yield_now().await;
    }

    let waiting = Rc::new(Cell::new(true));
    let result = Rc::new(RefCell::new(None));

    let on_success: OnSuccess = {
        let (waiting, result) = (waiting.clone(), result.clone());
        Box::new(move |response| settle(&waiting, &result, response.into()))
    };
    let on_failure: OnFailure = {
        let (waiting, result) = (waiting.clone(), result.clone());
        Box::new(move |reason| settle(&waiting, &result, CallbackResult::failure(reason)))
    };
    op.issue(args, on_success, on_failure);

    while waiting.get() {
        yield_now().await;
    }

    let settled = result.borrow_mut().take();
    settled.unwrap_or_else(|| CallbackResult::failure("operation settled without a result"))
}

/// First callback wins
fn settle(waiting: &Cell<bool>, result: &RefCell<Option<CallbackResult>>, value: CallbackResult) {
    if waiting.get() {
        *result.borrow_mut() = Some(value);
        waiting.set(false);
    }
}

/// Wrap an operation as a task factory: `adapt(..).start(args)` then join
pub fn adapt<Op: CallbackOperation>(
    scheduler: &Scheduler,
    op: Op,
) -> TaskFactory<Op::Args, CallbackResult> {
    let op = Rc::new(op);
    scheduler.task(move |args: Op::Args| {
        let op = op.clone();
        async move { invoke(&*op, args).await }
    })
}
