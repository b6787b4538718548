//! Crate error types
//!
//! Operation failures inside adapters are data (a status 400
//! [`CallbackResult`](crate::kernel::CallbackResult)), not errors. What is left
//! here is configuration trouble and faulted tasks surfaced through `?`.

use crate::kernel::TaskFault;

/// Crate result type
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration text could not be parsed
    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),
    /// Quota fraction outside `0..=1`
    #[error("quota percent {0} outside 0..=1")]
    InvalidQuota(f64),
    /// A task panicked during a resume step
    #[error(transparent)]
    Fault(#[from] TaskFault),
}
