//! Types shared by the worker and any dispatcher speaking the `dispatch`
//! protocol.
//!
//! - [`error`] - the unified [`Error`] type.
//! - [`types`] - work item delay parsing and the fixed acknowledgement.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ACK_BODY, DEFAULT_WORK_DELAY};
