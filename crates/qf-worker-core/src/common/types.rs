//! # Work item helpers
//!
//! The dispatcher does not describe the work it hands out: a [`WorkItem`]
//! body is read as a decimal number of milliseconds the worker must spend on
//! it. Every item is answered with the same [`WorkResult`], an `OK` status
//! carrying [`ACK_BODY`].
//!
//! ## Delay parsing
//!
//! - The body is decoded as UTF-8 and parsed as a signed decimal integer, an
//!   optional leading `+` or `-` included.
//! - Anything else (empty body, `abc`, whitespace, overflow) falls back to
//!   [`DEFAULT_WORK_DELAY`].
//! - A negative value is a zero delay.

use crate::proto::{ResultStatus, WorkItem, WorkResult};
use bytes::Bytes;
use core::time::Duration;

/// Delay used when a work item body is not a valid integer.
pub const DEFAULT_WORK_DELAY: Duration = Duration::from_millis(100);

/// Body of every acknowledgement sent back to the dispatcher.
pub const ACK_BODY: &[u8] = b"ok";

/// Reads the simulated processing delay carried by a work item body.
pub fn parse_delay(body: &[u8]) -> Duration {
    core::str::from_utf8(body)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .map_or(DEFAULT_WORK_DELAY, |millis| {
            Duration::from_millis(millis.max(0).unsigned_abs())
        })
}

impl WorkItem {
    /// Builds an item asking the worker to spend `millis` milliseconds on it.
    pub fn with_delay_ms(millis: u64) -> Self {
        Self {
            body: Bytes::from(millis.to_string()),
        }
    }

    /// The processing delay this item asks for.
    pub fn simulated_delay(&self) -> Duration {
        parse_delay(&self.body)
    }
}

impl WorkResult {
    /// The acknowledgement sent after a successfully processed item.
    pub fn ack() -> Self {
        Self {
            status: ResultStatus::Ok as i32,
            body: Bytes::from_static(ACK_BODY),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status() == ResultStatus::Ok
    }
}
