//! Error types for the dispatcher worker.
//!
//! This module defines the central `Error` enum, which captures every failure
//! the worker can observe, from resolving dispatcher endpoints down to a
//! single stream receive. Most of them are recovered locally (logged and
//! retried); only discovery failures leave the worker.
//!
//! ## Error Cases
//! - `Transport`: dialing a dispatcher endpoint failed.
//! - `Status`: opening or reading a `Process` stream failed.
//! - `InvalidAddress` / `InvalidTarget`: an endpoint or discovery target
//!   could not be parsed.
//! - `StreamClosed`: the dispatcher ended the stream.
//! - `WatcherClosed`: the resolution source was closed or ran dry.
//! - `UnknownOp`: a resolution update carried an unsupported operation.
//! - `Cancelled` / `RetriesExhausted`: why a backoff loop stopped.
//! - `InvalidConfig`: the worker configuration was rejected.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the dispatcher worker.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Dialing the dispatcher failed.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The dispatcher rejected or broke a `Process` stream.
    #[error("Stream error: {0}")]
    Status(#[from] Status),

    /// An endpoint address could not be turned into a URI.
    #[error("Invalid address {addr}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    /// A discovery target could not be parsed as `host:port`.
    #[error("Invalid target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    /// The dispatcher closed the stream.
    #[error("Stream closed by dispatcher")]
    StreamClosed,

    /// The resolution source was closed or exhausted.
    #[error("Resolution watcher closed")]
    WatcherClosed,

    /// A resolution update carried an operation the worker does not know.
    #[error("Unknown update op: {0}")]
    UnknownOp(u32),

    /// The governing scope was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// A bounded backoff ran out of attempts.
    #[error("Terminated after {retries} retries")]
    RetriesExhausted { retries: u32 },

    /// The worker configuration is invalid.
    #[error("Invalid config: {reason}")]
    InvalidConfig { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_converts_with_its_code() {
        let err: Error = Status::unavailable("draining").into();
        match err {
            Error::Status(status) => assert_eq!(status.code(), tonic::Code::Unavailable),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn display_includes_context() {
        let err = Error::InvalidTarget {
            target: "dispatcher".to_string(),
            reason: "missing port".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid target dispatcher: missing port");
    }
}
