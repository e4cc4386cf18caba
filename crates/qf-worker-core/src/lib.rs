#![doc = include_str!("../README.md")]

mod common;
pub use common::*;

/// gRPC service and message definitions for the `dispatch` package.
///
/// ## Service
///
/// - `Dispatcher::Process` - a bidirectional stream. The dispatcher pushes
///   [`WorkItem`](proto::WorkItem)s, the worker answers each one with a
///   [`WorkResult`](proto::WorkResult) on the same stream.
///
/// Both `body` fields are decoded as [`bytes::Bytes`].
pub mod proto {
    tonic::include_proto!("dispatch");
}
