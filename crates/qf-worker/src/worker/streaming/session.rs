//! One stream-processing loop against a dispatcher.
//!
//! ```text
//!        +------------+  open ok   +-----------+
//!   +--> | Connecting | ---------> | Streaming | <-> Processing / Responding
//!   |    +------------+            +-----------+
//!   |          | open failed             | receive failed / stream closed
//!   |          v                         v
//!   +------------------ Backoff <--------+
//!
//!   scope cancelled or retries exhausted (any state) -> Stopped
//! ```
//!
//! Sessions never re-dial: they open streams on the channel shared by their
//! group. The backoff is reset after every successful open.

use super::processor::WorkStream;
use crate::telemetry::increment_stream_errors;
use crate::worker::backoff::Backoff;
use qf_worker_core::{
    Error,
    proto::{WorkResult, dispatcher_client::DispatcherClient},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;

pub struct Session {
    addr: Arc<str>,
    id: usize,
    client: DispatcherClient<Channel>,
    backoff: Backoff,
}

impl Session {
    pub const fn new(
        addr: Arc<str>,
        id: usize,
        client: DispatcherClient<Channel>,
        backoff: Backoff,
    ) -> Self {
        Self {
            addr,
            id,
            client,
            backoff,
        }
    }

    pub async fn run(mut self) {
        let scope = self.backoff.scope().clone();

        while self.backoff.ongoing() {
            let (tx, rx) = mpsc::channel::<WorkResult>(1);
            let opened = tokio::select! {
                biased;
                () = scope.cancelled() => break,
                res = self.client.process(ReceiverStream::new(rx)) => res,
            };

            let inbound = match opened {
                Ok(response) => response.into_inner(),
                Err(status) => {
                    tracing::warn!(
                        addr = %self.addr,
                        session = self.id,
                        error = %status,
                        "error contacting dispatcher"
                    );
                    increment_stream_errors();
                    self.backoff.wait().await;
                    continue;
                }
            };
            self.backoff.reset();

            match WorkStream::new(inbound, tx).process(&scope).await {
                Ok(()) => break,
                Err(e) => {
                    tracing::warn!(
                        addr = %self.addr,
                        session = self.id,
                        error = %e,
                        "error processing requests"
                    );
                    increment_stream_errors();
                    self.backoff.wait().await;
                }
            }
        }

        match self.backoff.err() {
            Some(Error::RetriesExhausted { retries }) => tracing::warn!(
                addr = %self.addr,
                session = self.id,
                "session gave up after {retries} retries"
            ),
            _ => tracing::debug!(addr = %self.addr, session = self.id, "session stopped"),
        }
    }
}
