//! Receive, work, acknowledge.
//!
//! A [`WorkStream`] handles one open `Process` stream strictly in order: the
//! next item is not received before the previous one was acknowledged. Every
//! suspension point (receive, simulated work, send) yields to the scope.

use crate::telemetry::record_work_item;
use qf_worker_core::{
    Error, Result,
    proto::{WorkItem, WorkResult},
};
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;
use tonic::Streaming;

pub struct WorkStream {
    inbound: Streaming<WorkItem>,
    outbound: mpsc::Sender<WorkResult>,
}

impl WorkStream {
    pub const fn new(inbound: Streaming<WorkItem>, outbound: mpsc::Sender<WorkResult>) -> Self {
        Self { inbound, outbound }
    }

    /// Processes items until the stream breaks or `scope` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamClosed`] when the dispatcher ends the stream and
    /// [`Error::Status`] when receiving fails. Returns `Ok` only on
    /// cancellation.
    pub async fn process(&mut self, scope: &CancellationToken) -> Result<()> {
        loop {
            let item = tokio::select! {
                biased;
                () = scope.cancelled() => return Ok(()),
                msg = self.inbound.message() => msg?.ok_or(Error::StreamClosed)?,
            };

            let delay = item.simulated_delay();
            let start = Instant::now();
            tokio::select! {
                biased;
                () = scope.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
            tracing::debug!(?delay, "did work");

            let sent = tokio::select! {
                biased;
                () = scope.cancelled() => return Ok(()),
                res = self.outbound.send(WorkResult::ack()) => res,
            };
            // The dispatcher decides whether the stream is still healthy.
            if let Err(e) = sent {
                tracing::warn!(error = %e, "error sending result");
            }

            record_work_item(start.elapsed().as_secs_f64() * 1000.0);
        }
    }
}
