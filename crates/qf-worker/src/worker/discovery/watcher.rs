//! Resolution sources feeding the discovery loop.
//!
//! A [`Watcher`] is pulled, not pushed: [`Watcher::next`] blocks until the
//! next batch of endpoint changes is available, and [`Watcher::close`] makes
//! any pending or future call return [`Error::WatcherClosed`].

use core::future::Future;
use qf_worker_core::{Error, Result};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Kind of change carried by an [`Update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Delete,
    /// An operation this worker does not understand, by its raw code.
    Other(u32),
}

/// A single endpoint change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub op: Op,
    pub addr: String,
}

impl Update {
    pub fn add(addr: impl Into<String>) -> Self {
        Self {
            op: Op::Add,
            addr: addr.into(),
        }
    }

    pub fn delete(addr: impl Into<String>) -> Self {
        Self {
            op: Op::Delete,
            addr: addr.into(),
        }
    }
}

/// A pull-based source of endpoint updates.
pub trait Watcher: Send + Sync + 'static {
    /// Waits for the next batch of updates.
    ///
    /// Returns [`Error::WatcherClosed`] once [`Watcher::close`] was called or
    /// the source ran dry. Any other error is a resolution failure.
    fn next(&self) -> impl Future<Output = Result<Vec<Update>>> + Send;

    /// Unblocks a pending [`Watcher::next`]. Idempotent.
    fn close(&self);
}

/// A [`Watcher`] fed by an in-process channel.
///
/// Lets an embedder plug its own discovery into the worker. Dropping every
/// sender exhausts the watcher.
#[derive(Debug)]
pub struct ChannelWatcher {
    updates: Mutex<mpsc::Receiver<Vec<Update>>>,
    closed: CancellationToken,
}

impl ChannelWatcher {
    pub fn new(buffer: usize) -> (Self, mpsc::Sender<Vec<Update>>) {
        let (tx, rx) = mpsc::channel(buffer);
        let watcher = Self {
            updates: Mutex::new(rx),
            closed: CancellationToken::new(),
        };
        (watcher, tx)
    }
}

impl Watcher for ChannelWatcher {
    async fn next(&self) -> Result<Vec<Update>> {
        if self.closed.is_cancelled() {
            return Err(Error::WatcherClosed);
        }

        let mut updates = tokio::select! {
            biased;
            () = self.closed.cancelled() => return Err(Error::WatcherClosed),
            guard = self.updates.lock() => guard,
        };

        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(Error::WatcherClosed),
            batch = updates.recv() => batch.ok_or(Error::WatcherClosed),
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }
}
