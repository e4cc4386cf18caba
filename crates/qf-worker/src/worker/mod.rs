//! The worker lifecycle.
//!
//! ```text
//! root scope ─ discovery ─┬─ addr scope ─ connect ─┬─ session 0
//!                         │                        ├─ ...
//!                         │                        └─ session N-1
//!                         └─ addr scope ─ ...
//! ```
//!
//! [`Worker::watch`] runs discovery under the scope it is given. Every task
//! started beneath it is registered with one shared [`SessionTracker`], so
//! once that scope is cancelled [`Worker::stopping`] returns as soon as the
//! last of them has exited.

pub mod backoff;
pub mod discovery;
pub mod pool;
pub mod streaming;

use crate::config::WorkerConfig;
use discovery::{DnsWatcher, watcher::Watcher};
use pool::SessionTracker;
use qf_worker_core::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Pulls work from every dispatcher its watcher reports.
///
/// Cloning is cheap: clones share the configuration, the watcher and the
/// session accounting, so one clone can run [`Worker::watch`] while another
/// waits in [`Worker::stopping`].
pub struct Worker<W = DnsWatcher> {
    config: Arc<WorkerConfig>,
    watcher: Option<Arc<W>>,
    sessions: SessionTracker,
}

impl<W> Clone for Worker<W> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            watcher: self.watcher.clone(),
            sessions: self.sessions.clone(),
        }
    }
}

impl Worker<DnsWatcher> {
    /// Builds a worker discovering dispatchers through DNS.
    ///
    /// An empty `frontend_address` yields a disabled worker, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`](qf_worker_core::Error::InvalidConfig)
    /// or [`Error::InvalidTarget`](qf_worker_core::Error::InvalidTarget) for
    /// a configuration that cannot be run.
    pub fn new(config: WorkerConfig) -> Result<Self> {
        if config.frontend_address.is_empty() {
            tracing::info!("no address specified, not starting worker");
            return Ok(Self::disabled(config));
        }

        let watcher = DnsWatcher::new(&config.frontend_address, config.dns_lookup_period)?;
        Self::with_watcher(config, watcher)
    }
}

impl<W: Watcher> Worker<W> {
    /// Builds a worker fed by a custom resolution source.
    pub fn with_watcher(config: WorkerConfig, watcher: W) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            watcher: Some(Arc::new(watcher)),
            sessions: SessionTracker::new(),
        })
    }

    /// A worker that never discovers anything or starts any session.
    pub fn disabled(config: WorkerConfig) -> Self {
        Self {
            config: Arc::new(config),
            watcher: None,
            sessions: SessionTracker::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.watcher.is_some()
    }

    /// The validated configuration this worker runs with.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Runs discovery until `scope` is cancelled.
    ///
    /// Returns immediately for a disabled worker.
    ///
    /// # Errors
    ///
    /// Returns the discovery failure when the resolution source breaks for a
    /// reason other than cancellation, or reports an unknown update kind.
    pub async fn watch(&self, scope: CancellationToken) -> Result<()> {
        let Some(watcher) = &self.watcher else {
            return Ok(());
        };

        tracing::info!(
            "discovering dispatchers at {} with {} sessions each",
            self.config.frontend_address,
            self.config.parallelism
        );

        let config = Arc::clone(&self.config);
        let sessions = self.sessions.clone();
        discovery::run(Arc::clone(watcher), scope, move |addr, group_scope| {
            pool::group::launch(addr, group_scope, Arc::clone(&config), &sessions);
        })
        .await
    }

    /// Waits until every session and connection task has exited.
    ///
    /// Only meaningful once the scope given to [`Worker::watch`] is
    /// cancelled or discovery has failed.
    pub async fn stopping(&self) {
        self.sessions.wait().await;
    }

    /// Sessions currently running, across all endpoints.
    pub fn live_sessions(&self) -> usize {
        self.sessions.live()
    }

    /// Sessions and connection tasks that have not exited yet.
    pub fn pending_tasks(&self) -> usize {
        self.sessions.len()
    }
}
