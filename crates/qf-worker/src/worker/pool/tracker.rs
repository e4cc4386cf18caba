//! Shared accounting for every task the worker spawns.
//!
//! [`SessionTracker`] is the worker's wait-group. Connection setup tasks and
//! stream sessions of every endpoint group are spawned through it, so
//! [`SessionTracker::wait`] only returns once all of them have exited. It is
//! the only state touched across group and session boundaries.
//!
//! Sessions are additionally counted in a live gauge. The count is taken
//! before the task is spawned and released by a guard owned by the task, so
//! it drops on every exit path, including a panic unwinding the session.

use crate::telemetry::{decrement_sessions_active, increment_sessions_active};
use core::future::Future;
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::task::TaskTracker;

#[derive(Clone, Default)]
pub struct SessionTracker {
    tasks: TaskTracker,
    live: Arc<AtomicUsize>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a tracked helper task (e.g. per-address connection setup).
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Spawns a tracked stream session and counts it as live until it exits.
    pub fn spawn_session<F>(&self, session: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = LiveGuard::enter(Arc::clone(&self.live));
        self.tasks.spawn(async move {
            let _guard = guard;
            session.await;
        });
    }

    /// Number of sessions currently running, across all endpoints.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Number of tracked tasks (sessions and setup tasks) still running.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether every tracked task has exited.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Blocks until every tracked task has exited.
    ///
    /// Meant to be called once discovery has stopped: tasks spawned after
    /// this point are still waited for.
    pub async fn wait(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}

struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn enter(live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::AcqRel);
        increment_sessions_active();
        Self(live)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
        decrement_sessions_active();
    }
}
