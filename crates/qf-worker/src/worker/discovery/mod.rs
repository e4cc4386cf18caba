//! Turns a stream of resolution updates into endpoint group lifecycles.
//!
//! [`run`] owns the registry of known endpoints: one child scope of the
//! discovery scope per address. Only the loop task touches it, so it is a
//! plain `HashMap`. An `Add` for a known address is ignored, a `Delete`
//! cancels and forgets the address scope, and the loop never waits on the
//! groups it launches.
//!
//! When the discovery scope is cancelled, a companion task closes the watcher
//! so the pending [`Watcher::next`] returns. Such a closure ends the loop
//! cleanly; any other watcher error, or an unknown update kind, is returned.
//! Whichever way the loop exits, every registered scope is cancelled.

pub mod dns;
pub mod watcher;

use crate::telemetry::{decrement_endpoints_active, increment_endpoints_active};
use qf_worker_core::{Error, Result};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio_util::{sync::CancellationToken, task::AbortOnDropHandle};
use watcher::{Op, Watcher};

pub use dns::DnsWatcher;
pub use watcher::{ChannelWatcher, Update};

/// Runs discovery until `scope` is cancelled or the watcher fails.
///
/// `launch` is called once per newly known address with the scope governing
/// that address's group.
pub async fn run<W, F>(watcher: Arc<W>, scope: CancellationToken, mut launch: F) -> Result<()>
where
    W: Watcher,
    F: FnMut(String, CancellationToken),
{
    let _closer = AbortOnDropHandle::new(tokio::spawn({
        let watcher = Arc::clone(&watcher);
        let scope = scope.clone();
        async move {
            scope.cancelled().await;
            watcher.close();
        }
    }));

    let mut groups: HashMap<String, CancellationToken> = HashMap::new();

    let res = 'discovery: loop {
        let updates = match watcher.next().await {
            Ok(updates) => updates,
            Err(_) if scope.is_cancelled() => break Ok(()),
            Err(e) => break Err(e),
        };

        for update in updates {
            match update.op {
                Op::Add => {
                    if let Entry::Vacant(entry) = groups.entry(update.addr) {
                        let group_scope = scope.child_token();
                        tracing::debug!(addr = %entry.key(), "adding dispatcher endpoint");
                        increment_endpoints_active();
                        launch(entry.key().clone(), group_scope.clone());
                        entry.insert(group_scope);
                    }
                }
                Op::Delete => {
                    if let Some(group_scope) = groups.remove(&update.addr) {
                        tracing::debug!(addr = %update.addr, "removing dispatcher endpoint");
                        group_scope.cancel();
                        decrement_endpoints_active();
                    }
                }
                Op::Other(code) => break 'discovery Err(Error::UnknownOp(code)),
            }
        }
    };

    for (addr, group_scope) in groups.drain() {
        tracing::debug!(%addr, "stopping dispatcher endpoint");
        group_scope.cancel();
        decrement_endpoints_active();
    }

    res
}
