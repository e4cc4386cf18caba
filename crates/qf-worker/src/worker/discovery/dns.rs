//! DNS-backed [`Watcher`] for a `host:port` target.
//!
//! An IP-literal target is reported once and never changes. A host name is
//! resolved on the first call to [`Watcher::next`] and then every lookup
//! period; each call returns the difference against the previous resolution,
//! ordered by address. A failed or empty lookup is logged and keeps the
//! previous set, so a flapping resolver does not tear down healthy groups.

use super::watcher::{Op, Update, Watcher};
use core::time::Duration;
use qf_worker_core::{Error, Result};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Ip(SocketAddr),
    Host { host: String, port: u16 },
}

impl Target {
    fn parse(target: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidTarget {
            target: target.to_string(),
            reason: reason.to_string(),
        };

        let target = target.trim();
        if target.is_empty() {
            return Err(invalid("empty target"));
        }
        if let Ok(addr) = target.parse::<SocketAddr>() {
            return Ok(Self::Ip(addr));
        }

        let (host, port) = target
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing port"))?;
        if host.is_empty() || host.contains(':') {
            return Err(invalid("malformed host"));
        }
        let port = port.parse().map_err(|_| invalid("invalid port"))?;
        Ok(Self::Host {
            host: host.to_string(),
            port,
        })
    }
}

#[derive(Debug, Default)]
struct State {
    started: bool,
    known: BTreeSet<SocketAddr>,
}

#[derive(Debug)]
pub struct DnsWatcher {
    target: Target,
    period: Duration,
    state: Mutex<State>,
    closed: CancellationToken,
}

impl DnsWatcher {
    /// Watches `target` (`host:port` or `ip:port`), re-resolving host names
    /// every `period`.
    pub fn new(target: &str, period: Duration) -> Result<Self> {
        Ok(Self {
            target: Target::parse(target)?,
            period,
            state: Mutex::new(State::default()),
            closed: CancellationToken::new(),
        })
    }

    async fn lookup(host: &str, port: u16) -> Option<BTreeSet<SocketAddr>> {
        match tokio::net::lookup_host((host, port)).await {
            Ok(addrs) => {
                let addrs: BTreeSet<_> = addrs.collect();
                if addrs.is_empty() {
                    tracing::warn!("DNS lookup of {host}:{port} returned no addresses");
                    None
                } else {
                    tracing::debug!("DNS lookup of {host}:{port} returned {addrs:?}");
                    Some(addrs)
                }
            }
            Err(e) => {
                tracing::warn!("DNS lookup of {host}:{port} failed: {e}");
                None
            }
        }
    }
}

/// Changes turning `known` into `fresh`, ordered by address.
fn diff(known: &BTreeSet<SocketAddr>, fresh: &BTreeSet<SocketAddr>) -> Vec<Update> {
    let mut changes: Vec<(SocketAddr, Op)> = known
        .difference(fresh)
        .map(|addr| (*addr, Op::Delete))
        .chain(fresh.difference(known).map(|addr| (*addr, Op::Add)))
        .collect();
    changes.sort_by_key(|(addr, _)| *addr);
    changes
        .into_iter()
        .map(|(addr, op)| Update {
            op,
            addr: addr.to_string(),
        })
        .collect()
}

impl Watcher for DnsWatcher {
    async fn next(&self) -> Result<Vec<Update>> {
        let mut state = tokio::select! {
            biased;
            () = self.closed.cancelled() => return Err(Error::WatcherClosed),
            guard = self.state.lock() => guard,
        };

        match &self.target {
            Target::Ip(addr) => {
                if !state.started {
                    state.started = true;
                    state.known.insert(*addr);
                    return Ok(vec![Update::add(addr.to_string())]);
                }
                self.closed.cancelled().await;
                Err(Error::WatcherClosed)
            }
            Target::Host { host, port } => loop {
                if state.started {
                    tokio::select! {
                        biased;
                        () = self.closed.cancelled() => return Err(Error::WatcherClosed),
                        () = tokio::time::sleep(self.period) => {}
                    }
                }
                state.started = true;

                let fresh = tokio::select! {
                    biased;
                    () = self.closed.cancelled() => return Err(Error::WatcherClosed),
                    fresh = Self::lookup(host, *port) => fresh,
                };
                let Some(fresh) = fresh else {
                    continue;
                };

                let updates = diff(&state.known, &fresh);
                state.known = fresh;
                if !updates.is_empty() {
                    return Ok(updates);
                }
            },
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }
}
