//! Endpoint groups: one shared channel, `parallelism` sessions.
//!
//! A group has no state of its own once launched. Its scope (owned by the
//! discovery registry) governs the connection attempt and every session, and
//! the [`SessionTracker`] accounts for all of them.
//!
//! A failed dial is logged and leaves the group without sessions. It is not
//! retried: the address stays registered until discovery removes it.

use super::tracker::SessionTracker;
use crate::config::{GrpcClientConfig, WorkerConfig};
use crate::telemetry::increment_connect_errors;
use crate::worker::{backoff::Backoff, streaming::session::Session};
use qf_worker_core::{Error, Result, proto::dispatcher_client::DispatcherClient};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};

/// Starts the group for `addr` in the background.
pub fn launch(
    addr: String,
    scope: CancellationToken,
    config: Arc<WorkerConfig>,
    tracker: &SessionTracker,
) {
    let sessions = tracker.clone();
    tracker.spawn(async move {
        let connected = tokio::select! {
            biased;
            () = scope.cancelled() => return,
            res = connect(&addr, &config.grpc_client) => res,
        };

        let channel = match connected {
            Ok(channel) => channel,
            Err(e) => {
                tracing::error!(%addr, error = %e, "error connecting to dispatcher");
                increment_connect_errors();
                return;
            }
        };

        tracing::info!(
            %addr,
            "connected to dispatcher, starting {} sessions",
            config.parallelism
        );
        let addr: Arc<str> = Arc::from(addr);
        for id in 0..config.parallelism {
            let session = Session::new(
                Arc::clone(&addr),
                id,
                client(channel.clone(), &config.grpc_client),
                Backoff::new(scope.clone(), config.backoff),
            );
            sessions.spawn_session(session.run());
        }
    });
}

/// Dials `addr` once, applying the connection tuning.
pub async fn connect(addr: &str, grpc: &GrpcClientConfig) -> Result<Channel> {
    let endpoint = Endpoint::from_shared(format!("http://{addr}"))
        .map_err(|e| Error::InvalidAddress {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?
        .connect_timeout(grpc.connect_timeout)
        .tcp_nodelay(true);

    Ok(endpoint.connect().await?)
}

/// A dispatcher client on the shared `channel`.
pub fn client(channel: Channel, grpc: &GrpcClientConfig) -> DispatcherClient<Channel> {
    let client = DispatcherClient::new(channel)
        .max_decoding_message_size(grpc.max_recv_msg_size)
        .max_encoding_message_size(grpc.max_send_msg_size);

    match grpc.compression.encoding() {
        Some(encoding) => client.send_compressed(encoding).accept_compressed(encoding),
        None => client,
    }
}
