use clap::Parser;
use core::time::Duration;
use qf_worker::{
    CliArgs, Worker, WorkerConfig,
    telemetry::{init_telemetry, shutdown_telemetry},
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let shutdown_timeout = Duration::from_secs(args.shutdown_timeout_secs);
    let config = WorkerConfig::try_from(args)?;

    let providers = init_telemetry()?;
    let worker = Worker::new(config)?;
    log_startup_info(worker.config());
    let scope = CancellationToken::new();

    let mut discovery = tokio::spawn({
        let worker = worker.clone();
        let scope = scope.clone();
        async move { worker.watch(scope).await }
    });

    let res = tokio::select! {
        () = shutdown_signal() => {
            tracing::info!("Shutdown signal received, terminating gracefully...");
            scope.cancel();
            (&mut discovery).await
        }
        res = &mut discovery, if worker.is_enabled() => {
            scope.cancel();
            res
        }
    };

    if tokio::time::timeout(shutdown_timeout, worker.stopping())
        .await
        .is_err()
    {
        tracing::warn!(
            pending_tasks = worker.pending_tasks(),
            "Graceful drain timed out ({} sessions still active)",
            worker.live_sessions()
        );
    } else {
        tracing::info!("All sessions drained");
    }

    shutdown_telemetry(providers);

    match res {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            tracing::error!("Discovery failed: {e}");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn log_startup_info(config: &WorkerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting worker with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting worker for {:?} with {} sessions per dispatcher",
            config.frontend_address,
            config.parallelism
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl+C signal"),
            Err(e) => {
                tracing::error!("failed to install Ctrl+C handler: {e}");
                core::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
