use crate::worker::backoff::BackoffConfig;
use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use qf_worker_core::Error;
use tonic::codec::CompressionEncoding;

/// Default maximum size of a single gRPC message, in both directions.
pub const DEFAULT_MAX_MSG_SIZE: usize = 10 * 1024 * 1024;

/// Runtime configuration for the `qf-worker` binary.
///
/// Every flag can also be given through the environment variable named next
/// to it, or through a `.env` file in the working directory.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "qf-worker",
    version,
    about = "Pulls work from dynamically discovered dispatchers over gRPC streams"
)]
pub struct CliArgs {
    /// Dispatcher address or DNS name to discover dispatchers from, as
    /// `host:port`. An empty value disables the worker.
    ///
    /// Environment variable: `FRONTEND_ADDRESS`
    #[arg(long, env = "FRONTEND_ADDRESS", default_value_t = String::from("localhost:9095"))]
    pub frontend_address: String,

    /// Number of concurrent stream sessions opened against every discovered
    /// dispatcher.
    ///
    /// Environment variable: `PARALLELISM`
    #[arg(long, env = "PARALLELISM", default_value_t = 10)]
    pub parallelism: usize,

    /// Seconds between two DNS lookups of the frontend address.
    ///
    /// Environment variable: `DNS_LOOKUP_PERIOD_SECS`
    #[arg(long, env = "DNS_LOOKUP_PERIOD_SECS", default_value_t = 10)]
    pub dns_lookup_period_secs: u64,

    /// Largest gRPC message accepted from a dispatcher, in bytes.
    ///
    /// Environment variable: `GRPC_MAX_RECV_MSG_SIZE`
    #[arg(long, env = "GRPC_MAX_RECV_MSG_SIZE", default_value_t = DEFAULT_MAX_MSG_SIZE)]
    pub grpc_max_recv_msg_size: usize,

    /// Largest gRPC message sent to a dispatcher, in bytes.
    ///
    /// Environment variable: `GRPC_MAX_SEND_MSG_SIZE`
    #[arg(long, env = "GRPC_MAX_SEND_MSG_SIZE", default_value_t = DEFAULT_MAX_MSG_SIZE)]
    pub grpc_max_send_msg_size: usize,

    /// Milliseconds allowed for dialing a dispatcher.
    ///
    /// Environment variable: `GRPC_CONNECT_TIMEOUT_MS`
    #[arg(long, env = "GRPC_CONNECT_TIMEOUT_MS", default_value_t = 5_000)]
    pub grpc_connect_timeout_ms: u64,

    /// Compression applied to results sent, and accepted on items received.
    ///
    /// Environment variable: `GRPC_COMPRESSION`
    #[arg(long, env = "GRPC_COMPRESSION", value_enum, default_value_t = Compression::None)]
    pub grpc_compression: Compression,

    /// First delay, in milliseconds, before a failed stream is reopened.
    ///
    /// Environment variable: `MIN_BACKOFF_MS`
    #[arg(long, env = "MIN_BACKOFF_MS", default_value_t = 50)]
    pub min_backoff_ms: u64,

    /// Upper bound, in milliseconds, of the reopen delay.
    ///
    /// Environment variable: `MAX_BACKOFF_MS`
    #[arg(long, env = "MAX_BACKOFF_MS", default_value_t = 1_000)]
    pub max_backoff_ms: u64,

    /// Consecutive failed reopen attempts after which a session gives up.
    /// `0` retries for as long as the dispatcher is known.
    ///
    /// Environment variable: `MAX_RETRIES`
    #[arg(long, env = "MAX_RETRIES", default_value_t = 0)]
    pub max_retries: u32,

    /// Seconds to wait for running sessions to finish after a shutdown signal.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 30)]
    pub shutdown_timeout_secs: u64,
}

/// gRPC compression applied to every dispatcher client.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zstd,
}

impl Compression {
    pub const fn encoding(self) -> Option<CompressionEncoding> {
        match self {
            Self::None => None,
            Self::Gzip => Some(CompressionEncoding::Gzip),
            Self::Zstd => Some(CompressionEncoding::Zstd),
        }
    }
}

/// Connection tuning shared by every client built on an endpoint channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrpcClientConfig {
    pub max_recv_msg_size: usize,
    pub max_send_msg_size: usize,
    pub connect_timeout: Duration,
    pub compression: Compression,
}

impl Default for GrpcClientConfig {
    fn default() -> Self {
        Self {
            max_recv_msg_size: DEFAULT_MAX_MSG_SIZE,
            max_send_msg_size: DEFAULT_MAX_MSG_SIZE,
            connect_timeout: Duration::from_secs(5),
            compression: Compression::None,
        }
    }
}

/// Worker configuration. Immutable once handed to a
/// [`Worker`](crate::worker::Worker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Dispatcher address or discovery name. Empty disables the worker.
    pub frontend_address: String,
    /// Sessions per discovered endpoint.
    pub parallelism: usize,
    /// Interval between two resolutions of `frontend_address`.
    pub dns_lookup_period: Duration,
    pub grpc_client: GrpcClientConfig,
    pub backoff: BackoffConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            frontend_address: String::new(),
            parallelism: 10,
            dns_lookup_period: Duration::from_secs(10),
            grpc_client: GrpcClientConfig::default(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// A default configuration pointed at `frontend_address`.
    pub fn new(frontend_address: impl Into<String>) -> Self {
        Self {
            frontend_address: frontend_address.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> qf_worker_core::Result<()> {
        let invalid = |reason: &str| {
            Err(Error::InvalidConfig {
                reason: reason.to_string(),
            })
        };

        if self.parallelism == 0 {
            return invalid("parallelism must be greater than 0");
        }
        if self.dns_lookup_period.is_zero() {
            return invalid("DNS lookup period must be greater than 0");
        }
        if self.grpc_client.max_recv_msg_size == 0 || self.grpc_client.max_send_msg_size == 0 {
            return invalid("gRPC message size limits must be greater than 0");
        }
        if self.backoff.min_backoff > self.backoff.max_backoff {
            return invalid("min backoff must not exceed max backoff");
        }
        Ok(())
    }
}

impl TryFrom<CliArgs> for WorkerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.parallelism == 0 {
            bail!("PARALLELISM must be greater than 0");
        }

        if args.dns_lookup_period_secs == 0 {
            bail!("DNS_LOOKUP_PERIOD_SECS must be greater than 0");
        }

        if args.min_backoff_ms > args.max_backoff_ms {
            bail!(
                "MIN_BACKOFF_MS ({}) exceeds MAX_BACKOFF_MS ({})",
                args.min_backoff_ms,
                args.max_backoff_ms
            );
        }

        let config = Self {
            frontend_address: args.frontend_address.trim().to_string(),
            parallelism: args.parallelism,
            dns_lookup_period: Duration::from_secs(args.dns_lookup_period_secs),
            grpc_client: GrpcClientConfig {
                max_recv_msg_size: args.grpc_max_recv_msg_size,
                max_send_msg_size: args.grpc_max_send_msg_size,
                connect_timeout: Duration::from_millis(args.grpc_connect_timeout_ms),
                compression: args.grpc_compression,
            },
            backoff: BackoffConfig {
                min_backoff: Duration::from_millis(args.min_backoff_ms),
                max_backoff: Duration::from_millis(args.max_backoff_ms),
                max_retries: args.max_retries,
            },
        };
        config.validate()?;
        Ok(config)
    }
}
