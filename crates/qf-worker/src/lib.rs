#![doc = include_str!("../README.md")]

pub mod config;
pub mod telemetry;
pub mod worker;

pub use config::{CliArgs, Compression, GrpcClientConfig, WorkerConfig};
pub use worker::{
    Worker,
    backoff::{Backoff, BackoffConfig},
    discovery::{ChannelWatcher, DnsWatcher, Update, watcher::Op, watcher::Watcher},
};
