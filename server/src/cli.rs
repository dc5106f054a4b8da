use std::net::SocketAddr;

use clap::{Parser, ValueEnum};
use log::LevelFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// Sets a socket address to listen on
    #[arg(short, long, value_name = "[ADDRESS[:PORT]]", default_value_t = SocketAddr::from(([127, 0, 0, 1], 42000)))]
    pub(crate) listen: SocketAddr,

    /// Address of a node in the ring to join
    #[arg(short, long, value_name = "[ADDRESS[:PORT]]")]
    pub(crate) ring: Option<SocketAddr>,

    /// Set the log level
    #[arg(short('L'), long, value_name = "LEVEL", value_enum, default_value_t = LogLevel::Info)]
    pub(crate) log_level: LogLevel,

    /// Seconds between metrics snapshots in the log
    #[arg(long, value_name = "SECONDS", default_value = "10")]
    pub(crate) metrics_interval: u64,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub(crate) enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}
