use std::{
    fs::read_to_string,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    str::FromStr,
};

use anyhow::{Result, ensure};
use clap::Parser;
use serde::Deserialize;

use crate::slots::MAX_CLIENTS;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Server {
    ///
    /// Maximum number of connections served at the same time.
    ///
    /// Connections accepted while every slot is taken are closed
    /// immediately.
    ///
    #[serde(default = "Server::max_clients")]
    pub max_clients: usize,
    ///
    /// Size of the buffer used for a single read on a connection.
    ///
    #[serde(default = "Server::buffer_size")]
    pub buffer_size: usize,
    ///
    /// Length of the pending connection queue of the listening socket.
    ///
    #[serde(default = "Server::backlog")]
    pub backlog: u32,
    ///
    /// Idle timeout
    ///
    /// If nothing is received within the specified number of seconds, the
    /// connection is closed and reported as failed. Zero disables the
    /// timeout.
    ///
    #[serde(default)]
    pub idle_timeout: u32,
}

impl Server {
    fn max_clients() -> usize {
        MAX_CLIENTS
    }

    fn buffer_size() -> usize {
        1024
    }

    fn backlog() -> u32 {
        3
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            max_clients: Self::max_clients(),
            buffer_size: Self::buffer_size(),
            backlog: Self::backlog(),
            idle_timeout: 0,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    ///
    /// log level
    ///
    /// An enum representing the available verbosity levels of the logger.
    ///
    #[serde(default)]
    pub level: LogLevel,
}

/// Contents of the optional configuration file.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case")]
struct File {
    #[serde(default)]
    server: Server,
    #[serde(default)]
    log: Log,
}

#[derive(Debug, Clone)]
pub struct Config {
    ///
    /// Ingest folder, received files are written directly under it.
    ///
    pub folder: PathBuf,
    ///
    /// Address and port of the listening socket.
    ///
    pub listen: SocketAddr,
    pub server: Server,
    pub log: Log,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    ///
    /// Folder the received files are written to, created if missing.
    ///
    folder: PathBuf,
    ///
    /// Listening IP address.
    ///
    ip: IpAddr,
    ///
    /// Listening port.
    ///
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,
    ///
    /// Specify the configuration file path
    ///
    /// Example: ingest-server --config /etc/ingest/config.json5 ./in 0.0.0.0 8080
    ///
    #[arg(long, short)]
    config: Option<PathBuf>,
    #[arg(long)]
    log_level: Option<LogLevel>,
    #[arg(long)]
    max_clients: Option<usize>,
    ///
    /// Idle timeout in seconds, zero disables it.
    ///
    #[arg(long)]
    idle_timeout: Option<u32>,
}

impl Config {
    pub fn new(folder: impl Into<PathBuf>, listen: SocketAddr) -> Self {
        Self {
            folder: folder.into(),
            server: Server::default(),
            log: Log::default(),
            listen,
        }
    }

    ///
    /// Load configure from command line parameters and the config file.
    ///
    /// The config file is optional, values given on the command line take
    /// precedence over the ones read from the file.
    ///
    pub fn load() -> Result<Self> {
        Self::from_cli(Cli::parse())
    }

    fn from_cli(cli: Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => serde_json5::from_str::<File>(&read_to_string(path)?)?,
            None => File::default(),
        };

        let mut config = Self {
            listen: SocketAddr::new(cli.ip, cli.port),
            folder: cli.folder,
            server: file.server,
            log: file.log,
        };

        if let Some(level) = cli.log_level {
            config.log.level = level;
        }

        if let Some(max_clients) = cli.max_clients {
            config.server.max_clients = max_clients;
        }

        if let Some(idle_timeout) = cli.idle_timeout {
            config.server.idle_timeout = idle_timeout;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.folder.as_os_str().is_empty(),
            "folder must be at least 1 character"
        );

        ensure!(self.server.max_clients > 0, "max-clients must be positive");
        ensure!(self.server.buffer_size > 0, "buffer-size must be positive");

        Ok(())
    }
}
