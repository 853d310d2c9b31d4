use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use clap::Parser;
use ingest_client::IngestClient;

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    ///
    /// File to send, the server stores it under its base name.
    ///
    file: PathBuf,
    ///
    /// Destination IP address.
    ///
    ip: IpAddr,
    ///
    /// Destination port.
    ///
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,
    ///
    /// Milliseconds to wait for the file name echo before sending the
    /// payload anyway.
    ///
    #[arg(long, default_value_t = 1000)]
    ack_timeout: u64,
    ///
    /// Seconds to wait for the server to close the connection once the
    /// payload is sent.
    ///
    #[arg(long, default_value_t = 5)]
    close_timeout: u64,
    #[arg(long, default_value_t = log::Level::Info)]
    log_level: log::Level,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    simple_logger::init_with_level(cli.log_level)?;

    let client = IngestClient::builder()
        .with_address(SocketAddr::new(cli.ip, cli.port))
        .with_ack_timeout(Duration::from_millis(cli.ack_timeout))
        .with_close_timeout(Duration::from_secs(cli.close_timeout))
        .build();

    log::info!(
        "client parameters: file={}, destination={}",
        cli.file.display(),
        client.address(),
    );

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(client.send_file(&cli.file))?;

    Ok(())
}
