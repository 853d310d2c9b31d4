pub mod config;
pub mod format;
pub mod multiplexer;
pub mod observer;
pub mod server;
pub mod session;
pub mod sink;
pub mod slots;
pub mod statistics;

use self::{config::Config, observer::Logger, server::Server, statistics::Statistics};

use std::fs::create_dir_all;

/// In order to let the integration test directly use the ingest-server crate
/// and start the server, a function is opened to replace the main function to
/// directly start the server.
///
/// The ingest folder is created first, then the listening socket. Both are
/// startup failures, nothing fails the server once it is serving.
pub async fn startup(config: Config) -> anyhow::Result<()> {
    create_dir_all(&config.folder)?;

    let server = Server::bind(&config, Statistics::default(), Logger).await?;

    log::info!(
        "ingest server listening: listen={}, folder={}, max clients={}",
        server.local_addr()?,
        server.folder().display(),
        server.capacity(),
    );

    server.run().await
}
