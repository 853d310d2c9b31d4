#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use ingest_server::config::Config;

fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    simple_logger::init_with_level(config.log.level.as_level())?;

    log::info!(
        "server parameters: folder={}, listening ip={}, listening port={}",
        config.folder.display(),
        config.listen.ip(),
        config.listen.port(),
    );

    // A single thread is all the event loop ever uses.
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(ingest_server::startup(config))
}
