//! OgarX - authoritative arena game server binary

use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,server=debug")),
        )
        .init();

    info!("OgarX Server v{}", env!("CARGO_PKG_VERSION"));

    let config = server::Config::load()?;
    info!("Loaded configuration");
    info!("  Name: {}", config.server.name);
    info!("  Port: {}", config.server.port);
    info!("  Map: {}x{}", config.world.map_hw * 2.0, config.world.map_hh * 2.0);
    info!("  Game mode: {}", config.server.gamemode);
    info!("  Tick rate: {} tps", config.world.tps);

    server::run(config).await?;

    Ok(())
}
