use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, info_span, Instrument};
use tracing_subscriber::EnvFilter;
use world_core_server::config::Config;
use world_core_server::server::serve;
use world_core_server::{EventRouter, WorldRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // set up logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let registry = Arc::new(WorldRegistry::new(config.worlds.iter().cloned()));
    info!(worlds = ?registry.world_names(), "worlds ready");

    let listener = TcpListener::bind(config.bind).await?;
    let router = EventRouter::new(registry);

    tokio::select! {
        res = serve(listener, router).instrument(info_span!("server")) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    }
}
