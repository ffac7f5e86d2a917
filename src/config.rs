use std::net::SocketAddr;

use clap::Parser;

use crate::world::DEFAULT_WORLD;

pub const DEFAULT_ADDR: &str = "0.0.0.0:8000";

/// World presence and messaging hub
#[derive(Parser, Clone, Debug)]
#[command(name = "world-core-server", version, about = "World presence and messaging hub")]
pub struct Config {
    /// Address to accept websocket connections on
    #[arg(long, env = "WORLD_BIND", default_value = DEFAULT_ADDR)]
    pub bind: SocketAddr,

    /// Worlds to create at startup (repeat or comma separate)
    #[arg(
        long = "world",
        env = "WORLD_NAMES",
        value_delimiter = ',',
        default_value = DEFAULT_WORLD
    )]
    pub worlds: Vec<String>,

    /// Emit structured JSON logs
    #[arg(long, env = "WORLD_JSON_LOGS")]
    pub json_logs: bool,
}
