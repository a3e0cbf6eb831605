//! ptptun
//!
//! Point-to-point VPN tunnel over TCP.
//!
//! Usage:
//!   Server:  ptptun server --config ser.cfg
//!   Client:  ptptun client --config cli.cfg

use clap::{Parser, Subcommand};
use ptptun::{Client, ClientConfig, Server, ServerConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ptptun")]
#[command(version)]
#[command(about = "Point-to-point VPN tunnel over TCP")]
struct Args {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Connect to a server and bring up the tunnel interface
    Client {
        /// Path to the client configuration file
        #[arg(short, long, default_value = "cli.cfg")]
        config: PathBuf,
    },
    /// Accept clients and relay their traffic
    Server {
        /// Path to the server configuration file
        #[arg(short, long, default_value = "ser.cfg")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let result = match args.mode {
        Mode::Client { config } => match ClientConfig::from_file(&config) {
            Ok(config) => Client::new(config).run().await,
            Err(err) => Err(err),
        },
        Mode::Server { config } => match ServerConfig::from_file(&config) {
            Ok(config) => match Server::new(config) {
                Ok(server) => server.run().await,
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        },
    };

    if let Err(err) = result {
        log::error!("{err}");
        std::process::exit(1);
    }
}
