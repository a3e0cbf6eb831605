//! Point-to-point tunnel over TCP.
//!
//! One server, many clients: clients authenticate over a framed (optionally
//! TLS-wrapped, optionally compressed) TCP stream, receive a private address
//! from the server's pool, and then both sides relay raw IP datagrams
//! between their virtual interfaces and the tunnel.

pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod device;
pub mod encoder;
pub mod error;
pub mod forward;
pub mod packet;
pub mod pool;
pub mod server;
pub mod tunnel;

pub use client::Client;
pub use config::{ClientConfig, ServerConfig};
pub use error::{Result, TunError};
pub use server::Server;
