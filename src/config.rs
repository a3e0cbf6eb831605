//! Typed configuration schema.
//!
//! Configuration is a JSON file deserialized into explicit structs, one per
//! section (`auth`, `tunnel`, `nat`, `packet`), followed by a validation
//! pass that reports dotted field paths for anything serde cannot catch on
//! its own (cross-field requirements such as `tls` needing `cert`/`key`).

use crate::error::{Result, TunError};
use ipnet::Ipv4Net;
use serde::Deserialize;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// MTU advertised to clients and set on the server's interface when the
/// configuration does not name one.
pub const DEFAULT_MTU: u16 = 1400;

/// Client-side application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub auth: ClientAuth,
    pub tunnel: TunnelConfig,
    #[serde(default)]
    pub packet: PacketConfig,
}

/// Credentials presented during the handshake.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientAuth {
    pub username: String,
    pub password: String,
}

/// Server-side application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub auth: ServerAuth,
    pub tunnel: TunnelConfig,
    pub nat: NatConfig,
    #[serde(default)]
    pub packet: PacketConfig,
}

/// Server authentication backend settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerAuth {
    /// Path to a line-oriented `user password` credentials file.
    pub users: PathBuf,
}

/// Address-pool settings for the server.
#[derive(Debug, Clone, Deserialize)]
pub struct NatConfig {
    /// Network block addresses are allocated from.
    pub net: Ipv4Net,
    /// Server-side tunnel address, reserved out of the block.
    pub gateway: Ipv4Addr,
    /// Tunnel MTU, advertised to clients.
    #[serde(default = "default_mtu")]
    pub mtu: u16,
}

/// Transport settings shared by client and server.
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelConfig {
    /// Transport type; only `tcp` exists.
    pub name: String,
    /// Listen address (server) or dial address (client), `host:port`.
    pub addr: String,
    /// Wrap the TCP stream in TLS.
    #[serde(default)]
    pub tls: bool,
    /// Client only: verify the server certificate against `cert` as a trust
    /// anchor. Off by default; the tunnel then accepts any certificate.
    #[serde(default)]
    pub verify: bool,
    /// Server: PEM certificate chain to present. Client with `verify`: PEM
    /// trust anchor.
    pub cert: Option<PathBuf>,
    /// Server: PEM private key.
    pub key: Option<PathBuf>,
}

/// Packet-layer settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PacketConfig {
    /// Ordered encoder pipeline applied to every frame payload.
    #[serde(default)]
    pub encoders: Vec<EncoderSpec>,
}

/// One configured encoder stage: a name plus stage-specific options.
#[derive(Debug, Clone, Deserialize)]
pub struct EncoderSpec {
    pub name: String,
    #[serde(flatten)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

fn default_mtu() -> u16 {
    DEFAULT_MTU
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|e| {
        TunError::config_invalid(path.display().to_string(), format!("unreadable: {e}"))
    })?;
    serde_json::from_str(&text)
        .map_err(|e| TunError::config_invalid(path.display().to_string(), e.to_string()))
}

impl ClientConfig {
    /// Load and validate a client configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = load_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.tunnel.validate_common()?;
        if self.tunnel.tls && self.tunnel.verify && self.tunnel.cert.is_none() {
            return Err(TunError::ConfigMissing("tunnel.cert".into()));
        }
        Ok(())
    }
}

impl ServerConfig {
    /// Load and validate a server configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = load_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.tunnel.validate_common()?;
        if self.tunnel.tls {
            if self.tunnel.cert.is_none() {
                return Err(TunError::ConfigMissing("tunnel.cert".into()));
            }
            if self.tunnel.key.is_none() {
                return Err(TunError::ConfigMissing("tunnel.key".into()));
            }
        }
        if !self.nat.net.contains(&self.nat.gateway) {
            return Err(TunError::config_invalid(
                "nat.gateway",
                format!("{} is not inside {}", self.nat.gateway, self.nat.net),
            ));
        }
        Ok(())
    }
}

impl TunnelConfig {
    fn validate_common(&self) -> Result<()> {
        if self.name != "tcp" {
            return Err(TunError::config_invalid(
                "tunnel.name",
                format!("unknown tunnel type `{}`", self.name),
            ));
        }
        if self.addr.is_empty() {
            return Err(TunError::ConfigMissing("tunnel.addr".into()));
        }
        Ok(())
    }

    /// Host part of `addr`, used as the TLS server name when dialing.
    pub fn host(&self) -> &str {
        match self.addr.rsplit_once(':') {
            Some((host, _port)) => host.trim_matches(|c| c == '[' || c == ']'),
            None => self.addr.as_str(),
        }
    }
}
