//! Error types for the tunnel crate.

use thiserror::Error;

/// Errors produced by the tunnel core.
///
/// Startup errors (`ConfigMissing`, `ConfigInvalid`, `UnknownEncoder`,
/// `EncoderConfig`) abort the process before any networking begins. The
/// remaining variants are per-session: they tear down the session that
/// produced them without affecting other sessions, except for a failure of
/// the server's own listener, which is fatal.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TunError {
    /// A required configuration field is absent. Carries the dotted path.
    #[error("config: missing `{0}`")]
    ConfigMissing(String),

    /// A configuration field is present but unusable.
    #[error("config: `{field}`: {reason}")]
    ConfigInvalid { field: String, reason: String },

    /// No encoder is registered under the configured name.
    #[error("unknown encoder: `{0}`")]
    UnknownEncoder(String),

    /// An encoder rejected its configuration options.
    #[error("encoder `{name}`: {reason}")]
    EncoderConfig { name: String, reason: String },

    /// An encoder stage failed while transforming outbound bytes.
    #[error("encode failed: {0}")]
    Encode(String),

    /// An encoder stage failed while reversing inbound bytes.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Malformed frame or handshake payload.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Socket I/O failure, including EOF in the middle of a frame.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// TLS configuration or handshake failure.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Credentials rejected, either locally or by the server.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The address pool has no further addresses to hand out.
    #[error("address pool exhausted")]
    PoolExhausted,

    /// Virtual network interface creation or configuration failure.
    #[error("virtual interface error: {0}")]
    Device(String),
}

impl TunError {
    /// Build a `ConfigInvalid` with a dotted field path.
    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Build an `EncoderConfig` error for the named encoder.
    pub fn encoder_config(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EncoderConfig {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TunError>;
