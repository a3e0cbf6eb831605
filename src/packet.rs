//! Packet model and handshake payloads.
//!
//! A [`Packet`] is the unit moved across a session: a one-byte kind tag plus
//! an opaque byte payload. P2P packets carry raw IP datagrams; Auth packets
//! carry a JSON-encoded handshake value ([`AuthInfo`] client-to-server,
//! [`AuthResult`] server-to-client).

use crate::error::{Result, TunError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Wire-level packet kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    /// Raw IP datagram relayed between virtual interfaces.
    P2p = 0,
    /// Authentication handshake (request or result).
    Auth = 1,
    /// Clean session termination.
    Shutdown = 2,
    /// Any tag this implementation does not understand.
    Unknown = 3,
}

impl PacketKind {
    /// Decode a kind tag. Unrecognized tags map to `Unknown` rather than
    /// failing; the session state machines treat `Unknown` as end-of-session.
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => Self::P2p,
            1 => Self::Auth,
            2 => Self::Shutdown,
            _ => Self::Unknown,
        }
    }

    /// Wire tag for this kind.
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A single tunnel packet. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub data: Vec<u8>,
}

impl Packet {
    /// Wrap a raw IP datagram.
    pub fn p2p(data: Vec<u8>) -> Self {
        Self {
            kind: PacketKind::P2p,
            data,
        }
    }

    /// Build an Auth packet from a handshake value.
    pub fn auth<T: Serialize>(value: &T) -> Result<Self> {
        let data = serde_json::to_vec(value)
            .map_err(|e| TunError::Protocol(format!("failed to encode handshake: {e}")))?;
        Ok(Self {
            kind: PacketKind::Auth,
            data,
        })
    }

    /// An empty Shutdown packet.
    pub fn shutdown() -> Self {
        Self {
            kind: PacketKind::Shutdown,
            data: Vec::new(),
        }
    }

    /// Decode the payload as a handshake value.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.data)
            .map_err(|e| TunError::Protocol(format!("malformed handshake payload: {e}")))
    }
}

/// Client credentials, sent once per session inside an Auth packet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthInfo {
    pub username: String,
    pub password: String,
}

/// Network parameters assigned to an authenticated client.
///
/// Produced once by the server's address pool, transmitted inside the Auth
/// result, and used to configure the client's virtual interface.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NatInfo {
    /// Address assigned to the client.
    pub client_ip: Ipv4Addr,
    /// Server-side address of the tunnel.
    pub gateway: Ipv4Addr,
    /// Netmask of the tunnel network.
    pub netmask: Ipv4Addr,
    /// MTU for the client's interface; unset means leave the OS default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,
}

/// Server's reply to an authentication attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
    pub ok: bool,
    /// Rejection reason; empty on success.
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nat: Option<NatInfo>,
}

impl AuthResult {
    /// Build an accepted result carrying the assigned network parameters.
    pub fn accepted(nat: NatInfo) -> Self {
        Self {
            ok: true,
            message: String::new(),
            nat: Some(nat),
        }
    }

    /// Build a rejected result with a reason for the client.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            nat: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            PacketKind::P2p,
            PacketKind::Auth,
            PacketKind::Shutdown,
            PacketKind::Unknown,
        ] {
            assert_eq!(PacketKind::from_byte(kind.as_byte()), kind);
        }
    }

    #[test]
    fn test_unrecognized_kind_maps_to_unknown() {
        assert_eq!(PacketKind::from_byte(42), PacketKind::Unknown);
        assert_eq!(PacketKind::from_byte(255), PacketKind::Unknown);
    }

    #[test]
    fn test_auth_payload_roundtrip() {
        let info = AuthInfo {
            username: "alice".into(),
            password: "secret".into(),
        };
        let packet = Packet::auth(&info).unwrap();
        assert_eq!(packet.kind, PacketKind::Auth);
        let decoded: AuthInfo = packet.payload().unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn test_auth_result_roundtrip() {
        let nat = NatInfo {
            client_ip: Ipv4Addr::new(10, 0, 0, 2),
            gateway: Ipv4Addr::new(10, 0, 0, 1),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            mtu: Some(1400),
        };
        let packet = Packet::auth(&AuthResult::accepted(nat)).unwrap();
        let decoded: AuthResult = packet.payload().unwrap();
        assert!(decoded.ok);
        assert_eq!(decoded.nat, Some(nat));
    }

    #[test]
    fn test_malformed_payload_is_protocol_error() {
        let packet = Packet {
            kind: PacketKind::Auth,
            data: b"not json".to_vec(),
        };
        let err = packet.payload::<AuthResult>().unwrap_err();
        assert!(matches!(err, TunError::Protocol(_)));
    }
}
