//! Virtual network interface setup.
//!
//! All OS-specific work lives in the `tun` crate; this module only maps the
//! session's assigned [`NatInfo`] onto a device configuration and hands the
//! opened device back as split read/write halves. Session logic never sees
//! the device type itself, only `AsyncRead`/`AsyncWrite` halves, which is
//! what lets the forward loop run against in-memory pipes in tests.

use crate::error::{Result, TunError};
use crate::packet::NatInfo;
use std::net::Ipv4Addr;
use tokio::io::{ReadHalf, WriteHalf};
use tun::AsyncDevice;

/// Read/write halves of an opened TUN device.
pub type TunHalves = (ReadHalf<AsyncDevice>, WriteHalf<AsyncDevice>);

/// Parameters for a point-to-point TUN interface.
#[derive(Debug, Clone, Copy)]
pub struct TunOptions {
    /// Local address of the interface.
    pub address: Ipv4Addr,
    /// Peer address of the point-to-point link.
    pub peer: Ipv4Addr,
    pub netmask: Ipv4Addr,
    /// Leave unset to keep the OS default.
    pub mtu: Option<u16>,
}

impl TunOptions {
    /// Client-side view of an assignment: self is the allocated address,
    /// the peer is the server's gateway.
    pub fn client_side(nat: &NatInfo) -> Self {
        Self {
            address: nat.client_ip,
            peer: nat.gateway,
            netmask: nat.netmask,
            mtu: nat.mtu,
        }
    }

    /// Server-side view: self is the gateway, the peer is the address just
    /// allocated to the client.
    pub fn gateway_side(nat: &NatInfo, mtu: u16) -> Self {
        Self {
            address: nat.gateway,
            peer: nat.client_ip,
            netmask: nat.netmask,
            mtu: Some(mtu),
        }
    }

    /// Create, configure and bring up the interface.
    pub fn open(&self) -> Result<TunHalves> {
        let mut config = tun::Configuration::default();
        config
            .address(self.address)
            .destination(self.peer)
            .netmask(self.netmask);
        if let Some(mtu) = self.mtu {
            if mtu > 0 {
                config.mtu(i32::from(mtu));
            }
        }
        config.up();

        #[cfg(target_os = "linux")]
        config.platform(|platform| {
            platform.packet_information(false);
        });

        let device = tun::create_as_async(&config).map_err(|e| TunError::Device(e.to_string()))?;
        log::info!(
            "interface up: {} -> {} netmask {}",
            self.address,
            self.peer,
            self.netmask
        );
        Ok(tokio::io::split(device))
    }
}
