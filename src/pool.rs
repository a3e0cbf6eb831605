//! Address pool for NAT assignment.

use crate::error::{Result, TunError};
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// Allocates unique client addresses from a CIDR block.
///
/// The cursor over host indices is monotonic: addresses are never reused,
/// and nothing is returned to the pool when a session ends, so a
/// long-running server with connection churn will eventually exhaust it.
/// Indices whose low byte is 0x00 or 0xFF are skipped (network/broadcast
/// lookalikes in every /24 slice), as is the gateway's own index.
///
/// The pool itself is not synchronized; the server wraps it in a mutex and
/// locks around each allocation.
#[derive(Debug)]
pub struct IpPool {
    network: Ipv4Net,
    gateway: Ipv4Addr,
    cursor: u32,
    max: u32,
    gateway_idx: u32,
}

impl IpPool {
    /// Build a pool over `network` with `gateway` reserved for the server.
    pub fn new(network: Ipv4Net, gateway: Ipv4Addr) -> Result<Self> {
        if !network.contains(&gateway) {
            return Err(TunError::config_invalid(
                "nat.gateway",
                format!("{gateway} is not inside {network}"),
            ));
        }
        let host_bits = 32 - u32::from(network.prefix_len());
        let max = if host_bits >= 32 {
            u32::MAX
        } else {
            (1u32 << host_bits) - 1
        };
        let netmask = u32::from(network.netmask());
        Ok(Self {
            network,
            gateway,
            cursor: 0,
            max,
            gateway_idx: u32::from(gateway) & !netmask,
        })
    }

    /// The server-side tunnel address.
    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    /// Netmask of the pool's network.
    pub fn netmask(&self) -> Ipv4Addr {
        self.network.netmask()
    }

    /// Hand out the next unused address, or `None` once the block is spent.
    pub fn next(&mut self) -> Option<Ipv4Addr> {
        while self.cursor < self.max {
            self.cursor += 1;
            let idx = self.cursor;
            if idx & 0xFF == 0 || idx & 0xFF == 0xFF || idx == self.gateway_idx {
                continue;
            }
            return Some(Ipv4Addr::from(u32::from(self.network.network()) | idx));
        }
        None
    }

    /// True once the cursor has swept the whole block.
    pub fn is_empty(&self) -> bool {
        self.cursor >= self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn pool(net: &str, gw: &str) -> IpPool {
        IpPool::new(net.parse().unwrap(), gw.parse().unwrap()).unwrap()
    }

    #[test]
    fn test_gateway_must_be_inside_network() {
        let err = IpPool::new(
            "10.0.0.0/24".parse().unwrap(),
            "192.168.1.1".parse().unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, TunError::ConfigInvalid { .. }));
    }

    #[test]
    fn test_first_allocation_skips_gateway() {
        let mut pool = pool("10.0.0.0/24", "10.0.0.1");
        assert_eq!(pool.next(), Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(pool.next(), Some(Ipv4Addr::new(10, 0, 0, 3)));
    }

    #[test]
    fn test_uniqueness_and_exclusions() {
        let mut pool = pool("10.0.0.0/24", "10.0.0.1");
        let gateway = Ipv4Addr::new(10, 0, 0, 1);
        let mut seen = HashSet::new();
        while let Some(ip) = pool.next() {
            assert!(seen.insert(ip), "{ip} returned twice");
            let last = ip.octets()[3];
            assert_ne!(last, 0);
            assert_ne!(last, 255);
            assert_ne!(ip, gateway);
        }
        // /24 block: 255 indices, minus .255 and the gateway.
        assert_eq!(seen.len(), 253);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_exhaustion_is_sticky() {
        let mut pool = pool("10.0.0.0/30", "10.0.0.1");
        assert_eq!(pool.next(), Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(pool.next(), None);
        assert!(pool.is_empty());
        assert_eq!(pool.next(), None);
    }

    #[test]
    fn test_gateway_skipped_mid_range() {
        let mut pool = pool("10.0.0.0/24", "10.0.0.5");
        let assigned: Vec<_> = (0..5).map(|_| pool.next().unwrap()).collect();
        assert_eq!(
            assigned,
            vec![
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 2),
                Ipv4Addr::new(10, 0, 0, 3),
                Ipv4Addr::new(10, 0, 0, 4),
                Ipv4Addr::new(10, 0, 0, 6),
            ]
        );
    }

    #[test]
    fn test_wider_network_skips_dotted_boundaries() {
        let mut pool = pool("10.1.0.0/16", "10.1.0.1");
        let mut seen = 0u32;
        while let Some(ip) = pool.next() {
            let last = ip.octets()[3];
            assert_ne!(last, 0);
            assert_ne!(last, 255);
            seen += 1;
        }
        // 65535 visited indices, minus 255 with a .0 ending (index 0 is
        // never visited), 256 with a .255 ending, and the gateway.
        assert_eq!(seen, 65535 - 255 - 256 - 1);
    }

    #[test]
    fn test_netmask_and_gateway_accessors() {
        let pool = pool("10.0.0.0/24", "10.0.0.1");
        assert_eq!(pool.netmask(), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(pool.gateway(), Ipv4Addr::new(10, 0, 0, 1));
    }
}
