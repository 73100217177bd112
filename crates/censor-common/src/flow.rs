//! Flow identity
//!
//! Canonical 5-tuple keys shared by both directions of a connection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Transport protocol carried by a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    /// TCP (IP protocol 6)
    Tcp,
    /// UDP (IP protocol 17)
    Udp,
    /// Any other IP protocol number
    Other(u8),
}

impl TransportProtocol {
    /// IP protocol number
    #[inline(always)]
    pub const fn number(&self) -> u8 {
        match self {
            Self::Tcp => 6,
            Self::Udp => 17,
            Self::Other(n) => *n,
        }
    }

    /// Map an IP protocol number back to a protocol
    pub const fn from_number(number: u8) -> Self {
        match number {
            6 => Self::Tcp,
            17 => Self::Udp,
            n => Self::Other(n),
        }
    }

    /// Whether the protocol carries ports
    #[inline(always)]
    pub const fn has_ports(&self) -> bool {
        matches!(self, Self::Tcp | Self::Udp)
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
            Self::Other(n) => write!(f, "ip-proto-{}", n),
        }
    }
}

/// One side of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    /// IP address
    pub addr: IpAddr,
    /// Transport port (0 for portless protocols)
    pub port: u16,
}

impl Endpoint {
    /// Create new endpoint
    pub const fn new(addr: IpAddr, port: u16) -> Self {
        Self { addr, port }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr {
            IpAddr::V4(v4) => write!(f, "{}:{}", v4, self.port),
            IpAddr::V6(v6) => write!(f, "[{}]:{}", v6, self.port),
        }
    }
}

/// Canonical flow key
///
/// The two endpoints are stored in sorted order, so a packet and its reply
/// produce the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    /// Lower endpoint (by address, then port)
    lo: Endpoint,
    /// Higher endpoint
    hi: Endpoint,
    /// Transport protocol
    protocol: TransportProtocol,
}

impl FlowKey {
    /// Build the canonical key for a packet travelling `src -> dst`
    #[inline]
    pub fn canonical(src: Endpoint, dst: Endpoint, protocol: TransportProtocol) -> Self {
        let (lo, hi) = if src <= dst { (src, dst) } else { (dst, src) };
        Self { lo, hi, protocol }
    }

    /// Both endpoints, lower first
    pub fn endpoints(&self) -> (Endpoint, Endpoint) {
        (self.lo, self.hi)
    }

    /// Transport protocol
    pub fn protocol(&self) -> TransportProtocol {
        self.protocol
    }

    /// Whether `endpoint` is one side of this flow
    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.lo == *endpoint || self.hi == *endpoint
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} <-> {}", self.protocol, self.lo, self.hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn ep(a: [u8; 4], port: u16) -> Endpoint {
        Endpoint::new(IpAddr::V4(Ipv4Addr::from(a)), port)
    }

    #[test]
    fn test_both_directions_share_key() {
        let client = ep([192, 168, 1, 10], 50_000);
        let server = ep([203, 0, 113, 5], 8388);

        let forward = FlowKey::canonical(client, server, TransportProtocol::Tcp);
        let reverse = FlowKey::canonical(server, client, TransportProtocol::Tcp);

        assert_eq!(forward, reverse);
        assert!(forward.contains(&client));
        assert!(forward.contains(&server));
    }

    #[test]
    fn test_protocol_separates_flows() {
        let a = ep([10, 0, 0, 1], 53);
        let b = ep([10, 0, 0, 2], 53);

        assert_ne!(
            FlowKey::canonical(a, b, TransportProtocol::Tcp),
            FlowKey::canonical(a, b, TransportProtocol::Udp),
        );
    }

    #[test]
    fn test_same_address_orders_by_port() {
        let a = ep([127, 0, 0, 1], 9000);
        let b = ep([127, 0, 0, 1], 80);

        let key = FlowKey::canonical(a, b, TransportProtocol::Tcp);
        assert_eq!(key.endpoints(), (b, a));
    }

    #[test]
    fn test_display() {
        let a = Endpoint::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 443);
        let b = ep([10, 0, 0, 1], 5000);
        let key = FlowKey::canonical(a, b, TransportProtocol::Tcp);

        assert_eq!(key.to_string(), "tcp 10.0.0.1:5000 <-> [::1]:443");
    }

    #[test]
    fn test_protocol_numbers() {
        assert_eq!(TransportProtocol::from_number(6), TransportProtocol::Tcp);
        assert_eq!(TransportProtocol::from_number(17), TransportProtocol::Udp);
        assert_eq!(TransportProtocol::from_number(47).number(), 47);
        assert!(!TransportProtocol::Other(1).has_ports());
    }
}
