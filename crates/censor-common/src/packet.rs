//! Packet view handed to the engine by the host
//!
//! The host decodes headers; the engine only sees addresses, ports, TCP
//! flags and the transport payload as an opaque byte sequence.

use crate::flow::{Endpoint, FlowKey, TransportProtocol};
use bytes::Bytes;
use std::fmt;

/// TCP control flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct TcpFlags(u8);

impl TcpFlags {
    /// FIN
    pub const FIN: u8 = 1 << 0;
    /// SYN
    pub const SYN: u8 = 1 << 1;
    /// RST
    pub const RST: u8 = 1 << 2;
    /// PSH
    pub const PSH: u8 = 1 << 3;
    /// ACK
    pub const ACK: u8 = 1 << 4;

    /// No flags set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// From raw header bits
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw bits
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Check if flag is set
    #[inline(always)]
    pub const fn has(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    /// Set flag
    #[inline(always)]
    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    /// FIN or RST: the connection is being torn down
    #[inline(always)]
    pub const fn is_teardown(&self) -> bool {
        self.has(Self::FIN) || self.has(Self::RST)
    }
}

/// Direction of a packet relative to the flow initiator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Sent by the endpoint that opened the flow (+1)
    Forward,
    /// Sent towards the initiator (-1)
    Reverse,
}

impl Direction {
    /// +1 / -1
    #[inline(always)]
    pub const fn signum(&self) -> i8 {
        match self {
            Self::Forward => 1,
            Self::Reverse => -1,
        }
    }

    /// Feature value
    #[inline(always)]
    pub fn as_f32(&self) -> f32 {
        f32::from(self.signum())
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Reverse => write!(f, "reverse"),
        }
    }
}

/// Read-only packet view
#[derive(Debug, Clone)]
pub struct Packet {
    /// Source endpoint
    pub src: Endpoint,
    /// Destination endpoint
    pub dst: Endpoint,
    /// Transport protocol
    pub protocol: TransportProtocol,
    /// TCP flags (empty for other protocols)
    pub tcp_flags: TcpFlags,
    /// Transport-layer payload
    pub payload: Bytes,
}

impl Packet {
    /// Create new packet
    pub fn new(
        src: Endpoint,
        dst: Endpoint,
        protocol: TransportProtocol,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            src,
            dst,
            protocol,
            tcp_flags: TcpFlags::empty(),
            payload: payload.into(),
        }
    }

    /// TCP segment
    pub fn tcp(src: Endpoint, dst: Endpoint, payload: impl Into<Bytes>) -> Self {
        Self::new(src, dst, TransportProtocol::Tcp, payload)
    }

    /// UDP datagram
    pub fn udp(src: Endpoint, dst: Endpoint, payload: impl Into<Bytes>) -> Self {
        Self::new(src, dst, TransportProtocol::Udp, payload)
    }

    /// Replace the TCP flags
    pub fn with_flags(mut self, flags: TcpFlags) -> Self {
        self.tcp_flags = flags;
        self
    }

    /// Canonical key of the flow this packet belongs to
    #[inline]
    pub fn flow_key(&self) -> FlowKey {
        FlowKey::canonical(self.src, self.dst, self.protocol)
    }

    /// Payload length in bytes
    #[inline(always)]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the packet is a TCP segment
    #[inline(always)]
    pub fn is_tcp(&self) -> bool {
        self.protocol == TransportProtocol::Tcp
    }

    /// Whether the packet closes its TCP connection
    #[inline(always)]
    pub fn is_teardown(&self) -> bool {
        self.is_tcp() && self.tcp_flags.is_teardown()
    }

    /// Direction relative to the flow initiator
    #[inline]
    pub fn direction_from(&self, initiator: &Endpoint) -> Direction {
        if self.src == *initiator {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn ep(last: u8, port: u16) -> Endpoint {
        Endpoint::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), port)
    }

    #[test]
    fn test_tcp_flags() {
        let mut flags = TcpFlags::empty();
        assert!(!flags.is_teardown());

        flags.set(TcpFlags::ACK);
        assert!(flags.has(TcpFlags::ACK));
        assert!(!flags.is_teardown());

        flags.set(TcpFlags::FIN);
        assert!(flags.is_teardown());
        assert!(TcpFlags::from_bits(TcpFlags::RST).is_teardown());
    }

    #[test]
    fn test_direction_from_initiator() {
        let client = ep(1, 40_000);
        let server = ep(2, 8388);

        let out = Packet::tcp(client, server, &b"hello"[..]);
        let back = Packet::tcp(server, client, &b"world"[..]);

        assert_eq!(out.direction_from(&client), Direction::Forward);
        assert_eq!(back.direction_from(&client), Direction::Reverse);
        assert_eq!(out.flow_key(), back.flow_key());
        assert_eq!(Direction::Reverse.as_f32(), -1.0);
    }

    #[test]
    fn test_udp_fin_is_not_teardown() {
        let pkt = Packet::udp(ep(1, 53), ep(2, 53), Vec::new())
            .with_flags(TcpFlags::from_bits(TcpFlags::FIN));
        assert!(!pkt.is_teardown());
        assert_eq!(pkt.payload_len(), 0);
    }
}
