//! Packet trace records
//!
//! One JSON object per line:
//!
//! ```json
//! {"src": "10.0.0.1:40000", "dst": "10.0.0.2:8388", "proto": "tcp", "payload": "16030100", "flags": ["ack"]}
//! ```
//!
//! `proto` defaults to tcp, `payload` to empty, `flags` to none. A record
//! with `"end": true` signals host-side teardown of the flow instead of a
//! packet.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use censor_common::{Endpoint, FlowKey, Packet, TcpFlags, TransportProtocol};
use serde::Deserialize;
use std::net::SocketAddr;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceRecord {
    pub src: SocketAddr,
    pub dst: SocketAddr,
    #[serde(default = "default_proto")]
    pub proto: TransportProtocol,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub end: bool,
}

fn default_proto() -> TransportProtocol {
    TransportProtocol::Tcp
}

/// What a trace line asks the engine to do
pub enum TraceEvent {
    Packet(Packet),
    EndFlow(FlowKey),
}

impl TraceRecord {
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line).context("malformed trace record")
    }

    pub fn flow_key(&self) -> FlowKey {
        FlowKey::canonical(self.src.into(), self.dst.into(), self.proto)
    }

    pub fn into_event(self) -> Result<TraceEvent> {
        if self.end {
            return Ok(TraceEvent::EndFlow(self.flow_key()));
        }

        let payload = hex::decode(self.payload.trim()).context("payload is not valid hex")?;
        let mut flags = TcpFlags::empty();
        for flag in &self.flags {
            flags.set(parse_flag(flag)?);
        }

        Ok(TraceEvent::Packet(
            Packet::new(
                Endpoint::from(self.src),
                Endpoint::from(self.dst),
                self.proto,
                Bytes::from(payload),
            )
            .with_flags(flags),
        ))
    }
}

fn parse_flag(flag: &str) -> Result<u8> {
    Ok(match flag.to_ascii_lowercase().as_str() {
        "fin" => TcpFlags::FIN,
        "syn" => TcpFlags::SYN,
        "rst" => TcpFlags::RST,
        "psh" => TcpFlags::PSH,
        "ack" => TcpFlags::ACK,
        other => bail!("unknown TCP flag {:?}", other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_packet() {
        let record = TraceRecord::parse(
            r#"{"src": "10.0.0.1:40000", "dst": "10.0.0.2:8388", "payload": "00ff20", "flags": ["FIN", "ack"]}"#,
        )
        .unwrap();

        match record.into_event().unwrap() {
            TraceEvent::Packet(packet) => {
                assert!(packet.is_tcp());
                assert_eq!(&packet.payload[..], &[0x00, 0xff, 0x20]);
                assert!(packet.is_teardown());
                assert!(packet.tcp_flags.has(TcpFlags::ACK));
            }
            TraceEvent::EndFlow(_) => panic!("expected a packet"),
        }
    }

    #[test]
    fn test_end_record() {
        let record =
            TraceRecord::parse(r#"{"src": "10.0.0.2:8388", "dst": "10.0.0.1:40000", "end": true}"#).unwrap();
        let key = record.flow_key();

        match record.into_event().unwrap() {
            TraceEvent::EndFlow(k) => assert_eq!(k, key),
            TraceEvent::Packet(_) => panic!("expected end of flow"),
        }
    }

    #[test]
    fn test_udp_and_errors() {
        let record = TraceRecord::parse(r#"{"src": "10.0.0.1:53", "dst": "10.0.0.2:53", "proto": "udp"}"#).unwrap();
        assert_eq!(record.proto, TransportProtocol::Udp);

        let bad_hex = TraceRecord::parse(r#"{"src": "10.0.0.1:1", "dst": "10.0.0.2:2", "payload": "zz"}"#).unwrap();
        assert!(bad_hex.into_event().is_err());

        let bad_flag =
            TraceRecord::parse(r#"{"src": "10.0.0.1:1", "dst": "10.0.0.2:2", "flags": ["urg"]}"#).unwrap();
        assert!(bad_flag.into_event().is_err());

        assert!(TraceRecord::parse(r#"{"src": "nope"}"#).is_err());
    }
}
