//! Live capture: datalink frames in, [`PacketEvent`]s out.
//!
//! Only Ethernet → IPv4/IPv6 → UDP is decoded here, plus the DNS header and
//! first question. Everything past that belongs to the pipeline.

use std::io::ErrorKind;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crossbeam_channel::Receiver;
use log::{debug, error, info};
use pnet::datalink::{self, Channel::Ethernet, NetworkInterface};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::udp::UdpPacket;
use pnet::packet::Packet;

use crate::error::{IdsError, Result};
use crate::packet::{DnsFlags, DnsQuery, DnsQuestion, PacketEvent};

const DNS_HEADER_LEN: usize = 12;
const MAX_POINTER_JUMPS: usize = 16;

const FLAG_QR: u16 = 0x8000;
const FLAG_AA: u16 = 0x0400;
const FLAG_TC: u16 = 0x0200;
const FLAG_RD: u16 = 0x0100;
const FLAG_RA: u16 = 0x0080;

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub interface: String,
    /// Keep only datagrams to or from this UDP port.
    pub udp_port: Option<u16>,
    pub channel_capacity: usize,
    /// How often the capture thread wakes up to check for shutdown.
    pub read_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: "eth0".to_string(),
            udp_port: None,
            channel_capacity: 4096,
            read_timeout: Duration::from_millis(500),
        }
    }
}

pub fn find_interface(name: &str) -> Result<NetworkInterface> {
    datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == name)
        .ok_or_else(|| IdsError::Capture(format!("no interface named {name}")))
}

/// Opens the interface and starts a capture thread feeding the returned
/// channel. The thread exits, closing the channel, once `running` is cleared.
pub fn spawn_capture(
    config: CaptureConfig,
    running: Arc<AtomicBool>,
) -> Result<(Receiver<PacketEvent>, JoinHandle<()>)> {
    let interface = find_interface(&config.interface)?;
    let channel_config = datalink::Config {
        read_timeout: Some(config.read_timeout),
        promiscuous: true,
        ..Default::default()
    };

    let mut rx = match datalink::channel(&interface, channel_config) {
        Ok(Ethernet(_, rx)) => rx,
        Ok(_) => {
            return Err(IdsError::Capture(format!(
                "unsupported channel type on {}",
                interface.name
            )))
        }
        Err(e) => {
            return Err(IdsError::Capture(format!(
                "failed to open channel on {}: {}",
                interface.name, e
            )))
        }
    };

    let (tx, events) = crossbeam_channel::bounded(config.channel_capacity);
    let name = interface.name.clone();

    let handle = thread::Builder::new()
        .name(format!("capture-{name}"))
        .spawn(move || {
            info!("Capturing on {name}");
            while running.load(Ordering::SeqCst) {
                match rx.next() {
                    Ok(frame) => {
                        let Some(event) = decode_frame(frame, SystemTime::now(), config.udp_port)
                        else {
                            continue;
                        };
                        if tx.send(event).is_err() {
                            debug!("Event channel closed, stopping capture on {name}");
                            break;
                        }
                    }
                    Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                        continue;
                    }
                    Err(e) => {
                        error!("Error reading packet on {name}: {e}");
                        continue;
                    }
                }
            }
            info!("Capture on {name} stopped");
        })?;

    Ok((events, handle))
}

/// Decodes an Ethernet frame into an event. Non-UDP frames yield `None`; UDP
/// datagrams that are not DNS queries yield an event without a query.
pub fn decode_frame(frame: &[u8], arrived: SystemTime, udp_port: Option<u16>) -> Option<PacketEvent> {
    let ethernet = EthernetPacket::new(frame)?;
    match ethernet.get_ethertype() {
        EtherTypes::Ipv4 => {
            let ipv4 = Ipv4Packet::new(ethernet.payload())?;
            if ipv4.get_next_level_protocol() != IpNextHeaderProtocols::Udp {
                return None;
            }
            decode_udp(IpAddr::V4(ipv4.get_source()), ipv4.payload(), arrived, udp_port)
        }
        EtherTypes::Ipv6 => {
            let ipv6 = Ipv6Packet::new(ethernet.payload())?;
            if ipv6.get_next_header() != IpNextHeaderProtocols::Udp {
                return None;
            }
            decode_udp(IpAddr::V6(ipv6.get_source()), ipv6.payload(), arrived, udp_port)
        }
        _ => None,
    }
}

fn decode_udp(
    source: IpAddr,
    segment: &[u8],
    arrived: SystemTime,
    udp_port: Option<u16>,
) -> Option<PacketEvent> {
    let udp = UdpPacket::new(segment)?;
    if let Some(port) = udp_port {
        if udp.get_source() != port && udp.get_destination() != port {
            return None;
        }
    }

    Some(PacketEvent {
        source,
        source_port: udp.get_source(),
        arrived,
        query: parse_query(udp.payload()),
    })
}

/// Header flags and first question of a DNS query. Responses, messages
/// without questions and truncated payloads yield `None`.
pub fn parse_query(payload: &[u8]) -> Option<DnsQuery> {
    if payload.len() < DNS_HEADER_LEN {
        return None;
    }

    let flags = u16::from_be_bytes([payload[2], payload[3]]);
    if flags & FLAG_QR != 0 {
        return None;
    }
    let qdcount = u16::from_be_bytes([payload[4], payload[5]]);
    if qdcount == 0 {
        return None;
    }

    let (qname, offset) = parse_name(payload, DNS_HEADER_LEN)?;
    let fixed = payload.get(offset..offset + 4)?;

    Some(DnsQuery {
        question: DnsQuestion {
            qtype: u16::from_be_bytes([fixed[0], fixed[1]]),
            qclass: u16::from_be_bytes([fixed[2], fixed[3]]),
            qname,
        },
        flags: DnsFlags {
            aa: flags & FLAG_AA != 0,
            tc: flags & FLAG_TC != 0,
            rd: flags & FLAG_RD != 0,
            ra: flags & FLAG_RA != 0,
        },
    })
}

/// Reads a possibly compressed name starting at `offset`. Returns the fully
/// qualified name and the offset just past it, before any pointer was followed.
fn parse_name(payload: &[u8], mut offset: usize) -> Option<(String, usize)> {
    let mut name = String::new();
    let mut resume = None;
    let mut jumps = 0;

    loop {
        let len = *payload.get(offset)? as usize;

        if len == 0 {
            offset += 1;
            break;
        }

        // compression pointer
        if len & 0xC0 == 0xC0 {
            let low = *payload.get(offset + 1)? as usize;
            if resume.is_none() {
                resume = Some(offset + 2);
            }
            jumps += 1;
            if jumps > MAX_POINTER_JUMPS {
                return None;
            }
            offset = ((len & 0x3F) << 8) | low;
            continue;
        }
        if len & 0xC0 != 0 {
            return None;
        }

        let label = payload.get(offset + 1..offset + 1 + len)?;
        name.push_str(&String::from_utf8_lossy(label));
        name.push('.');
        offset += 1 + len;
    }

    if name.is_empty() {
        name.push('.');
    }
    Some((name, resume.unwrap_or(offset)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dns_query(flags: u16, qname: &[u8]) -> Vec<u8> {
        let mut msg = vec![0x12, 0x34];
        msg.extend_from_slice(&flags.to_be_bytes());
        msg.extend_from_slice(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        msg.extend_from_slice(qname);
        msg.extend_from_slice(&[0x00, 0x0c, 0x00, 0x01]); // PTR, IN
        msg
    }

    const LOCAL: &[u8] = b"\x07_dns-sd\x04_udp\x05local\x00";

    fn udp_frame(payload: &[u8], src_port: u16, dst_port: u16) -> Vec<u8> {
        let mut frame = vec![0u8; 12];
        frame.extend_from_slice(&[0x08, 0x00]); // IPv4

        let total = (20 + 8 + payload.len()) as u16;
        frame.extend_from_slice(&[0x45, 0x00]);
        frame.extend_from_slice(&total.to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00]);
        frame.extend_from_slice(&[192, 168, 1, 20]);
        frame.extend_from_slice(&[224, 0, 0, 251]);

        frame.extend_from_slice(&src_port.to_be_bytes());
        frame.extend_from_slice(&dst_port.to_be_bytes());
        frame.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x00]);
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn test_parse_query_question_and_flags() {
        let query = parse_query(&dns_query(0x0100, LOCAL)).unwrap();
        assert_eq!(query.question.qname, "_dns-sd._udp.local.");
        assert_eq!(query.question.qtype, 12);
        assert_eq!(query.question.qclass, 1);
        assert!(query.flags.rd);
        assert!(!query.flags.aa && !query.flags.tc && !query.flags.ra);
    }

    #[test]
    fn test_parse_query_rejects_response_and_empty() {
        assert!(parse_query(&dns_query(0x8180, LOCAL)).is_none());

        let mut no_question = dns_query(0x0100, LOCAL);
        no_question[5] = 0;
        assert!(parse_query(&no_question).is_none());

        assert!(parse_query(&[0u8; 5]).is_none());
    }

    #[test]
    fn test_parse_query_truncated_name() {
        let msg = dns_query(0x0100, LOCAL);
        assert!(parse_query(&msg[..20]).is_none());
    }

    #[test]
    fn test_parse_name_root_and_pointer() {
        let root = parse_query(&dns_query(0, b"\x00")).unwrap();
        assert_eq!(root.question.qname, ".");

        // name at 12 is "local.", a second name points back to it
        let mut msg = vec![0u8; 12];
        msg.extend_from_slice(b"\x05local\x00");
        msg.extend_from_slice(b"\x03www\xc0\x0c");
        let (name, next) = parse_name(&msg, 19).unwrap();
        assert_eq!(name, "www.local.");
        assert_eq!(next, msg.len());
    }

    #[test]
    fn test_parse_name_pointer_loop() {
        let mut msg = vec![0u8; 12];
        msg.extend_from_slice(&[0xc0, 0x0c]);
        assert!(parse_name(&msg, 12).is_none());
    }

    #[test]
    fn test_decode_frame_udp_dns() {
        let frame = udp_frame(&dns_query(0x0100, LOCAL), 5353, 5353);
        let event = decode_frame(&frame, SystemTime::UNIX_EPOCH, None).unwrap();
        assert_eq!(event.source, IpAddr::from([192, 168, 1, 20]));
        assert_eq!(event.source_port, 5353);
        assert_eq!(event.query.unwrap().question.qname, "_dns-sd._udp.local.");
    }

    #[test]
    fn test_decode_frame_port_filter_and_non_dns() {
        let frame = udp_frame(&dns_query(0x0100, LOCAL), 40000, 5353);
        assert!(decode_frame(&frame, SystemTime::UNIX_EPOCH, Some(53)).is_none());
        assert!(decode_frame(&frame, SystemTime::UNIX_EPOCH, Some(5353)).is_some());

        let junk = udp_frame(b"hello", 40000, 9999);
        let event = decode_frame(&junk, SystemTime::UNIX_EPOCH, None).unwrap();
        assert!(event.query.is_none());
    }
}
