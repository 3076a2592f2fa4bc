//! Packet normalization.
//!
//! A [`RawRow`] is first decoded into tagged network and transport layers,
//! with an explicit precedence, and then resolved into a [`PacketRecord`]:
//!
//! 1. IPv4 addresses, else IPv6 addresses.
//! 2. TCP/UDP ports (only one protocol is populated per packet).
//! 3. Without ports: ARP (token `arp`, addresses taken from the ARP
//!    sender/target protocol fields), else ICMP (token `icmp`).
//! 4. With no IP, ports, ARP or ICMP: the MAC addresses stand in as the
//!    endpoint addresses.
//!
//! A record whose resolved fields are all empty carries no signal and is
//! dropped. [`decode_ethernet`] builds a `RawRow` from a captured frame so
//! pcap input flows through the same path as a tshark export.

use crate::extractor::error::{ExtractError, Result};
use crate::extractor::types::{IpVersion, PacketRecord, ProtocolCounts, RawRow};
use etherparse::{LaxNetSlice, LaxSlicedPacket, TransportSlice};

const ETHERNET_HEADER_LEN: usize = 14;
const ETHERTYPE_ARP: u16 = 0x0806;
/// 802.1Q, 802.1ad and the legacy QinQ tag.
const VLAN_TPIDS: [u16; 3] = [0x8100, 0x88a8, 0x9100];
const ARP_IPV4_LEN: usize = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NetworkLayer<'a> {
    Ipv4 { src: &'a str, dst: &'a str },
    Ipv6 { src: &'a str, dst: &'a str },
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TransportLayer<'a> {
    Ports { src: String, dst: String },
    Arp { sender: &'a str, target: &'a str },
    Icmp,
    Absent,
}

fn present(field: &str) -> bool {
    !field.trim().is_empty()
}

fn decode_network(row: &RawRow) -> NetworkLayer<'_> {
    if present(&row.ip_src) || present(&row.ip_dst) {
        NetworkLayer::Ipv4 { src: row.ip_src.trim(), dst: row.ip_dst.trim() }
    } else if present(&row.ipv6_src) || present(&row.ipv6_dst) {
        NetworkLayer::Ipv6 { src: row.ipv6_src.trim(), dst: row.ipv6_dst.trim() }
    } else {
        NetworkLayer::Absent
    }
}

fn decode_transport(row: &RawRow) -> TransportLayer<'_> {
    // Only one of TCP/UDP is populated, so concatenation picks whichever is set.
    let src = format!("{}{}", row.tcp_srcport.trim(), row.udp_srcport.trim());
    let dst = format!("{}{}", row.tcp_dstport.trim(), row.udp_dstport.trim());
    if !src.is_empty() || !dst.is_empty() {
        TransportLayer::Ports { src, dst }
    } else if present(&row.arp_opcode) {
        TransportLayer::Arp { sender: row.arp_src_ip.trim(), target: row.arp_dst_ip.trim() }
    } else if present(&row.icmp_type) {
        TransportLayer::Icmp
    } else {
        TransportLayer::Absent
    }
}

fn parse_timestamp(raw: &str) -> Result<f64> {
    match raw.trim().parse::<f64>() {
        Ok(ts) if ts.is_finite() => Ok(ts),
        _ => Err(ExtractError::MalformedRecord {
            field: "frame.time_epoch",
            value: raw.to_string(),
        }),
    }
}

fn parse_frame_len(raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|_| ExtractError::MalformedRecord {
        field: "frame.len",
        value: raw.to_string(),
    })
}

/// Maps a raw row onto the canonical record.
///
/// Returns `Ok(None)` when the row has no usable signal, and
/// [`ExtractError::MalformedRecord`] when the timestamp or frame length is
/// not numeric.
pub fn normalize(row: &RawRow) -> Result<Option<PacketRecord>> {
    let timestamp = parse_timestamp(&row.timestamp)?;
    let frame_len = parse_frame_len(&row.frame_len)?;

    let src_mac = row.eth_src.trim();
    let dst_mac = row.eth_dst.trim();

    let network = decode_network(row);
    let (mut ip_version, mut src_addr, mut dst_addr) = match network {
        NetworkLayer::Ipv4 { src, dst } => (IpVersion::V4, src, dst),
        NetworkLayer::Ipv6 { src, dst } => (IpVersion::V6, src, dst),
        NetworkLayer::Absent => (IpVersion::Unknown, "", ""),
    };

    let (src_proto, dst_proto) = match decode_transport(row) {
        TransportLayer::Ports { src, dst } => (src, dst),
        TransportLayer::Arp { sender, target } => {
            ip_version = IpVersion::V4;
            src_addr = sender;
            dst_addr = target;
            ("arp".to_string(), "arp".to_string())
        }
        TransportLayer::Icmp => {
            if ip_version == IpVersion::Unknown {
                ip_version = IpVersion::V4;
            }
            ("icmp".to_string(), "icmp".to_string())
        }
        TransportLayer::Absent => {
            // Link layer is the only identifying entity left.
            if network == NetworkLayer::Absent {
                src_addr = src_mac;
                dst_addr = dst_mac;
            }
            (String::new(), String::new())
        }
    };

    let record = PacketRecord {
        timestamp,
        frame_len,
        src_mac: src_mac.to_string(),
        dst_mac: dst_mac.to_string(),
        ip_version,
        src_addr: src_addr.to_string(),
        dst_addr: dst_addr.to_string(),
        src_proto,
        dst_proto,
    };

    if has_signal(&record) { Ok(Some(record)) } else { Ok(None) }
}

/// True when at least one feature-relevant field survived resolution.
pub fn has_signal(record: &PacketRecord) -> bool {
    [
        &record.src_mac,
        &record.dst_mac,
        &record.src_addr,
        &record.dst_addr,
        &record.src_proto,
        &record.dst_proto,
    ]
    .iter()
    .any(|f| !f.is_empty())
}

/// Adds one row to the protocol distribution.
pub fn tally(row: &RawRow, counts: &mut ProtocolCounts) {
    let network = decode_network(row);
    match network {
        NetworkLayer::Ipv4 { .. } => counts.ipv4 += 1,
        NetworkLayer::Ipv6 { .. } => counts.ipv6 += 1,
        NetworkLayer::Absent => {}
    }
    if present(&row.tcp_srcport) || present(&row.tcp_dstport) {
        counts.tcp += 1;
    }
    if present(&row.udp_srcport) || present(&row.udp_dstport) {
        counts.udp += 1;
    }
    if present(&row.icmp_type) {
        counts.icmp += 1;
    }
    if present(&row.arp_opcode) {
        counts.arp += 1;
    }
    if network == NetworkLayer::Absent && decode_transport(row) == TransportLayer::Absent {
        counts.link_only += 1;
    }
}

/// Colon-separated lowercase MAC, as tshark prints it.
fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Fills the ARP fields from an Ethernet/IPv4 ARP payload.
fn parse_arp(payload: &[u8], row: &mut RawRow) {
    if payload.len() < ARP_IPV4_LEN || payload[4] != 6 || payload[5] != 4 {
        return;
    }
    let opcode = u16::from_be_bytes([payload[6], payload[7]]);
    let ipv4 = |b: &[u8]| format!("{}.{}.{}.{}", b[0], b[1], b[2], b[3]);

    row.arp_opcode  = opcode.to_string();
    row.arp_src_mac = format_mac(&payload[8..14]);
    row.arp_src_ip  = ipv4(&payload[14..18]);
    row.arp_dst_mac = format_mac(&payload[18..24]);
    row.arp_dst_ip  = ipv4(&payload[24..28]);
}

/// Unit of the sub-second part of a capture timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TsResolution {
    #[default]
    Micro,
    Nano,
}

/// `secs.fraction` with the digit count of the capture's resolution.
fn format_timestamp(secs: u32, frac: u32, resolution: TsResolution) -> String {
    match resolution {
        TsResolution::Micro => format!("{}.{:06}", secs, frac),
        TsResolution::Nano  => format!("{}.{:09}", secs, frac),
    }
}

/// EtherType after any VLAN tags, with the offset of its payload.
fn inner_ether_type(data: &[u8]) -> (u16, usize) {
    let mut offset = ETHERNET_HEADER_LEN - 2;
    let mut ether_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
    while VLAN_TPIDS.contains(&ether_type) && data.len() >= offset + 6 {
        offset += 4;
        ether_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
    }
    (ether_type, offset + 2)
}

/// Decodes a captured Ethernet frame into a raw row.
///
/// Only addresses, ports, ICMP type/code and ARP fields are extracted.
/// Slicing is lax: a frame cut short by the capture snaplen keeps every
/// header that fits. Whatever fails to parse is left empty; the timestamp
/// and original length are always set.
pub fn decode_ethernet(
    ts_sec:     u32,
    ts_frac:    u32,
    resolution: TsResolution,
    orig_len:   u32,
    data:       &[u8],
) -> RawRow {
    let mut row = RawRow {
        timestamp: format_timestamp(ts_sec, ts_frac, resolution),
        frame_len: orig_len.to_string(),
        ..Default::default()
    };

    if data.len() < ETHERNET_HEADER_LEN {
        return row;
    }
    row.eth_dst = format_mac(&data[0..6]);
    row.eth_src = format_mac(&data[6..12]);

    let (ether_type, payload) = inner_ether_type(data);
    if ether_type == ETHERTYPE_ARP {
        parse_arp(&data[payload..], &mut row);
        return row;
    }

    let sliced = match LaxSlicedPacket::from_ethernet(data) {
        Ok(s) => s,
        Err(_) => return row,
    };

    match &sliced.net {
        Some(LaxNetSlice::Ipv4(ipv4)) => {
            let h = ipv4.header();
            row.ip_src = h.source_addr().to_string();
            row.ip_dst = h.destination_addr().to_string();
        }
        Some(LaxNetSlice::Ipv6(ipv6)) => {
            let h = ipv6.header();
            row.ipv6_src = h.source_addr().to_string();
            row.ipv6_dst = h.destination_addr().to_string();
        }
        _ => {}
    }

    match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => {
            row.tcp_srcport = tcp.source_port().to_string();
            row.tcp_dstport = tcp.destination_port().to_string();
        }
        Some(TransportSlice::Udp(udp)) => {
            row.udp_srcport = udp.source_port().to_string();
            row.udp_dstport = udp.destination_port().to_string();
        }
        Some(TransportSlice::Icmpv4(icmp)) => {
            row.icmp_type = icmp.type_u8().to_string();
            row.icmp_code = icmp.code_u8().to_string();
        }
        Some(TransportSlice::Icmpv6(icmp)) => {
            row.icmp_type = icmp.type_u8().to_string();
            row.icmp_code = icmp.code_u8().to_string();
        }
        _ => {}
    }

    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;

    fn base(ts: &str, len: &str) -> RawRow {
        RawRow {
            timestamp: ts.to_string(),
            frame_len: len.to_string(),
            eth_src: "aa:aa:aa:aa:aa:01".to_string(),
            eth_dst: "aa:aa:aa:aa:aa:02".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_tcp_over_ipv4() {
        let row = RawRow {
            ip_src: "10.0.0.1".into(),
            ip_dst: "10.0.0.2".into(),
            tcp_srcport: "80".into(),
            tcp_dstport: "4000".into(),
            ..base("0.0", "100")
        };
        let rec = normalize(&row).unwrap().unwrap();
        assert_eq!(rec.ip_version, IpVersion::V4);
        assert_eq!(rec.src_socket(), "10.0.0.1:80");
        assert_eq!(rec.dst_socket(), "10.0.0.2:4000");
        assert_eq!(rec.frame_len, 100);
    }

    #[test]
    fn test_udp_over_ipv6() {
        let row = RawRow {
            ipv6_src: "fe80::1".into(),
            ipv6_dst: "fe80::2".into(),
            udp_srcport: "53".into(),
            udp_dstport: "5353".into(),
            ..base("1.5", "90")
        };
        let rec = normalize(&row).unwrap().unwrap();
        assert_eq!(rec.ip_version, IpVersion::V6);
        assert_eq!(rec.src_addr, "fe80::1");
        assert_eq!(rec.src_proto, "53");
        assert_eq!(rec.dst_proto, "5353");
    }

    #[test]
    fn test_ipv4_wins_over_ipv6() {
        let row = RawRow {
            ip_src: "10.0.0.1".into(),
            ip_dst: "10.0.0.2".into(),
            ipv6_src: "fe80::1".into(),
            ipv6_dst: "fe80::2".into(),
            ..base("0", "60")
        };
        let rec = normalize(&row).unwrap().unwrap();
        assert_eq!(rec.ip_version, IpVersion::V4);
        assert_eq!(rec.src_addr, "10.0.0.1");
    }

    #[test]
    fn test_arp_overrides_addresses() {
        let row = RawRow {
            arp_opcode: "1".into(),
            arp_src_ip: "192.168.1.10".into(),
            arp_dst_ip: "192.168.1.1".into(),
            ..base("2.0", "42")
        };
        let rec = normalize(&row).unwrap().unwrap();
        assert_eq!(rec.ip_version, IpVersion::V4);
        assert_eq!(rec.src_addr, "192.168.1.10");
        assert_eq!(rec.dst_addr, "192.168.1.1");
        assert_eq!(rec.src_proto, "arp");
        assert_eq!(rec.dst_proto, "arp");
    }

    #[test]
    fn test_ports_take_precedence_over_icmp() {
        let row = RawRow {
            ip_src: "10.0.0.1".into(),
            ip_dst: "10.0.0.2".into(),
            udp_srcport: "1000".into(),
            udp_dstport: "2000".into(),
            icmp_type: "3".into(),
            ..base("0", "60")
        };
        assert_eq!(normalize(&row).unwrap().unwrap().src_proto, "1000");
    }

    #[test]
    fn test_icmp_token() {
        let row = RawRow {
            ip_src: "10.0.0.1".into(),
            ip_dst: "10.0.0.9".into(),
            icmp_type: "8".into(),
            ..base("0", "98")
        };
        let rec = normalize(&row).unwrap().unwrap();
        assert_eq!(rec.src_socket(), "10.0.0.1:icmp");
        assert_eq!(rec.dst_socket(), "10.0.0.9:icmp");
    }

    #[test]
    fn test_mac_fallback() {
        let rec = normalize(&base("0", "60")).unwrap().unwrap();
        assert_eq!(rec.ip_version, IpVersion::Unknown);
        assert_eq!(rec.src_addr, "aa:aa:aa:aa:aa:01");
        assert_eq!(rec.dst_addr, "aa:aa:aa:aa:aa:02");
        assert_eq!(rec.src_proto, "");
    }

    #[test]
    fn test_ip_without_transport_keeps_ip() {
        let row = RawRow {
            ip_src: "10.0.0.1".into(),
            ip_dst: "224.0.0.1".into(),
            ..base("0", "46")
        };
        let rec = normalize(&row).unwrap().unwrap();
        assert_eq!(rec.src_addr, "10.0.0.1");
        assert_eq!(rec.src_proto, "");
    }

    #[test]
    fn test_no_signal_is_dropped() {
        let row = RawRow { timestamp: "1.0".into(), frame_len: "60".into(), ..Default::default() };
        assert_eq!(normalize(&row).unwrap(), None);
    }

    #[test]
    fn test_malformed_fields() {
        let bad_ts = base("yesterday", "60");
        assert!(matches!(
            normalize(&bad_ts),
            Err(ExtractError::MalformedRecord { field: "frame.time_epoch", .. })
        ));
        let bad_len = base("1.0", "-4");
        assert!(matches!(
            normalize(&bad_len),
            Err(ExtractError::MalformedRecord { field: "frame.len", .. })
        ));
        assert!(normalize(&base("NaN", "60")).is_err());
    }

    #[test]
    fn test_tally() {
        let mut counts = ProtocolCounts::default();
        let tcp = RawRow {
            ip_src: "10.0.0.1".into(),
            tcp_srcport: "80".into(),
            ..base("0", "60")
        };
        tally(&tcp, &mut counts);
        tally(&base("0", "60"), &mut counts);
        assert_eq!(counts.ipv4, 1);
        assert_eq!(counts.tcp, 1);
        assert_eq!(counts.link_only, 1);
        assert_eq!(counts.udp, 0);
    }

    #[test]
    fn test_decode_tcp_frame() {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .tcp(80, 4000, 1, 1024);
        let payload = [0u8; 10];
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, &payload).unwrap();

        let row = decode_ethernet(12, 500, TsResolution::Micro, frame.len() as u32, &frame);
        assert_eq!(row.timestamp, "12.000500");
        assert_eq!(row.eth_src, "01:02:03:04:05:06");
        assert_eq!(row.eth_dst, "07:08:09:0a:0b:0c");
        assert_eq!(row.ip_src, "10.0.0.1");
        assert_eq!(row.tcp_dstport, "4000");
        assert!(row.udp_srcport.is_empty());

        let rec = normalize(&row).unwrap().unwrap();
        assert_eq!(rec.src_socket(), "10.0.0.1:80");
        assert!((rec.timestamp - 12.0005).abs() < 1e-9);
    }

    #[test]
    fn test_decode_arp_frame() {
        let mut frame = vec![0xffu8; 6];
        frame.extend_from_slice(&[0, 1, 2, 3, 4, 5]);
        frame.extend_from_slice(&[0x08, 0x06]);
        frame.extend_from_slice(&[0, 1, 0x08, 0x00, 6, 4, 0, 1]);
        frame.extend_from_slice(&[0, 1, 2, 3, 4, 5, 192, 168, 1, 10]);
        frame.extend_from_slice(&[0, 0, 0, 0, 0, 0, 192, 168, 1, 1]);

        let row = decode_ethernet(0, 0, TsResolution::Micro, 42, &frame);
        assert_eq!(row.arp_opcode, "1");
        assert_eq!(row.arp_src_ip, "192.168.1.10");
        assert_eq!(row.arp_dst_ip, "192.168.1.1");

        let rec = normalize(&row).unwrap().unwrap();
        assert_eq!(rec.src_socket(), "192.168.1.10:arp");
    }

    #[test]
    fn test_decode_truncated_frame_keeps_time_and_length() {
        let row = decode_ethernet(3, 0, TsResolution::Micro, 1514, &[0u8; 4]);
        assert_eq!(row.frame_len, "1514");
        assert!(row.eth_src.is_empty());
        assert_eq!(normalize(&row).unwrap(), None);
    }

    #[test]
    fn test_decode_snaplen_cut_frame_keeps_headers() {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .tcp(443, 51000, 1, 1024);
        let payload = [0u8; 200];
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, &payload).unwrap();
        let orig_len = frame.len() as u32;
        frame.truncate(68);

        let row = decode_ethernet(1, 0, TsResolution::Micro, orig_len, &frame);
        assert_eq!(row.frame_len, orig_len.to_string());
        assert_eq!(row.ip_src, "10.0.0.1");
        assert_eq!(row.tcp_srcport, "443");

        let rec = normalize(&row).unwrap().unwrap();
        assert_eq!(rec.src_socket(), "10.0.0.1:443");
        assert_eq!(rec.dst_socket(), "10.0.0.2:51000");
    }

    #[test]
    fn test_decode_nanosecond_timestamp() {
        let row = decode_ethernet(100, 50_000_000, TsResolution::Nano, 60, &[0u8; 4]);
        assert_eq!(row.timestamp, "100.050000000");
        let row = decode_ethernet(100, 50_000, TsResolution::Micro, 60, &[0u8; 4]);
        assert_eq!(row.timestamp, "100.050000");
    }

    #[test]
    fn test_decode_vlan_tagged_arp_frame() {
        let mut frame = vec![0xffu8; 6];
        frame.extend_from_slice(&[0, 1, 2, 3, 4, 5]);
        frame.extend_from_slice(&[0x81, 0x00, 0x00, 0x64, 0x08, 0x06]);
        frame.extend_from_slice(&[0, 1, 0x08, 0x00, 6, 4, 0, 2]);
        frame.extend_from_slice(&[0, 1, 2, 3, 4, 5, 172, 16, 0, 9]);
        frame.extend_from_slice(&[0, 0, 0, 0, 0, 0, 172, 16, 0, 1]);

        let row = decode_ethernet(0, 0, TsResolution::Micro, 46, &frame);
        assert_eq!(row.arp_opcode, "2");
        assert_eq!(row.arp_src_ip, "172.16.0.9");
        assert_eq!(row.arp_dst_ip, "172.16.0.1");
    }
}
