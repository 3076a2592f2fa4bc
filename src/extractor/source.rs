//! Record sources for replay.
//!
//! Both sources are lazy iterators of `Result<RawRow>` and read one record at
//! a time, so arbitrarily long captures stream through with constant memory.
//! [`TsvSource`] reads a tshark field export; [`PcapSource`] reads a legacy
//! pcap file and decodes each frame with [`decode_ethernet`].

use crate::extractor::error::{ExtractError, Result};
use crate::extractor::parsers::{decode_ethernet, TsResolution};
use crate::extractor::types::RawRow;
use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter};
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, PcapBlockOwned, PcapError};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// tshark fields expected in a TSV export, in column order. Matches
/// `tshark -T fields -E header=y -E occurrence=f -e <field>...`.
pub const TSHARK_FIELDS: [&str; 19] = [
    "frame.time_epoch",
    "frame.len",
    "eth.src",
    "eth.dst",
    "ip.src",
    "ip.dst",
    "tcp.srcport",
    "tcp.dstport",
    "udp.srcport",
    "udp.dstport",
    "icmp.type",
    "icmp.code",
    "arp.opcode",
    "arp.src.hw_mac",
    "arp.src.proto_ipv4",
    "arp.dst.hw_mac",
    "arp.dst.proto_ipv4",
    "ipv6.src",
    "ipv6.dst",
];

/// Reader buffer size for pcap input.
const PCAP_BUFFER: usize = 65536;

// ── TSV ──────────────────────────────────────────────────────────────────────

pub struct TsvSource<R: Read> {
    records: StringRecordsIntoIter<R>,
}

impl<R: Read> TsvSource<R> {
    /// Wraps a reader positioned at the header line.
    pub fn new(reader: R) -> Self {
        let records = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .quoting(false)
            .from_reader(reader)
            .into_records();
        Self { records }
    }
}

impl TsvSource<File> {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(File::open(path)?))
    }
}

fn row_from_record(record: &StringRecord) -> RawRow {
    // Short rows are padded with empty fields.
    let f = |i: usize| record.get(i).unwrap_or("").to_string();
    RawRow {
        timestamp:   f(0),
        frame_len:   f(1),
        eth_src:     f(2),
        eth_dst:     f(3),
        ip_src:      f(4),
        ip_dst:      f(5),
        tcp_srcport: f(6),
        tcp_dstport: f(7),
        udp_srcport: f(8),
        udp_dstport: f(9),
        icmp_type:   f(10),
        icmp_code:   f(11),
        arp_opcode:  f(12),
        arp_src_mac: f(13),
        arp_src_ip:  f(14),
        arp_dst_mac: f(15),
        arp_dst_ip:  f(16),
        ipv6_src:    f(17),
        ipv6_dst:    f(18),
    }
}

impl<R: Read> Iterator for TsvSource<R> {
    type Item = Result<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        Some(match record {
            Ok(record) => Ok(row_from_record(&record)),
            // A broken read ends the stream; a bad line only loses itself.
            Err(e) if e.is_io_error() => Err(ExtractError::Csv(e)),
            Err(e) => Err(ExtractError::MalformedRecord {
                field: "row",
                value: e.to_string(),
            }),
        })
    }
}

// ── PCAP ─────────────────────────────────────────────────────────────────────

/// Global-header magic of a nanosecond-resolution capture, in either byte order.
const NANOSECOND_MAGIC: [u32; 2] = [0xa1b2_3c4d, 0x4d3c_b2a1];

pub struct PcapSource<R: Read> {
    reader:     LegacyPcapReader<R>,
    resolution: TsResolution,
    done:       bool,
}

impl<R: Read> PcapSource<R> {
    /// Reads the global header.
    ///
    /// # Errors
    /// [`ExtractError::Pcap`] if the stream is not a legacy pcap file.
    pub fn new(reader: R) -> Result<Self> {
        let reader = LegacyPcapReader::new(PCAP_BUFFER, reader)
            .map_err(|e| ExtractError::Pcap(format!("not a legacy pcap file: {:?}", e)))?;
        Ok(Self {
            reader,
            resolution: TsResolution::Micro,
            done: false,
        })
    }
}

impl PcapSource<File> {
    pub fn open(path: &Path) -> Result<Self> {
        Self::new(File::open(path)?)
    }
}

impl<R: Read> Iterator for PcapSource<R> {
    type Item = Result<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.reader.next() {
                Ok((offset, block)) => {
                    let row = match block {
                        PcapBlockOwned::LegacyHeader(ref hdr) => {
                            if NANOSECOND_MAGIC.contains(&hdr.magic_number) {
                                self.resolution = TsResolution::Nano;
                            }
                            None
                        }
                        // ts_usec holds nanoseconds in a nanosecond capture.
                        PcapBlockOwned::Legacy(ref pkt) => Some(decode_ethernet(
                            pkt.ts_sec,
                            pkt.ts_usec,
                            self.resolution,
                            pkt.origlen,
                            pkt.data,
                        )),
                        _ => None,
                    };
                    drop(block);
                    self.reader.consume(offset);
                    if let Some(row) = row {
                        return Some(Ok(row));
                    }
                }
                Err(PcapError::Eof) => self.done = true,
                Err(PcapError::Incomplete) => {
                    if let Err(e) = self.reader.refill() {
                        self.done = true;
                        return Some(Err(ExtractError::Pcap(format!("refill error: {:?}", e))));
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(ExtractError::Pcap(format!("parse error: {:?}", e))));
                }
            }
        }
        None
    }
}
