use serde::Serialize;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Set to `true` by the Ctrl+C handler; checked between records.
pub type ShutdownFlag = Arc<AtomicBool>;

/// One output row. Its length always equals the header length.
pub type FeatureVector = Vec<f64>;

/// A raw packet row as delivered by a capture decoder.
///
/// Field layout mirrors a tshark `-T fields` export: every field is text and
/// an absent layer leaves its fields empty. Both the TSV and the pcap source
/// produce this shape, so the normalizer has a single input contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    pub timestamp:     String,
    pub frame_len:     String,
    pub eth_src:       String,
    pub eth_dst:       String,
    pub ip_src:        String,
    pub ip_dst:        String,
    pub tcp_srcport:   String,
    pub tcp_dstport:   String,
    pub udp_srcport:   String,
    pub udp_dstport:   String,
    pub icmp_type:     String,
    pub icmp_code:     String,
    pub arp_opcode:    String,
    pub arp_src_mac:   String,
    pub arp_src_ip:    String,
    pub arp_dst_mac:   String,
    pub arp_dst_ip:    String,
    pub ipv6_src:      String,
    pub ipv6_dst:      String,
}

/// Network-layer version of a canonical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
    Unknown,
}

/// The normalized per-packet tuple consumed by key building and assembly.
///
/// Address and port fields are empty strings, never absent, when the layer
/// does not apply, so key construction is uniform across protocols.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketRecord {
    /// Seconds since the epoch (or capture start).
    pub timestamp:  f64,
    pub frame_len:  u64,
    pub src_mac:    String,
    pub dst_mac:    String,
    pub ip_version: IpVersion,
    pub src_addr:   String,
    pub dst_addr:   String,
    /// Port number, or a protocol token such as `arp` / `icmp`.
    pub src_proto:  String,
    pub dst_proto:  String,
}

impl PacketRecord {
    /// `address:port-or-protocol` for the sending side.
    pub fn src_socket(&self) -> String {
        format!("{}:{}", self.src_addr, self.src_proto)
    }

    /// `address:port-or-protocol` for the receiving side.
    pub fn dst_socket(&self) -> String {
        format!("{}:{}", self.dst_addr, self.dst_proto)
    }
}

/// Memory class a key kind is budgeted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyClass {
    Host,
    Session,
}

/// The five statistical channels a packet can update, in vector order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyKind {
    /// Source MAC address; observes frame length.
    Mac,
    /// Source address; observes frame length.
    Host,
    /// Source socket; observes inter-arrival time.
    Jitter,
    /// Unordered socket pair; observes frame length and inter-arrival time.
    SocketPair,
    /// Ordered socket pair; same observations as [`KeyKind::SocketPair`].
    SocketDir,
}

impl KeyKind {
    /// All kinds in the fixed order used by key building and the header.
    pub const ALL: [KeyKind; 5] = [
        KeyKind::Mac,
        KeyKind::Host,
        KeyKind::Jitter,
        KeyKind::SocketPair,
        KeyKind::SocketDir,
    ];

    pub fn class(self) -> KeyClass {
        match self {
            KeyKind::Mac | KeyKind::Host => KeyClass::Host,
            KeyKind::Jitter | KeyKind::SocketPair | KeyKind::SocketDir => KeyClass::Session,
        }
    }

    /// Paired kinds track two scalars plus their covariance.
    pub fn is_paired(self) -> bool {
        matches!(self, KeyKind::SocketPair | KeyKind::SocketDir)
    }

    /// Column-name prefix used by the header.
    pub fn prefix(self) -> &'static str {
        match self {
            KeyKind::Mac        => "mac",
            KeyKind::Host       => "host",
            KeyKind::Jitter     => "jitter",
            KeyKind::SocketPair => "sock_bi",
            KeyKind::SocketDir  => "sock_dir",
        }
    }

    /// Parses the CLI spelling of a kind.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "mac"         => Some(KeyKind::Mac),
            "host"        => Some(KeyKind::Host),
            "jitter"      => Some(KeyKind::Jitter),
            "socket-pair" => Some(KeyKind::SocketPair),
            "socket-dir"  => Some(KeyKind::SocketDir),
            _             => None,
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// A statistical key: the channel kind plus its concatenated identity.
///
/// An empty `id` means the packet carries no identity for this channel
/// (e.g. no source MAC); the assembler emits a zero block and skips it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatKey {
    pub kind: KeyKind,
    pub id:   String,
}

impl StatKey {
    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }
}

/// Per-protocol packet counts for the run summary.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ProtocolCounts {
    pub ipv4:      u64,
    pub ipv6:      u64,
    pub tcp:       u64,
    pub udp:       u64,
    pub icmp:      u64,
    pub arp:       u64,
    pub link_only: u64,
}

/// Running totals for one extraction run.
///
/// `records_seen - dropped() == vectors_out` holds after every record.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RunStats {
    pub records_seen: u64,
    /// Records with no usable signal after normalization.
    pub no_signal:    u64,
    /// Records whose timestamp or length failed to parse.
    pub malformed:    u64,
    pub vectors_out:  u64,
    pub evictions:    u64,
    pub protocols:    ProtocolCounts,
}

impl RunStats {
    /// Records that produced no vector, for either reason.
    pub fn dropped(&self) -> u64 {
        self.no_signal + self.malformed
    }

    pub fn reconciles(&self) -> bool {
        self.records_seen == self.dropped() + self.vectors_out
    }
}
