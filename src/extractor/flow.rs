//! Statistical key construction.
//!
//! A record updates up to five channels, always built in the same order:
//! source MAC, source address, source socket (jitter), the unordered socket
//! pair and the ordered socket pair. Socket tokens are `address:port` (or
//! `address:arp` / `address:icmp`).
//!
//! The unordered pair is canonicalized by sorting the two tokens, so
//! `A -> B` and `B -> A` land in the same accumulator. The ordered pair keeps
//! the sender first, which separates a one-sided flood from the aggregate
//! conversation it belongs to.

use crate::extractor::types::{KeyKind, PacketRecord, StatKey};

/// Builds the keys of every kind in `kinds`, in [`KeyKind::ALL`] order.
///
/// A kind whose identity is missing from the record (no source MAC, no
/// addresses) yields a key with an empty id rather than being skipped, so
/// the output always has one key per enabled kind.
pub fn build_keys(record: &PacketRecord, kinds: &[KeyKind]) -> Vec<StatKey> {
    KeyKind::ALL
        .iter()
        .copied()
        .filter(|k| kinds.contains(k))
        .map(|kind| StatKey { kind, id: key_id(record, kind) })
        .collect()
}

fn key_id(record: &PacketRecord, kind: KeyKind) -> String {
    match kind {
        KeyKind::Mac  => record.src_mac.clone(),
        KeyKind::Host => record.src_addr.clone(),
        KeyKind::Jitter => {
            if record.src_addr.is_empty() {
                String::new()
            } else {
                record.src_socket()
            }
        }
        KeyKind::SocketPair => {
            if !has_endpoints(record) {
                return String::new();
            }
            let mut a = record.src_socket();
            let mut b = record.dst_socket();

            // Sort so both directions of a conversation share one key.
            if a > b {
                std::mem::swap(&mut a, &mut b);
            }
            format!("{}<->{}", a, b)
        }
        KeyKind::SocketDir => {
            if !has_endpoints(record) {
                return String::new();
            }
            format!("{}->{}", record.src_socket(), record.dst_socket())
        }
    }
}

fn has_endpoints(record: &PacketRecord) -> bool {
    !record.src_addr.is_empty() || !record.dst_addr.is_empty()
}
