//! The key space shared by both backends.
//!
//! Record keys are the packed lowercased owner name with a one-octet
//! tag appended; the hash-file backend stores one entry per record
//! under the same tagged key, the KV backend one value holding all
//! the frames.
//!
//! The location maps live in the same store under a reserved
//! namespace that cannot collide with a name (no wire-form name
//! starts with a zero octet followed by anything):
//!
//! ```text
//!     0x00 '%' af plen addr-octets     location map
//!     0x00 '@' af plen addr-octets     resolver map
//! ```
//!
//! where `af` is 1 for IPv4 and 2 for IPv6, `plen` the prefix length,
//! and the address truncated to the prefix and zero-padded to whole
//! octets.  Longest-prefix matching probes these keys from the
//! longest prefix down.

use std::net::IpAddr;

/// Tag appended to a packed name to form its record key.
pub const RECORD_TAG: u8 = b'R';

const MAP_NAMESPACE: u8 = 0x00;
const MAP_KIND_LOCATION: u8 = b'%';
const MAP_KIND_RESOLVER: u8 = b'@';

/// Which of the two prefix maps a key belongs to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum MapKind {
    /// Keyed by the client subnet or transport source address.
    Location,
    /// Keyed by the resolver's source address, for resolver-sensitive
    /// owners.
    Resolver,
}

impl MapKind {
    fn octet(self) -> u8 {
        match self {
            MapKind::Location => MAP_KIND_LOCATION,
            MapKind::Resolver => MAP_KIND_RESOLVER,
        }
    }
}

/// The record key for a packed lowercased wire-form name.
pub fn record_key(name_octets: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(name_octets.len() + 1);
    key.extend_from_slice(name_octets);
    key.push(RECORD_TAG);
    key
}

/// The map key for one (address, prefix length) pair.
pub fn map_key(kind: MapKind, addr: IpAddr, prefix_len: u8) -> Vec<u8> {
    let (af, octets, max_prefix) = split_addr(addr);
    let prefix_len = std::cmp::min(prefix_len, max_prefix);

    let mut key = Vec::with_capacity(4 + octets.len());
    key.push(MAP_NAMESPACE);
    key.push(kind.octet());
    key.push(af);
    key.push(prefix_len);
    push_truncated(&mut key, &octets, prefix_len);
    key
}

/// Map keys for every prefix of `addr` from `max_prefix` down to 0,
/// longest first: the probe order for a longest-prefix match.
pub fn map_probe_keys(kind: MapKind, addr: IpAddr, max_prefix: u8) -> Vec<Vec<u8>> {
    let limit = match addr {
        IpAddr::V4(_) => std::cmp::min(max_prefix, 32),
        IpAddr::V6(_) => std::cmp::min(max_prefix, 128),
    };

    let mut keys = Vec::with_capacity(limit as usize + 1);
    for prefix_len in (0..=limit).rev() {
        keys.push(map_key(kind, addr, prefix_len));
    }
    keys
}

/// The prefix length a probe-key index corresponds to, given the
/// longest prefix probed.
pub fn probe_index_to_prefix(max_prefix: u8, index: usize) -> u8 {
    max_prefix.saturating_sub(index as u8)
}

fn split_addr(addr: IpAddr) -> (u8, Vec<u8>, u8) {
    match addr {
        IpAddr::V4(a) => (1, a.octets().to_vec(), 32),
        IpAddr::V6(a) => (2, a.octets().to_vec(), 128),
    }
}

fn push_truncated(out: &mut Vec<u8>, octets: &[u8], prefix_len: u8) {
    let whole = (prefix_len / 8) as usize;
    out.extend_from_slice(&octets[..whole]);
    if prefix_len % 8 != 0 {
        out.push(octets[whole] & (0xffu8 << (8 - prefix_len % 8)));
    }
}
