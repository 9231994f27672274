//! Shared types for the DHT subsystem: peer identity, packet kinds, and
//! response status codes.
//!
//! These types are deliberately free of any I/O or protocol-framing logic —
//! just the vocabulary that `dht-codec`, `dht-store`, `dht-routing`,
//! `dht-dispatch`, and `dht-engine` all need to agree on.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// A 32-byte hash derived from a peer's overlay identity public-key material.
pub type PeerId = [u8; 32];

/// A 32-byte correlation id attached to every request/response packet.
pub type Cid = [u8; 32];

/// A known remote peer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Peer {
    /// Opaque overlay-identity blob, as carried on the wire (base64 ASCII
    /// when persisted or sent in the envelope `from` field).
    pub identity: Vec<u8>,
    /// 32-byte hash of `identity`.
    pub peer_id: PeerId,
    /// Set when the peer is considered unavailable; cleared when it answers.
    #[serde(skip, default)]
    pub locked: bool,
    #[serde(skip, default = "SystemTime::now")]
    pub first_seen: SystemTime,
    #[serde(skip)]
    pub last_response: Option<SystemTime>,
}

impl Peer {
    /// Construct a peer from its raw identity blob, deriving `peer_id` via
    /// [`hash_identity`].
    pub fn new(identity: Vec<u8>) -> Self {
        let peer_id = hash_identity(&identity);
        Self {
            identity,
            peer_id,
            locked: false,
            first_seen: SystemTime::now(),
            last_response: None,
        }
    }

    /// Base64 encoding of the identity blob, as written to `nodes.txt` and
    /// placed in the envelope `from` field.
    pub fn identity_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(&self.identity)
    }

    /// Mark this peer as having just answered a request.
    pub fn mark_alive(&mut self) {
        self.locked = false;
        self.last_response = Some(SystemTime::now());
    }
}

/// Derive a peer-id from an overlay identity blob.
///
/// The wire-level identity material is opaque to this crate; only its
/// content-hash matters for routing.
pub fn hash_identity(identity: &[u8]) -> PeerId {
    *blake3::hash(identity).as_bytes()
}

/// XOR distance between two 32-byte ids, as a big-endian unsigned magnitude.
/// Comparison between two distances is lexicographic byte comparison.
pub fn xor_distance(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// One of the three content-addressed packet kinds stored in the DHT.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketKind {
    Index,
    Email,
    Contact,
}

impl PacketKind {
    /// The one-byte ASCII tag this kind is identified by on the wire and in
    /// stored packet bodies.
    pub fn tag(self) -> u8 {
        match self {
            PacketKind::Index => b'I',
            PacketKind::Email => b'E',
            PacketKind::Contact => b'C',
        }
    }

    /// Parse a kind from its wire tag byte.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'I' => Some(PacketKind::Index),
            b'E' => Some(PacketKind::Email),
            b'C' => Some(PacketKind::Contact),
            _ => None,
        }
    }
}

/// Response status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum StatusCode {
    Ok = 1,
    GeneralError = 2,
    NoDataFound = 3,
    InvalidPacket = 4,
    InsufficientHashcash = 5,
    InvalidHashcash = 6,
    NoDiskSpace = 7,
}

impl StatusCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(StatusCode::Ok),
            2 => Some(StatusCode::GeneralError),
            3 => Some(StatusCode::NoDataFound),
            4 => Some(StatusCode::InvalidPacket),
            5 => Some(StatusCode::InsufficientHashcash),
            6 => Some(StatusCode::InvalidHashcash),
            7 => Some(StatusCode::NoDiskSpace),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    #[error("unknown packet kind tag: {0:#x}")]
    UnknownKind(u8),
    #[error("unknown status code: {0}")]
    UnknownStatus(u8),
}

/// Kademlia K: replication/neighborhood size.
pub const KADEMLIA_K: usize = 20;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_is_deterministic() {
        let p1 = Peer::new(b"identity-blob".to_vec());
        let p2 = Peer::new(b"identity-blob".to_vec());
        assert_eq!(p1.peer_id, p2.peer_id);
    }

    #[test]
    fn xor_distance_self_is_zero() {
        let a = [0x42u8; 32];
        assert_eq!(xor_distance(&a, &a), [0u8; 32]);
    }

    #[test]
    fn xor_distance_is_commutative() {
        let a = [0x11u8; 32];
        let b = [0x22u8; 32];
        assert_eq!(xor_distance(&a, &b), xor_distance(&b, &a));
    }

    #[test]
    fn packet_kind_roundtrip() {
        for kind in [PacketKind::Index, PacketKind::Email, PacketKind::Contact] {
            assert_eq!(PacketKind::from_tag(kind.tag()), Some(kind));
        }
    }

    #[test]
    fn packet_kind_unknown_tag() {
        assert_eq!(PacketKind::from_tag(b'Z'), None);
    }

    #[test]
    fn status_code_roundtrip() {
        assert_eq!(StatusCode::from_u8(1), Some(StatusCode::Ok));
        assert_eq!(StatusCode::from_u8(99), None);
    }
}
