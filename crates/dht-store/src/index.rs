//! Index packet layout: per-recipient `(email-key, delete-verifier)` entries.
//!
//! `kind (1) || version (1) || reserved (36) || packet-dv (32) || n (1) ||
//! n * (email-key (32) || dv (32))`.
//!
//! The packet-level `dv` at offset 38 mirrors the Email layout but is not
//! consulted for entry deletion — each entry carries its own `dv`, matched
//! individually against a supplied pre-image (spec invariant: index delete
//! is partial, removing only the entries whose `dv` matches).

use sha2::{Digest, Sha256};

use crate::{Result, StoreError};

const RESERVED_LEN: usize = 36;
const HEADER_LEN: usize = 2 + RESERVED_LEN + 32; // kind, version, reserved, packet-dv

/// One `(email-key, delete-verifier)` entry inside a stored Index packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub email_key: [u8; 32],
    pub dv: [u8; 32],
}

/// A parsed Index packet, ready for entry-level mutation and re-encoding.
#[derive(Clone, Debug)]
pub struct IndexPacket {
    pub version: u8,
    reserved: [u8; RESERVED_LEN],
    pub packet_dv: [u8; 32],
    pub entries: Vec<IndexEntry>,
}

impl IndexPacket {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN + 1 {
            return Err(StoreError::HeaderTooShort);
        }
        let version = bytes[1];
        let mut reserved = [0u8; RESERVED_LEN];
        reserved.copy_from_slice(&bytes[2..2 + RESERVED_LEN]);
        let mut packet_dv = [0u8; 32];
        packet_dv.copy_from_slice(&bytes[2 + RESERVED_LEN..HEADER_LEN]);

        let count = bytes[HEADER_LEN] as usize;
        let mut offset = HEADER_LEN + 1;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            if offset + 64 > bytes.len() {
                return Err(StoreError::HeaderTooShort);
            }
            let mut email_key = [0u8; 32];
            let mut dv = [0u8; 32];
            email_key.copy_from_slice(&bytes[offset..offset + 32]);
            dv.copy_from_slice(&bytes[offset + 32..offset + 64]);
            entries.push(IndexEntry { email_key, dv });
            offset += 64;
        }

        Ok(Self {
            version,
            reserved,
            packet_dv,
            entries,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + 1 + self.entries.len() * 64);
        out.push(dht_types::PacketKind::Index.tag());
        out.push(self.version);
        out.extend_from_slice(&self.reserved);
        out.extend_from_slice(&self.packet_dv);
        out.push(self.entries.len() as u8);
        for entry in &self.entries {
            out.extend_from_slice(&entry.email_key);
            out.extend_from_slice(&entry.dv);
        }
        out
    }
}

/// SHA-256 of a candidate delete-authorization pre-image.
pub fn sha256(preimage: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(preimage);
    hasher.finalize().into()
}

/// Does `preimage`'s SHA-256 match an entry's delete verifier?
pub fn verify(preimage: &[u8; 32], dv: [u8; 32]) -> bool {
    sha256(preimage) == dv
}
