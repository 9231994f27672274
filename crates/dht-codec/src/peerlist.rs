//! `PeerList` response bodies, in both the legacy V4 and current V5 wire
//! formats.
//!
//! ```text
//! V4: 'L'|'P' || 4 || count (u16) || count * identity-fixed-384
//! V5: 'L'|'P' || 5 || count (u16) || count * identity-variable
//! ```

use crate::{CodecError, Result};

/// Marker byte shared by both peer-list versions.
pub const MARKER: u8 = b'L';

/// Width of a V4 identity record: 381 identity bytes followed by 3
/// zero-padding bytes the legacy format reserves for a signing-key-type
/// field it never actually encodes.
const V4_IDENTITY_WIDTH: usize = 381;
const V4_RECORD_WIDTH: usize = V4_IDENTITY_WIDTH + 3;

/// One identity blob as carried in a [`PeerList`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerListEntry {
    pub identity: Vec<u8>,
}

/// A list of peer identities returned in answer to a Find Close Peers
/// Request, in either wire version.
#[derive(Clone, Debug)]
pub struct PeerList {
    pub version: u8,
    pub entries: Vec<PeerListEntry>,
}

impl PeerList {
    pub fn new(version: u8, entries: Vec<PeerListEntry>) -> Self {
        Self { version, entries }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        match self.version {
            4 => encode_v4(&self.entries),
            5 => Ok(encode_v5(&self.entries)),
            other => Err(CodecError::UnsupportedVersion(other)),
        }
    }

    pub fn decode(version: u8, buf: &[u8]) -> Result<Self> {
        let entries = match version {
            4 => decode_v4(buf)?,
            5 => decode_v5(buf)?,
            other => return Err(CodecError::UnsupportedVersion(other)),
        };
        Ok(Self { version, entries })
    }
}

fn count_prefix(n: usize) -> [u8; 2] {
    (n as u16).to_be_bytes()
}

fn read_count(buf: &[u8], offset: &mut usize) -> Result<usize> {
    if *offset + 2 > buf.len() {
        return Err(CodecError::Truncated {
            need: *offset + 2,
            have: buf.len(),
        });
    }
    let count = u16::from_be_bytes([buf[*offset], buf[*offset + 1]]) as usize;
    *offset += 2;
    Ok(count)
}

/// V4 identities are truncated/zero-padded to [`V4_IDENTITY_WIDTH`] bytes —
/// the legacy format has no way to carry a longer key, which is exactly the
/// workaround this encodes. Prefer V5 on the wire.
fn encode_v4(entries: &[PeerListEntry]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(2 + entries.len() * V4_RECORD_WIDTH);
    out.extend_from_slice(&count_prefix(entries.len()));
    for entry in entries {
        let mut record = [0u8; V4_RECORD_WIDTH];
        let take = entry.identity.len().min(V4_IDENTITY_WIDTH);
        record[..take].copy_from_slice(&entry.identity[..take]);
        // last 3 bytes stay zero: the signing-key-type field the legacy
        // format never populates.
        out.extend_from_slice(&record);
    }
    Ok(out)
}

fn decode_v4(buf: &[u8]) -> Result<Vec<PeerListEntry>> {
    let mut offset = 0usize;
    let count = read_count(buf, &mut offset)?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        if offset + V4_RECORD_WIDTH > buf.len() {
            return Err(CodecError::Truncated {
                need: offset + V4_RECORD_WIDTH,
                have: buf.len(),
            });
        }
        let record = &buf[offset..offset + V4_RECORD_WIDTH];
        offset += V4_RECORD_WIDTH;
        let identity = record[..V4_IDENTITY_WIDTH].to_vec();
        entries.push(PeerListEntry { identity });
    }
    Ok(entries)
}

/// V5 identity record: `key-type (1) || length (u16) || identity (length)`.
/// The key-type byte is carried verbatim; this codec treats identities as
/// opaque, so it is folded into the stored blob rather than interpreted.
fn encode_v5(entries: &[PeerListEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + entries.len() * 4);
    out.extend_from_slice(&count_prefix(entries.len()));
    for entry in entries {
        out.push(0); // key-type: only one type is in use today
        out.extend_from_slice(&(entry.identity.len() as u16).to_be_bytes());
        out.extend_from_slice(&entry.identity);
    }
    out
}

fn decode_v5(buf: &[u8]) -> Result<Vec<PeerListEntry>> {
    let mut offset = 0usize;
    let count = read_count(buf, &mut offset)?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        if offset + 1 > buf.len() {
            return Err(CodecError::Truncated {
                need: offset + 1,
                have: buf.len(),
            });
        }
        offset += 1; // key-type byte, ignored
        if offset + 2 > buf.len() {
            return Err(CodecError::Truncated {
                need: offset + 2,
                have: buf.len(),
            });
        }
        let len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
        offset += 2;
        if offset + len > buf.len() {
            return Err(CodecError::LengthMismatch {
                declared: len,
                remaining: buf.len() - offset,
            });
        }
        let identity = buf[offset..offset + len].to_vec();
        offset += len;
        entries.push(PeerListEntry { identity });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries() -> Vec<PeerListEntry> {
        vec![
            PeerListEntry {
                identity: b"short".to_vec(),
            },
            PeerListEntry {
                identity: vec![0xABu8; 64],
            },
        ]
    }

    #[test]
    fn v4_roundtrip() {
        let list = PeerList::new(4, entries());
        let bytes = list.encode().expect("encode");
        let decoded = PeerList::decode(4, &bytes).expect("decode");
        assert_eq!(decoded.entries, entries());
    }

    #[test]
    fn v5_roundtrip() {
        let list = PeerList::new(5, entries());
        let bytes = list.encode().expect("encode");
        let decoded = PeerList::decode(5, &bytes).expect("decode");
        assert_eq!(decoded.entries, entries());
    }

    #[test]
    fn v4_truncates_long_identity() {
        let long = PeerListEntry {
            identity: vec![0x7u8; V4_IDENTITY_WIDTH + 50],
        };
        let list = PeerList::new(4, vec![long.clone()]);
        let bytes = list.encode().expect("encode");
        let decoded = PeerList::decode(4, &bytes).expect("decode");
        assert_eq!(decoded.entries[0].identity.len(), V4_IDENTITY_WIDTH);
        assert_eq!(
            decoded.entries[0].identity,
            long.identity[..V4_IDENTITY_WIDTH]
        );
    }

    #[test]
    fn v4_record_width_is_384() {
        assert_eq!(V4_RECORD_WIDTH, 384);
    }

    #[test]
    fn rejects_unsupported_version() {
        assert!(matches!(
            PeerList::new(6, entries()).encode(),
            Err(CodecError::UnsupportedVersion(6))
        ));
    }

    #[test]
    fn empty_list_roundtrip() {
        let list = PeerList::new(5, vec![]);
        let bytes = list.encode().expect("encode");
        let decoded = PeerList::decode(5, &bytes).expect("decode");
        assert!(decoded.entries.is_empty());
    }
}
