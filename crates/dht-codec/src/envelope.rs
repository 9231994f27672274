//! The common request/response envelope.
//!
//! ```text
//! offset  field       size  semantics
//! 0       prefix      4     protocol magic
//! ...     type        1     ASCII letter identifying packet type
//! ...     version     1     protocol version (4 or 5)
//! ...     cid         32    correlation id
//! ...     from        var   sender overlay-identity blob (base64 ASCII, NUL-terminated)
//! ...     payload     var   type-specific body
//! ```

use dht_types::Cid;

use crate::{CodecError, Result};

/// Protocol magic prefix. Arbitrary but fixed; peers on a different magic
/// are a different protocol.
pub const MAGIC: [u8; 4] = *b"6\x03\x01\x02";

/// The request/response packet type, identified by a single ASCII letter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketType {
    RetrieveRequest,
    DeletionQuery,
    StoreRequest,
    EmailDeleteRequest,
    IndexDeleteRequest,
    FindClosePeersRequest,
    Response,
}

impl PacketType {
    pub fn tag(self) -> u8 {
        match self {
            PacketType::RetrieveRequest => b'Q',
            PacketType::DeletionQuery => b'Y',
            PacketType::StoreRequest => b'S',
            PacketType::EmailDeleteRequest => b'D',
            PacketType::IndexDeleteRequest => b'X',
            PacketType::FindClosePeersRequest => b'F',
            PacketType::Response => b'N',
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            b'Q' => Ok(PacketType::RetrieveRequest),
            b'Y' => Ok(PacketType::DeletionQuery),
            b'S' => Ok(PacketType::StoreRequest),
            b'D' => Ok(PacketType::EmailDeleteRequest),
            b'X' => Ok(PacketType::IndexDeleteRequest),
            b'F' => Ok(PacketType::FindClosePeersRequest),
            b'N' => Ok(PacketType::Response),
            other => Err(CodecError::UnknownPacketType(other)),
        }
    }
}

/// A fully parsed envelope: everything before the type-specific payload has
/// already been decoded, plus the raw payload bytes for a type-specific
/// parser (see [`crate::packets`]) to consume.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub packet_type: PacketType,
    /// Protocol version the sender spoke: 4 (legacy) or 5 (current).
    pub version: u8,
    pub cid: Cid,
    /// Sender's overlay-identity blob, raw bytes (already base64-decoded).
    pub from: Vec<u8>,
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Encode this envelope to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        use base64::Engine;
        let from_b64 = base64::engine::general_purpose::STANDARD.encode(&self.from);

        let mut out = Vec::with_capacity(4 + 1 + 1 + 32 + from_b64.len() + 1 + self.payload.len());
        out.extend_from_slice(&MAGIC);
        out.push(self.packet_type.tag());
        out.push(self.version);
        out.extend_from_slice(&self.cid);
        out.extend_from_slice(from_b64.as_bytes());
        out.push(0); // NUL terminator
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode an envelope from wire bytes. Does not validate the
    /// type-specific payload; callers parse that separately once they know
    /// the packet type and version.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 4 + 1 + 1 + 32 {
            return Err(CodecError::Truncated {
                need: 4 + 1 + 1 + 32,
                have: buf.len(),
            });
        }
        if buf[0..4] != MAGIC {
            return Err(CodecError::BadMagic);
        }
        let packet_type = PacketType::from_tag(buf[4])?;
        let version = buf[5];
        if version != 4 && version != 5 {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let mut cid = [0u8; 32];
        cid.copy_from_slice(&buf[6..38]);

        let rest = &buf[38..];
        let nul_pos = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::UnterminatedFrom)?;

        let from_b64 = &rest[..nul_pos];
        use base64::Engine;
        let from = base64::engine::general_purpose::STANDARD
            .decode(from_b64)
            .map_err(|_| CodecError::UnterminatedFrom)?;

        let payload = rest[nul_pos + 1..].to_vec();

        Ok(Envelope {
            packet_type,
            version,
            cid,
            from,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope {
            packet_type: PacketType::FindClosePeersRequest,
            version: 5,
            cid: [7u8; 32],
            from: b"some-identity-bytes".to_vec(),
            payload: vec![1, 2, 3, 4],
        }
    }

    #[test]
    fn roundtrip() {
        let env = sample();
        let bytes = env.encode();
        let decoded = Envelope::decode(&bytes).expect("decode");
        assert_eq!(decoded.packet_type, env.packet_type);
        assert_eq!(decoded.version, env.version);
        assert_eq!(decoded.cid, env.cid);
        assert_eq!(decoded.from, env.from);
        assert_eq!(decoded.payload, env.payload);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = sample().encode();
        bytes[0] ^= 0xFF;
        assert!(matches!(Envelope::decode(&bytes), Err(CodecError::BadMagic)));
    }

    #[test]
    fn rejects_truncated() {
        let bytes = sample().encode();
        assert!(matches!(
            Envelope::decode(&bytes[..10]),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = sample().encode();
        bytes[5] = 9;
        assert!(matches!(
            Envelope::decode(&bytes),
            Err(CodecError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn rejects_unknown_type() {
        let mut bytes = sample().encode();
        bytes[4] = b'Z';
        assert!(matches!(
            Envelope::decode(&bytes),
            Err(CodecError::UnknownPacketType(b'Z'))
        ));
    }
}
