//! Type-specific request/response payload bodies.
//!
//! These operate on the `payload` slice of an already-decoded [`crate::envelope::Envelope`].

use dht_types::{PacketKind, StatusCode};

use crate::{CodecError, Result};

/// `Retrieve Request` payload: `kind (1) || key (32)`.
#[derive(Clone, Debug)]
pub struct RetrieveRequest {
    pub kind: PacketKind,
    pub key: [u8; 32],
}

impl RetrieveRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(33);
        out.push(self.kind.tag());
        out.extend_from_slice(&self.key);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 33 {
            return Err(CodecError::Truncated {
                need: 33,
                have: buf.len(),
            });
        }
        let kind = PacketKind::from_tag(buf[0]).ok_or(CodecError::UnknownKind(buf[0]))?;
        let mut key = [0u8; 32];
        key.copy_from_slice(&buf[1..33]);
        Ok(Self { kind, key })
    }
}

/// `Deletion Query` payload: `key (32)` — a probe, not an actual delete (see
/// the Open Question preserved in `dht-engine`).
#[derive(Clone, Debug)]
pub struct DeletionQuery {
    pub key: [u8; 32],
}

impl DeletionQuery {
    pub fn encode(&self) -> Vec<u8> {
        self.key.to_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 32 {
            return Err(CodecError::Truncated {
                need: 32,
                have: buf.len(),
            });
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&buf[..32]);
        Ok(Self { key })
    }
}

/// `Store Request` payload:
/// `hc_length (u16) || hashcash (hc_length) || length (u16) || body (length)`.
///
/// `body` begins with `kind (1) || version (1) || ...` — validated by the
/// local store, not here.
#[derive(Clone, Debug)]
pub struct StoreRequest {
    pub hashcash: Vec<u8>,
    pub body: Vec<u8>,
}

impl StoreRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.hashcash.len() + 2 + self.body.len());
        out.extend_from_slice(&(self.hashcash.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.hashcash);
        out.extend_from_slice(&(self.body.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut offset = 0usize;
        let hc_len = read_u16(buf, &mut offset)?;
        let hashcash = read_exact(buf, &mut offset, hc_len)?.to_vec();
        let body_len = read_u16(buf, &mut offset)?;
        let body = read_exact(buf, &mut offset, body_len)?.to_vec();
        Ok(Self { hashcash, body })
    }
}

/// `Email Delete Request` payload: `email-key (32) || delete-auth (32)`.
#[derive(Clone, Debug)]
pub struct EmailDeleteRequest {
    pub email_key: [u8; 32],
    pub delete_auth: [u8; 32],
}

impl EmailDeleteRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&self.email_key);
        out.extend_from_slice(&self.delete_auth);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 64 {
            return Err(CodecError::Truncated {
                need: 64,
                have: buf.len(),
            });
        }
        let mut email_key = [0u8; 32];
        let mut delete_auth = [0u8; 32];
        email_key.copy_from_slice(&buf[0..32]);
        delete_auth.copy_from_slice(&buf[32..64]);
        Ok(Self {
            email_key,
            delete_auth,
        })
    }
}

/// One `(email-key, delete-auth)` pair within an [`IndexDeleteRequest`].
#[derive(Clone, Copy, Debug)]
pub struct IndexDeleteEntry {
    pub email_key: [u8; 32],
    pub delete_auth: [u8; 32],
}

/// `Index Delete Request` payload:
/// `index-key (32) || n (1) || n * (email-key (32) || delete-auth (32))`.
#[derive(Clone, Debug)]
pub struct IndexDeleteRequest {
    pub index_key: [u8; 32],
    pub entries: Vec<IndexDeleteEntry>,
}

impl IndexDeleteRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(33 + self.entries.len() * 64);
        out.extend_from_slice(&self.index_key);
        out.push(self.entries.len() as u8);
        for e in &self.entries {
            out.extend_from_slice(&e.email_key);
            out.extend_from_slice(&e.delete_auth);
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 33 {
            return Err(CodecError::Truncated {
                need: 33,
                have: buf.len(),
            });
        }
        let mut index_key = [0u8; 32];
        index_key.copy_from_slice(&buf[0..32]);
        let n = buf[32];
        let mut offset = 33usize;
        let mut entries = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let chunk = read_exact(buf, &mut offset, 64)?;
            let mut email_key = [0u8; 32];
            let mut delete_auth = [0u8; 32];
            email_key.copy_from_slice(&chunk[0..32]);
            delete_auth.copy_from_slice(&chunk[32..64]);
            entries.push(IndexDeleteEntry {
                email_key,
                delete_auth,
            });
        }
        Ok(Self { index_key, entries })
    }
}

/// `Find Close Peers Request` payload: `key (32)`.
#[derive(Clone, Debug)]
pub struct FindClosePeersRequest {
    pub key: [u8; 32],
}

impl FindClosePeersRequest {
    pub fn encode(&self) -> Vec<u8> {
        self.key.to_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 32 {
            return Err(CodecError::Truncated {
                need: 32,
                have: buf.len(),
            });
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&buf[..32]);
        Ok(Self { key })
    }
}

/// `Response` payload: `status (1) || length (u16) || data (length)`.
#[derive(Clone, Debug)]
pub struct Response {
    pub status: StatusCode,
    pub data: Vec<u8>,
}

impl Response {
    pub fn ok(data: Vec<u8>) -> Self {
        Self {
            status: StatusCode::Ok,
            data,
        }
    }

    pub fn status_only(status: StatusCode) -> Self {
        Self {
            status,
            data: Vec::new(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + self.data.len());
        out.push(self.status as u8);
        out.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.is_empty() {
            return Err(CodecError::Truncated { need: 1, have: 0 });
        }
        let status = StatusCode::from_u8(buf[0]).ok_or(CodecError::UnknownStatus(buf[0]))?;
        let mut offset = 1usize;
        let len = read_u16(buf, &mut offset)?;
        let data = read_exact(buf, &mut offset, len)?.to_vec();
        Ok(Self { status, data })
    }
}

fn read_u16(buf: &[u8], offset: &mut usize) -> Result<usize> {
    let bytes = read_exact(buf, offset, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]) as usize)
}

fn read_exact<'a>(buf: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8]> {
    if *offset + len > buf.len() {
        return Err(CodecError::LengthMismatch {
            declared: len,
            remaining: buf.len().saturating_sub(*offset),
        });
    }
    let slice = &buf[*offset..*offset + len];
    *offset += len;
    Ok(slice)
}
