//! Email packet layout: delete-verifier extraction and verification.
//!
//! `kind (1) || version (1) || reserved (36) || dv (32) || ciphertext (var)`.
//! The delete verifier sits at bytes 38..70, per the stored-packet invariant.

use sha2::{Digest, Sha256};

pub const DV_OFFSET: usize = 38;
pub const DV_LEN: usize = 32;

/// Extract the 32-byte delete verifier from a stored Email packet's bytes.
pub fn extract_dv(bytes: &[u8]) -> Option<[u8; 32]> {
    if bytes.len() < DV_OFFSET + DV_LEN {
        return None;
    }
    let mut dv = [0u8; 32];
    dv.copy_from_slice(&bytes[DV_OFFSET..DV_OFFSET + DV_LEN]);
    Some(dv)
}

/// SHA-256 of a candidate delete-authorization pre-image.
pub fn sha256(preimage: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(preimage);
    hasher.finalize().into()
}

/// Does `preimage`'s SHA-256 match the stored delete verifier?
pub fn verify(preimage: &[u8; 32], dv: [u8; 32]) -> bool {
    sha256(preimage) == dv
}
