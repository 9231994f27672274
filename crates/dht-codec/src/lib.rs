//! Wire codec for the DHT request/response protocol.
//!
//! Pure encode/decode functions over byte buffers; no I/O. All multi-byte
//! integers are big-endian. See the envelope layout in [`envelope`] and the
//! per-type payload bodies in [`packets`] and [`peerlist`].

pub mod envelope;
pub mod packets;
pub mod peerlist;

/// Errors raised while encoding or decoding wire bytes.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("buffer too short: need at least {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("bad magic prefix")]
    BadMagic,

    #[error("unknown packet type tag: {0:#x}")]
    UnknownPacketType(u8),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("unknown packet kind tag: {0:#x}")]
    UnknownKind(u8),

    #[error("unknown status code: {0}")]
    UnknownStatus(u8),

    #[error("unterminated `from` field (missing NUL terminator)")]
    UnterminatedFrom,

    #[error("declared length {declared} does not fit in remaining {remaining} bytes")]
    LengthMismatch { declared: usize, remaining: usize },
}

pub type Result<T> = std::result::Result<T, CodecError>;
