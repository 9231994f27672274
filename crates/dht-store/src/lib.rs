//! Content-addressed local storage for Index, Email, and Contact packets.
//!
//! Packets are kept as an in-memory index plus one blob file per packet on
//! disk, named by the hex content-hash. `put`/`get`/`delete` are
//! linearizable per key via a single index mutex; disk writes are staged to
//! a temp file and renamed into place so a crash mid-write never leaves a
//! partial blob behind.

pub mod index;
pub mod email;

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use dht_types::PacketKind;

/// Errors raised by the local store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("packet body too short to carry a kind/version header")]
    HeaderTooShort,

    #[error("unknown packet kind tag: {0:#x}")]
    UnknownKind(u8),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Outcome of an authorized-delete operation (email or index-entry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Delete-auth did not match any stored verifier; nothing changed.
    AuthMismatch,
    /// Key was not present.
    NotFound,
    /// The packet (or some of its entries) was removed.
    Deleted,
}

#[derive(Clone, Debug)]
struct Entry {
    bytes: Vec<u8>,
    stored_at: SystemTime,
}

/// Per-kind time-to-live used by [`LocalStore::maintenance`].
#[derive(Clone, Copy, Debug)]
pub struct TtlPolicy {
    pub index: Duration,
    pub email: Duration,
    pub contact: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            index: Duration::from_secs(7 * 24 * 3600),
            email: Duration::from_secs(30 * 24 * 3600),
            contact: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

/// The content-addressed local store.
pub struct LocalStore {
    data_dir: PathBuf,
    ttl: TtlPolicy,
    index: Mutex<HashMap<(PacketKind, [u8; 32]), Entry>>,
}

impl LocalStore {
    /// Open (or create) a store rooted at `data_dir`. Does not scan existing
    /// blobs on disk — a fresh process starts with an empty in-memory index
    /// and repopulates it as peers push data.
    pub fn open(data_dir: impl Into<PathBuf>, ttl: TtlPolicy) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Self {
            data_dir,
            ttl,
            index: Mutex::new(HashMap::new()),
        })
    }

    /// Validate `bytes` as a `(kind, version)`-tagged packet, compute its
    /// content hash, and store it atomically. Returns the content hash.
    pub fn put(&self, bytes: Vec<u8>) -> Result<[u8; 32]> {
        let kind = parse_kind(&bytes)?;
        let key = content_hash(&bytes);

        self.write_blob(kind, &key, &bytes)?;

        let mut index = self.index.lock().expect("store index mutex poisoned");
        index.insert(
            (kind, key),
            Entry {
                bytes,
                stored_at: SystemTime::now(),
            },
        );
        tracing::debug!(kind = ?kind, key = hex::encode(key), "stored packet");
        Ok(key)
    }

    /// Fetch a stored packet's raw bytes.
    pub fn get(&self, kind: PacketKind, key: &[u8; 32]) -> Option<Vec<u8>> {
        let index = self.index.lock().expect("store index mutex poisoned");
        index.get(&(kind, *key)).map(|e| e.bytes.clone())
    }

    /// Remove a stored packet outright. Returns whether a packet was present.
    pub fn delete(&self, kind: PacketKind, key: &[u8; 32]) -> bool {
        let removed = {
            let mut index = self.index.lock().expect("store index mutex poisoned");
            index.remove(&(kind, *key)).is_some()
        };
        if removed {
            let _ = fs::remove_file(self.blob_path(kind, key));
            tracing::debug!(kind = ?kind, key = hex::encode(key), "deleted packet");
        }
        removed
    }

    /// Replace the stored bytes for an existing key, atomically.
    fn replace(&self, kind: PacketKind, key: &[u8; 32], bytes: Vec<u8>) -> Result<()> {
        self.write_blob(kind, key, &bytes)?;
        let mut index = self.index.lock().expect("store index mutex poisoned");
        index.insert(
            (kind, *key),
            Entry {
                bytes,
                stored_at: SystemTime::now(),
            },
        );
        Ok(())
    }

    /// Verify `delete_auth` against the stored Email packet's delete
    /// verifier (bytes 38..70) and delete on match.
    pub fn delete_email(&self, key: &[u8; 32], delete_auth: &[u8; 32]) -> DeleteOutcome {
        let Some(bytes) = self.get(PacketKind::Email, key) else {
            return DeleteOutcome::NotFound;
        };
        match email::extract_dv(&bytes) {
            Some(dv) if email::verify(delete_auth, dv) => {
                self.delete(PacketKind::Email, key);
                DeleteOutcome::Deleted
            }
            _ => DeleteOutcome::AuthMismatch,
        }
    }

    /// Remove every entry of an Index packet whose delete-verifier matches
    /// the SHA-256 of the paired pre-image. Writes the trimmed packet back
    /// atomically, or deletes it if no entries remain.
    pub fn delete_index_entries(
        &self,
        index_key: &[u8; 32],
        auths: &[([u8; 32], [u8; 32])],
    ) -> Result<DeleteOutcome> {
        let Some(bytes) = self.get(PacketKind::Index, index_key) else {
            return Ok(DeleteOutcome::NotFound);
        };
        let mut packet = index::IndexPacket::parse(&bytes)?;
        let before = packet.entries.len();
        packet.entries.retain(|entry| {
            !auths
                .iter()
                .any(|(email_key, auth)| entry.email_key == *email_key && index::verify(auth, entry.dv))
        });

        if packet.entries.len() == before {
            return Ok(DeleteOutcome::AuthMismatch);
        }
        if packet.entries.is_empty() {
            self.delete(PacketKind::Index, index_key);
            return Ok(DeleteOutcome::Deleted);
        }
        self.replace(PacketKind::Index, index_key, packet.serialize())?;
        Ok(DeleteOutcome::Deleted)
    }

    /// Drop packets past their per-kind TTL and reclaim disk space. Never
    /// propagates errors up — logs and continues so the maintenance loop
    /// never stops.
    pub fn maintenance(&self) {
        let now = SystemTime::now();
        let expired: Vec<(PacketKind, [u8; 32])> = {
            let index = self.index.lock().expect("store index mutex poisoned");
            index
                .iter()
                .filter(|(&(kind, _), entry)| {
                    let ttl = self.ttl_for(kind);
                    now.duration_since(entry.stored_at).unwrap_or_default() > ttl
                })
                .map(|(&k, _)| k)
                .collect()
        };
        for (kind, key) in &expired {
            self.delete(*kind, key);
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "maintenance reclaimed expired packets");
        }
    }

    /// Number of packets currently held, across all kinds.
    pub fn len(&self) -> usize {
        self.index.lock().expect("store index mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ttl_for(&self, kind: PacketKind) -> Duration {
        match kind {
            PacketKind::Index => self.ttl.index,
            PacketKind::Email => self.ttl.email,
            PacketKind::Contact => self.ttl.contact,
        }
    }

    fn blob_path(&self, kind: PacketKind, key: &[u8; 32]) -> PathBuf {
        self.data_dir
            .join(format!("{}-{}", kind_dir(kind), hex::encode(key)))
    }

    fn write_blob(&self, kind: PacketKind, key: &[u8; 32], bytes: &[u8]) -> Result<()> {
        let path = self.blob_path(kind, key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn kind_dir(kind: PacketKind) -> &'static str {
    match kind {
        PacketKind::Index => "index",
        PacketKind::Email => "email",
        PacketKind::Contact => "contact",
    }
}

fn parse_kind(bytes: &[u8]) -> Result<PacketKind> {
    if bytes.len() < 2 {
        return Err(StoreError::HeaderTooShort);
    }
    PacketKind::from_tag(bytes[0]).ok_or(StoreError::UnknownKind(bytes[0]))
}

/// Content hash used as a packet's store key: `blake3(bytes)` truncated to
/// match the 32-byte keyspace the DHT routes on.
pub fn content_hash(bytes: &[u8]) -> [u8; 32] {
    *blake3::hash(bytes).as_bytes()
}
