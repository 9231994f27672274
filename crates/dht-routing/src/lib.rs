//! The routing table of known peers.
//!
//! Modeled as a flat `map<peer-id, peer>` rather than a bucketed tree: peers
//! are owned by value, keyed by their 32-byte id, and `closest` is a linear
//! scan over the map. At the scale this network operates at (hundreds to
//! low thousands of peers per node, not millions) a bucketed tree buys
//! nothing a `HashMap` plus a sort doesn't already give, and a flat map has
//! no cross-referencing pointers between lookups and the table to keep
//! consistent.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use dht_types::{xor_distance, Peer, PeerId};

/// Errors raised while loading or persisting the peer list.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RoutingError>;

/// Comment line written atop every persisted `nodes.txt`.
const NODES_FILE_HEADER: &str = "# duskpost peer list — one base64 identity blob per line";

/// The set of known remote peers, keyed by peer-id.
pub struct RoutingTable {
    local_peer_id: PeerId,
    peers: Mutex<HashMap<PeerId, Peer>>,
}

impl RoutingTable {
    pub fn new(local_peer_id: PeerId) -> Self {
        Self {
            local_peer_id,
            peers: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    /// Insert `peer` unless its peer-id is already present or equals the
    /// local peer-id. Returns whether it was newly inserted.
    pub fn add(&self, peer: Peer) -> bool {
        if peer.peer_id == self.local_peer_id {
            return false;
        }
        let mut peers = self.peers.lock().expect("routing table mutex poisoned");
        if peers.contains_key(&peer.peer_id) {
            return false;
        }
        peers.insert(peer.peer_id, peer);
        true
    }

    pub fn find(&self, peer_id: &PeerId) -> Option<Peer> {
        self.peers
            .lock()
            .expect("routing table mutex poisoned")
            .get(peer_id)
            .cloned()
    }

    /// Mark a peer locked (unresponsive) or unlocked (just answered).
    pub fn set_locked(&self, peer_id: &PeerId, locked: bool) {
        if let Some(peer) = self
            .peers
            .lock()
            .expect("routing table mutex poisoned")
            .get_mut(peer_id)
        {
            if locked {
                peer.locked = true;
            } else {
                peer.mark_alive();
            }
        }
    }

    /// Up to `k` unlocked peers minimizing `peer-id XOR key`, ascending,
    /// tie-broken by raw lexicographic XOR value.
    ///
    /// When `relative_to_self` is set, only peers at least as close to
    /// `key` as the local node itself are eligible — used for neighborhood
    /// probing, where pulling in peers farther away than ourselves would
    /// defeat the point of the probe. Otherwise every unlocked peer is
    /// eligible.
    pub fn closest(&self, key: &PeerId, k: usize, relative_to_self: bool) -> Vec<Peer> {
        let threshold = relative_to_self.then(|| xor_distance(&self.local_peer_id, key));

        let peers = self.peers.lock().expect("routing table mutex poisoned");
        let mut candidates: Vec<(PeerId, Peer)> = peers
            .values()
            .filter(|p| !p.locked)
            .filter_map(|p| {
                let distance = xor_distance(&p.peer_id, key);
                match threshold {
                    Some(t) if distance > t => None,
                    _ => Some((distance, p.clone())),
                }
            })
            .collect();

        candidates.sort_by(|a, b| a.0.cmp(&b.0));
        candidates.into_iter().take(k).map(|(_, p)| p).collect()
    }

    pub fn all(&self) -> Vec<Peer> {
        self.peers
            .lock()
            .expect("routing table mutex poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn unlocked(&self) -> Vec<Peer> {
        self.peers
            .lock()
            .expect("routing table mutex poisoned")
            .values()
            .filter(|p| !p.locked)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.lock().expect("routing table mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist as a newline-delimited file of base64 identity blobs, with a
    /// `#`-comment header line.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let peers = self.peers.lock().expect("routing table mutex poisoned");
        let mut out = String::new();
        out.push_str(NODES_FILE_HEADER);
        out.push('\n');
        for peer in peers.values() {
            out.push_str(&peer.identity_base64());
            out.push('\n');
        }
        let path = path.as_ref();
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, out)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load peers from a `nodes.txt`-style file. Lines starting with `#` and
    /// blank lines are ignored. Malformed base64 lines are skipped and
    /// logged rather than failing the whole load.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(0);
        }
        let content = fs::read_to_string(path)?;
        let mut added = 0usize;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            use base64::Engine;
            match base64::engine::general_purpose::STANDARD.decode(line) {
                Ok(identity) => {
                    if self.add(Peer::new(identity)) {
                        added += 1;
                    }
                }
                Err(err) => {
                    tracing::warn!(line, %err, "skipping malformed nodes.txt line");
                }
            }
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn random_peer() -> Peer {
        let mut identity = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut identity);
        Peer::new(identity)
    }

    #[test]
    fn add_is_idempotent() {
        let table = RoutingTable::new([0u8; 32]);
        let peer = random_peer();
        assert!(table.add(peer.clone()));
        assert!(!table.add(peer.clone()));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn add_rejects_self() {
        let local = [7u8; 32];
        let table = RoutingTable::new(local);
        let mut peer = random_peer();
        peer.peer_id = local;
        assert!(!table.add(peer));
        assert!(table.is_empty());
    }

    #[test]
    fn closest_sorted_by_xor_distance() {
        let table = RoutingTable::new([0u8; 32]);
        for i in 1..=50u8 {
            let mut peer = random_peer();
            peer.peer_id = [i; 32];
            table.add(peer);
        }
        let target = [5u8; 32];
        let closest = table.closest(&target, 20, false);
        assert_eq!(closest.len(), 20);
        for pair in closest.windows(2) {
            let d0 = xor_distance(&pair[0].peer_id, &target);
            let d1 = xor_distance(&pair[1].peer_id, &target);
            assert!(d0 <= d1);
        }
    }

    #[test]
    fn closest_excludes_locked_peers() {
        let table = RoutingTable::new([0u8; 32]);
        let mut peer = random_peer();
        peer.peer_id = [1u8; 32];
        table.add(peer.clone());
        table.set_locked(&peer.peer_id, true);
        assert!(table.closest(&[1u8; 32], 5, false).is_empty());
    }

    #[test]
    fn closest_relative_to_self_filters_farther_peers() {
        let local = [0u8; 32];
        let table = RoutingTable::new(local);
        let key = [0x02u8; 32];
        let mut near = random_peer();
        near.peer_id = key;
        let mut far = random_peer();
        far.peer_id = [0xFF; 32];
        table.add(near.clone());
        table.add(far.clone());

        let result = table.closest(&key, 10, true);
        assert!(result.iter().any(|p| p.peer_id == near.peer_id));
        assert!(!result.iter().any(|p| p.peer_id == far.peer_id));
    }

    #[test]
    fn save_then_load_reproduces_peer_set() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nodes.txt");

        let table = RoutingTable::new([0u8; 32]);
        for _ in 0..5 {
            table.add(random_peer());
        }
        table.save(&path).expect("save");

        let reloaded = RoutingTable::new([0u8; 32]);
        let added = reloaded.load(&path).expect("load");
        assert_eq!(added, 5);

        let mut original: Vec<PeerId> = table.all().iter().map(|p| p.peer_id).collect();
        let mut loaded: Vec<PeerId> = reloaded.all().iter().map(|p| p.peer_id).collect();
        original.sort();
        loaded.sort();
        assert_eq!(original, loaded);
    }

    #[test]
    fn load_ignores_comments_and_blank_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nodes.txt");
        fs::write(&path, "# a comment\n\n").expect("write");

        let table = RoutingTable::new([0u8; 32]);
        assert_eq!(table.load(&path).expect("load"), 0);
    }
}
