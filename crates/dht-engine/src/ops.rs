//! High-level DHT operations: `find-one`, `find-all`, `store`,
//! `delete-email`, `delete-index-entry`.
//!
//! All five share the same peer-selection policy (iterative lookup, falling
//! back to the full routing-table snapshot) and the same retry policy: up
//! to [`crate::EngineConfig::max_retries`] resubmissions when a round comes
//! back with zero responses. Peers that already answered in an earlier
//! round are excluded from later rounds within the same call — retrying
//! against a peer that already responded just amplifies load under partial
//! failure without improving the result.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dht_codec::envelope::{Envelope, PacketType};
use dht_codec::packets;
use dht_dispatch::{random_cid, Batch, Inbound};
use dht_types::{Peer, PeerId};

use crate::lookup::iterative_closest_lookup;
use crate::Engine;

#[derive(Clone, Copy, PartialEq, Eq)]
enum WaitMode {
    First,
    All,
}

/// Peers to target for a given content key: the iterative lookup's result,
/// falling back to the full routing-table snapshot if that comes up short.
/// Logs the two cases ("not enough nodes" vs. "not enough nodes for find")
/// distinctly so an operator can tell a thin routing table from a thin
/// result set.
async fn select_target_peers(engine: &Engine, key: [u8; 32]) -> Vec<Peer> {
    let mut peers = iterative_closest_lookup(engine, key).await;
    if peers.len() < engine.config.min_closest_nodes {
        tracing::info!(
            found = peers.len(),
            needed = engine.config.min_closest_nodes,
            "find: not enough nodes from lookup, falling back to full routing-table snapshot"
        );
        peers = engine.routing.all();
    }
    if peers.len() < engine.config.min_closest_nodes {
        tracing::warn!(
            found = peers.len(),
            needed = engine.config.min_closest_nodes,
            "find: not enough nodes for find even after fallback"
        );
    }
    peers
}

/// Send `packet_type`/`payload_for(peer)` to every peer in `peers`,
/// gathering responses across up to `max_retries + 1` rounds. A round that
/// comes back with zero responses is retried (same peer set); a round with
/// any responses excludes those peers from subsequent rounds.
/// `WaitMode::First` returns as soon as a round produces any response.
async fn run_with_retry(
    engine: &Engine,
    packet_type: PacketType,
    peers: &[Peer],
    wait_mode: WaitMode,
    payload_for: impl Fn(&Peer) -> Vec<u8>,
) -> Vec<Inbound> {
    let mut remaining: Vec<Peer> = peers.to_vec();
    let mut all_responses: Vec<Inbound> = Vec::new();

    for attempt in 0..=engine.config.max_retries {
        if remaining.is_empty() {
            break;
        }

        let batch = Arc::new(Batch::new("ops"));
        let mut cid_to_peer: HashMap<dht_types::Cid, Peer> = HashMap::new();
        for peer in &remaining {
            let cid = random_cid();
            let env = Envelope {
                packet_type,
                version: 5,
                cid,
                from: engine.local.peer.identity.clone(),
                payload: payload_for(peer),
            };
            batch.add(cid, peer.identity_base64(), env.encode());
            cid_to_peer.insert(cid, peer.clone());
        }

        if engine.dispatcher.submit(&batch, &engine.sender).await.is_err() {
            engine.dispatcher.retract(&batch);
            break;
        }
        match wait_mode {
            WaitMode::First => batch.wait_first(engine.config.response_timeout).await,
            WaitMode::All => batch.wait_all(engine.config.response_timeout).await,
        }
        let responses = batch.responses();
        engine.dispatcher.retract(&batch);

        if responses.is_empty() {
            tracing::warn!(attempt, "op: round came back empty, retrying");
            continue;
        }

        let responded: HashSet<PeerId> = responses
            .iter()
            .filter_map(|r| cid_to_peer.get(&r.cid).map(|p| p.peer_id))
            .collect();
        for peer_id in &responded {
            engine.routing.set_locked(peer_id, false);
        }
        remaining.retain(|p| !responded.contains(&p.peer_id));
        all_responses.extend(responses);

        if wait_mode == WaitMode::First {
            break;
        }
    }

    all_responses
}

/// Decode the identity of whoever sent an `Inbound` response, for ops that
/// report back which peers acknowledged. The dispatcher's `Inbound::from`
/// carries the transport-level address (base64 identity, per
/// `Peer::identity_base64`), so decoding it recovers the raw identity blob.
fn inbound_identity(inbound: &Inbound) -> Option<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(&inbound.from)
        .ok()
}

/// Like [`inbound_identity`], but only for responses whose status was `OK`
/// — used by `store`/`delete-*`, which report acknowledging peers, not
/// merely responding ones.
fn ok_identity(inbound: &Inbound) -> Option<Vec<u8>> {
    let response = packets::Response::decode(&inbound.payload).ok()?;
    if response.status != dht_types::StatusCode::Ok {
        return None;
    }
    inbound_identity(inbound)
}

/// `find-one(key, kind)`: the first peer response to a Retrieve Request,
/// not decoded — callers decode and verify.
pub async fn find_one(engine: &Engine, kind: dht_types::PacketKind, key: [u8; 32]) -> Vec<Inbound> {
    let peers = select_target_peers(engine, key).await;
    if peers.is_empty() {
        return Vec::new();
    }
    run_with_retry(engine, PacketType::RetrieveRequest, &peers, WaitMode::First, |_| {
        packets::RetrieveRequest { kind, key }.encode()
    })
    .await
}

/// `find-all(key, kind)`: every peer response to a Retrieve Request, not
/// decoded. At most one response per peer queried.
pub async fn find_all(engine: &Engine, kind: dht_types::PacketKind, key: [u8; 32]) -> Vec<Inbound> {
    let peers = select_target_peers(engine, key).await;
    if peers.is_empty() {
        return Vec::new();
    }
    run_with_retry(engine, PacketType::RetrieveRequest, &peers, WaitMode::All, |_| {
        packets::RetrieveRequest { kind, key }.encode()
    })
    .await
}

/// `store(key, kind, body)`: construct a Store Request per peer and push
/// `body` to the peers closest to its content hash. Returns the raw
/// identity blobs of peers that acknowledged.
pub async fn store(engine: &Engine, body: Vec<u8>, hashcash: Vec<u8>) -> Vec<Vec<u8>> {
    let key = dht_store::content_hash(&body);
    let peers = select_target_peers(engine, key).await;
    if peers.is_empty() {
        return Vec::new();
    }
    let responses = run_with_retry(engine, PacketType::StoreRequest, &peers, WaitMode::All, |_| {
        packets::StoreRequest {
            hashcash: hashcash.clone(),
            body: body.clone(),
        }
        .encode()
    })
    .await;
    responses.iter().filter_map(ok_identity).collect()
}

/// `delete-email(key, delete-auth)`: dispatch an Email Delete Request to the
/// peers closest to `key`. Returns the raw identity blobs of peers that
/// acknowledged.
pub async fn delete_email(engine: &Engine, key: [u8; 32], delete_auth: [u8; 32]) -> Vec<Vec<u8>> {
    let peers = select_target_peers(engine, key).await;
    if peers.is_empty() {
        return Vec::new();
    }
    let responses = run_with_retry(engine, PacketType::EmailDeleteRequest, &peers, WaitMode::All, |_| {
        packets::EmailDeleteRequest {
            email_key: key,
            delete_auth,
        }
        .encode()
    })
    .await;
    responses.iter().filter_map(ok_identity).collect()
}

/// `delete-index-entry(index-key, email-key, delete-auth)`: dispatch an
/// Index Delete Request (with a single entry) to the peers closest to
/// `index_key`. Returns the raw identity blobs of peers that acknowledged.
pub async fn delete_index_entry(
    engine: &Engine,
    index_key: [u8; 32],
    email_key: [u8; 32],
    delete_auth: [u8; 32],
) -> Vec<Vec<u8>> {
    let peers = select_target_peers(engine, index_key).await;
    if peers.is_empty() {
        return Vec::new();
    }
    let responses = run_with_retry(engine, PacketType::IndexDeleteRequest, &peers, WaitMode::All, |_| {
        packets::IndexDeleteRequest {
            index_key,
            entries: vec![packets::IndexDeleteEntry {
                email_key,
                delete_auth,
            }],
        }
        .encode()
    })
    .await;
    responses.iter().filter_map(ok_identity).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dht_dispatch::Dispatcher;
    use dht_routing::RoutingTable;
    use dht_store::{LocalStore, TtlPolicy};
    use dht_transport::TransportGateway;
    use std::time::Duration;

    fn test_engine() -> (Engine, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalStore::open(dir.path(), TtlPolicy::default()).expect("open store");
        let local = crate::LocalIdentity::new(b"local".to_vec());
        let routing = RoutingTable::new(local.peer.peer_id);
        let dispatcher = Dispatcher::new();
        let (gateway, _overlay) = TransportGateway::channel(64);
        let sender = gateway.sender();
        let mut config = crate::EngineConfig::default();
        config.response_timeout = Duration::from_millis(50);
        config.closest_lookup_timeout = Duration::from_millis(100);
        config.max_retries = 2;
        let engine = Engine::new(
            local,
            store,
            routing,
            dispatcher,
            sender,
            config,
            crate::PacketHandlerConfig::default(),
        );
        (engine, dir)
    }

    #[tokio::test]
    async fn find_one_with_no_peers_returns_empty() {
        let (engine, _dir) = test_engine();
        let result = find_one(&engine, dht_types::PacketKind::Email, [1u8; 32]).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn store_with_no_peers_returns_empty() {
        let (engine, _dir) = test_engine();
        let result = store(&engine, vec![b'C', 1, 2, 3], vec![]).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_retries_within_budget() {
        let (engine, _dir) = test_engine();
        engine.routing.add(Peer::new(vec![1u8; 10]));
        engine.routing.add(Peer::new(vec![2u8; 10]));
        engine.routing.add(Peer::new(vec![3u8; 10]));

        let started = std::time::Instant::now();
        let result = delete_email(&engine, [4u8; 32], [5u8; 32]).await;
        assert!(result.is_empty());
        // lookup timeout + (max_retries+1) response timeouts, with slack.
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
