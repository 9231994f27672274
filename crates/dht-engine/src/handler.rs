//! Packet Handler: parses inbound envelopes, hands them to the Batch
//! Dispatcher first, and dispatches unmatched ones to the per-type inbound
//! request handler.
//!
//! Every inbound handler opportunistically adds the sender to the routing
//! table before doing anything else.

use dht_codec::envelope::{Envelope, PacketType};
use dht_codec::peerlist::{PeerList, PeerListEntry};
use dht_codec::{packets, CodecError};
use dht_dispatch::Inbound;
use dht_store::DeleteOutcome;
use dht_types::{Peer, StatusCode};

use crate::{Engine, Result};

/// Outcome of verifying a `Store Request`'s hashcash. No policy in this
/// revision actually rejects a request on hashcash grounds — the codes
/// exist in the wire protocol but verification is left as a pluggable
/// policy.
pub enum HashcashVerdict {
    Ok,
    Insufficient,
    Invalid,
}

/// Pluggable hashcash verification policy for `Store Request`s.
pub trait HashcashPolicy: Send + Sync {
    fn verify(&self, hashcash: &[u8], body: &[u8]) -> HashcashVerdict;
}

/// The default policy: accepts everything. Matches the original's
/// unenforced hashcash status codes.
pub struct NoopHashcashPolicy;

impl HashcashPolicy for NoopHashcashPolicy {
    fn verify(&self, _hashcash: &[u8], _body: &[u8]) -> HashcashVerdict {
        HashcashVerdict::Ok
    }
}

/// Marker byte prefixing a peer-list response payload's version byte, e.g.
/// `[MARKER, version, count_hi, count_lo, ...records]`. [`PeerList::encode`]
/// only produces the count+records tail; the marker and version frame it.
const PEER_LIST_MARKER: u8 = dht_codec::peerlist::MARKER;

fn encode_peer_list_payload(list: &PeerList) -> dht_codec::Result<Vec<u8>> {
    let mut out = Vec::new();
    out.push(PEER_LIST_MARKER);
    out.push(list.version);
    out.extend_from_slice(&list.encode()?);
    Ok(out)
}

/// Decode a peer-list response payload framed as `[marker, version, ...]`.
pub fn decode_peer_list_payload(buf: &[u8]) -> dht_codec::Result<PeerList> {
    if buf.len() < 2 {
        return Err(CodecError::Truncated { need: 2, have: buf.len() });
    }
    PeerList::decode(buf[1], &buf[2..])
}

/// Handle one inbound datagram: decode its envelope, route to the Batch
/// Dispatcher, and — if unmatched — dispatch it as a fresh inbound request,
/// sending a response back through `engine.sender`.
///
/// Malformed bytes are logged and dropped; nothing here ever returns an
/// error to the caller — parse/storage failures become response status
/// codes, not propagated errors.
pub async fn handle_inbound(
    engine: &Engine,
    hashcash_policy: &dyn HashcashPolicy,
    peer_address: String,
    bytes: Vec<u8>,
) -> Result<()> {
    let envelope = match Envelope::decode(&bytes) {
        Ok(env) => env,
        Err(err) => {
            tracing::warn!(%peer_address, %err, "dropping malformed inbound packet");
            return Ok(());
        }
    };

    let sender_peer = Peer::new(envelope.from.clone());
    if engine.routing.add(sender_peer.clone()) {
        tracing::debug!(peer_id = hex::encode(sender_peer.peer_id), "discovered new peer");
    }

    let inbound = Inbound {
        cid: envelope.cid,
        from: peer_address.clone(),
        version: envelope.version,
        payload: envelope.payload.clone(),
    };
    if engine.dispatcher.on_inbound(inbound) {
        return Ok(());
    }

    if envelope.packet_type == PacketType::Response {
        tracing::trace!(cid = hex::encode(envelope.cid), "dropping unmatched response (collision or late arrival)");
        return Ok(());
    }

    let response = dispatch_request(engine, hashcash_policy, &envelope);
    let response_envelope = Envelope {
        packet_type: PacketType::Response,
        version: envelope.version,
        cid: envelope.cid,
        from: engine.local.peer.identity.clone(),
        payload: response.encode(),
    };
    engine.sender.send(peer_address, response_envelope.encode()).await?;
    Ok(())
}

fn dispatch_request(
    engine: &Engine,
    hashcash_policy: &dyn HashcashPolicy,
    envelope: &Envelope,
) -> packets::Response {
    match envelope.packet_type {
        PacketType::RetrieveRequest => handle_retrieve(engine, &envelope.payload),
        PacketType::DeletionQuery => handle_deletion_query(engine, &envelope.payload),
        PacketType::StoreRequest => handle_store(engine, hashcash_policy, &envelope.payload),
        PacketType::EmailDeleteRequest => handle_email_delete(engine, &envelope.payload),
        PacketType::IndexDeleteRequest => handle_index_delete(engine, &envelope.payload),
        PacketType::FindClosePeersRequest => {
            handle_find_close_peers(engine, envelope.version, &envelope.payload)
        }
        PacketType::Response => packets::Response::status_only(StatusCode::InvalidPacket),
    }
}

fn handle_retrieve(engine: &Engine, payload: &[u8]) -> packets::Response {
    let req = match packets::RetrieveRequest::decode(payload) {
        Ok(r) => r,
        Err(err) => {
            tracing::debug!(%err, "malformed retrieve request");
            return packets::Response::status_only(StatusCode::InvalidPacket);
        }
    };
    match engine.store.get(req.kind, &req.key) {
        Some(bytes) => packets::Response::ok(bytes),
        None => packets::Response::status_only(StatusCode::NoDataFound),
    }
}

fn handle_deletion_query(engine: &Engine, payload: &[u8]) -> packets::Response {
    let req = match packets::DeletionQuery::decode(payload) {
        Ok(r) => r,
        Err(err) => {
            tracing::debug!(%err, "malformed deletion query");
            return packets::Response::status_only(StatusCode::InvalidPacket);
        }
    };
    let exists = engine
        .store
        .get(dht_types::PacketKind::Email, &req.key)
        .is_some();
    if exists && engine.handler_config.delete_on_deletion_query {
        engine.store.delete(dht_types::PacketKind::Email, &req.key);
    }
    packets::Response::ok(vec![exists as u8])
}

fn handle_store(
    engine: &Engine,
    hashcash_policy: &dyn HashcashPolicy,
    payload: &[u8],
) -> packets::Response {
    let req = match packets::StoreRequest::decode(payload) {
        Ok(r) => r,
        Err(err) => {
            tracing::debug!(%err, "malformed store request");
            return packets::Response::status_only(StatusCode::InvalidPacket);
        }
    };
    match hashcash_policy.verify(&req.hashcash, &req.body) {
        HashcashVerdict::Insufficient => {
            return packets::Response::status_only(StatusCode::InsufficientHashcash)
        }
        HashcashVerdict::Invalid => {
            return packets::Response::status_only(StatusCode::InvalidHashcash)
        }
        HashcashVerdict::Ok => {}
    }
    match engine.store.put(req.body) {
        Ok(_key) => packets::Response::status_only(StatusCode::Ok),
        Err(dht_store::StoreError::HeaderTooShort) | Err(dht_store::StoreError::UnknownKind(_)) => {
            packets::Response::status_only(StatusCode::InvalidPacket)
        }
        Err(err) => {
            tracing::error!(%err, "local failure while storing packet");
            packets::Response::status_only(StatusCode::GeneralError)
        }
    }
}

fn handle_email_delete(engine: &Engine, payload: &[u8]) -> packets::Response {
    let req = match packets::EmailDeleteRequest::decode(payload) {
        Ok(r) => r,
        Err(err) => {
            tracing::debug!(%err, "malformed email delete request");
            return packets::Response::status_only(StatusCode::InvalidPacket);
        }
    };
    match engine.store.delete_email(&req.email_key, &req.delete_auth) {
        DeleteOutcome::Deleted => packets::Response::status_only(StatusCode::Ok),
        // Not found and wrong-auth are intentionally indistinguishable on
        // the wire.
        DeleteOutcome::NotFound | DeleteOutcome::AuthMismatch => {
            packets::Response::status_only(StatusCode::InvalidPacket)
        }
    }
}

fn handle_index_delete(engine: &Engine, payload: &[u8]) -> packets::Response {
    let req = match packets::IndexDeleteRequest::decode(payload) {
        Ok(r) => r,
        Err(err) => {
            tracing::debug!(%err, "malformed index delete request");
            return packets::Response::status_only(StatusCode::InvalidPacket);
        }
    };
    let auths: Vec<([u8; 32], [u8; 32])> = req
        .entries
        .iter()
        .map(|e| (e.email_key, e.delete_auth))
        .collect();
    match engine.store.delete_index_entries(&req.index_key, &auths) {
        Ok(DeleteOutcome::Deleted) => packets::Response::status_only(StatusCode::Ok),
        Ok(DeleteOutcome::NotFound) | Ok(DeleteOutcome::AuthMismatch) => {
            packets::Response::status_only(StatusCode::InvalidPacket)
        }
        Err(err) => {
            tracing::error!(%err, "local failure while deleting index entries");
            packets::Response::status_only(StatusCode::GeneralError)
        }
    }
}

fn handle_find_close_peers(engine: &Engine, version: u8, payload: &[u8]) -> packets::Response {
    let req = match packets::FindClosePeersRequest::decode(payload) {
        Ok(r) => r,
        Err(err) => {
            tracing::debug!(%err, "malformed find close peers request");
            return packets::Response::status_only(StatusCode::InvalidPacket);
        }
    };
    let peers = engine.routing.closest(&req.key, engine.config.kademlia_k, false);
    let entries: Vec<PeerListEntry> = peers
        .into_iter()
        .map(|p| PeerListEntry { identity: p.identity })
        .collect();
    let list = PeerList::new(version, entries);
    match encode_peer_list_payload(&list) {
        Ok(data) => packets::Response::ok(data),
        Err(err) => {
            tracing::error!(%err, "failed to encode peer list response");
            packets::Response::status_only(StatusCode::GeneralError)
        }
    }
}
