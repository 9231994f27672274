//! The DHT Engine: inbound packet dispatch plus the high-level operations
//! (`find-one`, `find-all`, `store`, `delete-email`, `delete-index-entry`,
//! the iterative closest-node lookup) and the background maintenance task.
//!
//! This crate wires together `dht-store`, `dht-routing`, `dht-transport`,
//! and `dht-dispatch` behind one [`Engine`] handle; `dht-node` is the only
//! thing above it (config loading, process wiring, the CLI surface).

pub mod handler;
pub mod lookup;
pub mod maintenance;
pub mod ops;

use std::sync::Arc;
use std::time::Duration;

use dht_dispatch::Dispatcher;
use dht_routing::RoutingTable;
use dht_store::LocalStore;
use dht_transport::SendHandle;
use dht_types::Peer;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("codec error: {0}")]
    Codec(#[from] dht_codec::CodecError),
    #[error("store error: {0}")]
    Store(#[from] dht_store::StoreError),
    #[error("routing error: {0}")]
    Routing(#[from] dht_routing::RoutingError),
    #[error("transport error: {0}")]
    Transport(#[from] dht_transport::TransportError),
    #[error("dispatch error: {0}")]
    Dispatch(#[from] dht_dispatch::DispatchError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Timeouts and constants governing the iterative lookup and retry policy.
/// All configurable; defaults match the protocol's stated values.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Per-`wait_*` timeout on a single batch round.
    pub response_timeout: Duration,
    /// Whole-task deadline for the iterative closest-node lookup.
    pub closest_lookup_timeout: Duration,
    /// Minimum number of responses that ends a lookup early / satisfies a
    /// `find` before falling back to the full routing-table snapshot.
    pub min_closest_nodes: usize,
    /// Kademlia K: replication/neighborhood size.
    pub kademlia_k: usize,
    /// Alpha: width of each parallel query wave in the iterative lookup.
    pub alpha: usize,
    /// Retries for `find`/`store`/`delete-*` when a batch comes back empty.
    pub max_retries: u32,
    /// Period of the background maintenance task.
    pub maintenance_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(5),
            closest_lookup_timeout: Duration::from_secs(20),
            min_closest_nodes: 5,
            kademlia_k: dht_types::KADEMLIA_K,
            alpha: 3,
            max_retries: 5,
            maintenance_interval: Duration::from_secs(60),
        }
    }
}

/// Policy knobs for the Packet Handler surfaced explicitly rather than left
/// as a silent behavioral choice.
#[derive(Clone, Copy, Debug, Default)]
pub struct PacketHandlerConfig {
    /// When `true`, a `Deletion Query` (type `Y`) actually deletes the
    /// matching Email packet instead of only probing for its existence.
    /// Default `false` preserves the original's probe-only semantics.
    pub delete_on_deletion_query: bool,
}

/// The node's own identity, as both the routing table needs it (to exclude
/// self from `add`/`closest`) and the codec needs it (the envelope `from`
/// field on every outbound packet).
#[derive(Clone)]
pub struct LocalIdentity {
    pub peer: Peer,
}

impl LocalIdentity {
    pub fn new(identity: Vec<u8>) -> Self {
        Self {
            peer: Peer::new(identity),
        }
    }
}

/// Everything the engine needs to handle inbound packets and run the
/// high-level DHT operations, bundled as `Arc`s so `handler`, `lookup`,
/// `ops`, and `maintenance` can each hold a cheap clone.
#[derive(Clone)]
pub struct Engine {
    pub local: Arc<LocalIdentity>,
    pub store: Arc<LocalStore>,
    pub routing: Arc<RoutingTable>,
    pub dispatcher: Arc<Dispatcher>,
    pub sender: SendHandle,
    pub config: EngineConfig,
    pub handler_config: PacketHandlerConfig,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local: LocalIdentity,
        store: LocalStore,
        routing: RoutingTable,
        dispatcher: Dispatcher,
        sender: SendHandle,
        config: EngineConfig,
        handler_config: PacketHandlerConfig,
    ) -> Self {
        Self {
            local: Arc::new(local),
            store: Arc::new(store),
            routing: Arc::new(routing),
            dispatcher: Arc::new(dispatcher),
            sender,
            config,
            handler_config,
        }
    }
}
