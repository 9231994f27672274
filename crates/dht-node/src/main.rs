//! dht-node: wires the DHT subsystem into a running process.
//!
//! Everything outside the DHT core — the overlay transport session layer
//! that actually moves datagrams, the SMTP/POP3 front-ends, the mail-crypto
//! pipeline, the address book — is an external collaborator. This binary
//! only owns config loading, logging setup, opening the local store and
//! routing table, and running the inbound-packet loop plus the background
//! maintenance task.

mod config;

use std::path::PathBuf;
use std::time::Instant;

use tracing::{info, warn};

use dht_engine::handler::{self, NoopHashcashPolicy};
use dht_engine::maintenance::Maintenance;
use dht_engine::{Engine, LocalIdentity, PacketHandlerConfig};
use dht_dispatch::Dispatcher;
use dht_routing::RoutingTable;
use dht_store::LocalStore;
use dht_transport::TransportGateway;
use dht_types::Peer;

use crate::config::NodeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dht_node=info".parse()?)
                .add_directive("dht_engine=info".parse()?),
        )
        .init();

    info!("duskpost DHT node starting");
    let start_time = Instant::now();

    let config_path = std::env::var("DUSKPOST_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("duskpost.toml"));
    let config = NodeConfig::load(&config_path)?;
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 1. Local identity. A real deployment derives this from the overlay
    // identity the mail-crypto collaborator manages; here we mint a
    // per-process one if none is persisted yet, matching the original's
    // fallback of generating an identity on first run.
    let identity_path = data_dir.join("identity.bin");
    let identity_bytes = load_or_create_identity(&identity_path)?;
    let local = LocalIdentity::new(identity_bytes);
    info!(peer_id = hex::encode(local.peer.peer_id), "local identity loaded");

    // 2. Local Store.
    let store = LocalStore::open(data_dir.join("store"), config.ttl_policy())?;

    // 3. Routing Table: load persisted peers, falling back to the
    // configured bootstrap list if the file yields none.
    let routing = RoutingTable::new(local.peer.peer_id);
    let nodes_file = data_dir.join("nodes.txt");
    bootstrap_routing_table(&routing, &nodes_file, &config.network.bootstrap_addresses)?;

    // 4. Transport Gateway. The overlay session layer that actually moves
    // bytes is an external collaborator; `overlay` is the handle it would
    // drive in a full deployment.
    let (gateway, overlay) = TransportGateway::channel(config.network.queue_capacity);
    let sender = gateway.sender();
    let counters = sender.counters();

    // 5. Batch Dispatcher + Engine.
    let dispatcher = Dispatcher::new();
    let engine = Engine::new(
        local,
        store,
        routing,
        dispatcher,
        sender,
        config.engine_config(),
        PacketHandlerConfig::default(),
    );

    // No overlay transport is wired into this revision (the transport
    // session layer is out of scope here). Drain outbound
    // datagrams so the send queue never backpressures the engine; a real
    // deployment replaces this task with the actual overlay driver reading
    // `overlay.outbound` and pushing received datagrams into
    // `overlay.inbound`.
    let mut outbound = overlay.outbound;
    tokio::spawn(async move {
        while let Some((peer_address, bytes)) = outbound.recv().await {
            tracing::trace!(%peer_address, len = bytes.len(), "no overlay transport wired; dropping outbound datagram");
        }
    });
    drop(overlay.inbound);

    // 6. Maintenance task: periodic routing-table flush + store
    // maintenance, running until shutdown.
    let maintenance = Maintenance::new(engine.clone(), nodes_file, counters, start_time);
    let running = maintenance.running_flag();
    let maintenance_handle = tokio::spawn(maintenance.run());

    // 7. Inbound packet loop: dequeue from the receive queue, hand to the
    // Packet Handler. This is the only place `dht-engine::handler` is
    // driven from in this binary.
    let mut gateway = gateway;
    let inbound_engine = engine.clone();
    let inbound_handle = tokio::spawn(async move {
        loop {
            match gateway.recv().await {
                Some((peer_address, bytes)) => {
                    if let Err(err) =
                        handler::handle_inbound(&inbound_engine, &NoopHashcashPolicy, peer_address, bytes)
                            .await
                    {
                        warn!(%err, "error handling inbound packet");
                    }
                }
                None => {
                    info!("receive queue closed, inbound loop stopping");
                    break;
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    running.store(false, std::sync::atomic::Ordering::SeqCst);
    maintenance_handle.abort();
    inbound_handle.abort();

    info!(uptime_secs = start_time.elapsed().as_secs(), "duskpost DHT node stopped");
    Ok(())
}

/// Load a persisted identity blob, or mint a fresh random one and persist it.
fn load_or_create_identity(path: &std::path::Path) -> anyhow::Result<Vec<u8>> {
    if path.exists() {
        return Ok(std::fs::read(path)?);
    }
    use rand::RngCore;
    let mut identity = vec![0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut identity);
    std::fs::write(path, &identity)?;
    Ok(identity)
}

/// Populate `routing` from `nodes_file`, falling back to `bootstrap_addresses`
/// if the file yields no peers. Returns the number of peers added from
/// `nodes_file` (0 if the fallback path was taken).
fn bootstrap_routing_table(
    routing: &RoutingTable,
    nodes_file: &std::path::Path,
    bootstrap_addresses: &[String],
) -> anyhow::Result<usize> {
    let loaded = routing.load(nodes_file)?;
    if loaded == 0 {
        info!(count = bootstrap_addresses.len(), "nodes.txt empty, loading bootstrap peers");
        for address in bootstrap_addresses {
            routing.add(Peer::new(address.as_bytes().to_vec()));
        }
    } else {
        info!(count = loaded, "loaded peers from nodes.txt");
    }
    Ok(loaded)
}
