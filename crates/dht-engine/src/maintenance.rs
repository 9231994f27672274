//! Background maintenance task: every
//! [`crate::EngineConfig::maintenance_interval`], flush the routing table to
//! disk and run the local store's maintenance. Swallows and logs every
//! error so the loop never stops.
//!
//! Also carries a periodic status log: byte counters and uptime every 10
//! ticks, and a debug-level dump of every known peer on each tick.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dht_transport::ByteCounters;

use crate::Engine;

/// Drives the periodic maintenance tick until `running` is cleared.
/// [`Maintenance::running_flag`] hands out the `Arc<AtomicBool>` a shutdown
/// path flips; the task observes it at its next wake.
pub struct Maintenance {
    engine: Engine,
    nodes_file: PathBuf,
    counters: ByteCounters,
    start_time: Instant,
    running: Arc<AtomicBool>,
    ticks: u64,
}

impl Maintenance {
    pub fn new(engine: Engine, nodes_file: PathBuf, counters: ByteCounters, start_time: Instant) -> Self {
        Self {
            engine,
            nodes_file,
            counters,
            start_time,
            running: Arc::new(AtomicBool::new(true)),
            ticks: 0,
        }
    }

    /// A clone-able handle to flip when the node is shutting down.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Run until `running` is cleared. Each wake checks the flag before
    /// doing work, so a shutdown mid-sleep exits promptly at the next tick
    /// rather than running one last maintenance pass.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.engine.config.maintenance_interval);
        interval.tick().await; // first tick fires immediately; consume it
        loop {
            interval.tick().await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.tick();
        }
        tracing::info!("maintenance task stopped");
    }

    fn tick(&mut self) {
        self.ticks += 1;

        if let Err(err) = self.engine.routing.save(&self.nodes_file) {
            tracing::error!(%err, "maintenance: failed to flush routing table");
        }
        self.engine.store.maintenance();

        if tracing::enabled!(tracing::Level::DEBUG) {
            for peer in self.engine.routing.all() {
                tracing::debug!(peer_id = hex::encode(peer.peer_id), locked = peer.locked, "known peer");
            }
        }

        if self.ticks % 10 == 0 {
            let uptime = self.start_time.elapsed().as_secs();
            tracing::debug!(
                uptime_secs = uptime,
                bytes_sent = self.counters.sent(),
                bytes_received = self.counters.received(),
                peers = self.engine.routing.len(),
                "node stats"
            );
        }
    }
}
