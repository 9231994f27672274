//! The Batch Dispatcher: the correlation engine that turns best-effort
//! datagrams into awaitable multi-peer operations.
//!
//! A [`Batch`] is one outbound packet per target peer, each carrying a
//! unique random CID. [`Dispatcher::submit`] registers those CIDs globally
//! and pushes the packets onto the transport's send queue;
//! [`Dispatcher::on_inbound`] routes a decoded inbound packet to whichever
//! batch owns its CID, or reports it unmatched so the Packet Handler can
//! treat it as a fresh inbound request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dht_transport::SendHandle;
#[cfg(test)]
use dht_transport::TransportGateway;
use dht_types::Cid;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::Notify;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("transport error: {0}")]
    Transport(#[from] dht_transport::TransportError),
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Draw a fresh, cryptographically random CID. Collisions are astronomically
/// unlikely (256 bits of entropy) and are treated as a protocol error by
/// [`Dispatcher::on_inbound`] rather than guarded against here.
pub fn random_cid() -> Cid {
    let mut cid = [0u8; 32];
    OsRng.fill_bytes(&mut cid);
    cid
}

/// A decoded inbound packet, handed to the dispatcher by the Packet Handler
/// before it is routed to an inbound request handler.
#[derive(Clone, Debug)]
pub struct Inbound {
    pub cid: Cid,
    pub from: String,
    pub version: u8,
    pub payload: Vec<u8>,
}

/// One outbound request queued as part of a batch.
#[derive(Clone, Debug)]
struct Pending {
    peer_address: String,
    bytes: Vec<u8>,
}

struct Inner {
    pending: HashMap<Cid, Pending>,
    responses: Vec<Inbound>,
}

/// An in-flight multi-peer RPC: `{owner, pending, responses}`.
/// Built up with [`Batch::add`], submitted via [`Dispatcher::submit`],
/// awaited with [`Batch::wait_first`] / [`Batch::wait_all`], then retracted.
pub struct Batch {
    owner: String,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Batch {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            inner: Mutex::new(Inner {
                pending: HashMap::new(),
                responses: Vec::new(),
            }),
            notify: Notify::new(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Queue one outbound packet for `peer_address`, already stamped with
    /// `cid` by the caller (see [`random_cid`]).
    pub fn add(&self, cid: Cid, peer_address: String, bytes: Vec<u8>) {
        self.inner
            .lock()
            .expect("batch mutex poisoned")
            .pending
            .insert(cid, Pending { peer_address, bytes });
    }

    pub fn pending_cids(&self) -> Vec<Cid> {
        self.inner
            .lock()
            .expect("batch mutex poisoned")
            .pending
            .keys()
            .copied()
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().expect("batch mutex poisoned").pending.len()
    }

    pub fn response_count(&self) -> usize {
        self.inner.lock().expect("batch mutex poisoned").responses.len()
    }

    /// Responses received so far, in arrival order. May be partial if the
    /// batch hasn't finished (or timed out).
    pub fn responses(&self) -> Vec<Inbound> {
        self.inner.lock().expect("batch mutex poisoned").responses.clone()
    }

    fn deliver(&self, inbound: Inbound) {
        self.inner
            .lock()
            .expect("batch mutex poisoned")
            .responses
            .push(inbound);
        self.notify.notify_waiters();
    }

    /// Block until at least one response has arrived, or `timeout` elapses.
    pub async fn wait_first(&self, timeout: Duration) {
        self.wait_until(timeout, |inner| !inner.responses.is_empty()).await;
    }

    /// Block until every pending CID has a response, or `timeout` elapses.
    pub async fn wait_all(&self, timeout: Duration) {
        self.wait_until(timeout, |inner| inner.responses.len() >= inner.pending.len())
            .await;
    }

    async fn wait_until(&self, timeout: Duration, pred: impl Fn(&Inner) -> bool) {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if pred(&self.inner.lock().expect("batch mutex poisoned")) {
                return;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }
}

/// The global CID-to-batch correlation table.
#[derive(Default)]
pub struct Dispatcher {
    cid_table: Mutex<HashMap<Cid, Arc<Batch>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            cid_table: Mutex::new(HashMap::new()),
        }
    }

    /// Register every pending CID in `batch` and push its packets onto the
    /// transport's send queue.
    pub async fn submit(&self, batch: &Arc<Batch>, sender: &SendHandle) -> Result<()> {
        let pending: Vec<(Cid, Pending)> = {
            let inner = batch.inner.lock().expect("batch mutex poisoned");
            inner.pending.iter().map(|(c, p)| (*c, p.clone())).collect()
        };

        {
            let mut table = self.cid_table.lock().expect("dispatcher mutex poisoned");
            for (cid, _) in &pending {
                table.insert(*cid, batch.clone());
            }
        }

        for (_, p) in pending {
            sender.send(p.peer_address, p.bytes).await?;
        }
        Ok(())
    }

    /// Route a decoded inbound packet. Returns `true` if it matched a
    /// registered batch (and was delivered, exactly once); `false` if the
    /// CID is unmatched, in which case the Packet Handler should dispatch it
    /// as a fresh inbound request.
    pub fn on_inbound(&self, inbound: Inbound) -> bool {
        let batch = {
            let mut table = self.cid_table.lock().expect("dispatcher mutex poisoned");
            table.remove(&inbound.cid)
        };
        match batch {
            Some(batch) => {
                tracing::debug!(owner = batch.owner(), "delivered response to batch");
                batch.deliver(inbound);
                true
            }
            None => {
                tracing::trace!("no batch registered for inbound cid");
                false
            }
        }
    }

    /// Remove every CID `batch` registered. Idempotent: CIDs already matched
    /// or already retracted are simply absent from the table.
    pub fn retract(&self, batch: &Batch) {
        let mut table = self.cid_table.lock().expect("dispatcher mutex poisoned");
        for cid in batch.pending_cids() {
            table.remove(&cid);
        }
    }
}
