//! Thin adapter to the overlay transport: two bounded queues carrying
//! `(peer-address, bytes)` records. The core enqueues on `send` and
//! dequeues from `receive`; it never touches a socket directly. The overlay
//! session layer — actually moving bytes over the anonymizing transport —
//! is an external collaborator that drives the other end of these queues.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

/// A datagram as it crosses the transport boundary: an opaque peer address
/// string (meaningful to the overlay layer, not to the DHT core) paired with
/// the raw wire bytes.
pub type Datagram = (String, Vec<u8>);

/// Running byte totals for the node's lifetime, shared between a
/// [`TransportGateway`] and every [`SendHandle`] cloned from it. Mirrors the
/// original's `BoteContext::add_sent_byte_count`/`add_recv_byte_count`
/// counters, reported by the engine's maintenance task.
#[derive(Clone, Default)]
pub struct ByteCounters {
    sent: Arc<AtomicU64>,
    received: Arc<AtomicU64>,
}

impl ByteCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sent(&self, n: usize) {
        self.sent.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn add_received(&self, n: usize) {
        self.received.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("send queue closed: the overlay collaborator is no longer receiving")]
    SendClosed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A cloneable handle onto the outbound half of a [`TransportGateway`].
/// Cloning shares the same underlying queue, so the Batch Dispatcher and
/// inbound request handlers can each hold one independently of whoever owns
/// the gateway's receive half.
#[derive(Clone)]
pub struct SendHandle {
    send_tx: mpsc::Sender<Datagram>,
    counters: ByteCounters,
}

impl SendHandle {
    /// Enqueue a datagram for transmission. Waits if the send queue is full;
    /// this is the gateway's backpressure mechanism.
    pub async fn send(&self, peer_address: String, bytes: Vec<u8>) -> Result<()> {
        self.counters.add_sent(bytes.len());
        self.send_tx
            .send((peer_address, bytes))
            .await
            .map_err(|_| TransportError::SendClosed)
    }

    /// Non-blocking send; returns immediately if the queue is full instead
    /// of waiting, for callers (e.g. the maintenance loop) that would rather
    /// skip a beat than stall.
    pub fn try_send(&self, peer_address: String, bytes: Vec<u8>) -> Result<()> {
        self.counters.add_sent(bytes.len());
        self.send_tx
            .try_send((peer_address, bytes))
            .map_err(|_| TransportError::SendClosed)
    }

    /// This handle's view of the node's lifetime send/receive byte totals.
    pub fn counters(&self) -> ByteCounters {
        self.counters.clone()
    }
}

/// The core-facing half of the gateway: enqueue outbound datagrams, dequeue
/// inbound ones.
pub struct TransportGateway {
    send_tx: mpsc::Sender<Datagram>,
    receive_rx: mpsc::Receiver<Datagram>,
    counters: ByteCounters,
}

/// The overlay-facing half: whatever drives the actual transport reads
/// outbound datagrams here and pushes inbound ones back.
pub struct OverlayHandle {
    pub outbound: mpsc::Receiver<Datagram>,
    pub inbound: mpsc::Sender<Datagram>,
}

impl TransportGateway {
    /// Build a connected gateway/overlay-handle pair. `capacity` bounds both
    /// queues; a full `send` queue applies backpressure to callers of
    /// [`TransportGateway::send`] rather than dropping datagrams.
    pub fn channel(capacity: usize) -> (Self, OverlayHandle) {
        let (send_tx, outbound) = mpsc::channel(capacity);
        let (inbound, receive_rx) = mpsc::channel(capacity);
        (
            Self {
                send_tx,
                receive_rx,
                counters: ByteCounters::new(),
            },
            OverlayHandle { outbound, inbound },
        )
    }

    /// Enqueue a datagram for transmission. Waits if the send queue is full;
    /// this is the gateway's backpressure mechanism.
    pub async fn send(&self, peer_address: String, bytes: Vec<u8>) -> Result<()> {
        self.counters.add_sent(bytes.len());
        self.send_tx
            .send((peer_address, bytes))
            .await
            .map_err(|_| TransportError::SendClosed)
    }

    /// Non-blocking send; returns immediately if the queue is full instead
    /// of waiting, for callers (e.g. the maintenance loop) that would rather
    /// skip a beat than stall.
    pub fn try_send(&self, peer_address: String, bytes: Vec<u8>) -> Result<()> {
        self.counters.add_sent(bytes.len());
        self.send_tx
            .try_send((peer_address, bytes))
            .map_err(|_| TransportError::SendClosed)
    }

    /// Dequeue the next inbound datagram. Returns `None` once the overlay
    /// collaborator has dropped its inbound sender — no more datagrams will
    /// ever arrive.
    pub async fn recv(&mut self) -> Option<Datagram> {
        let datagram = self.receive_rx.recv().await;
        if let Some((_, bytes)) = &datagram {
            self.counters.add_received(bytes.len());
        }
        datagram
    }

    /// This gateway's view of the node's lifetime send/receive byte totals.
    pub fn counters(&self) -> ByteCounters {
        self.counters.clone()
    }

    /// A cloneable handle onto this gateway's outbound queue, independent of
    /// whoever ends up owning (and consuming from) `self`.
    pub fn sender(&self) -> SendHandle {
        SendHandle {
            send_tx: self.send_tx.clone(),
            counters: self.counters.clone(),
        }
    }
}
