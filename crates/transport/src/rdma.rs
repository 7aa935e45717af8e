//! A simulated RDMA channel.
//!
//! No RDMA verbs crate exists anywhere in the corpus this runtime is built
//! from, so unlike [`crate::tcp`] this channel never touches real hardware
//! queue pairs: it moves envelopes over an in-process `mpsc` pipe between
//! two [`RdmaChannel`] halves, standing in for the datagram completion-queue
//! delivery `RRDMARPCProtocol.cpp` drives. What it does carry over exactly
//! is the one addressing subtlety that protocol depends on: a connection an
//! RDMA endpoint *dials* and a connection it *accepts* are, from the local
//! queue pair's point of view, the same physical peer reached two different
//! ways, and must not collide in the dispatcher's endpoint→channel map. The
//! fix there is `adjusted_addr.UDQP = adjusted_addr.UDQP << 8` on the accept
//! side only — reproduced here as [`accept_side_qp`].
//!
//! This is an explicit Open Question resolution, not a faithful RDMA
//! transport: treat [`RdmaChannel`] as a test and demo double for the real
//! verbs-backed channel a production build would substitute.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use k23si_wire::msg::Verb;
use k23si_wire::{Endpoint, Metadata};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::channel::{Channel, ChannelError, FailureObserver, MessageObserver};
use crate::dispatcher::ChannelBuilder;

/// Left-shifts a dialed queue-pair number by 8 bits so the accept-side key
/// for the same physical peer never collides with the dial-side key in the
/// dispatcher's endpoint→channel map. Mirrors the one line in
/// `RRDMARPCProtocol::_handleNewChannel` that exists solely to break that
/// symmetry.
pub fn accept_side_qp(dial_side_qp: u32) -> u32 {
    dial_side_qp << 8
}

struct Delivered {
    verb: Verb,
    payload: Vec<u8>,
    metadata: Metadata,
}

/// One half of a simulated RDMA connection. `endpoint` identifies this
/// half's view of the peer (dial-side or accept-side address); `peer`
/// carries the other half's inbound queue so `send` can deliver directly.
pub struct RdmaChannel {
    endpoint: Endpoint,
    peer_inbound: mpsc::UnboundedSender<Delivered>,
    message_observer: Arc<Mutex<Option<MessageObserver>>>,
    failure_observer: Arc<Mutex<Option<FailureObserver>>>,
    closed: Arc<AtomicBool>,
}

impl RdmaChannel {
    /// Build a connected pair: `dial_endpoint` is the address the dialer
    /// used, `accept_endpoint` is the address the acceptor is keyed under
    /// (already queue-pair-shifted by the caller via [`accept_side_qp`]).
    pub fn pair(dial_endpoint: Endpoint, accept_endpoint: Endpoint) -> (Arc<Self>, Arc<Self>) {
        let (dial_tx, dial_rx) = mpsc::unbounded_channel::<Delivered>();
        let (accept_tx, accept_rx) = mpsc::unbounded_channel::<Delivered>();

        let dial_closed = Arc::new(AtomicBool::new(false));
        let accept_closed = Arc::new(AtomicBool::new(false));

        let dial_side = Arc::new(Self {
            endpoint: dial_endpoint.clone(),
            peer_inbound: accept_tx,
            message_observer: Arc::new(Mutex::new(None)),
            failure_observer: Arc::new(Mutex::new(None)),
            closed: dial_closed.clone(),
        });
        let accept_side = Arc::new(Self {
            endpoint: accept_endpoint.clone(),
            peer_inbound: dial_tx,
            message_observer: Arc::new(Mutex::new(None)),
            failure_observer: Arc::new(Mutex::new(None)),
            closed: accept_closed.clone(),
        });

        tokio::spawn(pump(
            dial_rx,
            dial_endpoint,
            dial_closed,
            dial_side.message_observer.clone(),
            dial_side.failure_observer.clone(),
        ));
        tokio::spawn(pump(
            accept_rx,
            accept_endpoint,
            accept_closed,
            accept_side.message_observer.clone(),
            accept_side.failure_observer.clone(),
        ));

        (dial_side, accept_side)
    }
}

async fn pump(
    mut inbound: mpsc::UnboundedReceiver<Delivered>,
    remote: Endpoint,
    closed: Arc<AtomicBool>,
    message_observer: Arc<Mutex<Option<MessageObserver>>>,
    failure_observer: Arc<Mutex<Option<FailureObserver>>>,
) {
    while let Some(delivered) = inbound.recv().await {
        let observer = message_observer.lock().clone();
        if let Some(observer) = observer {
            observer(delivered.verb, remote.clone(), delivered.payload, delivered.metadata);
        }
    }
    if !closed.swap(true, Ordering::SeqCst) {
        let observer = failure_observer.lock().clone();
        if let Some(observer) = observer {
            observer(remote.clone(), Some("peer queue pair torn down".into()));
        }
    }
}

#[async_trait]
impl Channel for RdmaChannel {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn send(&self, verb: Verb, payload: Vec<u8>, metadata: Metadata) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        self.peer_inbound
            .send(Delivered { verb, payload, metadata })
            .map_err(|_| ChannelError::Closed)
    }

    fn set_message_observer(&self, observer: Option<MessageObserver>) {
        *self.message_observer.lock() = observer;
    }

    fn set_failure_observer(&self, observer: Option<FailureObserver>) {
        *self.failure_observer.lock() = observer;
    }

    async fn graceful_close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A builder that can only ever fail: there is no real RDMA fabric to dial
/// into in this environment, so `rrdma+k2rpc` endpoints must be wired up
/// directly via [`RdmaChannel::pair`] (tests and the sandbox binary do this)
/// rather than through the dispatcher's lazy-dial path.
pub struct UnreachableRdmaBuilder;

#[async_trait]
impl ChannelBuilder for UnreachableRdmaBuilder {
    async fn dial(&self, endpoint: Endpoint) -> Result<Arc<dyn Channel>, ChannelError> {
        Err(ChannelError::DialFailed(format!(
            "no RDMA fabric available to dial {}; connect via RdmaChannel::pair instead",
            endpoint.url()
        )))
    }
}
