//! Protocol-pluggable endpoint registry: one channel per [`Endpoint`], at
//! most, dialed lazily and reused on every subsequent send.
//!
//! Grounded on `RRDMARPCProtocol::_channels`/`_getOrMakeChannel` (a
//! `TXEndpoint`-keyed map, reuse-or-create on send) and on
//! `turn-server/src/server/router.rs`'s `Router { senders:
//! Mutex<HashMap<SocketAddr, Sender<Bytes>>> }`, generalized from a single
//! hardwired transport to a scheme-keyed registry of builders so TCP and
//! (simulated) RDMA can share one dispatch surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use k23si_wire::msg::Verb;
use k23si_wire::{Endpoint, Metadata};
use parking_lot::Mutex;

use crate::channel::{Channel, ChannelError};

/// Dials a fresh channel for a protocol scheme (e.g. `"tcp+k2rpc"`,
/// `"rrdma+k2rpc"`). One builder is registered per scheme the dispatcher
/// should be able to originate connections for.
#[async_trait]
pub trait ChannelBuilder: Send + Sync {
    async fn dial(&self, endpoint: Endpoint) -> Result<Arc<dyn Channel>, ChannelError>;
}

/// Owns the endpoint→channel map and the scheme→builder registry for one
/// logical transport stack. Mirrors the start/stop lifecycle of
/// `RRDMARPCProtocol`: while stopped, sends are refused and no new channel
/// is dialed.
pub struct Dispatcher {
    channels: Mutex<HashMap<Endpoint, Arc<dyn Channel>>>,
    builders: Mutex<HashMap<String, Arc<dyn ChannelBuilder>>>,
    stopped: AtomicBool,
}

impl Dispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            channels: Mutex::new(HashMap::new()),
            builders: Mutex::new(HashMap::new()),
            stopped: AtomicBool::new(true),
        })
    }

    /// Associate a protocol scheme with the builder that can dial it.
    pub fn register_protocol(&self, scheme: impl Into<String>, builder: Arc<dyn ChannelBuilder>) {
        self.builders.lock().insert(scheme.into(), builder);
    }

    /// Mark the dispatcher live. Sends and dials are refused until this is
    /// called (or after [`Dispatcher::stop`]).
    pub fn start(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }

    /// Insert an already-established channel (for example, one accepted
    /// from a listener) directly into the map, skipping the builder path.
    pub fn register_channel(&self, channel: Arc<dyn Channel>) -> Result<(), ChannelError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ChannelError::Stopped);
        }
        self.channels.lock().insert(channel.endpoint().clone(), channel);
        Ok(())
    }

    /// Return the live channel for `endpoint`, dialing one via the
    /// registered builder for its scheme if none exists yet. Concurrent
    /// callers racing to dial the same endpoint converge on whichever
    /// channel is inserted first, matching `_getOrMakeChannel`'s
    /// reuse-or-create contract.
    pub async fn get_or_dial(&self, endpoint: &Endpoint) -> Result<Arc<dyn Channel>, ChannelError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ChannelError::Stopped);
        }
        if let Some(existing) = self.channels.lock().get(endpoint) {
            return Ok(existing.clone());
        }

        let builder = {
            let builders = self.builders.lock();
            builders
                .get(endpoint.protocol())
                .cloned()
                .ok_or_else(|| ChannelError::DialFailed(format!("no builder for protocol {}", endpoint.protocol())))?
        };
        let dialed = builder.dial(endpoint.clone()).await?;

        if self.stopped.load(Ordering::SeqCst) {
            dialed.graceful_close().await;
            return Err(ChannelError::Stopped);
        }

        let mut channels = self.channels.lock();
        let winner = channels.entry(endpoint.clone()).or_insert_with(|| dialed.clone());
        Ok(winner.clone())
    }

    /// Send on the channel for `endpoint`, dialing lazily if needed.
    pub async fn send(
        &self,
        endpoint: &Endpoint,
        verb: Verb,
        payload: Vec<u8>,
        metadata: Metadata,
    ) -> Result<(), ChannelError> {
        let channel = self.get_or_dial(endpoint).await?;
        channel.send(verb, payload, metadata)
    }

    /// Drop a channel, for instance after its failure observer fires.
    pub fn remove(&self, endpoint: &Endpoint) {
        self.channels.lock().remove(endpoint);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    /// Stop accepting new dials and sends, detach every channel's
    /// observers, and gracefully close every live channel. Mirrors
    /// `RRDMARPCProtocol::stop`: set the stopped flag, then await every
    /// channel's close before returning.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let channels: Vec<Arc<dyn Channel>> = self.channels.lock().drain().map(|(_, c)| c).collect();
        for channel in &channels {
            channel.set_message_observer(None);
            channel.set_failure_observer(None);
        }
        let handles: Vec<_> = channels
            .into_iter()
            .map(|channel| tokio::spawn(async move { channel.graceful_close().await }))
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}
