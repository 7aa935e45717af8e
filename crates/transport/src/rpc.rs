//! Request/response correlation layered on top of the fire-and-forget
//! [`Channel`]/[`Dispatcher`] contract.
//!
//! Neither the channel nor the dispatcher know about requests and
//! responses; they move verb-tagged byte payloads one way. `RpcClient` is
//! where "send this, then await a matching reply within a deadline" lives,
//! grounded on `submerge-net::Node`'s `requests: BTreeMap<i64, Request>`
//! pending-call table — except keyed by an unsigned sequence counter rather
//! than a signed id, and backed by a `oneshot` per call instead of a polled
//! map entry.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use k23si_wire::frame::{decode_payload, encode_payload};
use k23si_wire::msg::PartitionedRequest;
use k23si_wire::{Endpoint, Metadata};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::channel::{Channel, ChannelError, FailureObserver, MessageObserver};
use crate::dispatcher::Dispatcher;

#[derive(Debug)]
pub enum RpcError {
    Channel(ChannelError),
    Wire(k23si_wire::Error),
    /// No reply correlated to this call within its deadline.
    Timeout,
    /// The channel was torn down before a reply arrived.
    Cancelled,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Channel(e) => write!(f, "{e}"),
            RpcError::Wire(e) => write!(f, "{e}"),
            RpcError::Timeout => write!(f, "call timed out"),
            RpcError::Cancelled => write!(f, "call cancelled"),
        }
    }
}

impl std::error::Error for RpcError {}

impl From<ChannelError> for RpcError {
    fn from(e: ChannelError) -> Self {
        RpcError::Channel(e)
    }
}

impl From<k23si_wire::Error> for RpcError {
    fn from(e: k23si_wire::Error) -> Self {
        RpcError::Wire(e)
    }
}

/// Dispatches [`PartitionedRequest`]s and resolves their responses by a
/// per-call correlation id stamped into [`Metadata::correlation`].
pub struct RpcClient {
    dispatcher: Arc<Dispatcher>,
    next_correlation: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Vec<u8>>>>,
    observed_endpoints: Mutex<HashSet<Endpoint>>,
}

impl RpcClient {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            next_correlation: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            observed_endpoints: Mutex::new(HashSet::new()),
        })
    }

    /// Send `req` to `endpoint` and await its response, or time out.
    pub async fn call<Req: PartitionedRequest>(
        self: &Arc<Self>,
        endpoint: &Endpoint,
        req: &Req,
        deadline: Duration,
    ) -> Result<Req::Response, RpcError> {
        let channel = self.channel_with_observers(endpoint).await?;

        let correlation = self.next_correlation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(correlation, tx);

        let payload = match encode_payload(req) {
            Ok(p) => p,
            Err(e) => {
                self.pending.lock().remove(&correlation);
                return Err(e.into());
            }
        };
        let metadata = Metadata {
            deadline_ms: Some(deadline.as_millis() as u64),
            correlation: Some(correlation),
            response: false,
        };

        if let Err(e) = channel.send(Req::VERB, payload, metadata) {
            self.pending.lock().remove(&correlation);
            return Err(e.into());
        }

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(payload)) => decode_payload(&payload).map_err(RpcError::from),
            Ok(Err(_)) => Err(RpcError::Cancelled),
            Err(_) => {
                self.pending.lock().remove(&correlation);
                Err(RpcError::Timeout)
            }
        }
    }

    /// Dial (or reuse) the channel for `endpoint`, installing this client's
    /// observers on it the first time it is seen.
    async fn channel_with_observers(self: &Arc<Self>, endpoint: &Endpoint) -> Result<Arc<dyn Channel>, ChannelError> {
        let channel = self.dispatcher.get_or_dial(endpoint).await?;

        let mut seen = self.observed_endpoints.lock();
        if seen.insert(endpoint.clone()) {
            let message: MessageObserver = {
                let this = self.clone();
                Arc::new(move |_verb, _from, payload, metadata| this.on_message(payload, metadata))
            };
            let failure: FailureObserver = {
                let this = self.clone();
                Arc::new(move |endpoint, reason| this.on_failure(endpoint, reason))
            };
            channel.set_message_observer(Some(message));
            channel.set_failure_observer(Some(failure));
        }
        Ok(channel)
    }

    fn on_message(&self, payload: Vec<u8>, metadata: Metadata) {
        if !metadata.response {
            return;
        }
        let Some(correlation) = metadata.correlation else { return };
        if let Some(sender) = self.pending.lock().remove(&correlation) {
            let _ = sender.send(payload);
        }
    }

    fn on_failure(&self, endpoint: Endpoint, _reason: Option<String>) {
        self.dispatcher.remove(&endpoint);
        self.observed_endpoints.lock().remove(&endpoint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::rdma::RdmaChannel;
    use k23si_wire::msg::{GetTimestampBatchRequest, GetTimestampBatchResponse, Timestamp};
    use k23si_wire::Status;

    #[tokio::test]
    async fn call_round_trips_over_a_simulated_channel() {
        let dial_ep = Endpoint::from_url("rrdma+k2rpc://127.0.0.1:9000").unwrap();
        let accept_ep = Endpoint::from_url("rrdma+k2rpc://127.0.0.1:9000").unwrap();
        let (client_side, server_side) = RdmaChannel::pair(dial_ep.clone(), accept_ep);

        // Toy echo server: reflect a canned timestamp batch back with the
        // same correlation id, flipping the response flag.
        server_side.set_message_observer(Some(Arc::new({
            let server_side = server_side.clone();
            move |_verb, _from, _payload, metadata| {
                let resp = GetTimestampBatchResponse { status: Status::Ok, start: Timestamp(100), count: 5 };
                let payload = encode_payload(&resp).unwrap();
                let reply_metadata = Metadata { response: true, ..metadata };
                let _ = server_side.send(_verb, payload, reply_metadata);
            }
        })));

        let dispatcher = Dispatcher::new();
        dispatcher.start();
        dispatcher.register_channel(client_side).unwrap();

        let rpc = RpcClient::new(dispatcher);
        let req = GetTimestampBatchRequest { count: 5 };
        let resp = rpc
            .call(&dial_ep, &req, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(resp.start, Timestamp(100));
        assert_eq!(resp.count, 5);
    }

    #[tokio::test]
    async fn call_times_out_when_nothing_replies() {
        let dial_ep = Endpoint::from_url("rrdma+k2rpc://127.0.0.1:9001").unwrap();
        let accept_ep = Endpoint::from_url("rrdma+k2rpc://127.0.0.1:9001").unwrap();
        let (client_side, _server_side) = RdmaChannel::pair(dial_ep.clone(), accept_ep);

        let dispatcher = Dispatcher::new();
        dispatcher.start();
        dispatcher.register_channel(client_side).unwrap();

        let rpc = RpcClient::new(dispatcher);
        let req = GetTimestampBatchRequest { count: 1 };
        let err = rpc
            .call(&dial_ep, &req, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Timeout));
    }
}
