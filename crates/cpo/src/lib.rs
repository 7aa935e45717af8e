//! Placement-oracle (CPO) client: caches each collection's partition map
//! and routes a [`PartitionedRequest`] to the partition owning its key,
//! recovering locally from the transient routing and transport faults
//! spec.md section 4.4 calls out.
//!
//! The collection cache and its single-flight refresh are grounded on the
//! same serializing-lock-plus-epoch pattern `k23si-tso` uses for its batch
//! cursor; the verb dispatch that picks `GetPartitionMap` vs
//! `CreateCollection` mirrors `crates/service/src/routing/mod.rs`'s
//! `Router::route` matching on a fixed set of request kinds. Routing itself
//! — matching a key against a collection's partition assignments, stamping
//! the resolved PVID, and reacting to `StalePartitionMap` /
//! `UnknownPartition` / `NotOwnerOfPartition` by refreshing and retrying —
//! follows `K2TxnHandle::read`/`write`'s use of `_cpo_client->PartitionRequest`
//! in `k23si_client.h`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use k23si_transport::{RpcClient, RpcError};
use k23si_wire::msg::{
    CollectionMetadata, CreateCollectionRequest, GetPartitionMapRequest, HasStatus, Key,
    PartitionAssignment, PartitionedRequest,
};
use k23si_wire::{Endpoint, Status};
use tokio::sync::Mutex;

#[derive(Debug)]
pub enum CpoError {
    Rpc(RpcError),
    /// The oracle answered but refused the request.
    Oracle(Status),
    /// The oracle reported success but omitted the partition map it promised.
    MissingPartitionMap,
    /// No assignment in the cached map covers this request's routing key.
    UnroutableKey(String),
    /// An assignment named an endpoint URL this client cannot parse.
    InvalidEndpoint(String),
}

impl fmt::Display for CpoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpoError::Rpc(e) => write!(f, "{e}"),
            CpoError::Oracle(status) => write!(f, "placement oracle rejected request: {status:?}"),
            CpoError::MissingPartitionMap => write!(f, "oracle reported success with no partition map"),
            CpoError::UnroutableKey(collection) => write!(f, "no partition covers this key in collection {collection}"),
            CpoError::InvalidEndpoint(url) => write!(f, "partition assignment named an unparseable endpoint: {url}"),
        }
    }
}

impl std::error::Error for CpoError {}

/// A collection's cached partition map, plus an epoch bumped on every
/// successful refresh. The epoch is how concurrent callers that all hit a
/// stale map collapse onto one oracle round trip: each passes the epoch it
/// observed into [`CpoClient::refresh`], and a refresh that finds the epoch
/// has already moved on returns the newer map for free.
#[derive(Clone, Debug)]
pub struct CollectionEntry {
    pub name: String,
    pub metadata: CollectionMetadata,
    pub assignments: Vec<PartitionAssignment>,
    pub epoch: u64,
}

struct CollectionSlot {
    entry: Option<Arc<CollectionEntry>>,
    epoch: u64,
}

fn find_assignment<'a>(entry: &'a CollectionEntry, key: Option<&Key>) -> Option<&'a PartitionAssignment> {
    let key = key?;
    entry.assignments.iter().find(|assignment| {
        assignment.start_key <= *key
            && assignment.end_key.as_ref().map_or(true, |end| key < end)
    })
}

pub struct CpoClient {
    rpc: Arc<RpcClient>,
    oracle: Endpoint,
    call_deadline: Duration,
    max_routing_retries: u32,
    collections: Mutex<HashMap<String, Arc<Mutex<CollectionSlot>>>>,
}

impl CpoClient {
    pub fn new(rpc: Arc<RpcClient>, oracle: Endpoint, call_deadline: Duration, max_routing_retries: u32) -> Arc<Self> {
        Arc::new(Self {
            rpc,
            oracle,
            call_deadline,
            max_routing_retries,
            collections: Mutex::new(HashMap::new()),
        })
    }

    async fn slot(&self, collection: &str) -> Arc<Mutex<CollectionSlot>> {
        self.collections
            .lock()
            .await
            .entry(collection.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CollectionSlot { entry: None, epoch: 0 })))
            .clone()
    }

    pub async fn create_collection(&self, name: &str, retention_window: Duration) -> Result<Arc<CollectionEntry>, CpoError> {
        let slot = self.slot(name).await;
        let mut guard = slot.lock().await;
        let request = CreateCollectionRequest { collection: name.to_string(), retention_window };
        let response = self.rpc.call(&self.oracle, &request, self.call_deadline).await.map_err(CpoError::Rpc)?;
        if !response.status.is_2xx() {
            return Err(CpoError::Oracle(response.status));
        }
        let map = response.partition_map.ok_or(CpoError::MissingPartitionMap)?;
        guard.epoch += 1;
        let entry = Arc::new(CollectionEntry {
            name: name.to_string(),
            metadata: map.metadata,
            assignments: map.assignments,
            epoch: guard.epoch,
        });
        guard.entry = Some(entry.clone());
        Ok(entry)
    }

    pub async fn get_partition_map(&self, collection: &str) -> Result<Arc<CollectionEntry>, CpoError> {
        let slot = self.slot(collection).await;
        let (cached, epoch) = {
            let guard = slot.lock().await;
            (guard.entry.clone(), guard.epoch)
        };
        match cached {
            Some(entry) => Ok(entry),
            None => self.refresh(collection, epoch).await,
        }
    }

    /// Force a fetch from the oracle unless another caller already
    /// refreshed past `known_epoch` while this caller was waiting for the
    /// slot lock, in which case the entry it left behind is reused.
    pub async fn refresh(&self, collection: &str, known_epoch: u64) -> Result<Arc<CollectionEntry>, CpoError> {
        let slot = self.slot(collection).await;
        let mut guard = slot.lock().await;
        if guard.epoch != known_epoch {
            if let Some(entry) = &guard.entry {
                return Ok(entry.clone());
            }
        }

        let request = GetPartitionMapRequest { collection: collection.to_string() };
        let response = self.rpc.call(&self.oracle, &request, self.call_deadline).await.map_err(CpoError::Rpc)?;
        if !response.status.is_2xx() {
            return Err(CpoError::Oracle(response.status));
        }
        let map = response.partition_map.ok_or(CpoError::MissingPartitionMap)?;
        guard.epoch += 1;
        let entry = Arc::new(CollectionEntry {
            name: collection.to_string(),
            metadata: map.metadata,
            assignments: map.assignments,
            epoch: guard.epoch,
        });
        guard.entry = Some(entry.clone());
        Ok(entry)
    }

    /// Route `req` to the partition owning its key, recovering locally from
    /// stale routing (refresh-and-retry, bounded) and from a single
    /// transport fault (retry once against the freshly-resolved endpoint).
    pub async fn partition_request<Req>(&self, mut req: Req) -> Result<Req::Response, CpoError>
    where
        Req: PartitionedRequest,
    {
        let collection = req.collection().to_string();
        let mut entry = self.get_partition_map(&collection).await?;
        let mut routing_attempts = 0u32;
        let mut transport_retried = false;

        loop {
            let assignment = find_assignment(&entry, req.routing_key())
                .cloned()
                .ok_or_else(|| CpoError::UnroutableKey(collection.clone()))?;
            let endpoint = Endpoint::from_url(&assignment.endpoint_url)
                .map_err(|_| CpoError::InvalidEndpoint(assignment.endpoint_url.clone()))?;
            req.set_pvid(assignment.pvid);

            match self.rpc.call(&endpoint, &req, self.call_deadline).await {
                Ok(response) => {
                    if response.status().is_retriable_routing_error() {
                        routing_attempts += 1;
                        if routing_attempts > self.max_routing_retries {
                            log::warn!(
                                "giving up on {collection} after {routing_attempts} routing retries, status {:?}",
                                response.status()
                            );
                            return Ok(response);
                        }
                        entry = self.refresh(&collection, entry.epoch).await?;
                        continue;
                    }
                    return Ok(response);
                }
                Err(RpcError::Timeout) | Err(RpcError::Channel(_)) if !transport_retried => {
                    transport_retried = true;
                    log::warn!("transport fault dispatching to {}, retrying once", assignment.endpoint_url);
                    continue;
                }
                Err(e) => return Err(CpoError::Rpc(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k23si_transport::{Channel, Dispatcher, RdmaChannel};
    use k23si_wire::frame::{decode_payload, encode_payload};
    use k23si_wire::msg::{GetPartitionMapResponse, Mtr, Priority, ReadRequest, ReadResponse, Timestamp};
    use k23si_wire::{Metadata as WireMetadata, Pvid};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn assignment(start: &str, end: Option<&str>, endpoint: &str, pvid: u64) -> PartitionAssignment {
        PartitionAssignment {
            start_key: Key::from(start),
            end_key: end.map(Key::from),
            endpoint_url: endpoint.to_string(),
            pvid: Pvid(pvid),
        }
    }

    fn mtr() -> Mtr {
        Mtr { txn_id: 1, timestamp: Timestamp(10), priority: Priority::Medium }
    }

    #[tokio::test]
    async fn routes_to_the_assignment_covering_the_key_and_caches_the_map() {
        let oracle_dial = Endpoint::from_url("rrdma+k2rpc://127.0.0.1:6000").unwrap();
        let oracle_accept = Endpoint::from_url("rrdma+k2rpc://127.0.0.1:6001").unwrap();
        let (oracle_client_side, oracle_server_side) = RdmaChannel::pair(oracle_dial.clone(), oracle_accept);

        let oracle_lookups = Arc::new(AtomicU32::new(0));
        oracle_server_side.set_message_observer(Some(Arc::new({
            let oracle_server_side = oracle_server_side.clone();
            let oracle_lookups = oracle_lookups.clone();
            move |verb, _from, payload, metadata| {
                oracle_lookups.fetch_add(1, Ordering::SeqCst);
                let _req: GetPartitionMapRequest = decode_payload(&payload).unwrap();
                let response = GetPartitionMapResponse {
                    status: Status::Ok,
                    partition_map: Some(k23si_wire::msg::PartitionMap {
                        metadata: k23si_wire::msg::CollectionMetadata {
                            heartbeat_deadline: Duration::from_secs(5),
                            retention_window: Duration::from_secs(60),
                        },
                        assignments: vec![assignment("a", Some("m"), "tcp+k2rpc://127.0.0.1:6100", 1)],
                    }),
                };
                let reply = encode_payload(&response).unwrap();
                let _ = oracle_server_side.send(verb, reply, WireMetadata { response: true, ..metadata });
            }
        })));

        let dispatcher = Dispatcher::new();
        dispatcher.start();
        dispatcher.register_channel(oracle_client_side).unwrap();
        let rpc = RpcClient::new(dispatcher);
        let cpo = CpoClient::new(rpc, oracle_dial, Duration::from_secs(1), 3);

        let first = cpo.get_partition_map("orders").await.unwrap();
        assert_eq!(first.assignments.len(), 1);
        let second = cpo.get_partition_map("orders").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second), "second lookup should be served from cache");
        assert_eq!(oracle_lookups.load(Ordering::SeqCst), 1, "only one oracle round trip should have happened");
    }

    #[tokio::test]
    async fn stale_routing_triggers_refresh_and_a_successful_retry() {
        let oracle_dial = Endpoint::from_url("rrdma+k2rpc://127.0.0.1:6200").unwrap();
        let oracle_accept = Endpoint::from_url("rrdma+k2rpc://127.0.0.1:6201").unwrap();
        let (oracle_client_side, oracle_server_side) = RdmaChannel::pair(oracle_dial.clone(), oracle_accept);

        let partition_dial = Endpoint::from_url("rrdma+k2rpc://127.0.0.1:6300").unwrap();
        let partition_accept = Endpoint::from_url("rrdma+k2rpc://127.0.0.1:6301").unwrap();
        let (partition_client_side, partition_server_side) = RdmaChannel::pair(partition_dial.clone(), partition_accept);

        oracle_server_side.set_message_observer(Some(Arc::new({
            let oracle_server_side = oracle_server_side.clone();
            let partition_dial = partition_dial.clone();
            move |verb, _from, payload, metadata| {
                let _req: GetPartitionMapRequest = decode_payload(&payload).unwrap();
                let response = GetPartitionMapResponse {
                    status: Status::Ok,
                    partition_map: Some(k23si_wire::msg::PartitionMap {
                        metadata: k23si_wire::msg::CollectionMetadata {
                            heartbeat_deadline: Duration::from_secs(5),
                            retention_window: Duration::from_secs(60),
                        },
                        assignments: vec![assignment("a", None, partition_dial.url(), 1)],
                    }),
                };
                let reply = encode_payload(&response).unwrap();
                let _ = oracle_server_side.send(verb, reply, WireMetadata { response: true, ..metadata });
            }
        })));

        let call_count = Arc::new(AtomicU32::new(0));
        partition_server_side.set_message_observer(Some(Arc::new({
            let partition_server_side = partition_server_side.clone();
            let call_count = call_count.clone();
            move |verb, _from, payload, metadata| {
                let _req: ReadRequest = decode_payload(&payload).unwrap();
                let n = call_count.fetch_add(1, Ordering::SeqCst);
                let status = if n == 0 { Status::NotOwnerOfPartition } else { Status::Ok };
                let response = ReadResponse { status, value: Some(bytes::Bytes::from_static(b"v")) };
                let reply = encode_payload(&response).unwrap();
                let _ = partition_server_side.send(verb, reply, WireMetadata { response: true, ..metadata });
            }
        })));

        let dispatcher = Dispatcher::new();
        dispatcher.start();
        dispatcher.register_channel(oracle_client_side).unwrap();
        dispatcher.register_channel(partition_client_side).unwrap();
        let rpc = RpcClient::new(dispatcher);
        let cpo = CpoClient::new(rpc, oracle_dial, Duration::from_secs(1), 3);

        let req = ReadRequest {
            pvid: Pvid(0),
            collection: "orders".into(),
            mtr: mtr(),
            key: Key::from("apple"),
        };
        let response = cpo.partition_request(req).await.unwrap();
        assert_eq!(response.status, Status::Ok);
        assert_eq!(call_count.load(Ordering::SeqCst), 2, "should have retried exactly once after the stale-routing reply");
    }
}
