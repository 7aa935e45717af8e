//! In-memory stand-ins for the placement oracle and a single partition,
//! wired up over [`RdmaChannel`] pairs exactly as `crates/txn/tests/scenarios.rs`
//! does. Good enough to drive the facade end-to-end without a real cluster;
//! not a model of server-side SI (spec.md section 1 keeps that opaque).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use k23si_transport::{Channel, RdmaChannel};
use k23si_wire::frame::{decode_payload, encode_payload};
use k23si_wire::msg::{
    CollectionMetadata, CreateCollectionRequest, CreateCollectionResponse, EndRequest, EndResponse,
    GetPartitionMapRequest, GetPartitionMapResponse, GetTimestampBatchRequest, GetTimestampBatchResponse,
    HeartbeatRequest, HeartbeatResponse, Key, PartitionAssignment, PartitionMap, ReadRequest, ReadResponse,
    Timestamp, Verb, WriteRequest, WriteResponse,
};
use k23si_wire::{Endpoint, Metadata, Pvid, Status};
use parking_lot::Mutex;

pub struct FakeCluster {
    oracle_dial: Endpoint,
    oracle_channel: Arc<RdmaChannel>,
    partition_channel: Arc<RdmaChannel>,
}

impl FakeCluster {
    pub fn spin_up(heartbeat_deadline: Duration) -> Self {
        let oracle_dial = Endpoint::from_url("rrdma+k2rpc://127.0.0.1:19000").unwrap();
        let oracle_accept = Endpoint::from_url("rrdma+k2rpc://127.0.0.1:19001").unwrap();
        let (oracle_channel, oracle_server_side) = RdmaChannel::pair(oracle_dial.clone(), oracle_accept);

        let partition_dial = Endpoint::from_url("rrdma+k2rpc://127.0.0.1:19100").unwrap();
        let partition_accept = Endpoint::from_url("rrdma+k2rpc://127.0.0.1:19101").unwrap();
        let (partition_channel, partition_server_side) = RdmaChannel::pair(partition_dial.clone(), partition_accept);

        let partition_url = partition_dial.url().to_string();
        oracle_server_side.set_message_observer(Some(Arc::new({
            let oracle_server_side = oracle_server_side.clone();
            move |verb, _from, payload, metadata| {
                let reply_payload = serve_oracle(verb, &payload, heartbeat_deadline, &partition_url);
                let reply_metadata = Metadata { response: true, ..metadata };
                let _ = oracle_server_side.send(verb, reply_payload, reply_metadata);
            }
        })));

        let store = Arc::new(Store::default());
        partition_server_side.set_message_observer(Some(Arc::new({
            let partition_server_side = partition_server_side.clone();
            move |verb, _from, payload, metadata| {
                let reply_payload = serve_partition(&store, verb, &payload);
                let reply_metadata = Metadata { response: true, ..metadata };
                let _ = partition_server_side.send(verb, reply_payload, reply_metadata);
            }
        })));

        Self { oracle_dial, oracle_channel, partition_channel }
    }

    pub fn oracle_url(&self) -> &str {
        self.oracle_dial.url()
    }

    pub fn oracle_channel(&self) -> Arc<RdmaChannel> {
        self.oracle_channel.clone()
    }

    pub fn partition_channel(&self) -> Arc<RdmaChannel> {
        self.partition_channel.clone()
    }
}

fn serve_oracle(verb: Verb, payload: &[u8], heartbeat_deadline: Duration, partition_url: &str) -> Vec<u8> {
    match verb {
        Verb::GetPartitionMap => {
            let _req: GetPartitionMapRequest = decode_payload(payload).unwrap();
            let response = GetPartitionMapResponse { status: Status::Ok, partition_map: Some(whole_keyspace_map(heartbeat_deadline, partition_url)) };
            encode_payload(&response).unwrap()
        }
        Verb::CreateCollection => {
            let _req: CreateCollectionRequest = decode_payload(payload).unwrap();
            let response =
                CreateCollectionResponse { status: Status::Created, partition_map: Some(whole_keyspace_map(heartbeat_deadline, partition_url)) };
            encode_payload(&response).unwrap()
        }
        Verb::GetTimestampBatch => {
            let req: GetTimestampBatchRequest = decode_payload(payload).unwrap();
            static NEXT: std::sync::atomic::AtomicI64 = std::sync::atomic::AtomicI64::new(1);
            let start = NEXT.fetch_add(req.count as i64, std::sync::atomic::Ordering::Relaxed);
            let response = GetTimestampBatchResponse { status: Status::Ok, start: Timestamp(start), count: req.count };
            encode_payload(&response).unwrap()
        }
        other => unreachable!("oracle does not serve {other:?}"),
    }
}

fn whole_keyspace_map(heartbeat_deadline: Duration, partition_url: &str) -> PartitionMap {
    PartitionMap {
        metadata: CollectionMetadata { heartbeat_deadline, retention_window: Duration::from_secs(600) },
        assignments: vec![PartitionAssignment {
            start_key: Key::from(""),
            end_key: None,
            endpoint_url: partition_url.to_string(),
            pvid: Pvid(1),
        }],
    }
}

#[derive(Default)]
struct Store {
    values: Mutex<HashMap<Key, Bytes>>,
}

fn serve_partition(store: &Arc<Store>, verb: Verb, payload: &[u8]) -> Vec<u8> {
    match verb {
        Verb::K23siRead => {
            let req: ReadRequest = decode_payload(payload).unwrap();
            let value = store.values.lock().get(&req.key).cloned();
            encode_payload(&ReadResponse { status: Status::Ok, value }).unwrap()
        }
        Verb::K23siWrite => {
            let req: WriteRequest = decode_payload(payload).unwrap();
            store.values.lock().insert(req.key, req.value);
            encode_payload(&WriteResponse { status: Status::Ok }).unwrap()
        }
        Verb::K23siTxnHeartbeat => {
            let _req: HeartbeatRequest = decode_payload(payload).unwrap();
            encode_payload(&HeartbeatResponse { status: Status::Ok }).unwrap()
        }
        Verb::K23siTxnEnd => {
            let _req: EndRequest = decode_payload(payload).unwrap();
            encode_payload(&EndResponse { status: Status::Ok }).unwrap()
        }
        other => unreachable!("partition does not serve {other:?}"),
    }
}
