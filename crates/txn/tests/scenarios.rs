use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use k23si_cpo::CpoClient;
use k23si_transport::{Channel, Dispatcher, RdmaChannel, RpcClient};
use k23si_txn::{NullCounterSink, TxnError, TxnHandle, TxnOptions};
use k23si_wire::frame::{decode_payload, encode_payload};
use k23si_wire::msg::{
    CollectionMetadata, EndRequest, EndResponse, GetPartitionMapRequest, GetPartitionMapResponse,
    HeartbeatRequest, HeartbeatResponse, Key, Mtr, PartitionAssignment, PartitionMap, Priority,
    ReadRequest, ReadResponse, Timestamp, WriteRequest, WriteResponse,
};
use k23si_wire::{Endpoint, Metadata as WireMetadata, Pvid, Status};

/// Wires up a fake oracle (answers `GetPartitionMap` with one partition
/// covering the whole key space) and a fake partition (answers
/// read/write/heartbeat/end), returning a ready `CpoClient` plus a handle
/// to the partition's observed heartbeat count.
fn harness(heartbeat_deadline: Duration, partition_behavior: PartitionBehavior) -> (Arc<CpoClient>, Arc<AtomicU32>) {
    let oracle_dial = Endpoint::from_url("rrdma+k2rpc://127.0.0.1:8000").unwrap();
    let oracle_accept = Endpoint::from_url("rrdma+k2rpc://127.0.0.1:8001").unwrap();
    let (oracle_client_side, oracle_server_side) = RdmaChannel::pair(oracle_dial.clone(), oracle_accept);

    let partition_dial = Endpoint::from_url("rrdma+k2rpc://127.0.0.1:8100").unwrap();
    let partition_accept = Endpoint::from_url("rrdma+k2rpc://127.0.0.1:8101").unwrap();
    let (partition_client_side, partition_server_side) = RdmaChannel::pair(partition_dial.clone(), partition_accept);

    oracle_server_side.set_message_observer(Some(Arc::new({
        let oracle_server_side = oracle_server_side.clone();
        let partition_dial = partition_dial.clone();
        move |verb, _from, payload, metadata| {
            let _req: GetPartitionMapRequest = decode_payload(&payload).unwrap();
            let response = GetPartitionMapResponse {
                status: Status::Ok,
                partition_map: Some(PartitionMap {
                    metadata: CollectionMetadata { heartbeat_deadline, retention_window: Duration::from_secs(300) },
                    assignments: vec![PartitionAssignment {
                        start_key: Key::from(""),
                        end_key: None,
                        endpoint_url: partition_dial.url().to_string(),
                        pvid: Pvid(1),
                    }],
                }),
            };
            let reply = encode_payload(&response).unwrap();
            let _ = oracle_server_side.send(verb, reply, WireMetadata { response: true, ..metadata });
        }
    })));

    let heartbeat_count = Arc::new(AtomicU32::new(0));
    partition_server_side.set_message_observer(Some(Arc::new({
        let partition_server_side = partition_server_side.clone();
        let heartbeat_count = heartbeat_count.clone();
        let behavior = partition_behavior;
        move |verb, _from, payload, metadata| {
            use k23si_wire::msg::Verb as V;
            let reply_payload = match verb {
                V::K23siRead => {
                    let _req: ReadRequest = decode_payload(&payload).unwrap();
                    encode_payload(&ReadResponse { status: Status::Ok, value: Some(Bytes::from_static(b"value")) }).unwrap()
                }
                V::K23siWrite => {
                    let _req: WriteRequest = decode_payload(&payload).unwrap();
                    encode_payload(&WriteResponse { status: behavior.write_status.clone() }).unwrap()
                }
                V::K23siTxnHeartbeat => {
                    let _req: HeartbeatRequest = decode_payload(&payload).unwrap();
                    heartbeat_count.fetch_add(1, Ordering::SeqCst);
                    encode_payload(&HeartbeatResponse { status: Status::Ok }).unwrap()
                }
                V::K23siTxnEnd => {
                    let _req: EndRequest = decode_payload(&payload).unwrap();
                    encode_payload(&EndResponse { status: Status::Ok }).unwrap()
                }
                _ => unreachable!("partition does not serve this verb"),
            };
            let _ = partition_server_side.send(verb, reply_payload, WireMetadata { response: true, ..metadata });
        }
    })));

    let dispatcher = Dispatcher::new();
    dispatcher.start();
    dispatcher.register_channel(oracle_client_side).unwrap();
    dispatcher.register_channel(partition_client_side).unwrap();
    let rpc = RpcClient::new(dispatcher);
    let cpo = CpoClient::new(rpc, oracle_dial, Duration::from_secs(1), 3);
    (cpo, heartbeat_count)
}

#[derive(Clone)]
struct PartitionBehavior {
    write_status: Status,
}

impl Default for PartitionBehavior {
    fn default() -> Self {
        Self { write_status: Status::Ok }
    }
}

fn mtr() -> Mtr {
    Mtr { txn_id: 1, timestamp: Timestamp(1), priority: Priority::Medium }
}

#[tokio::test]
async fn single_key_write_then_commit_succeeds() {
    let (cpo, _heartbeats) = harness(Duration::from_secs(30), PartitionBehavior::default());
    let txn = TxnHandle::begin(mtr(), cpo, TxnOptions::default(), Arc::new(NullCounterSink));

    txn.write("orders", Key::from("k1"), Bytes::from_static(b"v1"), false).await.unwrap();
    txn.end(true).await.unwrap();
}

#[tokio::test]
async fn read_only_transaction_ends_without_touching_any_trh() {
    let (cpo, _heartbeats) = harness(Duration::from_secs(30), PartitionBehavior::default());
    let txn = TxnHandle::begin(mtr(), cpo, TxnOptions::default(), Arc::new(NullCounterSink));

    let value = txn.read("orders", Key::from("k1")).await.unwrap();
    assert_eq!(value.as_deref(), Some(&b"value"[..]));
    txn.end(true).await.unwrap();
}

#[tokio::test]
async fn conflict_abort_fails_the_handle_and_forbids_commit() {
    let behavior = PartitionBehavior { write_status: Status::AbortConflict };
    let (cpo, _heartbeats) = harness(Duration::from_secs(30), behavior);
    let txn = TxnHandle::begin(mtr(), cpo, TxnOptions::default(), Arc::new(NullCounterSink));

    let err = txn.write("orders", Key::from("k1"), Bytes::from_static(b"v1"), false).await.unwrap_err();
    assert!(matches!(err, TxnError::Status(Status::AbortConflict)));

    // Once failed, no further operation is allowed to reach the network.
    let err = txn.read("orders", Key::from("k2")).await.unwrap_err();
    assert!(matches!(err, TxnError::ContractViolation(_)));

    // end(true) on a failed handle forces an abort rather than erroring.
    txn.end(true).await.unwrap();
}

#[tokio::test]
async fn deadline_exceeded_fails_subsequent_operations() {
    let (cpo, _heartbeats) = harness(Duration::from_secs(30), PartitionBehavior::default());
    let options = TxnOptions { deadline: Duration::from_millis(1), ..TxnOptions::default() };
    let txn = TxnHandle::begin(mtr(), cpo, options, Arc::new(NullCounterSink));

    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = txn.write("orders", Key::from("k1"), Bytes::from_static(b"v1"), false).await.unwrap_err();
    assert!(matches!(err, TxnError::DeadlineExceeded));
}

#[tokio::test(start_paused = true)]
async fn a_long_running_transaction_heartbeats_after_its_first_write() {
    let (cpo, heartbeats) = harness(Duration::from_millis(40), PartitionBehavior::default());
    let options = TxnOptions { deadline: Duration::from_secs(10), ..TxnOptions::default() };
    let txn = TxnHandle::begin(mtr(), cpo, options, Arc::new(NullCounterSink));

    txn.write("orders", Key::from("k1"), Bytes::from_static(b"v1"), false).await.unwrap();
    assert_eq!(heartbeats.load(Ordering::SeqCst), 0, "no heartbeat before the arming interval elapses");

    // heartbeat interval is heartbeat_deadline / 2 = 20ms
    tokio::time::advance(Duration::from_millis(25)).await;
    tokio::task::yield_now().await;
    assert!(heartbeats.load(Ordering::SeqCst) >= 1, "heartbeat should have fired once the interval elapsed");

    txn.end(true).await.unwrap();
}
