//! Timestamp client: batches timestamp ranges from the oracle and slices
//! them out to callers in strictly increasing issuance order.
//!
//! Grounded on two things at once: the `K23SIClient`/oracle wiring sketched
//! in `k23si_client.h` (a timestamp oracle reachable the same way any other
//! partition is, via a request/response call), and the `Tm`/`Oracle`
//! monotonic counter discipline in reifydb's MVCC transaction manager
//! (`crates/transaction/src/mvcc/transaction/mod.rs`) — a single
//! serializing point hands out the next timestamp, and refilling the local
//! batch happens behind that same serializing point so concurrent callers
//! collapse onto one oracle round trip instead of each racing to refill.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use k23si_transport::{RpcClient, RpcError};
use k23si_wire::msg::{GetTimestampBatchRequest, Timestamp};
use k23si_wire::{Endpoint, Status};
use tokio::sync::Mutex;

#[derive(Debug)]
pub enum TsoError {
    Rpc(RpcError),
    /// The oracle answered but refused to issue timestamps.
    Oracle(Status),
}

impl fmt::Display for TsoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TsoError::Rpc(e) => write!(f, "timestamp oracle call failed: {e}"),
            TsoError::Oracle(status) => write!(f, "timestamp oracle rejected request: {status:?}"),
        }
    }
}

impl std::error::Error for TsoError {}

struct Batch {
    next: i64,
    end: i64,
}

/// Hands out [`Timestamp`]s that are strictly increasing for every call
/// issued through one `TsoClient`, batching oracle round trips so most
/// calls are served locally.
pub struct TsoClient {
    rpc: Arc<RpcClient>,
    oracle: Endpoint,
    batch_size: u32,
    call_deadline: Duration,
    batch: Mutex<Batch>,
}

impl TsoClient {
    pub fn new(rpc: Arc<RpcClient>, oracle: Endpoint, batch_size: u32, call_deadline: Duration) -> Arc<Self> {
        Arc::new(Self {
            rpc,
            oracle,
            batch_size: batch_size.max(1),
            call_deadline,
            batch: Mutex::new(Batch { next: 0, end: 0 }),
        })
    }

    /// Issue the next timestamp. Every caller serializes on the same batch
    /// cursor, so a refill triggered by one caller is shared by every other
    /// caller waiting behind it rather than each fetching its own batch.
    pub async fn next_timestamp(&self) -> Result<Timestamp, TsoError> {
        let mut batch = self.batch.lock().await;
        if batch.next >= batch.end {
            let request = GetTimestampBatchRequest { count: self.batch_size };
            let response = self
                .rpc
                .call(&self.oracle, &request, self.call_deadline)
                .await
                .map_err(TsoError::Rpc)?;
            if !response.status.is_2xx() {
                return Err(TsoError::Oracle(response.status));
            }
            log::debug!(
                "timestamp batch refilled: start={} count={}",
                response.start.0,
                response.count
            );
            batch.next = response.start.0;
            batch.end = response.start.0 + response.count as i64;
        }

        let issued = batch.next;
        batch.next += 1;
        Ok(Timestamp(issued))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k23si_transport::{Channel, Dispatcher, RdmaChannel};
    use k23si_wire::frame::{decode_payload, encode_payload};
    use k23si_wire::msg::GetTimestampBatchResponse;
    use k23si_wire::Metadata;

    fn make_client(batch_size: u32) -> Arc<TsoClient> {
        let dial_ep = Endpoint::from_url("rrdma+k2rpc://127.0.0.1:7000").unwrap();
        let accept_ep = Endpoint::from_url("rrdma+k2rpc://127.0.0.1:7256").unwrap();
        let (dial_side, accept_side) = RdmaChannel::pair(dial_ep.clone(), accept_ep);

        let start = std::sync::atomic::AtomicI64::new(0);
        accept_side.set_message_observer(Some(Arc::new({
            let accept_side = accept_side.clone();
            move |verb, _from, payload, metadata| {
                let request: GetTimestampBatchRequest = decode_payload(&payload).unwrap();
                let batch_start = start.fetch_add(request.count as i64, std::sync::atomic::Ordering::SeqCst);
                let response = GetTimestampBatchResponse {
                    status: Status::Ok,
                    start: Timestamp(batch_start),
                    count: request.count,
                };
                let reply_payload = encode_payload(&response).unwrap();
                let reply_metadata = Metadata { response: true, ..metadata };
                let _ = accept_side.send(verb, reply_payload, reply_metadata);
            }
        })));

        let dispatcher = Dispatcher::new();
        dispatcher.start();
        dispatcher.register_channel(dial_side).unwrap();
        let rpc = RpcClient::new(dispatcher);
        TsoClient::new(rpc, dial_ep, batch_size, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn timestamps_are_strictly_increasing() {
        let client = make_client(4);
        let mut seen = Vec::new();
        for _ in 0..10 {
            seen.push(client.next_timestamp().await.unwrap().0);
        }
        for pair in seen.windows(2) {
            assert!(pair[1] > pair[0], "timestamps must be strictly increasing: {seen:?}");
        }
    }

    #[tokio::test]
    async fn concurrent_callers_still_get_distinct_timestamps() {
        let client = make_client(8);
        let mut handles = Vec::new();
        for _ in 0..20 {
            let client = client.clone();
            handles.push(tokio::spawn(async move { client.next_timestamp().await.unwrap().0 }));
        }
        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.await.unwrap());
        }
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), 20, "every issued timestamp must be distinct");
    }
}
