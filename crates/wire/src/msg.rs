//! The verbs and request/response payloads carried over the wire.
//!
//! Field shapes are taken directly from spec.md section 6 and from the
//! `dto::K23SIReadRequest` / `dto::K23SIWriteRequest` usage visible in
//! `k23si_client.h`. Structs are plain, `serde`-derived data — no behavior
//! lives here beyond the [`PartitionedRequest`] routing trait the CPO client
//! drives.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::status::Status;

/// A totally-ordered, client-monotonic transaction timestamp, as issued by
/// the timestamp oracle.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// Transaction Metadata Record: uniquely names a transaction network-wide.
/// Immutable once issued.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Mtr {
    pub txn_id: u64,
    pub timestamp: Timestamp,
    pub priority: Priority,
}

/// A comparable, opaque byte sequence routed through a collection's
/// partition map by range.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Default)]
pub struct Key(pub Bytes);

impl Key {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Key(bytes.into())
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<Vec<u8>> for Key {
    fn from(v: Vec<u8>) -> Self {
        Key(Bytes::from(v))
    }
}

/// Partition Version Id: a monotonically advancing stamp on a partition's
/// ownership. A mismatch between client-stamped PVID and server PVID drives
/// a routing refresh.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Default)]
pub struct Pvid(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Verb {
    K23siRead,
    K23siWrite,
    K23siTxnHeartbeat,
    K23siTxnEnd,
    GetPartitionMap,
    CreateCollection,
    GetTimestampBatch,
}

/// Every response carries a [`Status`] the CPO client inspects to decide
/// whether to retry, refresh routing, or hand the result back as-is.
pub trait HasStatus {
    fn status(&self) -> &Status;
}

/// A request that the CPO client can route to a partition: it names its
/// collection, optionally carries a routing key, and may accept a PVID
/// stamp (spec.md section 4.4 steps 1-2).
pub trait PartitionedRequest: Serialize + Clone + Send + Sync + 'static {
    type Response: for<'de> Deserialize<'de> + HasStatus + Send + Sync + 'static;
    const VERB: Verb;

    fn collection(&self) -> &str;
    fn routing_key(&self) -> Option<&Key>;

    /// Stamp the request with the partition's version id. A no-op for verbs
    /// whose wire shape (spec.md section 6) carries no PVID field.
    fn set_pvid(&mut self, _pvid: Pvid) {}
}

// ---- K23SI_READ ----

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReadRequest {
    pub pvid: Pvid,
    pub collection: String,
    pub mtr: Mtr,
    pub key: Key,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReadResponse {
    pub status: Status,
    pub value: Option<Bytes>,
}

impl HasStatus for ReadResponse {
    fn status(&self) -> &Status {
        &self.status
    }
}

impl PartitionedRequest for ReadRequest {
    type Response = ReadResponse;
    const VERB: Verb = Verb::K23siRead;

    fn collection(&self) -> &str {
        &self.collection
    }
    fn routing_key(&self) -> Option<&Key> {
        Some(&self.key)
    }
    fn set_pvid(&mut self, pvid: Pvid) {
        self.pvid = pvid;
    }
}

// ---- K23SI_WRITE ----

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WriteRequest {
    pub pvid: Pvid,
    pub collection: String,
    pub mtr: Mtr,
    pub trh_key: Key,
    pub erase: bool,
    pub is_first: bool,
    pub key: Key,
    pub value: Bytes,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WriteResponse {
    pub status: Status,
}

impl HasStatus for WriteResponse {
    fn status(&self) -> &Status {
        &self.status
    }
}

impl PartitionedRequest for WriteRequest {
    type Response = WriteResponse;
    const VERB: Verb = Verb::K23siWrite;

    fn collection(&self) -> &str {
        &self.collection
    }
    fn routing_key(&self) -> Option<&Key> {
        Some(&self.key)
    }
    fn set_pvid(&mut self, pvid: Pvid) {
        self.pvid = pvid;
    }
}

// ---- K23SI_TXN_HEARTBEAT ----

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub collection: String,
    pub mtr: Mtr,
    pub trh_key: Key,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub status: Status,
}

impl HasStatus for HeartbeatResponse {
    fn status(&self) -> &Status {
        &self.status
    }
}

impl PartitionedRequest for HeartbeatRequest {
    type Response = HeartbeatResponse;
    const VERB: Verb = Verb::K23siTxnHeartbeat;

    fn collection(&self) -> &str {
        &self.collection
    }
    fn routing_key(&self) -> Option<&Key> {
        Some(&self.trh_key)
    }
}

// ---- K23SI_TXN_END ----

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndRequest {
    pub collection: String,
    pub mtr: Mtr,
    pub trh_key: Key,
    pub should_commit: bool,
    pub participants: Vec<Key>,
    pub sync_finalize: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndResponse {
    pub status: Status,
}

impl HasStatus for EndResponse {
    fn status(&self) -> &Status {
        &self.status
    }
}

impl PartitionedRequest for EndRequest {
    type Response = EndResponse;
    const VERB: Verb = Verb::K23siTxnEnd;

    fn collection(&self) -> &str {
        &self.collection
    }
    fn routing_key(&self) -> Option<&Key> {
        Some(&self.trh_key)
    }
}

// ---- Oracle verbs ----

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionAssignment {
    pub start_key: Key,
    pub end_key: Option<Key>,
    pub endpoint_url: String,
    pub pvid: Pvid,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollectionMetadata {
    pub heartbeat_deadline: Duration,
    pub retention_window: Duration,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionMap {
    pub metadata: CollectionMetadata,
    pub assignments: Vec<PartitionAssignment>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetPartitionMapRequest {
    pub collection: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetPartitionMapResponse {
    pub status: Status,
    pub partition_map: Option<PartitionMap>,
}

impl HasStatus for GetPartitionMapResponse {
    fn status(&self) -> &Status {
        &self.status
    }
}

impl PartitionedRequest for GetPartitionMapRequest {
    type Response = GetPartitionMapResponse;
    const VERB: Verb = Verb::GetPartitionMap;

    fn collection(&self) -> &str {
        &self.collection
    }
    fn routing_key(&self) -> Option<&Key> {
        None
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateCollectionRequest {
    pub collection: String,
    pub retention_window: Duration,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateCollectionResponse {
    pub status: Status,
    pub partition_map: Option<PartitionMap>,
}

impl HasStatus for CreateCollectionResponse {
    fn status(&self) -> &Status {
        &self.status
    }
}

impl PartitionedRequest for CreateCollectionRequest {
    type Response = CreateCollectionResponse;
    const VERB: Verb = Verb::CreateCollection;

    fn collection(&self) -> &str {
        &self.collection
    }
    fn routing_key(&self) -> Option<&Key> {
        None
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetTimestampBatchRequest {
    pub count: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetTimestampBatchResponse {
    pub status: Status,
    pub start: Timestamp,
    pub count: u32,
}

impl HasStatus for GetTimestampBatchResponse {
    fn status(&self) -> &Status {
        &self.status
    }
}

impl PartitionedRequest for GetTimestampBatchRequest {
    type Response = GetTimestampBatchResponse;
    const VERB: Verb = Verb::GetTimestampBatch;

    fn collection(&self) -> &str {
        ""
    }
    fn routing_key(&self) -> Option<&Key> {
        None
    }
}
