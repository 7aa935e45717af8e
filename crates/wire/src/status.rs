use serde::{Deserialize, Serialize};

/// Every status code named in the spec's error taxonomy (input errors,
/// transient routing errors, transport errors, transaction errors) plus the
/// ordinary success codes. Travels on the wire as part of every response.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// 2xx: request succeeded.
    Ok,
    /// 2xx: resource created (e.g. `CreateCollection`).
    Created,
    /// 4xx: application-level rejection, not a routing or transport fault.
    BadRequest(String),
    /// 4xx: the key does not exist in the collection.
    KeyNotFound,

    /// Transient routing error: the cached partition map is stale.
    StalePartitionMap,
    /// Transient routing error: no partition owns this key in the cached map.
    UnknownPartition,
    /// Transient routing error: the contacted partition no longer owns the key.
    NotOwnerOfPartition,

    /// Transport error: the channel to the endpoint failed or was closed.
    ChannelClosed,
    /// Transport error: dialing the endpoint failed.
    DialFailed,
    /// Transport error: no response arrived before the per-attempt deadline.
    Timeout,
    /// The request's overall deadline elapsed before it could complete.
    DeadlineExceeded,

    /// Transaction error: a newer transaction has already claimed this key.
    AbortConflict,
    /// Transaction error: this transaction's timestamp is too old to be
    /// admitted (it would violate the retention/watermark window).
    AbortRequestTooOld,
    /// Transaction error: the TRH has no record of this transaction.
    TransactionNotFound,
    /// Transaction error: the transaction was already aborted server-side.
    Aborted,

    /// Input error: an operation was issued before `begin` or after `end`.
    InvalidUseOfHandle,
    /// Input error: a URL failed to parse as an endpoint.
    InvalidUrl,
    /// Fatal, non-recoverable contract violation (e.g. `end` called twice).
    ContractViolation(String),
}

impl Status {
    /// True for the two success codes. Values accompanying any other status
    /// are undefined and must not be consulted (spec.md section 7).
    pub fn is_2xx(&self) -> bool {
        matches!(self, Status::Ok | Status::Created)
    }

    /// Routing errors the CPO client recovers from locally by refreshing the
    /// partition map and retrying, without surfacing anything to the caller.
    pub fn is_retriable_routing_error(&self) -> bool {
        matches!(
            self,
            Status::StalePartitionMap | Status::UnknownPartition | Status::NotOwnerOfPartition
        )
    }

    /// Transport-level failures the CPO client may retry once against the
    /// same partition before surfacing.
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Status::ChannelClosed | Status::DialFailed | Status::Timeout)
    }

    /// Statuses that move a transaction handle from `Active` to `Failed`,
    /// whether observed on a read, a write, or a heartbeat response.
    pub fn drives_txn_to_failed(&self) -> bool {
        matches!(
            self,
            Status::AbortConflict
                | Status::AbortRequestTooOld
                | Status::TransactionNotFound
                | Status::Aborted
        )
    }
}
