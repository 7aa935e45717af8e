//! The transaction handle: the single object an application holds for the
//! lifetime of one snapshot-isolated transaction.
//!
//! State machine, TRH freezing, and heartbeat arming are ported from
//! `K2TxnHandle` in `k23si_client.h` — `read`/`write` checking `_started`/
//! `_failed` before doing anything, `write` freezing `_trh_key`/
//! `_trh_collection` off the first key in the write set and marking
//! `is_first` on the wire request, and a 2xx write arming a heartbeat timer
//! at `heartbeatDeadline / 2` the first time (never again afterward). Unlike
//! the original, reads and writes here carry a concrete `Bytes` payload
//! rather than being templated on a caller-supplied `ValueType`: the wire
//! layer already fixes the encoded shape of a value before it reaches the
//! transport, so a generic value type on top would just relocate the
//! encode/decode step the caller can do itself.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use k23si_cpo::{CpoClient, CpoError};
use k23si_wire::msg::{EndRequest, HeartbeatRequest, Key, Mtr, Priority, ReadRequest, WriteRequest};
use k23si_wire::{Pvid, Status};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum TxnError {
    Cpo(CpoError),
    /// A response carried a non-2xx status that doesn't fail the
    /// transaction outright (e.g. a caller-visible `BadRequest`).
    Status(Status),
    /// An operation was issued against a handle in a state that forbids it.
    ContractViolation(String),
    /// The transaction's overall deadline elapsed.
    DeadlineExceeded,
}

impl fmt::Display for TxnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxnError::Cpo(e) => write!(f, "{e}"),
            TxnError::Status(status) => write!(f, "request failed: {status:?}"),
            TxnError::ContractViolation(reason) => write!(f, "contract violation: {reason}"),
            TxnError::DeadlineExceeded => write!(f, "transaction deadline exceeded"),
        }
    }
}

impl std::error::Error for TxnError {}

/// Counters a transaction handle reports into as it runs. Borrowed, not
/// owned: the client facade above this crate implements it against its own
/// `AtomicU64` fields (spec.md's design notes call for counters to live on
/// the facade, not be threaded through every collaborator by value).
pub trait CounterSink: Send + Sync {
    fn inc_read_ops(&self) {}
    fn inc_write_ops(&self) {}
    fn inc_total_txns(&self) {}
    fn inc_successful_txns(&self) {}
    fn inc_abort_conflicts(&self) {}
    fn inc_abort_too_old(&self) {}
    fn inc_heartbeats(&self) {}
}

/// A no-op sink for callers (and tests) that don't care about counters.
pub struct NullCounterSink;
impl CounterSink for NullCounterSink {}

#[derive(Clone, Debug)]
pub struct TxnOptions {
    pub deadline: Duration,
    pub priority: Priority,
    pub sync_finalize: bool,
}

impl Default for TxnOptions {
    fn default() -> Self {
        Self { deadline: Duration::from_secs(1), priority: Priority::Medium, sync_finalize: false }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Active,
    Ended,
    Failed,
}

struct HeartbeatState {
    task: JoinHandle<()>,
}

/// The live handle to one in-flight transaction.
pub struct TxnHandle {
    mtr: Mtr,
    cpo: Arc<CpoClient>,
    options: TxnOptions,
    deadline_at: Instant,
    state: Mutex<State>,
    trh: Mutex<Option<(String, Key)>>,
    participants: Mutex<Vec<Key>>,
    heartbeat: Mutex<Option<HeartbeatState>>,
    counters: Arc<dyn CounterSink>,
}

impl TxnHandle {
    pub fn begin(mtr: Mtr, cpo: Arc<CpoClient>, options: TxnOptions, counters: Arc<dyn CounterSink>) -> Arc<Self> {
        counters.inc_total_txns();
        let deadline_at = Instant::now() + options.deadline;
        Arc::new(Self {
            mtr,
            cpo,
            options,
            deadline_at,
            state: Mutex::new(State::Active),
            trh: Mutex::new(None),
            participants: Mutex::new(Vec::new()),
            heartbeat: Mutex::new(None),
            counters,
        })
    }

    pub fn mtr(&self) -> Mtr {
        self.mtr
    }

    pub async fn read(&self, collection: &str, key: Key) -> Result<Option<Bytes>, TxnError> {
        self.enter_op().await?;
        self.counters.inc_read_ops();

        let request = ReadRequest { pvid: Pvid(0), collection: collection.to_string(), mtr: self.mtr, key };
        let response = self.cpo.partition_request(request).await.map_err(TxnError::Cpo)?;
        self.settle_status(response.status.clone()).await?;
        Ok(response.value)
    }

    pub async fn write(self: &Arc<Self>, collection: &str, key: Key, value: Bytes, erase: bool) -> Result<(), TxnError> {
        self.enter_op().await?;
        self.counters.inc_write_ops();

        let (trh_collection, trh_key, is_first) = {
            let mut trh = self.trh.lock().await;
            match trh.clone() {
                Some((collection, key)) => (collection, key, false),
                None => {
                    *trh = Some((collection.to_string(), key.clone()));
                    (collection.to_string(), key.clone(), true)
                }
            }
        };
        self.participants.lock().await.push(key.clone());

        let request = WriteRequest {
            pvid: Pvid(0),
            collection: collection.to_string(),
            mtr: self.mtr,
            trh_key,
            erase,
            is_first,
            key,
            value,
        };
        let response = self.cpo.partition_request(request).await.map_err(TxnError::Cpo)?;
        let status = response.status.clone();
        self.settle_status(status.clone()).await?;
        if status.is_2xx() {
            self.arm_heartbeat_if_needed(trh_collection).await;
        }
        Ok(())
    }

    pub async fn end(self: &Arc<Self>, should_commit: bool) -> Result<(), TxnError> {
        let should_commit = {
            let state = self.state.lock().await;
            match *state {
                State::Ended => return Err(TxnError::ContractViolation("end called twice".into())),
                // A failed handle can still be ended, but never committed:
                // force an abort on the wire regardless of what was asked.
                State::Failed => false,
                _ => should_commit,
            }
        };
        self.stop_heartbeat().await;

        let trh = self.trh.lock().await.clone();
        let Some((trh_collection, trh_key)) = trh else {
            // Read-only transaction: no TRH was ever assigned, so there is
            // nothing durable server-side to finalize.
            *self.state.lock().await = State::Ended;
            if should_commit {
                self.counters.inc_successful_txns();
            }
            return Ok(());
        };

        let participants = self.participants.lock().await.clone();
        let request = EndRequest {
            collection: trh_collection,
            mtr: self.mtr,
            trh_key,
            should_commit,
            participants,
            sync_finalize: self.options.sync_finalize,
        };
        let response = self.cpo.partition_request(request).await.map_err(TxnError::Cpo)?;
        if response.status.is_2xx() {
            *self.state.lock().await = State::Ended;
            if should_commit {
                self.counters.inc_successful_txns();
            }
            Ok(())
        } else {
            *self.state.lock().await = State::Failed;
            Err(TxnError::Status(response.status))
        }
    }

    async fn enter_op(&self) -> Result<(), TxnError> {
        let mut state = self.state.lock().await;
        match *state {
            State::Failed => Err(TxnError::ContractViolation("transaction already failed".into())),
            State::Ended => Err(TxnError::ContractViolation("transaction already ended".into())),
            State::Active => {
                if Instant::now() >= self.deadline_at {
                    *state = State::Failed;
                    Err(TxnError::DeadlineExceeded)
                } else {
                    Ok(())
                }
            }
        }
    }

    async fn settle_status(&self, status: Status) -> Result<(), TxnError> {
        if status.drives_txn_to_failed() {
            *self.state.lock().await = State::Failed;
            self.stop_heartbeat().await;
            match status {
                Status::AbortConflict => self.counters.inc_abort_conflicts(),
                Status::AbortRequestTooOld => self.counters.inc_abort_too_old(),
                _ => {}
            }
            return Err(TxnError::Status(status));
        }
        if !status.is_2xx() {
            return Err(TxnError::Status(status));
        }
        Ok(())
    }

    /// Arm the heartbeat timer the first time a write succeeds, never
    /// again after. The interval is half the owning collection's
    /// heartbeat deadline, matching `heartbeatDeadline / 2` in
    /// `k23si_client.h`.
    async fn arm_heartbeat_if_needed(self: &Arc<Self>, trh_collection: String) {
        let mut heartbeat = self.heartbeat.lock().await;
        if heartbeat.is_some() {
            return;
        }
        let entry = match self.cpo.get_partition_map(&trh_collection).await {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("could not learn heartbeat deadline for {trh_collection}, heartbeat stays unarmed: {e}");
                return;
            }
        };
        let interval = (entry.metadata.heartbeat_deadline / 2).max(Duration::from_millis(1));
        let this = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                if this.send_heartbeat().await.is_err() {
                    break;
                }
            }
        });
        *heartbeat = Some(HeartbeatState { task });
    }

    async fn send_heartbeat(&self) -> Result<(), TxnError> {
        let trh = self.trh.lock().await.clone();
        let Some((collection, trh_key)) = trh else { return Ok(()) };
        let request = HeartbeatRequest { collection, mtr: self.mtr, trh_key };
        let response = self.cpo.partition_request(request).await.map_err(TxnError::Cpo)?;
        self.counters.inc_heartbeats();
        self.settle_status(response.status).await
    }

    async fn stop_heartbeat(&self) {
        if let Some(heartbeat) = self.heartbeat.lock().await.take() {
            heartbeat.task.abort();
        }
    }
}

impl Drop for TxnHandle {
    fn drop(&mut self) {
        if let Ok(mut heartbeat) = self.heartbeat.try_lock() {
            if let Some(heartbeat) = heartbeat.take() {
                heartbeat.task.abort();
            }
        }
    }
}
