//! Client facade: the single entry point application code holds. Wires up
//! the protocol dispatcher, the CPO client, and the timestamp client, then
//! hands out [`TxnHandle`]s and aggregates the counters they report into.
//!
//! Grounded on `turn_server::server_main`'s role in `turn-server/src/lib.rs`
//! — one function that builds every long-lived collaborator from a `Config`
//! and wires them together — generalized from a server bootstrap to a
//! client one.

pub mod config;
pub mod metrics;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use k23si_cpo::{CpoClient, CpoError};
use k23si_transport::{Dispatcher, RpcClient, TcpChannelBuilder, UnreachableRdmaBuilder};
use k23si_tso::{TsoClient, TsoError};
use k23si_txn::{TxnHandle, TxnOptions};
use k23si_wire::msg::{Mtr, Priority};
use k23si_wire::Endpoint;

pub use config::ClientConfig;
pub use metrics::{Counters, CountersSnapshot};
pub use k23si_txn::TxnError;

const TCP_SCHEME: &str = "tcp+k2rpc";
const RDMA_SCHEME: &str = "rrdma+k2rpc";

#[derive(Debug)]
pub enum ClientError {
    InvalidOracleUrl(k23si_wire::ParseError),
    Cpo(CpoError),
    Tso(TsoError),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::InvalidOracleUrl(e) => write!(f, "invalid cpo url: {e}"),
            ClientError::Cpo(e) => write!(f, "{e}"),
            ClientError::Tso(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ClientError {}

/// The client facade. Owns the dispatcher, the CPO client, the timestamp
/// client, and the counters every handle it creates reports into.
pub struct K23siClient {
    dispatcher: Arc<Dispatcher>,
    cpo: Arc<CpoClient>,
    tso: Arc<TsoClient>,
    config: ClientConfig,
    counters: Arc<Counters>,
    next_txn_id: AtomicU64,
}

impl K23siClient {
    /// Build a client against `config`. Registers channel builders for both
    /// known schemes (spec.md section 6): `tcp+k2rpc` can dial for real;
    /// `rrdma+k2rpc` has no fabric to dial into in this environment, so its
    /// builder always fails to dial (see [`UnreachableRdmaBuilder`]) — an
    /// RDMA peer must instead be wired in directly via
    /// `k23si_transport::RdmaChannel::pair` and registered with
    /// [`Dispatcher::register_channel`].
    pub fn new(config: ClientConfig) -> Result<Arc<Self>, ClientError> {
        let oracle = Endpoint::from_url(&config.cpo).map_err(ClientError::InvalidOracleUrl)?;

        let dispatcher = Dispatcher::new();
        dispatcher.register_protocol(TCP_SCHEME, Arc::new(TcpChannelBuilder));
        dispatcher.register_protocol(RDMA_SCHEME, Arc::new(UnreachableRdmaBuilder));
        dispatcher.start();

        let rpc = RpcClient::new(dispatcher.clone());
        let cpo = CpoClient::new(
            rpc.clone(),
            oracle.clone(),
            config.create_collection_deadline,
            config.max_routing_retries,
        );
        let tso = TsoClient::new(rpc, oracle, config.timestamp_batch_size, config.create_collection_deadline);

        Ok(Arc::new(Self {
            dispatcher,
            cpo,
            tso,
            config,
            counters: Arc::new(Counters::default()),
            next_txn_id: AtomicU64::new(1),
        }))
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    /// Create a named collection against the placement oracle.
    pub async fn create_collection(&self, name: &str) -> Result<(), ClientError> {
        self.cpo
            .create_collection(name, self.config.retention_window)
            .await
            .map(|_| ())
            .map_err(ClientError::Cpo)
    }

    /// Obtain an MTR from the timestamp client and open a fresh handle in
    /// `Active` state (spec.md section 4.6: construction places the handle
    /// directly into `Active` with an empty write set).
    pub async fn begin_transaction(self: &Arc<Self>, priority: Priority) -> Result<Arc<TxnHandle>, ClientError> {
        self.begin_transaction_with_options(TxnOptions { priority, ..TxnOptions::default() }).await
    }

    pub async fn begin_transaction_with_options(
        self: &Arc<Self>,
        options: TxnOptions,
    ) -> Result<Arc<TxnHandle>, ClientError> {
        let timestamp = self.tso.next_timestamp().await.map_err(ClientError::Tso)?;
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::Relaxed);
        let mtr = Mtr { txn_id, timestamp, priority: options.priority };
        Ok(TxnHandle::begin(mtr, self.cpo.clone(), options, self.counters.clone()))
    }

    /// Stop accepting new channel activity and gracefully close every open
    /// channel. Mirrors `Dispatcher::stop`'s role as the shard-wide
    /// cancellation primitive (spec.md section 5).
    pub async fn shutdown(&self) {
        self.dispatcher.stop().await;
    }
}
