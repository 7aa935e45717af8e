//! Transport layer for the K23SI client runtime: a protocol-pluggable
//! endpoint registry ([`dispatcher::Dispatcher`]) holding one
//! [`channel::Channel`] per remote peer, concrete TCP and simulated-RDMA
//! channel implementations, and request/response correlation
//! ([`rpc::RpcClient`]) built on top of the otherwise fire-and-forget
//! channel contract.

pub mod channel;
pub mod dispatcher;
pub mod rdma;
pub mod rpc;
pub mod tcp;

pub use channel::{Channel, ChannelError, FailureObserver, MessageObserver};
pub use dispatcher::{ChannelBuilder, Dispatcher};
pub use rdma::{accept_side_qp, RdmaChannel, UnreachableRdmaBuilder};
pub use rpc::{RpcClient, RpcError};
pub use tcp::{TcpChannel, TcpChannelBuilder};
