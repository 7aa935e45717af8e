//! The transport channel contract: a connection-oriented, ordered byte pipe
//! between this client and one remote endpoint.
//!
//! Grounded on `RRDMARPCProtocol.cpp`'s `TCPRPCChannel`/RDMA channel duality
//! (one `send`, one message observer, one failure observer invoked at most
//! once, an async `gracefulClose`) and on the object-safe `Arc<dyn Trait>`
//! style `mycrl-turn-rs`'s `rpc`/`driver` crates use `async-trait` for.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use k23si_wire::msg::Verb;
use k23si_wire::{Endpoint, Metadata};

/// Reasons a channel can refuse or lose a send. None of these are retried by
/// the channel itself — spec.md section 4.3 leaves retry policy to the
/// dispatcher's caller (the CPO client, section 4.4).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChannelError {
    /// The channel's peer connection has already been torn down.
    Closed,
    /// The dispatcher that owns this channel has been stopped.
    Stopped,
    /// Establishing the underlying connection failed.
    DialFailed(String),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Closed => write!(f, "channel is closed"),
            ChannelError::Stopped => write!(f, "dispatcher is stopped"),
            ChannelError::DialFailed(reason) => write!(f, "dial failed: {reason}"),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Invoked once per inbound message, with the verb, the sending peer's
/// endpoint, the decoded payload bytes, and metadata (including any
/// correlation id the caller stamped on the matching request).
pub type MessageObserver = Arc<dyn Fn(Verb, Endpoint, Vec<u8>, Metadata) + Send + Sync>;

/// Invoked at most once, when a channel observes its connection fail.
/// `None` means the channel was closed gracefully rather than failing.
pub type FailureObserver = Arc<dyn Fn(Endpoint, Option<String>) + Send + Sync>;

/// A single ordered, connection-oriented pipe to one remote peer.
///
/// Implementations own exactly one underlying connection; the dispatcher
/// (`Dispatcher`) is the only thing that creates or drops them, and holds at
/// most one live channel per [`Endpoint`] at a time.
#[async_trait]
pub trait Channel: Send + Sync {
    /// The peer this channel is connected to.
    fn endpoint(&self) -> &Endpoint;

    /// Fire-and-forget send. Returns as soon as the message is handed to the
    /// channel's outbound path, not once it reaches the peer.
    fn send(&self, verb: Verb, payload: Vec<u8>, metadata: Metadata) -> Result<(), ChannelError>;

    /// Replace the channel's message observer. `None` detaches it.
    fn set_message_observer(&self, observer: Option<MessageObserver>);

    /// Replace the channel's failure observer. `None` detaches it.
    fn set_failure_observer(&self, observer: Option<FailureObserver>);

    /// Flush what can be flushed and close the underlying connection. Never
    /// fires the failure observer for a close initiated this way.
    async fn graceful_close(&self);
}

impl fmt::Debug for dyn Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").field("endpoint", self.endpoint()).finish()
    }
}
