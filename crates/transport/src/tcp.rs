//! A real TCP channel: length-prefixed [`Envelope`] framing over a
//! `tokio::net::TcpStream`.
//!
//! The split reader/writer task pair and the length-delimited read loop
//! follow `turn-server/src/server/transport.rs`'s `tcp_processor` and the
//! per-peer outbound queue in `turn-server/src/server/router.rs`'s `Router`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use k23si_wire::msg::Verb;
use k23si_wire::{Endpoint, Envelope, Metadata};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::channel::{Channel, ChannelError, FailureObserver, MessageObserver};
use crate::dispatcher::ChannelBuilder;

struct Outbound {
    verb: Verb,
    payload: Vec<u8>,
    metadata: Metadata,
}

pub struct TcpChannel {
    endpoint: Endpoint,
    outbound: mpsc::UnboundedSender<Outbound>,
    shutdown: Arc<Notify>,
    reader_task: JoinHandle<()>,
    message_observer: Arc<Mutex<Option<MessageObserver>>>,
    failure_observer: Arc<Mutex<Option<FailureObserver>>>,
    closed: Arc<AtomicBool>,
}

impl TcpChannel {
    /// Connect out to `endpoint` and spawn its reader/writer tasks.
    pub async fn dial(endpoint: Endpoint) -> Result<Arc<Self>, ChannelError> {
        let addr = format!("{}:{}", endpoint.host(), endpoint.port());
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| ChannelError::DialFailed(e.to_string()))?;
        Ok(Self::spawn(stream, endpoint))
    }

    /// Wrap an already-accepted stream (inbound side of a listener).
    pub fn from_accepted(stream: TcpStream, endpoint: Endpoint) -> Arc<Self> {
        Self::spawn(stream, endpoint)
    }

    fn spawn(stream: TcpStream, endpoint: Endpoint) -> Arc<Self> {
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel::<Outbound>();
        let shutdown = Arc::new(Notify::new());
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(writer_loop(write_half, rx, shutdown.clone()));

        let reader_endpoint = endpoint.clone();
        let reader_closed = closed.clone();
        let message_observer: Arc<Mutex<Option<MessageObserver>>> = Arc::new(Mutex::new(None));
        let failure_observer: Arc<Mutex<Option<FailureObserver>>> = Arc::new(Mutex::new(None));
        let reader_message_observer = message_observer.clone();
        let reader_failure_observer = failure_observer.clone();
        let reader_task = tokio::spawn(reader_loop(
            read_half,
            reader_endpoint,
            reader_closed,
            reader_message_observer,
            reader_failure_observer,
        ));

        Arc::new(Self {
            endpoint,
            outbound: tx,
            shutdown,
            reader_task,
            message_observer,
            failure_observer,
            closed,
        })
    }
}

async fn writer_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    shutdown: Arc<Notify>,
) {
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            received = rx.recv() => {
                let Some(out) = received else { break };
                let envelope = Envelope { verb: out.verb, metadata: out.metadata, payload: out.payload };
                let Ok(bytes) = envelope.encode() else { continue };
                let len = (bytes.len() as u32).to_be_bytes();
                if writer.write_all(&len).await.is_err() || writer.write_all(&bytes).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = writer.shutdown().await;
}

async fn reader_loop(
    mut reader: OwnedReadHalf,
    endpoint: Endpoint,
    closed: Arc<AtomicBool>,
    message_observer: Arc<Mutex<Option<MessageObserver>>>,
    failure_observer: Arc<Mutex<Option<FailureObserver>>>,
) {
    loop {
        let mut len_buf = [0u8; 4];
        if reader.read_exact(&mut len_buf).await.is_err() {
            break;
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        if reader.read_exact(&mut body).await.is_err() {
            break;
        }
        let Ok(envelope) = Envelope::decode(&body) else { continue };
        let observer = message_observer.lock().clone();
        if let Some(observer) = observer {
            observer(envelope.verb, endpoint.clone(), envelope.payload, envelope.metadata);
        }
    }
    if !closed.swap(true, Ordering::SeqCst) {
        let observer = failure_observer.lock().clone();
        if let Some(observer) = observer {
            observer(endpoint.clone(), Some("peer closed connection".into()));
        }
    }
}

#[async_trait]
impl Channel for TcpChannel {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn send(&self, verb: Verb, payload: Vec<u8>, metadata: Metadata) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        self.outbound
            .send(Outbound { verb, payload, metadata })
            .map_err(|_| ChannelError::Closed)
    }

    fn set_message_observer(&self, observer: Option<MessageObserver>) {
        *self.message_observer.lock() = observer;
    }

    fn set_failure_observer(&self, observer: Option<FailureObserver>) {
        *self.failure_observer.lock() = observer;
    }

    async fn graceful_close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        self.reader_task.abort();
    }
}

/// Builder registered with the dispatcher for the `tcp+k2rpc` scheme.
pub struct TcpChannelBuilder;

#[async_trait]
impl ChannelBuilder for TcpChannelBuilder {
    async fn dial(&self, endpoint: Endpoint) -> Result<Arc<dyn Channel>, ChannelError> {
        Ok(TcpChannel::dial(endpoint).await? as Arc<dyn Channel>)
    }
}
