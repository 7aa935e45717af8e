//! The plog collaborator: an append-only, eventually-sealed byte log.
//!
//! A real K23SI deployment backs its transaction record holder with plogs
//! for durable decision records; the client runtime only ever needs to
//! drive the same small verb set `PlogMock.h` exposes
//! (`create`/`getInfo`/`append`/`read`/`seal`/`drop`), so that is the
//! surface kept here — an in-memory [`MemoryPlog`] standing in for the
//! file-backed `{head|body|padding}` layout the mock and the real
//! implementation both use, with the same sealed/size-limit rejection
//! rules.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use rand::RngCore;
use tokio::sync::Mutex;

/// Fixed-width, random plog identifier. Matches `PLOG_ID_LEN` in
/// `PlogMock.h`: wide enough that two independently created plogs never
/// collide.
pub const PLOG_ID_LEN: usize = 24;

#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct PlogId([u8; PLOG_ID_LEN]);

impl PlogId {
    fn random() -> Self {
        let mut bytes = [0u8; PLOG_ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PLOG_ID_LEN] {
        &self.0
    }
}

impl fmt::Debug for PlogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlogId({})", hex(&self.0))
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Clone, Copy, Debug)]
pub struct PlogInfo {
    pub size: usize,
    pub sealed: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PlogError {
    NotFound,
    /// A sealed plog accepts no further appends.
    Sealed,
    /// The append would grow the plog past its configured maximum size.
    SizeLimitExceeded,
    /// The requested `[offset, offset + len)` region falls outside the
    /// plog's current data.
    RegionOutOfBounds,
}

impl fmt::Display for PlogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlogError::NotFound => write!(f, "no such plog"),
            PlogError::Sealed => write!(f, "plog is sealed"),
            PlogError::SizeLimitExceeded => write!(f, "append exceeds plog size limit"),
            PlogError::RegionOutOfBounds => write!(f, "requested region is out of bounds"),
        }
    }
}

impl std::error::Error for PlogError {}

/// The append-only log contract: create plogs, append to the open end,
/// read back a byte range, seal (making it immutable), drop (discard it
/// entirely).
#[async_trait]
pub trait Plog: Send + Sync {
    async fn create(&self, count: usize) -> Vec<PlogId>;
    async fn get_info(&self, id: PlogId) -> Result<PlogInfo, PlogError>;
    async fn append(&self, id: PlogId, data: Bytes) -> Result<usize, PlogError>;
    async fn read(&self, id: PlogId, offset: usize, len: usize) -> Result<Bytes, PlogError>;
    async fn seal(&self, id: PlogId) -> Result<(), PlogError>;
    async fn drop_plog(&self, id: PlogId) -> Result<(), PlogError>;
}

struct LogState {
    data: Vec<u8>,
    sealed: bool,
}

/// An in-memory [`Plog`]. Each plog is capped at `max_size` bytes, mirroring
/// the fixed-size file the mock allocates per plog (`head | body |
/// padding`) — here the whole allocation collapses to one growable buffer.
pub struct MemoryPlog {
    max_size: usize,
    logs: Mutex<HashMap<PlogId, LogState>>,
}

impl MemoryPlog {
    pub fn new(max_size: usize) -> Self {
        Self { max_size, logs: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl Plog for MemoryPlog {
    async fn create(&self, count: usize) -> Vec<PlogId> {
        let mut logs = self.logs.lock().await;
        (0..count)
            .map(|_| {
                let id = PlogId::random();
                logs.insert(id, LogState { data: Vec::new(), sealed: false });
                id
            })
            .collect()
    }

    async fn get_info(&self, id: PlogId) -> Result<PlogInfo, PlogError> {
        let logs = self.logs.lock().await;
        let state = logs.get(&id).ok_or(PlogError::NotFound)?;
        Ok(PlogInfo { size: state.data.len(), sealed: state.sealed })
    }

    async fn append(&self, id: PlogId, data: Bytes) -> Result<usize, PlogError> {
        let mut logs = self.logs.lock().await;
        let state = logs.get_mut(&id).ok_or(PlogError::NotFound)?;
        if state.sealed {
            return Err(PlogError::Sealed);
        }
        if state.data.len() + data.len() > self.max_size {
            return Err(PlogError::SizeLimitExceeded);
        }
        let offset = state.data.len();
        state.data.extend_from_slice(&data);
        Ok(offset)
    }

    async fn read(&self, id: PlogId, offset: usize, len: usize) -> Result<Bytes, PlogError> {
        let logs = self.logs.lock().await;
        let state = logs.get(&id).ok_or(PlogError::NotFound)?;
        let end = offset.checked_add(len).ok_or(PlogError::RegionOutOfBounds)?;
        if end > state.data.len() {
            return Err(PlogError::RegionOutOfBounds);
        }
        Ok(Bytes::copy_from_slice(&state.data[offset..end]))
    }

    async fn seal(&self, id: PlogId) -> Result<(), PlogError> {
        let mut logs = self.logs.lock().await;
        let state = logs.get_mut(&id).ok_or(PlogError::NotFound)?;
        state.sealed = true;
        Ok(())
    }

    async fn drop_plog(&self, id: PlogId) -> Result<(), PlogError> {
        let mut logs = self.logs.lock().await;
        logs.remove(&id).ok_or(PlogError::NotFound)?;
        Ok(())
    }
}
