//! Wire data model for the K23SI client runtime.
//!
//! This crate has no knowledge of sockets or async runtimes — it defines
//! the addressable [`endpoint::Endpoint`] identity, the [`msg`] request and
//! response shapes for every verb in spec.md section 6, the [`status::Status`]
//! taxonomy, and the [`frame::Envelope`] framing used to put a message on
//! the wire. `k23si-transport` and everything above it builds on these types.

pub mod endpoint;
pub mod error;
pub mod frame;
pub mod msg;
pub mod status;

pub use endpoint::{Endpoint, PayloadAllocator, MAX_HEADER_SIZE};
pub use error::{Error, ParseError, Result};
pub use frame::{Envelope, Metadata};
pub use msg::{HasStatus, Pvid};
pub use status::Status;
