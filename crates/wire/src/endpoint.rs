//! Endpoint identity and URL grammar.
//!
//! Ported from `TXEndpoint::fromURL`/`TXEndpoint::TXEndpoint`
//! (`examples/original_source/src/k2/transport/TXEndpoint.cpp`): a hand
//! parse of `proto://host:port` / `proto://[host]:port`, host canonicalized,
//! hash and equality derived from the canonical URL string.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use bytes::BytesMut;

use crate::error::ParseError;

/// Bytes reserved at the front of every outbound payload so the transport
/// can back-fill a frame header without copying. Mirrors
/// `txconstants::MAX_HEADER_SIZE` used by `TXEndpoint::newPayload`.
pub const MAX_HEADER_SIZE: usize = 32;

/// Produces a send buffer pre-skipped by [`MAX_HEADER_SIZE`]. Endpoints that
/// only ever receive (never originate sends) carry no allocator.
pub type PayloadAllocator = Arc<dyn Fn(usize) -> BytesMut + Send + Sync>;

/// Canonical, addressable identity of a remote (or local listening) peer.
///
/// Two endpoints are equal, and hash identically, iff their canonical URLs
/// are byte-equal — this is the invariant the dispatcher's endpoint→channel
/// map relies on.
#[derive(Clone)]
pub struct Endpoint {
    protocol: String,
    host: String,
    port: u32,
    url: String,
    hash: u64,
    allocator: Option<PayloadAllocator>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url)
            .field("can_allocate", &self.allocator.is_some())
            .finish()
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}
impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

impl Ord for Endpoint {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.url.cmp(&other.url)
    }
}
impl PartialOrd for Endpoint {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Endpoint {
    /// Parse `proto://host:port` (IPv4) or `proto://[host]:port` (IPv6).
    ///
    /// Port must fit a 32-bit unsigned value (spec.md section 4.1: `port ∈
    /// [0, 2^32)`), though in practice every real transport below this
    /// truncates to 16 bits on the wire — the runtime itself places no
    /// tighter bound, matching the original `TXEndpoint::fromURL`, which
    /// only rejects negative or `> u32::MAX` values.
    pub fn from_url(url: &str) -> Result<Self, ParseError> {
        Self::from_url_with_allocator(url, None)
    }

    pub fn from_url_with_allocator(
        url: &str,
        allocator: Option<PayloadAllocator>,
    ) -> Result<Self, ParseError> {
        let scheme_split = url.find("://").ok_or(ParseError::Malformed)?;
        let (protocol, rest) = url.split_at(scheme_split);
        let rest = &rest[3..];
        if protocol.is_empty() {
            return Err(ParseError::MissingScheme);
        }

        let (host, port_str, is_ipv6) = if let Some(host_end) = rest.strip_prefix('[') {
            let close = host_end.find(']').ok_or(ParseError::Malformed)?;
            let host = &host_end[..close];
            let after = &host_end[close + 1..];
            let port_str = after.strip_prefix(':').ok_or(ParseError::MissingPort)?;
            (host.to_string(), port_str, true)
        } else {
            let colon = rest.rfind(':').ok_or(ParseError::MissingPort)?;
            let host = &rest[..colon];
            let port_str = &rest[colon + 1..];
            (host.to_string(), port_str, false)
        };

        if host.is_empty() {
            return Err(ParseError::MissingHost);
        }
        if port_str.is_empty() {
            return Err(ParseError::MissingPort);
        }

        let port: u64 = port_str.parse().map_err(|_| ParseError::Malformed)?;
        if port > u32::MAX as u64 {
            return Err(ParseError::PortOutOfRange);
        }
        let port = port as u32;

        let canonical_host = if is_ipv6 {
            host.parse::<Ipv6Addr>()
                .map_err(|_| ParseError::InvalidIPv6)?
                .to_string()
        } else {
            // IPv4 literals and hostnames alike are lowercased; a valid IPv4
            // literal is re-emitted via its canonical Display form.
            match host.parse::<Ipv4Addr>() {
                Ok(v4) => v4.to_string(),
                Err(_) => host.to_lowercase(),
            }
        };

        Ok(Self::new(protocol.to_string(), canonical_host, port, allocator))
    }

    fn new(protocol: String, host: String, port: u32, allocator: Option<PayloadAllocator>) -> Self {
        let is_ipv6 = host.contains(':');
        let url = if is_ipv6 {
            format!("{protocol}://[{host}]:{port}")
        } else {
            format!("{protocol}://{host}:{port}")
        };
        let hash = {
            use std::collections::hash_map::DefaultHasher;
            let mut hasher = DefaultHasher::new();
            url.hash(&mut hasher);
            hasher.finish()
        };

        Self {
            protocol,
            host,
            port,
            url,
            hash,
            allocator,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u32 {
        self.port
    }

    pub fn hash_value(&self) -> u64 {
        self.hash
    }

    pub fn can_allocate(&self) -> bool {
        self.allocator.is_some()
    }

    /// Allocate a send buffer pre-skipped by [`MAX_HEADER_SIZE`] so the
    /// transport can back-fill a frame header without copying.
    pub fn new_payload(&self) -> Option<BytesMut> {
        let allocator = self.allocator.as_ref()?;
        let mut buf = allocator(MAX_HEADER_SIZE + 256);
        buf.resize(MAX_HEADER_SIZE, 0);
        Some(buf)
    }

    pub fn with_allocator(mut self, allocator: PayloadAllocator) -> Self {
        self.allocator = Some(allocator);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipv4() {
        let ep = Endpoint::from_url("tcp+k2rpc://1.2.3.4:12345").unwrap();
        assert_eq!(ep.url(), "tcp+k2rpc://1.2.3.4:12345");
        assert_eq!(ep.protocol(), "tcp+k2rpc");
        assert_eq!(ep.port(), 12345);
    }

    #[test]
    fn parses_ipv6_and_canonicalizes() {
        let ep = Endpoint::from_url("rrdma+k2rpc://[ABCD:0000:0000:0000:0000:0000:AABC:0023]:1234").unwrap();
        assert_eq!(ep.url(), "rrdma+k2rpc://[abcd::aabc:23]:1234");
    }

    #[test]
    fn round_trip_is_idempotent() {
        let url = "tcp+k2rpc://10.0.0.1:80";
        let first = Endpoint::from_url(url).unwrap();
        let second = Endpoint::from_url(first.url()).unwrap();
        assert_eq!(first.url(), second.url());
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_missing_scheme() {
        assert_eq!(Endpoint::from_url("1.2.3.4:80").unwrap_err(), ParseError::Malformed);
    }

    #[test]
    fn rejects_missing_port() {
        assert_eq!(
            Endpoint::from_url("tcp+k2rpc://1.2.3.4").unwrap_err(),
            ParseError::MissingPort
        );
    }

    #[test]
    fn rejects_port_out_of_range() {
        assert_eq!(
            Endpoint::from_url("tcp+k2rpc://1.2.3.4:99999999999").unwrap_err(),
            ParseError::PortOutOfRange
        );
    }

    #[test]
    fn rejects_invalid_ipv6() {
        assert_eq!(
            Endpoint::from_url("tcp+k2rpc://[not-an-ipv6]:80").unwrap_err(),
            ParseError::InvalidIPv6
        );
    }

    #[test]
    fn equality_is_url_equality() {
        let a = Endpoint::from_url("tcp+k2rpc://1.2.3.4:80").unwrap();
        let b = Endpoint::from_url("tcp+k2rpc://1.2.3.4:80").unwrap();
        assert_eq!(a, b);

        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn new_payload_is_header_skipped() {
        let ep = Endpoint::from_url_with_allocator(
            "tcp+k2rpc://1.2.3.4:80",
            Some(Arc::new(|cap| BytesMut::with_capacity(cap))),
        )
        .unwrap();
        assert!(ep.can_allocate());
        let payload = ep.new_payload().unwrap();
        assert_eq!(payload.len(), MAX_HEADER_SIZE);
    }
}
