use std::fmt;

/// Failure to parse an endpoint URL. Kept as a small hand-rolled enum
/// (manual `Display`, no `thiserror`) the way `turn-client::request::Error`
/// is written in the teacher crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    MissingScheme,
    MissingHost,
    MissingPort,
    PortOutOfRange,
    InvalidIPv6,
    Malformed,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingScheme => write!(f, "url is missing a scheme"),
            Self::MissingHost => write!(f, "url is missing a host"),
            Self::MissingPort => write!(f, "url is missing a port"),
            Self::PortOutOfRange => write!(f, "port is out of range"),
            Self::InvalidIPv6 => write!(f, "invalid ipv6 literal"),
            Self::Malformed => write!(f, "url does not match proto://host:port grammar"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Top-level wire-layer error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid endpoint url: {0}")]
    Parse(#[from] ParseError),

    #[error("encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
