use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// The error kinds surfaced by this crate.
///
/// A client call fails with exactly one of these; the server logs per-request
/// failures and keeps serving, so the only errors `serve` itself returns are
/// the fatal initialization ones.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Malformed data on encode or decode.
    #[error("codec failure: {0}")]
    Codec(#[from] CodecError),

    /// Unrecoverable socket I/O error.
    #[error("datagram transport failure: {0}")]
    Transport(#[from] io::Error),

    /// The peer did not answer the liveness probe within the deadline.
    #[error("peer {peer} did not answer within {timeout:?}")]
    PeerUnavailable { peer: SocketAddr, timeout: Duration },

    /// `serve` was called before a request handler was subscribed.
    #[error("no request handler is subscribed")]
    HandlerNotSet,

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Decode failures of the wire codec. Encoding is infallible.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("buffer exhausted while decoding {0}")]
    BufferExhausted(&'static str),

    #[error("unknown {what} discriminant {value}")]
    UnknownDiscriminant { what: &'static str, value: u8 },

    #[error("frame payload must not be empty")]
    EmptyFramePayload,

    #[error("{0} trailing byte(s) after a complete value")]
    TrailingBytes(usize),
}
