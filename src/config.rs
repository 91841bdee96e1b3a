use crate::error::NetworkError;
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for a [`crate::client::UdpClient`].
///
/// The defaults mirror the well-known constants of the protocol: an ephemeral
/// local port, a server at `127.0.0.1:8080`, a 4 KiB fragmentation threshold
/// and a 5 second liveness deadline.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// The local port to bind; `0` picks an ephemeral port.
    pub local_port: u16,
    pub server_host: String,
    pub server_port: u16,

    /// Requests whose serialized size exceeds this are fragmented, and this is
    ///  also the chunk size of the fragments. The receive allocation is twice
    ///  this value to tolerate the frame envelope overhead.
    pub request_buffer_size: usize,
    pub response_buffer_size: usize,

    /// How long the liveness probe waits for a pong before giving up.
    pub liveness_timeout: Duration,

    /// Pause between consecutive frames of a fragmented send, as coarse pacing
    ///  against burst loss. Single-frame sends are not paced.
    pub inter_frame_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            local_port: 0,
            server_host: "127.0.0.1".to_string(),
            server_port: 8080,
            request_buffer_size: 4 * 1024,
            response_buffer_size: 4 * 1024,
            liveness_timeout: Duration::from_millis(5000),
            inter_frame_delay: Duration::from_millis(10),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), NetworkError> {
        if self.request_buffer_size == 0 {
            return Err(NetworkError::InvalidConfig("request buffer size must be at least 1"));
        }
        if self.response_buffer_size == 0 {
            return Err(NetworkError::InvalidConfig("response buffer size must be at least 1"));
        }
        if self.liveness_timeout.is_zero() {
            return Err(NetworkError::InvalidConfig("liveness timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Configuration for a [`crate::server::UdpServer`].
///
/// The receive stage is a single task by construction; only the handler and
/// sender stages have configurable worker counts.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,

    /// Upper bound on concurrently running request handlers.
    pub handler_workers: usize,
    /// Upper bound on concurrently running response senders.
    pub sender_workers: usize,

    /// See [`ClientConfig::request_buffer_size`] - the same threshold, applied
    ///  to the sizes this side receives and sends.
    pub request_buffer_size: usize,
    pub response_buffer_size: usize,

    pub inter_frame_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            handler_workers: 4,
            sender_workers: 4,
            request_buffer_size: 4 * 1024,
            response_buffer_size: 4 * 1024,
            inter_frame_delay: Duration::from_millis(10),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), NetworkError> {
        if self.handler_workers == 0 {
            return Err(NetworkError::InvalidConfig("handler worker count must be at least 1"));
        }
        if self.sender_workers == 0 {
            return Err(NetworkError::InvalidConfig("sender worker count must be at least 1"));
        }
        if self.request_buffer_size == 0 {
            return Err(NetworkError::InvalidConfig("request buffer size must be at least 1"));
        }
        if self.response_buffer_size == 0 {
            return Err(NetworkError::InvalidConfig("response buffer size must be at least 1"));
        }
        Ok(())
    }
}
