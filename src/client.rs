use crate::chunker::frames_for_payload;
use crate::config::ClientConfig;
use crate::envelope::{Request, RequestBody, Response, ResponseBody};
use crate::error::NetworkError;
use crate::frame::Frame;
use crate::send_pipeline::{bind_datagram_socket, SendPipeline};
use bytes::{BufMut, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// A request/reply client over a datagram socket.
///
/// Each call sends one logical request (fragmented into frames if necessary)
/// and waits for one complete logical response. Before a fragmented send the
/// client probes the server's liveness with a ping and fails fast with
/// [`NetworkError::PeerUnavailable`] if no pong arrives in time; a request
/// that fits a single frame skips the probe.
pub struct UdpClient {
    socket: Arc<UdpSocket>,
    send_pipeline: SendPipeline,
    local_addr: SocketAddr,
    server_addr: SocketAddr,
    config: ClientConfig,
}

impl UdpClient {
    pub async fn connect(config: ClientConfig) -> Result<UdpClient, NetworkError> {
        config.validate()?;

        let server_addr = lookup_host((config.server_host.as_str(), config.server_port)).await?
            .next()
            .ok_or_else(|| io::Error::new(
                io::ErrorKind::NotFound,
                format!("server host {} did not resolve", config.server_host),
            ))?;

        let socket = Arc::new(bind_datagram_socket(SocketAddr::from(([127, 0, 0, 1], config.local_port)))?);
        let local_addr = socket.local_addr()?;
        debug!("bound client socket to {:?}, server is {:?}", local_addr, server_addr);

        let send_pipeline = SendPipeline::new(Arc::new(socket.clone()), config.inter_frame_delay);

        Ok(UdpClient {
            socket,
            send_pipeline,
            local_addr,
            server_addr,
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Sends a request and waits for the complete response.
    ///
    /// NB: A client supports one in-flight call at a time; concurrent calls on
    ///      the same client interleave their frames on the shared socket.
    pub async fn request_reply(&self, body: RequestBody) -> Result<Response, NetworkError> {
        let request = Request::new(self.local_addr, self.server_addr, body);

        let mut buf = BytesMut::new();
        request.ser(&mut buf);
        let request_bytes = buf.freeze();

        if request_bytes.len() > self.config.request_buffer_size {
            // make sure somebody is listening before burst-sending the fragments
            self.probe_liveness().await?;

            let frames = frames_for_payload(&request_bytes, self.config.request_buffer_size);
            trace!("sending request to {:?} as {} frames", self.server_addr, frames.len());
            self.send_to_server(&frames).await?;
        }
        else {
            self.send_to_server(&[Frame::terminal(request_bytes)]).await?;
        }

        self.await_response().await
    }

    /// Checks that the server answers pings, failing with
    ///  [`NetworkError::PeerUnavailable`] after the configured deadline.
    pub async fn ping(&self) -> Result<(), NetworkError> {
        self.probe_liveness().await
    }

    async fn probe_liveness(&self) -> Result<(), NetworkError> {
        let ping = Request::new(self.local_addr, self.server_addr, RequestBody::Ping);
        let mut buf = BytesMut::new();
        ping.ser(&mut buf);
        self.send_to_server(&[Frame::terminal(buf.freeze())]).await?;

        let mut recv_buf = vec![0u8; 2 * self.config.response_buffer_size];
        let deadline = Instant::now() + self.config.liveness_timeout;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(self.peer_unavailable());
            }

            let (num_read, from) = match time::timeout(deadline - now, self.socket.recv_from(&mut recv_buf)).await {
                Err(_) => return Err(self.peer_unavailable()),
                Ok(received) => received?,
            };
            if from != self.server_addr {
                trace!("dropping datagram from unrelated peer {:?} while waiting for a pong", from);
                continue;
            }

            let frame = Frame::deser(&mut &recv_buf[..num_read])?;
            let mut parse_buf: &[u8] = &frame.payload;
            let response = Response::deser(&mut parse_buf)?;

            return match response.body {
                ResponseBody::Pong => Ok(()),
                _ => {
                    warn!("expected a pong from {:?}, got a regular response", from);
                    Err(self.peer_unavailable())
                }
            };
        }
    }

    /// Sends frames to the server, reporting a socket timeout as the peer
    ///  being unavailable rather than as a transport failure.
    async fn send_to_server(&self, frames: &[Frame]) -> Result<(), NetworkError> {
        match self.send_pipeline.send_frames(self.server_addr, frames).await {
            Err(NetworkError::Transport(e)) if e.kind() == io::ErrorKind::TimedOut => {
                Err(self.peer_unavailable())
            }
            other => other,
        }
    }

    /// Accumulates response frames from the server until the terminal frame
    ///  arrives, then decodes the concatenated payload.
    async fn await_response(&self) -> Result<Response, NetworkError> {
        let mut recv_buf = vec![0u8; 2 * self.config.response_buffer_size];
        let mut response_bytes = BytesMut::new();

        loop {
            let (num_read, from) = self.socket.recv_from(&mut recv_buf).await?;
            if from != self.server_addr {
                trace!("dropping datagram from unrelated peer {:?} while waiting for the response", from);
                continue;
            }

            let frame = Frame::deser(&mut &recv_buf[..num_read])?;
            response_bytes.put_slice(&frame.payload);

            if frame.last {
                let mut parse_buf: &[u8] = &response_bytes;
                return Ok(Response::deser(&mut parse_buf)?);
            }
        }
    }

    fn peer_unavailable(&self) -> NetworkError {
        NetworkError::PeerUnavailable {
            peer: self.server_addr,
            timeout: self.config.liveness_timeout,
        }
    }
}
