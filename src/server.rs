use crate::chunker::frames_for_payload;
use crate::config::ServerConfig;
use crate::envelope::{Request, RequestBody, Response, ResponseBody, ResponseCode};
use crate::error::NetworkError;
use crate::frame::Frame;
use crate::handler::RequestHandler;
use crate::reassembly::{CompletedQueue, ReassemblyMap};
use crate::send_pipeline::{bind_datagram_socket, SendPipeline};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, span, trace, warn, Instrument, Level};
use uuid::Uuid;

/// A request/reply server over a datagram socket, serving requests with three
/// concurrent stages that share the socket:
///
/// * a single receiver task parses incoming frames and drives the per-peer
///   reassembly, enqueueing completed requests,
/// * the dispatcher (the task calling [`UdpServer::serve`]) pulls completed
///   requests and hands each to a handler worker,
/// * bounded pools of handler and sender workers produce and emit responses.
///
/// Per-request failures are logged and the pipeline keeps serving; `serve`
/// only fails on initialization errors.
pub struct UdpServer {
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    config: Arc<ServerConfig>,
    handler: Option<Arc<dyn RequestHandler>>,
    send_pipeline: Arc<SendPipeline>,
    reassembly: Arc<ReassemblyMap>,
    completed: Arc<CompletedQueue>,
    shutdown: Arc<Notify>,
}

impl UdpServer {
    pub async fn bind(config: ServerConfig) -> Result<UdpServer, NetworkError> {
        config.validate()?;

        let socket = Arc::new(bind_datagram_socket(config.bind_addr)?);
        let server_addr = socket.local_addr()?;
        info!("bound server socket to {:?}", server_addr);

        let send_pipeline = Arc::new(SendPipeline::new(Arc::new(socket.clone()), config.inter_frame_delay));

        Ok(UdpServer {
            socket,
            server_addr,
            config: Arc::new(config),
            handler: None,
            send_pipeline,
            reassembly: Arc::new(ReassemblyMap::new()),
            completed: Arc::new(CompletedQueue::new()),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// The actually bound address - for a config with port 0, the ephemeral
    ///  port the socket landed on.
    pub fn local_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Installs the request handler. Must happen before [`UdpServer::serve`].
    pub fn subscribe(&mut self, handler: Arc<dyn RequestHandler>) {
        self.handler = Some(handler);
    }

    /// Number of peers with a partially reassembled request, for diagnostics.
    pub async fn pending_fragments(&self) -> usize {
        self.reassembly.pending_peers().await
    }

    /// Stops [`UdpServer::serve`]: the dispatcher drains, the receiver task is
    ///  cancelled, in-flight workers run to completion.
    pub fn close(&self) {
        self.shutdown.notify_one();
    }

    /// Runs the pipeline until [`UdpServer::close`] is called.
    pub async fn serve(&self) -> Result<(), NetworkError> {
        let handler = self.handler.clone().ok_or(NetworkError::HandlerNotSet)?;

        let receiver = tokio::spawn(receive_loop(
            self.socket.clone(),
            self.server_addr,
            self.reassembly.clone(),
            self.completed.clone(),
            2 * self.config.request_buffer_size,
            self.shutdown.clone(),
        ));

        let handler_permits = Arc::new(Semaphore::new(self.config.handler_workers));
        let sender_permits = Arc::new(Semaphore::new(self.config.sender_workers));

        loop {
            select! {
                _ = self.shutdown.notified() => break,
                _ = self.completed.readable() => {
                    for (peer_addr, request) in self.completed.drain().await {
                        trace!("dispatching request from {:?}", peer_addr);

                        let permit = handler_permits.clone().acquire_owned().await
                            .expect("the handler semaphore is never closed");
                        tokio::spawn(handle_request(
                            permit,
                            request,
                            handler.clone(),
                            self.send_pipeline.clone(),
                            sender_permits.clone(),
                            self.config.clone(),
                        ));
                    }
                }
            }
        }

        debug!("shutting down server {:?}", self.server_addr);
        receiver.abort();
        Ok(())
    }
}

/// The single receiver stage: reads datagrams, parses frames, drives the
///  reassembly and enqueues completed requests. A failed socket read means the
///  socket is gone, and the whole server shuts down with it.
async fn receive_loop(
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    reassembly: Arc<ReassemblyMap>,
    completed: Arc<CompletedQueue>,
    receive_buffer_size: usize,
    shutdown: Arc<Notify>,
) {
    info!("starting receive loop on {:?}", server_addr);

    let mut buf = vec![0u8; receive_buffer_size];
    loop {
        let (num_read, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                error!("socket error: {} - closing the server", e);
                shutdown.notify_one();
                break;
            }
        };

        let correlation_id = Uuid::new_v4();
        let span = span!(Level::TRACE, "datagram_received", ?correlation_id);
        on_datagram(&buf[..num_read], from, server_addr, &reassembly, &completed)
            .instrument(span)
            .await;
    }
}

async fn on_datagram(
    datagram: &[u8],
    from: SocketAddr,
    server_addr: SocketAddr,
    reassembly: &ReassemblyMap,
    completed: &CompletedQueue,
) {
    trace!("received datagram from {:?}: {} bytes", from, datagram.len());

    let mut parse_buf = datagram;
    let frame = match Frame::deser(&mut parse_buf) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("received undecodable frame from {:?} - dropping: {}", from, e);
            return;
        }
    };

    let Some(payload) = reassembly.push(from, frame).await else {
        return;
    };

    let mut parse_buf: &[u8] = &payload;
    match Request::deser(&mut parse_buf) {
        Ok(mut request) => {
            // the datagram source is authoritative, whatever the envelope claims
            request.from = from;
            request.to = server_addr;
            completed.put(from, request).await;
        }
        Err(e) => {
            warn!("failed to decode reassembled request from {:?} - discarding: {}", from, e);
        }
    }
}

/// Handler stage: answers pings itself, runs the user handler for everything
///  else, stamps the response addresses and hands over to a sender worker.
async fn handle_request(
    _permit: OwnedSemaphorePermit,
    request: Request,
    handler: Arc<dyn RequestHandler>,
    send_pipeline: Arc<SendPipeline>,
    sender_permits: Arc<Semaphore>,
    config: Arc<ServerConfig>,
) {
    let peer_addr = request.from;
    let self_addr = request.to;

    let mut response = if matches!(request.body, RequestBody::Ping) {
        Response::reply_to(&request, ResponseCode::Succeed, ResponseBody::Pong)
    }
    else {
        match handler.handle(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("request handler failed for peer {:?} - no response is sent: {:#}", peer_addr, e);
                return;
            }
        }
    };
    response.from = self_addr;
    response.to = peer_addr;

    let permit = sender_permits.acquire_owned().await
        .expect("the sender semaphore is never closed");
    tokio::spawn(send_response(permit, response, send_pipeline, config));
}

/// Sender stage: serializes the response, fragments it if it exceeds the
///  buffer threshold and emits the frames.
async fn send_response(
    _permit: OwnedSemaphorePermit,
    response: Response,
    send_pipeline: Arc<SendPipeline>,
    config: Arc<ServerConfig>,
) {
    let mut buf = BytesMut::new();
    response.ser(&mut buf);
    let response_bytes = buf.freeze();

    let frames = if response_bytes.len() > config.response_buffer_size {
        frames_for_payload(&response_bytes, config.response_buffer_size)
    }
    else {
        vec![Frame::terminal(response_bytes)]
    };

    trace!("sending response to {:?} as {} frame(s)", response.to, frames.len());
    if let Err(e) = send_pipeline.send_frames(response.to, &frames).await {
        error!("failed to send response to {:?}: {}", response.to, e);
    }
}
