use crate::error::NetworkError;
use crate::frame::Frame;
use async_trait::async_trait;
use bytes::BytesMut;
#[cfg(test)] use mockall::automock;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time;
use tracing::trace;

/// Binds a non-blocking datagram socket with address reuse (and port reuse
///  where the platform supports it) enabled, the way both endpoints bind
///  their sockets.
pub(crate) fn bind_datagram_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;

    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

/// This is an abstraction for sending a datagram on a UDP socket, introduced
///  to facilitate mocking the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    async fn send_packet(&self, to: SocketAddr, packet_buf: &[u8]) -> io::Result<()>;

    fn local_addr(&self) -> SocketAddr;
}

#[async_trait]
impl SendSocket for Arc<UdpSocket> {
    async fn send_packet(&self, to: SocketAddr, packet_buf: &[u8]) -> io::Result<()> {
        trace!("UDP socket: sending packet to {:?}", to);
        self.send_to(packet_buf, to).await?;
        Ok(())
    }

    fn local_addr(&self) -> SocketAddr {
        self.as_ref().local_addr()
            .expect("UdpSocket should have an initialized local addr")
    }
}

/// Serialized, paced frame emission on a shared socket.
///
/// Concurrent senders share one socket with the receive loop; a mutex
/// serializes the send system calls. The lock is scoped to a single send -
/// the inter-frame pacing sleep of a fragmented message happens outside it,
/// and the receive path takes no lock at all.
pub struct SendPipeline {
    socket: Arc<dyn SendSocket>,
    send_lock: Mutex<()>,
    inter_frame_delay: Duration,
}

impl SendPipeline {
    pub fn new(socket: Arc<dyn SendSocket>, inter_frame_delay: Duration) -> SendPipeline {
        SendPipeline {
            socket,
            send_lock: Mutex::new(()),
            inter_frame_delay,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    /// Sends the frames of one logical message in order, one datagram per
    ///  frame, with the configured pacing between consecutive frames.
    pub async fn send_frames(&self, to: SocketAddr, frames: &[Frame]) -> Result<(), NetworkError> {
        for (idx, frame) in frames.iter().enumerate() {
            if idx > 0 {
                time::sleep(self.inter_frame_delay).await;
            }

            let mut buf = BytesMut::new();
            frame.ser(&mut buf);

            let _guard = self.send_lock.lock().await;
            self.socket.send_packet(to, &buf).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use mockall::Sequence;
    use tokio::runtime::Builder;
    use tokio::time::Instant;

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 9))
    }

    fn serialized(frame: &Frame) -> Vec<u8> {
        let mut buf = BytesMut::new();
        frame.ser(&mut buf);
        buf.to_vec()
    }

    #[test]
    fn test_sends_frames_in_order() {
        let frames = vec![
            Frame::new(Bytes::from_static(b"first"), false),
            Frame::new(Bytes::from_static(b"second"), false),
            Frame::new(Bytes::from_static(b"third"), true),
        ];

        let mut send_socket = MockSendSocket::new();
        let mut seq = Sequence::new();
        for frame in &frames {
            let expected = serialized(frame);
            send_socket.expect_send_packet()
                .withf(move |to, buf| *to == peer() && buf == expected.as_slice())
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(()));
        }

        let pipeline = SendPipeline::new(Arc::new(send_socket), Duration::from_millis(10));

        let rt = Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build().unwrap();
        rt.block_on(async move {
            pipeline.send_frames(peer(), &frames).await.unwrap();
        });
    }

    #[test]
    fn test_fragmented_send_is_paced() {
        let frames = vec![
            Frame::new(Bytes::from_static(b"a"), false),
            Frame::new(Bytes::from_static(b"b"), false),
            Frame::new(Bytes::from_static(b"c"), true),
        ];

        let mut send_socket = MockSendSocket::new();
        send_socket.expect_send_packet()
            .times(3)
            .returning(|_, _| Ok(()));

        let pipeline = SendPipeline::new(Arc::new(send_socket), Duration::from_millis(10));

        let rt = Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build().unwrap();
        rt.block_on(async move {
            let before = Instant::now();
            pipeline.send_frames(peer(), &frames).await.unwrap();
            // two inter-frame gaps, no pacing before the first frame
            assert_eq!(before.elapsed(), Duration::from_millis(20));
        });
    }

    #[test]
    fn test_single_frame_send_is_not_paced() {
        let frames = vec![Frame::new(Bytes::from_static(b"only"), true)];

        let mut send_socket = MockSendSocket::new();
        send_socket.expect_send_packet()
            .times(1)
            .returning(|_, _| Ok(()));

        let pipeline = SendPipeline::new(Arc::new(send_socket), Duration::from_millis(10));

        let rt = Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build().unwrap();
        rt.block_on(async move {
            let before = Instant::now();
            pipeline.send_frames(peer(), &frames).await.unwrap();
            assert_eq!(before.elapsed(), Duration::ZERO);
        });
    }

    #[test]
    fn test_socket_error_is_propagated() {
        let mut send_socket = MockSendSocket::new();
        send_socket.expect_send_packet()
            .times(1)
            .returning(|_, _| Err(io::Error::new(io::ErrorKind::AddrNotAvailable, "no route")));

        let pipeline = SendPipeline::new(Arc::new(send_socket), Duration::from_millis(10));

        let rt = Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build().unwrap();
        rt.block_on(async move {
            let frames = vec![Frame::new(Bytes::from_static(b"x"), true)];
            let result = pipeline.send_frames(peer(), &frames).await;
            assert!(matches!(result, Err(NetworkError::Transport(_))));
        });
    }
}
