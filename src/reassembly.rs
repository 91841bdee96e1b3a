use crate::envelope::Request;
use crate::frame::Frame;
use bytes::{BufMut, Bytes, BytesMut};
use rustc_hash::FxHashMap;
use std::net::SocketAddr;
use tokio::sync::{Mutex, Notify};
use tracing::warn;

/// Per-peer accumulation of incoming frames.
///
/// Frames are appended in arrival order; when a terminal frame arrives, the
/// whole sequence is detached and its payloads are concatenated into the
/// completed logical message. The detach happens under the same lock as the
/// append, so a sequence is emitted exactly once even with concurrent callers.
#[derive(Default)]
pub struct ReassemblyMap {
    peers: Mutex<FxHashMap<SocketAddr, Vec<Frame>>>,
}

impl ReassemblyMap {
    pub fn new() -> ReassemblyMap {
        Default::default()
    }

    /// Appends a frame to the peer's sequence. Returns the completed payload
    ///  if this frame terminates the logical message, and `None` otherwise.
    pub async fn push(&self, peer: SocketAddr, frame: Frame) -> Option<Bytes> {
        let mut peers = self.peers.lock().await;

        let last = frame.last;
        peers.entry(peer).or_default().push(frame);
        if !last {
            return None;
        }

        let frames = peers.remove(&peer)
            .expect("the peer entry was populated just above");
        let mut payload = BytesMut::with_capacity(frames.iter().map(|f| f.payload.len()).sum());
        for frame in frames {
            payload.put_slice(&frame.payload);
        }
        Some(payload.freeze())
    }

    /// Number of peers with a partially accumulated message.
    pub async fn pending_peers(&self) -> usize {
        self.peers.lock().await.len()
    }
}

/// Completed requests awaiting dispatch, at most one per peer.
///
/// A second completed request from the same peer before dispatch overwrites
/// the first - that is protocol misuse by the peer, logged and tolerated.
#[derive(Default)]
pub struct CompletedQueue {
    requests: Mutex<FxHashMap<SocketAddr, Request>>,
    readable: Notify,
}

impl CompletedQueue {
    pub fn new() -> CompletedQueue {
        Default::default()
    }

    pub async fn put(&self, peer: SocketAddr, request: Request) {
        let mut requests = self.requests.lock().await;
        if requests.insert(peer, request).is_some() {
            warn!("new completed request from {:?} before the previous one was dispatched - overwriting", peer);
        }
        self.readable.notify_one();
    }

    /// Removes and returns all queued requests.
    pub async fn drain(&self) -> Vec<(SocketAddr, Request)> {
        self.requests.lock().await.drain().collect()
    }

    /// Completes when at least one request has been enqueued since the last
    ///  `drain`.
    pub async fn readable(&self) {
        self.readable.notified().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::frames_for_payload;
    use crate::envelope::RequestBody;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn frame(payload: &'static [u8], last: bool) -> Frame {
        Frame::new(Bytes::from_static(payload), last)
    }

    #[tokio::test]
    async fn test_accumulates_until_terminal_frame() {
        let map = ReassemblyMap::new();

        assert_eq!(map.push(peer(1), frame(b"ab", false)).await, None);
        assert_eq!(map.pending_peers().await, 1);
        assert_eq!(map.push(peer(1), frame(b"cd", false)).await, None);

        let completed = map.push(peer(1), frame(b"ef", true)).await;
        assert_eq!(completed, Some(Bytes::from_static(b"abcdef")));
        assert_eq!(map.pending_peers().await, 0);
    }

    #[tokio::test]
    async fn test_single_terminal_frame_completes_immediately() {
        let map = ReassemblyMap::new();

        let completed = map.push(peer(1), frame(b"payload", true)).await;
        assert_eq!(completed, Some(Bytes::from_static(b"payload")));
        assert_eq!(map.pending_peers().await, 0);
    }

    #[tokio::test]
    async fn test_peers_are_accumulated_independently() {
        let map = ReassemblyMap::new();

        assert_eq!(map.push(peer(1), frame(b"a", false)).await, None);
        assert_eq!(map.push(peer(2), frame(b"x", false)).await, None);
        assert_eq!(map.pending_peers().await, 2);

        assert_eq!(map.push(peer(1), frame(b"b", true)).await, Some(Bytes::from_static(b"ab")));
        assert_eq!(map.pending_peers().await, 1);
        assert_eq!(map.push(peer(2), frame(b"y", true)).await, Some(Bytes::from_static(b"xy")));
        assert_eq!(map.pending_peers().await, 0);
    }

    #[tokio::test]
    async fn test_reassembles_chunked_payload() {
        let payload = (0..10_000).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        let map = ReassemblyMap::new();

        let mut completed = None;
        for f in frames_for_payload(&payload, 4096) {
            assert_eq!(completed, None);
            completed = map.push(peer(1), f).await;
        }

        assert_eq!(completed, Some(Bytes::from(payload)));
    }

    #[tokio::test]
    async fn test_put_and_drain() {
        let queue = CompletedQueue::new();

        queue.put(peer(1), Request::new(peer(1), peer(80), RequestBody::Ping)).await;
        queue.put(peer(2), Request::new(peer(2), peer(80), RequestBody::Ping)).await;

        let mut drained = queue.drain().await;
        drained.sort_by_key(|(addr, _)| addr.port());
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].0, peer(1));
        assert_eq!(drained[1].0, peer(2));

        assert!(queue.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_second_request_overwrites_undispatched_first() {
        let queue = CompletedQueue::new();

        queue.put(peer(1), Request::new(peer(1), peer(80), RequestBody::Ping)).await;
        queue.put(peer(1), Request::new(peer(1), peer(80), RequestBody::User(Bytes::from_static(b"new")))).await;

        let drained = queue.drain().await;
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].1.body, RequestBody::User(Bytes::from_static(b"new")));
    }

    #[tokio::test]
    async fn test_readable_wakes_after_put() {
        let queue = CompletedQueue::new();

        queue.put(peer(1), Request::new(peer(1), peer(80), RequestBody::Ping)).await;

        // the stored permit makes this return immediately
        queue.readable().await;
        assert_eq!(queue.drain().await.len(), 1);
    }
}
