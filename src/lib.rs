//! A connectionless request/response messaging library built directly on UDP
//!  datagrams.
//!
//! The abstraction is exchanging *logical messages* - typed, serialized
//!  request and response envelopes whose size may exceed a single datagram.
//!  The library takes care of chunking a message into frames on the send
//!  side, reassembling the frames per peer on the receive side, and running
//!  a concurrent server pipeline on top of a socket that has no ordering,
//!  delivery or connection semantics.
//!
//! ## Design
//!
//! * A symmetric client/server pair: [`client::UdpClient`] performs round-trip
//!   request/reply calls, [`server::UdpServer`] demultiplexes fragments per
//!   peer, reassembles complete requests, hands them to a user-supplied
//!   [`handler::RequestHandler`] and emits a possibly fragmented response.
//! * Payloads up to the buffer threshold (4 KiB by default) travel as a
//!   single terminal frame; larger payloads are sliced into chunks of that
//!   size, and the frames of a fragmented send are paced (~10 ms apart) as
//!   coarse protection against burst loss.
//! * Delivery is best-effort: no retransmission, no duplicate suppression, no
//!   ordering across logical messages. Within one peer's logical message,
//!   frames are assumed to arrive in send order.
//! * Before a fragmented send, the client probes the server with a ping and
//!   fails fast if no pong arrives within 5 seconds; the server answers pings
//!   in the pipeline without invoking the user handler.
//!
//! ## Wire format
//!
//! Every datagram carries one frame:
//!
//! ```ascii
//! 0: flags (u8): bit 0 = LAST, other bits reserved (must be 0)
//! 1: payload length (varint u32), >= 1
//! *: payload bytes
//! ```
//!
//! A logical message is the concatenation of a peer's frame payloads up to
//!  and including the first frame with LAST set. The concatenation decodes as
//!  an envelope:
//!
//! ```ascii
//! request:                           response:
//! 0: kind (u8): 0 = ping, 1 = user   0: kind (u8): 0 = pong, 1 = user
//! 1: from address                    1: code (u8): 0 = SUCCEED, 1 = FAILED
//! *: to address                      2: from address
//! *: user payload (kind 1 only)      *: to address
//!                                    *: user payload (kind 1 only)
//! ```
//!
//! Addresses are `family (u8), octets (4 or 16 bytes), port (u16)`; user
//!  payloads are varint-length-prefixed. The addresses on the wire are
//!  informational - the authoritative peer address is the datagram sender.
//!
//! ## Server pipeline
//!
//! ```ascii
//! socket -> receiver task -> per-peer frame buffers -> completed requests
//!        -> dispatcher -> handler workers (bounded, 4) -> sender workers
//!        -> socket
//! ```
//!
//! The receiver is a single task and takes no locks across blocking I/O;
//!  concurrent sender workers serialize their send calls with a mutex scoped
//!  to a single system call.

pub mod chunker;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod handler;
pub mod reassembly;
pub mod send_pipeline;
pub mod server;
