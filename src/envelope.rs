use crate::error::CodecError;
use crate::frame::wire_len;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytes_varint::{VarIntSupport, VarIntSupportMut};
use std::net::SocketAddr;

const REQUEST_KIND_PING: u8 = 0;
const REQUEST_KIND_USER: u8 = 1;

const RESPONSE_KIND_PONG: u8 = 0;
const RESPONSE_KIND_USER: u8 = 1;

const CODE_SUCCEED: u8 = 0;
const CODE_FAILED: u8 = 1;

const ADDR_FAMILY_V4: u8 = 0;
const ADDR_FAMILY_V6: u8 = 1;

/// Outcome code carried on every response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseCode {
    Succeed,
    Failed,
}

/// The content of a request: either the built-in liveness ping, which the
///  server pipeline answers itself, or an opaque user payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestBody {
    Ping,
    User(Bytes),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseBody {
    Pong,
    User(Bytes),
}

/// A request envelope. The addresses on the wire are informational - the
///  server overwrites `from` with the datagram sender address on receipt.
///
/// ```ascii
/// 0: kind (u8): 0 = ping, 1 = user
/// 1: from address
/// *: to address
/// *: user payload: length (varint u32) + bytes - present only for kind 1
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub body: RequestBody,
}

impl Request {
    pub fn new(from: SocketAddr, to: SocketAddr, body: RequestBody) -> Request {
        Request { from, to, body }
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        match &self.body {
            RequestBody::Ping => {
                buf.put_u8(REQUEST_KIND_PING);
                put_addr(buf, self.from);
                put_addr(buf, self.to);
            }
            RequestBody::User(payload) => {
                buf.put_u8(REQUEST_KIND_USER);
                put_addr(buf, self.from);
                put_addr(buf, self.to);
                buf.put_u32_varint(wire_len(payload.len()));
                buf.put_slice(payload);
            }
        }
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Request, CodecError> {
        if buf.remaining() < 1 {
            return Err(CodecError::BufferExhausted("request kind"));
        }
        let kind = buf.get_u8();
        let from = try_get_addr(buf)?;
        let to = try_get_addr(buf)?;

        let body = match kind {
            REQUEST_KIND_PING => RequestBody::Ping,
            REQUEST_KIND_USER => RequestBody::User(try_get_payload(buf)?),
            _ => return Err(CodecError::UnknownDiscriminant { what: "request kind", value: kind }),
        };

        if buf.has_remaining() {
            return Err(CodecError::TrailingBytes(buf.remaining()));
        }
        Ok(Request { from, to, body })
    }
}

/// A response envelope.
///
/// ```ascii
/// 0: kind (u8): 0 = pong, 1 = user
/// 1: code (u8): 0 = SUCCEED, 1 = FAILED
/// 2: from address
/// *: to address
/// *: user payload: length (varint u32) + bytes - present only for kind 1
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub code: ResponseCode,
    pub body: ResponseBody,
}

impl Response {
    /// A response addressed back to the origin of `request`. The server
    ///  pipeline re-stamps the addresses anyway, so a handler cannot get them
    ///  wrong.
    pub fn reply_to(request: &Request, code: ResponseCode, body: ResponseBody) -> Response {
        Response {
            from: request.to,
            to: request.from,
            code,
            body,
        }
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        match &self.body {
            ResponseBody::Pong => buf.put_u8(RESPONSE_KIND_PONG),
            ResponseBody::User(_) => buf.put_u8(RESPONSE_KIND_USER),
        }
        buf.put_u8(match self.code {
            ResponseCode::Succeed => CODE_SUCCEED,
            ResponseCode::Failed => CODE_FAILED,
        });
        put_addr(buf, self.from);
        put_addr(buf, self.to);
        if let ResponseBody::User(payload) = &self.body {
            buf.put_u32_varint(wire_len(payload.len()));
            buf.put_slice(payload);
        }
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Response, CodecError> {
        if buf.remaining() < 1 {
            return Err(CodecError::BufferExhausted("response kind"));
        }
        let kind = buf.get_u8();
        if buf.remaining() < 1 {
            return Err(CodecError::BufferExhausted("response code"));
        }
        let code = buf.get_u8();
        let code = match code {
            CODE_SUCCEED => ResponseCode::Succeed,
            CODE_FAILED => ResponseCode::Failed,
            _ => return Err(CodecError::UnknownDiscriminant { what: "response code", value: code }),
        };
        let from = try_get_addr(buf)?;
        let to = try_get_addr(buf)?;

        let body = match kind {
            RESPONSE_KIND_PONG => ResponseBody::Pong,
            RESPONSE_KIND_USER => ResponseBody::User(try_get_payload(buf)?),
            _ => return Err(CodecError::UnknownDiscriminant { what: "response kind", value: kind }),
        };

        if buf.has_remaining() {
            return Err(CodecError::TrailingBytes(buf.remaining()));
        }
        Ok(Response { from, to, code, body })
    }
}

fn put_addr(buf: &mut BytesMut, addr: SocketAddr) {
    match addr {
        SocketAddr::V4(v4) => {
            buf.put_u8(ADDR_FAMILY_V4);
            buf.put_slice(&v4.ip().octets());
            buf.put_u16(v4.port());
        }
        SocketAddr::V6(v6) => {
            buf.put_u8(ADDR_FAMILY_V6);
            buf.put_slice(&v6.ip().octets());
            buf.put_u16(v6.port());
        }
    }
}

fn try_get_addr(buf: &mut impl Buf) -> Result<SocketAddr, CodecError> {
    if buf.remaining() < 1 {
        return Err(CodecError::BufferExhausted("address family"));
    }
    let family = buf.get_u8();
    match family {
        ADDR_FAMILY_V4 => {
            if buf.remaining() < 4 {
                return Err(CodecError::BufferExhausted("IPv4 address"));
            }
            let mut octets = [0u8; 4];
            buf.copy_to_slice(&mut octets);
            let port = try_get_port(buf)?;
            Ok(SocketAddr::from((octets, port)))
        }
        ADDR_FAMILY_V6 => {
            if buf.remaining() < 16 {
                return Err(CodecError::BufferExhausted("IPv6 address"));
            }
            let mut octets = [0u8; 16];
            buf.copy_to_slice(&mut octets);
            let port = try_get_port(buf)?;
            Ok(SocketAddr::from((octets, port)))
        }
        _ => Err(CodecError::UnknownDiscriminant { what: "address family", value: family }),
    }
}

fn try_get_port(buf: &mut impl Buf) -> Result<u16, CodecError> {
    if buf.remaining() < 2 {
        return Err(CodecError::BufferExhausted("port"));
    }
    Ok(buf.get_u16())
}

fn try_get_payload(buf: &mut impl Buf) -> Result<Bytes, CodecError> {
    let payload_len = buf.try_get_u32_varint()
        .map_err(|_| CodecError::BufferExhausted("payload length"))?;
    if buf.remaining() < payload_len as usize {
        return Err(CodecError::BufferExhausted("payload"));
    }
    Ok(buf.copy_to_bytes(payload_len as usize))
}
