use crate::error::CodecError;
use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytes_varint::{VarIntSupport, VarIntSupportMut};

bitflags! {
    /// The flag byte leading every frame on the wire. Reserved bits must be zero.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct FrameFlags: u8 {
        const LAST = 0b0000_0001;
    }
}

/// The on-wire unit: every datagram carries exactly one serialized frame, and a
///  logical message is the concatenation of frame payloads up to and including
///  the first frame with `last` set.
///
/// ```ascii
/// 0: flags (u8): bit 0 = LAST, other bits reserved (must be 0)
/// 1: payload length (varint u32), >= 1
/// *: payload bytes
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub payload: Bytes,
    pub last: bool,
}

impl Frame {
    pub fn new(payload: Bytes, last: bool) -> Frame {
        debug_assert!(!payload.is_empty(), "frame payload must not be empty");
        Frame { payload, last }
    }

    /// A single terminal frame carrying a whole logical message.
    pub fn terminal(payload: Bytes) -> Frame {
        Frame::new(payload, true)
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        let mut flags = FrameFlags::empty();
        if self.last {
            flags |= FrameFlags::LAST;
        }
        buf.put_u8(flags.bits());
        buf.put_u32_varint(wire_len(self.payload.len()));
        buf.put_slice(&self.payload);
    }

    /// Decodes a frame from a complete datagram. Strict: reserved flag bits, an
    ///  empty payload and bytes after the payload are all rejected.
    pub fn deser(buf: &mut impl Buf) -> Result<Frame, CodecError> {
        if buf.remaining() < 1 {
            return Err(CodecError::BufferExhausted("frame flags"));
        }
        let flag_bits = buf.get_u8();
        let flags = FrameFlags::from_bits(flag_bits)
            .ok_or(CodecError::UnknownDiscriminant { what: "frame flags", value: flag_bits })?;

        let payload_len = buf.try_get_u32_varint()
            .map_err(|_| CodecError::BufferExhausted("frame payload length"))?;
        if payload_len == 0 {
            return Err(CodecError::EmptyFramePayload);
        }
        if buf.remaining() < payload_len as usize {
            return Err(CodecError::BufferExhausted("frame payload"));
        }
        let payload = buf.copy_to_bytes(payload_len as usize);

        if buf.has_remaining() {
            return Err(CodecError::TrailingBytes(buf.remaining()));
        }

        Ok(Frame {
            payload,
            last: flags.contains(FrameFlags::LAST),
        })
    }
}

/// NB: panics if the length does not fit the wire format's u32 range - callers
///  ensure payloads are far below that
pub(crate) fn wire_len(len: usize) -> u32 {
    len.try_into()
        .expect("this is a bug: payload length should have been checked against the u32 wire range")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::single_byte_last(vec![7], true)]
    #[case::single_byte_not_last(vec![7], false)]
    #[case::small_last(vec![1, 2, 3], true)]
    #[case::small_not_last(vec![1, 2, 3], false)]
    #[case::chunk_sized(vec![0xab; 4096], true)]
    fn test_round_trip(#[case] payload: Vec<u8>, #[case] last: bool) {
        let original = Frame::new(Bytes::from(payload), last);

        let mut buf = BytesMut::new();
        original.ser(&mut buf);
        let mut b: &[u8] = &buf;
        let deser = Frame::deser(&mut b).unwrap();
        assert!(b.is_empty());
        assert_eq!(deser, original);
    }

    #[rstest]
    #[case::last(Frame::new(Bytes::from_static(b"ab"), true), vec![1, 2, b'a', b'b'])]
    #[case::not_last(Frame::new(Bytes::from_static(b"ab"), false), vec![0, 2, b'a', b'b'])]
    #[case::single_byte(Frame::new(Bytes::from_static(&[0xff]), true), vec![1, 1, 0xff])]
    fn test_wire_layout(#[case] frame: Frame, #[case] expected: Vec<u8>) {
        let mut buf = BytesMut::new();
        frame.ser(&mut buf);
        assert_eq!(buf.as_ref(), expected.as_slice());
    }

    #[rstest]
    #[case::empty_buffer(vec![], CodecError::BufferExhausted("frame flags"))]
    #[case::missing_length(vec![1], CodecError::BufferExhausted("frame payload length"))]
    #[case::reserved_flag_bits(vec![0b0000_0010, 1, 7], CodecError::UnknownDiscriminant { what: "frame flags", value: 0b0000_0010 })]
    #[case::empty_payload(vec![1, 0], CodecError::EmptyFramePayload)]
    #[case::truncated_payload(vec![1, 3, 1, 2], CodecError::BufferExhausted("frame payload"))]
    #[case::trailing_bytes(vec![1, 1, 7, 9], CodecError::TrailingBytes(1))]
    fn test_deser_error(#[case] raw: Vec<u8>, #[case] expected: CodecError) {
        let mut b: &[u8] = &raw;
        assert_eq!(Frame::deser(&mut b), Err(expected));
    }
}
