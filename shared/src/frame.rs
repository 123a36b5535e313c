//! Stream framing.
//!
//! Every frame is `[u16 length][u16 marker][u8 tag][...]` where `length` counts
//! the bytes after itself. Transports may deliver several frames at once, or
//! split one frame across deliveries; [`FrameBuffer`] turns an arbitrary byte
//! stream back into runs of whole frames.

use bytes::{Buf, Bytes, BytesMut};

use crate::codec::WireRead;
use crate::error::{ProtocolError, Result};
use crate::refusal_kind;

/// Constant written after the length prefix. Only there to make frame
/// boundaries easy to spot in a hexdump; never validated.
pub const FRAME_MARKER: u16 = 0x2828;

/// Size of the outer length prefix.
pub const LEN_PREFIX: usize = 2;

/// Header of one frame, after the length prefix has been consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub tag: u8,
}

/// Splits the next length-delimited frame off `stream`.
///
/// Returns `Ok(None)` once the stream is exhausted and `Truncated` if the
/// length prefix promises more bytes than are left.
pub fn next_frame(stream: &mut Bytes) -> Result<Option<Bytes>> {
    if !stream.has_remaining() {
        return Ok(None);
    }
    let len = stream.read_u16()? as usize;
    if stream.remaining() < len {
        return Err(ProtocolError::Truncated);
    }
    Ok(Some(stream.split_to(len)))
}

/// Reads the marker and tag at the start of a frame body.
pub fn read_header(frame: &mut Bytes) -> Result<FrameHeader> {
    let _marker = frame.read_u16()?;
    let tag = frame.read_u8()?;
    Ok(FrameHeader { tag })
}

/// Reassembles frames from arbitrarily chunked transport deliveries.
///
/// Complete frames are handed out as soon as they arrive, so the buffer never
/// holds more than one partial frame (at most 64 KiB).
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `data` and returns every complete frame now available, still
    /// concatenated, or `None` if no frame is complete yet.
    pub fn push(&mut self, data: &[u8]) -> Option<Bytes> {
        self.pending.extend_from_slice(data);

        let mut complete = 0;
        loop {
            let rest = &self.pending[complete..];
            if rest.len() < LEN_PREFIX {
                break;
            }
            let len = u16::from_le_bytes([rest[0], rest[1]]) as usize;
            if rest.len() - LEN_PREFIX < len {
                break;
            }
            complete += LEN_PREFIX + len;
        }

        if complete == 0 {
            return None;
        }
        Some(self.pending.split_to(complete).freeze())
    }

    /// Bytes of an incomplete trailing frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Refusal payload waiting at the current frame boundary.
    ///
    /// Refusals are written unframed, possibly right behind ordinary frames.
    /// Real frames carry [`FRAME_MARKER`] where a refusal has its last bytes,
    /// so the two never collide.
    pub fn refusal(&self) -> Option<&'static str> {
        refusal_kind(&self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u16_le((2 + 1 + payload.len()) as u16);
        buf.put_u16_le(FRAME_MARKER);
        buf.put_u8(tag);
        buf.put_slice(payload);
        buf.to_vec()
    }

    #[test]
    fn test_next_frame_splits_concatenated_frames() {
        let mut stream = Vec::new();
        stream.extend(frame(1, &[]));
        stream.extend(frame(7, &[1, 2, 3]));
        let mut stream = Bytes::from(stream);

        let mut first = next_frame(&mut stream).unwrap().unwrap();
        assert_eq!(read_header(&mut first).unwrap().tag, 1);
        assert!(first.is_empty());

        let mut second = next_frame(&mut stream).unwrap().unwrap();
        assert_eq!(read_header(&mut second).unwrap().tag, 7);
        assert_eq!(&second[..], &[1, 2, 3]);

        assert!(next_frame(&mut stream).unwrap().is_none());
    }

    #[test]
    fn test_next_frame_rejects_short_stream() {
        let mut data = frame(1, &[9, 9]);
        data.truncate(data.len() - 1);
        let mut stream = Bytes::from(data);
        assert_eq!(next_frame(&mut stream), Err(ProtocolError::Truncated));
    }

    #[test]
    fn test_frame_buffer_reassembles_split_frames() {
        let f1 = frame(2, &[1, 2, 3, 4]);
        let f2 = frame(3, &[5]);
        let mut all = f1.clone();
        all.extend(&f2);

        let mut buffer = FrameBuffer::new();
        assert!(buffer.push(&all[..1]).is_none());
        assert!(buffer.push(&all[1..5]).is_none());

        let out = buffer.push(&all[5..f1.len() + 2]).unwrap();
        assert_eq!(&out[..], &f1[..]);
        assert_eq!(buffer.pending_len(), 2);

        let out = buffer.push(&all[f1.len() + 2..]).unwrap();
        assert_eq!(&out[..], &f2[..]);
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn test_frame_buffer_returns_whole_runs() {
        let mut all = frame(1, &[]);
        all.extend(frame(1, &[]));
        all.extend(frame(1, &[0xAA]));

        let mut buffer = FrameBuffer::new();
        let out = buffer.push(&all[..all.len() - 1]).unwrap();
        assert_eq!(out.len(), 10);
        assert_eq!(buffer.pending_len(), all.len() - 1 - 10);
    }

    #[test]
    fn test_refusal_after_frames_in_one_delivery() {
        let mut all = frame(1, &[]);
        all.extend(frame(4, &[7]));
        all.extend(crate::REFUSAL_STOPPING.as_bytes());

        let mut buffer = FrameBuffer::new();
        let out = buffer.push(&all).unwrap();
        assert_eq!(out.len(), 5 + 6);
        assert_eq!(buffer.refusal(), Some(crate::REFUSAL_STOPPING));
    }

    #[test]
    fn test_refusal_split_across_deliveries() {
        let refusal = crate::REFUSAL_FULL.as_bytes();
        let mut buffer = FrameBuffer::new();
        assert!(buffer.push(&refusal[..2]).is_none());
        assert_eq!(buffer.refusal(), None);
        assert!(buffer.push(&refusal[2..]).is_none());
        assert_eq!(buffer.refusal(), Some(crate::REFUSAL_FULL));
    }

    #[test]
    fn test_partial_frame_is_not_a_refusal() {
        let data = frame(9, &[1, 2, 3, 4, 5]);
        let mut buffer = FrameBuffer::new();
        assert!(buffer.push(&data[..6]).is_none());
        assert_eq!(buffer.refusal(), None);
    }
}
