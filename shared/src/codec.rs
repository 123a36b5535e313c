//! Byte-level field codec.
//!
//! Reading rules:
//! - Every read checks `remaining()` first and reports `Truncated` instead of
//!   panicking, so a hostile peer can never crash the dispatcher.
//! - Integers are little-endian; strings and blobs carry a `u16` length prefix.

use bytes::{Buf, BufMut, Bytes};

use crate::error::{ProtocolError, Result};

/// Checked reads over any `Buf`.
pub trait WireRead: Buf {
    fn read_u8(&mut self) -> Result<u8> {
        if self.remaining() < 1 {
            return Err(ProtocolError::Truncated);
        }
        Ok(self.get_u8())
    }

    fn read_i8(&mut self) -> Result<i8> {
        if self.remaining() < 1 {
            return Err(ProtocolError::Truncated);
        }
        Ok(self.get_i8())
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_u16(&mut self) -> Result<u16> {
        if self.remaining() < 2 {
            return Err(ProtocolError::Truncated);
        }
        Ok(self.get_u16_le())
    }

    fn read_i16(&mut self) -> Result<i16> {
        if self.remaining() < 2 {
            return Err(ProtocolError::Truncated);
        }
        Ok(self.get_i16_le())
    }

    fn read_u32(&mut self) -> Result<u32> {
        if self.remaining() < 4 {
            return Err(ProtocolError::Truncated);
        }
        Ok(self.get_u32_le())
    }

    /// Reads a `u16` length followed by that many bytes.
    fn read_bytes16(&mut self) -> Result<Bytes> {
        let len = self.read_u16()? as usize;
        if self.remaining() < len {
            return Err(ProtocolError::Truncated);
        }
        Ok(self.copy_to_bytes(len))
    }

    /// Reads a length-prefixed string. Invalid UTF-8 is replaced, not rejected.
    fn read_string16(&mut self) -> Result<String> {
        let raw = self.read_bytes16()?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}

impl<B: Buf + ?Sized> WireRead for B {}

/// Length-prefixed writes over any `BufMut`.
pub trait WireWrite: BufMut {
    /// Writes a `u16` length followed by the bytes. Input longer than
    /// `u16::MAX` is cut at the prefix limit; such a frame is rejected later
    /// by the frame length check anyway.
    fn put_bytes16(&mut self, data: &[u8]) {
        let len = data.len().min(u16::MAX as usize);
        self.put_u16_le(len as u16);
        self.put_slice(&data[..len]);
    }

    fn put_string16(&mut self, s: &str) {
        self.put_bytes16(s.as_bytes());
    }

    fn put_bool(&mut self, v: bool) {
        self.put_u8(v as u8);
    }
}

impl<B: BufMut + ?Sized> WireWrite for B {}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_integers_are_little_endian() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(0x2828);
        buf.put_u32_le(0x0102_0304);
        assert_eq!(&buf[..], &[0x28, 0x28, 0x04, 0x03, 0x02, 0x01]);

        let mut bytes = buf.freeze();
        assert_eq!(bytes.read_u16().unwrap(), 0x2828);
        assert_eq!(bytes.read_u32().unwrap(), 0x0102_0304);
    }

    #[test]
    fn test_string_prefix_matches_length() {
        let mut buf = BytesMut::new();
        buf.put_string16("hello");
        assert_eq!(buf.len(), 2 + 5);
        assert_eq!(u16::from_le_bytes([buf[0], buf[1]]), 5);

        let mut bytes = buf.freeze();
        assert_eq!(bytes.read_string16().unwrap(), "hello");
        assert!(!bytes.has_remaining());
    }

    #[test]
    fn test_truncated_reads_fail_cleanly() {
        let mut bytes = Bytes::from_static(&[0x01]);
        assert_eq!(bytes.read_u16(), Err(ProtocolError::Truncated));

        // Declares 10 bytes, carries 2.
        let mut bytes = Bytes::from_static(&[10, 0, b'a', b'b']);
        assert_eq!(bytes.read_string16(), Err(ProtocolError::Truncated));

        let mut empty = Bytes::new();
        assert_eq!(empty.read_u8(), Err(ProtocolError::Truncated));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut bytes = Bytes::from_static(&[2, 0, 0xff, b'a']);
        let s = bytes.read_string16().unwrap();
        assert!(s.ends_with('a'));
    }
}
