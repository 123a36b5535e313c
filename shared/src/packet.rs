//! Packet trait and the two-phase envelope encoding.
//!
//! A packet splits its fields in two groups:
//! - **plaintext** fields are always sent in the clear. They must hold
//!   everything the relay needs for routing (player id, room hash, ...).
//! - **body** fields may be sealed into one opaque blob with the sender's key.
//!
//! A relay without the key keeps the sealed blob and re-emits it unchanged, so
//! encrypted groups stay end-to-end confidential across the relay.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::warn;

use crate::codec::{WireRead, WireWrite};
use crate::crypto::CryptKey;
use crate::error::{CryptoError, ProtocolError, Result};
use crate::frame::{FRAME_MARKER, LEN_PREFIX};

/// A typed message with a fixed one-byte tag.
pub trait Packet: Default + Clone + Send + 'static {
    const TAG: u8;

    fn write_plain(&self, _buf: &mut BytesMut) {}

    fn read_plain(&mut self, _buf: &mut Bytes) -> Result<()> {
        Ok(())
    }

    fn write_body(&self, _buf: &mut BytesMut) {}

    fn read_body(&mut self, _buf: &mut Bytes) -> Result<()> {
        Ok(())
    }
}

/// State of the body field group after decoding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Body {
    /// Body fields were populated (or the packet has none).
    #[default]
    Clear,
    /// Encrypted with a key this side does not hold; re-emitted verbatim.
    Sealed(Bytes),
    /// Decryption failed; body fields hold defaults.
    Dropped(CryptoError),
}

/// A packet plus what is known about its body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Envelope<P> {
    pub packet: P,
    body: Body,
}

impl<P: Packet> From<P> for Envelope<P> {
    fn from(packet: P) -> Self {
        Self::new(packet)
    }
}

impl<P: Packet> Envelope<P> {
    pub fn new(packet: P) -> Self {
        Self {
            packet,
            body: Body::Clear,
        }
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// True when the body is an opaque ciphertext blob.
    pub fn is_sealed(&self) -> bool {
        matches!(self.body, Body::Sealed(_))
    }

    /// Serializes into one self-delimiting frame.
    ///
    /// A sealed body is written back unchanged. Otherwise the body is
    /// encrypted when `key` is set and non-empty.
    pub fn encode(&self, key: Option<&CryptKey>) -> Result<Bytes> {
        let mut frame = BytesMut::with_capacity(64);
        frame.put_u16_le(0);
        frame.put_u16_le(FRAME_MARKER);
        frame.put_u8(P::TAG);
        self.packet.write_plain(&mut frame);

        match &self.body {
            Body::Sealed(blob) => {
                frame.put_bool(true);
                frame.put_bytes16(blob);
            }
            Body::Clear | Body::Dropped(_) => {
                let mut body = BytesMut::new();
                self.packet.write_body(&mut body);
                match key {
                    _ if body.is_empty() => {
                        frame.put_bool(false);
                        frame.put_u16_le(0);
                    }
                    Some(key) => {
                        let cipher_data = key.encrypt(&body)?;
                        frame.put_bool(true);
                        frame.put_bytes16(&cipher_data);
                    }
                    None => {
                        frame.put_bool(false);
                        frame.put_bytes16(&body);
                    }
                }
            }
        }

        let len = frame.len() - LEN_PREFIX;
        if len > u16::MAX as usize {
            return Err(ProtocolError::FrameTooLarge(len));
        }
        frame[..LEN_PREFIX].copy_from_slice(&(len as u16).to_le_bytes());
        Ok(frame.freeze())
    }

    /// Decodes the rest of a frame whose header has been consumed.
    ///
    /// Never fails on crypto: without a key the ciphertext is kept for
    /// relaying, with the wrong key the body is dropped and the plaintext
    /// fields stay usable.
    pub fn decode(frame: &mut Bytes, key: Option<&CryptKey>) -> Result<Self> {
        let mut packet = P::default();
        packet.read_plain(frame)?;

        if !frame.has_remaining() {
            return Ok(Self::new(packet));
        }

        let body = if frame.read_bool()? {
            let blob = frame.read_bytes16()?;
            match key {
                None => Body::Sealed(blob),
                Some(key) => match key.decrypt(&blob) {
                    Ok(plain) => {
                        packet.read_body(&mut Bytes::from(plain))?;
                        Body::Clear
                    }
                    Err(e) => {
                        warn!("dropping body of packet 0x{:02x}: {}", P::TAG, e);
                        Body::Dropped(e)
                    }
                },
            }
        } else {
            if frame.has_remaining() {
                let mut body = frame.read_bytes16()?;
                if body.has_remaining() {
                    packet.read_body(&mut body)?;
                }
            }
            Body::Clear
        };

        Ok(Self { packet, body })
    }
}

/// Encodes a fresh packet in one call.
pub fn encode_packet<P: Packet>(packet: P, key: Option<&CryptKey>) -> Result<Bytes> {
    Envelope::new(packet).encode(key)
}
