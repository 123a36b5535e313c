//! Tag-indexed dispatch of inbound frames to typed handlers.
//!
//! A [`Connection`] never touches the transport. The owner feeds it whole
//! frames (see [`crate::frame::FrameBuffer`]) together with a mutable handler
//! context `C`, and sends the bytes produced by [`Connection::encode`].

use std::collections::HashMap;

use bytes::Bytes;
use log::warn;

use crate::crypto::CryptKey;
use crate::error::{ProtocolError, Result};
use crate::frame::{next_frame, read_header};
use crate::packet::{Envelope, Packet};

/// Lifecycle notifications delivered outside the tag registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemMessage {
    Open,
    Close,
    Terminated,
    /// Fired after every dispatch cycle, whether or not it completed.
    Eod,
}

impl SystemMessage {
    const COUNT: usize = 4;

    fn index(self) -> usize {
        match self {
            SystemMessage::Open => 0,
            SystemMessage::Close => 1,
            SystemMessage::Terminated => 2,
            SystemMessage::Eod => 3,
        }
    }
}

/// Typed packet callback.
pub type Handler<C, P> = fn(&mut C, Envelope<P>);

/// Lifecycle callback.
pub type SystemHandler<C> = fn(&mut C);

type RawHandler<C> = Box<dyn Fn(&mut C, &mut Bytes, Option<&CryptKey>) -> Result<()> + Send + Sync>;

/// Per-connection key plus the tag → handler table.
pub struct Connection<C> {
    key: Option<CryptKey>,
    handlers: HashMap<u8, RawHandler<C>>,
    sys_handlers: [Option<SystemHandler<C>>; SystemMessage::COUNT],
}

impl<C: 'static> Default for Connection<C> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<C: 'static> Connection<C> {
    pub fn new(key: Option<CryptKey>) -> Self {
        Self {
            key,
            handlers: HashMap::new(),
            sys_handlers: [None; SystemMessage::COUNT],
        }
    }

    pub fn key(&self) -> Option<&CryptKey> {
        self.key.as_ref()
    }

    /// Registers the handler for `P::TAG`, replacing any previous one.
    pub fn register<P: Packet>(&mut self, handler: Handler<C, P>) {
        let raw: RawHandler<C> = Box::new(move |ctx, frame, key| {
            let envelope = Envelope::<P>::decode(frame, key)?;
            handler(ctx, envelope);
            Ok(())
        });
        self.handlers.insert(P::TAG, raw);
    }

    pub fn register_system(&mut self, message: SystemMessage, handler: SystemHandler<C>) {
        self.sys_handlers[message.index()] = Some(handler);
    }

    pub fn is_registered(&self, tag: u8) -> bool {
        self.handlers.contains_key(&tag)
    }

    /// Runs every frame in `data` through its handler, then fires `Eod`.
    ///
    /// Processing stops at the first unknown tag or truncated frame; frames
    /// before it have already been handled. Returns the number of frames
    /// handled.
    pub fn dispatch(&self, ctx: &mut C, data: Bytes) -> Result<usize> {
        let result = self.dispatch_frames(ctx, data);
        if let Err(e) = &result {
            warn!("stopping dispatch: {}", e);
        }
        self.notify(ctx, SystemMessage::Eod);
        result
    }

    fn dispatch_frames(&self, ctx: &mut C, data: Bytes) -> Result<usize> {
        let mut stream = data;
        let mut handled = 0;
        while let Some(mut frame) = next_frame(&mut stream)? {
            let header = read_header(&mut frame)?;
            let handler = self
                .handlers
                .get(&header.tag)
                .ok_or(ProtocolError::UnknownPacketType(header.tag))?;
            handler(ctx, &mut frame, self.key.as_ref())?;
            handled += 1;
        }
        Ok(handled)
    }

    pub fn notify(&self, ctx: &mut C, message: SystemMessage) {
        if let Some(handler) = self.sys_handlers[message.index()] {
            handler(ctx);
        }
    }

    /// Encodes `packet` with this connection's key.
    pub fn encode<P: Packet>(&self, packet: P) -> Result<Bytes> {
        Envelope::new(packet).encode(self.key.as_ref())
    }
}
