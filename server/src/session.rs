//! Server-side packet handlers for one connected session.
//!
//! Handlers stamp the session id into each packet, update the sticky cache
//! in the registry, and queue the re-encoded frame into one of two batches:
//! local (current room) and self. Batches are flushed in that order at the
//! end of every dispatch cycle. Chat skips batching and goes to the router
//! directly, echoed back to the sender.

use bytes::Bytes;
use log::{debug, info, warn};
use shared::messages::{
    Chat, ClientHello, ErasePicture, Facing, Flash, Heartbeat, Hidden, Join, Jump, Leave, Move,
    MovePicture, Name, RemoveRepeatingFlash, RepeatingFlash, Room, ShowPicture,
    ShowPlayerBattleAnim, SoundEffect, Speed, Sprite, System, Transparency,
};
use shared::{Connection, Envelope, Packet, PlayerPacket, SystemMessage, Visibility};

use crate::batch::Batch;
use crate::outbound::Outbound;
use crate::router::Router;
use crate::sticky::StickySlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Registered, has not introduced itself yet.
    Open,
    /// Sent its hello; join and leave are announced to everyone.
    Joined,
    Closed,
}

/// Handler context of one connection.
pub struct SessionContext {
    id: u16,
    router: Router,
    outbound: Outbound,
    phase: SessionPhase,
    encrypted: bool,
    name: String,
    room_id: u16,
    room_hash: u32,
    local: Batch,
    own: Batch,
}

impl SessionContext {
    pub fn new(id: u16, router: Router, outbound: Outbound) -> Self {
        Self {
            id,
            router,
            outbound,
            phase: SessionPhase::Open,
            encrypted: false,
            name: String::new(),
            room_id: 0,
            room_hash: 0,
            local: Batch::default(),
            own: Batch::default(),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn room_hash(&self) -> u32 {
        self.room_hash
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Asks the writer to finish and close the socket.
    pub fn close_outbound(&self) {
        self.outbound.close();
    }

    /// Overwrites the player id and re-encodes. Sealed bodies are kept as is.
    fn stamp<P: PlayerPacket>(&self, mut envelope: Envelope<P>) -> Option<Bytes> {
        envelope.packet.set_id(self.id);
        self.encode(envelope)
    }

    fn encode<P: Packet>(&self, envelope: Envelope<P>) -> Option<Bytes> {
        match envelope.encode(None) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!("session {}: cannot encode packet 0x{:02x}: {}", self.id, P::TAG, e);
                None
            }
        }
    }

    fn queue_local(&mut self, frame: &[u8]) {
        if let Some(bulk) = self.local.push(frame) {
            self.send_local_bulk(bulk);
        }
    }

    fn queue_self(&mut self, frame: &[u8]) {
        if let Some(bulk) = self.own.push(frame) {
            self.outbound.send(bulk);
        }
    }

    fn send_local_bulk(&self, bulk: Bytes) {
        self.router
            .send_to(self.id, self.room_hash, Visibility::Local, bulk, false);
    }

    /// Sends every batch: local, then self.
    pub fn flush(&mut self) {
        self.flush_local();
        if let Some(bulk) = self.own.take() {
            self.outbound.send(bulk);
        }
    }

    fn flush_local(&mut self) {
        if let Some(bulk) = self.local.take() {
            self.send_local_bulk(bulk);
        }
    }

    /// GLOBAL info line about this session, echoed to it as well.
    fn announce(&self, verb: &str) {
        let mut message = format!("*** id:{}", self.id);
        if !self.name.is_empty() {
            message.push(' ');
            message.push_str(&self.name);
        }
        message.push_str(&format!(" {} the server.", verb));

        let chat = Chat {
            id: self.id,
            kind: 0,
            visibility: Visibility::Global as u8,
            room_id: self.room_id,
            message,
            ..Chat::default()
        };
        if let Some(frame) = self.encode(Envelope::new(chat)) {
            self.router.send_to(self.id, 0, Visibility::Global, frame, true);
        }
    }

    fn log_membership(&self, verb: &str) {
        if self.encrypted {
            info!("id={} (encrypted) {} the server", self.id, verb);
        } else {
            info!(
                "room_id={} id={} name={} {} the server",
                self.room_id, self.id, self.name, verb
            );
        }
    }
}

/// Builds the handler table every server session uses.
pub fn session_connection() -> Connection<SessionContext> {
    let mut conn = Connection::new(None);
    conn.register(on_heartbeat);
    conn.register(on_client_hello);
    conn.register(on_room);
    conn.register(on_name);
    conn.register(on_chat);
    conn.register(relay_sticky::<Move>);
    conn.register(relay::<Jump>);
    conn.register(relay_sticky::<Facing>);
    conn.register(relay_sticky::<Speed>);
    conn.register(relay_sticky::<Sprite>);
    conn.register(relay::<Flash>);
    conn.register(relay_sticky::<RepeatingFlash>);
    conn.register(on_remove_repeating_flash);
    conn.register(relay_sticky::<Hidden>);
    conn.register(relay_sticky::<System>);
    conn.register(relay_sticky::<Transparency>);
    conn.register(relay::<SoundEffect>);
    conn.register(on_show_picture);
    conn.register(on_move_picture);
    conn.register(on_erase_picture);
    conn.register(relay::<ShowPlayerBattleAnim>);

    conn.register_system(SystemMessage::Open, on_open);
    conn.register_system(SystemMessage::Close, on_close);
    conn.register_system(SystemMessage::Eod, SessionContext::flush);
    conn
}

fn relay<P: PlayerPacket>(ctx: &mut SessionContext, envelope: Envelope<P>) {
    if let Some(frame) = ctx.stamp(envelope) {
        ctx.queue_local(&frame);
    }
}

fn relay_sticky<P: StickySlot>(ctx: &mut SessionContext, envelope: Envelope<P>) {
    let Some(frame) = ctx.stamp(envelope) else {
        return;
    };
    ctx.router
        .update_session(ctx.id, |e| *P::slot(&mut e.sticky) = Some(frame.clone()));
    ctx.queue_local(&frame);
}

fn on_open(ctx: &mut SessionContext) {
    debug!("session {} open", ctx.id);
}

fn on_close(ctx: &mut SessionContext) {
    if ctx.phase == SessionPhase::Joined {
        if let Some(leave) = ctx.encode(Envelope::new(Leave { id: ctx.id })) {
            ctx.queue_local(&leave);
        }
        ctx.flush_local();
        ctx.announce("left");
        ctx.log_membership("left");
    }
    ctx.phase = SessionPhase::Closed;
    ctx.router.remove_session(ctx.id);
}

fn on_heartbeat(ctx: &mut SessionContext, envelope: Envelope<Heartbeat>) {
    if let Some(frame) = ctx.encode(envelope) {
        ctx.queue_self(&frame);
    }
}

fn on_client_hello(ctx: &mut SessionContext, envelope: Envelope<ClientHello>) {
    if ctx.phase != SessionPhase::Open {
        return;
    }
    ctx.encrypted = envelope.is_sealed();
    let hello = envelope.packet;
    ctx.room_id = hello.room_id;
    ctx.name = hello.name;
    ctx.router
        .update_session(ctx.id, |e| e.namespace = hello.namespace_hash);
    ctx.phase = SessionPhase::Joined;
    ctx.announce("joined");
    ctx.log_membership("joined");
}

/// Enters a new room without telling the old one.
fn on_room(ctx: &mut SessionContext, envelope: Envelope<Room>) {
    ctx.flush_local();

    let room = envelope.packet.clone();
    ctx.room_id = room.room_id;
    ctx.room_hash = room.room_hash;
    let name = ctx
        .router
        .update_session(ctx.id, |e| {
            e.sticky.reset_keep_name();
            e.room_hash = room.room_hash;
            e.sticky.name.clone()
        })
        .flatten();

    if let Some(ack) = ctx.encode(envelope) {
        ctx.queue_self(&ack);
    }
    match ctx.router.room_snapshot(ctx.id) {
        Ok(frames) => {
            for frame in frames {
                ctx.queue_self(&frame);
            }
        }
        Err(e) => warn!("session {}: room replay failed: {}", ctx.id, e),
    }
    if let Some(join) = ctx.encode(Envelope::new(Join { id: ctx.id })) {
        ctx.queue_local(&join);
    }
    if let Some(name) = name {
        ctx.queue_local(&name);
    }

    if ctx.encrypted {
        debug!("id={} (encrypted) changed room", ctx.id);
    } else {
        debug!("id={} entered room {}", ctx.id, ctx.room_id);
    }
}

fn on_name(ctx: &mut SessionContext, envelope: Envelope<Name>) {
    if !envelope.is_sealed() {
        ctx.name = envelope.packet.name.clone();
    }
    relay_sticky(ctx, envelope);
}

fn on_chat(ctx: &mut SessionContext, mut envelope: Envelope<Chat>) {
    envelope.packet.set_id(ctx.id);
    envelope.packet.kind = 1;
    let Some(visibility) = Visibility::from_u8(envelope.packet.visibility) else {
        warn!(
            "session {}: chat with unknown visibility {}",
            ctx.id, envelope.packet.visibility
        );
        return;
    };

    let sealed = envelope.is_sealed();
    let chat = envelope.packet.clone();
    if !sealed && visibility != Visibility::Crypt {
        info!(
            "Chat: {} [{}, {}]: {}",
            chat.name,
            visibility.name(),
            chat.room_id,
            chat.message
        );
    }

    match visibility {
        Visibility::Crypt if chat.crypt_key_hash != 0 => {
            ctx.router
                .update_session(ctx.id, |e| e.crypt_hash = chat.crypt_key_hash);
            info!(
                "Chat: id={} [CRYPT]: private group set to {}",
                ctx.id, chat.crypt_key_hash
            );
        }
        Visibility::Local | Visibility::Global | Visibility::Crypt => {
            let to_id = if visibility == Visibility::Local {
                ctx.room_hash
            } else {
                0
            };
            if let Some(frame) = ctx.encode(envelope) {
                ctx.router.send_to(ctx.id, to_id, visibility, frame, true);
            }
        }
        Visibility::Null => {}
    }
}

fn on_remove_repeating_flash(ctx: &mut SessionContext, envelope: Envelope<RemoveRepeatingFlash>) {
    ctx.router
        .update_session(ctx.id, |e| e.sticky.repeating_flash = None);
    relay(ctx, envelope);
}

fn on_show_picture(ctx: &mut SessionContext, envelope: Envelope<ShowPicture>) {
    let key = envelope.packet.pic_id_hash;
    let Some(frame) = ctx.stamp(envelope) else {
        return;
    };
    let stored = ctx
        .router
        .update_session(ctx.id, |e| e.sticky.show_picture(key, frame.clone()));
    if stored == Some(false) {
        debug!("session {}: picture set full, not caching {}", ctx.id, key);
    }
    ctx.queue_local(&frame);
}

fn on_move_picture(ctx: &mut SessionContext, envelope: Envelope<MovePicture>) {
    let key = envelope.packet.pic_id_hash;
    let Some(frame) = ctx.stamp(envelope) else {
        return;
    };
    ctx.router
        .update_session(ctx.id, |e| e.sticky.move_picture(key, frame.clone()));
    ctx.queue_local(&frame);
}

fn on_erase_picture(ctx: &mut SessionContext, envelope: Envelope<ErasePicture>) {
    let key = envelope.packet.pic_id_hash;
    ctx.router
        .update_session(ctx.id, |e| e.sticky.erase_picture(key));
    relay(ctx, envelope);
}
