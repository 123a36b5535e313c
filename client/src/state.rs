//! Client-side view of the relay.
//!
//! [`ClientState`] is the handler context of the client's [`Connection`]. It
//! keeps the peers sharing our room, runs the room switch handshake, and
//! collects the frames and events the driver has to act on after each
//! dispatch.

use std::collections::HashMap;

use bytes::Bytes;
use log::{debug, info, warn};
use shared::hash::{digest32, namespace_hash, num_hash};
use shared::messages::{
    Chat, ClientHello, ErasePicture, Facing, Flash, Heartbeat, Hidden, Join, Jump, Leave,
    Move, MovePicture, Name, RemoveRepeatingFlash, RepeatingFlash, Room, ShowPicture,
    ShowPlayerBattleAnim, SoundEffect, Speed, Sprite, System, Transparency,
};
use shared::{Body, Connection, CryptKey, Envelope, Packet, SystemMessage, Visibility};

/// What we know about another player in our room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Peer {
    pub id: u16,
    pub name: Option<String>,
    pub position: Option<(u16, u16)>,
    pub sprite: Option<(String, i16)>,
    pub system: Option<String>,
}

impl Peer {
    fn new(id: u16) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}

/// Something the user of the client should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The server acknowledged our current room.
    RoomEntered(u16),
    PeerJoined(u16),
    PeerLeft(u16),
    Chat {
        id: u16,
        kind: u8,
        visibility: Visibility,
        name: String,
        message: String,
    },
    /// The server turned us away with one of the refusal payloads.
    Refused(&'static str),
    ReconnectScheduled,
}

/// Handler context of a client connection.
pub struct ClientState {
    key: Option<CryptKey>,
    name: String,
    namespace: u32,
    room_id: u16,
    room_hash: u32,
    room_acked: bool,
    active: bool,
    reconnect_scheduled: bool,
    peers: HashMap<u16, Peer>,
    events: Vec<ClientEvent>,
    outbox: Vec<Bytes>,
}

impl ClientState {
    /// Creates the state for a player called `name` of application
    /// `game_name`, starting in `room_id`.
    pub fn new(name: &str, game_name: &str, room_id: u16, key: Option<CryptKey>) -> Self {
        let namespace = namespace_hash(key.as_ref(), game_name);
        let room_hash = num_hash(key.as_ref(), namespace, room_id as u32);
        Self {
            key,
            name: name.to_string(),
            namespace,
            room_id,
            room_hash,
            room_acked: false,
            active: false,
            reconnect_scheduled: false,
            peers: HashMap::new(),
            events: Vec::new(),
            outbox: Vec::new(),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> u32 {
        self.namespace
    }

    pub fn room_id(&self) -> u16 {
        self.room_id
    }

    pub fn room_hash(&self) -> u32 {
        self.room_hash
    }

    /// True once the server has acknowledged the current room.
    pub fn is_room_acked(&self) -> bool {
        self.room_acked
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn peer(&self, id: u16) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn take_events(&mut self) -> Vec<ClientEvent> {
        std::mem::take(&mut self.events)
    }

    /// Frames queued for the server since the last call.
    pub fn take_outbox(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.outbox)
    }

    /// Consumes a pending reconnect request. Further closes can schedule a
    /// new one only after this.
    pub fn take_reconnect(&mut self) -> bool {
        std::mem::take(&mut self.reconnect_scheduled)
    }

    pub fn record(&mut self, event: ClientEvent) {
        self.events.push(event);
    }

    /// Moves to another room and asks the server to confirm it.
    pub fn switch_room(&mut self, room_id: u16) {
        self.room_id = room_id;
        self.room_hash = num_hash(self.key.as_ref(), self.namespace, room_id as u32);
        self.room_acked = false;
        self.peers.clear();
        self.queue(self.room_packet());
    }

    /// Queues a chat line for `visibility`.
    pub fn say(&mut self, visibility: Visibility, message: &str) {
        let chat = Chat {
            kind: 1,
            visibility: visibility as u8,
            room_id: self.room_id,
            name: self.name.clone(),
            message: message.to_string(),
            ..Chat::default()
        };
        self.queue(chat);
    }

    /// Registers our private chat group, derived from `password`.
    pub fn join_chat_group(&mut self, password: &str) {
        let group = digest32(&[&b"chat-group"[..], password.as_bytes()]).max(1);
        let chat = Chat {
            kind: 1,
            visibility: Visibility::Crypt as u8,
            crypt_key_hash: group,
            ..Chat::default()
        };
        self.queue(chat);
    }

    pub fn heartbeat(&mut self) {
        self.queue(Heartbeat::default());
    }

    fn room_packet(&self) -> Room {
        Room {
            room_id: if self.is_encrypted() { 0 } else { self.room_id },
            room_hash: self.room_hash,
        }
    }

    fn queue<P: Packet>(&mut self, packet: P) {
        match Envelope::new(packet).encode(self.key.as_ref()) {
            Ok(frame) => self.outbox.push(frame),
            Err(e) => warn!("cannot encode packet 0x{:02x}: {}", P::TAG, e),
        }
    }

    /// Peer entry for `id`, only while our room is confirmed.
    fn known_peer(&mut self, id: u16) -> Option<&mut Peer> {
        if !self.room_acked {
            return None;
        }
        self.peers.get_mut(&id)
    }
}

fn readable<P: Packet>(envelope: &Envelope<P>) -> bool {
    matches!(envelope.body(), Body::Clear)
}

/// Builds the handler table of a client.
pub fn client_connection(key: Option<CryptKey>) -> Connection<ClientState> {
    let mut conn = Connection::new(key);
    conn.register(on_heartbeat);
    conn.register(on_room);
    conn.register(on_join);
    conn.register(on_leave);
    conn.register(on_name);
    conn.register(on_chat);
    conn.register(on_move);
    conn.register(on_sprite);
    conn.register(on_system);
    conn.register(ignore::<Jump>);
    conn.register(ignore::<Facing>);
    conn.register(ignore::<Speed>);
    conn.register(ignore::<Flash>);
    conn.register(ignore::<RepeatingFlash>);
    conn.register(ignore::<RemoveRepeatingFlash>);
    conn.register(ignore::<Hidden>);
    conn.register(ignore::<SoundEffect>);
    conn.register(ignore::<ShowPicture>);
    conn.register(ignore::<MovePicture>);
    conn.register(ignore::<ErasePicture>);
    conn.register(ignore::<ShowPlayerBattleAnim>);
    conn.register(ignore::<Transparency>);

    conn.register_system(SystemMessage::Open, on_open);
    conn.register_system(SystemMessage::Close, on_close);
    conn.register_system(SystemMessage::Terminated, on_terminated);
    conn
}

fn on_open(state: &mut ClientState) {
    state.active = true;
    state.room_acked = false;
    state.peers.clear();

    let hello = ClientHello {
        namespace_hash: state.namespace,
        room_id: if state.is_encrypted() { 0 } else { state.room_id },
        name: state.name.clone(),
    };
    state.queue(hello);
    state.queue(Name {
        id: 0,
        name: state.name.clone(),
    });
    state.queue(state.room_packet());
}

fn on_close(state: &mut ClientState) {
    state.peers.clear();
    state.room_acked = false;
    if state.active && !state.reconnect_scheduled {
        state.reconnect_scheduled = true;
        state.events.push(ClientEvent::ReconnectScheduled);
    }
}

fn on_terminated(state: &mut ClientState) {
    state.active = false;
    state.reconnect_scheduled = false;
}

fn on_heartbeat(_state: &mut ClientState, _envelope: Envelope<Heartbeat>) {
    debug!("heartbeat");
}

fn on_room(state: &mut ClientState, envelope: Envelope<Room>) {
    if envelope.packet.room_hash != state.room_hash {
        debug!("stale room ack, resending room {}", state.room_id);
        state.queue(state.room_packet());
        return;
    }
    if !state.room_acked {
        state.room_acked = true;
        state.events.push(ClientEvent::RoomEntered(state.room_id));
    }
}

fn on_join(state: &mut ClientState, envelope: Envelope<Join>) {
    let id = envelope.packet.id;
    if !state.room_acked {
        debug!("ignoring join of {} during room switch", id);
        return;
    }
    if !state.peers.contains_key(&id) {
        state.peers.insert(id, Peer::new(id));
        state.events.push(ClientEvent::PeerJoined(id));
    }
}

fn on_leave(state: &mut ClientState, envelope: Envelope<Leave>) {
    let id = envelope.packet.id;
    if state.peers.remove(&id).is_some() {
        state.events.push(ClientEvent::PeerLeft(id));
    }
}

fn on_name(state: &mut ClientState, envelope: Envelope<Name>) {
    if !readable(&envelope) {
        return;
    }
    let Name { id, name } = envelope.packet;
    if let Some(peer) = state.known_peer(id) {
        peer.name = Some(name);
    }
}

fn on_move(state: &mut ClientState, envelope: Envelope<Move>) {
    if !readable(&envelope) {
        return;
    }
    let Move { id, x, y, .. } = envelope.packet;
    if let Some(peer) = state.known_peer(id) {
        peer.position = Some((x, y));
    }
}

fn on_sprite(state: &mut ClientState, envelope: Envelope<Sprite>) {
    if !readable(&envelope) {
        return;
    }
    let Sprite { id, name, index } = envelope.packet;
    if let Some(peer) = state.known_peer(id) {
        peer.sprite = Some((name, index));
    }
}

fn on_system(state: &mut ClientState, envelope: Envelope<System>) {
    if !readable(&envelope) {
        return;
    }
    let System { id, name } = envelope.packet;
    if let Some(peer) = state.known_peer(id) {
        peer.system = Some(name);
    }
}

fn on_chat(state: &mut ClientState, envelope: Envelope<Chat>) {
    if !readable(&envelope) {
        return;
    }
    let chat = envelope.packet;
    let visibility = Visibility::from_u8(chat.visibility).unwrap_or_default();
    if chat.kind == 0 {
        info!("{}", chat.message);
    } else {
        info!("[{}] {}: {}", visibility.name(), chat.name, chat.message);
    }
    state.events.push(ClientEvent::Chat {
        id: chat.id,
        kind: chat.kind,
        visibility,
        name: chat.name,
        message: chat.message,
    });
}

fn ignore<P: Packet>(_state: &mut ClientState, _envelope: Envelope<P>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::encode_packet;
    use shared::frame::{next_frame, read_header};

    fn tags(frames: &[Bytes]) -> Vec<u8> {
        frames
            .iter()
            .map(|frame| {
                let mut stream = frame.clone();
                let mut inner = next_frame(&mut stream).unwrap().unwrap();
                read_header(&mut inner).unwrap().tag
            })
            .collect()
    }

    fn frame<P: Packet>(packet: P) -> Bytes {
        encode_packet(packet, None).unwrap()
    }

    fn joined_state() -> (Connection<ClientState>, ClientState) {
        let conn = client_connection(None);
        let mut state = ClientState::new("alice", "game", 3, None);
        conn.notify(&mut state, SystemMessage::Open);
        state.take_outbox();
        let ack = frame(Room {
            room_id: 3,
            room_hash: state.room_hash(),
        });
        conn.dispatch(&mut state, ack).unwrap();
        state.take_events();
        (conn, state)
    }

    #[test]
    fn test_open_sends_hello_name_room() {
        let conn = client_connection(None);
        let mut state = ClientState::new("alice", "game", 3, None);
        conn.notify(&mut state, SystemMessage::Open);

        let out = state.take_outbox();
        assert_eq!(
            tags(&out),
            vec![ClientHello::TAG, Name::TAG, Room::TAG]
        );
        assert!(state.is_active());
        assert_eq!(state.room_hash(), 3);
    }

    #[test]
    fn test_encrypted_room_id_is_hidden() {
        let key = CryptKey::derive("secret").unwrap();
        let conn = client_connection(Some(key.clone()));
        let mut state = ClientState::new("alice", "game", 3, Some(key.clone()));
        conn.notify(&mut state, SystemMessage::Open);

        let out = state.take_outbox();
        let mut stream = out[2].clone();
        let mut inner = next_frame(&mut stream).unwrap().unwrap();
        read_header(&mut inner).unwrap();
        let room = Envelope::<Room>::decode(&mut inner, None).unwrap().packet;
        assert_eq!(room.room_id, 0);
        assert_eq!(room.room_hash, num_hash(Some(&key), state.namespace(), 3));
        assert_ne!(room.room_hash, 3);
    }

    #[test]
    fn test_joins_ignored_until_room_ack() {
        let conn = client_connection(None);
        let mut state = ClientState::new("alice", "game", 3, None);
        conn.notify(&mut state, SystemMessage::Open);

        conn.dispatch(&mut state, frame(Join { id: 11 })).unwrap();
        assert_eq!(state.peer_count(), 0);

        conn.dispatch(&mut state, frame(Room { room_id: 3, room_hash: 3 }))
            .unwrap();
        conn.dispatch(&mut state, frame(Join { id: 11 })).unwrap();
        assert!(state.peer(11).is_some());
        assert_eq!(
            state.take_events(),
            vec![ClientEvent::RoomEntered(3), ClientEvent::PeerJoined(11)]
        );
    }

    #[test]
    fn test_mismatched_ack_resends_room() {
        let (conn, mut state) = joined_state();
        state.switch_room(4);
        assert_eq!(tags(&state.take_outbox()), vec![Room::TAG]);

        // Ack of the room we just left.
        conn.dispatch(&mut state, frame(Room { room_id: 3, room_hash: 3 }))
            .unwrap();
        assert!(!state.is_room_acked());
        assert_eq!(tags(&state.take_outbox()), vec![Room::TAG]);

        conn.dispatch(&mut state, frame(Room { room_id: 4, room_hash: 4 }))
            .unwrap();
        assert!(state.is_room_acked());
        assert!(state.take_outbox().is_empty());
    }

    #[test]
    fn test_peer_table_tracks_sticky_fields() {
        let (conn, mut state) = joined_state();
        let mut batch = Vec::new();
        batch.extend_from_slice(&frame(Join { id: 11 }));
        batch.extend_from_slice(&frame(Name {
            id: 11,
            name: "bob".into(),
        }));
        batch.extend_from_slice(&frame(Move {
            id: 11,
            kind: 0,
            x: 5,
            y: 7,
        }));
        batch.extend_from_slice(&frame(Sprite {
            id: 11,
            name: "hero".into(),
            index: 2,
        }));
        batch.extend_from_slice(&frame(Jump { id: 11, x: 5, y: 8 }));
        batch.extend_from_slice(&frame(System {
            id: 11,
            name: "blue".into(),
        }));
        assert_eq!(conn.dispatch(&mut state, Bytes::from(batch)).unwrap(), 6);

        let peer = state.peer(11).unwrap();
        assert_eq!(peer.name.as_deref(), Some("bob"));
        assert_eq!(peer.position, Some((5, 7)));
        assert_eq!(peer.sprite, Some(("hero".to_string(), 2)));
        assert_eq!(peer.system.as_deref(), Some("blue"));

        conn.dispatch(&mut state, frame(Leave { id: 11 })).unwrap();
        assert!(state.peer(11).is_none());
        assert_eq!(
            state.take_events(),
            vec![ClientEvent::PeerJoined(11), ClientEvent::PeerLeft(11)]
        );
    }

    #[test]
    fn test_dropped_bodies_are_ignored() {
        let k1 = CryptKey::derive("k1").unwrap();
        let k2 = CryptKey::derive("k2").unwrap();
        let conn = client_connection(Some(k1.clone()));
        let mut state = ClientState::new("alice", "game", 3, Some(k1));
        conn.notify(&mut state, SystemMessage::Open);
        let ack = frame(Room {
            room_id: 0,
            room_hash: state.room_hash(),
        });
        conn.dispatch(&mut state, ack).unwrap();
        conn.dispatch(&mut state, frame(Join { id: 11 })).unwrap();

        let foreign = encode_packet(
            Name {
                id: 11,
                name: "eve".into(),
            },
            Some(&k2),
        )
        .unwrap();
        conn.dispatch(&mut state, foreign).unwrap();
        assert_eq!(state.peer(11).unwrap().name, None);
    }

    #[test]
    fn test_chat_and_server_info_lines() {
        let (conn, mut state) = joined_state();
        let info = frame(Chat {
            id: 12,
            kind: 0,
            visibility: Visibility::Global as u8,
            message: "*** id:12 joined the server.".into(),
            ..Chat::default()
        });
        conn.dispatch(&mut state, info).unwrap();

        let events = state.take_events();
        assert_eq!(
            events,
            vec![ClientEvent::Chat {
                id: 12,
                kind: 0,
                visibility: Visibility::Global,
                name: String::new(),
                message: "*** id:12 joined the server.".into(),
            }]
        );
    }

    #[test]
    fn test_close_schedules_one_reconnect() {
        let (conn, mut state) = joined_state();
        conn.notify(&mut state, SystemMessage::Close);
        conn.notify(&mut state, SystemMessage::Close);
        assert_eq!(state.take_events(), vec![ClientEvent::ReconnectScheduled]);
        assert!(state.take_reconnect());
        assert!(!state.take_reconnect());
    }

    #[test]
    fn test_terminated_close_does_not_reconnect() {
        let (conn, mut state) = joined_state();
        conn.notify(&mut state, SystemMessage::Terminated);
        conn.notify(&mut state, SystemMessage::Close);
        assert!(!state.is_active());
        assert!(!state.take_reconnect());
        assert!(state.take_events().is_empty());
    }

    #[test]
    fn test_chat_group_hash_is_nonzero() {
        let mut state = ClientState::new("alice", "game", 3, None);
        state.join_chat_group("friends");
        state.say(Visibility::Crypt, "hi");

        let out = state.take_outbox();
        let decode = |frame: &Bytes| {
            let mut stream = frame.clone();
            let mut inner = next_frame(&mut stream).unwrap().unwrap();
            read_header(&mut inner).unwrap();
            Envelope::<Chat>::decode(&mut inner, None).unwrap().packet
        };
        assert_ne!(decode(&out[0]).crypt_key_hash, 0);
        assert_eq!(decode(&out[1]).crypt_key_hash, 0);
        assert_eq!(decode(&out[1]).message, "hi");
    }
}
