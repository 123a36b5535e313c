//! # Roomcast Protocol
//!
//! Wire protocol shared by the relay server and its clients. Nothing in this
//! crate performs I/O; it turns packets into bytes and bytes back into typed
//! handler calls.
//!
//! ## Frame Layout
//!
//! ```text
//! [u16 length][u16 marker 0x2828][u8 tag][plaintext fields][u8 encrypted][u16 len][body]
//! ```
//!
//! The length prefix makes frames self-delimiting over a byte stream, so one
//! transport read may carry several frames or only part of one.
//!
//! ## Two-Phase Packets
//!
//! Every packet splits its fields into a plaintext group and a body group.
//! Plaintext fields carry only what the relay needs for routing (player id,
//! room hash, visibility). The body can be sealed with a shared password; a
//! relay that does not know the password forwards the sealed blob verbatim.
//!
//! ## Module Organization
//!
//! - `codec`: checked little-endian field reads and length-prefixed writes
//! - `frame`: frame splitting and stream reassembly
//! - `packet`: the [`Packet`] trait and [`Envelope`] encode/decode
//! - `messages`: every packet type and the [`Visibility`] scopes
//! - `crypto` / `hash`: body encryption and routing hashes
//! - `connection`: tag → handler dispatch and lifecycle notifications
//! - `address`: `host[:port]` parsing
//!
//! ## Usage Example
//!
//! ```rust
//! use shared::messages::Move;
//! use shared::{Connection, Envelope};
//!
//! #[derive(Default)]
//! struct Positions(Vec<(u16, u16)>);
//!
//! fn on_move(ctx: &mut Positions, env: Envelope<Move>) {
//!     ctx.0.push((env.packet.x, env.packet.y));
//! }
//!
//! let mut conn = Connection::new(None);
//! conn.register(on_move);
//!
//! let bytes = conn.encode(Move { id: 1, kind: 0, x: 5, y: 7 }).unwrap();
//! let mut positions = Positions::default();
//! conn.dispatch(&mut positions, bytes).unwrap();
//! assert_eq!(positions.0, vec![(5, 7)]);
//! ```

pub mod address;
pub mod codec;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod hash;
pub mod messages;
pub mod packet;

pub use address::{parse_address, DEFAULT_PORT};
pub use connection::{Connection, SystemMessage};
pub use crypto::CryptKey;
pub use error::{AddressError, CryptoError, ProtocolError, Result};
pub use frame::FrameBuffer;
pub use messages::{PlayerPacket, Visibility};
pub use packet::{encode_packet, Body, Envelope, Packet};

/// Sent by the server before closing a connection it has no room for.
pub const REFUSAL_FULL: &str = "\u{FFFD}1";

/// Sent to every session when the server shuts down.
pub const REFUSAL_STOPPING: &str = "\u{FFFD}0";

/// Recognises one of the refusal payloads at the start of a delivery.
pub fn refusal_kind(data: &[u8]) -> Option<&'static str> {
    [REFUSAL_FULL, REFUSAL_STOPPING]
        .into_iter()
        .find(|r| data.starts_with(r.as_bytes()))
}
