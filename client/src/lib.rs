//! # Roomcast Reference Client
//!
//! This library provides a headless client for the roomcast relay. It speaks
//! the full handshake, keeps a table of the players sharing its room, and
//! exchanges chat lines. It is what the integration tests and the `client`
//! binary drive; a game would plug its own rendering on top of the same
//! pieces.
//!
//! ## Architecture Overview
//!
//! ### Handshake
//! On every (re)connect the client sends its hello (namespace hash, room and
//! name), then its name, then the room it wants to enter. The relay answers
//! the room request with an acknowledgement followed by the state of every
//! player already in that room.
//!
//! ### Room Switching
//! Until the relay acknowledges the current room, join notices are ignored,
//! since they may still belong to the room we just left. An acknowledgement
//! for any other room makes the client ask again.
//!
//! ### Encryption
//! With a shared password every packet body is sealed, and room numbers are
//! replaced by salted hashes. The relay still routes correctly because it only
//! compares the plaintext hashes.
//!
//! ### Reconnecting
//! An unexpected close schedules a single reconnect after a short delay.
//! Quitting, or being refused by the relay, ends the client for good.
//!
//! ## Module Organization
//!
//! ### State Module (`state`)
//! The handler context: peer table, room handshake, outgoing frames and user
//! visible events.
//!
//! ### Network Module (`network`)
//! The async driver: TCP connection, heartbeats, command handling and the
//! reconnect loop.
//!
//! ### Config Module (`config`)
//! Command line options.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::ClientConfig;
//! use client::network::{Client, ClientCommand};
//! use shared::Visibility;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig {
//!         name: "alice".into(),
//!         ..ClientConfig::default()
//!     };
//!     let mut client = Client::new(&config)?;
//!
//!     let (commands_tx, commands) = mpsc::channel(16);
//!     let (events_tx, mut events) = mpsc::unbounded_channel();
//!     tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             println!("{:?}", event);
//!         }
//!     });
//!
//!     commands_tx
//!         .send(ClientCommand::Say(Visibility::Global, "hello".into()))
//!         .await?;
//!     client.run(commands, events_tx).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod network;
pub mod state;

pub use config::ClientConfig;
pub use error::ClientError;
pub use network::{Client, ClientCommand};
pub use state::{client_connection, ClientEvent, ClientState, Peer};
