//! # Roomcast Relay Server
//!
//! This library provides the relay half of the roomcast protocol. The server
//! never runs game logic; it assigns ids, remembers the last visible state of
//! each player, and fans packets out to whoever is allowed to see them.
//!
//! ## Core Responsibilities
//!
//! ### Session Tracking
//! Handles the complete lifecycle of client connections including:
//! - Id assignment and capacity enforcement
//! - Namespace, room and private-group membership
//! - Join/leave announcements
//! - Disconnection handling and cleanup
//!
//! ### Relaying
//! Each inbound packet is stamped with the sender's id and forwarded within
//! one of the visibility scopes: the sender's room, the whole namespace, or
//! the sender's private chat group. Encrypted bodies are forwarded verbatim.
//!
//! ### Late-Joiner Replay
//! Position, appearance and open pictures are cached per session, so a client
//! entering a room immediately sees everyone already there.
//!
//! ## Architecture Design
//!
//! ### One Dispatcher Task
//! Connection tasks never write to each other's sockets. They enqueue routing
//! jobs, and a single dispatcher task resolves recipients under the registry
//! lock and pushes bytes into their outbound queues. Delivery order between
//! any two sessions is therefore the order the jobs were enqueued.
//!
//! ### Backpressure
//! Outbound queues are unbounded channels with a shared depth counter. A send
//! that finds a queue too deep is dropped rather than blocking the dispatcher.
//!
//! ## Module Organization
//!
//! ### Router Module (`router`)
//! The registry lock, the job queue and the dispatcher lifecycle
//! (`Stopped → Running → Stopping → Stopped`).
//!
//! ### Registry Module (`registry`)
//! Session ids, routing identity and per-session sticky state.
//!
//! ### Session Module (`session`)
//! The packet handlers run for one connection, plus its local and self
//! batches.
//!
//! ### Network Module (`network`)
//! TCP listeners, per-connection reader and writer tasks, and the idle
//! timeout.
//!
//! ### Supporting Modules
//! - `batch`: byte-budgeted frame batching
//! - `outbound`: per-session send queue with depth limits
//! - `sticky`: cached attributes replayed to late joiners
//! - `config`: command line options
//! - `error`: the [`RouterError`] type
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use clap::Parser;
//! use server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::parse_from(["server", "--bind-address", "127.0.0.1:6500"]);
//!     let server = Server::bind(&config).await?;
//!
//!     // Serves until Ctrl+C, then drains queued jobs and closes every session
//!     server
//!         .run(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod network;
pub mod outbound;
pub mod registry;
pub mod router;
pub mod session;
pub mod sticky;

pub use config::ServerConfig;
pub use error::RouterError;
pub use network::Server;
pub use outbound::{Outbound, OutboundReceiver, Outgoing};
pub use router::{Router, RouterState};
pub use session::{session_connection, SessionContext};
