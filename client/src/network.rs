//! Connection driver.
//!
//! Dials the relay, keeps the session alive with heartbeats, pumps frames
//! through the client's [`Connection`], and reconnects after an unexpected
//! close for as long as the client stays active.

use std::time::Duration;

use log::{debug, info, warn};
use shared::address::{join_host_port, parse_address, DEFAULT_PORT};
use shared::{
    Connection, CryptKey, FrameBuffer, SystemMessage, Visibility, REFUSAL_FULL,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::state::{client_connection, ClientEvent, ClientState};

/// Interval between heartbeats while connected.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(3);

/// Delay before dialing again after an unexpected close.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

const READ_BUFFER_SIZE: usize = 4096;

/// Requests from the user of the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Say(Visibility, String),
    JoinChatGroup(String),
    SwitchRoom(u16),
    Quit,
}

impl ClientCommand {
    /// Parses one line of user input. Plain text is a local chat line.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Some(ClientCommand::Say(Visibility::Local, line.to_string()));
        };

        let (verb, arg) = match rest.split_once(' ') {
            Some((verb, arg)) => (verb, arg.trim()),
            None => (rest, ""),
        };
        match verb {
            "quit" | "q" => Some(ClientCommand::Quit),
            "room" | "r" => arg.parse().ok().map(ClientCommand::SwitchRoom),
            "global" | "g" if !arg.is_empty() => {
                Some(ClientCommand::Say(Visibility::Global, arg.to_string()))
            }
            "crypt" | "c" if !arg.is_empty() => {
                Some(ClientCommand::Say(Visibility::Crypt, arg.to_string()))
            }
            "group" if !arg.is_empty() => Some(ClientCommand::JoinChatGroup(arg.to_string())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Closed,
    Refused(&'static str),
    Quit,
}

/// Human readable form of a refusal payload.
pub fn describe_refusal(kind: &str) -> &'static str {
    match kind {
        REFUSAL_FULL => "server is full",
        _ => "server is shutting down",
    }
}

pub struct Client {
    address: String,
    connection: Connection<ClientState>,
    state: ClientState,
    heartbeats: bool,
}

impl Client {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let (host, port) = parse_address(&config.server, DEFAULT_PORT)?;
        let key = CryptKey::from_config(&config.crypt_key)?;
        let state = ClientState::new(&config.name, &config.game_name, config.room, key.clone());

        Ok(Self {
            address: join_host_port(&host, port),
            connection: client_connection(key),
            state,
            heartbeats: !config.no_heartbeats,
        })
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    /// Runs until the user quits, the server refuses us, or a close happens
    /// while no reconnect is wanted.
    ///
    /// Failing to reach the server on the first attempt is an error; later
    /// failures count as closes and are retried.
    pub async fn run(
        &mut self,
        mut commands: mpsc::Receiver<ClientCommand>,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Result<(), ClientError> {
        let mut first_attempt = true;
        loop {
            let end = match TcpStream::connect(self.address.as_str()).await {
                Ok(stream) => {
                    info!("connected to {}", self.address);
                    self.session(stream, &mut commands, &events).await
                }
                Err(e) if first_attempt => return Err(e.into()),
                Err(e) => {
                    warn!("cannot reach {}: {}", self.address, e);
                    self.connection.notify(&mut self.state, SystemMessage::Close);
                    SessionEnd::Closed
                }
            };
            first_attempt = false;

            if let SessionEnd::Refused(kind) = end {
                warn!("connection refused: {}", describe_refusal(kind));
                self.state.record(ClientEvent::Refused(kind));
            }
            self.forward(&events);

            if end != SessionEnd::Closed || !self.state.take_reconnect() {
                return Ok(());
            }
            info!("reconnecting in {}s", RECONNECT_DELAY.as_secs());
            sleep(RECONNECT_DELAY).await;
        }
    }

    async fn session(
        &mut self,
        stream: TcpStream,
        commands: &mut mpsc::Receiver<ClientCommand>,
        events: &mpsc::UnboundedSender<ClientEvent>,
    ) -> SessionEnd {
        let _ = stream.set_nodelay(true);
        let (mut reader, mut writer) = stream.into_split();
        let mut frames = FrameBuffer::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut heartbeat = interval_at(Instant::now() + HEARTBEAT_PERIOD, HEARTBEAT_PERIOD);

        self.connection.notify(&mut self.state, SystemMessage::Open);
        let end = loop {
            if let Err(e) = self.flush(&mut writer).await {
                debug!("write failed: {}", e);
                break SessionEnd::Closed;
            }
            self.forward(events);

            tokio::select! {
                read = reader.read(&mut buf) => match read {
                    Ok(0) => break SessionEnd::Closed,
                    Ok(n) => {
                        if let Some(batch) = frames.push(&buf[..n]) {
                            let _ = self.connection.dispatch(&mut self.state, batch);
                        }
                        if let Some(kind) = frames.refusal() {
                            break SessionEnd::Refused(kind);
                        }
                    }
                    Err(e) => {
                        debug!("read failed: {}", e);
                        break SessionEnd::Closed;
                    }
                },
                _ = heartbeat.tick(), if self.heartbeats => self.state.heartbeat(),
                command = commands.recv() => match command {
                    Some(ClientCommand::Say(visibility, message)) => {
                        self.state.say(visibility, &message)
                    }
                    Some(ClientCommand::JoinChatGroup(password)) => {
                        self.state.join_chat_group(&password)
                    }
                    Some(ClientCommand::SwitchRoom(room)) => self.state.switch_room(room),
                    Some(ClientCommand::Quit) | None => break SessionEnd::Quit,
                },
            }
        };

        match end {
            SessionEnd::Closed => {
                info!("disconnected from {}", self.address);
                self.connection.notify(&mut self.state, SystemMessage::Close);
            }
            SessionEnd::Refused(_) | SessionEnd::Quit => {
                self.connection
                    .notify(&mut self.state, SystemMessage::Terminated);
            }
        }
        let _ = writer.shutdown().await;
        end
    }

    async fn flush(&mut self, writer: &mut OwnedWriteHalf) -> std::io::Result<()> {
        for frame in self.state.take_outbox() {
            writer.write_all(&frame).await?;
        }
        Ok(())
    }

    fn forward(&mut self, events: &mpsc::UnboundedSender<ClientEvent>) {
        for event in self.state.take_events() {
            let _ = events.send(event);
        }
    }
}
