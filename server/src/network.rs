//! TCP listeners and per-connection tasks.
//!
//! Every accepted socket gets a registry entry, a writer task draining its
//! outbound queue, and a reader loop that feeds the frame buffer and runs the
//! shared handler table. Connections past capacity, or arriving while the
//! router stops, only get a refusal payload.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use shared::{Connection, FrameBuffer, SystemMessage, REFUSAL_FULL, REFUSAL_STOPPING};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::ServerConfig;
use crate::error::RouterError;
use crate::outbound::{Outbound, OutboundReceiver, Outgoing};
use crate::router::Router;
use crate::session::{session_connection, SessionContext};

const READ_BUFFER_SIZE: usize = 4096;

/// How long a refused peer gets to hang up.
const REFUSAL_LINGER: Duration = Duration::from_secs(2);

/// Bound listeners plus the router they feed.
pub struct Server {
    listeners: Vec<TcpListener>,
    router: Router,
    handlers: Arc<Connection<SessionContext>>,
    read_timeout: Option<Duration>,
}

impl Server {
    /// Binds every configured address.
    pub async fn bind(config: &ServerConfig) -> Result<Self, RouterError> {
        let mut listeners = Vec::new();
        for addr in config.listen_addresses()? {
            let listener = TcpListener::bind(&addr).await?;
            info!("listening on {}", listener.local_addr()?);
            listeners.push(listener);
        }

        Ok(Self {
            listeners,
            router: Router::new(config.max_users),
            handlers: Arc::new(session_connection()),
            read_timeout: config.read_timeout(),
        })
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|l| l.local_addr().ok())
            .collect()
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serves until `shutdown` resolves, then stops the router, waits for
    /// it to drain, and closes the listeners.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), RouterError> {
        let dispatcher = self.router.start()?;

        let accept_tasks: Vec<JoinHandle<()>> = self
            .listeners
            .into_iter()
            .map(|listener| {
                tokio::spawn(accept_loop(
                    listener,
                    self.router.clone(),
                    Arc::clone(&self.handlers),
                    self.read_timeout,
                ))
            })
            .collect();

        shutdown.await;
        info!("shutting down");

        for task in &accept_tasks {
            task.abort();
        }
        self.router.stop();
        if let Err(e) = dispatcher.await {
            error!("dispatcher task failed: {}", e);
        }
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    router: Router,
    handlers: Arc<Connection<SessionContext>>,
    read_timeout: Option<Duration>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
        };
        let _ = stream.set_nodelay(true);

        let (outbound, receiver) = Outbound::channel();
        match router.add_session(outbound.clone()) {
            Ok(id) => {
                debug!("session {} from {}", id, addr);
                let ctx = SessionContext::new(id, router.clone(), outbound);
                tokio::spawn(serve_session(
                    stream,
                    ctx,
                    receiver,
                    Arc::clone(&handlers),
                    read_timeout,
                ));
            }
            Err(e) => {
                warn!("refusing {}: {}", addr, e);
                tokio::spawn(refuse(stream, refusal_for(&e)));
            }
        }
    }
}

/// Payload telling a peer why it got no session.
fn refusal_for(error: &RouterError) -> &'static str {
    match error {
        RouterError::Stopping => REFUSAL_STOPPING,
        _ => REFUSAL_FULL,
    }
}

/// Sends the refusal, then reads until the peer hangs up so the payload is
/// not lost to a reset.
async fn refuse(mut stream: TcpStream, payload: &'static str) {
    let _ = stream.write_all(payload.as_bytes()).await;
    let _ = stream.shutdown().await;
    let mut sink = [0u8; 256];
    let _ = timeout(REFUSAL_LINGER, async {
        while let Ok(n) = stream.read(&mut sink).await {
            if n == 0 {
                break;
            }
        }
    })
    .await;
}

/// Runs one session until the peer leaves, goes idle, or the server closes it.
pub async fn serve_session(
    stream: TcpStream,
    mut ctx: SessionContext,
    receiver: OutboundReceiver,
    handlers: Arc<Connection<SessionContext>>,
    read_timeout: Option<Duration>,
) {
    let (mut reader, writer) = stream.into_split();
    let mut writer_task = tokio::spawn(write_loop(writer, receiver));

    handlers.notify(&mut ctx, SystemMessage::Open);
    let mut frames = FrameBuffer::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut writer_done = false;

    loop {
        let read = async {
            match read_timeout {
                Some(limit) => timeout(limit, reader.read(&mut buf)).await.ok(),
                None => Some(reader.read(&mut buf).await),
            }
        };

        let result = tokio::select! {
            result = read => result,
            _ = &mut writer_task => {
                writer_done = true;
                break;
            }
        };

        match result {
            None => {
                info!("session {} timed out", ctx.id());
                break;
            }
            Some(Ok(0)) => break,
            Some(Ok(n)) => {
                if let Some(data) = frames.push(&buf[..n]) {
                    let _ = handlers.dispatch(&mut ctx, data);
                }
            }
            Some(Err(e)) => {
                debug!("session {} read error: {}", ctx.id(), e);
                break;
            }
        }
    }

    handlers.notify(&mut ctx, SystemMessage::Close);
    if !writer_done {
        // The writer ends on its own once the queue is closed.
        ctx.close_outbound();
        let _ = writer_task.await;
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut receiver: OutboundReceiver) {
    while let Some(message) = receiver.recv().await {
        match message {
            Outgoing::Data(data) => {
                if let Err(e) = writer.write_all(&data).await {
                    debug!("write failed: {}", e);
                    break;
                }
            }
            Outgoing::Close => break,
        }
    }
    let _ = writer.shutdown().await;
}
