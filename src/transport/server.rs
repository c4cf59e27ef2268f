//! Management Server
//!
//! TCP server answering snapshot and role requests from peers.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use super::{read_message, write_message, Message};
use crate::coordinator::RoleState;
use crate::error::{Error, Result};

/// Something that can produce this node's snapshot on demand
#[async_trait::async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Capture and encode the current snapshot
    async fn snapshot(&self) -> Result<Vec<u8>>;

    /// Current role of this node
    fn role(&self) -> RoleState;
}

/// Management server for snapshot handoff
pub struct ManagementServer {
    /// Bound listener
    listener: TcpListener,
    /// Snapshot provider
    source: Arc<dyn SnapshotSource>,
    /// Shutdown signal
    shutdown: watch::Sender<bool>,
}

impl ManagementServer {
    /// Bind a new management server
    pub async fn bind(address: &str, source: Arc<dyn SnapshotSource>) -> Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self::from_listener(listener, source))
    }

    /// Wrap an already bound listener
    pub fn from_listener(listener: TcpListener, source: Arc<dyn SnapshotSource>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            listener,
            source,
            shutdown: shutdown_tx,
        }
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until stopped
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Management server listening on {}", self.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let peer_addr = addr.to_string();
                            let source = Arc::clone(&self.source);

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(socket, &peer_addr, source).await {
                                    tracing::warn!("Management connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Management server stopped");
        Ok(())
    }

    /// Stop the server
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Handle a single connection
async fn handle_connection(
    socket: TcpStream,
    peer_addr: &str,
    source: Arc<dyn SnapshotSource>,
) -> Result<()> {
    socket.set_nodelay(true)?;
    let (mut reader, mut writer) = socket.into_split();

    loop {
        let message = match read_message(&mut reader).await {
            Ok(message) => message,
            Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };

        tracing::trace!("Received {} from {}", message.type_name(), peer_addr);

        let response = match message {
            Message::SnapshotRequest => match source.snapshot().await {
                Ok(state) => {
                    tracing::info!("Serving {} byte snapshot to {}", state.len(), peer_addr);
                    Message::SnapshotResponse { state }
                }
                Err(e) => {
                    tracing::warn!("Snapshot request from {} failed: {}", peer_addr, e);
                    Message::Error {
                        message: e.to_string(),
                    }
                }
            },
            Message::RoleRequest => Message::RoleResponse {
                role: source.role(),
            },
            other => Message::Error {
                message: format!("Unsupported request {}", other.type_name()),
            },
        };

        write_message(&mut writer, &response).await?;
    }

    Ok(())
}
