//! Snapshot Client
//!
//! Fetches the active node's snapshot from its management endpoint.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{read_message, write_message, Message};
use crate::coordinator::RoleState;
use crate::error::{Error, Result};

/// Fetches an opaque snapshot from a management endpoint
#[async_trait::async_trait]
pub trait SnapshotClient: Send + Sync {
    /// Fetch the encoded snapshot served at `management`
    async fn fetch_snapshot(&self, management: &str) -> Result<Vec<u8>>;
}

/// TCP implementation of [`SnapshotClient`]
#[derive(Debug, Clone)]
pub struct TcpSnapshotClient {
    /// Connection timeout
    connect_timeout: Duration,
    /// Request timeout (covers connect, request and response)
    request_timeout: Duration,
}

impl TcpSnapshotClient {
    /// Create a new snapshot client
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }

    /// Ask a node for its current role
    pub async fn query_role(&self, address: &str) -> Result<RoleState> {
        match self.request(address, Message::RoleRequest).await? {
            Message::RoleResponse { role } => Ok(role),
            Message::Error { message } => Err(Error::Network(message)),
            other => Err(Error::Network(format!(
                "Unexpected {} from {}",
                other.type_name(),
                address
            ))),
        }
    }

    /// Send one request and wait for its response
    async fn request(&self, address: &str, message: Message) -> Result<Message> {
        let result = timeout(self.request_timeout, async {
            let mut stream = self.connect(address).await?;
            let (mut reader, mut writer) = stream.split();
            write_message(&mut writer, &message).await?;
            read_message(&mut reader).await
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }

    /// Connect to an address
    async fn connect(&self, address: &str) -> Result<TcpStream> {
        let result = timeout(self.connect_timeout, TcpStream::connect(address)).await;

        match result {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(Error::ConnectionFailed {
                address: address.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }
}

impl Default for TcpSnapshotClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(30))
    }
}

#[async_trait::async_trait]
impl SnapshotClient for TcpSnapshotClient {
    async fn fetch_snapshot(&self, management: &str) -> Result<Vec<u8>> {
        tracing::debug!("Requesting snapshot from {}", management);

        match self.request(management, Message::SnapshotRequest).await? {
            Message::SnapshotResponse { state } => Ok(state),
            Message::Error { message } => Err(Error::SnapshotFetch {
                endpoint: management.to_string(),
                reason: message,
            }),
            other => Err(Error::SnapshotFetch {
                endpoint: management.to_string(),
                reason: format!("unexpected {} response", other.type_name()),
            }),
        }
    }
}
