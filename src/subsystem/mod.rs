//! Managed Subsystem Facade
//!
//! The coordinator never touches events itself. It steers the host
//! engine's receiver, processor and publisher through these traits.

mod simulated;

pub use simulated::SimulatedEngine;

use std::sync::Arc;

use crate::error::Result;

/// Control surface of the event receiver subsystem
#[async_trait::async_trait]
pub trait ReceiverManagement: Send + Sync {
    /// Accept inbound connections on the given transport address
    async fn start_server(&self, transport: &str) -> Result<()>;

    /// Set the peer that receives duplicate-suppression traffic
    async fn set_peer(&self, transport: &str) -> Result<()>;

    /// Start the receiving loop
    async fn start(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    /// Synchronize duplicate-suppression state with the active node
    async fn sync_state(&self, state: &[u8]) -> Result<()>;

    /// Capture receiver state
    async fn get_state(&self) -> Result<Vec<u8>>;
}

/// Control surface of the event processor subsystem
#[async_trait::async_trait]
pub trait ProcessorManagement: Send + Sync {
    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    /// Capture processor state
    async fn get_state(&self) -> Result<Vec<u8>>;

    /// Replace processor state with a captured one
    async fn restore_state(&self, state: &[u8]) -> Result<()>;
}

/// Control surface of the event publisher subsystem
#[async_trait::async_trait]
pub trait PublisherManagement: Send + Sync {
    /// Drop (true) or emit (false) outbound events
    async fn set_drop(&self, drop: bool) -> Result<()>;
}

/// The three facades of one host engine
#[derive(Clone)]
pub struct EventManagement {
    pub receiver: Arc<dyn ReceiverManagement>,
    pub processor: Arc<dyn ProcessorManagement>,
    pub publisher: Arc<dyn PublisherManagement>,
}

impl EventManagement {
    /// Bundle the three facades
    pub fn new(
        receiver: Arc<dyn ReceiverManagement>,
        processor: Arc<dyn ProcessorManagement>,
        publisher: Arc<dyn PublisherManagement>,
    ) -> Self {
        Self {
            receiver,
            processor,
            publisher,
        }
    }

    /// Pause receiver then processor
    ///
    /// If the processor refuses, the receiver is resumed again so a
    /// failed pause leaves both running.
    pub async fn pause_all(&self) -> Result<()> {
        self.receiver.pause().await?;

        if let Err(e) = self.processor.pause().await {
            if let Err(resume) = self.receiver.resume().await {
                tracing::warn!("Failed to resume receiver after processor pause error: {}", resume);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Resume processor then receiver
    ///
    /// Both resumes are attempted even if the first fails.
    pub async fn resume_all(&self) -> Result<()> {
        let processor = self.processor.resume().await;
        let receiver = self.receiver.resume().await;
        processor.and(receiver)
    }
}
