//! Simulated Engine
//!
//! An in-process stand-in for a host engine's receiver, processor and
//! publisher. It keeps a journal of every control call and a simple
//! event counter as its processor state, which makes handoffs visible
//! in demos and tests.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{EventManagement, ProcessorManagement, PublisherManagement, ReceiverManagement};
use crate::error::{Error, Result};

#[derive(Default)]
struct EngineState {
    journal: Vec<String>,
    processor_state: Vec<u8>,
    receiver_state: Vec<u8>,
    peer: Option<String>,
    started: bool,
    receiver_paused: bool,
    processor_paused: bool,
    dropping: bool,
    emitted: u64,
    fail_restore: bool,
    fail_pause: bool,
    capture_delay: Option<Duration>,
}

/// Simulated host engine
pub struct SimulatedEngine {
    name: String,
    state: Mutex<EngineState>,
}

impl SimulatedEngine {
    /// Create a new simulated engine
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(EngineState::default()),
        })
    }

    /// Facade bundle backed by this engine
    pub fn management(self: &Arc<Self>) -> EventManagement {
        let receiver: Arc<dyn ReceiverManagement> = self.clone();
        let processor: Arc<dyn ProcessorManagement> = self.clone();
        let publisher: Arc<dyn PublisherManagement> = self.clone();
        EventManagement::new(receiver, processor, publisher)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Feed `count` events through the engine
    ///
    /// Events are counted into processor state while the engine runs,
    /// and emitted unless the publisher drops them. Returns the number
    /// of events emitted by this call.
    pub async fn ingest(&self, count: u64) -> u64 {
        let mut state = self.state.lock().await;
        if !state.started || state.receiver_paused || state.processor_paused {
            return 0;
        }

        let total = decode_counter(&state.processor_state) + count;
        state.processor_state = total.to_le_bytes().to_vec();

        if state.dropping {
            0
        } else {
            state.emitted += count;
            count
        }
    }

    /// Events counted by the processor so far
    pub async fn processed(&self) -> u64 {
        decode_counter(&self.state.lock().await.processor_state)
    }

    /// Events emitted by the publisher so far
    pub async fn emitted(&self) -> u64 {
        self.state.lock().await.emitted
    }

    pub async fn journal(&self) -> Vec<String> {
        self.state.lock().await.journal.clone()
    }

    pub async fn processor_state(&self) -> Vec<u8> {
        self.state.lock().await.processor_state.clone()
    }

    pub async fn set_processor_state(&self, bytes: Vec<u8>) {
        self.state.lock().await.processor_state = bytes;
    }

    pub async fn receiver_state(&self) -> Vec<u8> {
        self.state.lock().await.receiver_state.clone()
    }

    pub async fn set_receiver_state(&self, bytes: Vec<u8>) {
        self.state.lock().await.receiver_state = bytes;
    }

    pub async fn peer(&self) -> Option<String> {
        self.state.lock().await.peer.clone()
    }

    pub async fn is_dropping(&self) -> bool {
        self.state.lock().await.dropping
    }

    /// Whether either receiver or processor is paused
    pub async fn is_paused(&self) -> bool {
        let state = self.state.lock().await;
        state.receiver_paused || state.processor_paused
    }

    /// Make processor restores fail
    pub async fn fail_restore(&self, fail: bool) {
        self.state.lock().await.fail_restore = fail;
    }

    /// Make processor pauses fail
    pub async fn fail_pause(&self, fail: bool) {
        self.state.lock().await.fail_pause = fail;
    }

    /// Hold each processor state capture for `delay`
    pub async fn delay_capture(&self, delay: Option<Duration>) {
        self.state.lock().await.capture_delay = delay;
    }

    async fn record(&self, call: String) -> tokio::sync::MutexGuard<'_, EngineState> {
        tracing::trace!("[{}] {}", self.name, call);
        let mut state = self.state.lock().await;
        state.journal.push(call);
        state
    }
}

fn decode_counter(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    u64::from_le_bytes(buf)
}

#[async_trait::async_trait]
impl ReceiverManagement for SimulatedEngine {
    async fn start_server(&self, transport: &str) -> Result<()> {
        self.record(format!("receiver.start_server({})", transport)).await;
        Ok(())
    }

    async fn set_peer(&self, transport: &str) -> Result<()> {
        let mut state = self.record(format!("receiver.set_peer({})", transport)).await;
        state.peer = Some(transport.to_string());
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.record("receiver.start".into()).await.started = true;
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.record("receiver.pause".into()).await.receiver_paused = true;
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.record("receiver.resume".into()).await.receiver_paused = false;
        Ok(())
    }

    async fn sync_state(&self, bytes: &[u8]) -> Result<()> {
        let mut state = self.record(format!("receiver.sync_state({} bytes)", bytes.len())).await;
        state.receiver_state = bytes.to_vec();
        Ok(())
    }

    async fn get_state(&self) -> Result<Vec<u8>> {
        Ok(self.record("receiver.get_state".into()).await.receiver_state.clone())
    }
}

#[async_trait::async_trait]
impl ProcessorManagement for SimulatedEngine {
    async fn pause(&self) -> Result<()> {
        let mut state = self.record("processor.pause".into()).await;
        if state.fail_pause {
            return Err(Error::Subsystem(format!("{}: pause rejected", self.name)));
        }
        state.processor_paused = true;
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.record("processor.resume".into()).await.processor_paused = false;
        Ok(())
    }

    async fn get_state(&self) -> Result<Vec<u8>> {
        let delay = self.state.lock().await.capture_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.record("processor.get_state".into()).await.processor_state.clone())
    }

    async fn restore_state(&self, bytes: &[u8]) -> Result<()> {
        let mut state = self
            .record(format!("processor.restore_state({} bytes)", bytes.len()))
            .await;
        if state.fail_restore {
            return Err(Error::Subsystem(format!("{}: restore rejected", self.name)));
        }
        state.processor_state = bytes.to_vec();
        Ok(())
    }
}

#[async_trait::async_trait]
impl PublisherManagement for SimulatedEngine {
    async fn set_drop(&self, drop: bool) -> Result<()> {
        self.record(format!("publisher.set_drop({})", drop)).await.dropping = drop;
        Ok(())
    }
}
