//! Inbound transport abstraction
//!
//! The transport is an at-least-once channel with per-message acknowledgment.
//! The pipeline acks every delivery once it has been processed, whether the
//! record was accepted or rejected.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One message as handed over by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Transport-assigned id, used for acknowledgment
    pub id: u64,
    pub payload: Vec<u8>,
}

impl Delivery {
    pub fn new(id: u64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }
}

#[derive(Debug)]
pub enum TransportError {
    Receive(String),
    Ack { id: u64, reason: String },
    Closed,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Receive(msg) => write!(f, "Receive failed: {}", msg),
            TransportError::Ack { id, reason } => {
                write!(f, "Ack of message {} failed: {}", id, reason)
            }
            TransportError::Closed => write!(f, "Transport closed"),
        }
    }
}

impl std::error::Error for TransportError {}

#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next delivery; `Ok(None)` once the upstream is exhausted
    async fn recv(&mut self) -> Result<Option<Delivery>, TransportError>;

    /// Acknowledge a processed delivery so it is not redelivered
    async fn ack(&mut self, id: u64) -> Result<(), TransportError>;

    /// Stop accepting deliveries and release the subscription
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Deliveries waiting to be received, if the transport can tell
    fn pending(&self) -> Option<usize> {
        None
    }
}

/// Bounded work queue in front of one consumer loop
///
/// Producers (the replay feed, a subscriber client) push `Delivery` values
/// into the paired `mpsc::Sender`. Acks are counted and optionally forwarded
/// upstream.
pub struct ChannelSource {
    rx: mpsc::Receiver<Delivery>,
    acked: Arc<AtomicU64>,
    ack_tx: Option<mpsc::UnboundedSender<u64>>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<Delivery>) -> Self {
        Self {
            rx,
            acked: Arc::new(AtomicU64::new(0)),
            ack_tx: None,
        }
    }

    /// Create a bounded channel and the source reading from it
    pub fn channel(capacity: usize) -> (mpsc::Sender<Delivery>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(rx))
    }

    /// Forward every acked id to `ack_tx`
    pub fn with_ack_forwarding(mut self, ack_tx: mpsc::UnboundedSender<u64>) -> Self {
        self.ack_tx = Some(ack_tx);
        self
    }

    /// Shared counter of acknowledged deliveries
    pub fn ack_counter(&self) -> Arc<AtomicU64> {
        self.acked.clone()
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn recv(&mut self) -> Result<Option<Delivery>, TransportError> {
        Ok(self.rx.recv().await)
    }

    async fn ack(&mut self, id: u64) -> Result<(), TransportError> {
        if let Some(ack_tx) = &self.ack_tx {
            ack_tx.send(id).map_err(|_| TransportError::Ack {
                id,
                reason: "ack receiver dropped".to_string(),
            })?;
        }
        self.acked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.rx.close();
        Ok(())
    }

    fn pending(&self) -> Option<usize> {
        Some(self.rx.len())
    }
}
