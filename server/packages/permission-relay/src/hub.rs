use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::protocol::ServerEvent;

pub const DEFAULT_OUTBOUND_QUEUE: usize = 512;

pub type ConnectionId = u64;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HubError {
    #[error("no client connected")]
    NoClient,
    #[error("connection {0} is no longer current")]
    Superseded(ConnectionId),
    #[error("client connection {0} closed")]
    Closed(ConnectionId),
    #[error("outbound queue for connection {0} is full")]
    Backpressure(ConnectionId),
}

/// Receiving side handed to the transport task of a newly registered client.
#[derive(Debug)]
pub struct ClientConnection {
    pub id: ConnectionId,
    pub events: mpsc::Receiver<ServerEvent>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub attempted: u64,
    pub delivered: u64,
    pub failed: u64,
}

#[derive(Debug)]
struct ClientSlot {
    id: ConnectionId,
    sender: mpsc::Sender<ServerEvent>,
}

/// Capacity-one connection slot. Registering a new client replaces the
/// previous one, whose event channel closes as its sender is dropped.
#[derive(Debug)]
pub struct ClientHub {
    slot: Mutex<Option<ClientSlot>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    attempted: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl ClientHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            slot: Mutex::new(None),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
            attempted: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub async fn register(&self) -> ClientConnection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, events) = mpsc::channel(self.queue_capacity);
        let previous = self.slot.lock().await.replace(ClientSlot { id, sender });
        if let Some(previous) = previous {
            tracing::info!(
                connection = id,
                superseded = previous.id,
                "hub: client connection superseded"
            );
        } else {
            tracing::info!(connection = id, "hub: client connected");
        }
        ClientConnection { id, events }
    }

    /// Clears the slot if `id` still owns it.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().map(|current| current.id) == Some(id) {
            *slot = None;
            tracing::info!(connection = id, "hub: client disconnected");
            true
        } else {
            false
        }
    }

    pub async fn clear(&self) {
        self.slot.lock().await.take();
    }

    pub async fn is_connected(&self) -> bool {
        match self.slot.lock().await.as_ref() {
            Some(current) => !current.sender.is_closed(),
            None => false,
        }
    }

    pub async fn current_id(&self) -> Option<ConnectionId> {
        self.slot.lock().await.as_ref().map(|current| current.id)
    }

    /// Sends `event` to the current client without waiting on the transport.
    pub async fn broadcast(&self, event: ServerEvent) -> Result<(), HubError> {
        self.deliver(None, event).await
    }

    /// Like [`broadcast`](Self::broadcast) but only if `id` is still current.
    pub async fn send_to(&self, id: ConnectionId, event: ServerEvent) -> Result<(), HubError> {
        self.deliver(Some(id), event).await
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            attempted: self.attempted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    async fn deliver(
        &self,
        only: Option<ConnectionId>,
        event: ServerEvent,
    ) -> Result<(), HubError> {
        self.attempted.fetch_add(1, Ordering::Relaxed);
        let kind = event.kind();
        let mut slot = self.slot.lock().await;
        let result = match (slot.as_ref(), only) {
            (None, _) => Err(HubError::NoClient),
            (Some(current), Some(id)) if id != current.id => Err(HubError::Superseded(id)),
            (Some(current), _) => match current.sender.try_send(event) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(_)) => Err(HubError::Backpressure(current.id)),
                Err(mpsc::error::TrySendError::Closed(_)) => Err(HubError::Closed(current.id)),
            },
        };

        match result {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(HubError::Closed(id)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                // A closed channel means the transport task is gone.
                *slot = None;
                tracing::debug!(connection = id, kind, "hub: send failed, dropping connection");
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(kind, error = %err, "hub: event not delivered");
            }
        }
        result
    }
}

impl Default for ClientHub {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOUND_QUEUE)
    }
}
