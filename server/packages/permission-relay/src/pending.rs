use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::oneshot;
use utoipa::ToSchema;

use crate::protocol::{Decision, WindowTarget};

#[derive(Debug, Clone, PartialEq)]
pub struct PermissionRequest {
    pub id: String,
    pub tool_name: String,
    pub tool_input: Map<String, Value>,
    pub target: Option<WindowTarget>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PendingError {
    #[error("pending request table is full ({limit} in flight)")]
    Full { limit: usize },
}

/// Outcome of a resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Resolved,
    NotFound,
}

/// Handle returned to the waiter that registered a request.
#[derive(Debug)]
pub struct PendingTicket {
    pub id: String,
    ticket: u64,
    receiver: oneshot::Receiver<Decision>,
}

impl PendingTicket {
    pub(crate) fn into_parts(self) -> (String, u64, oneshot::Receiver<Decision>) {
        (self.id, self.ticket, self.receiver)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PendingRequestInfo {
    pub id: String,
    pub tool_name: String,
    #[schema(value_type = Object)]
    pub tool_input: Map<String, Value>,
    pub target: Option<WindowTarget>,
    pub age_ms: u64,
}

#[derive(Debug)]
struct PendingEntry {
    request: PermissionRequest,
    ticket: u64,
    created_at: Instant,
    completion: oneshot::Sender<Decision>,
}

/// In-flight permission requests keyed by request id. Each entry owns the
/// sending half of a oneshot channel, so an entry can complete at most once:
/// resolving removes it, and later resolutions of the same id find nothing.
#[derive(Debug)]
pub struct PendingRequestTable {
    entries: Mutex<HashMap<String, PendingEntry>>,
    next_ticket: AtomicU64,
    limit: Option<usize>,
}

impl PendingRequestTable {
    /// `limit` of `None` leaves the table unbounded.
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
            limit,
        }
    }

    pub fn insert(&self, request: PermissionRequest) -> Result<PendingTicket, PendingError> {
        let mut entries = self.lock();
        if let Some(limit) = self.limit {
            if entries.len() >= limit && !entries.contains_key(&request.id) {
                return Err(PendingError::Full { limit });
            }
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (completion, receiver) = oneshot::channel();
        let id = request.id.clone();
        let previous = entries.insert(
            id.clone(),
            PendingEntry {
                request,
                ticket,
                created_at: Instant::now(),
                completion,
            },
        );
        if previous.is_some() {
            // The displaced waiter sees its sender dropped and fails closed.
            tracing::warn!(id = %id, "pending: request id reused while still in flight");
        }

        Ok(PendingTicket {
            id,
            ticket,
            receiver,
        })
    }

    /// Completes the request `id` with `decision` and removes it.
    pub fn resolve(&self, id: &str, decision: Decision) -> Resolution {
        let entry = self.lock().remove(id);
        let Some(entry) = entry else {
            return Resolution::NotFound;
        };
        if entry.completion.send(decision).is_err() {
            // Waiter already timed out; nothing observed this decision.
            tracing::debug!(id = %id, "pending: waiter dropped before resolution");
            return Resolution::NotFound;
        }
        Resolution::Resolved
    }

    /// Removes the entry registered under `ticket`, if it is still present.
    /// A newer request that reused the id is left alone.
    pub(crate) fn discard(&self, id: &str, ticket: u64) -> bool {
        let mut entries = self.lock();
        match entries.get(id) {
            Some(entry) if entry.ticket == ticket => {
                entries.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Outstanding requests, oldest first.
    pub fn list(&self) -> Vec<PendingRequestInfo> {
        let entries = self.lock();
        let mut items: Vec<(Instant, PendingRequestInfo)> = entries
            .values()
            .map(|entry| {
                (
                    entry.created_at,
                    PendingRequestInfo {
                        id: entry.request.id.clone(),
                        tool_name: entry.request.tool_name.clone(),
                        tool_input: entry.request.tool_input.clone(),
                        target: entry.request.target.clone(),
                        age_ms: entry.created_at.elapsed().as_millis() as u64,
                    },
                )
            })
            .collect();
        items.sort_by_key(|(created_at, _)| *created_at);
        items.into_iter().map(|(_, info)| info).collect()
    }

    /// Drops every entry; their waiters observe a closed channel.
    pub fn drain(&self) -> usize {
        let mut entries = self.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
