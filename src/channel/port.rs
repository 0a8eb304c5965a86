//! Requester end of the coordinator channel
//!
//! Each exchange registers its correlation id in a pending table before the
//! request goes out. A router task reads the port's reply stream and settles
//! the matching entry; a reply nobody is waiting for any more (the requester
//! timed out) is dropped. Entries are removed when the waiting call
//! finishes, however it finishes.

use super::error::TransportError;
use super::requester::Transport;
use crate::coordinator::{Inbound, PortId};
use crate::host::ServiceHost;
use crate::protocol::{as_error, CorrelationId, Reply, Request, ERROR_KIND_TIMEOUT};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Default)]
struct PendingState {
    waiting: HashMap<CorrelationId, oneshot::Sender<Value>>,
    closed: bool,
}

/// Outstanding exchanges on one port.
#[derive(Default)]
struct PendingTable {
    state: Mutex<PendingState>,
}

impl PendingTable {
    fn state(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// `None` once the port has closed.
    fn register(
        self: &Arc<Self>,
        id: CorrelationId,
    ) -> Option<(Ticket, oneshot::Receiver<Value>)> {
        let mut state = self.state();
        if state.closed {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        state.waiting.insert(id, tx);
        let ticket = Ticket {
            table: Arc::clone(self),
            id,
        };
        Some((ticket, rx))
    }

    /// Deliver a reply. False if nobody was waiting for it.
    fn settle(&self, reply: Reply) -> bool {
        let waiter = self.state().waiting.remove(&reply.correlation_id);
        match waiter {
            Some(tx) => tx.send(reply.body).is_ok(),
            None => false,
        }
    }

    /// The reply stream ended: fail every waiter and refuse new ones.
    fn close_all(&self) -> usize {
        let mut state = self.state();
        state.closed = true;
        let dropped = state.waiting.len();
        state.waiting.clear();
        dropped
    }

    fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn len(&self) -> usize {
        self.state().waiting.len()
    }
}

/// Removes its pending entry on drop.
struct Ticket {
    table: Arc<PendingTable>,
    id: CorrelationId,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.table.state().waiting.remove(&self.id);
    }
}

struct Link {
    port: PortId,
    inbox: mpsc::Sender<Inbound>,
    pending: Arc<PendingTable>,
    router: JoinHandle<()>,
}

impl Link {
    fn is_usable(&self) -> bool {
        !self.pending.is_closed() && !self.inbox.is_closed()
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.router.abort();
        let _ = self.inbox.try_send(Inbound::Disconnect { port: self.port });
    }
}

async fn route(mut replies: mpsc::UnboundedReceiver<Reply>, pending: Arc<PendingTable>) {
    while let Some(reply) = replies.recv().await {
        let correlation_id = reply.correlation_id;
        if !pending.settle(reply) {
            debug!(%correlation_id, "discarding late reply");
        }
    }
    let dropped = pending.close_all();
    debug!(dropped, "reply stream closed");
}

/// `Transport` over a `ServiceHost` port.
///
/// Connects on first use and reconnects after the port closes, which is how
/// a retry reaches a freshly spawned coordinator.
pub struct PortTransport {
    host: Arc<ServiceHost>,
    link: tokio::sync::Mutex<Option<Link>>,
}

impl PortTransport {
    pub fn new(host: Arc<ServiceHost>) -> Self {
        Self {
            host,
            link: tokio::sync::Mutex::new(None),
        }
    }

    /// Exchanges currently waiting for a reply
    pub async fn pending_len(&self) -> usize {
        self.link
            .lock()
            .await
            .as_ref()
            .map_or(0, |link| link.pending.len())
    }

    async fn current(
        &self,
    ) -> Result<(PortId, mpsc::Sender<Inbound>, Arc<PendingTable>), TransportError> {
        let mut slot = self.link.lock().await;
        if let Some(link) = slot.as_ref().filter(|l| l.is_usable()) {
            return Ok((link.port, link.inbox.clone(), link.pending.clone()));
        }

        let connection = self.host.connect().await?;
        let pending = Arc::new(PendingTable::default());
        let router = tokio::spawn(route(connection.replies, pending.clone()));
        let link = Link {
            port: connection.port,
            inbox: connection.inbox,
            pending,
            router,
        };
        let current = (link.port, link.inbox.clone(), link.pending.clone());
        *slot = Some(link);
        Ok(current)
    }
}

#[async_trait]
impl Transport for PortTransport {
    async fn send(&self, request: Request) -> Result<Value, TransportError> {
        let (port, inbox, pending) = self.current().await?;
        let (_ticket, reply) = pending
            .register(request.correlation_id)
            .ok_or(TransportError::Closed)?;

        inbox
            .send(Inbound::Message { port, request })
            .await
            .map_err(|_| TransportError::Closed)?;
        let body = reply.await.map_err(|_| TransportError::Closed)?;

        match as_error(&body) {
            Some((message, Some(kind))) if kind == ERROR_KIND_TIMEOUT => {
                Err(TransportError::DeadlineExceeded(message))
            }
            Some((message, _)) => Err(TransportError::Remote(message)),
            None => Ok(body),
        }
    }
}
