use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::{
    error::SendError,
    session::{CloseReason, CloseSignal},
};

pub type SessionId = u64;

/// The registry's view of one live session: where to queue its outbound
/// chunks and how to ask it to close.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    id: SessionId,
    peer: SocketAddr,
    outbound: mpsc::Sender<Bytes>,
    close: CloseSignal,
}

impl SessionHandle {
    pub fn new(
        id: SessionId,
        peer: SocketAddr,
        outbound: mpsc::Sender<Bytes>,
        close: CloseSignal,
    ) -> Self {
        Self {
            id,
            peer,
            outbound,
            close,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queues a chunk for this session's writer without waiting on the socket.
    pub fn send(&self, payload: Bytes) -> Result<(), SendError> {
        self.outbound.try_send(payload).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    pub fn close(&self, reason: CloseReason) -> bool {
        self.close.trigger(reason)
    }
}

/// The set of currently connected sessions.
///
/// Membership changes and the recipient snapshot taken by [`Registry::broadcast`]
/// are serialized by one lock. Sends happen after the lock is released, so a
/// stalled peer never holds up joins, leaves or other recipients.
pub struct Registry {
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
    next_id: AtomicU64,
    closing: AtomicBool,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closing: AtomicBool::new(false),
        }
    }

    pub fn next_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn add(&self, session: SessionHandle) {
        let mut sessions = self.sessions.lock().await;
        // Checked under the lock so close_all cannot miss a late arrival.
        if self.closing.load(Ordering::Acquire) {
            session.close(CloseReason::Shutdown);
        }
        sessions.insert(session.id, session);
    }

    /// Removing an absent session is a no-op.
    pub async fn remove(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions.lock().await.remove(&id)
    }

    /// Delivers `payload` to every registered session except `source`.
    ///
    /// A recipient that cannot take the chunk is evicted: it leaves the
    /// registry and is told to close. Delivery to everyone else goes on.
    /// Returns how many sessions accepted the chunk.
    pub async fn broadcast(&self, payload: Bytes, source: SessionId) -> usize {
        let recipients: Vec<SessionHandle> = {
            let sessions = self.sessions.lock().await;
            sessions
                .values()
                .filter(|session| session.id != source)
                .cloned()
                .collect()
        };

        let mut delivered = 0;
        let mut evicted = Vec::new();
        for recipient in &recipients {
            match recipient.send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(error) => {
                    warn!(session = recipient.id, peer = %recipient.peer, %error, "evicting recipient");
                    evicted.push(recipient);
                }
            }
        }

        for recipient in evicted {
            self.remove(recipient.id).await;
            recipient.close(CloseReason::Evicted);
        }

        debug!(source, delivered, bytes = payload.len(), "broadcast");
        delivered
    }

    /// Signals every registered session to close and refuses to keep any
    /// session added from now on.
    pub async fn close_all(&self) -> usize {
        let sessions = self.sessions.lock().await;
        self.closing.store(true, Ordering::Release);
        for session in sessions.values() {
            session.close(CloseReason::Shutdown);
        }
        sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    pub async fn contains(&self, id: SessionId) -> bool {
        self.sessions.lock().await.contains_key(&id)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
