use std::{net::SocketAddr, sync::Arc};

use bytes::Bytes;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    error::RelayError,
    protocol::{READ_BUFFER_SIZE, is_quit, join_notice, leave_notice, split_handshake},
    registry::{Registry, SessionHandle, SessionId},
};

/// Chunks a session may have queued for its writer before broadcasts
/// start treating it as stalled.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// What ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    ReadFailed,
    Quit,
    WriteFailed,
    Evicted,
    Shutdown,
}

impl CloseReason {
    /// Server shutdown closes everyone at once, so nobody is told who left.
    pub fn announces_leave(self) -> bool {
        !matches!(self, CloseReason::Shutdown)
    }
}

/// One-shot, first-writer-wins request for a session to close.
///
/// Shared between the session's read loop, its writer task and the
/// registry, any of which may decide the session is done.
#[derive(Clone, Debug)]
pub struct CloseSignal {
    reason: Arc<watch::Sender<Option<CloseReason>>>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (reason, _) = watch::channel(None);
        Self {
            reason: Arc::new(reason),
        }
    }

    /// Returns false if the session had already been asked to close.
    pub fn trigger(&self, reason: CloseReason) -> bool {
        self.reason.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    pub fn reason(&self) -> Option<CloseReason> {
        *self.reason.borrow()
    }

    pub async fn triggered(&self) -> CloseReason {
        let mut rx = self.reason.subscribe();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(CloseReason::Shutdown),
            Err(_) => CloseReason::Shutdown,
        };
        reason
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

enum Inbound {
    Chunk(Bytes),
    Closed(CloseReason),
}

/// Server side of one client connection.
///
/// A session is in the registry from [`Session::start`] until
/// [`Session::run`] returns. It first reads the client's name, announces
/// it, then relays every chunk it reads to the other sessions.
pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    registry: Arc<Registry>,
    reader: OwnedReadHalf,
    writer: JoinHandle<()>,
    close: CloseSignal,
    name: Option<String>,
}

impl Session {
    pub async fn start(stream: TcpStream, peer: SocketAddr, registry: Arc<Registry>) -> Self {
        let id = registry.next_id();
        let (reader, writer) = stream.into_split();
        let (outbound, inbox) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let close = CloseSignal::new();
        let writer = tokio::spawn(run_writer(writer, inbox, peer, close.clone()));

        registry
            .add(SessionHandle::new(id, peer, outbound, close.clone()))
            .await;
        debug!(session = id, %peer, "session registered");

        Self {
            id,
            peer,
            registry,
            reader,
            writer,
            close,
            name: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Drives the session to completion and reports why it ended.
    pub async fn run(mut self) -> CloseReason {
        let mut buffer = vec![0; READ_BUFFER_SIZE];
        let reason = self.relay_until_closed(&mut buffer).await;
        self.finish(reason).await;
        reason
    }

    async fn relay_until_closed(&mut self, buffer: &mut [u8]) -> CloseReason {
        let handshake = match self.read_handshake(buffer).await {
            Ok(handshake) => handshake,
            Err(reason) => return reason,
        };

        let (name, rest) = split_handshake(&handshake);
        let name = name.unwrap_or_else(|| self.peer.to_string());
        info!(session = self.id, peer = %self.peer, %name, "client joined");
        self.registry.broadcast(join_notice(&name), self.id).await;
        self.name = Some(name);

        if !rest.is_empty() {
            if let Some(reason) = self.relay(rest).await {
                return reason;
            }
        }

        loop {
            let chunk = match self.next_chunk(buffer).await {
                Inbound::Chunk(chunk) => chunk,
                Inbound::Closed(reason) => return reason,
            };
            if let Some(reason) = self.relay(chunk).await {
                return reason;
            }
        }
    }

    /// Reads until the name's newline arrives or a full buffer's worth of
    /// name has been read, whichever comes first.
    async fn read_handshake(&mut self, buffer: &mut [u8]) -> Result<Bytes, CloseReason> {
        let mut handshake: Vec<u8> = Vec::new();
        while !handshake.contains(&b'\n') && handshake.len() < buffer.len() {
            let room = buffer.len() - handshake.len();
            match self.next_chunk(&mut buffer[..room]).await {
                Inbound::Chunk(chunk) => handshake.extend_from_slice(&chunk),
                Inbound::Closed(reason) => return Err(reason),
            }
        }
        Ok(Bytes::from(handshake))
    }

    async fn next_chunk(&mut self, buffer: &mut [u8]) -> Inbound {
        select! {
            reason = self.close.triggered() => Inbound::Closed(reason),
            read = self.reader.read(buffer) => match read {
                Ok(0) => Inbound::Closed(CloseReason::PeerClosed),
                Ok(len) => Inbound::Chunk(Bytes::copy_from_slice(&buffer[..len])),
                Err(source) => {
                    let error = RelayError::SessionIo { peer: self.peer, source };
                    warn!(session = self.id, %error, "read failed");
                    Inbound::Closed(CloseReason::ReadFailed)
                }
            },
        }
    }

    async fn relay(&self, chunk: Bytes) -> Option<CloseReason> {
        if is_quit(&chunk) {
            return Some(CloseReason::Quit);
        }
        debug!(session = self.id, bytes = chunk.len(), "relaying chunk");
        self.registry.broadcast(chunk, self.id).await;
        None
    }

    async fn finish(self, reason: CloseReason) {
        let Session {
            id,
            peer,
            registry,
            reader,
            writer,
            close,
            name,
        } = self;

        if reason.announces_leave() {
            if let Some(name) = &name {
                registry.broadcast(leave_notice(name), id).await;
            }
        }

        close.trigger(reason);
        writer.abort();
        drop(reader);
        registry.remove(id).await;

        info!(session = id, %peer, name = name.as_deref().unwrap_or("-"), ?reason, "session closed");
    }
}

async fn run_writer(
    mut writer: OwnedWriteHalf,
    mut inbox: mpsc::Receiver<Bytes>,
    peer: SocketAddr,
    close: CloseSignal,
) {
    while let Some(chunk) = inbox.recv().await {
        if let Err(source) = writer.write_all(&chunk).await {
            let error = RelayError::SessionIo { peer, source };
            debug!(%error, "write failed");
            close.trigger(CloseReason::WriteFailed);
            return;
        }
    }

    if let Err(error) = writer.shutdown().await {
        debug!(%peer, ?error, "failed to shut down writer");
    }
}
