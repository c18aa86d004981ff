use std::{io, net::SocketAddr};

use thiserror::Error;

/// Failures the relay can run into, grouped by how far they reach.
///
/// Only [`RelayError::Bind`] is fatal. Accept failures are logged and the
/// accept loop keeps going; session I/O failures close that one session.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error("i/o failure on session {peer}: {source}")]
    SessionIo {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Why a session refused an outbound chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("outbound queue is full")]
    Full,
    #[error("session is closed")]
    Closed,
}
