use std::{
    future::Future,
    io::{self, BufRead},
    net::SocketAddr,
    sync::Arc,
    thread,
    time::Duration,
};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::oneshot,
    task::{JoinError, JoinSet},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    error::RelayError,
    registry::Registry,
    session::{CloseReason, Session},
};

/// How long shutdown waits for sessions to close their sockets.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Line an operator types on the server's stdin to stop it.
pub const OPERATOR_QUIT_COMMAND: &str = "q";

/// Accepts connections and hands each one to its own session task.
pub struct Relay {
    listener: TcpListener,
    registry: Arc<Registry>,
}

impl Relay {
    pub async fn bind(host: &str, port: u16) -> Result<Self, RelayError> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| RelayError::Bind {
                addr: format!("{host}:{port}"),
                source,
            })?;
        Ok(Self::new(listener))
    }

    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            registry: Arc::new(Registry::new()),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Relay { listener, registry } = self;
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => break,
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &registry, &mut sessions);
                }
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    log_session_exit(finished);
                }
            }
        }

        drop(listener);
        close_sessions(&registry, sessions).await;
        Ok(())
    }

    /// Runs until Ctrl-C or until the operator types `q` on stdin.
    pub async fn run_until_operator_quits(self) -> Result<()> {
        self.run_until(operator_shutdown()).await
    }
}

fn handle_accept_result(
    result: io::Result<(TcpStream, SocketAddr)>,
    registry: &Arc<Registry>,
    sessions: &mut JoinSet<CloseReason>,
) {
    match result {
        Ok((stream, peer)) => {
            info!(%peer, "accepted connection");
            let registry = Arc::clone(registry);
            sessions.spawn(async move {
                let session = Session::start(stream, peer, registry).await;
                debug!(session = session.id(), %peer, "session started");
                session.run().await
            });
        }
        Err(source) => {
            let error = RelayError::Accept(source);
            warn!(%error, "accept failed");
        }
    }
}

fn log_session_exit(finished: Result<CloseReason, JoinError>) {
    match finished {
        Ok(reason) => debug!(?reason, "session task finished"),
        Err(error) if error.is_panic() => warn!(?error, "session task panicked"),
        Err(_) => {}
    }
}

async fn close_sessions(registry: &Registry, mut sessions: JoinSet<CloseReason>) {
    let signalled = registry.close_all().await;
    info!(sessions = signalled, "relay shutting down");

    let drain = async {
        while let Some(finished) = sessions.join_next().await {
            log_session_exit(finished);
        }
    };
    let drained = timeout(SHUTDOWN_GRACE, drain).await;
    if drained.is_err() {
        warn!(remaining = sessions.len(), "sessions did not close in time; aborting");
        sessions.abort_all();
    }
}

/// Resolves on Ctrl-C or when [`OPERATOR_QUIT_COMMAND`] is read from stdin.
///
/// Stdin closing is not a request to stop; the relay keeps running under
/// a supervisor that gives it no console.
pub async fn operator_shutdown() {
    let console = spawn_operator_console();
    let console_quit = async {
        if console.await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    select! {
        _ = ctrl_c() => info!("ctrl-c received"),
        _ = console_quit => info!("operator requested shutdown"),
    }
}

async fn ctrl_c() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(?error, "failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
}

// A plain thread rather than tokio's stdin: its blocking read can't be
// cancelled and would hold up runtime shutdown.
fn spawn_operator_console() -> oneshot::Receiver<()> {
    let (quit_tx, quit_rx) = oneshot::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) if line.trim() == OPERATOR_QUIT_COMMAND => {
                    let _ = quit_tx.send(());
                    return;
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(?error, "operator console closed");
                    return;
                }
            }
        }
    });
    quit_rx
}
