//! Server lifecycle.
//!
//! `Stopped -> Launching -> Serving -> Draining -> Stopped`
//!
//! [`ApiServer`] is owned by the process entry point. `launch` and `shutdown`
//! are the only transitions; termination signals are turned into a single
//! `shutdown` call by the caller. Shutdown is bounded by a deadline, and only
//! one drain ever runs: concurrent or repeated callers wait for and return
//! the first drain's outcome.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Default upper bound on graceful shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Stopped,
    Launching,
    Serving,
    Draining,
}

/// How a shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// All in-flight requests finished before the deadline.
    Graceful,
    /// The deadline passed; outstanding requests were abandoned.
    Forced,
    /// The server was never launched.
    NotRunning,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("cannot launch server while {0:?}")]
    InvalidState(ServerState),
}

/// Front-end server state machine.
#[derive(Debug)]
pub struct ApiServer {
    state: watch::Sender<ServerState>,
    outcome: watch::Sender<Option<ShutdownOutcome>>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<io::Result<()>>>>,
}

impl Default for ApiServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiServer {
    pub fn new() -> Self {
        Self {
            state: watch::Sender::new(ServerState::Stopped),
            outcome: watch::Sender::new(None),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Token cancelled when draining starts. Work started on behalf of a
    /// request should derive a child token from it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Outcome of the completed shutdown, if any.
    pub fn outcome(&self) -> Option<ShutdownOutcome> {
        *self.outcome.borrow()
    }

    /// Bind `addr` and start serving `router`. Returns the bound address.
    pub async fn launch(
        &self,
        addr: SocketAddr,
        router: Router,
    ) -> Result<SocketAddr, LifecycleError> {
        let already_stopped = self.outcome().is_some();
        let launching = self.state.send_if_modified(|state| {
            if *state == ServerState::Stopped && !already_stopped {
                *state = ServerState::Launching;
                true
            } else {
                false
            }
        });
        if !launching {
            return Err(LifecycleError::InvalidState(self.state()));
        }

        let bound = tokio::net::TcpListener::bind(addr)
            .await
            .and_then(|listener| listener.local_addr().map(|local| (listener, local)));
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                self.state.send_replace(ServerState::Stopped);
                return Err(LifecycleError::Bind { addr, source });
            }
        };

        let drained = self.shutdown.clone().cancelled_owned();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(drained)
                .await
        });
        *self.task.lock().await = Some(handle);

        self.state.send_replace(ServerState::Serving);
        info!("HTTP server listening on http://{}", local_addr);
        Ok(local_addr)
    }

    /// Stop accepting requests and drain in-flight ones for at most
    /// `deadline`.
    pub async fn shutdown(&self, deadline: Duration) -> ShutdownOutcome {
        let mut state_rx = self.state.subscribe();
        loop {
            let mut begin = false;
            self.state.send_if_modified(|state| {
                if *state == ServerState::Serving {
                    *state = ServerState::Draining;
                    begin = true;
                    true
                } else {
                    false
                }
            });
            if begin {
                return self.drain(deadline).await;
            }

            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            match self.state() {
                ServerState::Draining => return self.wait_for_outcome().await,
                ServerState::Launching => {
                    // Retry once the launch settles.
                    if state_rx
                        .wait_for(|s| *s != ServerState::Launching)
                        .await
                        .is_err()
                    {
                        return ShutdownOutcome::NotRunning;
                    }
                }
                ServerState::Stopped | ServerState::Serving => return ShutdownOutcome::NotRunning,
            }
        }
    }

    async fn wait_for_outcome(&self) -> ShutdownOutcome {
        let mut outcome_rx = self.outcome.subscribe();
        let outcome = match outcome_rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.unwrap_or(ShutdownOutcome::Forced),
            Err(_) => ShutdownOutcome::Forced,
        };
        outcome
    }

    async fn drain(&self, deadline: Duration) -> ShutdownOutcome {
        info!(deadline_ms = deadline.as_millis() as u64, "draining in-flight requests");
        self.shutdown.cancel();

        let handle = self.task.lock().await.take();
        let outcome = match handle {
            Some(mut handle) => match tokio::time::timeout(deadline, &mut handle).await {
                Ok(Ok(Ok(()))) => ShutdownOutcome::Graceful,
                Ok(Ok(Err(e))) => {
                    error!(error = %e, "server exited with error");
                    ShutdownOutcome::Graceful
                }
                Ok(Err(e)) => {
                    error!(error = %e, "server task failed");
                    ShutdownOutcome::Forced
                }
                Err(_) => {
                    warn!("shutdown deadline elapsed, abandoning in-flight requests");
                    handle.abort();
                    ShutdownOutcome::Forced
                }
            },
            None => ShutdownOutcome::Graceful,
        };

        // Outcome first so a concurrent caller never sees Stopped without it.
        self.outcome.send_replace(Some(outcome));
        self.state.send_replace(ServerState::Stopped);
        info!(outcome = ?outcome, "server stopped");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::LogCapture;
    use axum::routing::get;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn local() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    fn test_router() -> Router {
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    "done"
                }),
            )
    }

    async fn get_path(addr: SocketAddr, path: &str) -> io::Result<String> {
        let mut stream = TcpStream::connect(addr).await?;
        let request =
            format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await?;
        let mut response = String::new();
        stream.read_to_string(&mut response).await?;
        Ok(response)
    }

    #[tokio::test]
    async fn launch_serves_requests() {
        let server = ApiServer::new();
        assert_eq!(server.state(), ServerState::Stopped);

        let addr = server.launch(local(), test_router()).await.unwrap();
        assert_eq!(server.state(), ServerState::Serving);

        let response = get_path(addr, "/ping").await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("pong"));

        assert_eq!(
            server.shutdown(Duration::from_secs(5)).await,
            ShutdownOutcome::Graceful
        );
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn bind_failure_returns_to_stopped() {
        let taken = std::net::TcpListener::bind(local()).unwrap();
        let addr = taken.local_addr().unwrap();
        let server = ApiServer::new();

        let err = server.launch(addr, test_router()).await.unwrap_err();

        assert!(matches!(err, LifecycleError::Bind { .. }));
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn second_launch_is_rejected() {
        let server = ApiServer::new();
        server.launch(local(), test_router()).await.unwrap();
        let err = server.launch(local(), test_router()).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidState(ServerState::Serving)
        ));
        server.shutdown(Duration::from_secs(5)).await;

        // Stopped is terminal.
        let err = server.launch(local(), test_router()).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidState(_)));
    }

    #[tokio::test]
    async fn shutdown_before_launch_is_not_running() {
        let server = ApiServer::new();
        assert_eq!(
            server.shutdown(Duration::from_secs(1)).await,
            ShutdownOutcome::NotRunning
        );
    }

    #[tokio::test]
    async fn concurrent_shutdowns_share_one_drain() {
        let (logs, _guard) = LogCapture::install();
        let server = Arc::new(ApiServer::new());
        server.launch(local(), test_router()).await.unwrap();
        let mut states = server.subscribe();

        let (first, second) = tokio::join!(
            server.shutdown(Duration::from_secs(5)),
            server.shutdown(Duration::from_secs(5))
        );
        assert_eq!(logs.lines_containing("draining in-flight requests").len(), 1);

        assert_eq!(first, ShutdownOutcome::Graceful);
        assert_eq!(second, first);
        assert_eq!(server.outcome(), Some(ShutdownOutcome::Graceful));
        assert_eq!(*states.borrow_and_update(), ServerState::Stopped);

        // A later call observes the same outcome without draining again.
        assert_eq!(
            server.shutdown(Duration::from_secs(5)).await,
            ShutdownOutcome::Graceful
        );
        assert_eq!(logs.lines_containing("draining in-flight requests").len(), 1);
        assert_eq!(logs.lines_containing("server stopped").len(), 1);
    }

    #[tokio::test]
    async fn deadline_abandons_in_flight_requests() {
        let server = ApiServer::new();
        let addr = server.launch(local(), test_router()).await.unwrap();

        let in_flight = tokio::spawn(async move { get_path(addr, "/slow").await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = std::time::Instant::now();
        let outcome = server.shutdown(Duration::from_millis(200)).await;

        assert_eq!(outcome, ShutdownOutcome::Forced);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(server.state(), ServerState::Stopped);
        in_flight.abort();
    }

    #[tokio::test]
    async fn draining_cancels_shutdown_token() {
        let server = ApiServer::new();
        let token = server.shutdown_token().child_token();
        server.launch(local(), test_router()).await.unwrap();
        assert!(!token.is_cancelled());

        server.shutdown(Duration::from_secs(5)).await;
        assert!(token.is_cancelled());
    }
}
