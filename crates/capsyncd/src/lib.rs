//! capsyncd - capability sync daemon
//!
//! Library components for the daemon process.

pub mod cluster;
pub mod discovery;
pub mod lifecycle;
pub mod logging;
pub mod server;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use capsync_core::{
    ClusterClient, Config, CueExtractor, LabelSelector, ParameterExtractor, SelectorError,
    TemplateStore,
};
use cluster::ManifestCluster;
use lifecycle::{ApiServer, LifecycleError, ShutdownOutcome};
use server::AppState;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("invalid selector {selector:?}: {source}")]
    Selector {
        selector: String,
        #[source]
        source: SelectorError,
    },
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// The daemon process: configuration plus the server it owns.
#[derive(Debug)]
pub struct Daemon {
    config: Config,
    server: ApiServer,
    state: Arc<AppState>,
}

impl Daemon {
    /// Build a daemon serving definitions from `config.definitions_dir`.
    pub fn new(config: Config) -> Result<Self, DaemonError> {
        let client = Arc::new(ManifestCluster::new(&config.definitions_dir));
        Self::with_components(config, client, Arc::new(CueExtractor))
    }

    /// Build a daemon around explicit cluster and extractor implementations.
    pub fn with_components(
        config: Config,
        client: Arc<dyn ClusterClient>,
        extractor: Arc<dyn ParameterExtractor>,
    ) -> Result<Self, DaemonError> {
        let selector =
            LabelSelector::parse(&config.selector).map_err(|source| DaemonError::Selector {
                selector: config.selector.clone(),
                source,
            })?;
        let server = ApiServer::new();
        let state = Arc::new(AppState {
            client,
            extractor,
            store: TemplateStore::new(&config.sync_dir),
            namespace: config.namespace.clone(),
            selector,
            auth_token: config.auth_token.clone(),
            shutdown: server.shutdown_token(),
        });
        Ok(Self {
            config,
            server,
            state,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn server(&self) -> &ApiServer {
        &self.server
    }

    /// Local-only address the daemon binds.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], self.config.port))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.config.shutdown_timeout_sec)
    }

    /// Start serving. Bind failures are returned to the caller.
    pub async fn launch(&self) -> Result<SocketAddr, DaemonError> {
        info!(
            namespace = %self.config.namespace,
            selector = %self.state.selector,
            sync_dir = %self.state.store.sync_dir().display(),
            definitions = %self.config.definitions_dir.display(),
            "capsyncd starting"
        );
        let router = server::create_router(Arc::clone(&self.state));
        Ok(self.server.launch(self.listen_addr(), router).await?)
    }

    /// Drain and stop within the configured timeout.
    pub async fn shutdown(&self) -> ShutdownOutcome {
        info!("shutdown requested");
        self.server.shutdown(self.shutdown_timeout()).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use lifecycle::ServerState;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        Config {
            sync_dir: dir.path().join("sync"),
            definitions_dir: dir.path().join("definitions"),
            port: 0,
            shutdown_timeout_sec: 5,
            ..Config::default()
        }
    }

    #[test]
    fn rejects_invalid_selector() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            selector: "env in (dev".to_string(),
            ..test_config(&dir)
        };
        assert!(matches!(
            Daemon::new(config),
            Err(DaemonError::Selector { .. })
        ));
    }

    #[tokio::test]
    async fn launch_and_shutdown() {
        let dir = TempDir::new().unwrap();
        let daemon = Daemon::new(test_config(&dir)).unwrap();
        assert_eq!(daemon.shutdown_timeout(), Duration::from_secs(5));

        let addr = daemon.launch().await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(daemon.server().state(), ServerState::Serving);

        assert_eq!(daemon.shutdown().await, ShutdownOutcome::Graceful);
        assert_eq!(daemon.server().state(), ServerState::Stopped);
    }
}
