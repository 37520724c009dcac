//! Service lifecycle: bind, serve, bootstrap, shut down

use crate::bootstrap::ModelBootstrapper;
use crate::config::ServerConfig;
use crate::error::{Result, TaggerError};
use crate::status::DownloadStatusTracker;
use crate::web::{create_app, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// The running tagger sidecar
///
/// `start` binds the listener first and bootstraps the models in the
/// background, so `/download-status` can be polled while the first-run
/// download is in progress.
#[derive(Debug)]
pub struct TaggerService {
    config: ServerConfig,
    state: AppState,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server_task: Option<JoinHandle<()>>,
    bootstrap_task: Option<JoinHandle<()>>,
}

impl TaggerService {
    /// Create a stopped service
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let state = AppState::new(
            Arc::new(DownloadStatusTracker::new()),
            config.default_threshold,
        );
        Ok(Self {
            config,
            state,
            shutdown_tx: None,
            server_task: None,
            bootstrap_task: None,
        })
    }

    /// Shared handler state
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind and start serving, then bootstrap the models
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 was requested.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        let addr = self.serve().await?;

        let bootstrapper =
            ModelBootstrapper::new(self.config.clone(), Arc::clone(&self.state.status))?;
        let tagger = Arc::clone(&self.state.tagger);
        let remover = Arc::clone(&self.state.remover);
        self.bootstrap_task = Some(tokio::spawn(async move {
            bootstrapper.bootstrap_into(&tagger, &remover).await;
        }));

        Ok(addr)
    }

    /// Bind and start serving without bootstrapping
    ///
    /// Model slots are left for the caller to fill.
    pub async fn serve(&mut self) -> Result<SocketAddr> {
        if self.server_task.is_some() {
            return Err(TaggerError::internal("Service is already running"));
        }

        let bind_addr = self.config.bind_addr();
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            TaggerError::internal(format!("Failed to bind to address {bind_addr}: {e}"))
        })?;
        let addr = listener.local_addr()?;

        let app = create_app(self.state.clone(), self.config.max_request_size);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tracing::info!("Tagger server listening on http://{}", addr);
        tracing::info!("  POST /tag              - Image tagging (multipart 'file')");
        tracing::info!("  POST /rmbg             - Background removal (multipart 'image')");
        tracing::info!("  GET  /download-status  - Model download progress");
        tracing::info!("  GET  /health           - Health check");

        self.server_task = Some(tokio::spawn(async move {
            let shutdown = async {
                // A dropped sender also stops the server
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!("Server error: {}", e);
            }
        }));
        self.shutdown_tx = Some(shutdown_tx);

        Ok(addr)
    }

    /// Stop accepting connections and wait for in-flight requests
    pub async fn stop(&mut self) {
        if let Some(task) = self.bootstrap_task.take() {
            task.abort();
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.server_task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Server task ended abnormally: {}", e);
            }
            tracing::info!("Tagger server stopped");
        }
    }

    /// Whether the background bootstrap task is still working
    #[must_use]
    pub fn is_bootstrapping(&self) -> bool {
        self.bootstrap_task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Whether the listener is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.server_task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> ServerConfig {
        ServerConfig::builder()
            .port(0)
            .model_dir(dir.path())
            .hub_endpoint("http://127.0.0.1:9")
            .segmentation_base_url("http://127.0.0.1:9")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_serve_binds_ephemeral_port_and_stops() {
        let dir = TempDir::new().unwrap();
        let mut service = TaggerService::new(config(&dir)).unwrap();

        let addr = service.serve().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(service.is_running());
        assert!(service.serve().await.is_err());

        service.stop().await;
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.max_request_size = 0;
        assert!(matches!(
            TaggerService::new(config),
            Err(TaggerError::InvalidConfig(_))
        ));
    }
}
