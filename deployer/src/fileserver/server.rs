//! Ephemeral file server implementation

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use url::{Host, Url};

use crate::errors::DeployError;
use crate::fileserver::handlers::{not_found_handler, pull_handler};
use crate::fileserver::listener::{KillSwitch, KillableListener, PeerAddr};
use crate::fileserver::state::ServerState;
use crate::fileserver::{parse_host, pull_url, FileServer};
use crate::filesys::file::File;
use crate::models::artifact::Artifact;

/// Artifact and listening parameters set by `configure`
#[derive(Debug, Clone)]
struct Binding {
    file: File,
    name: String,
    host: String,
    url_host: Host,
    port: u16,
}

/// A started server
struct Running {
    addr: SocketAddr,
    url: Url,
    shutdown_tx: oneshot::Sender<()>,
    kill: Arc<KillSwitch>,
    handle: JoinHandle<Result<(), DeployError>>,
}

/// Serves one artifact under its pull path until stopped
pub struct EphemeralFileServer {
    binding: Option<Binding>,
    running: Option<Running>,
    fetches: Arc<AtomicU64>,
}

impl EphemeralFileServer {
    /// Create an unconfigured server
    pub fn new() -> Self {
        Self {
            binding: None,
            running: None,
            fetches: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether the listening socket is open
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Address actually bound, only while started
    pub fn local_addr(&self) -> Result<SocketAddr, DeployError> {
        self.running
            .as_ref()
            .map(|running| running.addr)
            .ok_or(DeployError::NotStarted)
    }

    pub(crate) fn router(state: Arc<ServerState>) -> Router {
        Router::new()
            .route("/{name}", get(pull_handler))
            .fallback(not_found_handler)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }
}

impl Default for EphemeralFileServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileServer for EphemeralFileServer {
    async fn configure(
        &mut self,
        artifact: &Artifact,
        host: &str,
        port: u16,
    ) -> Result<(), DeployError> {
        if self.running.is_some() {
            return Err(DeployError::AlreadyStarted);
        }

        let file = artifact.file().clone();
        if !file.is_file().await {
            return Err(DeployError::Configuration(format!(
                "artifact {} does not exist",
                file.path().display()
            )));
        }
        if let Err(e) = file.open().await {
            return Err(DeployError::Configuration(format!(
                "artifact {} is not readable: {}",
                file.path().display(),
                e
            )));
        }

        let url_host = parse_host(host)?;

        self.binding = Some(Binding {
            file,
            name: artifact.name().to_string(),
            host: host.trim().to_string(),
            url_host,
            port,
        });
        // A new artifact starts a new lifetime
        self.fetches.store(0, Ordering::SeqCst);

        Ok(())
    }

    async fn start(&mut self) -> Result<(), DeployError> {
        if self.running.is_some() {
            return Err(DeployError::AlreadyStarted);
        }
        let binding = self.binding.clone().ok_or_else(|| {
            DeployError::Configuration("file server started before being configured".to_string())
        })?;

        let listener = TcpListener::bind((binding.host.as_str(), binding.port))
            .await
            .map_err(|e| DeployError::Bind(format!("{}:{}: {}", binding.host, binding.port, e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| DeployError::Bind(format!("{}:{}: {}", binding.host, binding.port, e)))?;

        let url = pull_url(&binding.url_host, addr.port(), &binding.name)?;

        let kill = Arc::new(KillSwitch::new());
        let state = Arc::new(ServerState::new(
            binding.file.clone(),
            binding.name.clone(),
            self.fetches.clone(),
            kill.clone(),
        ));
        let app = Self::router(state);
        let listener = KillableListener::new(listener, kill.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<PeerAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .map_err(DeployError::from)
        });

        info!("File server listening on {}, serving {}", addr, url);

        self.running = Some(Running {
            addr,
            url,
            shutdown_tx,
            kill,
            handle,
        });

        Ok(())
    }

    fn url(&self) -> Result<Url, DeployError> {
        self.running
            .as_ref()
            .map(|running| running.url.clone())
            .ok_or(DeployError::NotStarted)
    }

    fn call_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    async fn stop(&mut self, grace: Duration) {
        let Some(running) = self.running.take() else {
            debug!("File server already stopped");
            return;
        };

        let Running {
            addr,
            shutdown_tx,
            kill,
            mut handle,
            ..
        } = running;

        // Stop accepting; idle connections close, busy ones drain
        let _ = shutdown_tx.send(());

        if !grace.is_zero() {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(Ok(()))) => {
                    info!("File server on {} stopped", addr);
                    return;
                }
                Ok(Ok(Err(e))) => {
                    warn!("File server on {} exited with error: {}", addr, e);
                    return;
                }
                Ok(Err(e)) => {
                    warn!("File server task on {} failed: {}", addr, e);
                    return;
                }
                Err(_) => {
                    warn!(
                        "File server on {} still busy after {:?}, aborting transfers",
                        addr, grace
                    );
                }
            }
        }

        kill.kill();
        handle.abort();
        let _ = handle.await;
        info!("File server on {} stopped", addr);
    }
}

impl Drop for EphemeralFileServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            warn!("File server on {} dropped while running", running.addr);
            running.kill.kill();
            let _ = running.shutdown_tx.send(());
            running.handle.abort();
        }
    }
}
