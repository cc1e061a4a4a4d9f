use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use wikidoc_common::event::PageEvent;

use crate::api::{router, ApiState};
use crate::config::{DaemonConfig, EventSink};
use crate::events::{BroadcastPublisher, EventPublisher, NoopPublisher, OutboxPublisher};
use crate::service::PageService;
use crate::store::meta_db::MetaDb;
use crate::sweeper::spawn_lock_sweeper;

/// A running daemon: HTTP server plus lock sweeper.
pub struct DaemonHandle {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    server: Option<JoinHandle<std::io::Result<()>>>,
    sweeper: Option<JoinHandle<()>>,
    events: Option<Arc<BroadcastPublisher>>,
}

impl DaemonHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Subscribe to page events. `None` unless the event sink is `broadcast`.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<PageEvent>> {
        self.events.as_ref().map(|publisher| publisher.subscribe())
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub async fn wait(mut self) -> Result<()> {
        self.shutdown();
        if let Some(sweeper) = self.sweeper.take() {
            let _ = sweeper.await;
        }
        match self.server.take() {
            Some(server) => server
                .await
                .map_err(|error| anyhow!("daemon server task failed: {error}"))?
                .context("daemon server exited with error"),
            None => Ok(()),
        }
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Open storage, bind the listener and start serving in the background.
pub async fn start(config: DaemonConfig) -> Result<DaemonHandle> {
    let db_path = config.resolved_db_path().context("failed to resolve meta.db path")?;
    let db = MetaDb::open(&db_path)
        .with_context(|| format!("failed to open meta.db at `{}`", db_path.display()))?;
    let db = Arc::new(Mutex::new(db));

    let events = match config.events.sink {
        EventSink::Broadcast => Some(Arc::new(BroadcastPublisher::default())),
        EventSink::Outbox | EventSink::None => None,
    };
    let publisher: Arc<dyn EventPublisher> = match (&events, config.events.sink) {
        (Some(broadcast), _) => broadcast.clone(),
        (None, EventSink::Outbox) => Arc::new(OutboxPublisher::new(Arc::clone(&db))),
        (None, _) => Arc::new(NoopPublisher),
    };

    let service = PageService::new(Arc::clone(&db))
        .with_publisher(publisher)
        .with_history_retention(config.history.retention)
        .with_lease_secs(config.locks.lease_secs);
    let state = ApiState::from_service(service);

    let (shutdown_tx, sweeper_rx) = broadcast::channel(4);
    let sweeper = spawn_lock_sweeper(
        Arc::clone(&state.locks),
        Duration::from_secs(config.locks.sweep_interval_secs),
        sweeper_rx,
    );

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind daemon listener on {}", config.listen_addr))?;
    let local_addr = listener.local_addr().context("failed to read bound listener address")?;

    let mut server_rx = shutdown_tx.subscribe();
    let app = router(state);
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_rx.recv().await;
            })
            .await
    });

    info!(
        listen_addr = %local_addr,
        db_path = %db_path.display(),
        sink = ?config.events.sink,
        "daemon started"
    );
    Ok(DaemonHandle {
        local_addr,
        shutdown_tx,
        server: Some(server),
        sweeper: Some(sweeper),
        events,
    })
}

/// Standalone mode: serve until Ctrl+C or SIGTERM.
pub async fn run(config: DaemonConfig) -> Result<()> {
    let handle = start(config).await?;
    shutdown_signal().await;
    handle.wait().await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(?error, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(?error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use super::*;
    use crate::config::EventsConfig;

    fn test_config(dir: &TempDir, sink: EventSink) -> DaemonConfig {
        DaemonConfig {
            listen_addr: "127.0.0.1:0".parse().expect("loopback addr should parse"),
            db_path: Some(dir.path().join("nested").join("meta.db")),
            events: EventsConfig { sink },
            ..DaemonConfig::default()
        }
    }

    async fn raw_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.expect("daemon should accept connections");
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.expect("request should send");
        let mut response = String::new();
        stream.read_to_string(&mut response).await.expect("response should read");
        response
    }

    #[tokio::test]
    async fn serves_healthz_and_shuts_down_cleanly() {
        let dir = TempDir::new().expect("tempdir should be created");
        let handle = start(test_config(&dir, EventSink::None)).await.expect("daemon should start");

        let response = raw_get(handle.local_addr(), "/healthz").await;
        assert!(response.starts_with("HTTP/1.1 200"), "unexpected response: {response}");
        assert!(dir.path().join("nested").join("meta.db").exists());

        handle.wait().await.expect("daemon should stop cleanly");
    }

    #[tokio::test]
    async fn broadcast_sink_exposes_subscription() {
        let dir = TempDir::new().expect("tempdir should be created");
        let broadcast = start(test_config(&dir, EventSink::Broadcast)).await.expect("daemon should start");
        assert!(broadcast.subscribe().is_some());
        broadcast.wait().await.expect("daemon should stop cleanly");

        let other = TempDir::new().expect("tempdir should be created");
        let outbox = start(test_config(&other, EventSink::Outbox)).await.expect("daemon should start");
        assert!(outbox.subscribe().is_none());
        outbox.wait().await.expect("daemon should stop cleanly");
    }
}
