//! HTTP server lifecycle: bind, spawn the axum server in a background
//! task, and hold a shutdown handle, the same bind → spawn → shutdown-
//! channel shape used for every long-lived network service in this crate.

use std::net::{IpAddr, SocketAddr};

use tokio::sync::oneshot;

use crate::api::router::build_router;
use crate::api::types::ApiContext;

pub struct HttpServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl HttpServer {
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!("HTTP server shutdown signal sent");
        }
    }
}

pub async fn start_http_server(ctx: ApiContext, ip: IpAddr, port: u16) -> Result<HttpServer, std::io::Error> {
    let listener = tokio::net::TcpListener::bind(SocketAddr::new(ip, port)).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "HTTP server binding");

    let app = build_router(ctx);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let shutdown_signal = async move {
            let _ = shutdown_rx.await;
            tracing::info!("HTTP server received shutdown signal");
        };
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal).await {
            tracing::error!(error = %e, "HTTP server error");
        }
        tracing::info!("HTTP server stopped");
    });

    Ok(HttpServer { addr, shutdown_tx: Some(shutdown_tx) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture_queue::CaptureQueue;
    use crate::settings::SettingsStore;
    use crate::status::StatusManager;
    use crate::wifi::{WifiDriver, WifiStateMachine};
    use std::sync::Arc;

    struct NoopDriver;
    impl WifiDriver for NoopDriver {
        fn disconnect(&self) {}
        fn enable_network(&self, _: &str, _: &str) {}
        fn bind_process_to_network(&self) {}
        fn unbind_process(&self) {}
        fn forget_network(&self, _: &str) {}
    }

    fn test_context() -> ApiContext {
        ApiContext {
            settings: Arc::new(SettingsStore::open_in_memory().unwrap()),
            status: Arc::new(StatusManager::new()),
            capture_queue: Arc::new(CaptureQueue::new(4, |_| {})),
            wifi: WifiStateMachine::new(Arc::new(NoopDriver)),
            media_root: std::env::temp_dir(),
        }
    }

    #[tokio::test]
    async fn server_binds_and_shuts_down() {
        let mut server = start_http_server(test_context(), IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 0)
            .await
            .expect("server should start");
        assert!(server.addr.port() > 0);
        server.shutdown();
        server.shutdown();
    }
}
