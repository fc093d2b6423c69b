//! Local HTTP target for standalone runs and tests.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Router,
};
use rand::Rng;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Behaviour of the mock target
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Port to listen on (0 for random)
    pub port: u16,
    /// Status code of every normal reply
    pub status: u16,
    /// Body of every normal reply
    pub body: String,
    /// Simulated processing time in milliseconds
    pub latency_ms: u64,
    /// Fraction of requests answered with 500 (0.0 to 1.0)
    pub error_rate: f64,
    /// Reply with the request body instead of `body`
    pub echo: bool,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            status: 200,
            body: "Hello World".to_string(),
            latency_ms: 0,
            error_rate: 0.0,
            echo: false,
        }
    }
}

/// Mock HTTP server answering every method and path
pub struct MockServer {
    config: MockServerConfig,
    shutdown_tx: Option<oneshot::Sender<()>>,
    port: u16,
}

impl MockServer {
    pub fn new(config: MockServerConfig) -> Self {
        Self {
            config,
            shutdown_tx: None,
            port: 0,
        }
    }

    /// Start serving in the background and return the bound port
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("127.0.0.1:{}", self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        self.port = port;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let app = router(self.config.clone());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                tracing::warn!(error = %e, "Mock server exited with error");
            }
        });

        tracing::debug!(port, "Mock server listening");
        Ok(port)
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Router serving `config` on every route
pub fn router(config: MockServerConfig) -> Router {
    Router::new()
        .fallback(handle_any)
        .with_state(Arc::new(config))
}

async fn handle_any(State(config): State<Arc<MockServerConfig>>, body: Bytes) -> Response {
    if config.latency_ms > 0 {
        tokio::time::sleep(tokio::time::Duration::from_millis(config.latency_ms)).await;
    }

    if config.error_rate > 0.0 && rand::thread_rng().gen::<f64>() < config.error_rate {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Simulated error").into_response();
    }

    let status = StatusCode::from_u16(config.status).unwrap_or(StatusCode::OK);
    if config.echo {
        (status, body).into_response()
    } else {
        (status, config.body.clone()).into_response()
    }
}
