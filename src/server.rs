//! HTTP server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tracing::{error, info, warn};

use crate::admission::{admission_middleware, AdmissionController};
use crate::error::{GatekeeperError, Result};
use crate::store::CounterStore;

/// HTTP server fronted by admission control.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Admission applied to every non-exempt request
    controller: Arc<AdmissionController>,
    /// Store checked by `/store-ping`
    store: Arc<dyn CounterStore>,
}

impl HttpServer {
    /// Create a new server.
    pub fn new(
        addr: SocketAddr,
        controller: Arc<AdmissionController>,
        store: Arc<dyn CounterStore>,
    ) -> Self {
        Self {
            addr,
            controller,
            store,
        }
    }

    /// The application router with all middleware applied.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ping", get(ping))
            .route("/store-ping", get(store_ping))
            .with_state(Arc::clone(&self.store))
            .layer(
                ServiceBuilder::new()
                    .layer(middleware::from_fn(log_requests))
                    .layer(middleware::from_fn_with_state(
                        Arc::clone(&self.controller),
                        admission_middleware,
                    )),
            )
    }

    /// Bind the configured address and serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            e
        })?;
        self.serve_listener(listener, signal).await
    }

    /// Serve on an already bound `listener` until `signal` resolves.
    pub async fn serve_listener<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        info!(
            addr = %listener.local_addr()?,
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            GatekeeperError::Io(e)
        })
    }
}

async fn ping() -> &'static str {
    "pong"
}

async fn store_ping(State(store): State<Arc<dyn CounterStore>>) -> StatusCode {
    match store.ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!(error = %e, "Counter store ping failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request handled"
    );
    response
}
