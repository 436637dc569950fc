use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gatekeeper::admission::AdmissionController;
use gatekeeper::config::{Args, GatekeeperConfig, LogFormat, LoggingConfig, StoreBackend};
use gatekeeper::ratelimit::LimiterBuilder;
use gatekeeper::server::HttpServer;
use gatekeeper::store::{CounterStore, MemoryStore, RedisStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = GatekeeperConfig::load(args.config.as_deref())?;
    config.apply_args(&args);

    init_tracing(&config.logging);

    info!("Starting Gatekeeper Admission Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        listen_addr = %config.server.listen_addr,
        backend = ?config.store.backend,
        algorithm = %config.limiter.algorithm,
        "Configuration loaded"
    );

    // Connect the shared counter store
    let mut cleanup = None;
    let store: Arc<dyn CounterStore> = match config.store.backend {
        StoreBackend::Redis => {
            Arc::new(RedisStore::connect(&config.store.url, config.store.dial_timeout()).await?)
        }
        StoreBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            cleanup = Some(store.spawn_cleanup(config.store.cleanup_interval()));
            info!("Using in-memory counter store");
            store
        }
    };

    // Build the limiter and admission controller
    let limiter = LimiterBuilder::new(&config.limiter)
        .store(Arc::clone(&store))
        .build()?;
    let controller = Arc::new(AdmissionController::new(limiter, &config.server)?);

    let server = HttpServer::new(config.server.listen_addr, controller, store);

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    if let Some(task) = cleanup {
        task.abort();
    }

    info!("Gatekeeper Admission Service stopped");
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
