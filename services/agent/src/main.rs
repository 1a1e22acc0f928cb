//! lhorc Host Agent
//!
//! Registers this host in the metadata store, then serves schedule requests
//! forwarded by peer agents until interrupted.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use lhorc_agent::{
    api::{self, AppState},
    config::Config,
    identity,
    probe::PollingProbe,
    runtime::{ContainerRuntime, DockerRuntime, MockRuntime},
    scheduler::HttpTransport,
    store::{EtcdBackend, KvBackend, MemoryBackend, MetadataStore},
    Orchestrator,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    // Initialize tracing (prefer RUST_LOG, fallback to LHORC_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting lhorc agent");
    info!(
        etcd_servers = ?config.etcd_servers,
        etcd_prefix = %config.etcd_prefix,
        port = config.port,
        mock_runtime = config.mock_runtime,
        "Configuration loaded"
    );

    // Container runtime must answer before anything else
    let runtime: Arc<dyn ContainerRuntime> = if config.mock_runtime {
        warn!("Using mock container runtime and in-memory store");
        Arc::new(MockRuntime::new())
    } else {
        Arc::new(DockerRuntime::new(&config.docker_socket))
    };
    runtime
        .ping()
        .await
        .context("cannot connect to docker")?;

    let address = identity::local_address(config.port).context("unable to get ip")?;

    let backend: Arc<dyn KvBackend> = if config.mock_runtime {
        Arc::new(MemoryBackend::new())
    } else {
        Arc::new(EtcdBackend::new(config.etcd_servers.clone())?)
    };
    let store = MetadataStore::new(backend, config.etcd_prefix.clone());

    let host = match Orchestrator::register_host(&store, &config.config_dir, &address).await {
        Ok(host) => host,
        Err(e) => {
            error!(error = %e, "Failed to register host");
            return Err(e.into());
        }
    };

    let probe = Arc::new(PollingProbe::new(Duration::from_millis(config.poll_interval_ms))?);
    let orchestrator = Orchestrator::with_runtime(
        host.clone(),
        store,
        runtime,
        probe,
        config.executor_config(),
        Arc::new(HttpTransport::new()?),
        config.longhorn_image.clone(),
    );
    info!(host_id = %orchestrator.current_host_id(), "Orchestrator is ready");

    let app = api::create_router(AppState {
        host,
        handler: orchestrator.handler(),
    });

    let listen_addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!(addr = %listen_addr, "Listening for connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Received shutdown signal");
        })
        .await?;

    info!("Agent shutdown complete");
    Ok(())
}
