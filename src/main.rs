use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ratewarden::config::{StoreKind, WardenConfig};
use ratewarden::grpc::GrpcServer;
use ratewarden::mesh::Cluster;
use ratewarden::ratelimit::{
    spawn_sweeper, Clock, CounterStore, MemoryStore, MeshStore, RateLimitConfig, RouteLimiters,
    SystemClock,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Fixed-window rate limiting decision service.
#[derive(Debug, Parser)]
#[command(name = "ratewarden", version, about)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the gRPC listen address
    #[arg(long)]
    grpc_addr: Option<SocketAddr>,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Starting Ratewarden Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = WardenConfig::load(cli.config.as_deref())?;
    if let Some(addr) = cli.grpc_addr {
        config.server.grpc_addr = addr;
    }
    info!(
        grpc_addr = %config.server.grpc_addr,
        store = ?config.rate_limiting.store,
        failure_policy = ?config.rate_limiting.failure_policy,
        "Configuration loaded"
    );

    let rules = match &config.rate_limiting.rules_path {
        Some(path) => RateLimitConfig::from_file(path)?,
        None => RateLimitConfig::default(),
    };

    let (store, cluster): (Arc<dyn CounterStore>, Option<Arc<Cluster>>) =
        match config.rate_limiting.store {
            StoreKind::Memory => (Arc::new(MemoryStore::new()), None),
            StoreKind::Mesh => {
                let cluster = Arc::new(Cluster::start(config.mesh.cluster_config()).await?);
                (Arc::new(MeshStore::new(cluster.clone())), Some(cluster))
            }
        };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let limiters = Arc::new(RouteLimiters::from_config(
        &rules,
        store.clone(),
        clock.clone(),
        config.rate_limiting.failure_policy,
    )?);
    for class in limiters.classes() {
        info!(
            class = class.name(),
            path_prefix = ?class.path_prefix(),
            limit = class.limiter().limit(),
            window = ?class.limiter().window(),
            "Route class ready"
        );
    }

    let sweeper = spawn_sweeper(store, clock, config.rate_limiting.sweep_interval());

    let grpc_server = GrpcServer::new(config.server.grpc_addr, limiters);

    info!("Starting gRPC server on {}", config.server.grpc_addr);

    // Run the server with graceful shutdown on Ctrl+C
    grpc_server.serve_with_shutdown(shutdown_signal()).await?;

    sweeper.abort();
    let _ = sweeper.await;
    if let Some(cluster) = cluster {
        match Arc::try_unwrap(cluster) {
            Ok(cluster) => cluster.shutdown().await?,
            Err(_) => info!("Cluster still referenced, skipping graceful mesh shutdown"),
        }
    }

    info!("Ratewarden Rate Limiting Service stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
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
