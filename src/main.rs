//! vLLM Manager - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use vllm_manager::{
    Engine, FileSystemStorage, HttpReachability, NvidiaSmiProbe, Probes, ServiceRegistry,
    ShellLauncher, SystemProcessProbe, api, config::ManagerConfig, metrics, system::SystemMonitor,
};

#[derive(Parser, Debug)]
#[command(name = "vllm-manager")]
#[command(about = "Supervisory control plane for vLLM inference servers", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override API port
    #[arg(long)]
    port: Option<u16>,

    /// Override services registry file
    #[arg(long)]
    services: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .json()
                .init();
        }
    }

    tracing::info!("Starting vLLM Manager");

    // Load configuration
    let mut config = ManagerConfig::load(cli.config)?;

    // CLI overrides
    if let Some(port) = cli.port {
        config.api_port = port;
    }
    if let Some(services) = cli.services {
        config.services_file = services;
    }

    config.validate()?;

    tracing::info!(
        api_port = config.api_port,
        services_file = ?config.services_file,
        vllm_binary = %config.vllm_binary,
        "Configuration loaded"
    );

    // Setup metrics
    let prometheus_handle = metrics::setup_metrics()?;

    // Load the service registry; an invalid entry aborts startup
    let registry = Arc::new(
        ServiceRegistry::load(
            config.services_file.clone(),
            Arc::new(FileSystemStorage::new()),
        )
        .await
        .context("Failed to load service registry")?,
    );

    let probes = Probes {
        process: Arc::new(SystemProcessProbe::new(config.cpu_sample_interval())),
        gpu: Arc::new(NvidiaSmiProbe::new(
            config.nvidia_smi_path.clone(),
            config.gpu_query_timeout(),
        )),
        reachability: Arc::new(HttpReachability::new(config.health_check_timeout())),
        launcher: Arc::new(ShellLauncher::new()),
    };

    let engine = Arc::new(Engine::new(
        registry.clone(),
        probes,
        config.engine_settings(),
    ));

    // Setup API
    let app_state = api::AppState {
        engine,
        system: SystemMonitor::new(config.system_cpu_sample(), "/"),
        prometheus_handle,
    };

    let app = api::create_router(app_state);

    let addr = format!("{}:{}", config.host, config.api_port);
    tracing::info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind API server to {addr}"))?;

    // Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    tracing::info!("Shutting down...");

    // Managed servers are independent processes and keep running.
    // Commits are already on disk; only unsaved updates are flushed, so
    // edits made to the file while running survive.
    if registry
        .persist_if_dirty()
        .await
        .context("Failed to save service registry")?
    {
        tracing::info!(path = %registry.path().display(), "Saved service registry");
    }

    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
