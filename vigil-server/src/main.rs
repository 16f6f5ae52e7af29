// Vigil detection server
// Loads the model once at startup and keeps serving health and debug
// endpoints even when that load fails.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vigil_eye::models::OnnxYoloLoader;
use vigil_eye::{DetectionService, ModelHandle};
use vigil_server::diagnostics::{env_snapshot, file_size_mb, memory_info};
use vigil_server::{create_router, ApiState, ConfigOverrides, ServerConfig};

#[derive(Parser)]
#[command(name = "vigil-server")]
#[command(about = "Object detection HTTP service", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Path to the ONNX model weights
    #[arg(long)]
    model_path: Option<String>,

    /// HTTP port
    #[arg(long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    host: Option<String>,

    /// Resource profile (standard, constrained)
    #[arg(long)]
    profile: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let overrides = ConfigOverrides {
        config_file: cli.config,
        model_path: cli.model_path,
        host: cli.host,
        port: cli.port,
        profile: cli.profile,
    };
    let config = ServerConfig::load(&overrides).context("Failed to load configuration")?;

    info!("Starting vigil-server v{}", env!("CARGO_PKG_VERSION"));
    log_startup_environment(&config);

    let service = initialize_service(&config);
    let addr = config.bind_address();
    let state = ApiState::new(service, config);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .context("HTTP server failed")?;

    info!("vigil-server stopped");
    Ok(())
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn log_startup_environment(config: &ServerConfig) {
    info!("Model path: {:?}", config.model_path);
    match file_size_mb(&config.model_path) {
        Some(size) => info!("Model file size: {:.2} MB", size),
        None => warn!("Model file not found at {:?}", config.model_path),
    }
    info!(
        "Profile: {} (max dimension {})",
        config.profile,
        config.detection_config().max_dimension()
    );
    for (name, value) in env_snapshot() {
        info!("{}={}", name, value.as_deref().unwrap_or("<unset>"));
    }
    let memory = memory_info();
    info!(
        "Memory: {:.0} MB total, {:.0} MB available ({:.1}% used)",
        memory.total_mb, memory.available_mb, memory.percent
    );
}

/// Load the model once. A failed load yields a degraded service.
fn initialize_service(config: &ServerConfig) -> DetectionService {
    let mut loader = OnnxYoloLoader::new();
    if let Some(labels) = &config.labels_path {
        loader = loader.with_labels(labels);
    }

    let mut handle = ModelHandle::new(&config.model_path, config.profile);
    match handle.load(&loader) {
        Ok(()) => info!("Model ready: {} classes", handle.class_names().len()),
        Err(e) => error!("Continuing in degraded mode: {}", e),
    }

    DetectionService::new(handle, config.detection_config())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
