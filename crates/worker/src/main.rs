//! `liveportrait-worker` -- serverless LivePortrait worker.
//!
//! Launches ComfyUI, waits for it to answer its health endpoint, then
//! serves jobs either over the local HTTP API or by polling the
//! serverless platform. Exits non-zero if ComfyUI is not ready in time
//! or dies afterwards.
//!
//! See [`WorkerConfig::from_env`] for the environment variables.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use liveportrait_comfyui::api::ComfyUIApi;
use liveportrait_worker::config::{WorkerConfig, WorkerMode};
use liveportrait_worker::handler::{HandlerConfig, JobHandler};
use liveportrait_worker::platform::{self, PlatformClient};
use liveportrait_worker::router::build_app_router;
use liveportrait_worker::state::AppState;
use liveportrait_worker::supervisor::{self, EXIT_STARTUP_FAILURE};

/// Connect timeout for every outbound request (ComfyUI, downloads, platform).
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    init_tracing();

    // --- Configuration ---
    let config = WorkerConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });
    tracing::info!(
        comfyui_url = %config.comfyui_url,
        comfyui_dir = %config.comfyui_dir.display(),
        mode = ?config.mode,
        "Starting liveportrait-worker",
    );

    let http = reqwest::Client::builder()
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to build HTTP client");
            std::process::exit(1);
        });
    let api = ComfyUIApi::with_client(http.clone(), config.comfyui_url.clone());

    // --- ComfyUI startup ---
    let mut child = if config.comfyui_external {
        tracing::info!("COMFYUI_EXTERNAL set, not launching ComfyUI");
        None
    } else {
        match supervisor::launch(&config) {
            Ok(child) => Some(child),
            Err(e) => {
                tracing::error!(error = %e, "ComfyUI launch failed");
                std::process::exit(EXIT_STARTUP_FAILURE);
            }
        }
    };

    if let Err(e) = supervisor::await_ready(child.as_mut(), &api, &config.readiness).await {
        tracing::error!(error = %e, "ComfyUI failed to start");
        supervisor::terminate(child.as_mut()).await;
        std::process::exit(EXIT_STARTUP_FAILURE);
    }

    // --- Handoff ---
    let handler = Arc::new(JobHandler::new(
        api,
        http.clone(),
        HandlerConfig {
            input_dir: config.input_dir(),
            output_dir: config.output_dir(),
            execution: config.execution.clone(),
        },
    ));

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    let config = Arc::new(config);
    let work = run_mode(Arc::clone(&config), Arc::clone(&handler), http, cancel.clone());

    let code = tokio::select! {
        result = work => match result {
            Ok(()) => 0,
            Err(e) => {
                tracing::error!(error = %e, "Worker stopped with an error");
                1
            }
        },
        status = supervisor::wait_exit(child.as_mut()) => {
            match status {
                Ok(status) => tracing::error!(%status, "ComfyUI exited unexpectedly"),
                Err(e) => tracing::error!(error = %e, "Lost track of ComfyUI process"),
            }
            1
        }
    };

    supervisor::terminate(child.as_mut()).await;
    tracing::info!(code, "Shutdown complete");
    std::process::exit(code);
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "liveportrait_worker=info,liveportrait_comfyui=info,liveportrait_core=info,tower_http=info"
            .into()
    });
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run_mode(
    config: Arc<WorkerConfig>,
    handler: Arc<JobHandler>,
    http: reqwest::Client,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    match (config.mode, config.platform.clone()) {
        (WorkerMode::Poll, Some(platform_config)) => {
            let client = PlatformClient::new(http, platform_config);
            platform::run(&client, &handler, cancel).await;
            Ok(())
        }
        _ => serve(config, handler, cancel).await,
    }
}

async fn serve(
    config: Arc<WorkerConfig>,
    handler: Arc<JobHandler>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let ip = config.host.parse().map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Invalid HOST '{}': {e}", config.host),
        )
    })?;
    let addr = SocketAddr::new(ip, config.port);

    let app = build_app_router(AppState {
        config: Arc::clone(&config),
        handler,
    });

    tracing::info!(%addr, "Starting local API");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the worker
/// shuts down cleanly whether stopped interactively or by the container
/// runtime.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
