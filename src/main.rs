//! # Audio Notation Backend - Main Application Entry Point
//!
//! HTTP service that turns an uploaded audio recording into sheet music: the upload is
//! normalized to canonical WAV, transcribed to MIDI, and exported as MusicXML.
//!
//! ## Application Architecture:
//! - **config**: application configuration (TOML file + environment variables)
//! - **state**: shared state, job slots and metrics
//! - **health**: health and metrics endpoints
//! - **middleware**: request logging and metrics collection
//! - **handlers**: HTTP request handlers (`/transcribe`, `/config`)
//! - **error**: error kinds and their HTTP responses
//! - **audio**: format normalization (passthrough, in-process decode, external transcoder)
//! - **workspace**: per-request scratch directories
//! - **transcription**: inference backends and MIDI artifact lookup
//! - **notation**: MIDI to MusicXML export and duration metadata
//! - **pipeline**: the stage-by-stage orchestrator
//! - **process**: time-limited runs of external programs

mod audio;
mod config;
mod device;
mod error;
mod handlers;
mod health;
mod middleware;
mod notation;
mod pipeline;
mod process;
mod state;
mod transcription;
mod workspace;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::{Context, Result};
use crate::config::AppConfig;
use crate::pipeline::TranscriptionPipeline;
use crate::state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once a termination signal arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// ## Startup order:
/// 1. `.env`, logging, configuration (validated before anything else runs)
/// 2. Workspace root created; directories left by an interrupted run are swept
/// 3. Pipeline and shared state built once, then cloned into every worker
/// 4. Server runs until it fails or a SIGTERM/SIGINT arrives
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let workspace_root = config.workspace_root();
    std::fs::create_dir_all(&workspace_root).with_context(|| {
        format!("Failed to create workspace root {}", workspace_root.display())
    })?;
    let swept = workspace::sweep_stale(
        &workspace_root,
        &config.workspace.prefix,
        workspace::STALE_AFTER,
    );
    if swept > 0 {
        info!(swept, root = %workspace_root.display(), "Removed stale workspaces");
    }

    let pipeline = TranscriptionPipeline::from_config(&config);
    info!(
        backend = pipeline.engine().backend_name(),
        model = %pipeline.engine().options().model,
        transcoder = pipeline.transcoder().program(),
        max_jobs = config.performance.max_concurrent_jobs,
        "Transcription pipeline ready"
    );

    let app_state = AppState::new(config.clone(), pipeline);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/transcribe", web::post().to(handlers::transcribe))
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config)),
            )
            .route("/transcribe", web::post().to(handlers::transcribe))
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            // In-flight jobs finish and clean their workspaces before workers exit
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` controls the filter; defaults to
/// `audio_notation_backend=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audio_notation_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("Failed to install signal handlers, relying on server defaults: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
