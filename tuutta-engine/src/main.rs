//! tuutta-engine - Compliance risk and automation engine
//!
//! Serves the manual job API and runs the scheduled jobs (outbox fan-out,
//! notification dispatch, risk scoring, daily sweeps, manager digest) until
//! interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tuutta_common::Datastore;

use tuutta_engine::config::{Args, EngineConfig};
use tuutta_engine::notifications::{HttpPushSender, SendGridEmailSender};
use tuutta_engine::webhooks::ReqwestWebhookClient;
use tuutta_engine::{build_router, scheduler, AppState, Collaborators, Engine, EngineSettings};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml_config = tuutta_common::config::load_or_default(args.config.as_deref());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| {
                    tracing_subscriber::EnvFilter::try_new(
                        toml_config.logging.level.as_deref().unwrap_or("tuutta_engine=info,tower_http=info"),
                    )
                })
                .unwrap_or_else(|_| "tuutta_engine=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        built = env!("BUILD_TIMESTAMP"),
        profile = env!("BUILD_PROFILE"),
        "Starting tuutta-engine"
    );

    let config = EngineConfig::resolve(&args, &toml_config);

    let store = Datastore::open(&config.database_path)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;
    info!("Database: {}", config.database_path.display());

    let collaborators = Collaborators {
        email: Arc::new(
            SendGridEmailSender::new(
                config.sendgrid_api_key.clone(),
                config.email_from.clone(),
                config.email_from_name.clone(),
            )
            .context("Failed to build email client")?,
        ),
        push: Arc::new(
            HttpPushSender::new(config.push_gateway_url.clone(), config.push_api_key.clone())
                .context("Failed to build push client")?,
        ),
        webhook: Arc::new(
            ReqwestWebhookClient::new(config.webhook_timeout).context("Failed to build webhook client")?,
        ),
    };
    let settings = EngineSettings {
        verification_base_url: config.verification_base_url.clone(),
        notification_batch_size: config.notification_batch_size,
    };
    let engine = Arc::new(Engine::new(store, collaborators, settings));

    let cancel = CancellationToken::new();
    let jobs = if config.run_scheduler {
        scheduler::spawn_jobs(Arc::clone(&engine), &config.cadences, cancel.clone())
    } else {
        info!("Scheduler disabled");
        Vec::new()
    };

    let app = build_router(AppState::new(engine));

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_address))?;
    info!("Listening on http://{}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    for job in jobs {
        let _ = job.await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
