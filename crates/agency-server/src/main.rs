mod auth;
mod clock;
mod config;
mod error;
mod handlers;
mod metrics_middleware;
mod middleware;
mod rate_limit;
mod relay;
mod router;
mod storage;
mod telemetry;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;

use crate::auth::SessionStore;
use crate::clock::SystemClock;
use crate::config::ServerConfig;
use crate::rate_limit::RateLimiters;
use crate::relay::ContactRelay;
use crate::router::{AdminCredentials, AppState};
use crate::storage::UploadStore;

#[tokio::main]
async fn main() -> ExitCode {
    if std::env::args().nth(1).as_deref() == Some("hash-password") {
        return hash_password_from_stdin().await;
    }

    let _telemetry = match telemetry::init_telemetry() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("server error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let limiters = RateLimiters::build(|name| config.rate_policy(name), Arc::new(SystemClock))?;
    for limiter in limiters.iter() {
        tracing::info!(
            policy = %limiter.name(),
            limit = %limiter.policy(),
            "rate limiter configured"
        );
    }
    let cleanup_tasks = limiters.spawn_cleanup(config.cleanup_interval);
    telemetry::register_rate_limit_metrics(limiters.clone());

    if config.admin_password_hash.is_none() {
        tracing::warn!("AGENCY_ADMIN_PASSWORD_HASH is not set, admin login is disabled");
    }

    let state = AppState {
        limiters,
        sessions: SessionStore::default(),
        admin: Arc::new(AdminCredentials {
            username: config.admin_username.clone(),
            password_hash: config.admin_password_hash.clone(),
            session_ttl: config.session_ttl,
        }),
        uploads: UploadStore::new(&config.upload_dir, config.upload_max_bytes),
        relay: ContactRelay::from_config(config.contact_webhook_url.clone()),
    };

    tracing::info!(
        dir = %state.uploads.dir().display(),
        max_bytes = state.uploads.max_bytes(),
        "storing uploads locally"
    );

    let app = router::build(state, &config.cors_origins);
    let addr = SocketAddr::from((config.host, config.port));

    tracing::info!("Starting agency server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for task in cleanup_tasks {
        let policy = task.policy();
        task.shutdown().await;
        tracing::debug!(%policy, "cleanup task stopped");
    }
    tracing::info!("server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
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
                tracing::error!(error = %e, "failed to listen for SIGTERM");
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

    tracing::info!("shutdown signal received");
}

/// `agency-server hash-password`: read one line from stdin and print its
/// Argon2 hash for `AGENCY_ADMIN_PASSWORD_HASH`.
async fn hash_password_from_stdin() -> ExitCode {
    let mut line = String::new();
    if let Err(e) = BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
        eprintln!("failed to read password: {e}");
        return ExitCode::FAILURE;
    }

    let password = line.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        eprintln!("password must not be empty");
        return ExitCode::FAILURE;
    }

    match auth::hash_password(password) {
        Ok(hash) => {
            println!("{hash}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("failed to hash password: {e}");
            ExitCode::FAILURE
        }
    }
}
