//! Murmur server binary.
//!
//! Configuration comes entirely from environment variables (see
//! `murmur_common::Config`). Exit codes: 0 on clean shutdown, 64 on
//! configuration errors, 70 on unexpected runtime failures, 75 when a
//! dependency (the store) is unavailable.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use murmur_api::{serve, AppState};
use murmur_common::{Config, MurmurError, EXIT_CONFIG, EXIT_RUNTIME, EXIT_UNAVAILABLE};

fn exit_code_for(err: &MurmurError) -> i32 {
    match err {
        MurmurError::Config(_) => EXIT_CONFIG,
        MurmurError::StoreUnavailable(_) => EXIT_UNAVAILABLE,
        _ => EXIT_RUNTIME,
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,murmur_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Invalid configuration");
            std::process::exit(EXIT_CONFIG);
        }
    };

    let bind_addr = match config.bind_addr.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, addr = %config.bind_addr, "Invalid bind address");
            std::process::exit(EXIT_CONFIG);
        }
    };

    let state = match AppState::build(config).await {
        Ok(state) => Arc::new(state),
        Err(err) => {
            error!(error = %err, "Startup failed");
            std::process::exit(exit_code_for(&err));
        }
    };

    let server = tokio::spawn(serve(Arc::clone(&state), bind_addr));

    tokio::select! {
        result = server => {
            let err = match result {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(exit_code_for(&err)),
                Err(_) => Some(EXIT_RUNTIME),
            };
            if let Some(code) = err {
                error!("Server terminated unexpectedly");
                let _ = state.shutdown().await;
                std::process::exit(code);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    if let Err(err) = state.shutdown().await {
        error!(error = %err, "Shutdown failed");
        std::process::exit(EXIT_RUNTIME);
    }
}
