//! # summer-camp
//!
//! Backend API for a summer-camp class enrollment platform.
//!
//! Serves banners, classes, users, instructors, pending enrollments and payments from a
//! document store, guards routes with JWT bearer tokens and stored roles, and creates
//! payment intents through an external gateway.
//!
//! ## Architecture
//!
//! - **Store**: `DocumentStore` trait with MongoDB and in-memory backends, opened at
//!   startup and closed after the server stops
//! - **Auth**: HS256 access tokens from `POST /jwt`; roles read from the users collection
//! - **Enrollment**: payment, seat move and pending-enrollment removal as one atomic unit
//! - **HTTP**: Axum router with rate limiting, request IDs, CORS and graceful shutdown

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

mod auth;
mod config;
mod enrollment;
mod http;
mod payments;
mod records;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::serve;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::auth::TokenKeys;
use crate::config::{AppConfig, Cli, StoreKind};
use crate::http::{router, AppState};
use crate::payments::{PaymentGateway, StripeGateway};
use crate::store::{DocumentStore, MemoryStore, MongoStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging().context("failed to initialize logging")?;

    let cli = Cli::parse();
    let config = AppConfig::from_cli(cli).context("failed to load configuration")?;
    info!(
        bind = %config.bind,
        store = config.store.as_str(),
        database = ?config.database.as_ref().map(|db| db.name.as_str()),
        token_ttl = %humantime::format_duration(config.token_ttl),
        payments_enabled = config.payments.is_some(),
        "configuration loaded"
    );

    let store = open_store(&config).await?;

    let payments = match &config.payments {
        Some(gateway) => {
            let gateway = StripeGateway::new(gateway).context("failed to build payment gateway")?;
            Some(Arc::new(gateway) as Arc<dyn PaymentGateway>)
        }
        None => {
            warn!("PAYMENT_SECRET_KEY not set; payment intents are disabled");
            None
        }
    };

    let state = AppState {
        store: Arc::clone(&store),
        tokens: Arc::new(TokenKeys::new(&config.jwt_secret, config.token_ttl)),
        payments,
    };

    let app = router(state);
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    let shutdown = tokio::signal::ctrl_c();
    info!(bind = %config.bind, "Server is running on port {}", config.bind.port());

    let served = serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = shutdown.await;
        info!("shutting down gracefully");
    })
    .await
    .context("server exited with error");

    store.close().await;
    served
}

/// Initialize tracing subscriber with `RUST_LOG` env filter (default: `info`).
fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}

/// Connects the configured backend. The returned store is shared by every request and
/// closed by `main` once the server has stopped.
async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn DocumentStore>> {
    match config.store {
        StoreKind::Memory => {
            warn!("using in-memory store; data is lost on shutdown");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreKind::Mongo => {
            let database = config
                .database
                .as_ref()
                .context("mongo store selected without database settings")?;
            let store = MongoStore::connect(&database.uri, &database.name)
                .await
                .with_context(|| format!("failed to connect to database {}", database.name))?;
            Ok(Arc::new(store))
        }
    }
}
