//! dw-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads config, opens
//! the store, wires the back-end bundle, spawns the loops, and starts the
//! HTTP server. Route handlers live in `routes.rs`; loop supervision in
//! `loops.rs`; shared state in `state.rs`.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use dw_backends::{Backends, ManagedRail, StateChannel};
use dw_backend_paper::PaperWorld;
use dw_daemon::{loops, routes, state};
use tokio::sync::watch;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = dw_config::load()?;

    let pool = dw_store::connect(&config.database_url).await?;
    dw_store::migrate(&pool).await?;

    let backends = assemble_backends(&config);

    let audit = Arc::new(Mutex::new(dw_audit::AuditWriter::new(
        "docwarden-audit.jsonl",
        true,
    )?));

    let http_addr = config.http_addr;
    let shared = Arc::new(state::AppState::new(pool, backends, config, audit));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = loops::spawn_loops(Arc::clone(&shared), shutdown_rx);

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive());

    info!("dw-daemon listening on http://{http_addr}");

    axum::serve(tokio::net::TcpListener::bind(http_addr).await?, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested; loops will finish their in-flight tick");
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("server crashed")?;

    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Paper back-ends stand in until the real SDK wrappers are wired at this
/// seam; per-back-end enable flags still decide which optional slots exist.
fn assemble_backends(config: &dw_config::Config) -> Backends {
    let world = PaperWorld::new();

    let channel: Option<Arc<dyn StateChannel>> = if config.channel_enabled {
        Some(world.channel.clone())
    } else {
        None
    };
    let managed_rail: Option<Arc<dyn ManagedRail>> = if config.managed_wallet_enabled {
        Some(world.managed_rail.clone())
    } else {
        None
    };

    Backends { channel, managed_rail, ..world.backends() }
}
