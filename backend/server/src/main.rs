//! Blue Carbon MRV server — entry point.
//!
//! Receives field submissions for coastal restoration projects, scores them,
//! drives the verification lifecycle, reconciles evidence uploads, and
//! registers eligible projects with the blockchain service. Exposes an Axum
//! REST API for field apps and admin tooling.

mod api;
mod chain;
mod config;
mod db;
mod errors;
mod evidence;
mod ipfs;
mod lifecycle;
mod model;
mod orchestrator;
mod registry;
mod scoring;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use reqwest::Client;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chain::ChainCoordinator;
use config::Config;
use ipfs::EvidenceStore;
use orchestrator::AppState;
use registry::Registry;
use scoring::ScoringEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    // Load config from environment.
    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    // HTTP client shared by the blockchain coordinator and evidence store.
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    let store = EvidenceStore::new(client.clone(), &config);
    if !store.is_configured() {
        info!("evidence store token not set; file uploads disabled");
    }

    let state = Arc::new(AppState {
        registry: Registry::new(),
        chain: ChainCoordinator::new(client, &config),
        store,
        engine: ScoringEngine::new(config.enhanced_scoring),
        pool,
    });

    let app = Router::new()
        .route("/api/health", get(api::health))
        .route("/api/status", get(api::status))
        .route("/api/projects", post(api::create_project).get(api::list_projects))
        .route("/api/projects/:id", get(api::get_project))
        .route("/api/projects/:id/verify", post(api::reverify_project))
        .route(
            "/api/projects/:id/verification-status",
            get(api::verification_status),
        )
        .route("/api/projects/:id/review", post(api::review_project))
        .route(
            "/api/projects/:id/third-party-report",
            post(api::third_party_report),
        )
        .route("/api/evidence/upload", post(api::upload_evidence))
        .route("/api/evidence/store", get(api::list_store))
        .route("/api/evidence/store/:content_id", delete(api::unpin_store))
        .route("/api/projects/:id/evidence", get(api::list_evidence))
        .route(
            "/api/projects/:id/verification-records",
            get(api::verification_records),
        )
        .route(
            "/api/blockchain/projects/:id/approve",
            post(api::chain_approve),
        )
        .route(
            "/api/blockchain/projects/:id/tokenize",
            post(api::chain_tokenize),
        )
        .route(
            "/api/blockchain/projects/:id/timeline",
            get(api::chain_timeline),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("Blue Carbon MRV API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
