mod camera;
mod clock;
mod config;
mod director;
mod hub;
mod hunter;
mod queue;
mod spatial;
mod state;
mod track;

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use clock::SystemClock;
use config::BackendConfig;
use director::{Director, DirectorStatus};

// ─── Status Endpoints ─────────────────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

async fn status(State(rx): State<watch::Receiver<DirectorStatus>>) -> Json<DirectorStatus> {
    Json(rx.borrow().clone())
}

// ─── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pitwall_backend=info".into()),
        )
        .init();

    info!("🎥 Pitwall TV Director starting...");

    let cfg = BackendConfig::default();

    // Channels: telemetry in, camera commands out, status snapshots around
    let (events_tx, events_rx) = mpsc::channel(256);
    let (cam_tx, cam_rx) = mpsc::channel(64);
    let (status_tx, status_rx) = watch::channel(DirectorStatus::default());

    let director = Director::new(cfg.director, Arc::new(SystemClock), cam_tx, status_tx);

    tokio::spawn(hub::run_telemetry_hub(cfg.telemetry_port, events_tx));
    tokio::spawn(camera::run_camera_link(cam_rx, cfg.camera_addr.clone()));
    tokio::spawn(director.run(events_rx));

    // CORS — allow all origins (the status page runs wherever)
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build Axum router
    let app = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(status_rx)
        .layer(cors);

    let addr = format!("0.0.0.0:{}", cfg.status_port);
    info!("🚀 Status surface on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
