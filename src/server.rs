use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::{ConfigStore, MonitorConfig, PublicConfig};
use crate::state::LastStatus;

struct ServerState {
    config: ConfigStore,
    status: LastStatus,
}

type SharedServerState = Arc<ServerState>;

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct RootResponse {
    pub status: String,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct StatusResponse {
    pub message: String,
}

pub fn router(config: ConfigStore, status: LastStatus) -> Router {
    let state = Arc::from(ServerState { config, status });

    Router::new()
        .route("/", get(root))
        .route("/config", get(get_config).post(update_config))
        .route("/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the API until `shutdown` turns true or its sender is dropped.
pub async fn start(
    address: String,
    config: ConfigStore,
    status: LastStatus,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let app = router(config, status);

    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
    })
    .await?;

    Ok(())
}

async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        status: String::from("running"),
        message: String::from("Stock Monitor is active"),
    })
}

async fn get_config(State(state): State<SharedServerState>) -> Json<PublicConfig> {
    let config = state.config.get().await;
    Json(PublicConfig::from(&config))
}

async fn update_config(
    State(state): State<SharedServerState>,
    Json(config): Json<MonitorConfig>,
) -> Json<PublicConfig> {
    let config = state.config.set(config).await;
    info!(
        "Config updated through API ({} holdings)",
        config.portfolio.len()
    );
    Json(PublicConfig::from(&config))
}

async fn get_status(State(state): State<SharedServerState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        message: state.status.get().await,
    })
}
