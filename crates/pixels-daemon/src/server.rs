//! Web server setup and routing

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api;
use crate::state::AppState;
use crate::ws;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/peripherals", get(api::list_peripherals))
        .route("/api/peripherals/{id}", get(api::get_peripheral))
        .route("/api/peripherals/{id}/connect", post(api::connect_peripheral))
        .route("/api/peripherals/{id}/profile", post(api::program_profile))
        .route("/api/peripherals/{id}/cancel", post(api::cancel_peripheral))
        .route("/api/peripherals/{id}/retry", post(api::retry_peripheral))
        .route("/api/peripherals/{id}/firmware", post(api::update_firmware))
        .route("/api/queue", get(api::get_queue))
        .route("/api/adapter", post(api::set_adapter))
        .route("/api/profiles", get(api::list_profiles))
        .route("/api/profiles/{uuid}/dataset", get(api::get_dataset))
        // WebSocket for real-time updates
        .route("/ws", get(ws::websocket_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve until ctrl-c, then flush the library and pairings to disk
pub async fn run(state: Arc<AppState>, bind: &str) -> Result<()> {
    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, protocol = "HTTP", "Starting web server");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    state.save_library().await?;
    state.save_pairings().await?;
    Ok(())
}
