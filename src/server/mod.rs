//! HTTP front door
//!
//! A small axum router that lets operators start recordings and inspect
//! what is being recorded.

pub mod recording;

use crate::recorder::RecordingBot;
use crate::utils::error::RecorderResult;
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub bot: Arc<RecordingBot>,
}

pub fn create_router(bot: Arc<RecordingBot>) -> Router {
    Router::new()
        .route("/", get(recording::index))
        .route("/start", get(recording::start_recording))
        .route("/status", get(recording::recording_status))
        .route("/status/:room", get(recording::room_status))
        .with_state(AppState { bot })
}

/// Serve the router on `addr` until `shutdown` resolves
pub async fn serve(
    bot: Arc<RecordingBot>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> RecorderResult<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, create_router(bot))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
