//! Recording handlers

use super::AppState;
use crate::recorder::bot::{RoomStatus, StartOutcome};
use crate::utils::error::{ErrorResponse, RecorderError};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

pub const USAGE_HINT: &str =
    "Need to roomName as get request. Ex: http://localhost:3000/start?roomName=test";

#[derive(Debug, Default, Deserialize)]
pub struct StartParams {
    #[serde(rename = "roomName")]
    pub room_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub rooms: Vec<RoomStatus>,
}

pub async fn index() -> &'static str {
    "Hello World!"
}

/// Start recording a room in the background
pub async fn start_recording(
    State(state): State<AppState>,
    Query(params): Query<StartParams>,
) -> String {
    let Some(room) = params.room_name.filter(|name| !name.trim().is_empty()) else {
        return USAGE_HINT.to_string();
    };

    match state.bot.start(&room) {
        StartOutcome::Started => "recording started....".to_string(),
        StartOutcome::AlreadyRecording => format!("room {} is already being recorded", room),
    }
}

pub async fn recording_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        rooms: state.bot.rooms(),
    })
}

/// Status of a single room
pub async fn room_status(
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> Result<Json<RoomStatus>, (StatusCode, Json<ErrorResponse>)> {
    state.bot.room_status(&room).map(Json).ok_or_else(|| {
        let error = RecorderError::Room(format!("room {} is not being recorded", room));
        (StatusCode::NOT_FOUND, Json(ErrorResponse::from(error)))
    })
}
