//! API route handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    Json,
};
use futures_util::{Stream, StreamExt};

use shared::{CommandPublishedResponse, DeviceId, DeviceState, HealthResponse, Snapshot};

use crate::api::AppState;
use crate::hub::{SessionFrame, StreamSession};

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        devices: state.hub.device_count(),
        subscribers: state.hub.subscriber_count(),
    })
}

// --- Devices ---

pub async fn robots_list(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.hub.snapshot())
}

pub async fn robots_get(
    State(state): State<AppState>,
    Path((manufacturer, serial)): Path<(String, String)>,
) -> Result<Json<DeviceState>, (StatusCode, String)> {
    let id = DeviceId::new(manufacturer, serial);
    state
        .hub
        .device(&id)
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, format!("unknown device {}", id)))
}

// --- Commands ---

/// Republish the request body to the device's command topic.
pub async fn command_send(
    State(state): State<AppState>,
    Path((manufacturer, serial)): Path<(String, String)>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<CommandPublishedResponse>, (StatusCode, String)> {
    if [&manufacturer, &serial]
        .iter()
        .any(|s| s.contains(['+', '#']))
    {
        return Err((
            StatusCode::BAD_REQUEST,
            "wildcards not allowed in device id".to_string(),
        ));
    }
    let topic = state.config.command_topic(&manufacturer, &serial);
    state
        .commands
        .publish(topic.clone(), &body)
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    tracing::info!(topic = %topic, "command queued");
    Ok(Json(CommandPublishedResponse {
        status: "published".to_string(),
        topic,
    }))
}

// --- Streams ---

pub async fn stream_all(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, (StatusCode, String)> {
    open_stream(&state, None)
}

pub async fn stream_device(
    State(state): State<AppState>,
    Path((manufacturer, serial)): Path<(String, String)>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, (StatusCode, String)> {
    open_stream(&state, Some(DeviceId::new(manufacturer, serial)))
}

/// Frames go out as `data:` events; keepalives as `: keepalive` comments.
/// When the client goes away the body stream is dropped, and the session with it.
fn open_stream(
    state: &AppState,
    filter: Option<DeviceId>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, (StatusCode, String)> {
    let session = StreamSession::open(
        &state.hub,
        state.config.outbox_capacity,
        state.config.idle_timeout,
        filter,
    )
    .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    tracing::debug!(subscription = %session.subscription().id(), "stream opened");

    let events = session.into_stream().map(|frame| match frame {
        SessionFrame::Frame(frame) => Event::default().json_data(&frame),
        SessionFrame::Keepalive => Ok(Event::default().comment("keepalive")),
    });
    Ok(Sse::new(events))
}
