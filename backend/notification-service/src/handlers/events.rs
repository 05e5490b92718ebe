//! Internal publish endpoint for producer services

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::sse::Event;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PublishEventPayload {
    pub user_uuid: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

/// Push an event to every open stream of a user
///
/// Endpoint: POST /notification/v1/inner/notifications/events
///
/// Accepted even when nothing is delivered; delivery is best-effort.
pub async fn publish_event(
    state: web::Data<AppState>,
    payload: web::Json<PublishEventPayload>,
) -> HttpResponse {
    let PublishEventPayload {
        user_uuid,
        event_type,
        data,
    } = payload.into_inner();

    state
        .notifier
        .publish_notification(&user_uuid, Event::new(event_type, data))
        .await;

    HttpResponse::Accepted().json(json!({ "status": "ok" }))
}
