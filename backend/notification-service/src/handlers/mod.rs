//! HTTP handlers for the notification stream API

pub mod events;
pub mod stream;

use actix_web::{error::JsonPayloadError, web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::error::AppError;
use crate::state::AppState;

pub use events::publish_event;
pub use stream::{open_stream, resolve_user, stream_stats, stream_status};

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error))
        .service(
            web::scope("/notification/v1/inner")
                .route("/notifications/stream", web::get().to(open_stream))
                .route("/notifications/stream/status", web::get().to(stream_status))
                .route("/notifications/stream/stats", web::get().to(stream_stats))
                .route("/notifications/events", web::post().to(publish_event)),
        )
        .route("/health", web::get().to(health));
}

/// Liveness plus relay link state (`disabled` when running without Redis)
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let relay = state
        .notifier
        .relay_state()
        .map(|s| json!(s))
        .unwrap_or_else(|| json!("disabled"));

    HttpResponse::Ok().json(json!({
        "status": "ok",
        "relay": relay
    }))
}

fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    AppError::BadRequest(err.to_string()).into()
}
