//! SSE stream endpoint and connection status handlers

use actix_web::http::header::{CACHE_CONTROL, CONNECTION};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::error::{AppError, Result};
use crate::sse::event_stream;
use crate::state::AppState;

pub const USER_HEADER: &str = "X-User-UUID";

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_uuid: Option<String>,
}

/// Resolve the streaming user: `X-User-UUID` header first, then the
/// `user_uuid` query parameter.
pub fn resolve_user(req: &HttpRequest, query: &UserQuery) -> Result<String> {
    let from_header = req
        .headers()
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let from_query = query
        .user_uuid
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty());

    from_header
        .or(from_query)
        .map(str::to_string)
        .ok_or_else(|| AppError::BadRequest("user_uuid is required".to_string()))
}

/// Open a notification stream
///
/// Endpoint: GET /notification/v1/inner/notifications/stream
pub async fn open_stream(
    req: HttpRequest,
    query: web::Query<UserQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let user_id = resolve_user(&req, &query)?;
    if state.stream.shutdown.is_triggered() {
        return Err(AppError::ServiceUnavailable("shutting down".to_string()));
    }

    let subscription = state.notifier.hub().subscribe(user_id.clone());
    info!(
        user_id = %user_id,
        subscriber = ?subscription.id(),
        "sse stream opened"
    );

    let body = event_stream(
        subscription,
        state.stream.heartbeat_interval,
        state.stream.shutdown.subscribe(),
    );

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((CACHE_CONTROL, "no-cache"))
        .insert_header((CONNECTION, "keep-alive"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(body))
}

/// Get stream connection status for a user
///
/// Endpoint: GET /notification/v1/inner/notifications/stream/status?user_uuid=
pub async fn stream_status(
    req: HttpRequest,
    query: web::Query<UserQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let user_id = resolve_user(&req, &query)?;
    let connection_count = state.notifier.hub().connection_count(&user_id);

    Ok(HttpResponse::Ok().json(json!({
        "user_uuid": user_id,
        "connected": connection_count > 0,
        "connection_count": connection_count
    })))
}

/// Get aggregate stream metrics
///
/// Endpoint: GET /notification/v1/inner/notifications/stream/stats
pub async fn stream_stats(state: web::Data<AppState>) -> HttpResponse {
    let hub = state.notifier.hub();
    let total_connections = hub.total_connections();
    let connected_users = hub.connected_users();

    HttpResponse::Ok().json(json!({
        "total_connections": total_connections,
        "connected_users": connected_users,
        "average_connections_per_user": if connected_users > 0 {
            total_connections as f64 / connected_users as f64
        } else {
            0.0
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_header_wins_over_query() {
        let req = TestRequest::default()
            .insert_header((USER_HEADER, "from-header"))
            .to_http_request();
        let query = UserQuery {
            user_uuid: Some("from-query".into()),
        };

        assert_eq!(resolve_user(&req, &query).unwrap(), "from-header");
    }

    #[test]
    fn test_query_fallback() {
        let req = TestRequest::default().to_http_request();
        let query = UserQuery {
            user_uuid: Some("from-query".into()),
        };

        assert_eq!(resolve_user(&req, &query).unwrap(), "from-query");
    }

    #[test]
    fn test_blank_values_are_missing() {
        let req = TestRequest::default()
            .insert_header((USER_HEADER, "  "))
            .to_http_request();
        let query = UserQuery {
            user_uuid: Some(String::new()),
        };

        assert!(matches!(
            resolve_user(&req, &query),
            Err(AppError::BadRequest(_))
        ));
    }
}
