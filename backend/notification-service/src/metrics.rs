use std::time::Duration;

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder,
};

fn register<T: prometheus::core::Collector + Clone + 'static>(collector: T, name: &str) -> T {
    prometheus::default_registry()
        .register(Box::new(collector.clone()))
        .unwrap_or_else(|e| panic!("failed to register {}: {}", name, e));
    collector
}

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "notification_service_http_requests_total",
            "Total HTTP requests handled by notification-service",
        ),
        &["method", "path", "status"],
    )
    .expect("failed to create notification_service_http_requests_total");
    register(counter, "notification_service_http_requests_total")
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "notification_service_http_request_duration_seconds",
            "HTTP request latency for notification-service",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        &["method", "path", "status"],
    )
    .expect("failed to create notification_service_http_request_duration_seconds");
    register(histogram, "notification_service_http_request_duration_seconds")
});

static SSE_EVENTS_PUBLISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "notification_sse_events_published_total",
            "Events accepted by the publish entrypoint, by delivery path",
        ),
        &["path"],
    )
    .expect("failed to create notification_sse_events_published_total");
    register(counter, "notification_sse_events_published_total")
});

static SSE_EVENTS_DELIVERED: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "notification_sse_events_delivered_total",
        "Events enqueued onto a subscriber queue",
    )
    .expect("failed to create notification_sse_events_delivered_total");
    register(counter, "notification_sse_events_delivered_total")
});

static SSE_EVENTS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "notification_sse_events_dropped_total",
        "Events dropped because a subscriber queue was full",
    )
    .expect("failed to create notification_sse_events_dropped_total");
    register(counter, "notification_sse_events_dropped_total")
});

static SSE_ACTIVE_SUBSCRIPTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "notification_sse_active_subscriptions",
        "Open subscriber queues on this instance",
    )
    .expect("failed to create notification_sse_active_subscriptions");
    register(gauge, "notification_sse_active_subscriptions")
});

static RELAY_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "notification_relay_failures_total",
            "Relay failures by stage (publish, decode)",
        ),
        &["stage"],
    )
    .expect("failed to create notification_relay_failures_total");
    register(counter, "notification_relay_failures_total")
});

static RELAY_RECONNECTS: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "notification_relay_reconnects_total",
        "Relay subscriber reconnect attempts",
    )
    .expect("failed to create notification_relay_reconnects_total");
    register(counter, "notification_relay_reconnects_total")
});

/// Which path the publish entrypoint took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishPath {
    Local,
    Relay,
}

impl PublishPath {
    fn as_label(self) -> &'static str {
        match self {
            PublishPath::Local => "local",
            PublishPath::Relay => "relay",
        }
    }
}

pub fn event_published(path: PublishPath) {
    SSE_EVENTS_PUBLISHED.with_label_values(&[path.as_label()]).inc();
}

pub fn events_delivered(count: usize) {
    SSE_EVENTS_DELIVERED.inc_by(count as u64);
}

pub fn event_dropped() {
    SSE_EVENTS_DROPPED.inc();
}

pub fn subscription_opened() {
    SSE_ACTIVE_SUBSCRIPTIONS.inc();
}

pub fn subscription_closed() {
    SSE_ACTIVE_SUBSCRIPTIONS.dec();
}

/// Current value of the open-subscriptions gauge
pub fn active_subscriptions() -> i64 {
    SSE_ACTIVE_SUBSCRIPTIONS.get()
}

pub fn relay_publish_failed() {
    RELAY_FAILURES.with_label_values(&["publish"]).inc();
}

pub fn relay_decode_failed() {
    RELAY_FAILURES.with_label_values(&["decode"]).inc();
}

pub fn relay_reconnect() {
    RELAY_RECONNECTS.inc();
}

pub fn observe_http_request(method: &str, path: &str, status: u16, elapsed: Duration) {
    let status_label = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status_label])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path, &status_label])
        .observe(elapsed.as_secs_f64());
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;
use std::time::Instant;

pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        // Route pattern keeps label cardinality bounded for query-string users
        let path = req
            .match_pattern()
            .unwrap_or_else(|| req.path().to_string());
        let method = req.method().to_string();
        let start = Instant::now();

        Box::pin(async move {
            let result = service.call(req).await;
            let elapsed = start.elapsed();
            match &result {
                Ok(response) => {
                    observe_http_request(&method, &path, response.status().as_u16(), elapsed);
                }
                Err(_) => {
                    observe_http_request(&method, &path, 500, elapsed);
                }
            }
            result
        })
    }
}
