use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use notification_service::{
    handlers::register_routes,
    logging, metrics,
    sse::{Bridge, BridgeHandle, Hub, Notifier, RedisBroker, ShutdownSignal},
    AppState, Config,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    logging::init_tracing(config.log_format);

    info!(
        env = %config.app.env,
        relay = config.redis.is_some(),
        "Starting notification service"
    );

    let hub = Hub::with_capacity(config.sse.queue_capacity);
    let (notifier, bridge_handle) = start_delivery(&config, hub).await;

    let shutdown = ShutdownSignal::new();
    let state = AppState::new(notifier, config.sse.heartbeat_interval(), shutdown.clone());

    let addr = config.bind_addr();
    info!("Starting HTTP server on {}", addr);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(middleware::Logger::default())
            .wrap(metrics::MetricsMiddleware)
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .configure(register_routes)
    })
    .disable_signals()
    .bind(&addr)
    .with_context(|| format!("failed to bind {}", addr))?
    .run();

    let server_handle = server.handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        // Streams never finish on their own; close them before the graceful stop
        shutdown.trigger();
        server_handle.stop(true).await;
    });

    server.await.context("HTTP server error")?;

    if let Some(handle) = bridge_handle {
        handle.shutdown().await;
    }

    info!("Notification service shutdown complete");
    Ok(())
}

/// Connect the relay bridge when Redis is configured, else deliver locally.
///
/// A Redis connection failure at startup degrades to local-only delivery.
async fn start_delivery(config: &Config, hub: Hub) -> (Notifier, Option<BridgeHandle>) {
    let Some(redis) = &config.redis else {
        info!("REDIS_URL not set, sse relay disabled");
        return (Notifier::local(hub), None);
    };

    match RedisBroker::connect(&redis.url).await {
        Ok(broker) => {
            let bridge = Arc::new(Bridge::new(
                Arc::new(broker),
                hub,
                config.sse.bridge_config(),
            ));
            let handle = Arc::clone(&bridge).spawn();
            (Notifier::relayed(bridge), Some(handle))
        }
        Err(e) => {
            warn!(
                error = %e,
                "Failed to connect to Redis, sse relay disabled for this instance"
            );
            (Notifier::local(hub), None)
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
