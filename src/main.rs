use std::sync::Arc;

use relay_hub::config::HubConfig;
use relay_hub::hub::Hub;
use relay_hub::store::{MemoryStore, RedisStore, Store};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = HubConfig::from_env();

    let store: Arc<dyn Store> = match &config.redis_addr {
        Some(addr) => {
            let store = RedisStore::connect(addr)
                .await
                .expect("failed to connect to redis");
            info!(addr = %addr, "using redis store");
            Arc::new(store)
        }
        None => {
            info!("using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let hub = Arc::new(Hub::new(
        store,
        config.panel_auth_token.clone(),
        config.default_sdk_auth_token.clone(),
    ));

    for route in &config.routes {
        if let Err(err) = hub
            .add_route(&route.target_id, &route.url, route.auth_token.clone())
            .await
        {
            tracing::warn!(target_id = %route.target_id, %err, "failed to apply configured route");
        }
    }

    for upstream in &config.upstreams {
        hub.start_managed_upstream(
            upstream.target_id.clone(),
            upstream.url.clone(),
            upstream.auth_token.clone(),
            config.reconnect_interval,
        );
    }

    let router = relay_hub::http::build_router(hub, &config.panel_path);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind");
    info!(addr = %config.listen_addr, panel_path = %config.panel_path, "relay hub listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
    info!("relay hub shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT); `axum::serve`'s own graceful
/// shutdown gives in-flight connections a window to drain (§5).
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        () = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
