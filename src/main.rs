use actix_web::{web, App, HttpServer};
use realtime_delivery_service::{
    config, db, error, logging,
    repository::PgStore,
    routes,
    state::AppState,
    websocket::pubsub::{start_relay_listener, RelayPublisher},
};
use tracing_actix_web::TracingLogger;

#[actix_web::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = config::Config::from_env()?;

    let redis = match &cfg.redis_url {
        Some(url) => Some(
            redis::Client::open(url.as_str())
                .map_err(|e| error::AppError::Config(format!("REDIS_URL: {e}")))?,
        ),
        None => None,
    };
    let relay = redis
        .clone()
        .map(|client| RelayPublisher::spawn(client, cfg.instance_id.clone()));

    let state = match &cfg.database_url {
        Some(url) => {
            let pool = db::init_pool(url, cfg.db_max_connections).await?;
            AppState::postgres(cfg.clone(), PgStore::new(pool), relay)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            AppState::in_memory(cfg.clone())
        }
    };

    if let Some(client) = redis {
        let registry = state.registry.clone();
        let instance_id = cfg.instance_id.clone();
        tokio::spawn(async move {
            if let Err(e) = start_relay_listener(client, instance_id, registry).await {
                tracing::error!(error = %e, "relay listener failed");
            }
        });
    }

    // Reap connections whose heartbeat stopped without a close frame
    let presence = state.presence.clone();
    let (interval, timeout) = (cfg.heartbeat_interval, cfg.client_timeout);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            presence.expire_stale(timeout).await;
        }
    });

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, instance_id = %cfg.instance_id, "starting realtime-delivery-service");

    let auth = web::Data::new(state.auth.clone());
    let state = web::Data::new(state);
    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(TracingLogger::default())
            .app_data(state.clone())
            .app_data(auth.clone())
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind REST: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("REST server: {e}")))
}
