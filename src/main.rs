use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod auth;
mod cache;
mod config;
mod db;
mod events;
mod models;
mod services;
mod utils;
mod websocket;

use crate::cache::{CacheManager, RedisConfig};
use crate::config::AppConfig;
use crate::db::{Database, Store};
use crate::services::market::MarketDataService;
use crate::services::matching::{MatchingConfig, MatchingEngine};
use crate::services::messaging::{MessageSink, NoopSink, WebhookSink};
use crate::services::orders::OrderBookService;
use crate::websocket::{RoomRegistry, SessionFanOut};

pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub store: Store,
    pub cache: Arc<CacheManager>,
    pub fanout: Arc<SessionFanOut>,
    pub engine: Arc<MatchingEngine>,
    pub orders: Arc<OrderBookService>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "commex_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;

    tracing::info!("Starting Commex Backend v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.environment);

    // Database
    let db = Database::connect(&config.database_url).await?;
    let store = Store::new(db.pool.clone());
    tracing::info!("Database connected");

    // Market cache (Redis); the process runs degraded without it
    let cache = if config.redis_url.is_empty() {
        tracing::warn!("No Redis configured, cache disabled");
        Arc::new(CacheManager::disabled())
    } else {
        let cache = Arc::new(
            CacheManager::new(RedisConfig {
                url: config.redis_url.clone(),
                ..Default::default()
            })
            .await,
        );
        if cache.is_available().await {
            tracing::info!("Cache manager initialized with Redis at {}", config.redis_url);
        } else {
            tracing::warn!("Cache manager running without Redis (graceful degradation)");
        }
        cache
    };

    // Prime the activity flag from durable state so the first periodic
    // pass picks up any book that survived a restart.
    match store.has_active_orders().await {
        Ok(active) => {
            if let Some(market) = cache.market_opt() {
                market.set_has_active_orders(active).await;
            }
            if active {
                tracing::info!("Recovered live orders from database, matching enabled");
            } else {
                tracing::info!("No live orders to recover");
            }
        }
        Err(e) => tracing::warn!("Could not check for recovered orders: {}", e),
    }

    // Session fan-out
    let rooms = Arc::new(RoomRegistry::new());
    let fanout = Arc::new(SessionFanOut::new(rooms));
    tracing::info!("Session fan-out initialized");

    // External messaging sink
    let sink: Arc<dyn MessageSink> = match &config.messaging_webhook_url {
        Some(url) => {
            tracing::info!("Messaging gateway configured at {}", url);
            Arc::new(WebhookSink::new(url.clone()))
        }
        None => {
            tracing::warn!("No messaging gateway configured, outbound messages disabled");
            Arc::new(NoopSink)
        }
    };

    // Market data projections
    let market = Arc::new(MarketDataService::new(cache.clone(), fanout.clone()));

    // Matching engine
    let engine = Arc::new(MatchingEngine::new(
        store.clone(),
        cache.clone(),
        fanout.clone(),
        market.clone(),
        sink,
        MatchingConfig {
            commission_rate: config.commission_rate,
            interval_secs: config.matching_interval_secs,
            pass_budget_secs: config.match_pass_budget_secs,
            qcsm_deadline_secs: config.qcsm_deadline_secs,
            spread_alert_cap: config.spread_alert_cap,
            mirror_ttl_secs: config.book_mirror_ttl_secs,
        },
    ));
    engine.start();
    tracing::info!(
        "Matching engine started (tick {}s, confirmation deadline {}s, negotiation deadline {}s)",
        config.matching_interval_secs,
        config.qcsm_deadline_secs,
        config.negotiation_deadline_secs
    );

    // Order book service
    let orders = Arc::new(OrderBookService::new(
        store.clone(),
        cache.clone(),
        fanout.clone(),
        market,
        engine.clone(),
        config.max_orders_per_user,
        config.order_expiry_hours,
    ));
    tracing::info!(
        "Order book service initialized (cap {} orders/user, expiry {}h)",
        config.max_orders_per_user,
        config.order_expiry_hours
    );

    // Build application state
    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        store,
        cache,
        fanout,
        engine,
        orders,
    });

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api::routes::create_router(state.clone()))
        .nest("/ws", websocket::routes::create_router(state.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let database_ok = sqlx::query("SELECT 1")
        .execute(&state.db.pool)
        .await
        .is_ok();
    let cache_ok = state.cache.is_available().await;

    Json(serde_json::json!({
        "status": if database_ok { "ok" } else { "degraded" },
        "database": database_ok,
        "cache": cache_ok,
    }))
}
