//! datacat HTTP server.
//!
//! Startup order matters: pool, then one-time DDL under the advisory lock,
//! then schema discovery, then the router. The discovered schema is frozen
//! before the first request is accepted.

use anyhow::Result;
use axum::http::Method;
use datacat_core::{db, AppConfig, JoinPlan, SchemaCache};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod routes;
mod state;

use state::{AppState, SchemaContext};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "datacat=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    config.validate()?;
    info!("starting datacat server");
    info!("database: {}", mask_db_uri(&config.dsn()));
    info!("main table: {}", config.main_table);

    let pool = db::connect_pool(&config).await?;
    db::ensure_schema(&pool).await?;

    let cache = SchemaCache::load(&pool, &config.main_table).await?;
    let plan = JoinPlan::build(&cache)?;
    info!(
        navigation = cache.navigation.len(),
        "schema analysis frozen"
    );

    let auth = datacat_auth::AuthConfig {
        jwt_secret: config.jwt_secret.clone(),
        cookie_prefix: config.cookie_prefix.clone(),
        required_role: config.required_role.clone(),
    };

    let state = Arc::new(AppState {
        pool,
        schema: RwLock::new(Arc::new(SchemaContext { cache, plan })),
        config: config.clone(),
        auth,
    });

    let app = routes::router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Hide credentials when logging the DSN.
fn mask_db_uri(uri: &str) -> String {
    if let (Some(proto_end), Some(at_pos)) = (uri.find("://"), uri.rfind('@')) {
        if at_pos > proto_end {
            return format!("{}://***@{}", &uri[..proto_end], &uri[at_pos + 1..]);
        }
    }
    uri.to_string()
}
