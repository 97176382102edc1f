mod config;
mod logging;

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use murmur_api::notify::LogNotifier;
use murmur_api::routes;
use murmur_api::state::AppStateInner;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    logging::init();

    let config = Config::from_env()?;
    if config.auth.expose_codes {
        warn!("Verification codes are echoed in /auth/start responses; do not run this way in production");
    }

    // Init database
    let db = Arc::new(murmur_db::Database::open(&config.db_path)?);

    let state = AppStateInner::new(db, config.auth.clone(), Arc::new(LogNotifier));

    let app = routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Murmur server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
