//! Hookwell API server

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hookwell_api::{routes, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hookwell_api=info,hookwell_capture=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("loading configuration")?;

    let pool = hookwell_shared::db::create_pool(
        &config.database_url,
        config.database_max_connections,
    )
    .await
    .context("connecting to database")?;

    hookwell_shared::db::run_migrations(&pool)
        .await
        .context("running migrations")?;

    if config.capture_shared_secret.is_none() {
        tracing::warn!("CAPTURE_SHARED_SECRET is not set; all receiver calls will be rejected");
    }

    let bind_address = config.bind_address.clone();
    let state = AppState::new(config, pool);
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("binding {bind_address}"))?;
    tracing::info!(address = %bind_address, "Hookwell API listening");

    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
