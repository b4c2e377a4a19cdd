//! Inquest server - operational request orchestration and delegation engine

use clap::Parser;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::PathBuf;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inquest::config::Config;
use inquest::AppState;

#[derive(Parser, Debug)]
#[command(name = "inquest", about = "Operational request orchestration server")]
struct Args {
    /// Path to the configuration file
    #[arg(long, env = "INQUEST_CONFIG", default_value = "inquest.json")]
    config: PathBuf,

    /// Listen address
    #[arg(long, env = "INQUEST_LISTEN", default_value = "0.0.0.0:3000")]
    listen: String,

    /// Database URL for the session archive
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:inquest.db")]
    database_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inquest=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // Configuration and capability registry are fatal when broken
    let config = Config::load(&args.config)?;

    // Database connection
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&args.database_url)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    let state = AppState::new(&config, pool)?;

    // Build router
    let app = inquest::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
