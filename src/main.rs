//! Campost server - campus courier routing

use clap::Parser;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use campost::config::ConfigHandle;
use campost::routing::spawn_sweeper;
use campost::{api, AppState};

#[derive(Parser, Debug)]
#[command(name = "campost")]
#[command(about = "Campus courier routing server")]
struct Args {
    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:campost.db")]
    database_url: String,

    /// Address to listen on
    #[arg(long, env = "CAMPOST_BIND", default_value = "0.0.0.0:3000")]
    bind: String,

    /// JSON policy file (masking, cancel policy, TTLs, capacity)
    #[arg(long, env = "CAMPOST_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campost=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ConfigHandle::from_path(path)?,
        None => ConfigHandle::default(),
    };

    // Database connection
    let options = SqliteConnectOptions::from_str(&args.database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    let state = AppState::with_config(pool, config);
    state.store.migrate().await?;

    let sweeper = spawn_sweeper(state.router.clone(), Arc::clone(&state.config));

    let app = api::app(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    sweeper.abort();

    Ok(())
}
