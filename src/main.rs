//! Application entry point: parse arguments, initialize tracing, load the
//! configuration, and start the HTTP server.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatehouse::config::{
    Config, DEFAULT_CONFIG_PATH, DEFAULT_LISTEN_ADDR, DEFAULT_STATIC_ROOT,
};
use gatehouse::server::create_router;
use gatehouse::state::AppState;

/// Gatehouse: authenticating front door for static content
#[derive(Parser, Debug)]
#[command(name = "gatehouse", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Directory with the protected static content
    #[arg(short, long, default_value = DEFAULT_STATIC_ROOT)]
    static_root: PathBuf,

    /// Address to listen on
    #[arg(short, long, default_value = DEFAULT_LISTEN_ADDR)]
    listen: SocketAddr,

    /// Log level filter (e.g., "gatehouse=debug,tower_http=info")
    #[arg(short = 'L', long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;

    // Filter priority: CLI > env > configured logLevel
    let log_filter = args
        .log_level
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| config.log_filter());

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        user_pool = %config.user_pool_id,
        client_id = %config.client_id,
        region = %config.region(),
        auth_domain = %config.cognito_auth_domain,
        "Loaded configuration"
    );

    let state = AppState::new(config)?;
    let app = create_router(state, &args.static_root);

    tracing::info!("Starting server at http://{}", args.listen);
    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
