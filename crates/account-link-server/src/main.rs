//! OAuth2 authorization server for account linking

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use account_link_server::config::Config;
use account_link_server::credentials::ClientRegistration;
use account_link_server::{router, AppState};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "account-link-server")]
#[command(about = "OAuth2 authorization server (authorization code + PKCE) for account linking")]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = 9096, env = "SERVER_PORT")]
    port: u16,

    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0", env = "AUTH_BIND")]
    bind: String,

    /// Path to config directory
    #[arg(long, default_value = "./config", env = "AUTH_CONFIG_PATH")]
    config_path: String,

    /// Public URL for this service (token issuer and OAuth metadata)
    #[arg(long, default_value = "http://localhost:9096", env = "AUTH_SERVER_URL")]
    public_url: String,

    /// Registered client id
    #[arg(long, env = "CLIENT_ID")]
    client_id: String,

    /// Registered client secret
    #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
    client_secret: String,

    /// Origin every redirect_uri of the client must belong to
    #[arg(long, default_value = "http://localhost:9094", env = "AUTH_CLIENT_URL")]
    client_domain: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "account_link_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config_path)?;
    let client = ClientRegistration {
        client_id: cli.client_id.clone(),
        client_secret: cli.client_secret.clone(),
        allowed_redirect_domain: cli.client_domain.clone(),
    };
    let state = Arc::new(AppState::new(config, client, &cli.public_url)?);

    // Periodically drop expired codes, grants and sessions
    let purge_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = purge_state.purge_expired().await {
                tracing::warn!("Failed to purge expired records: {:#}", e);
            }
        }
    });

    let app = router(state);

    // Parse bind address
    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port).parse()?;

    tracing::info!("Starting account-link-server on {}", addr);
    tracing::info!("Public URL: {}", cli.public_url);
    tracing::info!("Registered client {} for {}", cli.client_id, cli.client_domain);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Authorization server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
