//! Client application for account linking

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use account_link_client::config::{ClientSettings, Config};
use account_link_client::{router, ClientState};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "account-link-client")]
#[command(about = "OAuth2 client application that links accounts via authorization code + PKCE")]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = 9094, env = "CLIENT_PORT")]
    port: u16,

    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0", env = "CLIENT_BIND")]
    bind: String,

    /// Base URL of the authorization server
    #[arg(long, default_value = "http://localhost:9096", env = "AUTH_SERVER_URL")]
    auth_server_url: String,

    /// This client's callback URL as registered with the authorization server
    #[arg(long, default_value = "http://localhost:9094/oauth2", env = "REDIRECT_URL")]
    redirect_url: String,

    /// Client id registered with the authorization server
    #[arg(long, env = "CLIENT_ID")]
    client_id: String,

    /// Client secret registered with the authorization server
    #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
    client_secret: String,

    /// Path to config directory
    #[arg(long, default_value = "./config", env = "CLIENT_CONFIG_PATH")]
    config_path: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "account_link_client=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = Config::load(&cli.config_path)?;
    let settings = ClientSettings {
        auth_server_url: cli.auth_server_url.clone(),
        redirect_url: cli.redirect_url.clone(),
        client_id: cli.client_id.clone(),
        client_secret: cli.client_secret.clone(),
    };
    let state = Arc::new(ClientState::new(config, settings)?);

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

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port).parse()?;

    tracing::info!("Starting account-link-client on {}", addr);
    tracing::info!("Authorization server: {}", cli.auth_server_url);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Client shut down");
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
