use clap::Parser;
use tamperdav::config::{Cli, Config};
use tamperdav::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli)?;

    let filter = if config.debug {
        EnvFilter::try_new("debug")
    } else {
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))
    }
    .expect("failed to build tracing filter");

    tracing_subscriber::fmt().with_env_filter(filter).init();

    if !config.auth_configured() && !config.no_auth_warning {
        tracing::warn!("no credentials configured; the server is unauthenticated");
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(root = %config.root, addr, "serving");

    let state = AppState::new(config);
    let router = tamperdav::server::router(state);

    axum::serve(listener, router).await?;
    Ok(())
}
