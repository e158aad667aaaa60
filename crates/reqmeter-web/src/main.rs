//! reqmeter demo server.
//!
//! Usage: `reqmeter-web [config.yaml]` (defaults to `reqmeter.yaml`).

use std::net::SocketAddr;

use tracing_subscriber::{fmt, EnvFilter};

use reqmeter_web::error::{Result, WebError};
use reqmeter_web::{app_state, config, demo, router};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("reqmeter-web: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "reqmeter.yaml".to_string());
    let cfg = config::load_from_file(&path)?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level));
    fmt().with_env_filter(filter).init();

    let listen: SocketAddr = cfg
        .server
        .listen
        .parse()
        .map_err(|e| WebError::Internal(format!("server.listen must be a valid SocketAddr: {e}")))?;

    let state = app_state::AppState::new(cfg, demo::route_table()?)?;
    let app = router::build_router(state, demo::routes());

    tracing::info!(%listen, config = %path, "reqmeter-web starting");
    let listener = tokio::net::TcpListener::bind(listen).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
