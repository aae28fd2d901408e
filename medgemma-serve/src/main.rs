mod config;
mod error;
mod routes;
mod schema;
mod state;

use medgemma_vlm::device;

use crate::config::{Args, ServeConfig};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Args = argh::from_env();
    let config = ServeConfig::from_args(args)?;

    device::log_diagnostics(config.force_cpu);
    if config.check_device {
        return Ok(());
    }

    let state = AppState::from_config(&config);
    if config.preload {
        let state = state.clone();
        tokio::task::spawn_blocking(move || state.preload()).await?;
    } else {
        log::info!("Models will be loaded on the first request");
    }

    let app = routes::router(state, &config.cors_origins, config.max_upload_bytes);

    let address = config.bind_address();
    log::info!("🚀 Starting the server");
    log::info!("🔥 Listening on: http://{address}");
    log::info!("🔧 Press Ctrl+C to stop the server");

    let listener = tokio::net::TcpListener::bind(&address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for Ctrl+C: {e}");
    }
    log::info!("Shutting down");
}
