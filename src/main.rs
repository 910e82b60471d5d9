use std::sync::Arc;

use daydream_core::api::start_http_server;
use daydream_core::config;
use daydream_core::core::{CameraCore, NullWifiDriver};
use daydream_core::settings::SettingsStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    daydream_core::init_logging();
    tracing::info!(version = config::APP_VERSION, "starting");

    std::fs::create_dir_all(config::app_data_dir())?;
    std::fs::create_dir_all(config::media_dir())?;

    let settings = Arc::new(SettingsStore::open(&config::settings_db_path())?);
    let core = CameraCore::new(settings, config::media_dir(), Arc::new(NullWifiDriver));

    let mut http = start_http_server(core.api_context(), config::HTTP_BIND_IP, config::HTTP_BIND_PORT).await?;
    tracing::info!(addr = %http.addr, "HTTP companion API listening");

    let ble = Arc::clone(&core.ble);
    let ble_task = tokio::spawn(async move {
        if let Err(e) = ble.run().await {
            tracing::error!(error = %e, "BLE server exited");
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    http.shutdown();
    ble_task.abort();

    Ok(())
}
