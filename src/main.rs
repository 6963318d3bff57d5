#[cfg(feature = "transport_ble")]
mod ble;
mod charts;
mod config;
mod error;
mod features;
mod frame;
mod link;
mod record;
mod ring;
mod router;
mod session;
mod transport;
mod uploader;
mod validate;

use config::Config;
use features::HeuristicClassifier;
use session::MonitorSession;
use std::time::Duration;
use transport::{ReplayTransport, Transport};
use uploader::JsonlStore;

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            log::warn!("Falling back to default config: {}", e);
            Config::default()
        }
    };

    let transport = match build_transport(&config) {
        Some(transport) => transport,
        None => {
            log::error!(
                "No capture file given and no radio device configured; \
                 pass a capture file argument or set device_id in the config"
            );
            std::process::exit(1);
        }
    };

    let store = Box::new(JsonlStore::new(&config.upload.store_path));
    let session =
        MonitorSession::start_with_config(&config, transport, store, Box::new(HeuristicClassifier));

    // Headless status loop; charts and predictions are read from the
    // session by whatever front end is attached.
    loop {
        std::thread::sleep(Duration::from_secs(5));
        let status = session.status();
        log::info!(
            "link={:?} routed={} dropped={} upload_ok={:?} activity={}",
            status.link,
            status.records_routed,
            status.records_dropped,
            status.upload.last_flush_ok,
            status
                .prediction
                .map(|p| p.label)
                .unwrap_or_else(|| "-".to_string()),
        );
    }
}

/// A capture file argument replays a recorded stream; otherwise the
/// configured radio device is used when BLE support is compiled in.
fn build_transport(config: &Config) -> Option<Box<dyn Transport>> {
    if let Some(path) = std::env::args().nth(1) {
        match ReplayTransport::from_file(
            &path,
            ReplayTransport::DEFAULT_CHUNK_LEN,
            Duration::from_millis(50),
        ) {
            Ok(transport) => {
                log::info!("Replaying capture from {}", path);
                return Some(Box::new(transport));
            }
            Err(e) => {
                log::error!("Cannot open capture file {}: {}", path, e);
                std::process::exit(1);
            }
        }
    }

    #[cfg(feature = "transport_ble")]
    if !config.device_id.is_empty() {
        log::info!("Using radio device {}", config.device_id);
        return Some(Box::new(ble::BleTransport::new(config.device_id.clone())));
    }

    #[cfg(not(feature = "transport_ble"))]
    let _ = config;

    None
}
