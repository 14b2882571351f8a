//! SetuIO - control-plane daemon for FPGA peripherals

use setu_io::daemon::Daemon;
use setu_io::{Config, Result};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("SetuIO v0.3.0 starting...");

    // Get config path from args or default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/setuio.toml".to_string());

    log::info!("Using config: {}", config_path);
    let config = Config::load(&config_path)?;

    log::info!(
        "Board link: {} at {} baud",
        config.serial.port,
        config.serial.baud_rate
    );

    let mut daemon = Daemon::new(config)?;

    // Set up shutdown signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| setu_io::Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    log::info!("SetuIO running. Press Ctrl-C to stop.");
    let result = daemon.run(&running);

    match &result {
        Ok(()) => log::info!("SetuIO stopped"),
        Err(e) => log::error!("SetuIO exiting: {}", e),
    }
    result
}
