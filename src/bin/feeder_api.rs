//! feeder_api - API-only service for the bird feeder
//!
//! Serves the sightings database without capturing or running a model.
//! Useful for a dashboard host that shares the database with a remote
//! capture box, or for feeding sightings in by hand.

use anyhow::Result;
use std::sync::mpsc;

use birdfeeder::{
    api::{ApiConfig, ApiServer},
    config::FeederConfig,
    resolve_db_path, FeederToken, SqliteSightingStore,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = FeederConfig::load()?;
    let (token, _) = FeederToken::load_or_create(&cfg.api.token_path)?;
    log::info!(
        "feeder token from {} (fingerprint {})",
        cfg.api.token_path.display(),
        token.fingerprint()
    );

    let store = SqliteSightingStore::open(&resolve_db_path(&cfg.db_path))?;
    let api_config = ApiConfig {
        addr: cfg.api.addr.clone(),
        write_token: Some(token),
    };
    let api_handle = ApiServer::new(api_config, Box::new(store)).spawn()?;
    log::info!("bird api listening on {}", api_handle.addr);
    log::info!("feeder_api running. serving {}", cfg.db_path);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("feeder_api waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()
}
