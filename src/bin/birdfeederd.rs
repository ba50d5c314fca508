//! birdfeederd - bird feeder watcher daemon
//!
//! This daemon:
//! 1. Loads the class label list and the inference backend (fatal on mismatch)
//! 2. Serves the bird API (reads open, writes gated by the feeder token)
//! 3. Every poll interval captures a frame, detects species and records them

use anyhow::{anyhow, Result};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use birdfeeder::{
    api::{ApiConfig, ApiServer},
    config::FeederConfig,
    detect::open_backend,
    open_source, open_sqlite_handles, ClassLabels, FeederToken, PollLoop, SpeciesDetector,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = FeederConfig::load()?;

    let labels = ClassLabels::load(&cfg.model.labels_path)?;
    log::info!(
        "loaded {} class labels from {}",
        labels.len(),
        cfg.model.labels_path.display()
    );
    let backend = open_backend(&cfg.model, &labels)?;
    let detector = SpeciesDetector::new(labels, cfg.detection)?;
    let source = open_source(&cfg.capture.source, cfg.capture.width, cfg.capture.height)?;

    let (token, created) = FeederToken::load_or_create(&cfg.api.token_path)?;
    if created {
        log::info!(
            "feeder token written to {} (fingerprint {})",
            cfg.api.token_path.display(),
            token.fingerprint()
        );
    } else {
        log::info!("feeder token loaded (fingerprint {})", token.fingerprint());
    }

    let api_config = ApiConfig {
        addr: cfg.api.addr.clone(),
        write_token: Some(token),
    };
    let (api_store, poll_store) = open_sqlite_handles(&cfg.db_path)?;
    let api_handle = ApiServer::new(api_config, api_store).spawn()?;
    log::info!("bird api listening on {}", api_handle.addr);

    let poll_handle = PollLoop::new(
        source,
        backend,
        detector,
        poll_store,
        cfg.poll_interval,
    )
    .spawn()?;
    log::info!("birdfeederd running. writing to {}", cfg.db_path);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("birdfeederd waiting for shutdown signal (Ctrl-C)...");
    loop {
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                log::info!("shutdown signal received, stopping...");
                break;
            }
            Err(RecvTimeoutError::Timeout) if poll_handle.is_finished() => {
                log::error!("poll loop exited, shutting down");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    let stats = poll_handle.stats();
    let poll_result = poll_handle.stop();
    api_handle
        .stop()
        .map_err(|e| anyhow!("api shutdown failed: {}", e))?;
    log::info!(
        "birdfeederd stopped: {} cycles, {} failed, {} sightings",
        stats.cycles,
        stats.failed_cycles,
        stats.sightings
    );
    poll_result
}
