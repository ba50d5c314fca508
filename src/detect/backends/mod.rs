pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::backend::SharedBackend;
use super::labels::ClassLabels;
use crate::config::ModelSettings;

/// Build the configured inference backend and check it against the label list.
///
/// Any failure here is a startup error: unknown backend, missing model file,
/// or a class dimension that does not match `labels`.
pub fn open_backend(settings: &ModelSettings, labels: &ClassLabels) -> Result<SharedBackend> {
    let backend: SharedBackend = match settings.backend.as_str() {
        "stub" => Arc::new(Mutex::new(StubBackend::new(
            settings.input_width,
            settings.input_height,
            labels.len(),
        )?)),
        #[cfg(feature = "backend-tract")]
        "tract" => Arc::new(Mutex::new(TractBackend::new(
            &settings.path,
            settings.input_width,
            settings.input_height,
        )?)),
        #[cfg(not(feature = "backend-tract"))]
        "tract" => {
            return Err(anyhow!(
                "backend 'tract' requires the backend-tract feature"
            ))
        }
        other => return Err(anyhow!("unknown inference backend '{}'", other)),
    };

    verify_backend(&backend, labels)?;
    Ok(backend)
}

/// Warm the backend up and check its class dimension against `labels`.
/// A backend that cannot report its class count is rejected.
fn verify_backend(backend: &SharedBackend, labels: &ClassLabels) -> Result<()> {
    let mut guard = backend
        .lock()
        .map_err(|_| anyhow!("backend lock poisoned"))?;
    guard.warm_up()?;
    let count = guard.class_count().ok_or_else(|| {
        anyhow!(
            "backend {} could not determine the model's class count",
            guard.name()
        )
    })?;
    labels.ensure_class_count(count)?;
    let (width, height) = guard.input_size();
    log::info!(
        "inference backend {} ready ({}x{}, {} classes)",
        guard.name(),
        width,
        height,
        labels.len()
    );
    Ok(())
}
