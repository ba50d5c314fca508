//! Bird feeder watcher
//!
//! This crate periodically captures an image at a bird feeder, runs an object
//! detection model over it, and records per-hour sighting counts per species.
//!
//! # Architecture
//!
//! One poll cycle is: capture -> preprocess -> infer -> decode -> per-class NMS
//! -> species labels -> observation store. The store keeps exactly one record per
//! normalized species name and flags the species seen in the latest cycle as
//! `currently_observed`.
//!
//! # Module Structure
//!
//! - `ingest`: Image sources (synthetic, still image file, V4L2, HTTP snapshot)
//! - `frame`: Captured frames and model input tensors
//! - `detect`: Model output decoding, NMS, species pipeline, inference backends
//! - `observation`: Species records and hourly counters
//! - `storage`: Transactional sighting store (SQLite, in-memory)
//! - `poll`: The background capture/detect/record loop
//! - `api`: Read/write HTTP API
//! - `token`: Feeder pairing token

use anyhow::Result;
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod api;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod observation;
pub mod poll;
pub mod storage;
pub mod token;

pub use detect::{
    decode, iou, suppress, BoundingBox, ClassLabels, Detection, DetectionThresholds,
    InferenceBackend, LabelDriftError, RawOutput, SharedBackend, SpeciesDetector, StubBackend,
};
pub use frame::{Frame, InputTensor};
pub use ingest::{open_source, CaptureError, FrameSource};
pub use observation::{
    hour_of, normalize_label, split_names, HourOfDay, HourlyObservations, SightingSummary,
    SpeciesRecord,
};
pub use poll::{PollHandle, PollLoop, PollStats};
pub use storage::{
    open_sqlite_handles, InMemorySightingStore, SightingStore, SqliteSightingStore,
};
pub use token::FeederToken;

pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:birdfeeder_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

/// Resolve `:memory:` to a shared-cache URI so every connection opened from the
/// returned path sees the same database.
pub fn resolve_db_path(db_path: &str) -> String {
    if db_path == ":memory:" {
        shared_memory_uri()
    } else {
        db_path.to_string()
    }
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

/// Seconds since the Unix epoch.
pub fn now_s() -> Result<i64> {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    Ok(i64::try_from(secs)?)
}
