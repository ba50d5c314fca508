//! Background capture -> detect -> record loop.
//!
//! One thread runs cycles back to back with `interval` between them, so a
//! cycle (including its store commit) always completes before the next
//! capture starts. The only cancellation point is the wait between cycles.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::detect::{LabelDriftError, SharedBackend, SpeciesDetector};
use crate::ingest::FrameSource;
use crate::observation::SightingSummary;
use crate::storage::SightingStore;

/// Counters for a running loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Cycles that completed, including the store commit.
    pub cycles: u64,
    /// Cycles abandoned on a capture, inference or store error.
    pub failed_cycles: u64,
    /// Labels recorded across all completed cycles.
    pub sightings: u64,
}

pub struct PollLoop {
    source: Box<dyn FrameSource>,
    backend: SharedBackend,
    detector: SpeciesDetector,
    store: Box<dyn SightingStore>,
    interval: Duration,
}

impl PollLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        backend: SharedBackend,
        detector: SpeciesDetector,
        store: Box<dyn SightingStore>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            backend,
            detector,
            store,
            interval,
        }
    }

    /// Capture one frame, run it through the model and record the species
    /// found at `now`.
    pub fn run_cycle(&mut self, now: i64) -> Result<SightingSummary> {
        let frame = self.source.capture()?;
        let output = {
            let mut backend = self
                .backend
                .lock()
                .map_err(|_| anyhow!("backend lock poisoned"))?;
            let (width, height) = backend.input_size();
            let input = frame.to_input_tensor(width, height)?;
            backend.infer(&input)?
        };
        let species = self.detector.detect_species(&output)?;
        self.store.record_sightings(&species, now)
    }

    /// Connect the source and start cycling on a background thread.
    pub fn spawn(mut self) -> Result<PollHandle> {
        self.source.connect()?;
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(PollStats::default()));
        let stats_thread = stats.clone();

        log::info!(
            "poll loop started: source={} every {:?}",
            self.source.describe(),
            self.interval
        );
        let join = std::thread::spawn(move || -> Result<()> {
            loop {
                let outcome = crate::now_s().and_then(|now| self.run_cycle(now));
                match outcome {
                    Ok(summary) => {
                        if summary.is_empty() {
                            log::debug!("poll cycle: no birds observed");
                        } else {
                            log::info!("poll cycle: {}", summary.message());
                        }
                        if let Ok(mut stats) = stats_thread.lock() {
                            stats.cycles += 1;
                            stats.sightings += summary.labels().len() as u64;
                        }
                    }
                    Err(err) if err.downcast_ref::<LabelDriftError>().is_some() => {
                        log::error!("poll loop stopping: {:#}", err);
                        return Err(err);
                    }
                    Err(err) => {
                        log::warn!("poll cycle failed: {:#}", err);
                        if let Ok(mut stats) = stats_thread.lock() {
                            stats.failed_cycles += 1;
                        }
                    }
                }

                match stop_rx.recv_timeout(self.interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            log::info!(
                "poll loop stopped after {} frames",
                self.source.frames_captured()
            );
            Ok(())
        });

        Ok(PollHandle {
            stop_tx: Some(stop_tx),
            join: Some(join),
            stats,
        })
    }
}

#[derive(Debug)]
pub struct PollHandle {
    stop_tx: Option<Sender<()>>,
    join: Option<JoinHandle<Result<()>>>,
    stats: Arc<Mutex<PollStats>>,
}

impl PollHandle {
    /// Signal the loop and wait for it. A cycle in flight runs to completion.
    /// Returns the error that ended the loop, if one did.
    pub fn stop(mut self) -> Result<()> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("poll loop thread panicked"))?,
            None => Ok(()),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join
            .as_ref()
            .map(|join| join.is_finished())
            .unwrap_or(true)
    }

    pub fn stats(&self) -> PollStats {
        self.stats.lock().map(|stats| *stats).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{ClassLabels, DetectionThresholds, RawOutput, StubBackend};
    use crate::ingest::SyntheticSource;
    use crate::storage::InMemorySightingStore;
    use std::time::Instant;

    const T1: i64 = 1_700_000_000;

    fn detector(names: &[&str]) -> SpeciesDetector {
        let labels = ClassLabels::new(names.iter().map(|n| n.to_string()).collect()).unwrap();
        SpeciesDetector::new(labels, DetectionThresholds::default()).unwrap()
    }

    fn cardinal_output() -> RawOutput {
        RawOutput::from_candidates(&[vec![10.0, 10.0, 50.0, 50.0, 0.9, 0.8, 0.1]]).unwrap()
    }

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn cycle_records_detected_species() -> Result<()> {
        let stub = Arc::new(Mutex::new(StubBackend::new(32, 32, 2)?));
        stub.lock().unwrap().push_output(cardinal_output());
        let store = Arc::new(Mutex::new(InMemorySightingStore::new()));

        let mut poll = PollLoop::new(
            Box::new(SyntheticSource::new("stub://feeder", 48, 36)),
            stub.clone(),
            detector(&["Northern Cardinal", "Blue Jay"]),
            Box::new(store.clone()),
            Duration::from_secs(15),
        );
        let summary = poll.run_cycle(T1)?;
        assert_eq!(summary.labels(), &["northern cardinal".to_string()]);

        // stub falls back to an empty output: the next cycle only resets flags
        let summary = poll.run_cycle(T1 + 15)?;
        assert!(summary.is_empty());

        let mut view = store.clone();
        let record = view.bird("northern cardinal")?.expect("recorded");
        assert!(!record.currently_observed);
        assert_eq!(record.last_seen, T1);
        assert_eq!(stub.lock().unwrap().calls(), 2);
        Ok(())
    }

    #[test]
    fn failed_cycles_do_not_stop_the_loop() -> Result<()> {
        let stub = Arc::new(Mutex::new(StubBackend::new(16, 16, 2)?.with_output(cardinal_output())));
        stub.lock().unwrap().push_failure("lens fogged");
        let store = Arc::new(Mutex::new(InMemorySightingStore::new()));

        let handle = PollLoop::new(
            Box::new(SyntheticSource::new("stub://feeder", 16, 16)),
            stub,
            detector(&["cardinal", "blue jay"]),
            Box::new(store.clone()),
            Duration::from_millis(10),
        )
        .spawn()?;

        assert!(wait_until(Duration::from_secs(5), || handle.stats().cycles >= 2));
        assert!(!handle.is_finished());
        let stats = handle.stats();
        handle.stop()?;

        assert_eq!(stats.failed_cycles, 1);
        assert!(stats.sightings >= 2);
        let mut view = store;
        assert!(view.bird("cardinal")?.is_some());
        Ok(())
    }

    #[test]
    fn label_drift_ends_the_loop() -> Result<()> {
        let stub = Arc::new(Mutex::new(StubBackend::new(16, 16, 3)?));
        stub.lock().unwrap().push_output(RawOutput::from_candidates(&[vec![
            0.0, 0.0, 8.0, 8.0, 0.9, 0.0, 0.1, 0.9,
        ]])?);

        let handle = PollLoop::new(
            Box::new(SyntheticSource::new("stub://feeder", 16, 16)),
            stub,
            detector(&["cardinal", "blue jay"]),
            Box::new(InMemorySightingStore::new()),
            Duration::from_millis(10),
        )
        .spawn()?;

        assert!(wait_until(Duration::from_secs(5), || handle.is_finished()));
        let err = handle.stop().unwrap_err();
        let drift = err.downcast_ref::<LabelDriftError>().expect("label drift");
        assert_eq!(drift.class_id, 2);
        Ok(())
    }

    #[test]
    fn stop_interrupts_the_wait() -> Result<()> {
        let stub = Arc::new(Mutex::new(StubBackend::new(16, 16, 2)?));
        let handle = PollLoop::new(
            Box::new(SyntheticSource::new("stub://feeder", 16, 16)),
            stub,
            detector(&["cardinal", "blue jay"]),
            Box::new(InMemorySightingStore::new()),
            Duration::from_secs(3600),
        )
        .spawn()?;

        assert!(wait_until(Duration::from_secs(5), || handle.stats().cycles == 1));
        let start = Instant::now();
        handle.stop()?;
        assert!(start.elapsed() < Duration::from_secs(5));
        Ok(())
    }
}
