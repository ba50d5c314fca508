use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::observation::{
    hour_of, normalize_label, HourlyObservations, SightingSummary, SpeciesRecord,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Transactional store of species records.
///
/// `record_sightings` applies the whole reset-then-upsert sequence atomically:
/// readers see either the state before the call or the state after it.
pub trait SightingStore: Send {
    /// Record one detection per label occurrence at `now` (seconds since epoch).
    ///
    /// Every `currently_observed` flag is cleared first, then each normalized
    /// label is created or incremented and flagged. An empty `labels` only
    /// clears the flags and returns [`SightingSummary::NoSightings`].
    fn record_sightings(&mut self, labels: &[String], now: i64) -> Result<SightingSummary>;

    /// All records, ordered by name.
    fn birds(&mut self) -> Result<Vec<SpeciesRecord>>;

    /// Look up one record by (normalized) name.
    fn bird(&mut self, name: &str) -> Result<Option<SpeciesRecord>>;
}

pub struct SqliteSightingStore {
    conn: Connection,
}

impl SqliteSightingStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = crate::open_db_connection(db_path)
            .with_context(|| format!("failed to open sightings database {}", db_path))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS species (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL UNIQUE,
              last_seen INTEGER NOT NULL,
              currently_observed INTEGER NOT NULL DEFAULT 0,
              hourly_observations TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_species_observed ON species(currently_observed);
            "#,
        )?;
        Ok(())
    }
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, i64, bool, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_record(
    (name, last_seen, currently_observed, hourly_json): (String, i64, bool, String),
) -> Result<SpeciesRecord> {
    let hourly_observations: HourlyObservations = serde_json::from_str(&hourly_json)
        .with_context(|| format!("corrupt hourly observations for '{}'", name))?;
    Ok(SpeciesRecord {
        name,
        last_seen,
        currently_observed,
        hourly_observations,
    })
}

impl SightingStore for SqliteSightingStore {
    fn record_sightings(&mut self, labels: &[String], now: i64) -> Result<SightingSummary> {
        let hour = hour_of(now)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "UPDATE species SET currently_observed = 0 WHERE currently_observed = 1",
            [],
        )?;

        let mut recorded = Vec::with_capacity(labels.len());
        for label in labels {
            let Some(name) = normalize_label(label) else {
                log::debug!("skipping blank species label");
                continue;
            };
            let existing: Option<String> = tx
                .query_row(
                    "SELECT hourly_observations FROM species WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;

            match existing {
                None => {
                    let record = SpeciesRecord::first_sighting(name.clone(), now, hour);
                    tx.execute(
                        r#"
                        INSERT INTO species(name, last_seen, currently_observed, hourly_observations)
                        VALUES (?1, ?2, 1, ?3)
                        "#,
                        params![
                            record.name,
                            record.last_seen,
                            serde_json::to_string(&record.hourly_observations)?
                        ],
                    )?;
                }
                Some(hourly_json) => {
                    let mut hourly: HourlyObservations = serde_json::from_str(&hourly_json)
                        .with_context(|| format!("corrupt hourly observations for '{}'", name))?;
                    hourly.increment(hour);
                    tx.execute(
                        r#"
                        UPDATE species
                        SET last_seen = ?2, currently_observed = 1, hourly_observations = ?3
                        WHERE name = ?1
                        "#,
                        params![name, now, serde_json::to_string(&hourly)?],
                    )?;
                }
            }
            recorded.push(name);
        }

        tx.commit()?;

        if recorded.is_empty() {
            Ok(SightingSummary::NoSightings)
        } else {
            Ok(SightingSummary::Recorded { labels: recorded })
        }
    }

    fn birds(&mut self) -> Result<Vec<SpeciesRecord>> {
        let rows = {
            let mut stmt = self.conn.prepare(
                "SELECT name, last_seen, currently_observed, hourly_observations FROM species ORDER BY name ASC",
            )?;
            let rows = stmt
                .query_map([], record_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        rows.into_iter().map(into_record).collect()
    }

    fn bird(&mut self, name: &str) -> Result<Option<SpeciesRecord>> {
        let Some(name) = normalize_label(name) else {
            return Ok(None);
        };
        let row = self
            .conn
            .query_row(
                "SELECT name, last_seen, currently_observed, hourly_observations FROM species WHERE name = ?1",
                params![name],
                record_from_row,
            )
            .optional()?;
        row.map(into_record).transpose()
    }
}

/// In-memory store with the same semantics, for tests and ephemeral runs.
///
/// Changes are applied to a copy that replaces the live map only on success.
#[derive(Clone, Debug, Default)]
pub struct InMemorySightingStore {
    records: BTreeMap<String, SpeciesRecord>,
}

impl InMemorySightingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SightingStore for InMemorySightingStore {
    fn record_sightings(&mut self, labels: &[String], now: i64) -> Result<SightingSummary> {
        let hour = hour_of(now)?;
        let mut next = self.records.clone();
        for record in next.values_mut() {
            record.currently_observed = false;
        }

        let mut recorded = Vec::with_capacity(labels.len());
        for label in labels {
            let Some(name) = normalize_label(label) else {
                continue;
            };
            match next.get_mut(&name) {
                Some(record) => record.sighted_again(now, hour),
                None => {
                    next.insert(
                        name.clone(),
                        SpeciesRecord::first_sighting(name.clone(), now, hour),
                    );
                }
            }
            recorded.push(name);
        }

        self.records = next;
        if recorded.is_empty() {
            Ok(SightingSummary::NoSightings)
        } else {
            Ok(SightingSummary::Recorded { labels: recorded })
        }
    }

    fn birds(&mut self) -> Result<Vec<SpeciesRecord>> {
        Ok(self.records.values().cloned().collect())
    }

    fn bird(&mut self, name: &str) -> Result<Option<SpeciesRecord>> {
        Ok(normalize_label(name).and_then(|name| self.records.get(&name).cloned()))
    }
}

/// Open the two store handles the API and the poll loop write through.
///
/// A database file gets one connection per handle; IMMEDIATE transactions
/// keep them apart. An in-memory database lives in SQLite's shared cache,
/// whose table locks fail at once instead of waiting, so both handles share a
/// single connection behind a mutex.
pub fn open_sqlite_handles(
    db_path: &str,
) -> Result<(Box<dyn SightingStore>, Box<dyn SightingStore>)> {
    let resolved = crate::resolve_db_path(db_path);
    if resolved.contains("mode=memory") {
        let shared = Arc::new(Mutex::new(SqliteSightingStore::open(&resolved)?));
        return Ok((Box::new(shared.clone()), Box::new(shared)));
    }
    Ok((
        Box::new(SqliteSightingStore::open(&resolved)?),
        Box::new(SqliteSightingStore::open(&resolved)?),
    ))
}

/// A store behind a mutex serializes whole calls, so it can be shared between
/// the poll loop and other writers.
impl<S: SightingStore> SightingStore for Arc<Mutex<S>> {
    fn record_sightings(&mut self, labels: &[String], now: i64) -> Result<SightingSummary> {
        self.lock()
            .map_err(|_| anyhow!("sighting store lock poisoned"))?
            .record_sightings(labels, now)
    }

    fn birds(&mut self) -> Result<Vec<SpeciesRecord>> {
        self.lock()
            .map_err(|_| anyhow!("sighting store lock poisoned"))?
            .birds()
    }

    fn bird(&mut self, name: &str) -> Result<Option<SpeciesRecord>> {
        self.lock()
            .map_err(|_| anyhow!("sighting store lock poisoned"))?
            .bird(name)
    }
}
