//! Species records and hourly sighting counters.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{anyhow, Result};
use chrono::{Local, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

pub const HOURS_PER_DAY: usize = 24;

/// Hour of the local day, 0..=23.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HourOfDay(u8);

impl HourOfDay {
    pub fn new(hour: u32) -> Result<Self> {
        if hour as usize >= HOURS_PER_DAY {
            return Err(anyhow!("hour of day must be within 0..=23 (got {})", hour));
        }
        Ok(Self(hour as u8))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for HourOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Local hour of day for a Unix timestamp (seconds).
pub fn hour_of(epoch_s: i64) -> Result<HourOfDay> {
    let local = Local
        .timestamp_opt(epoch_s, 0)
        .earliest()
        .ok_or_else(|| anyhow!("timestamp {} is out of range", epoch_s))?;
    HourOfDay::new(local.hour())
}

/// Per-hour detection counts, accumulated across all days.
///
/// Serialized as a JSON object keyed by the hour as a string ("0".."23"),
/// holding only the hours that have been seen.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, u64>", into = "BTreeMap<String, u64>")]
pub struct HourlyObservations {
    counts: [u64; HOURS_PER_DAY],
}

impl HourlyObservations {
    pub fn increment(&mut self, hour: HourOfDay) {
        let slot = &mut self.counts[hour.0 as usize];
        *slot = slot.saturating_add(1);
    }

    pub fn get(&self, hour: HourOfDay) -> u64 {
        self.counts[hour.0 as usize]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Hours with a non-zero count, in hour order.
    pub fn iter(&self) -> impl Iterator<Item = (HourOfDay, u64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(hour, count)| (HourOfDay(hour as u8), *count))
    }

    /// Add another counter slot by slot.
    pub fn merge(&mut self, other: &Self) {
        for (slot, extra) in self.counts.iter_mut().zip(other.counts.iter()) {
            *slot = slot.saturating_add(*extra);
        }
    }
}

impl TryFrom<BTreeMap<String, u64>> for HourlyObservations {
    type Error = anyhow::Error;

    fn try_from(map: BTreeMap<String, u64>) -> Result<Self> {
        let mut counts = [0u64; HOURS_PER_DAY];
        for (key, count) in map {
            let hour: u32 = key
                .trim()
                .parse()
                .map_err(|_| anyhow!("invalid hour key '{}'", key))?;
            let hour = HourOfDay::new(hour)?;
            counts[hour.0 as usize] = count;
        }
        Ok(Self { counts })
    }
}

impl From<HourlyObservations> for BTreeMap<String, u64> {
    fn from(hourly: HourlyObservations) -> Self {
        hourly
            .iter()
            .map(|(hour, count)| (hour.to_string(), count))
            .collect()
    }
}

/// Persistent per-species aggregate of sighting history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeciesRecord {
    /// Normalized (trimmed, lower-cased) species name.
    pub name: String,
    /// Seconds since epoch of the most recent detection.
    pub last_seen: i64,
    /// Detected in the most recently recorded cycle.
    pub currently_observed: bool,
    pub hourly_observations: HourlyObservations,
}

impl SpeciesRecord {
    pub(crate) fn first_sighting(name: String, now: i64, hour: HourOfDay) -> Self {
        let mut hourly_observations = HourlyObservations::default();
        hourly_observations.increment(hour);
        Self {
            name,
            last_seen: now,
            currently_observed: true,
            hourly_observations,
        }
    }

    pub(crate) fn sighted_again(&mut self, now: i64, hour: HourOfDay) {
        self.last_seen = now;
        self.currently_observed = true;
        self.hourly_observations.increment(hour);
    }
}

/// Outcome of one `record_sightings` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SightingSummary {
    /// Nothing was recorded; only the `currently_observed` flags were cleared.
    NoSightings,
    /// Normalized labels in call order, one entry per occurrence.
    Recorded { labels: Vec<String> },
}

impl SightingSummary {
    pub fn labels(&self) -> &[String] {
        match self {
            Self::NoSightings => &[],
            Self::Recorded { labels } => labels,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::NoSightings)
    }

    pub fn message(&self) -> String {
        match self {
            Self::NoSightings => "No birds observed".to_string(),
            Self::Recorded { labels } => format!("Added: {:?}", labels),
        }
    }
}

/// Trim and lower-case a species label. Blank labels normalize to `None`.
pub fn normalize_label(label: &str) -> Option<String> {
    let name = label.trim().to_lowercase();
    (!name.is_empty()).then_some(name)
}

/// Split a comma-delimited list of species names.
pub fn split_names(names: &str) -> Vec<String> {
    names
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hour(h: u32) -> HourOfDay {
        HourOfDay::new(h).unwrap()
    }

    #[test]
    fn hourly_counts_serialize_with_string_keys() -> Result<()> {
        let mut hourly = HourlyObservations::default();
        hourly.increment(hour(7));
        hourly.increment(hour(7));
        hourly.increment(hour(18));
        let json = serde_json::to_string(&hourly)?;
        assert_eq!(json, r#"{"18":1,"7":2}"#);

        let back: HourlyObservations = serde_json::from_str(&json)?;
        assert_eq!(back, hourly);
        assert_eq!(back.total(), 3);
        Ok(())
    }

    #[test]
    fn hourly_counts_reject_out_of_range_keys() {
        let parsed: std::result::Result<HourlyObservations, _> =
            serde_json::from_str(r#"{"24":1}"#);
        assert!(parsed.is_err());
        let parsed: std::result::Result<HourlyObservations, _> =
            serde_json::from_str(r#"{"noon":1}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn merge_adds_slots() {
        let mut a = HourlyObservations::default();
        a.increment(hour(5));
        let mut b = HourlyObservations::default();
        b.increment(hour(5));
        b.increment(hour(6));
        a.merge(&b);
        assert_eq!(a.get(hour(5)), 2);
        assert_eq!(a.get(hour(6)), 1);
        assert_eq!(a.iter().count(), 2);
    }

    #[test]
    fn hour_of_day_bounds() {
        assert!(HourOfDay::new(23).is_ok());
        assert!(HourOfDay::new(24).is_err());
        let h = hour_of(1_700_000_000).unwrap();
        assert!(h.get() < 24);
    }

    #[test]
    fn labels_are_trimmed_and_lowercased() {
        assert_eq!(normalize_label("  Northern Cardinal "), Some("northern cardinal".into()));
        assert_eq!(normalize_label("   "), None);
    }

    #[test]
    fn names_split_on_commas() {
        assert_eq!(
            split_names("Cardinal, blue jay,,  "),
            vec!["Cardinal".to_string(), "blue jay".to_string()]
        );
        assert!(split_names("").is_empty());
    }

    #[test]
    fn summary_messages() {
        assert_eq!(SightingSummary::NoSightings.message(), "No birds observed");
        let recorded = SightingSummary::Recorded {
            labels: vec!["cardinal".into()],
        };
        assert_eq!(recorded.message(), r#"Added: ["cardinal"]"#);
        assert_eq!(recorded.labels(), &["cardinal".to_string()]);
    }
}
