//! Collaborator contracts and an in-memory implementation.
//!
//! The engine never owns storage. It is handed something that can list a
//! sensor's readings, look up the current profile of a plant, and resolve
//! which plant a sensor is in.

use std::collections::HashMap;

use time::OffsetDateTime;

use crate::error::Result;
use crate::reading::{PlantProfile, Reading};

pub trait ReadingStore {
    /// Readings for `sensor_id` recorded at or after `since`, ascending by
    /// `recorded_at`. May be empty, contain duplicates, or have gaps.
    fn recent_readings(&self, sensor_id: i64, since: OffsetDateTime) -> Result<Vec<Reading>>;
}

pub trait ProfileStore {
    /// Latest version of the plant's profile.
    fn get_profile(&self, plant_id: i64) -> Result<Option<PlantProfile>>;
}

pub trait SensorDirectory {
    fn plant_id_for_sensor(&self, sensor_id: i64) -> Result<Option<i64>>;
}

impl<T: ReadingStore + ?Sized> ReadingStore for &T {
    fn recent_readings(&self, sensor_id: i64, since: OffsetDateTime) -> Result<Vec<Reading>> {
        (**self).recent_readings(sensor_id, since)
    }
}

impl<T: ProfileStore + ?Sized> ProfileStore for &T {
    fn get_profile(&self, plant_id: i64) -> Result<Option<PlantProfile>> {
        (**self).get_profile(plant_id)
    }
}

impl<T: SensorDirectory + ?Sized> SensorDirectory for &T {
    fn plant_id_for_sensor(&self, sensor_id: i64) -> Result<Option<i64>> {
        (**self).plant_id_for_sensor(sensor_id)
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Append-only store. Readings are kept sorted per sensor; profile saves add
/// a version instead of overwriting.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    readings: HashMap<i64, Vec<Reading>>,
    profiles: HashMap<i64, Vec<PlantProfile>>,
    assignments: HashMap<i64, i64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a reading in timestamp order. A reading sharing a timestamp
    /// with existing ones goes after them.
    pub fn append(&mut self, reading: Reading) -> Result<()> {
        reading.validate()?;
        let series = self.readings.entry(reading.sensor_id).or_default();
        let at = series.partition_point(|r| r.recorded_at <= reading.recorded_at);
        series.insert(at, reading);
        Ok(())
    }

    pub fn extend(&mut self, readings: impl IntoIterator<Item = Reading>) -> Result<()> {
        for r in readings {
            self.append(r)?;
        }
        Ok(())
    }

    /// Store a new profile version and return its 1-based version number.
    /// Saving thresholds identical to the current version is a no-op.
    pub fn save_profile(&mut self, profile: PlantProfile) -> Result<usize> {
        profile.validate()?;
        let versions = self.profiles.entry(profile.plant_id).or_default();
        if versions.last() != Some(&profile) {
            versions.push(profile);
        }
        Ok(versions.len())
    }

    pub fn profile_versions(&self, plant_id: i64) -> &[PlantProfile] {
        self.profiles
            .get(&plant_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Attach a sensor to a plant, replacing any previous assignment.
    pub fn assign(&mut self, sensor_id: i64, plant_id: i64) {
        self.assignments.insert(sensor_id, plant_id);
    }

    pub fn reading_count(&self, sensor_id: i64) -> usize {
        self.readings.get(&sensor_id).map_or(0, Vec::len)
    }
}

impl ReadingStore for MemoryStore {
    fn recent_readings(&self, sensor_id: i64, since: OffsetDateTime) -> Result<Vec<Reading>> {
        let Some(series) = self.readings.get(&sensor_id) else {
            return Ok(Vec::new());
        };
        let start = series.partition_point(|r| r.recorded_at < since);
        Ok(series[start..].to_vec())
    }
}

impl ProfileStore for MemoryStore {
    fn get_profile(&self, plant_id: i64) -> Result<Option<PlantProfile>> {
        Ok(self.profile_versions(plant_id).last().copied())
    }
}

impl SensorDirectory for MemoryStore {
    fn plant_id_for_sensor(&self, sensor_id: i64) -> Result<Option<i64>> {
        Ok(self.assignments.get(&sensor_id).copied())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use time::Duration;

    const T0: OffsetDateTime = datetime!(2024-05-01 0:00 UTC);

    fn reading(sensor_id: i64, hour: i64, moisture_pct: f64) -> Reading {
        Reading {
            sensor_id,
            moisture_raw: 1200,
            moisture_pct,
            battery_pct: None,
            recorded_at: T0 + Duration::hours(hour),
        }
    }

    fn profile(ideal_min: i64) -> PlantProfile {
        PlantProfile {
            plant_id: 3,
            ideal_min,
            ideal_max: 70,
            water_below: 25,
        }
    }

    #[test]
    fn out_of_order_appends_are_returned_sorted() {
        let mut store = MemoryStore::new();
        store
            .extend([reading(1, 5, 40.0), reading(1, 1, 44.0), reading(1, 3, 42.0)])
            .unwrap();
        let rs = store.recent_readings(1, T0).unwrap();
        let hours: Vec<i64> = rs
            .iter()
            .map(|r| (r.recorded_at - T0).whole_hours())
            .collect();
        assert_eq!(hours, vec![1, 3, 5]);
    }

    #[test]
    fn since_is_inclusive_and_restartable() {
        let mut store = MemoryStore::new();
        store.extend((0..10).map(|h| reading(1, h, 50.0))).unwrap();
        assert_eq!(store.recent_readings(1, T0 + Duration::hours(4)).unwrap().len(), 6);
        assert_eq!(store.recent_readings(1, T0 + Duration::hours(9)).unwrap().len(), 1);
        assert_eq!(store.recent_readings(1, T0).unwrap().len(), 10);
    }

    #[test]
    fn sensors_are_isolated() {
        let mut store = MemoryStore::new();
        store.append(reading(1, 0, 50.0)).unwrap();
        store.append(reading(2, 0, 20.0)).unwrap();
        assert_eq!(store.reading_count(1), 1);
        assert!(store.recent_readings(9, T0).unwrap().is_empty());
    }

    #[test]
    fn duplicate_timestamps_keep_arrival_order() {
        let mut store = MemoryStore::new();
        store.append(reading(1, 2, 10.0)).unwrap();
        store.append(reading(1, 2, 20.0)).unwrap();
        let rs = store.recent_readings(1, T0).unwrap();
        assert_eq!(rs[0].moisture_pct, 10.0);
        assert_eq!(rs[1].moisture_pct, 20.0);
    }

    #[test]
    fn invalid_reading_not_stored() {
        let mut store = MemoryStore::new();
        assert!(store.append(reading(1, 0, 150.0)).is_err());
        assert_eq!(store.reading_count(1), 0);
    }

    #[test]
    fn profile_versions_append() {
        let mut store = MemoryStore::new();
        assert_eq!(store.save_profile(profile(40)).unwrap(), 1);
        assert_eq!(store.save_profile(profile(40)).unwrap(), 1);
        assert_eq!(store.save_profile(profile(45)).unwrap(), 2);
        assert_eq!(store.get_profile(3).unwrap(), Some(profile(45)));
        assert_eq!(store.profile_versions(3)[0], profile(40));
        assert_eq!(store.get_profile(4).unwrap(), None);
    }

    #[test]
    fn invalid_profile_rejected() {
        let mut store = MemoryStore::new();
        assert!(store.save_profile(profile(20)).is_err());
        assert!(store.profile_versions(3).is_empty());
    }

    #[test]
    fn sensor_assignment() {
        let mut store = MemoryStore::new();
        store.assign(1, 3);
        assert_eq!(store.plant_id_for_sensor(1).unwrap(), Some(3));
        store.assign(1, 4);
        assert_eq!(store.plant_id_for_sensor(1).unwrap(), Some(4));
        assert_eq!(store.plant_id_for_sensor(2).unwrap(), None);
    }
}
