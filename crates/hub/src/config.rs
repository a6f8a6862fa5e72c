//! TOML config file loading, validation, and database seeding for plants,
//! their moisture profiles, and sensors.

use anyhow::{bail, Context, Result};
use moist_core::{Calibration, PlantProfile, TrendParams};
use serde::Deserialize;
use std::collections::HashSet;
use time::Duration;

use crate::db::{Db, PlantRecord, SensorConfig};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub trend: TrendSection,
    #[serde(default)]
    pub plants: Vec<PlantEntry>,
    #[serde(default)]
    pub sensors: Vec<SensorEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrendSection {
    pub window_hours: f64,
    pub min_points: usize,
    pub spike_threshold: f64,
    pub spike_max_interval_hours: f64,
    /// How much history to fetch per evaluation.
    pub lookback_hours: i64,
}

#[derive(Debug, Deserialize)]
pub struct PlantEntry {
    pub plant_id: i64,
    pub name: String,
    #[serde(default)]
    pub position: String,
    pub ideal_min: i64,
    pub ideal_max: i64,
    pub water_below: i64,
}

#[derive(Debug, Deserialize)]
pub struct SensorEntry {
    pub sensor_id: i64,
    pub plant_id: i64,
    pub calibration: Calibration,
}

/// Estimator settings resolved from the `[trend]` section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    pub params: TrendParams,
    pub lookback: Duration,
}

impl Default for TrendSection {
    fn default() -> Self {
        let p = TrendParams::default();
        Self {
            window_hours: p.window_hours,
            min_points: p.min_points,
            spike_threshold: p.spike_threshold,
            spike_max_interval_hours: p.spike_max_interval_hours,
            lookback_hours: 168,
        }
    }
}

impl TrendSection {
    pub fn params(&self) -> TrendParams {
        TrendParams {
            window_hours: self.window_hours,
            min_points: self.min_points,
            spike_threshold: self.spike_threshold,
            spike_max_interval_hours: self.spike_max_interval_hours,
        }
    }

    pub fn settings(&self) -> Settings {
        Settings {
            params: self.params(),
            lookback: Duration::hours(self.lookback_hours),
        }
    }
}

impl PlantEntry {
    fn profile(&self) -> PlantProfile {
        PlantProfile {
            plant_id: self.plant_id,
            ideal_min: self.ideal_min,
            ideal_max: self.ideal_max,
            water_below: self.water_below,
        }
    }
}

/// Ten years; anything longer is a typo.
const MAX_LOOKBACK_HOURS: i64 = 24 * 365 * 10;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_trend(&mut errors);
        self.validate_plants(&mut errors);
        self.validate_sensors(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_trend(&self, errors: &mut Vec<String>) {
        let t = &self.trend;
        if let Err(e) = t.params().validate() {
            errors.push(format!("trend: {e}"));
        }
        if t.lookback_hours <= 0 || t.lookback_hours > MAX_LOOKBACK_HOURS {
            errors.push(format!(
                "trend: lookback_hours {} out of range [1, {MAX_LOOKBACK_HOURS}]",
                t.lookback_hours
            ));
        } else if (t.lookback_hours as f64) < t.window_hours {
            errors.push(format!(
                "trend: lookback_hours ({}) is shorter than window_hours ({})",
                t.lookback_hours, t.window_hours
            ));
        }
    }

    fn validate_plants(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<i64> = HashSet::new();

        for (i, p) in self.plants.iter().enumerate() {
            let ctx = || {
                if p.name.trim().is_empty() {
                    format!("plants[{i}]")
                } else {
                    format!("plant '{}'", p.name)
                }
            };

            // ── Identity ────────────────────────────────────────
            if p.plant_id <= 0 {
                errors.push(format!(
                    "{}: plant_id must be positive, got {}",
                    ctx(),
                    p.plant_id
                ));
            } else if !seen_ids.insert(p.plant_id) {
                errors.push(format!("{}: duplicate plant_id {}", ctx(), p.plant_id));
            }

            if p.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            }

            // ── Thresholds ──────────────────────────────────────
            if let Err(e) = p.profile().validate() {
                errors.push(format!("{}: {e}", ctx()));
            }
        }
    }

    fn validate_sensors(&self, errors: &mut Vec<String>) {
        let plant_ids: HashSet<i64> = self.plants.iter().map(|p| p.plant_id).collect();
        let mut seen_ids: HashSet<i64> = HashSet::new();

        for (i, s) in self.sensors.iter().enumerate() {
            let ctx = || format!("sensors[{i}] (id {})", s.sensor_id);

            if s.sensor_id <= 0 {
                errors.push(format!(
                    "{}: sensor_id must be positive, got {}",
                    ctx(),
                    s.sensor_id
                ));
            } else if !seen_ids.insert(s.sensor_id) {
                errors.push(format!("{}: duplicate sensor_id", ctx()));
            }

            if !plant_ids.contains(&s.plant_id) {
                errors.push(format!(
                    "{}: plant_id {} does not match any defined plant",
                    ctx(),
                    s.plant_id
                ));
            }

            if let Err(e) = s.calibration.validate() {
                errors.push(format!("{}: {e}", ctx()));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Upsert plants and sensors, and append a profile version for every plant
/// whose thresholds changed.
pub async fn apply(config: &Config, db: &Db) -> Result<()> {
    for p in &config.plants {
        db.upsert_plant(&PlantRecord {
            plant_id: p.plant_id,
            name: p.name.clone(),
            position: p.position.clone(),
        })
        .await
        .with_context(|| format!("failed to upsert plant '{}'", p.name))?;

        let version = db
            .save_profile(&p.profile())
            .await
            .with_context(|| format!("failed to save profile for plant '{}'", p.name))?;
        tracing::debug!(plant = p.plant_id, version, "profile current");
    }

    for s in &config.sensors {
        db.upsert_sensor(&SensorConfig {
            sensor_id: s.sensor_id,
            plant_id: s.plant_id,
            calibration: s.calibration,
        })
        .await
        .with_context(|| format!("failed to upsert sensor {}", s.sensor_id))?;
    }

    tracing::info!(
        plants = config.plants.len(),
        sensors = config.sensors.len(),
        "config applied"
    );

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
