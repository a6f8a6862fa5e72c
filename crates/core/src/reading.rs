use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{MoistError, Result};

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// One calibrated observation from a soil moisture sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub sensor_id: i64,
    /// Raw ADC count as reported by the sensor.
    pub moisture_raw: i64,
    /// Moisture percentage in `0.0..=100.0`, mapped at ingestion time.
    pub moisture_pct: f64,
    /// Battery charge in percent. `None` means unknown, not empty.
    pub battery_pct: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

impl Reading {
    /// Reject readings that violate the data contract. These indicate an
    /// upstream integrity bug, so they fail instead of being skipped.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| MoistError::InvalidReading {
            sensor_id: self.sensor_id,
            reason,
        };

        if self.moisture_raw < 0 {
            return Err(fail(format!(
                "moisture_raw {} is negative",
                self.moisture_raw
            )));
        }
        if !self.moisture_pct.is_finite() || !(0.0..=100.0).contains(&self.moisture_pct) {
            return Err(fail(format!(
                "moisture_pct {} out of range [0, 100]",
                self.moisture_pct
            )));
        }
        if let Some(b) = self.battery_pct {
            if !b.is_finite() || !(0.0..=100.0).contains(&b) {
                return Err(fail(format!("battery_pct {b} out of range [0, 100]")));
            }
        }
        Ok(())
    }
}

/// Stable sort by `recorded_at`. Readings sharing a timestamp keep their
/// arrival order.
pub fn sort_chronologically(readings: &mut [Reading]) {
    readings.sort_by_key(|r| r.recorded_at);
}

// ---------------------------------------------------------------------------
// Plant profile
// ---------------------------------------------------------------------------

/// Moisture thresholds a plant is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlantProfile {
    pub plant_id: i64,
    pub ideal_min: i64,
    pub ideal_max: i64,
    /// At or below this percentage the plant is dry and needs water now.
    pub water_below: i64,
}

impl PlantProfile {
    /// Check `0 <= water_below <= ideal_min < ideal_max <= 100`.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| MoistError::InvalidProfile {
            plant_id: self.plant_id,
            reason,
        };

        if self.water_below < 0 {
            return Err(fail(format!("water_below {} is negative", self.water_below)));
        }
        if self.water_below > self.ideal_min {
            return Err(fail(format!(
                "water_below ({}) exceeds ideal_min ({})",
                self.water_below, self.ideal_min
            )));
        }
        if self.ideal_min >= self.ideal_max {
            return Err(fail(format!(
                "ideal_max ({}) must be greater than ideal_min ({})",
                self.ideal_max, self.ideal_min
            )));
        }
        if self.ideal_max > 100 {
            return Err(fail(format!(
                "ideal_max {} out of range [0, 100]",
                self.ideal_max
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Battery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryLevel {
    Good,
    Low,
    Critical,
    Unknown,
}

impl BatteryLevel {
    pub fn from_pct(pct: Option<f64>) -> Self {
        match pct {
            None => Self::Unknown,
            Some(b) if b > 60.0 => Self::Good,
            Some(b) if b > 20.0 => Self::Low,
            Some(_) => Self::Critical,
        }
    }
}

// ---------------------------------------------------------------------------
// Reading age
// ---------------------------------------------------------------------------

/// Human-readable age of a reading relative to `now`: "just now", "12m ago",
/// "5h ago", "3d ago". Timestamps in the future read as "just now".
pub fn format_age(recorded_at: OffsetDateTime, now: OffsetDateTime) -> String {
    let minutes = (now - recorded_at).whole_minutes();
    if minutes < 1 {
        return "just now".to_string();
    }
    if minutes < 60 {
        return format!("{minutes}m ago");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours}h ago");
    }
    format!("{}d ago", hours / 24)
}

// ===========================================================================
// Tests
// ===========================================================================
