//! Status classification and time-to-watering forecast.
//!
//! ## Status by latest moisture `m`
//!
//! ```text
//!   0 ───── water_below ───── ideal_min ═════ ideal_max ───── 100
//!     Dry   ]  NeedsWater    [  Healthy   ]   Overwatered
//! ```
//!
//! There is no debounce: a single reading across a threshold moves the
//! status.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::Result;
use crate::reading::{BatteryLevel, PlantProfile, Reading};
use crate::trend::{self, Confidence, TrendEstimate, TrendParams};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Variant order follows increasing moisture; `Unknown` sorts last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Dry,
    NeedsWater,
    Healthy,
    Overwatered,
    Unknown,
}

impl Status {
    pub fn classify(moisture_pct: f64, profile: &PlantProfile) -> Self {
        let m = moisture_pct;
        if m <= profile.water_below as f64 {
            Self::Dry
        } else if m < profile.ideal_min as f64 {
            Self::NeedsWater
        } else if m <= profile.ideal_max as f64 {
            Self::Healthy
        } else {
            Self::Overwatered
        }
    }

    /// Dry and NeedsWater both call for watering.
    pub fn needs_attention(&self) -> bool {
        matches!(self, Self::Dry | Self::NeedsWater)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Dry => "Dry!",
            Self::NeedsWater => "Needs Water",
            Self::Healthy => "Healthy",
            Self::Overwatered => "Overwatered",
            Self::Unknown => "No Data",
        }
    }
}

// ---------------------------------------------------------------------------
// Forecast
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "hours", rename_all = "snake_case")]
pub enum Forecast {
    /// Hours until moisture reaches `water_below`; never negative.
    Hours(f64),
    /// Not enough history to say.
    Unknown,
    /// Moisture is flat or rising, so the plant is not heading toward dry.
    NotApplicable,
}

impl Forecast {
    pub fn hours(&self) -> Option<f64> {
        match self {
            Self::Hours(h) => Some(*h),
            Self::Unknown | Self::NotApplicable => None,
        }
    }

    fn from_trend(status: Status, m: f64, profile: &PlantProfile, trend: &TrendEstimate) -> Self {
        match status {
            Status::Dry => return Self::Hours(0.0),
            Status::Unknown => return Self::Unknown,
            Status::NeedsWater | Status::Healthy | Status::Overwatered => {}
        }
        if trend.confidence == Confidence::Insufficient {
            return Self::Unknown;
        }
        let rate = trend.rate_pct_per_hour;
        // Also catches NaN.
        if !(rate > 0.0) {
            return Self::NotApplicable;
        }
        let hours = (m - profile.water_below as f64) / rate;
        if hours.is_finite() {
            Self::Hours(hours.max(0.0))
        } else {
            Self::NotApplicable
        }
    }
}

// ---------------------------------------------------------------------------
// Prediction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub status: Status,
    pub hours_until_watering: Forecast,
    #[serde(with = "time::serde::rfc3339")]
    pub as_of: OffsetDateTime,
    /// Moisture of the latest reading, if any.
    pub moisture_pct: Option<f64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_reading_at: Option<OffsetDateTime>,
    pub battery: BatteryLevel,
    pub trend: TrendEstimate,
}

/// Readings recorded at or before `now`, oldest first. Fails on the first
/// malformed reading, including ones after `now`.
pub fn visible_as_of(readings: &[Reading], now: OffsetDateTime) -> Result<Vec<Reading>> {
    for r in readings {
        r.validate()?;
    }
    let mut visible: Vec<Reading> = readings
        .iter()
        .filter(|r| r.recorded_at <= now)
        .cloned()
        .collect();
    crate::reading::sort_chronologically(&mut visible);
    Ok(visible)
}

/// Drying-rate estimate as of `now`, with the same input checks as
/// [`evaluate`].
pub fn trend_as_of(
    readings: &[Reading],
    now: OffsetDateTime,
    params: &TrendParams,
) -> Result<TrendEstimate> {
    Ok(trend::estimate(&visible_as_of(readings, now)?, params))
}

/// Evaluate a plant as of `now` from its sensor's readings.
///
/// Readings recorded after `now` are ignored. A malformed reading (e.g.
/// negative moisture) is an upstream integrity bug and returns an error;
/// every other edge case collapses to a sentinel.
pub fn evaluate(
    readings: &[Reading],
    profile: &PlantProfile,
    now: OffsetDateTime,
    params: &TrendParams,
) -> Result<Prediction> {
    let visible = visible_as_of(readings, now)?;
    let trend = trend::estimate(&visible, params);

    let Some(latest) = visible.last() else {
        return Ok(Prediction {
            status: Status::Unknown,
            hours_until_watering: Forecast::Unknown,
            as_of: now,
            moisture_pct: None,
            last_reading_at: None,
            battery: BatteryLevel::Unknown,
            trend,
        });
    };

    let m = latest.moisture_pct;
    let status = Status::classify(m, profile);
    let hours_until_watering = Forecast::from_trend(status, m, profile, &trend);

    Ok(Prediction {
        status,
        hours_until_watering,
        as_of: now,
        moisture_pct: Some(m),
        last_reading_at: Some(latest.recorded_at),
        battery: BatteryLevel::from_pct(latest.battery_pct),
        trend,
    })
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Counts across a set of plants, as shown in the dashboard header.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub healthy: usize,
    pub needs_attention: usize,
    pub overwatered: usize,
    pub unknown: usize,
}

impl Summary {
    pub fn from_predictions<'a>(predictions: impl IntoIterator<Item = &'a Prediction>) -> Self {
        let mut s = Self::default();
        for p in predictions {
            s.total += 1;
            match p.status {
                Status::Healthy => s.healthy += 1,
                Status::Dry | Status::NeedsWater => s.needs_attention += 1,
                Status::Overwatered => s.overwatered += 1,
                Status::Unknown => s.unknown += 1,
            }
        }
        s
    }
}

// ===========================================================================
// Tests
// ===========================================================================
