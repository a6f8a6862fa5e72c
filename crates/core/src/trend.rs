//! Decay estimator: hourly drying rate from a window of readings.
//!
//! ```text
//!  moisture
//!     │ ╲
//!     │  ╲        ┃ watering event: rise > spike_threshold
//!     │   ╲       ┃ within spike_max_interval
//!     │    ╲      ┃╲
//!     │     ╲     ┃ ╲
//!     │           ┃  ╲      ◀── only this segment is regressed
//!     └───────────┸──────▶ time
//!       older segment  latest segment
//! ```
//!
//! The window trails the newest reading, not the wall clock, so a sensor that
//! went offline still gets an estimate from its last known history.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use crate::error::{MoistError, Result};
use crate::reading::Reading;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendParams {
    /// Length of the trailing window, measured back from the newest reading.
    pub window_hours: f64,
    /// Fewest readings a window or segment needs before a rate is reported.
    pub min_points: usize,
    /// Rise in percentage points between consecutive readings that counts as
    /// a watering event.
    pub spike_threshold: f64,
    /// Longest gap between two readings for a rise to count as a watering
    /// event rather than slow rewetting.
    pub spike_max_interval_hours: f64,
}

impl Default for TrendParams {
    fn default() -> Self {
        Self {
            window_hours: 48.0,
            min_points: 6,
            spike_threshold: 15.0,
            spike_max_interval_hours: 2.0,
        }
    }
}

impl TrendParams {
    pub fn validate(&self) -> Result<()> {
        if !self.window_hours.is_finite() || self.window_hours <= 0.0 {
            return Err(MoistError::InvalidParams(format!(
                "window_hours must be positive, got {}",
                self.window_hours
            )));
        }
        if self.min_points < 2 {
            return Err(MoistError::InvalidParams(format!(
                "min_points must be at least 2, got {}",
                self.min_points
            )));
        }
        if !self.spike_threshold.is_finite() || self.spike_threshold <= 0.0 {
            return Err(MoistError::InvalidParams(format!(
                "spike_threshold must be positive, got {}",
                self.spike_threshold
            )));
        }
        if !self.spike_max_interval_hours.is_finite() || self.spike_max_interval_hours <= 0.0 {
            return Err(MoistError::InvalidParams(format!(
                "spike_max_interval_hours must be positive, got {}",
                self.spike_max_interval_hours
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Estimate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Insufficient,
    Low,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendEstimate {
    /// Positive when drying, zero or negative when stable or rising.
    pub rate_pct_per_hour: f64,
    pub confidence: Confidence,
    /// Watering events seen anywhere in the window.
    pub watering_events_detected: usize,
    /// Readings in the segment that backed the estimate.
    pub points: usize,
    /// Elapsed hours between the first and last reading of that segment.
    pub span_hours: f64,
}

impl TrendEstimate {
    fn insufficient(watering_events_detected: usize, points: usize, span_hours: f64) -> Self {
        Self {
            rate_pct_per_hour: 0.0,
            confidence: Confidence::Insufficient,
            watering_events_detected,
            points,
            span_hours,
        }
    }
}

/// Estimate the drying rate from `readings`, which may be unsorted, contain
/// duplicate timestamps, or be empty.
pub fn estimate(readings: &[Reading], params: &TrendParams) -> TrendEstimate {
    let mut ordered: Vec<&Reading> = readings.iter().collect();
    ordered.sort_by_key(|r| r.recorded_at);

    let Some(latest) = ordered.last().map(|r| r.recorded_at) else {
        return TrendEstimate::insufficient(0, 0, 0.0);
    };

    let window_start =
        ordered.partition_point(|r| hours_between(r.recorded_at, latest) > params.window_hours);
    let window = &ordered[window_start..];

    if window.len() < params.min_points {
        debug!(
            points = window.len(),
            min_points = params.min_points,
            "trend: window too small"
        );
        return TrendEstimate::insufficient(0, window.len(), span_of(window));
    }

    let (segment_start, events) = latest_segment(window, params);
    let segment = &window[segment_start..];
    let span_hours = span_of(segment);

    if segment.len() < params.min_points || span_hours <= 0.0 {
        debug!(
            points = segment.len(),
            span_hours,
            events,
            "trend: latest segment too small"
        );
        return TrendEstimate::insufficient(events, segment.len(), span_hours);
    }

    let rate_pct_per_hour = drying_rate(segment);
    let confidence =
        if span_hours >= params.window_hours / 2.0 && segment.len() >= 2 * params.min_points {
            Confidence::Normal
        } else {
            Confidence::Low
        };

    debug!(
        rate = rate_pct_per_hour,
        ?confidence,
        points = segment.len(),
        events,
        "trend: estimated"
    );

    TrendEstimate {
        rate_pct_per_hour,
        confidence,
        watering_events_detected: events,
        points: segment.len(),
        span_hours,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn hours_between(from: OffsetDateTime, to: OffsetDateTime) -> f64 {
    (to - from).as_seconds_f64() / 3600.0
}

fn span_of(readings: &[&Reading]) -> f64 {
    match (readings.first(), readings.last()) {
        (Some(first), Some(last)) => hours_between(first.recorded_at, last.recorded_at),
        _ => 0.0,
    }
}

/// Index where the newest segment begins, plus the number of watering events
/// found across the whole window.
fn latest_segment(window: &[&Reading], params: &TrendParams) -> (usize, usize) {
    let mut start = 0;
    let mut events = 0;
    for (i, pair) in window.windows(2).enumerate() {
        let rise = pair[1].moisture_pct - pair[0].moisture_pct;
        let gap = hours_between(pair[0].recorded_at, pair[1].recorded_at);
        if rise > params.spike_threshold && gap <= params.spike_max_interval_hours {
            events += 1;
            start = i + 1;
        }
    }
    (start, events)
}

/// Negated least-squares slope of moisture against hours since the first
/// reading. Callers guarantee a positive time span.
fn drying_rate(segment: &[&Reading]) -> f64 {
    let first = segment[0];
    if segment.iter().all(|r| r.moisture_pct == first.moisture_pct) {
        return 0.0;
    }

    let n = segment.len() as f64;
    let xs: Vec<f64> = segment
        .iter()
        .map(|r| hours_between(first.recorded_at, r.recorded_at))
        .collect();
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = segment.iter().map(|r| r.moisture_pct).sum::<f64>() / n;

    let (sxy, sxx) = xs
        .iter()
        .zip(segment)
        .fold((0.0, 0.0), |(sxy, sxx), (x, r)| {
            let dx = x - mean_x;
            (sxy + dx * (r.moisture_pct - mean_y), sxx + dx * dx)
        });

    if sxx <= 0.0 {
        return 0.0;
    }
    let rate = -(sxy / sxx);
    if rate == 0.0 {
        0.0
    } else {
        rate
    }
}

// ===========================================================================
// Tests
// ===========================================================================
