//! Prediction service over injected stores.

use time::{Date, Duration, OffsetDateTime};
use tracing::debug;

use crate::error::{MoistError, Result};
use crate::predict::{self, Prediction};
use crate::reading::PlantProfile;
use crate::store::{ProfileStore, ReadingStore, SensorDirectory};
use crate::trend::{TrendEstimate, TrendParams};

/// How far back readings are fetched. Longer than the estimator window so a
/// sensor that went quiet still reports its last status.
pub const DEFAULT_LOOKBACK: Duration = Duration::days(7);

/// Start of the fetch range for an evaluation at `now`.
pub fn lookback_start(now: OffsetDateTime, lookback: Duration) -> OffsetDateTime {
    now.checked_sub(lookback)
        .unwrap_or_else(|| Date::MIN.midnight().assume_utc())
}

pub struct Predictor<S> {
    store: S,
    params: TrendParams,
    lookback: Duration,
}

impl<S> Predictor<S>
where
    S: ReadingStore + ProfileStore + SensorDirectory,
{
    pub fn new(store: S, params: TrendParams) -> Self {
        Self {
            store,
            params,
            lookback: DEFAULT_LOOKBACK,
        }
    }

    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn params(&self) -> &TrendParams {
        &self.params
    }

    /// Drying-rate estimate for a sensor, independent of any thresholds.
    pub fn estimate_trend(&self, sensor_id: i64, now: OffsetDateTime) -> Result<TrendEstimate> {
        let readings = self
            .store
            .recent_readings(sensor_id, lookback_start(now, self.lookback))?;
        predict::trend_as_of(&readings, now, &self.params)
    }

    /// Predict against the profile of the plant the sensor is assigned to.
    pub fn predict(&self, sensor_id: i64, now: OffsetDateTime) -> Result<Prediction> {
        let plant_id = self
            .store
            .plant_id_for_sensor(sensor_id)?
            .ok_or(MoistError::UnmappedSensor(sensor_id))?;
        let profile = self
            .store
            .get_profile(plant_id)?
            .ok_or(MoistError::MissingProfile(plant_id))?;
        self.predict_with_profile(sensor_id, &profile, now)
    }

    /// Predict against an explicit profile.
    pub fn predict_with_profile(
        &self,
        sensor_id: i64,
        profile: &PlantProfile,
        now: OffsetDateTime,
    ) -> Result<Prediction> {
        let readings = self
            .store
            .recent_readings(sensor_id, lookback_start(now, self.lookback))?;
        let prediction = predict::evaluate(&readings, profile, now, &self.params)?;
        debug!(
            sensor = sensor_id,
            plant = profile.plant_id,
            status = ?prediction.status,
            forecast = ?prediction.hours_until_watering,
            "predicted"
        );
        Ok(prediction)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
