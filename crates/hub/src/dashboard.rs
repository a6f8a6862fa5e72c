//! Per-plant status cards assembled from the database and the trend engine.
//!
//! Each card is an independent evaluation: fetch the sensor's window, then
//! hand it to [`moist_core::evaluate`] with the plant's current profile.

use anyhow::{Context, Result};
use moist_core::reading::format_age;
use moist_core::{
    evaluate, trend_as_of, MoistError, PlantProfile, Prediction, Summary, TrendEstimate,
};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;

use crate::config::Settings;
use crate::db::{Db, PlantRecord};

#[derive(Debug, Clone, Serialize)]
pub struct PlantCard {
    pub plant: PlantRecord,
    pub sensor_id: Option<i64>,
    pub profile: PlantProfile,
    pub status_label: &'static str,
    /// "12m ago" style age of the latest reading, or "no data".
    pub last_seen: String,
    pub prediction: Prediction,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub summary: Summary,
    pub plants: Vec<PlantCard>,
}

/// Build the card for one plant. A plant with no sensor yet evaluates an
/// empty window and reports `Unknown`.
pub async fn plant_card(
    db: &Db,
    plant: PlantRecord,
    settings: &Settings,
    now: OffsetDateTime,
) -> Result<PlantCard> {
    let profile = db
        .current_profile(plant.plant_id)
        .await?
        .ok_or(MoistError::MissingProfile(plant.plant_id))?;

    let sensor_id = db.sensor_for_plant(plant.plant_id).await?;
    let readings = match sensor_id {
        Some(id) => db.readings_as_of(id, now, settings.lookback).await?,
        None => Vec::new(),
    };

    let prediction = evaluate(&readings, &profile, now, &settings.params)
        .with_context(|| format!("failed to evaluate plant {}", plant.plant_id))?;

    debug!(
        plant = plant.plant_id,
        sensor = ?sensor_id,
        readings = readings.len(),
        status = ?prediction.status,
        "dashboard: card built"
    );

    let last_seen = prediction
        .last_reading_at
        .map_or_else(|| "no data".to_string(), |t| format_age(t, now));

    Ok(PlantCard {
        plant,
        sensor_id,
        profile,
        status_label: prediction.status.label(),
        last_seen,
        prediction,
    })
}

pub async fn find_plant_card(
    db: &Db,
    plant_id: i64,
    settings: &Settings,
    now: OffsetDateTime,
) -> Result<Option<PlantCard>> {
    match db.get_plant(plant_id).await? {
        Some(plant) => Ok(Some(plant_card(db, plant, settings, now).await?)),
        None => Ok(None),
    }
}

pub async fn build(db: &Db, settings: &Settings, now: OffsetDateTime) -> Result<Dashboard> {
    let mut plants = Vec::new();
    for plant in db.load_plants().await? {
        plants.push(plant_card(db, plant, settings, now).await?);
    }
    let summary = Summary::from_predictions(plants.iter().map(|c| &c.prediction));
    Ok(Dashboard { summary, plants })
}

/// Trend diagnostics for a sensor; `None` if the sensor is unknown.
pub async fn sensor_trend(
    db: &Db,
    sensor_id: i64,
    settings: &Settings,
    now: OffsetDateTime,
) -> Result<Option<TrendEstimate>> {
    if db.get_sensor(sensor_id).await?.is_none() {
        return Ok(None);
    }
    let readings = db.readings_as_of(sensor_id, now, settings.lookback).await?;
    let trend = trend_as_of(&readings, now, &settings.params)
        .with_context(|| format!("failed to estimate trend for sensor {sensor_id}"))?;
    Ok(Some(trend))
}

// ===========================================================================
// Tests
// ===========================================================================
