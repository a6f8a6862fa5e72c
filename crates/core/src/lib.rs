//! Moisture trend engine.
//!
//! Turns a time series of calibrated soil moisture readings into a health
//! status, a smoothed drying rate, and a forecast of hours until a plant
//! needs water. Everything here is pure and synchronous: storage is reached
//! through the traits in [`store`], and callers decide how to schedule the
//! fetch.

pub mod calibration;
pub mod error;
pub mod predict;
pub mod reading;
pub mod service;
pub mod store;
pub mod trend;

pub use calibration::Calibration;
pub use error::{MoistError, Result};
pub use predict::{evaluate, trend_as_of, Forecast, Prediction, Status, Summary};
pub use reading::{BatteryLevel, PlantProfile, Reading};
pub use service::Predictor;
pub use store::{MemoryStore, ProfileStore, ReadingStore, SensorDirectory};
pub use trend::{estimate, Confidence, TrendEstimate, TrendParams};
