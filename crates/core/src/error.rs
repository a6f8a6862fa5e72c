//! Error types for the trend engine.
//!
//! Missing data and short histories are ordinary states that surface as
//! values (`Status::Unknown`, `Confidence::Insufficient`). The variants here
//! cover broken inputs and collaborator failures.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MoistError {
    #[error("invalid reading from sensor {sensor_id}: {reason}")]
    InvalidReading { sensor_id: i64, reason: String },

    #[error("invalid profile for plant {plant_id}: {reason}")]
    InvalidProfile { plant_id: i64, reason: String },

    #[error("invalid calibration: {0}")]
    InvalidCalibration(String),

    #[error("invalid trend parameters: {0}")]
    InvalidParams(String),

    #[error("sensor {0} is not assigned to any plant")]
    UnmappedSensor(i64),

    #[error("no profile stored for plant {0}")]
    MissingProfile(i64),

    #[error("reading store failure: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, MoistError>;
