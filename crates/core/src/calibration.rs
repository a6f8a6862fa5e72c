//! Raw ADC count to moisture percentage.
//!
//! Capacitive probes report a count that falls as the soil gets wetter, but
//! nothing here assumes that orientation: a map works in either direction as
//! long as its reference points are strictly ordered. Calibration is applied
//! once at ingestion; the estimator only ever sees the stored percentage.

use serde::{Deserialize, Serialize};

use crate::error::{MoistError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Calibration {
    /// Two endpoints: `raw_dry` maps to 0%, `raw_wet` to 100%.
    Linear { raw_dry: i64, raw_wet: i64 },
    /// Air maps to 0%, fresh potting soil to 50%, submerged in water to 100%.
    /// Interpolated linearly between neighbouring points.
    ThreePoint { air: i64, soil: i64, water: i64 },
}

impl Calibration {
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Linear { raw_dry, raw_wet } => {
                if raw_dry < 0 || raw_wet < 0 {
                    return Err(MoistError::InvalidCalibration(format!(
                        "raw endpoints must be non-negative (dry={raw_dry}, wet={raw_wet})"
                    )));
                }
                if raw_dry == raw_wet {
                    return Err(MoistError::InvalidCalibration(format!(
                        "raw_dry and raw_wet are both {raw_dry}, calibration range is zero"
                    )));
                }
            }
            Self::ThreePoint { air, soil, water } => {
                if air < 0 || soil < 0 || water < 0 {
                    return Err(MoistError::InvalidCalibration(format!(
                        "reference counts must be non-negative (air={air}, soil={soil}, water={water})"
                    )));
                }
                let falling = air > soil && soil > water;
                let rising = air < soil && soil < water;
                if !falling && !rising {
                    return Err(MoistError::InvalidCalibration(format!(
                        "soil ({soil}) must lie strictly between air ({air}) and water ({water})"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Map a raw count to `0.0..=100.0`. Out-of-range counts clamp to the
    /// nearest end. A degenerate map yields 0.0 instead of dividing by zero.
    pub fn to_pct(&self, raw: i64) -> f64 {
        match *self {
            Self::Linear { raw_dry, raw_wet } => {
                let range = raw_dry - raw_wet;
                if range == 0 {
                    return 0.0;
                }
                let m = (raw_dry - raw) as f64 / range as f64;
                (m * 100.0).clamp(0.0, 100.0)
            }
            Self::ThreePoint { air, soil, water } => {
                // Project onto an axis that grows from air towards water.
                let dir = (water - air).signum() as f64;
                let pos = (raw - air) as f64 * dir;
                let soil_pos = (soil - air) as f64 * dir;
                let water_pos = (water - air) as f64 * dir;

                if soil_pos <= 0.0 || water_pos <= soil_pos {
                    return 0.0;
                }
                if pos <= 0.0 {
                    0.0
                } else if pos <= soil_pos {
                    50.0 * pos / soil_pos
                } else if pos < water_pos {
                    50.0 + 50.0 * (pos - soil_pos) / (water_pos - soil_pos)
                } else {
                    100.0
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const LINEAR: Calibration = Calibration::Linear {
        raw_dry: 26000,
        raw_wet: 12000,
    };

    const THREE: Calibration = Calibration::ThreePoint {
        air: 2400,
        soil: 1600,
        water: 800,
    };

    // -- Linear --------------------------------------------------------------

    #[test]
    fn linear_endpoints() {
        assert_eq!(LINEAR.to_pct(26000), 0.0);
        assert_eq!(LINEAR.to_pct(12000), 100.0);
        assert!((LINEAR.to_pct(19000) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn linear_clamps_out_of_range() {
        assert_eq!(LINEAR.to_pct(30000), 0.0);
        assert_eq!(LINEAR.to_pct(5000), 100.0);
    }

    #[test]
    fn linear_rising_orientation() {
        let cal = Calibration::Linear {
            raw_dry: 100,
            raw_wet: 300,
        };
        assert!((cal.to_pct(200) - 50.0).abs() < 1e-9);
        assert_eq!(cal.to_pct(50), 0.0);
    }

    #[test]
    fn linear_degenerate_is_zero() {
        let cal = Calibration::Linear {
            raw_dry: 500,
            raw_wet: 500,
        };
        assert_eq!(cal.to_pct(400), 0.0);
        assert!(cal.validate().is_err());
    }

    // -- Three point ---------------------------------------------------------

    #[test]
    fn three_point_reference_points() {
        assert_eq!(THREE.to_pct(2400), 0.0);
        assert!((THREE.to_pct(1600) - 50.0).abs() < 1e-9);
        assert_eq!(THREE.to_pct(800), 100.0);
    }

    #[test]
    fn three_point_interpolates_each_segment() {
        assert!((THREE.to_pct(2000) - 25.0).abs() < 1e-9);
        assert!((THREE.to_pct(1200) - 75.0).abs() < 1e-9);
    }

    #[test]
    fn three_point_clamps() {
        assert_eq!(THREE.to_pct(3000), 0.0);
        assert_eq!(THREE.to_pct(100), 100.0);
    }

    #[test]
    fn three_point_is_monotonic() {
        let mut last = -1.0;
        for raw in (700..=2500).rev().step_by(10) {
            let pct = THREE.to_pct(raw);
            assert!(pct >= last, "raw {raw} gave {pct} after {last}");
            last = pct;
        }
    }

    #[test]
    fn three_point_validation() {
        THREE.validate().unwrap();
        Calibration::ThreePoint {
            air: 800,
            soil: 1600,
            water: 2400,
        }
        .validate()
        .unwrap();

        let bad = Calibration::ThreePoint {
            air: 2400,
            soil: 2500,
            water: 800,
        };
        let msg = bad.validate().unwrap_err().to_string();
        assert!(msg.contains("strictly between"), "got: {msg}");
    }

    #[test]
    fn negative_counts_rejected() {
        let cal = Calibration::Linear {
            raw_dry: -1,
            raw_wet: 100,
        };
        assert!(cal.validate().is_err());
    }

    #[test]
    fn deserializes_tagged() {
        let cal: Calibration =
            serde_json::from_str(r#"{"kind":"three_point","air":3,"soil":2,"water":1}"#).unwrap();
        assert_eq!(
            cal,
            Calibration::ThreePoint {
                air: 3,
                soil: 2,
                water: 1
            }
        );
    }
}
