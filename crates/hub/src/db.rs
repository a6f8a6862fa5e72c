use anyhow::{Context, Result};
use moist_core::service::lookback_start;
use moist_core::{Calibration, MoistError, PlantProfile, Reading};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::str::FromStr;
use time::{Duration, OffsetDateTime};

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PlantRecord {
    pub plant_id: i64,
    pub name: String,
    pub position: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub sensor_id: i64,
    pub plant_id: i64,
    pub calibration: Calibration,
}

#[derive(FromRow)]
struct ProfileRow {
    plant_id: i64,
    version: i64,
    ideal_min: i64,
    ideal_max: i64,
    water_below: i64,
}

impl ProfileRow {
    fn profile(&self) -> PlantProfile {
        PlantProfile {
            plant_id: self.plant_id,
            ideal_min: self.ideal_min,
            ideal_max: self.ideal_max,
            water_below: self.water_below,
        }
    }
}

#[derive(FromRow)]
struct SensorRow {
    sensor_id: i64,
    plant_id: i64,
    calibration: String,
}

impl SensorRow {
    fn into_config(self) -> Result<SensorConfig> {
        let calibration = serde_json::from_str(&self.calibration)
            .with_context(|| format!("bad calibration stored for sensor {}", self.sensor_id))?;
        Ok(SensorConfig {
            sensor_id: self.sensor_id,
            plant_id: self.plant_id,
            calibration,
        })
    }
}

#[derive(FromRow)]
struct ReadingRow {
    sensor_id: i64,
    moisture_raw: i64,
    moisture_pct: f64,
    battery_pct: Option<f64>,
    recorded_at_ns: i64,
}

impl ReadingRow {
    fn into_reading(self) -> Result<Reading> {
        let recorded_at =
            OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.recorded_at_ns))
                .with_context(|| format!("bad timestamp {} in readings", self.recorded_at_ns))?;
        Ok(Reading {
            sensor_id: self.sensor_id,
            moisture_raw: self.moisture_raw,
            moisture_pct: self.moisture_pct,
            battery_pct: self.battery_pct,
            recorded_at,
        })
    }
}

/// Unix nanoseconds, clamped to what an i64 holds (years 1677 to 2262).
fn nanos_saturating(t: OffsetDateTime) -> i64 {
    let n = t.unix_timestamp_nanos();
    i64::try_from(n).unwrap_or(if n < 0 { i64::MIN } else { i64::MAX })
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/home/pi/moist/moist.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Plants
    // ----------------------------

    pub async fn upsert_plant(&self, p: &PlantRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO plants (plant_id, name, position)
            VALUES (?, ?, ?)
            ON CONFLICT(plant_id) DO UPDATE SET
              name=excluded.name,
              position=excluded.position
            "#,
        )
        .bind(p.plant_id)
        .bind(&p.name)
        .bind(&p.position)
        .execute(&self.pool)
        .await
        .context("upsert_plant failed")?;
        Ok(())
    }

    pub async fn load_plants(&self) -> Result<Vec<PlantRecord>> {
        sqlx::query_as::<_, PlantRecord>(
            "SELECT plant_id, name, position FROM plants ORDER BY plant_id",
        )
        .fetch_all(&self.pool)
        .await
        .context("load_plants failed")
    }

    pub async fn get_plant(&self, plant_id: i64) -> Result<Option<PlantRecord>> {
        sqlx::query_as::<_, PlantRecord>(
            "SELECT plant_id, name, position FROM plants WHERE plant_id = ?",
        )
        .bind(plant_id)
        .fetch_optional(&self.pool)
        .await
        .context("get_plant failed")
    }

    // ----------------------------
    // Profiles (append-only)
    // ----------------------------

    /// Append a profile version and return its number. Re-saving the current
    /// thresholds returns the existing version without writing.
    pub async fn save_profile(&self, p: &PlantProfile) -> Result<i64> {
        p.validate()?;

        let mut tx = self.pool.begin().await.context("save_profile: begin failed")?;

        let current = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT plant_id, version, ideal_min, ideal_max, water_below
            FROM plant_profiles
            WHERE plant_id = ?
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(p.plant_id)
        .fetch_optional(&mut *tx)
        .await
        .context("save_profile: lookup failed")?;

        if let Some(row) = &current {
            if row.profile() == *p {
                return Ok(row.version);
            }
        }
        let version = current.map_or(1, |r| r.version + 1);

        sqlx::query(
            r#"
            INSERT INTO plant_profiles
              (plant_id, version, ideal_min, ideal_max, water_below, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(p.plant_id)
        .bind(version)
        .bind(p.ideal_min)
        .bind(p.ideal_max)
        .bind(p.water_below)
        .bind(OffsetDateTime::now_utc().unix_timestamp())
        .execute(&mut *tx)
        .await
        .context("save_profile: insert failed")?;

        tx.commit().await.context("save_profile: commit failed")?;
        Ok(version)
    }

    pub async fn current_profile(&self, plant_id: i64) -> Result<Option<PlantProfile>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT plant_id, version, ideal_min, ideal_max, water_below
            FROM plant_profiles
            WHERE plant_id = ?
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(plant_id)
        .fetch_optional(&self.pool)
        .await
        .context("current_profile failed")?;

        Ok(row.map(|r| r.profile()))
    }

    /// Every stored version, oldest first.
    pub async fn profile_history(&self, plant_id: i64) -> Result<Vec<PlantProfile>> {
        let rows = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT plant_id, version, ideal_min, ideal_max, water_below
            FROM plant_profiles
            WHERE plant_id = ?
            ORDER BY version
            "#,
        )
        .bind(plant_id)
        .fetch_all(&self.pool)
        .await
        .context("profile_history failed")?;

        Ok(rows.iter().map(ProfileRow::profile).collect())
    }

    // ----------------------------
    // Sensors
    // ----------------------------

    pub async fn upsert_sensor(&self, s: &SensorConfig) -> Result<()> {
        let calibration =
            serde_json::to_string(&s.calibration).context("failed to encode calibration")?;
        sqlx::query(
            r#"
            INSERT INTO sensors (sensor_id, plant_id, calibration)
            VALUES (?, ?, ?)
            ON CONFLICT(sensor_id) DO UPDATE SET
              plant_id=excluded.plant_id,
              calibration=excluded.calibration
            "#,
        )
        .bind(s.sensor_id)
        .bind(s.plant_id)
        .bind(calibration)
        .execute(&self.pool)
        .await
        .context("upsert_sensor failed")?;
        Ok(())
    }

    pub async fn load_sensors(&self) -> Result<Vec<SensorConfig>> {
        let rows = sqlx::query_as::<_, SensorRow>(
            "SELECT sensor_id, plant_id, calibration FROM sensors ORDER BY sensor_id",
        )
        .fetch_all(&self.pool)
        .await
        .context("load_sensors failed")?;

        rows.into_iter().map(SensorRow::into_config).collect()
    }

    pub async fn get_sensor(&self, sensor_id: i64) -> Result<Option<SensorConfig>> {
        let row = sqlx::query_as::<_, SensorRow>(
            "SELECT sensor_id, plant_id, calibration FROM sensors WHERE sensor_id = ?",
        )
        .bind(sensor_id)
        .fetch_optional(&self.pool)
        .await
        .context("get_sensor failed")?;

        row.map(SensorRow::into_config).transpose()
    }

    /// The sensor currently reporting for a plant (lowest id if several).
    pub async fn sensor_for_plant(&self, plant_id: i64) -> Result<Option<i64>> {
        sqlx::query_scalar::<_, i64>(
            "SELECT sensor_id FROM sensors WHERE plant_id = ? ORDER BY sensor_id LIMIT 1",
        )
        .bind(plant_id)
        .fetch_optional(&self.pool)
        .await
        .context("sensor_for_plant failed")
    }

    // ----------------------------
    // Readings
    // ----------------------------

    pub async fn insert_reading(&self, r: &Reading) -> Result<()> {
        r.validate()?;
        let recorded_at_ns = i64::try_from(r.recorded_at.unix_timestamp_nanos()).map_err(|_| {
            MoistError::InvalidReading {
                sensor_id: r.sensor_id,
                reason: format!("recorded_at {} out of storable range", r.recorded_at),
            }
        })?;
        sqlx::query(
            r#"
            INSERT INTO readings (sensor_id, moisture_raw, moisture_pct, battery_pct, recorded_at_ns)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(r.sensor_id)
        .bind(r.moisture_raw)
        .bind(r.moisture_pct)
        .bind(r.battery_pct)
        .bind(recorded_at_ns)
        .execute(&self.pool)
        .await
        .context("insert_reading failed")?;
        Ok(())
    }

    /// Calibrate a raw count with the sensor's stored map, then persist it.
    /// Returns `None` if the sensor is not configured.
    pub async fn insert_raw_reading(
        &self,
        sensor_id: i64,
        moisture_raw: i64,
        battery_pct: Option<f64>,
        recorded_at: OffsetDateTime,
    ) -> Result<Option<Reading>> {
        let Some(sensor) = self.get_sensor(sensor_id).await? else {
            return Ok(None);
        };

        let reading = Reading {
            sensor_id,
            moisture_raw,
            moisture_pct: sensor.calibration.to_pct(moisture_raw),
            battery_pct,
            recorded_at,
        };
        self.insert_reading(&reading).await?;
        Ok(Some(reading))
    }

    /// Readings recorded at or after `since`, ascending. Rows sharing a
    /// timestamp come back in insertion order.
    pub async fn recent_readings(&self, sensor_id: i64, since: OffsetDateTime) -> Result<Vec<Reading>> {
        let rows = sqlx::query_as::<_, ReadingRow>(
            r#"
            SELECT sensor_id, moisture_raw, moisture_pct, battery_pct, recorded_at_ns
            FROM readings
            WHERE sensor_id = ? AND recorded_at_ns >= ?
            ORDER BY recorded_at_ns, id
            "#,
        )
        .bind(sensor_id)
        .bind(nanos_saturating(since))
        .fetch_all(&self.pool)
        .await
        .context("recent_readings failed")?;

        rows.into_iter().map(ReadingRow::into_reading).collect()
    }

    /// The fetch range an evaluation at `now` looks at.
    pub async fn readings_as_of(
        &self,
        sensor_id: i64,
        now: OffsetDateTime,
        lookback: Duration,
    ) -> Result<Vec<Reading>> {
        self.recent_readings(sensor_id, lookback_start(now, lookback))
            .await
    }
}

// ===========================================================================
// Tests
// ===========================================================================
