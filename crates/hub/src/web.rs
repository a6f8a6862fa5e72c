use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use std::env;
use std::net::SocketAddr;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Settings;
use crate::dashboard::{self, Dashboard, PlantCard};
use crate::db::Db;
use moist_core::{MoistError, PlantProfile, Reading, TrendEstimate};

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub settings: Settings,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

pub enum ApiError {
    NotFound(String),
    Invalid(String),
    Internal(anyhow::Error),
}

impl ApiError {
    /// Malformed readings are the client's fault; anything else is ours.
    fn from_write(e: anyhow::Error) -> Self {
        match e.downcast_ref::<MoistError>() {
            Some(MoistError::InvalidReading { .. }) => Self::Invalid(format!("{e:#}")),
            _ => Self::Internal(e),
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self::Internal(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound(what) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": what }))).into_response()
            }
            Self::Invalid(why) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "error": why }))).into_response()
            }
            Self::Internal(e) => {
                error!("request failed: {e:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": format!("{e:#}") })),
                )
                    .into_response()
            }
        }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/plants", get(api_plants))
        .route("/api/plants/{plant_id}", get(api_plant))
        .route("/api/plants/{plant_id}/profiles", get(api_plant_profiles))
        .route("/api/readings", post(api_post_reading))
        .route("/api/sensors/{sensor_id}/trend", get(api_sensor_trend))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn api_plants(State(state): State<AppState>) -> ApiResult<Dashboard> {
    let dash = dashboard::build(&state.db, &state.settings, OffsetDateTime::now_utc()).await?;
    Ok(Json(dash))
}

async fn api_plant(
    State(state): State<AppState>,
    Path(plant_id): Path<i64>,
) -> ApiResult<PlantCard> {
    dashboard::find_plant_card(&state.db, plant_id, &state.settings, OffsetDateTime::now_utc())
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("plant {plant_id} not found")))
}

async fn api_plant_profiles(
    State(state): State<AppState>,
    Path(plant_id): Path<i64>,
) -> ApiResult<Vec<PlantProfile>> {
    if state.db.get_plant(plant_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("plant {plant_id} not found")));
    }
    Ok(Json(state.db.profile_history(plant_id).await?))
}

/// A raw sample as a sensor node reports it. Calibration happens here.
#[derive(Debug, Deserialize)]
pub struct NewReading {
    pub sensor_id: i64,
    pub moisture_raw: i64,
    #[serde(default)]
    pub battery_pct: Option<f64>,
    /// Defaults to the time of receipt.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub recorded_at: Option<OffsetDateTime>,
}

async fn api_post_reading(
    State(state): State<AppState>,
    Json(body): Json<NewReading>,
) -> Result<(StatusCode, Json<Reading>), ApiError> {
    let recorded_at = body.recorded_at.unwrap_or_else(OffsetDateTime::now_utc);
    let stored = state
        .db
        .insert_raw_reading(body.sensor_id, body.moisture_raw, body.battery_pct, recorded_at)
        .await
        .map_err(ApiError::from_write)?;

    let Some(reading) = stored else {
        return Err(ApiError::NotFound(format!("sensor {} not found", body.sensor_id)));
    };
    info!(
        sensor = reading.sensor_id,
        raw = reading.moisture_raw,
        pct = reading.moisture_pct,
        "reading stored"
    );
    Ok((StatusCode::CREATED, Json(reading)))
}

async fn api_sensor_trend(
    State(state): State<AppState>,
    Path(sensor_id): Path<i64>,
) -> ApiResult<TrendEstimate> {
    dashboard::sensor_trend(&state.db, sensor_id, &state.settings, OffsetDateTime::now_utc())
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("sensor {sensor_id} not found")))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!("api listening on http://{addr}");

    axum::serve(listener, router(state))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::tests::{seeded_db, settings};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn app() -> Router {
        router(AppState {
            db: seeded_db().await,
            settings: settings(),
        })
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_ok() {
        let (status, body) = get_json(app().await, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn plants_lists_every_plant() {
        let (status, body) = get_json(app().await, "/api/plants").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["total"], 2);
        assert_eq!(body["plants"].as_array().unwrap().len(), 2);
        assert_eq!(body["plants"][0]["plant"]["name"], "Monstera");
    }

    #[tokio::test]
    async fn single_plant_card() {
        let (status, body) = get_json(app().await, "/api/plants/2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["plant"]["plant_id"], 2);
        assert_eq!(body["prediction"]["status"], "unknown");
        assert_eq!(body["prediction"]["hours_until_watering"]["kind"], "unknown");
    }

    #[tokio::test]
    async fn unknown_plant_is_404() {
        let (status, body) = get_json(app().await, "/api/plants/42").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "plant 42 not found");
    }

    #[tokio::test]
    async fn sensor_trend_endpoint() {
        let (status, body) = get_json(app().await, "/api/sensors/1/trend").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["confidence"].is_string());

        let (status, _) = get_json(app().await, "/api/sensors/5/trend").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn posted_reading_is_calibrated_and_evaluated() {
        let app = app().await;
        let (status, body) = post_json(
            app.clone(),
            "/api/readings",
            json!({ "sensor_id": 1, "moisture_raw": 1600, "battery_pct": 55.0 }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        // Halfway between raw_dry 2400 and raw_wet 800.
        assert_eq!(body["moisture_pct"], 50.0);

        let (status, card) = get_json(app, "/api/plants/1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(card["prediction"]["moisture_pct"], 50.0);
        assert_eq!(card["prediction"]["status"], "healthy");
        assert_eq!(card["prediction"]["battery"], "low");
    }

    #[tokio::test]
    async fn posted_reading_keeps_given_timestamp() {
        let (status, body) = post_json(
            app().await,
            "/api/readings",
            json!({
                "sensor_id": 1,
                "moisture_raw": 2400,
                "recorded_at": "2024-05-03T12:30:00.25Z"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["moisture_pct"], 0.0);
        assert_eq!(body["recorded_at"], "2024-05-03T12:30:00.25Z");
        assert!(body["battery_pct"].is_null());
    }

    #[tokio::test]
    async fn reading_for_unknown_sensor_is_404() {
        let (status, body) = post_json(
            app().await,
            "/api/readings",
            json!({ "sensor_id": 8, "moisture_raw": 1600 }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "sensor 8 not found");
    }

    #[tokio::test]
    async fn malformed_reading_is_422() {
        let (status, body) = post_json(
            app().await,
            "/api/readings",
            json!({ "sensor_id": 1, "moisture_raw": 1600, "battery_pct": 150.0 }),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("battery_pct 150"));
    }

    #[tokio::test]
    async fn profile_history_endpoint() {
        let (status, body) = get_json(app().await, "/api/plants/1/profiles").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["water_below"], 30);

        let (status, _) = get_json(app().await, "/api/plants/9/profiles").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn non_numeric_id_is_rejected() {
        let resp = app()
            .await
            .oneshot(
                Request::builder()
                    .uri("/api/plants/abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
