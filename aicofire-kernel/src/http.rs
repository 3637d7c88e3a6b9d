/**
 * API REST AICOFIRE - Instantanés de l'état télémétrie pour les dashboards
 *
 * RÔLE :
 * Expose en lecture l'état calculé par le pipeline (appareils, capteurs,
 * alertes, liaison) et quelques mutations d'administration.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum, bind configurable (défaut 0.0.0.0:8080)
 * - Lecture libre : /health, /system, /catalog, /devices, /alerts
 * - Mutations (tout sauf GET) derrière le header x-api-key (AICOFIRE_API_KEY)
 * - Sans clé configurée, toute mutation est refusée
 */

use crate::alerts::{Alert, AlertSeverity};
use crate::config::ThresholdOverride;
use crate::models::{SensorDefinition, SensorId};
use crate::mqtt::{MqttCommand, MqttControl};
use crate::pipeline::{SystemSummary, TelemetryPipeline};
use crate::state::{DeviceInfo, DeviceState, SensorState, SensorStats, TelemetryError};
use crate::supervisor::SupervisorSnapshot;
use axum::extract::{Path, Query, Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const API_KEY_HEADER: &str = "x-api-key";

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<serde_json::Value>)>;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: TelemetryPipeline,
    pub mqtt: Option<MqttControl>,
    pub api_key: Option<String>,
}

fn error_response(e: TelemetryError) -> (StatusCode, Json<serde_json::Value>) {
    let code = match &e {
        TelemetryError::UnknownDevice(_) => StatusCode::NOT_FOUND,
        TelemetryError::DeviceAlreadyRegistered(_) => StatusCode::CONFLICT,
        TelemetryError::InvalidThresholds { .. } | TelemetryError::Frame(_) => StatusCode::BAD_REQUEST,
    };
    (code, Json(json!({ "error": e.to_string() })))
}

fn not_found(what: String) -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": what })))
}

/// Comparaison de la clé fournie à la clé attendue ; pas de clé attendue = refus.
pub fn key_matches(expected: Option<&str>, provided: Option<&str>) -> bool {
    match (expected, provided) {
        (Some(expected), Some(provided)) if !expected.is_empty() => expected == provided,
        _ => false,
    }
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    // Lecture toujours accessible
    if req.method() == Method::GET {
        return Ok(next.run(req).await);
    }

    let provided = req.headers().get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    if app.api_key.as_deref().map_or(true, str::is_empty) {
        tracing::warn!(path = %req.uri().path(), "SECURITY: AICOFIRE_API_KEY not set - mutation denied");
        return Err(StatusCode::UNAUTHORIZED);
    }
    if !key_matches(app.api_key.as_deref(), provided) {
        tracing::warn!(path = %req.uri().path(), "unauthorized mutation attempt");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system", get(get_system))
        .route("/catalog", get(get_catalog))
        .route("/devices", get(list_devices).post(register_device))
        .route("/devices/{id}", get(get_device).delete(remove_device))
        .route("/devices/{id}/sensors/{sensor}", get(get_sensor))
        .route("/alerts", get(list_alerts).delete(clear_alerts))
        .route("/thresholds/{sensor}", put(set_thresholds))
        .route("/connection/reconnect", post(reconnect))
        .route("/connection/disconnect", post(disconnect))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

#[derive(Debug, Serialize)]
pub struct SystemView {
    #[serde(flatten)]
    pub summary: SystemSummary,
    pub link: Option<SupervisorSnapshot>,
}

// GET /system
async fn get_system(State(app): State<AppState>) -> Json<SystemView> {
    Json(SystemView { summary: app.pipeline.system_summary(), link: app.mqtt.as_ref().map(MqttControl::snapshot) })
}

// GET /catalog
async fn get_catalog(State(app): State<AppState>) -> Json<Vec<SensorDefinition>> {
    Json(app.pipeline.catalog())
}

// GET /devices
async fn list_devices(State(app): State<AppState>) -> Json<Vec<DeviceState>> {
    Json(app.pipeline.devices())
}

// GET /devices/{id}
async fn get_device(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<DeviceState> {
    app.pipeline.device(&id).map(Json).ok_or_else(|| not_found(format!("unknown device: {id}")))
}

#[derive(Debug, Serialize)]
pub struct SensorView {
    pub definition: SensorDefinition,
    #[serde(flatten)]
    pub state: SensorState,
    pub stats: Option<SensorStats>,
}

// GET /devices/{id}/sensors/{sensor}
async fn get_sensor(State(app): State<AppState>, Path((id, sensor)): Path<(String, String)>) -> ApiResult<SensorView> {
    let sensor_id: SensorId = sensor.parse().map_err(not_found)?;
    let state = app
        .pipeline
        .sensor(&id, sensor_id)
        .map_err(error_response)?
        .ok_or_else(|| not_found(format!("sensor {sensor_id} not attached to {id}")))?;
    let definition = app
        .pipeline
        .catalog()
        .into_iter()
        .find(|d| d.sensor_id == sensor_id)
        .ok_or_else(|| not_found(format!("unknown sensor id: {sensor_id}")))?;
    Ok(Json(SensorView { definition, stats: state.stats(), state }))
}

#[derive(Debug, Deserialize)]
struct AlertQuery {
    severity: Option<AlertSeverity>,
}

// GET /alerts?severity=warning|critical
async fn list_alerts(State(app): State<AppState>, Query(q): Query<AlertQuery>) -> Json<Vec<Alert>> {
    Json(app.pipeline.alerts(q.severity))
}

// DELETE /alerts
async fn clear_alerts(State(app): State<AppState>) -> Json<serde_json::Value> {
    let cleared = app.pipeline.clear_alerts();
    Json(json!({ "cleared": cleared }))
}

// POST /devices
async fn register_device(
    State(app): State<AppState>,
    Json(info): Json<DeviceInfo>,
) -> Result<(StatusCode, Json<DeviceState>), (StatusCode, Json<serde_json::Value>)> {
    let device = app.pipeline.register_device(info).map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(device)))
}

// DELETE /devices/{id}
async fn remove_device(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<serde_json::Value> {
    app.pipeline.remove_device(&id).map_err(error_response)?;
    Ok(Json(json!({ "status": "deleted", "device_id": id })))
}

// PUT /thresholds/{sensor}
async fn set_thresholds(
    State(app): State<AppState>,
    Path(sensor): Path<String>,
    Json(body): Json<ThresholdOverride>,
) -> ApiResult<SensorDefinition> {
    let sensor_id: SensorId = sensor.parse().map_err(not_found)?;
    app.pipeline
        .set_thresholds(sensor_id, body.warning, body.critical)
        .map(Json)
        .map_err(error_response)
}

async fn send_link_command(app: &AppState, command: MqttCommand) -> ApiResult<serde_json::Value> {
    let Some(control) = &app.mqtt else {
        return Err((StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": "mqtt link disabled" }))));
    };
    if !control.send(command).await {
        return Err((StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": "mqtt supervisor stopped" }))));
    }
    Ok(Json(json!({ "accepted": format!("{command:?}").to_lowercase() })))
}

// POST /connection/reconnect
async fn reconnect(State(app): State<AppState>) -> ApiResult<serde_json::Value> {
    send_link_command(&app, MqttCommand::Reconnect).await
}

// POST /connection/disconnect
async fn disconnect(State(app): State<AppState>) -> ApiResult<serde_json::Value> {
    send_link_command(&app, MqttCommand::Disconnect).await
}
