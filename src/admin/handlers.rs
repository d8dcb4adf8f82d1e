use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::config::ServerConfig;
use crate::events::ServerReport;
use crate::lifecycle::{ControlPlane, StatusReport};
use crate::load_balancer::RegistryError;

pub type AdminState = Arc<ControlPlane>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("no healthy backend available")]
    NoBackend,
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(_) => ApiError::NotFound(e.to_string()),
            RegistryError::Duplicate(_) => ApiError::Conflict(e.to_string()),
            RegistryError::Invalid(_) | RegistryError::Address { .. } | RegistryError::ZeroWeight => {
                ApiError::BadRequest(e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NoBackend => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    #[serde(flatten)]
    pub report: StatusReport,
}

#[derive(Debug, Deserialize)]
pub struct WeightUpdate {
    pub weight: u32,
}

#[derive(Debug, Deserialize, Default)]
pub struct SelectQuery {
    pub client_ip: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionEvent {
    Open,
    Close,
}

#[derive(Debug, Deserialize)]
pub struct ConnectionUpdate {
    pub event: ConnectionEvent,
}

/// `?format=text` switches report endpoints to plain text.
#[derive(Debug, Deserialize, Default)]
pub struct FormatQuery {
    pub format: Option<String>,
}

impl FormatQuery {
    fn wants_text(&self) -> bool {
        self.format.as_deref() == Some("text")
    }
}

fn text(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

fn server_report(plane: &ControlPlane, id: &str) -> Result<ServerReport, ApiError> {
    plane
        .health_report()
        .servers
        .into_iter()
        .find(|s| s.id == id)
        .ok_or_else(|| ApiError::NotFound(format!("server {id} not found")))
}

pub async fn get_status(State(plane): State<AdminState>) -> Json<SystemStatus> {
    let report = plane.status();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if report.shutting_down { "shutting-down" } else { "operational" },
        report,
    })
}

pub async fn list_servers(State(plane): State<AdminState>) -> Json<Vec<ServerReport>> {
    Json(plane.health_report().servers)
}

pub async fn add_server(
    State(plane): State<AdminState>,
    Json(config): Json<ServerConfig>,
) -> Result<(StatusCode, Json<ServerReport>), ApiError> {
    let server = plane.add_server(config)?;
    Ok((StatusCode::CREATED, Json(server_report(&plane, &server.id)?)))
}

/// Start draining a server. Repeated calls are accepted and change nothing.
pub async fn remove_server(
    State(plane): State<AdminState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if plane.registry().get(&id).is_none() {
        return Err(ApiError::NotFound(format!("server {id} not found")));
    }
    plane.remove_server(&id);
    Ok(StatusCode::ACCEPTED)
}

pub async fn update_weight(
    State(plane): State<AdminState>,
    Path(id): Path<String>,
    Json(update): Json<WeightUpdate>,
) -> Result<Json<ServerReport>, ApiError> {
    plane.update_server_weight(&id, update.weight)?;
    Ok(Json(server_report(&plane, &id)?))
}

pub async fn track_connection(
    State(plane): State<AdminState>,
    Path(id): Path<String>,
    Json(update): Json<ConnectionUpdate>,
) -> Result<Json<ServerReport>, ApiError> {
    if !plane.track_connection(&id, update.event == ConnectionEvent::Open) {
        return Err(ApiError::NotFound(format!("server {id} not found")));
    }
    Ok(Json(server_report(&plane, &id)?))
}

pub async fn get_health(
    State(plane): State<AdminState>,
    Query(format): Query<FormatQuery>,
) -> Response {
    let report = plane.health_report();
    if format.wants_text() {
        return text(report.to_string());
    }
    Json(report).into_response()
}

pub async fn get_scaling(
    State(plane): State<AdminState>,
    Query(format): Query<FormatQuery>,
) -> Response {
    let report = plane.scaling_report();
    if format.wants_text() {
        return text(report.to_string());
    }
    Json(report).into_response()
}

pub async fn select_server(
    State(plane): State<AdminState>,
    Query(query): Query<SelectQuery>,
) -> Result<Json<ServerReport>, ApiError> {
    let server = plane
        .select_server(query.client_ip.as_deref(), query.session_id.as_deref())
        .ok_or(ApiError::NoBackend)?;
    Ok(Json(server_report(&plane, &server.id)?))
}
