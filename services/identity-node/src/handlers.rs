//! HTTP routes of the identity service.
//!
//! Service calls block on key generation and the datastore, so every handler
//! runs them on the blocking pool.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, warn};

use iotid_identity::{
    IdentityError, IdentityResult, IdentityService, RegisterDeviceRequest,
    RegisterOrganizationRequest, Status,
};

use crate::state::AppState;

/// Admin status change for one device.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceUpdateRequest {
    pub status: i64,
    #[serde(default)]
    pub device_data: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/v1/organization", post(organization_register))
        .route("/v1/organizations", get(organization_list))
        .route("/v1/device", post(device_register))
        .route("/v1/devices/:orgid", get(device_list))
        .route("/v1/device/enroll", post(device_enroll))
        .route(
            "/v1/device/:orgid/:device",
            get(device_get).put(device_update),
        )
        .with_state(state)
}

/// Error body `{code, message}` with a status derived from the error kind.
pub struct ApiError(IdentityError);

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        ApiError(err)
    }
}

/// Missing, malformed or incomplete JSON bodies are validation failures.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(IdentityError::Validation(rejection.body_text()))
    }
}

pub fn status_for(err: &IdentityError) -> StatusCode {
    match err {
        IdentityError::Validation(_)
        | IdentityError::AssertionType(_)
        | IdentityError::MissingHeader(_)
        | IdentityError::Mismatch(_)
        | IdentityError::InvalidAssertion(_) => StatusCode::BAD_REQUEST,
        IdentityError::NotFound(_) | IdentityError::NotRegistered(_) => StatusCode::NOT_FOUND,
        IdentityError::Duplicate(_)
        | IdentityError::AlreadyEnrolled(_)
        | IdentityError::Disabled(_)
        | IdentityError::InvalidState(_) => StatusCode::CONFLICT,
        IdentityError::ForbiddenTransition(_) => StatusCode::FORBIDDEN,
        IdentityError::Pki(_) | IdentityError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(code = self.0.code(), error = %self.0, "request failed");
        } else {
            warn!(code = self.0.code(), error = %self.0, "request rejected");
        }
        let body = json!({ "code": self.0.code(), "message": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Run a service call on the blocking pool.
async fn blocking<T, F>(state: &Arc<AppState>, call: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&IdentityService) -> IdentityResult<T> + Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || call(&state.service))
        .await
        .map_err(|e| ApiError(IdentityError::Storage(format!("worker failed: {e}"))))?
        .map_err(ApiError)
}

fn to_json<T: serde::Serialize>(key: &str, value: &T) -> Result<Json<Value>, ApiError> {
    let value = serde_json::to_value(value)
        .map_err(|e| ApiError(IdentityError::Storage(format!("encoding response: {e}"))))?;
    let mut body = serde_json::Map::new();
    body.insert("code".to_string(), Value::from(""));
    body.insert("message".to_string(), Value::from(""));
    body.insert(key.to_string(), value);
    Ok(Json(Value::Object(body)))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "iotid-node",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn organization_register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterOrganizationRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    let id = blocking(&state, move |service| service.register_organization(&request)).await?;
    to_json("id", &id)
}

async fn organization_list(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let organizations = blocking(&state, |service| service.organization_list()).await?;
    to_json("organizations", &organizations)
}

async fn device_register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterDeviceRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    let id = blocking(&state, move |service| service.register_device(&request)).await?;
    to_json("id", &id)
}

async fn device_list(
    State(state): State<Arc<AppState>>,
    Path(orgid): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let devices = blocking(&state, move |service| service.device_list(&orgid)).await?;
    to_json("devices", &devices)
}

async fn device_get(
    State(state): State<Arc<AppState>>,
    Path((orgid, device)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let enrollment = blocking(&state, move |service| service.device_get(&orgid, &device)).await?;
    to_json("enrollment", &enrollment)
}

async fn device_update(
    State(state): State<Arc<AppState>>,
    Path((orgid, device)): Path<(String, String)>,
    payload: Result<Json<DeviceUpdateRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    let target = Status::from_code(request.status).ok_or_else(|| {
        ApiError(IdentityError::Validation(format!(
            "unknown status code {}",
            request.status
        )))
    })?;
    let change = blocking(&state, move |service| {
        service.device_update(&orgid, &device, target, request.device_data.as_deref())
    })
    .await?;
    Ok(Json(json!({
        "code": "",
        "message": "",
        "previous": change.previous,
        "status": change.current,
    })))
}

async fn device_enroll(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let (first, second) = state.decoder.decode_pair(&body)?;
    let enrollment =
        blocking(&state, move |service| service.enroll_device(&first, &second)).await?;
    to_json("enrollment", &enrollment)
}
