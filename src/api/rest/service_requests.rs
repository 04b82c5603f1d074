use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::models::service_request::{
    RequestId, RequestStatus, ServiceRequest, StatusCounts, TruckId,
};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/service-request", post(create_request))
        .route("/api/service-request/status", put(bulk_update_status))
        .route(
            "/api/service-request/:id",
            get(get_request).delete(delete_request),
        )
        .route("/api/service-request/:id/assign", put(assign_request))
        .route("/api/service-request/:id/status", put(update_status))
        .route("/api/service-requests", get(list_requests))
        .route("/api/service-requests/metadata", get(metadata))
}

#[derive(Deserialize)]
pub struct CreateServiceRequest {
    pub drop_off_location: Option<String>,
    pub shipment_metadata: Option<Value>,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub truck_id: TruckId,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    pub details: Option<Value>,
}

#[derive(Deserialize)]
pub struct BulkUpdateStatusRequest {
    #[serde(default)]
    pub ids: Vec<RequestId>,
    pub status: String,
    pub truck_ids: Option<Vec<TruckId>>,
}

#[derive(Serialize)]
pub struct CreatedResponse {
    pub request_id: RequestId,
    pub status: RequestStatus,
}

#[derive(Serialize)]
pub struct AssignedResponse {
    pub request_id: RequestId,
    pub truck_id: Option<TruckId>,
    pub status: RequestStatus,
    pub path: Value,
}

#[derive(Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Serialize)]
pub struct BulkUpdateResponse {
    pub success: bool,
    pub message: String,
    pub updated: u64,
}

#[derive(Serialize)]
pub struct RequestSummary {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub drop_off_location: String,
    pub shipment_metadata: Value,
    pub truck_id: Option<TruckId>,
    pub created_time: DateTime<Utc>,
}

impl From<ServiceRequest> for RequestSummary {
    fn from(request: ServiceRequest) -> Self {
        Self {
            request_id: request.id,
            status: request.status,
            drop_off_location: request.drop_off_location,
            shipment_metadata: request.shipment_metadata,
            truck_id: request.truck_id,
            created_time: request.created_time,
        }
    }
}

/// Malformed bodies are validation failures (400), not axum's default 422.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}

async fn create_request(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateServiceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedResponse>), AppError> {
    let payload = body(payload)?;
    let request = state
        .lifecycle
        .create(payload.drop_off_location, payload.shipment_metadata)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            request_id: request.id,
            status: request.status,
        }),
    ))
}

async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<RequestId>,
) -> Result<Json<RequestSummary>, AppError> {
    let request = state.lifecycle.get(id).await?;
    Ok(Json(request.into()))
}

async fn assign_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<RequestId>,
    payload: Result<Json<AssignRequest>, JsonRejection>,
) -> Result<Json<AssignedResponse>, AppError> {
    let payload = body(payload)?;
    let assignment = state.lifecycle.assign(id, payload.truck_id).await?;

    Ok(Json(AssignedResponse {
        request_id: assignment.request.id,
        truck_id: assignment.request.truck_id,
        status: assignment.request.status,
        path: assignment.path,
    }))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<RequestId>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<ActionResponse>, AppError> {
    let payload = body(payload)?;
    state
        .lifecycle
        .update_status(id, &payload.status, payload.details.as_ref())
        .await?;

    Ok(Json(ActionResponse {
        success: true,
        message: "Request updated successfully".to_string(),
    }))
}

async fn bulk_update_status(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BulkUpdateStatusRequest>, JsonRejection>,
) -> Result<Json<BulkUpdateResponse>, AppError> {
    let payload = body(payload)?;
    if payload.truck_ids.is_some() {
        return Err(AppError::Validation(
            "matching by truck id is not supported; send request ids".to_string(),
        ));
    }

    let updated = state
        .lifecycle
        .bulk_update_status(&payload.ids, &payload.status)
        .await?;

    Ok(Json(BulkUpdateResponse {
        success: true,
        message: format!("{updated} requests updated successfully"),
        updated,
    }))
}

async fn delete_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<RequestId>,
) -> Result<Json<ActionResponse>, AppError> {
    state.lifecycle.delete(id).await?;

    Ok(Json(ActionResponse {
        success: true,
        message: "Request deleted successfully".to_string(),
    }))
}

async fn list_requests(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<RequestSummary>>, AppError> {
    let requests = state.lifecycle.list().await?;
    Ok(Json(requests.into_iter().map(RequestSummary::from).collect()))
}

async fn metadata(State(state): State<Arc<AppState>>) -> Result<Json<StatusCounts>, AppError> {
    Ok(Json(state.lifecycle.metadata().await?))
}
