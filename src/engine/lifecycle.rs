use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::clients::http::DownstreamHttpClient;
use crate::clients::{AlertClient, PathClient, ScheduleClient};
use crate::error::AppError;
use crate::models::service_request::{
    NewServiceRequest, RequestId, RequestStatus, ServiceRequest, StatusCounts,
};
use crate::observability::metrics::Metrics;
use crate::store::RequestStore;

/// The three downstream services the lifecycle depends on.
#[derive(Clone)]
pub struct ExternalServices {
    pub schedules: Arc<dyn ScheduleClient>,
    pub paths: Arc<dyn PathClient>,
    pub alerts: Arc<dyn AlertClient>,
}

impl ExternalServices {
    pub fn from_http(client: DownstreamHttpClient) -> Self {
        let client = Arc::new(client);
        Self {
            schedules: client.clone(),
            paths: client.clone(),
            alerts: client,
        }
    }
}

#[derive(Clone)]
pub struct LifecycleController {
    pub(crate) store: Arc<dyn RequestStore>,
    pub(crate) services: ExternalServices,
    pub(crate) metrics: Metrics,
}

pub(crate) fn not_found(id: RequestId) -> AppError {
    AppError::NotFound(format!("service request {id} not found"))
}

fn routing_in_progress(id: RequestId) -> AppError {
    AppError::StateConflict(format!(
        "service request {id} is being routed; retry once the assignment settles"
    ))
}

impl LifecycleController {
    pub fn new(store: Arc<dyn RequestStore>, services: ExternalServices, metrics: Metrics) -> Self {
        Self {
            store,
            services,
            metrics,
        }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub async fn create(
        &self,
        drop_off_location: Option<String>,
        shipment_metadata: Option<Value>,
    ) -> Result<ServiceRequest, AppError> {
        let result: Result<ServiceRequest, AppError> = async {
            let new_request = NewServiceRequest::new(drop_off_location, shipment_metadata)?;
            let request = self.store.insert(new_request).await?;

            info!(
                request_id = request.id,
                drop_off_location = %request.drop_off_location,
                "service request created"
            );
            self.notify(format!(
                "Service request {} created for drop-off at {}",
                request.id, request.drop_off_location
            ));

            Ok(request)
        }
        .await;

        self.metrics.record_operation("create", &result);
        result
    }

    pub async fn get(&self, id: RequestId) -> Result<ServiceRequest, AppError> {
        self.store.get(id).await?.ok_or_else(|| not_found(id))
    }

    pub async fn list(&self) -> Result<Vec<ServiceRequest>, AppError> {
        self.store.list().await
    }

    pub async fn metadata(&self) -> Result<StatusCounts, AppError> {
        self.store.status_counts().await
    }

    /// Applies any enumeration member; transitions are not checked for legality.
    /// A request whose assignment is still being routed is refused. `details`
    /// is logged, not stored.
    pub async fn update_status(
        &self,
        id: RequestId,
        status: &str,
        details: Option<&Value>,
    ) -> Result<RequestStatus, AppError> {
        let result: Result<RequestStatus, AppError> = async {
            let status: RequestStatus = status.parse()?;

            let outcome = self.store.update_status(&[id], status).await?;
            if !outcome.routing.is_empty() {
                return Err(routing_in_progress(id));
            }
            if outcome.updated == 0 {
                return Err(not_found(id));
            }

            info!(
                request_id = id,
                status = %status,
                terminal = status.is_terminal(),
                details = ?details,
                "service request status updated"
            );
            Ok(status)
        }
        .await;

        self.metrics.record_operation("update_status", &result);
        result
    }

    /// Returns the number of requests updated. Unknown ids and requests whose
    /// assignment is still being routed are skipped.
    pub async fn bulk_update_status(
        &self,
        ids: &[RequestId],
        status: &str,
    ) -> Result<u64, AppError> {
        let result: Result<u64, AppError> = async {
            let status: RequestStatus = status.parse()?;

            let mut ids = ids.to_vec();
            ids.sort_unstable();
            ids.dedup();
            if ids.is_empty() {
                return Err(AppError::Validation("ids cannot be empty".to_string()));
            }

            let outcome = self.store.update_status(&ids, status).await?;
            let updated = outcome.updated;
            if updated == 0 {
                if let [id] = outcome.routing.as_slice() {
                    return Err(routing_in_progress(*id));
                }
                if !outcome.routing.is_empty() {
                    return Err(AppError::StateConflict(format!(
                        "service requests {:?} are being routed",
                        outcome.routing
                    )));
                }
                return Err(AppError::NotFound(
                    "no matching service requests".to_string(),
                ));
            }

            info!(
                requested = ids.len(),
                updated,
                routing = outcome.routing.len(),
                status = %status,
                "service request statuses updated"
            );
            Ok(updated)
        }
        .await;

        self.metrics.record_operation("bulk_update_status", &result);
        result
    }

    pub async fn delete(&self, id: RequestId) -> Result<(), AppError> {
        let result: Result<(), AppError> = async {
            if !self.store.delete(id).await? {
                return Err(not_found(id));
            }

            info!(request_id = id, "service request deleted");
            self.notify(format!("Service request {id} deleted"));
            Ok(())
        }
        .await;

        self.metrics.record_operation("delete", &result);
        result
    }

    /// Fire-and-forget: delivery runs on its own task and failures are only logged.
    pub(crate) fn notify(&self, description: String) {
        let alerts = self.services.alerts.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            if let Err(err) = alerts.send(&description).await {
                metrics.alerts_failed_total.inc();
                warn!(error = %err, description = %description, "failed to deliver notification");
            }
        });
    }
}
