use std::future::Future;
use std::time::Instant;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::clients::{DownstreamError, ScheduleId, Service};
use crate::engine::lifecycle::{LifecycleController, not_found};
use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::models::service_request::{RequestId, ServiceRequest, TruckId};
use crate::store::ClaimOutcome;

impl LifecycleController {
    /// Assigns an `Opened` request to a truck and routes it.
    ///
    /// The `Opened -> Assigned` claim is a conditional update, so of several
    /// concurrent callers exactly one proceeds to the downstream calls. A
    /// request keeps its first truck for good, so a later reset to `Opened`
    /// does not make it assignable again.
    ///
    /// While scheduling and routing are in flight the request reads as
    /// `Assigned` and the claim is pending: status writes to it are refused.
    /// On success the claim is confirmed; on failure it is released and the
    /// request is `Opened` with no truck.
    pub async fn assign(&self, id: RequestId, truck_id: TruckId) -> Result<Assignment, AppError> {
        let result = self.try_assign(id, truck_id).await;
        self.metrics.record_operation("assign", &result);
        result
    }

    async fn try_assign(&self, id: RequestId, truck_id: TruckId) -> Result<Assignment, AppError> {
        let request = match self.store.claim_for_assignment(id, truck_id).await? {
            ClaimOutcome::Claimed(request) => request,
            ClaimOutcome::Missing => return Err(not_found(id)),
            ClaimOutcome::NotOpened(status) => {
                return Err(AppError::StateConflict(format!(
                    "service request {id} is {status}, only Opened requests can be assigned"
                )));
            }
            ClaimOutcome::Owned(owner) => {
                return Err(AppError::StateConflict(format!(
                    "service request {id} already belongs to truck {owner}"
                )));
            }
        };

        let (schedule_id, path) = match self.route(&request).await {
            Ok(routed) => routed,
            Err(err) => {
                warn!(
                    request_id = id,
                    truck_id,
                    service = %err.service(),
                    error = %err,
                    "routing failed, releasing assignment"
                );
                self.release(id, truck_id).await;
                return Err(err.into());
            }
        };

        match self.store.confirm_assignment(id, truck_id).await {
            Ok(true) => {}
            Ok(false) => return Err(not_found(id)),
            Err(err) => {
                self.release(id, truck_id).await;
                return Err(err);
            }
        }

        info!(
            request_id = id,
            truck_id,
            schedule_id = %schedule_id,
            "service request assigned"
        );
        self.notify(format!(
            "Service request {id} assigned to truck {truck_id} on schedule {schedule_id}"
        ));

        Ok(Assignment {
            request,
            schedule_id,
            path,
        })
    }

    async fn route(&self, request: &ServiceRequest) -> Result<(ScheduleId, Value), DownstreamError> {
        let stops = [request.drop_off_location.clone()];

        let schedule_id = self
            .observe(Service::Schedule, self.services.schedules.create_schedule(&stops))
            .await?;
        let routes = self
            .observe(Service::Path, self.services.paths.routes(&schedule_id))
            .await?;

        let route = routes
            .into_iter()
            .next()
            .ok_or_else(|| DownstreamError::InvalidResponse {
                service: Service::Path,
                message: format!("no routes for schedule {schedule_id}"),
            })?;

        Ok((schedule_id, route.path))
    }

    async fn release(&self, id: RequestId, truck_id: TruckId) {
        match self.store.release_assignment(id, truck_id).await {
            Ok(true) => {}
            Ok(false) => warn!(
                request_id = id,
                truck_id, "assignment was not released: request deleted concurrently"
            ),
            Err(err) => error!(
                request_id = id,
                truck_id,
                error = %err,
                "failed to release assignment; request left Assigned"
            ),
        }
    }

    async fn observe<T>(
        &self,
        service: Service,
        call: impl Future<Output = Result<T, DownstreamError>>,
    ) -> Result<T, DownstreamError> {
        let start = Instant::now();
        let result = call.await;

        self.metrics
            .downstream_latency_seconds
            .with_label_values(&[service.as_str()])
            .observe(start.elapsed().as_secs_f64());
        let outcome = if result.is_ok() { "success" } else { "error" };
        self.metrics
            .downstream_calls_total
            .with_label_values(&[service.as_str(), outcome])
            .inc();

        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::clients::{AlertClient, PathClient, Route, ScheduleClient};
    use crate::engine::ExternalServices;
    use crate::models::service_request::RequestStatus;
    use crate::observability::metrics::Metrics;
    use crate::store::{MemoryStore, RequestStore};

    #[derive(Default)]
    struct Downstream {
        schedule_calls: AtomicUsize,
        path_calls: AtomicUsize,
        fail_schedules: bool,
        fail_paths: bool,
        no_routes: bool,
        /// When set, scheduling signals `scheduling` and waits for `resume`.
        hold_schedules: bool,
        scheduling: Notify,
        resume: Notify,
    }

    #[async_trait]
    impl ScheduleClient for Downstream {
        async fn create_schedule(&self, stops: &[String]) -> Result<ScheduleId, DownstreamError> {
            self.schedule_calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(stops, ["Warehouse A".to_string()]);
            if self.hold_schedules {
                self.scheduling.notify_one();
                self.resume.notified().await;
            }
            if self.fail_schedules {
                return Err(DownstreamError::Status {
                    service: Service::Schedule,
                    status: 502,
                    message: "bad gateway".to_string(),
                });
            }
            Ok(ScheduleId("S1".to_string()))
        }
    }

    #[async_trait]
    impl PathClient for Downstream {
        async fn routes(&self, schedule_id: &ScheduleId) -> Result<Vec<Route>, DownstreamError> {
            self.path_calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(schedule_id.0, "S1");
            if self.fail_paths {
                return Err(DownstreamError::Timeout {
                    service: Service::Path,
                });
            }
            if self.no_routes {
                return Ok(Vec::new());
            }
            Ok(vec![Route { path: json!("R1") }, Route { path: json!("R2") }])
        }
    }

    #[async_trait]
    impl AlertClient for Downstream {
        async fn send(&self, _description: &str) -> Result<(), DownstreamError> {
            Ok(())
        }
    }

    async fn controller(downstream: Downstream) -> (LifecycleController, Arc<Downstream>, RequestId) {
        let downstream = Arc::new(downstream);
        let store: Arc<dyn RequestStore> = Arc::new(MemoryStore::new());
        let services = ExternalServices {
            schedules: downstream.clone(),
            paths: downstream.clone(),
            alerts: downstream.clone(),
        };
        let controller = LifecycleController::new(store, services, Metrics::new());
        let id = controller
            .create(Some("Warehouse A".to_string()), Some(json!({"weight": "10kg"})))
            .await
            .unwrap()
            .id;
        (controller, downstream, id)
    }

    #[tokio::test]
    async fn assign_takes_first_route() {
        let (controller, _, id) = controller(Downstream::default()).await;

        let assignment = controller.assign(id, 5).await.unwrap();

        assert_eq!(assignment.path, json!("R1"));
        assert_eq!(assignment.schedule_id, ScheduleId("S1".to_string()));
        assert_eq!(assignment.request.truck_id, Some(5));
        assert_eq!(assignment.request.status, RequestStatus::Assigned);
    }

    #[tokio::test]
    async fn missing_request_makes_no_downstream_calls() {
        let (controller, downstream, _) = controller(Downstream::default()).await;

        let err = controller.assign(404, 5).await.unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(downstream.schedule_calls.load(Ordering::SeqCst), 0);
        assert_eq!(downstream.path_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_assign_is_a_state_conflict() {
        let (controller, downstream, id) = controller(Downstream::default()).await;
        controller.assign(id, 5).await.unwrap();

        let err = controller.assign(id, 6).await.unwrap_err();

        assert!(matches!(err, AppError::StateConflict(_)));
        assert_eq!(downstream.schedule_calls.load(Ordering::SeqCst), 1);
        assert_eq!(controller.get(id).await.unwrap().truck_id, Some(5));
    }

    #[tokio::test]
    async fn path_failure_releases_the_claim() {
        let (controller, _, id) = controller(Downstream {
            fail_paths: true,
            ..Default::default()
        })
        .await;

        let err = controller.assign(id, 5).await.unwrap_err();

        assert!(matches!(err, AppError::Downstream(ref e) if e.is_timeout()));
        let request = controller.get(id).await.unwrap();
        assert_eq!(request.status, RequestStatus::Opened);
        assert_eq!(request.truck_id, None);
    }

    #[tokio::test]
    async fn empty_route_list_is_a_downstream_failure() {
        let (controller, _, id) = controller(Downstream {
            no_routes: true,
            ..Default::default()
        })
        .await;

        let err = controller.assign(id, 5).await.unwrap_err();

        assert!(matches!(
            err,
            AppError::Downstream(DownstreamError::InvalidResponse { .. })
        ));
        assert_eq!(controller.get(id).await.unwrap().status, RequestStatus::Opened);
    }

    #[tokio::test]
    async fn reopened_request_keeps_its_truck() {
        let (controller, downstream, id) = controller(Downstream::default()).await;
        controller.assign(id, 5).await.unwrap();
        controller.update_status(id, "Opened", None).await.unwrap();

        let err = controller.assign(id, 9).await.unwrap_err();

        assert!(matches!(err, AppError::StateConflict(_)));
        assert_eq!(downstream.schedule_calls.load(Ordering::SeqCst), 1);
        let request = controller.get(id).await.unwrap();
        assert_eq!(request.truck_id, Some(5));
        assert_eq!(request.status, RequestStatus::Opened);
    }

    #[tokio::test]
    async fn status_writes_wait_out_an_in_flight_assignment() {
        let (controller, downstream, id) = controller(Downstream {
            fail_schedules: true,
            hold_schedules: true,
            ..Default::default()
        })
        .await;
        let controller = Arc::new(controller);

        let assigning = tokio::spawn({
            let controller = controller.clone();
            async move { controller.assign(id, 5).await }
        });
        downstream.scheduling.notified().await;

        let in_flight = controller.get(id).await.unwrap();
        assert_eq!(in_flight.status, RequestStatus::Assigned);
        assert_eq!(in_flight.truck_id, Some(5));

        let err = controller
            .update_status(id, "Served", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StateConflict(_)));
        let err = controller
            .bulk_update_status(&[id], "Served")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StateConflict(_)));

        downstream.resume.notify_one();
        let err = assigning.await.unwrap().unwrap_err();
        assert!(matches!(err, AppError::Downstream(_)));

        let released = controller.get(id).await.unwrap();
        assert_eq!(released.status, RequestStatus::Opened);
        assert_eq!(released.truck_id, None);
        assert_eq!(
            controller.update_status(id, "Served", None).await.unwrap(),
            RequestStatus::Served
        );
    }

    #[tokio::test]
    async fn confirmed_assignment_accepts_status_writes() {
        let (controller, _, id) = controller(Downstream::default()).await;
        controller.assign(id, 5).await.unwrap();

        assert_eq!(
            controller.update_status(id, "Complete", None).await.unwrap(),
            RequestStatus::Complete
        );
        assert_eq!(controller.get(id).await.unwrap().truck_id, Some(5));
    }
}
