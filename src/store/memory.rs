use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::error::AppError;
use crate::models::service_request::{
    NewServiceRequest, RequestId, RequestStatus, ServiceRequest, StatusCounts, TruckId,
};
use crate::store::{ClaimOutcome, RequestStore, StatusUpdate};

/// Process-local store. Conditional updates hold the entry's shard lock for
/// the whole check-and-set.
pub struct MemoryStore {
    requests: DashMap<RequestId, Record>,
    next_id: AtomicI64,
}

struct Record {
    request: ServiceRequest,
    routing: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            requests: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    fn settle_claim(&self, id: RequestId, truck_id: TruckId, release: bool) -> bool {
        let Some(mut record) = self.requests.get_mut(&id) else {
            return false;
        };

        if !record.routing || record.request.truck_id != Some(truck_id) {
            return false;
        }

        record.routing = false;
        if release {
            record.request.truck_id = None;
            record.request.status = RequestStatus::Opened;
        }
        true
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, request: NewServiceRequest) -> Result<ServiceRequest, AppError> {
        let record = ServiceRequest {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            drop_off_location: request.drop_off_location,
            shipment_metadata: request.shipment_metadata,
            truck_id: None,
            status: RequestStatus::Opened,
            created_time: Utc::now(),
        };

        self.requests.insert(
            record.id,
            Record {
                request: record.clone(),
                routing: false,
            },
        );
        Ok(record)
    }

    async fn get(&self, id: RequestId) -> Result<Option<ServiceRequest>, AppError> {
        Ok(self.requests.get(&id).map(|entry| entry.request.clone()))
    }

    async fn list(&self) -> Result<Vec<ServiceRequest>, AppError> {
        let mut requests: Vec<ServiceRequest> = self
            .requests
            .iter()
            .map(|entry| entry.request.clone())
            .collect();
        requests.sort_by_key(|request| request.id);
        Ok(requests)
    }

    async fn claim_for_assignment(
        &self,
        id: RequestId,
        truck_id: TruckId,
    ) -> Result<ClaimOutcome, AppError> {
        let Some(mut record) = self.requests.get_mut(&id) else {
            return Ok(ClaimOutcome::Missing);
        };

        if let Some(owner) = record.request.truck_id {
            return Ok(ClaimOutcome::Owned(owner));
        }
        if record.request.status != RequestStatus::Opened {
            return Ok(ClaimOutcome::NotOpened(record.request.status));
        }

        record.request.truck_id = Some(truck_id);
        record.request.status = RequestStatus::Assigned;
        record.routing = true;
        Ok(ClaimOutcome::Claimed(record.request.clone()))
    }

    async fn confirm_assignment(
        &self,
        id: RequestId,
        truck_id: TruckId,
    ) -> Result<bool, AppError> {
        Ok(self.settle_claim(id, truck_id, false))
    }

    async fn release_assignment(
        &self,
        id: RequestId,
        truck_id: TruckId,
    ) -> Result<bool, AppError> {
        Ok(self.settle_claim(id, truck_id, true))
    }

    async fn update_status(
        &self,
        ids: &[RequestId],
        status: RequestStatus,
    ) -> Result<StatusUpdate, AppError> {
        let mut outcome = StatusUpdate::default();
        for id in ids {
            if let Some(mut record) = self.requests.get_mut(id) {
                if record.routing {
                    outcome.routing.push(*id);
                } else {
                    record.request.status = status;
                    outcome.updated += 1;
                }
            }
        }
        Ok(outcome)
    }

    async fn delete(&self, id: RequestId) -> Result<bool, AppError> {
        Ok(self.requests.remove(&id).is_some())
    }

    async fn status_counts(&self) -> Result<StatusCounts, AppError> {
        let mut counts = StatusCounts::default();
        for entry in self.requests.iter() {
            counts.record(entry.request.status);
        }
        Ok(counts)
    }
}
