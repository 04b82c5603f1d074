//! Persistence for service requests.
//!
//! Absence is reported through return values (`None`, [`ClaimOutcome::Missing`],
//! `false`, a zero count); the lifecycle controller decides how to surface it.
//! Every `Err` is a storage fault.

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryStore;
pub use self::postgres::PostgresStore;

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::service_request::{
    NewServiceRequest, RequestId, RequestStatus, ServiceRequest, StatusCounts, TruckId,
};

/// Result of the atomic `Opened -> Assigned` transition.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(ServiceRequest),
    Missing,
    NotOpened(RequestStatus),
    /// A truck was bound earlier; the binding outlives later status changes.
    Owned(TruckId),
}

/// Result of a status write over a set of ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    pub updated: u64,
    /// Ids left untouched because their assignment is still being routed.
    pub routing: Vec<RequestId>,
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Short backend name for health output.
    fn backend(&self) -> &'static str;

    async fn insert(&self, request: NewServiceRequest) -> Result<ServiceRequest, AppError>;

    async fn get(&self, id: RequestId) -> Result<Option<ServiceRequest>, AppError>;

    /// All requests, ascending by id.
    async fn list(&self) -> Result<Vec<ServiceRequest>, AppError>;

    /// Sets `truck_id` and `Assigned` only while the request is `Opened` with
    /// no truck. The claim stays pending until confirmed or released.
    async fn claim_for_assignment(
        &self,
        id: RequestId,
        truck_id: TruckId,
    ) -> Result<ClaimOutcome, AppError>;

    /// Marks a pending claim by `truck_id` as routed.
    async fn confirm_assignment(&self, id: RequestId, truck_id: TruckId)
    -> Result<bool, AppError>;

    /// Undoes a pending claim by `truck_id`, back to `Opened` with no truck.
    async fn release_assignment(&self, id: RequestId, truck_id: TruckId)
    -> Result<bool, AppError>;

    /// Writes `status` to every matching id whose claim is not pending.
    async fn update_status(
        &self,
        ids: &[RequestId],
        status: RequestStatus,
    ) -> Result<StatusUpdate, AppError>;

    async fn delete(&self, id: RequestId) -> Result<bool, AppError>;

    async fn status_counts(&self) -> Result<StatusCounts, AppError>;
}
