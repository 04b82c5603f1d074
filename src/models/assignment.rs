use serde::Serialize;
use serde_json::Value;

use crate::clients::ScheduleId;
use crate::models::service_request::ServiceRequest;

/// A committed truck assignment and the route the path service chose for it.
#[derive(Debug, Clone, Serialize)]
pub struct Assignment {
    pub request: ServiceRequest,
    pub schedule_id: ScheduleId,
    pub path: Value,
}
