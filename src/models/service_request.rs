use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

pub type RequestId = i64;
pub type TruckId = i64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    Opened,
    Assigned,
    Served,
    Complete,
    Incomplete,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 5] = [
        RequestStatus::Opened,
        RequestStatus::Assigned,
        RequestStatus::Served,
        RequestStatus::Complete,
        RequestStatus::Incomplete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Opened => "Opened",
            RequestStatus::Assigned => "Assigned",
            RequestStatus::Served => "Served",
            RequestStatus::Complete => "Complete",
            RequestStatus::Incomplete => "Incomplete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Complete | RequestStatus::Incomplete)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive, so `"opened"` and `"Opened"` name the same status.
impl FromStr for RequestStatus {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        RequestStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| AppError::Validation(format!("invalid status: {raw:?}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceRequest {
    pub id: RequestId,
    pub drop_off_location: String,
    pub shipment_metadata: Value,
    pub truck_id: Option<TruckId>,
    pub status: RequestStatus,
    pub created_time: DateTime<Utc>,
}

/// Validated input for a new request; the store assigns id, status and time.
#[derive(Debug, Clone)]
pub struct NewServiceRequest {
    pub drop_off_location: String,
    pub shipment_metadata: Value,
}

impl NewServiceRequest {
    pub fn new(
        drop_off_location: Option<String>,
        shipment_metadata: Option<Value>,
    ) -> Result<Self, AppError> {
        let drop_off_location = drop_off_location
            .filter(|location| !location.trim().is_empty())
            .ok_or_else(|| AppError::Validation("drop_off_location cannot be empty".to_string()))?;

        let shipment_metadata = shipment_metadata
            .filter(|metadata| !is_empty_metadata(metadata))
            .ok_or_else(|| AppError::Validation("shipment_metadata cannot be empty".to_string()))?;

        Ok(Self {
            drop_off_location,
            shipment_metadata,
        })
    }
}

fn is_empty_metadata(metadata: &Value) -> bool {
    match metadata {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Per-status counts; `completed` counts `Complete` only.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub open: u64,
    pub assigned: u64,
    pub completed: u64,
    pub total: u64,
}

impl StatusCounts {
    pub fn record(&mut self, status: RequestStatus) {
        match status {
            RequestStatus::Opened => self.open += 1,
            RequestStatus::Assigned => self.assigned += 1,
            RequestStatus::Complete => self.completed += 1,
            RequestStatus::Served | RequestStatus::Incomplete => {}
        }
        self.total += 1;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn status_parsing_ignores_case() {
        assert_eq!("opened".parse::<RequestStatus>().unwrap(), RequestStatus::Opened);
        assert_eq!("Served".parse::<RequestStatus>().unwrap(), RequestStatus::Served);
        assert_eq!(" INCOMPLETE ".parse::<RequestStatus>().unwrap(), RequestStatus::Incomplete);
    }

    #[test]
    fn unknown_status_is_a_validation_error() {
        let err = "Teleported".parse::<RequestStatus>().unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn status_serializes_in_canonical_form() {
        assert_eq!(serde_json::to_value(RequestStatus::Assigned).unwrap(), json!("Assigned"));
    }

    #[test]
    fn new_request_rejects_blank_location() {
        let err = NewServiceRequest::new(Some("   ".to_string()), Some(json!({"weight": "1kg"})))
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn new_request_keeps_location_as_given() {
        let request =
            NewServiceRequest::new(Some(" Dock 4 ".to_string()), Some(json!({"weight": "1kg"})))
                .unwrap();
        assert_eq!(request.drop_off_location, " Dock 4 ");
    }

    #[test]
    fn new_request_rejects_missing_or_empty_metadata() {
        for metadata in [None, Some(Value::Null), Some(json!({})), Some(json!(""))] {
            let err = NewServiceRequest::new(Some("Warehouse A".to_string()), metadata).unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
    }

    #[test]
    fn counts_only_track_named_buckets_besides_total() {
        let mut counts = StatusCounts::default();
        for status in RequestStatus::ALL {
            counts.record(status);
        }

        assert_eq!(
            counts,
            StatusCounts {
                open: 1,
                assigned: 1,
                completed: 1,
                total: 5,
            }
        );
    }
}
