//! Contracts for the external services touched by the request lifecycle.
//!
//! The lifecycle controller only sees these traits. [`http::DownstreamHttpClient`]
//! is the production implementation; tests substitute their own doubles.

pub mod http;
pub mod retry;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Schedule,
    Path,
    Alert,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Schedule => "schedule",
            Service::Path => "path",
            Service::Alert => "alert",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("{service} service request failed: {message}")]
    Transport { service: Service, message: String },

    #[error("{service} service timed out")]
    Timeout { service: Service },

    #[error("{service} service returned {status}: {message}")]
    Status {
        service: Service,
        status: u16,
        message: String,
    },

    #[error("{service} service sent an invalid response: {message}")]
    InvalidResponse { service: Service, message: String },
}

impl DownstreamError {
    pub fn service(&self) -> Service {
        match self {
            DownstreamError::Transport { service, .. }
            | DownstreamError::Timeout { service }
            | DownstreamError::Status { service, .. }
            | DownstreamError::InvalidResponse { service, .. } => *service,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DownstreamError::Timeout { .. })
    }

    /// Transport faults, timeouts and 5xx responses; a 4xx will not improve on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownstreamError::Transport { .. } | DownstreamError::Timeout { .. } => true,
            DownstreamError::Status { status, .. } => *status >= 500,
            DownstreamError::InvalidResponse { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleId(pub String);

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One route result from the path service. The path payload is passed to
/// clients untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub path: Value,
}

#[async_trait]
pub trait ScheduleClient: Send + Sync {
    async fn create_schedule(&self, stops: &[String]) -> Result<ScheduleId, DownstreamError>;
}

#[async_trait]
pub trait PathClient: Send + Sync {
    async fn routes(&self, schedule_id: &ScheduleId) -> Result<Vec<Route>, DownstreamError>;
}

#[async_trait]
pub trait AlertClient: Send + Sync {
    async fn send(&self, description: &str) -> Result<(), DownstreamError>;
}
