//! The service-request lifecycle: `Opened -> Assigned -> Served -> Complete | Incomplete`.

pub mod assignment;
pub mod lifecycle;

pub use self::lifecycle::{ExternalServices, LifecycleController};
