pub mod assignment;
pub mod service_request;
