//! Infrastructure adapters and runtime bootstrap.

pub mod capture;
pub mod error;
pub mod http;
pub(crate) mod lock;
pub mod telemetry;
