//! Application services: handler contract, the build pipeline, and the page registry.

pub mod build;
pub mod error;
pub mod events;
pub mod handler;
pub mod site;
