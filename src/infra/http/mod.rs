//! HTTP adapters: tower services as handlers, and the live preview server.

pub mod live;
pub mod service;

pub use live::{router, serve};
pub use service::{ServiceHandler, relay};
