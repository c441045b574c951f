//! Render request paths into static files by driving an HTTP handler in-process.
//!
//! A [`Handler`] answers synthetic `GET` requests; [`build_single`] streams one response
//! body into the file its path resolves to, and [`Dispatcher`] does so for many paths with
//! a fixed pool of workers, reporting one [`Event`] per path. [`Site`] bundles a page
//! registry with build and live-serve commands.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;

pub use application::{
    build::{Built, Dispatcher, build_single},
    events::{CollectingSink, EventSink, LogSink, NoopSink, TallySink},
    handler::{Handler, ResponseWriter},
    site::Site,
};
pub use config::BuildOptions;
pub use domain::{
    error::{BoxError, BuildError, BuildStage},
    event::{Action, Event},
};
pub use infra::{capture::ResponseCapture, http::ServiceHandler};
