//! Capabilities the build pipeline drives: a request handler and the response writer it
//! writes through.

use std::{io, sync::Arc};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
};

use crate::domain::error::BoxError;

/// The response half of a request/response exchange.
///
/// The status can be changed until the first body write; the first write fixes it to
/// `200 OK` when it was never set. Headers stay readable and writable for the lifetime
/// of the writer.
#[async_trait]
pub trait ResponseWriter: Send {
    fn headers(&self) -> &HeaderMap;

    fn headers_mut(&mut self) -> &mut HeaderMap;

    fn set_status(&mut self, status: StatusCode);

    /// Status recorded so far, `0` if neither a status nor a body byte was written.
    fn status_code(&self) -> u16;

    async fn write(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// Produces a response for a request.
///
/// Returning `Ok` means the handler finished; the status it wrote, including error
/// statuses, is data rather than a failure.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        request: Request<Body>,
        response: &mut dyn ResponseWriter,
    ) -> Result<(), BoxError>;
}

#[async_trait]
impl<H> Handler for Arc<H>
where
    H: Handler + ?Sized,
{
    async fn handle(
        &self,
        request: Request<Body>,
        response: &mut dyn ResponseWriter,
    ) -> Result<(), BoxError> {
        (**self).handle(request, response).await
    }
}
