//! [`Handler`] implementations for tower services, so an axum application can be
//! prerendered without binding a listener.

use std::pin::pin;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, Bytes, HttpBody},
    http::{Request, Response},
};
use http_body_util::BodyExt;
use tower::{Service, ServiceExt};

use crate::{
    application::handler::{Handler, ResponseWriter},
    domain::error::BoxError,
};

#[async_trait]
impl Handler for Router {
    async fn handle(
        &self,
        request: Request<Body>,
        response: &mut dyn ResponseWriter,
    ) -> Result<(), BoxError> {
        let reply = self.clone().oneshot(request).await?;
        relay(reply, response).await
    }
}

/// Adapts any cloneable tower service answering `Request<Body>`.
#[derive(Clone)]
pub struct ServiceHandler<S> {
    service: S,
}

impl<S> ServiceHandler<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S, B> Handler for ServiceHandler<S>
where
    S: Service<Request<Body>, Response = Response<B>> + Clone + Send + Sync + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError> + Send,
{
    async fn handle(
        &self,
        request: Request<Body>,
        response: &mut dyn ResponseWriter,
    ) -> Result<(), BoxError> {
        let reply = self
            .service
            .clone()
            .oneshot(request)
            .await
            .map_err(Into::into)?;
        relay(reply, response).await
    }
}

/// Copy a finished response into `writer`: headers, then status, then body frames as
/// they arrive. Trailers are dropped.
pub async fn relay<B>(reply: Response<B>, writer: &mut dyn ResponseWriter) -> Result<(), BoxError>
where
    B: HttpBody<Data = Bytes> + Send,
    B::Error: Into<BoxError> + Send,
{
    let (parts, body) = reply.into_parts();
    writer.headers_mut().extend(parts.headers);
    writer.set_status(parts.status);

    let mut body = pin!(body);
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(Into::into)?;
        if let Ok(data) = frame.into_data() {
            writer.write(&data).await?;
        }
    }
    Ok(())
}
