//! Response capture: a [`ResponseWriter`] that records status and headers and forwards
//! body bytes to any async sink (an open output file, or memory).

use std::io;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, StatusCode},
    response::Response,
};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::application::handler::ResponseWriter;

/// Drives a handler without a socket. Only the body reaches `sink`.
pub struct ResponseCapture<W> {
    sink: W,
    headers: HeaderMap,
    status: Option<StatusCode>,
    committed: bool,
}

impl<W> ResponseCapture<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            headers: HeaderMap::new(),
            status: None,
            committed: false,
        }
    }

    /// Status recorded so far.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Whether body bytes have been written, which freezes the status.
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl ResponseCapture<Vec<u8>> {
    /// A capture that keeps the body in memory.
    pub fn buffered() -> Self {
        Self::new(Vec::new())
    }

    pub fn body(&self) -> &[u8] {
        &self.sink
    }

    /// Turn the buffered exchange into a response. A handler that wrote nothing at all
    /// answers `200 OK` with an empty body, as an HTTP server would.
    pub fn into_response(self) -> Response {
        let status = self.status.unwrap_or(StatusCode::OK);
        let mut response = Response::new(Body::from(self.sink));
        *response.status_mut() = status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[async_trait]
impl<W> ResponseWriter for ResponseCapture<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn set_status(&mut self, status: StatusCode) {
        if self.committed {
            debug!(
                target = "prerender::capture",
                status = status.as_u16(),
                "status ignored after body write"
            );
            return;
        }
        self.status = Some(status);
    }

    fn status_code(&self) -> u16 {
        self.status.map_or(0, |status| status.as_u16())
    }

    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if !self.committed {
            self.committed = true;
            self.status.get_or_insert(StatusCode::OK);
        }
        self.sink.write_all(bytes).await
    }
}

#[cfg(test)]
mod tests {
    use std::{
        pin::Pin,
        task::{Context, Poll},
    };

    use axum::http::{HeaderValue, header::CONTENT_TYPE};
    use http_body_util::BodyExt;

    use super::*;

    struct BrokenSink;

    impl AsyncWrite for BrokenSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "sink closed",
            )))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn headers_persist_within_capture() {
        let mut capture = ResponseCapture::buffered();
        capture
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));

        assert_eq!(
            capture.headers().get(CONTENT_TYPE),
            Some(&HeaderValue::from_static("text/html"))
        );
    }

    #[test]
    fn status_defaults_to_zero() {
        let capture = ResponseCapture::buffered();
        assert_eq!(capture.status_code(), 0);
        assert!(capture.status().is_none());
    }

    #[test]
    fn last_status_before_write_wins() {
        let mut capture = ResponseCapture::buffered();
        capture.set_status(StatusCode::NOT_FOUND);
        assert_eq!(capture.status_code(), 404);

        capture.set_status(StatusCode::FORBIDDEN);
        assert_eq!(capture.status_code(), 403);
    }

    #[tokio::test]
    async fn first_write_implies_ok() {
        let mut capture = ResponseCapture::buffered();
        capture.write(&[]).await.expect("write to memory");
        assert_eq!(capture.status_code(), 200);
        assert!(capture.is_committed());
    }

    #[tokio::test]
    async fn explicit_status_survives_writes() {
        let mut capture = ResponseCapture::buffered();
        capture.set_status(StatusCode::NOT_FOUND);
        capture.write(b"missing").await.expect("write to memory");
        capture.write(b" page").await.expect("write to memory");
        assert_eq!(capture.status_code(), 404);
    }

    #[tokio::test]
    async fn status_after_write_has_no_effect() {
        let mut capture = ResponseCapture::buffered();
        capture.write(b"body").await.expect("write to memory");
        capture.set_status(StatusCode::NOT_FOUND);
        assert_eq!(capture.status_code(), 200);
    }

    #[tokio::test]
    async fn writes_are_forwarded_in_order() {
        let mut capture = ResponseCapture::buffered();
        assert!(capture.body().is_empty());

        capture.write(&[0x01, 0x02, 0x03, 0x04]).await.expect("write");
        capture.write(&[0x05, 0x06]).await.expect("write");
        capture.write(&[0x07, 0x08]).await.expect("write");

        assert_eq!(
            capture.into_inner(),
            vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]
        );
    }

    #[tokio::test]
    async fn sink_errors_propagate_to_writer() {
        let mut capture = ResponseCapture::new(BrokenSink);
        let error = capture.write(b"lost").await.expect_err("sink rejects writes");
        assert_eq!(error.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(capture.status_code(), 200);
    }

    #[tokio::test]
    async fn buffered_capture_converts_to_response() {
        let mut capture = ResponseCapture::buffered();
        capture.set_status(StatusCode::CREATED);
        capture
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        capture.write(b"made").await.expect("write");

        let response = capture.into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers().get(CONTENT_TYPE),
            Some(&HeaderValue::from_static("text/plain"))
        );
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        assert_eq!(&body[..], b"made");
    }

    #[test]
    fn untouched_buffer_answers_ok() {
        let response = ResponseCapture::buffered().into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
