//! `Site`: a registry of pages keyed by logical path that can be built to disk or served.

use std::{collections::BTreeMap, fmt, path::Path, sync::Arc};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderValue, Request, StatusCode, header::CONTENT_TYPE},
};
use bytes::Bytes;
use tracing::{info, warn};

use crate::{
    application::{
        build::Dispatcher,
        error::AppError,
        events::{EventSink, LogSink, TallySink},
        handler::{Handler, ResponseWriter},
    },
    config::{self, BuildOptions, Command, Settings},
    domain::{
        error::BoxError,
        output::{is_directory_path, logical_path},
    },
    infra::{http::live, telemetry},
};

const NOT_FOUND_BODY: &[u8] = b"404 page not found\n";
const TEXT_HTML: &str = "text/html; charset=utf-8";
const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

type RenderFn = dyn Fn(&str) -> Result<Bytes, BoxError> + Send + Sync;

/// Pages registered by logical path.
///
/// `Site` is itself a [`Handler`]: a request for a registered path runs that page, anything
/// else answers `404`.
#[derive(Clone, Default)]
pub struct Site {
    pages: BTreeMap<String, Arc<dyn Handler>>,
}

impl fmt::Debug for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Site")
            .field("paths", &self.pages.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Site {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a page rendered by `render`, which receives the requested path.
    ///
    /// The response carries a `Content-Type` guessed from the path; directory-style and
    /// extensionless paths are HTML. Registering a path twice replaces the first page.
    pub fn page<F, B>(mut self, path: impl Into<String>, render: F) -> Self
    where
        F: Fn(&str) -> Result<B, BoxError> + Send + Sync + 'static,
        B: Into<Bytes>,
    {
        let path = path.into();
        let page = RenderPage {
            content_type: content_type_for(&path),
            render: Arc::new(move |path: &str| -> Result<Bytes, BoxError> {
                Ok(render(path)?.into())
            }),
        };
        self.pages.insert(path, Arc::new(page));
        self
    }

    /// Register an arbitrary handler under `path`.
    pub fn route<H>(mut self, path: impl Into<String>, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        self.pages.insert(path.into(), Arc::new(handler));
        self
    }

    /// Registered paths in lexical order.
    pub fn paths(&self) -> Vec<String> {
        self.pages.keys().cloned().collect()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.pages.contains_key(path)
    }

    /// Page answering a request whose URI path is `uri_path`, matched as sent and then
    /// percent-decoded.
    pub(crate) fn find(&self, uri_path: &str) -> Option<Arc<dyn Handler>> {
        self.pages
            .get(uri_path)
            .or_else(|| self.pages.get(&*logical_path(uri_path)))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Build every registered path into `options.output_dir`.
    pub async fn build(&self, options: BuildOptions, sink: Option<Arc<dyn EventSink>>) {
        let paths = self.paths();
        Dispatcher::new(options, Arc::new(self.clone()))
            .with_sink_opt(sink)
            .run(paths)
            .await;
    }

    /// Parse the process arguments, load settings, install logging and run the command.
    pub async fn run(self) -> Result<(), AppError> {
        let (args, settings) = config::load_with_cli()?;
        telemetry::init(&settings.logging)?;
        self.run_command(args.command.unwrap_or_default(), settings)
            .await
    }

    /// Run `command` against already-loaded settings without touching global state.
    pub async fn run_command(self, command: Command, settings: Settings) -> Result<(), AppError> {
        match command {
            Command::Build(_) => {
                let total = self.len();
                let tally = Arc::new(TallySink::new(Arc::new(LogSink)));
                self.build(settings.build, Some(tally.clone())).await;

                let failed = tally.failed();
                if failed > 0 {
                    warn!(
                        target = "prerender::site",
                        failed,
                        total,
                        "build finished with failures"
                    );
                    return Err(AppError::BuildFailed { failed, total });
                }
                info!(
                    target = "prerender::site",
                    built = tally.succeeded(),
                    "build finished"
                );
                Ok(())
            }
            Command::Serve(_) => {
                live::serve(self, &settings, Some(Arc::new(LogSink))).await?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Handler for Site {
    async fn handle(
        &self,
        request: Request<Body>,
        response: &mut dyn ResponseWriter,
    ) -> Result<(), BoxError> {
        let page = self.find(request.uri().path());
        match page {
            Some(page) => page.handle(request, response).await,
            None => {
                not_found(response).await?;
                Ok(())
            }
        }
    }
}

/// Write the plain-text `404` the site answers for unregistered paths.
pub async fn not_found(response: &mut dyn ResponseWriter) -> std::io::Result<()> {
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static(TEXT_PLAIN),
    );
    response.set_status(StatusCode::NOT_FOUND);
    response.write(NOT_FOUND_BODY).await
}

struct RenderPage {
    content_type: HeaderValue,
    render: Arc<RenderFn>,
}

#[async_trait]
impl Handler for RenderPage {
    async fn handle(
        &self,
        request: Request<Body>,
        response: &mut dyn ResponseWriter,
    ) -> Result<(), BoxError> {
        let body = (self.render)(&logical_path(request.uri().path()))?;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, self.content_type.clone());
        response.write(&body).await?;
        Ok(())
    }
}

fn content_type_for(path: &str) -> HeaderValue {
    if is_directory_path(path) {
        return HeaderValue::from_static(TEXT_HTML);
    }
    let last = path.rsplit('/').next().unwrap_or_default();
    content_type_for_file(Path::new(last))
}

/// Content type of a built file: guessed from its extension, HTML when it has none.
pub(crate) fn content_type_for_file(file: &Path) -> HeaderValue {
    let Some(extension) = file.extension().and_then(|ext| ext.to_str()) else {
        return HeaderValue::from_static(TEXT_HTML);
    };
    let mime = mime_guess::from_ext(extension).first_or_octet_stream();
    HeaderValue::from_str(mime.as_ref())
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::infra::capture::ResponseCapture;

    fn request(path: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .body(Body::empty())
            .expect("request should build")
    }

    #[test]
    fn content_types_follow_the_path() {
        assert_eq!(content_type_for("/"), "text/html; charset=utf-8");
        assert_eq!(content_type_for("/docs/"), "text/html; charset=utf-8");
        assert_eq!(content_type_for("/about"), "text/html; charset=utf-8");
        assert_eq!(content_type_for("/feed.json"), "application/json");
        assert_eq!(content_type_for("/style.css"), "text/css");
        assert_eq!(
            content_type_for("/blob.unknownext"),
            "application/octet-stream"
        );
    }

    #[test]
    fn paths_are_sorted_and_replaced_on_reregistration() {
        let site = Site::new()
            .page("/b", |_: &str| Ok::<_, BoxError>("b"))
            .page("/a", |_: &str| Ok::<_, BoxError>("a"))
            .page("/b", |_: &str| Ok::<_, BoxError>("b2"));

        assert_eq!(site.paths(), ["/a", "/b"]);
        assert!(site.contains("/a"));
        assert!(!site.contains("/c"));
        assert_eq!(site.len(), 2);
    }

    #[tokio::test]
    async fn registered_page_receives_its_path() {
        let site = Site::new().page("/hello/", |path: &str| {
            Ok::<_, BoxError>(format!("<h1>{path}</h1>"))
        });
        let mut capture = ResponseCapture::buffered();

        site.handle(request("/hello/"), &mut capture)
            .await
            .expect("page renders");

        assert_eq!(capture.status_code(), 200);
        assert_eq!(capture.body(), b"<h1>/hello/</h1>");
        assert_eq!(
            capture.headers().get(CONTENT_TYPE).expect("content type"),
            "text/html; charset=utf-8"
        );
    }

    #[tokio::test]
    async fn encoded_request_reaches_the_page_registered_unencoded() {
        let site = Site::new().page("/a b/", |path: &str| Ok::<_, BoxError>(path.to_string()));
        let mut capture = ResponseCapture::buffered();

        site.handle(request("/a%20b/"), &mut capture)
            .await
            .expect("page renders");

        assert_eq!(capture.status_code(), 200);
        assert_eq!(capture.body(), b"/a b/");
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let site = Site::new();
        let mut capture = ResponseCapture::buffered();

        site.handle(request("/nope"), &mut capture)
            .await
            .expect("404 is not an error");

        assert_eq!(capture.status_code(), 404);
        assert_eq!(capture.body(), NOT_FOUND_BODY);
    }

    #[tokio::test]
    async fn render_errors_surface_before_any_write() {
        let site = Site::new().page("/broken", |_: &str| {
            Err::<Bytes, BoxError>(io::Error::other("template missing").into())
        });
        let mut capture = ResponseCapture::buffered();

        let error = site
            .handle(request("/broken"), &mut capture)
            .await
            .expect_err("render fails");

        assert_eq!(error.to_string(), "template missing");
        assert_eq!(capture.status_code(), 0);
        assert!(capture.body().is_empty());
    }
}
