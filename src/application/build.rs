//! The build pipeline: one path at a time ([`build_single`]) and a fixed-size worker
//! pool over many paths ([`Dispatcher`]).

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    path::PathBuf,
    sync::Arc,
    time::Instant,
};

use axum::{
    body::Body,
    http::{Method, Request},
};
use futures::FutureExt;
use metrics::{counter, histogram};
use tokio::{
    fs,
    io::AsyncWriteExt,
    sync::{Mutex, mpsc},
    task::JoinSet,
};
use tracing::{debug, error, info, instrument};

use crate::{
    application::{
        events::{EventSink, NoopSink},
        handler::{Handler, ResponseWriter},
    },
    config::BuildOptions,
    domain::{
        error::{BoxError, BuildError},
        event::Event,
        output::{request_target, resolve},
    },
    infra::capture::ResponseCapture,
};

/// Outcome of a path whose handler ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Built {
    /// Status the handler produced; `0` if it neither set one nor wrote a byte.
    pub status_code: u16,
    pub output_path: PathBuf,
}

/// Build one path: resolve its file, create the parent directory and the file, then drive
/// `handler` with a synthetic `GET` whose body output streams into the file.
///
/// A path that is not a valid request target (spaces, non-ASCII) is percent-encoded per
/// segment before the request is built; the file keeps the unencoded name.
/// The file is flushed and closed whether or not the handler succeeds.
#[instrument(skip_all, fields(path = %path))]
pub async fn build_single<H>(
    options: &BuildOptions,
    handler: &H,
    path: &str,
) -> Result<Built, BuildError>
where
    H: Handler + ?Sized,
{
    let resolved = resolve(&options.output_dir, &options.index_filename, path);

    fs::create_dir_all(&resolved.dir)
        .await
        .map_err(|source| BuildError::CreateDir {
            path: path.to_string(),
            dir: resolved.dir.clone(),
            source,
        })?;

    let file = fs::File::create(&resolved.file)
        .await
        .map_err(|source| BuildError::CreateFile {
            path: path.to_string(),
            file: resolved.file.clone(),
            source,
        })?;

    let request = Request::builder()
        .method(Method::GET)
        .uri(&*request_target(path))
        .body(Body::empty())
        .map_err(|source| BuildError::Request {
            path: path.to_string(),
            source,
        })?;

    let mut capture = ResponseCapture::new(file);
    let outcome = AssertUnwindSafe(handler.handle(request, &mut capture))
        .catch_unwind()
        .await;
    let status_code = capture.status_code();

    let mut file = capture.into_inner();
    let flushed = file.flush().await;
    drop(file);

    let handled = match outcome {
        Ok(result) => result,
        Err(payload) => Err(panic_error(payload)),
    };
    handled
        .and_then(|()| flushed.map_err(BoxError::from))
        .map_err(|source| BuildError::Handler {
            path: path.to_string(),
            source,
        })?;

    debug!(
        target = "prerender::build",
        status = status_code,
        output = %resolved.file.display(),
        "path built"
    );

    Ok(Built {
        status_code,
        output_path: resolved.file,
    })
}

fn panic_error(payload: Box<dyn Any + Send>) -> BoxError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("handler panicked: {message}").into()
}

/// Builds many paths with a fixed number of workers sharing one queue.
///
/// Every path yields exactly one event, success or failure, and [`Dispatcher::run`]
/// returns only once all workers have finished. Events arrive in completion order.
pub struct Dispatcher {
    options: Arc<BuildOptions>,
    handler: Arc<dyn Handler>,
    sink: Arc<dyn EventSink>,
}

impl Dispatcher {
    pub fn new(options: BuildOptions, handler: Arc<dyn Handler>) -> Self {
        Self {
            options: Arc::new(options),
            handler,
            sink: Arc::new(NoopSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Attach `sink` if present; otherwise events are discarded.
    pub fn with_sink_opt(self, sink: Option<Arc<dyn EventSink>>) -> Self {
        match sink {
            Some(sink) => self.with_sink(sink),
            None => self,
        }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    pub async fn run<I, P>(&self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let paths: Vec<String> = paths.into_iter().map(Into::into).collect();
        let workers = self.options.concurrency.get();
        let total = paths.len();
        let started = Instant::now();

        info!(
            target = "prerender::build",
            workers,
            paths = total,
            output_dir = %self.options.output_dir.display(),
            "starting build"
        );

        let (sender, receiver) = mpsc::channel::<String>(workers);
        let queue = Arc::new(Mutex::new(receiver));

        let mut pool = JoinSet::new();
        for worker in 0..workers {
            pool.spawn(work(
                worker,
                self.options.clone(),
                self.handler.clone(),
                self.sink.clone(),
                queue.clone(),
            ));
        }

        for (index, path) in paths.into_iter().enumerate() {
            if sender.send(path).await.is_err() {
                error!(
                    target = "prerender::build",
                    undispatched = total - index,
                    "every worker exited before the queue drained"
                );
                break;
            }
        }
        drop(sender);

        while let Some(joined) = pool.join_next().await {
            if let Err(err) = joined {
                error!(target = "prerender::build", error = %err, "build worker failed");
            }
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!("prerender_run_ms").record(elapsed_ms);
        info!(
            target = "prerender::build",
            paths = total,
            elapsed_ms,
            "build finished"
        );
    }
}

async fn work(
    worker: usize,
    options: Arc<BuildOptions>,
    handler: Arc<dyn Handler>,
    sink: Arc<dyn EventSink>,
    queue: Arc<Mutex<mpsc::Receiver<String>>>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(path) = next else {
            break;
        };

        let started = Instant::now();
        let event = match build_single(&options, &*handler, &path).await {
            Ok(built) => {
                counter!("prerender_paths_built_total").increment(1);
                Event::build(path, built.output_path, built.status_code, None)
            }
            Err(error) => {
                counter!("prerender_paths_failed_total").increment(1);
                let output = resolve(&options.output_dir, &options.index_filename, &path).file;
                Event::build(path, output, 0, Some(error))
            }
        };
        histogram!("prerender_build_ms").record(started.elapsed().as_secs_f64() * 1000.0);

        let emitted = panic::catch_unwind(AssertUnwindSafe(|| sink.emit(event)));
        if emitted.is_err() {
            error!(
                target = "prerender::build",
                worker,
                "event sink panicked; event dropped"
            );
        }
    }

    debug!(target = "prerender::build", worker, "worker drained");
}

#[cfg(test)]
mod tests {
    use std::io;

    use async_trait::async_trait;
    use axum::http::StatusCode;

    use super::*;
    use crate::domain::error::BuildStage;

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn handle(
            &self,
            request: Request<Body>,
            response: &mut dyn ResponseWriter,
        ) -> Result<(), BoxError> {
            response.write(request.uri().path().as_bytes()).await?;
            Ok(())
        }
    }

    struct Silent;

    #[async_trait]
    impl Handler for Silent {
        async fn handle(
            &self,
            _request: Request<Body>,
            _response: &mut dyn ResponseWriter,
        ) -> Result<(), BoxError> {
            Ok(())
        }
    }

    struct StatusOnly;

    #[async_trait]
    impl Handler for StatusOnly {
        async fn handle(
            &self,
            _request: Request<Body>,
            response: &mut dyn ResponseWriter,
        ) -> Result<(), BoxError> {
            response.set_status(StatusCode::NO_CONTENT);
            Ok(())
        }
    }

    struct Panics;

    #[async_trait]
    impl Handler for Panics {
        async fn handle(
            &self,
            _request: Request<Body>,
            response: &mut dyn ResponseWriter,
        ) -> Result<(), BoxError> {
            response.write(b"partial").await?;
            panic!("template exploded");
        }
    }

    struct Fails;

    #[async_trait]
    impl Handler for Fails {
        async fn handle(
            &self,
            _request: Request<Body>,
            _response: &mut dyn ResponseWriter,
        ) -> Result<(), BoxError> {
            Err(io::Error::other("render failed").into())
        }
    }

    fn options(root: &std::path::Path) -> BuildOptions {
        BuildOptions {
            output_dir: root.join("build"),
            ..BuildOptions::default()
        }
    }

    #[tokio::test]
    async fn builds_into_nested_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = options(dir.path());

        let built = build_single(&options, &Echo, "/hello/world")
            .await
            .expect("build should succeed");

        assert_eq!(built.status_code, 200);
        assert_eq!(
            built.output_path,
            options.output_dir.join("hello").join("world")
        );
        let contents = std::fs::read(&built.output_path).expect("output file");
        assert_eq!(contents, b"/hello/world");
    }

    #[tokio::test]
    async fn silent_handler_reports_zero_and_leaves_empty_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = options(dir.path());

        let built = build_single(&options, &Silent, "/quiet/")
            .await
            .expect("build should succeed");

        assert_eq!(built.status_code, 0);
        assert_eq!(
            std::fs::read(options.output_dir.join("quiet").join("index.html"))
                .expect("output file"),
            b""
        );
    }

    #[tokio::test]
    async fn explicit_status_without_body_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let built = build_single(&options(dir.path()), &StatusOnly, "/empty")
            .await
            .expect("build should succeed");
        assert_eq!(built.status_code, 204);
    }

    #[tokio::test]
    async fn existing_directory_is_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = options(dir.path());
        std::fs::create_dir_all(options.output_dir.join("a")).expect("pre-create dir");

        build_single(&options, &Echo, "/a/b")
            .await
            .expect("build should succeed");
    }

    #[tokio::test]
    async fn directory_in_place_of_file_fails_file_creation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = options(dir.path());
        std::fs::create_dir_all(options.output_dir.join("taken")).expect("pre-create dir");

        let error = build_single(&options, &Echo, "/taken")
            .await
            .expect_err("a directory occupies the output file");

        assert_eq!(error.stage(), BuildStage::CreateFile);
        assert_eq!(error.path(), "/taken");
    }

    #[tokio::test]
    async fn invalid_request_path_fails_request_construction() {
        let dir = tempfile::tempdir().expect("tempdir");

        let error = build_single(&options(dir.path()), &Echo, "")
            .await
            .expect_err("an empty request target is rejected");

        assert_eq!(error.stage(), BuildStage::Request);
    }

    #[tokio::test]
    async fn paths_outside_uri_syntax_are_encoded_for_the_handler() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = options(dir.path());

        let built = build_single(&options, &Echo, "/with space")
            .await
            .expect("build should succeed");

        assert_eq!(built.output_path, options.output_dir.join("with space"));
        assert_eq!(
            std::fs::read(&built.output_path).expect("output file"),
            b"/with%20space"
        );
    }

    #[tokio::test]
    async fn handler_errors_are_handler_stage() {
        let dir = tempfile::tempdir().expect("tempdir");

        let error = build_single(&options(dir.path()), &Fails, "/broken")
            .await
            .expect_err("handler fails");

        assert_eq!(error.stage(), BuildStage::Handler);
        assert!(error.to_string().contains("render failed"));
    }

    #[tokio::test]
    async fn handler_panics_are_contained() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = options(dir.path());

        let error = build_single(&options, &Panics, "/boom")
            .await
            .expect_err("handler panics");

        assert_eq!(error.stage(), BuildStage::Handler);
        assert!(error.to_string().contains("template exploded"));
        assert_eq!(
            std::fs::read(options.output_dir.join("boom")).expect("file was closed"),
            b"partial"
        );
    }

    #[tokio::test]
    async fn dispatcher_without_sink_still_builds_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = options(dir.path());
        let dispatcher = Dispatcher::new(options.clone(), Arc::new(Echo)).with_sink_opt(None);

        dispatcher.run(["/hello/go", "/hello/world", "/bye/"]).await;

        for (file, body) in [
            (options.output_dir.join("hello").join("go"), "/hello/go"),
            (options.output_dir.join("hello").join("world"), "/hello/world"),
            (options.output_dir.join("bye").join("index.html"), "/bye/"),
        ] {
            let contents = std::fs::read_to_string(&file).expect("output file");
            assert_eq!(contents, body);
        }
    }

    #[test]
    fn panic_payloads_become_messages() {
        let error = panic_error(Box::new("static message"));
        assert_eq!(error.to_string(), "handler panicked: static message");

        let error = panic_error(Box::new(String::from("owned message")));
        assert_eq!(error.to_string(), "handler panicked: owned message");

        let error = panic_error(Box::new(42_u8));
        assert_eq!(error.to_string(), "handler panicked: unknown panic payload");
    }
}
