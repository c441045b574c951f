//! Live preview server: registered pages are rendered per request, everything else is
//! looked up among previously built files.

use std::{path::PathBuf, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Request, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use metrics::counter;
use tokio::{fs, net::TcpListener, sync::oneshot};
use tracing::{debug, error, info, warn};

use crate::{
    application::{
        error::AppError,
        events::{EventSink, NoopSink},
        handler::{Handler, ResponseWriter},
        site::{Site, content_type_for_file, not_found},
    },
    config::{BuildOptions, Settings},
    domain::{
        error::BuildError,
        event::Event,
        output::{is_directory_path, logical_path, resolve},
    },
    infra::{capture::ResponseCapture, error::InfraError},
};

#[derive(Clone)]
struct LiveState {
    site: Arc<Site>,
    options: Arc<BuildOptions>,
    sink: Arc<dyn EventSink>,
}

/// Router answering every path: registered pages first, then files under
/// `options.output_dir`, then the site's `404`. Each answered request emits a serve event.
pub fn router(site: Site, options: BuildOptions, sink: Option<Arc<dyn EventSink>>) -> Router {
    let state = LiveState {
        site: Arc::new(site),
        options: Arc::new(options),
        sink: sink.unwrap_or_else(|| Arc::new(NoopSink)),
    };
    Router::new().fallback(answer).with_state(state)
}

/// Bind the configured address and serve until Ctrl-C, then drain in-flight requests for
/// at most the configured grace period.
pub async fn serve(
    site: Site,
    settings: &Settings,
    sink: Option<Arc<dyn EventSink>>,
) -> Result<(), InfraError> {
    let app = router(site, settings.build.clone(), sink);
    let listener = TcpListener::bind(settings.server.addr).await?;
    info!(
        target = "prerender::live",
        addr = %settings.server.addr,
        output_dir = %settings.build.output_dir.display(),
        "live server listening"
    );

    let grace = settings.server.graceful_shutdown;
    let (signalled, on_signal) = oneshot::channel::<()>();
    let server = axum::serve(listener, app.into_make_service()).with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = signalled.send(());
    });

    tokio::select! {
        result = async { server.await } => result?,
        _ = async {
            if on_signal.await.is_ok() {
                tokio::time::sleep(grace).await;
            } else {
                std::future::pending::<()>().await;
            }
        } => {
            warn!(
                target = "prerender::live",
                grace_seconds = grace.as_secs(),
                "in-flight requests abandoned after grace period"
            );
        }
    }

    info!(target = "prerender::live", "live server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(
            target = "prerender::live",
            error = %err,
            "unable to listen for Ctrl-C; shutdown signal disabled"
        );
        std::future::pending::<()>().await;
    }
    info!(target = "prerender::live", "shutdown signal received");
}

async fn answer(State(state): State<LiveState>, request: Request<Body>) -> Response {
    counter!("prerender_serve_requests_total").increment(1);
    let uri_path = request.uri().path();
    let registered = state.site.find(uri_path).is_some();
    let path = logical_path(uri_path).into_owned();

    if registered {
        return render_page(&state, path, request).await;
    }

    let (response, output) = match read_built(&state.options, &path).await {
        Some((file, contents)) => {
            let content_type = content_type_for_file(&file);
            let response = ([(CONTENT_TYPE, content_type)], contents).into_response();
            (response, Some(file))
        }
        None => {
            let mut capture = ResponseCapture::buffered();
            if let Err(err) = not_found(&mut capture).await {
                error!(target = "prerender::live", error = %err, "failed to buffer 404 body");
            }
            (capture.into_response(), None)
        }
    };

    state.sink.emit(Event::serve(
        path,
        output,
        response.status().as_u16(),
        None,
    ));
    response
}

async fn render_page(state: &LiveState, path: String, request: Request<Body>) -> Response {
    let mut capture = ResponseCapture::buffered();
    match state.site.handle(request, &mut capture).await {
        Ok(()) => {
            state
                .sink
                .emit(Event::serve(path, None, capture.status_code(), None));
            capture.into_response()
        }
        Err(source) => {
            error!(
                target = "prerender::live",
                path = %path,
                error = %source,
                "page handler failed"
            );
            let response = AppError::unexpected(source.to_string()).into_response();
            let status = response.status().as_u16();
            let error = BuildError::Handler {
                path: path.clone(),
                source,
            };
            state
                .sink
                .emit(Event::serve(path, None, status, Some(error)));
            response
        }
    }
}

/// Find the built file for `path`. A file path that turns out to be a built directory is
/// answered with that directory's index file.
async fn read_built(options: &BuildOptions, path: &str) -> Option<(PathBuf, Vec<u8>)> {
    let resolved = resolve(&options.output_dir, &options.index_filename, path);

    let mut candidates = vec![resolved.file.clone()];
    if !is_directory_path(path) {
        candidates.push(resolved.file.join(&options.index_filename));
    }

    for file in candidates {
        match fs::read(&file).await {
            Ok(contents) => return Some((file, contents)),
            Err(err) => debug!(
                target = "prerender::live",
                file = %file.display(),
                error = %err,
                "built file unavailable"
            ),
        }
    }
    None
}
