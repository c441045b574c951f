//! `cargo run --example hello -- build` writes `build/`; `cargo run --example hello` serves it.

use std::process;

use axum::{Router, extract::Path, routing::get};
use prerender::{BoxError, ServiceHandler, Site};

#[tokio::main]
async fn main() {
    let greetings = Router::new().route(
        "/hello/{name}",
        get(|Path(name): Path<String>| async move { format!("Hello {name}!") }),
    );

    let site = Site::new()
        .page("/", |_: &str| {
            Ok::<_, BoxError>("<h1>prerender</h1><a href=\"/hello/world\">hello</a>")
        })
        .page("/robots.txt", |_: &str| Ok::<_, BoxError>("User-agent: *\n"))
        .route("/hello/world", ServiceHandler::new(greetings.clone()))
        .route("/hello/rust", ServiceHandler::new(greetings));

    if let Err(err) = site.run().await {
        eprintln!("{err}");
        process::exit(1);
    }
}
