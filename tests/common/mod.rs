//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use httpl_mesh::lifecycle::startup::register_builtins;
use httpl_mesh::mediator::{Handler, HandlerResult, Mediator};
use httpl_mesh::message::{Link, Request, Response};

pub const ITEMS: [&str; 3] = ["bar", "baz", "blah"];

/// The `test.com` hypermedia service.
///
/// ```text
/// GET  /          "service resource", links to the collections
/// GET  /foo       ["bar", "baz", "blah"], item template /foo/{id}
/// POST /foo       echoes the body and content type
/// GET  /foo/<id>  the item name
/// GET  /timeout   never answers
/// ```
pub struct TestService;

impl TestService {
    fn root() -> Response {
        Response::ok()
            .header("content-type", "text/plain")
            .with_body("service resource")
            .with_links(&[
                Link::new("/", "self current"),
                Link::new("/events", "collection").with_id("events"),
                Link::new("/foo", "collection").with_id("foo"),
                Link::new("/{id}", "collection"),
            ])
    }

    fn collection() -> Response {
        Response::ok()
            .header("content-type", "application/json")
            .with_body(json!(ITEMS))
            .with_links(&[
                Link::new("/", "up via service"),
                Link::new("/foo", "self current"),
                Link::new("/foo/{id}", "item"),
            ])
    }

    fn item(name: &str) -> Response {
        Response::ok()
            .header("content-type", "application/json")
            .with_body(name)
            .with_links(&[
                Link::new("/", "via service"),
                Link::new("/foo", "up collection index"),
                Link::new(format!("/foo/{}", name), "self current"),
            ])
    }
}

impl Handler for TestService {
    fn receive<'a>(&'a self, request: Request, _mediator: &'a Mediator) -> BoxFuture<'a, HandlerResult> {
        async move {
            let target = request.target();
            let path = if target.path.is_empty() { "/" } else { target.path.as_str() };
            match (request.method.as_str(), path) {
                ("GET", "/") => Ok(Self::root()),
                ("GET", "/foo") => Ok(Self::collection()),
                ("POST", "/foo") => Ok(Response::ok()
                    .header(
                        "content-type",
                        request.header_value("content-type").unwrap_or("text/plain"),
                    )
                    .with_body(request.body.clone())),
                ("GET", "/timeout") => std::future::pending::<HandlerResult>().await,
                ("GET", other) => match other.strip_prefix("/foo/") {
                    Some(name) if ITEMS.contains(&name) => Ok(Self::item(name)),
                    _ => Ok(Response::not_found()),
                },
                _ => Ok(Response::new(405, "bad method")),
            }
        }
        .boxed()
    }
}

/// A mediator with the builtin resolvers and `test.com`.
pub fn mediator() -> Mediator {
    let mediator = Mediator::new("test");
    register_builtins(&mediator).unwrap();
    mediator.register("test.com", Arc::new(TestService)).unwrap();
    mediator
}

/// Start an HTTP/1.1 backend answering every request with `body`.
pub async fn start_mock_backend(content_type: &'static str, body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 4096];
                        let _ = socket.read(&mut buf).await;
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            content_type,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}
