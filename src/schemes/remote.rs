//! `http`/`https` requests, delegated to the host's networking.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;

use crate::mediator::{Handler, HandlerResult, Mediator};
use crate::message::headers::CONTENT_TYPE;
use crate::message::{HeaderMap, Request, Response};

#[derive(Debug, Clone, Default)]
pub struct RemoteResolver {
    client: reqwest::Client,
}

impl RemoteResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(&self, request: Request) -> Response {
        let Ok(method) = reqwest::Method::from_bytes(request.method.as_bytes()) else {
            return Response::new(400, "bad request");
        };

        let mut builder = self.client.request(method, request.uri());
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        builder = match &request.body {
            Value::Null => builder,
            Value::String(text) => builder.body(text.clone()),
            other => builder.json(other),
        };

        let upstream = match builder.send().await {
            Ok(upstream) => upstream,
            Err(e) => {
                tracing::warn!(uri = %request.uri(), error = %e, "Upstream request failed");
                return Response::new(502, "bad gateway");
            }
        };

        let status = upstream.status();
        let mut headers = HeaderMap::new();
        for (name, value) in upstream.headers() {
            if let Ok(value) = value.to_str() {
                headers.append(name.as_str(), value, ", ");
            }
        }
        let text = match upstream.text().await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(uri = %request.uri(), error = %e, "Failed to read upstream body");
                return Response::new(502, "bad gateway");
            }
        };

        let mut response = Response::new(
            status.as_u16(),
            status.canonical_reason().unwrap_or_default().to_lowercase(),
        );
        response.body = decode_body(headers.get(CONTENT_TYPE), text);
        response.headers = headers;
        response
    }
}

/// JSON bodies are parsed when the content type says so; anything else is text.
fn decode_body(content_type: Option<&str>, text: String) -> Value {
    let is_json = content_type.is_some_and(|ct| ct.contains("json"));
    if text.is_empty() {
        return Value::String(text);
    }
    if is_json {
        if let Ok(value) = serde_json::from_str(&text) {
            return value;
        }
    }
    Value::String(text)
}

impl Handler for RemoteResolver {
    fn receive<'a>(&'a self, request: Request, _mediator: &'a Mediator) -> BoxFuture<'a, HandlerResult> {
        async move { Ok(self.send(request).await) }.boxed()
    }
}
