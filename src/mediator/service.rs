//! Static services.
//!
//! A path table answering fixed responses, used for services declared in
//! configuration.
//!
//! # Design Decisions
//! - Exact path match; the empty path is `/`
//! - Query strings do not take part in matching
//! - Unmatched paths answer 404 "not found"

use std::collections::HashMap;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::config::schema::{ServiceConfig, ServiceRouteConfig};
use crate::mediator::handler::{Handler, HandlerResult};
use crate::mediator::Mediator;
use crate::message::headers::CONTENT_TYPE;
use crate::message::link::parse_link_header;
use crate::message::{Request, Response};

#[derive(Debug, Default)]
pub struct StaticService {
    routes: HashMap<String, Response>,
}

impl StaticService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        config
            .routes
            .iter()
            .fold(Self::new(), |service, route| {
                service.route(&route.path, Self::compile(route))
            })
    }

    fn compile(route: &ServiceRouteConfig) -> Response {
        let mut response = Response::new(route.status, route.reason.clone())
            .with_body(route.body.clone());
        if let Some(content_type) = &route.content_type {
            response.headers.set(CONTENT_TYPE, content_type.clone());
        }
        let links: Vec<_> = route
            .links
            .iter()
            .flat_map(|raw| parse_link_header(raw))
            .collect();
        response.set_links(&links);
        response
    }

    /// Answer `response` for requests to `path`.
    pub fn route(mut self, path: &str, response: Response) -> Self {
        self.routes.insert(normalize(path).to_string(), response);
        self
    }
}

fn normalize(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

impl Handler for StaticService {
    fn receive<'a>(&'a self, request: Request, _mediator: &'a Mediator) -> BoxFuture<'a, HandlerResult> {
        async move {
            let target = request.target();
            match self.routes.get(normalize(&target.path)) {
                Some(response) => Ok(response.clone()),
                None => Ok(Response::not_found()),
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn answers_configured_routes() {
        let config = ServiceConfig {
            authority: "status.local".into(),
            routes: vec![ServiceRouteConfig {
                path: "/".into(),
                status: 200,
                reason: "ok".into(),
                content_type: Some("text/plain".into()),
                body: "up".into(),
                links: vec!["</>; rel=\"self\", </health>; rel=\"item\"".into()],
            }],
        };
        let mediator = Mediator::new("test");
        mediator
            .register(&config.authority, Arc::new(StaticService::from_config(&config)))
            .unwrap();

        let response = mediator.dispatch(Request::get("status.local")).await.unwrap();
        assert_eq!(response.body_text(), "up");
        assert_eq!(response.content_type(), Some("text/plain"));
        assert_eq!(response.links().len(), 2);

        let err = mediator.dispatch(Request::get("status.local/missing")).await.unwrap_err();
        assert_eq!(err.status(), 404);
    }
}
