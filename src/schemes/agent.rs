//! Hypermedia agent: follow links from a start URI, then send one request
//! to wherever they lead.
//!
//! Steps are resolved lazily on each send. A response carrying `proxy-tmpl`
//! means it came through one or more proxies; hrefs followed from it are
//! wrapped in each template, innermost hop first, unless marked `noproxy`.

use crate::mediator::uri;
use crate::mediator::{DispatchError, DispatchResult, Mediator};
use crate::message::headers::PROXY_TMPL;
use crate::message::{Link, Request, Response};
use crate::schemes::nav::{self, NavStep};

#[derive(Debug, Clone)]
pub struct Agent {
    mediator: Mediator,
    start: String,
    steps: Vec<NavStep>,
}

impl Agent {
    pub fn new(mediator: &Mediator, uri: &str) -> Self {
        Self {
            mediator: mediator.clone(),
            start: uri::with_default_scheme(uri),
            steps: Vec::new(),
        }
    }

    /// Add a step following the link with relation `rel`. With an `id`, a
    /// link of that id is preferred and a template falls back to it.
    pub fn follow(mut self, rel: &str, id: Option<&str>) -> Self {
        self.steps.push(NavStep {
            rel: rel.to_string(),
            value: id.map(str::to_string),
        });
        self
    }

    /// Walk every step and return the URI the agent points at.
    pub async fn resolve(&self) -> Result<String, DispatchError> {
        let mut current = self.start.clone();
        for step in &self.steps {
            let response = self.mediator.dispatch(Request::get(&current)).await?;
            let links = response.links();
            let Some((link, href)) = select(&links, step) else {
                tracing::debug!(uri = %current, rel = %step.rel, value = ?step.value, "No link matches agent step");
                return Err(DispatchError::not_found());
            };
            let next = uri::join(&current, &href);
            current = if link.is_noproxy() { next } else { through_proxies(&response, next) };
        }
        Ok(current)
    }

    /// Send `request` to the resolved URI; its own url is replaced.
    pub async fn send(&self, mut request: Request) -> DispatchResult {
        request.url = self.resolve().await?;
        self.mediator.dispatch(request).await
    }

    pub async fn get(&self) -> DispatchResult {
        self.send(Request::get(&self.start)).await
    }
}

// Without an id the first plain link of the relation is taken.
fn select<'a>(links: &'a [Link], step: &NavStep) -> Option<(&'a Link, String)> {
    match step.value {
        Some(_) => nav::select(links, step),
        None => links
            .iter()
            .find(|link| link.has_rel(&step.rel) && !link.is_template())
            .map(|link| (link, link.href.clone())),
    }
}

fn through_proxies(response: &Response, uri: String) -> String {
    let Some(templates) = response.header_value(PROXY_TMPL) else {
        return uri;
    };
    templates
        .split_whitespace()
        .fold(uri, |inner, template| template.replace("{uri}", &inner))
}
