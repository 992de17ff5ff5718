//! `nav:` hypermedia navigation resolver.
//!
//! ```text
//! nav:||<start>|<rel>=<value>|<rel>=<value>...
//! ```
//!
//! Each step GETs the current URI and follows the first link carrying the
//! step's relation: an exact `id` match is adopted as-is, otherwise a
//! templated href has the value substituted into it. The resolved URI is
//! fetched with the original request's headers.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::mediator::uri;
use crate::mediator::{DispatchError, Handler, HandlerResult, Mediator};
use crate::message::{Link, Request};

const NAV_PREFIX: &str = "nav:||";

/// One `rel=value` navigation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavStep {
    pub rel: String,
    pub value: Option<String>,
}

/// Split a `nav:` URI into its start URI and steps.
pub fn parse_nav_uri(uri: &str) -> Option<(String, Vec<NavStep>)> {
    let rest = uri.strip_prefix(NAV_PREFIX)?;
    let mut parts = rest.split('|');
    let start = parts.next().filter(|s| !s.is_empty())?.to_string();
    let steps = parts
        .filter(|p| !p.is_empty())
        .map(|part| match part.split_once('=') {
            Some((rel, value)) => NavStep {
                rel: rel.to_string(),
                value: Some(value.to_string()),
            },
            None => NavStep {
                rel: part.to_string(),
                value: None,
            },
        })
        .collect();
    Some((start, steps))
}

/// The href a step follows from `links`, if any.
pub fn follow(links: &[Link], step: &NavStep) -> Option<String> {
    select(links, step).map(|(_, href)| href)
}

/// The link a step follows, with its href after template substitution.
pub fn select<'a>(links: &'a [Link], step: &NavStep) -> Option<(&'a Link, String)> {
    let candidates = || links.iter().filter(|link| link.has_rel(&step.rel));

    if let Some(value) = &step.value {
        if let Some(link) = candidates().find(|link| link.id.as_deref() == Some(value.as_str())) {
            return Some((link, link.href.clone()));
        }
    }

    let template = candidates().find(|link| link.is_template())?;
    let href = substitute(&template.href, step.value.as_deref()?);
    (!href.contains('{')).then_some((template, href))
}

/// Replace every `{...}` placeholder with `value`.
fn substitute(template: &str, value: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        out.push_str(&rest[..open]);
        out.push_str(value);
        rest = &rest[open + close + 1..];
    }
    out.push_str(rest);
    out
}

/// Resolves `nav:` URIs by walking Link headers.
#[derive(Debug, Default)]
pub struct NavResolver;

impl NavResolver {
    async fn navigate(request: Request, mediator: &Mediator) -> HandlerResult {
        let Some((start, steps)) = parse_nav_uri(&request.url) else {
            return Err(DispatchError::not_found().into());
        };

        let mut current = uri::with_default_scheme(&start);
        for step in &steps {
            let response = mediator.dispatch(Request::get(&current)).await?;
            let Some(href) = follow(&response.links(), step) else {
                tracing::debug!(uri = %current, rel = %step.rel, value = ?step.value, "No link matches navigation step");
                return Err(DispatchError::not_found().into());
            };
            current = uri::join(&current, &href);
        }

        let mut last = Request::get(&current);
        last.headers = request.headers.clone();
        last.timeout = request.timeout;
        Ok(mediator.dispatch(last).await?)
    }
}

impl Handler for NavResolver {
    fn receive<'a>(&'a self, request: Request, mediator: &'a Mediator) -> BoxFuture<'a, HandlerResult> {
        Self::navigate(request, mediator).boxed()
    }
}
