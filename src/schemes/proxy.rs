//! Proxy resolver, registered under the `proxy` authority.
//!
//! # Responsibilities
//! - Forward `httpl://proxy/<uri>` to `<uri>` through the same mediator
//! - Make forwarded links absolute, rooted at the target's authority
//! - Record the hop in `via` and `proxy-tmpl`
//!
//! # Design Decisions
//! - Nested proxy URIs recurse through the mediator; each hop rewrites and
//!   appends once, so the chains read in traversal order
//! - `noproxy` links pass through untouched
//! - Failures from the target pass through unchanged

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::mediator::uri::{self, Target};
use crate::mediator::{Handler, HandlerError, HandlerResult, Mediator};
use crate::message::headers::{PROXY_TMPL, VIA};
use crate::message::{Link, Request, Response};

/// Authority the proxy resolver is registered under.
pub const PROXY_AUTHORITY: &str = "proxy";

/// Appended to `via` by each hop.
pub const PROXY_VIA: &str = "httpl/1.0 proxy";

/// Appended to `proxy-tmpl` by each hop.
pub const PROXY_TEMPLATE: &str = "httpl://proxy/{uri}";

/// The URI a proxy request forwards to; empty for the proxy itself.
pub fn proxied_uri(target: &Target) -> String {
    let path = target.path.strip_prefix('/').unwrap_or(&target.path);
    match &target.query {
        Some(query) if !path.is_empty() => format!("{}?{}", path, query),
        _ => path.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct ProxyResolver;

impl ProxyResolver {
    fn root_resource(mediator: &Mediator) -> Response {
        let mut links = vec![Link::new("/", "self service").with_flag("noproxy")];
        links.extend(
            mediator
                .authorities()
                .into_iter()
                .filter(|authority| authority != PROXY_AUTHORITY && !authority.starts_with('#'))
                .map(|authority| Link::new(format!("{}://{}", uri::LOCAL_SCHEME, authority), "service")),
        );
        links.push(Link::new("/{uri}", "service").with_flag("noproxy"));

        Response::new(204, "ok, no content")
            .header(PROXY_TMPL, PROXY_TEMPLATE)
            .with_links(&links)
    }

    async fn forward(request: Request, mediator: &Mediator) -> HandlerResult {
        let destination = uri::with_default_scheme(&proxied_uri(&request.target()));
        let root = Target::parse(&destination).root();

        let mut forwarded = Request::new(&request.method, &destination);
        forwarded.headers = request.headers.clone();
        forwarded.body = request.body.clone();
        forwarded.timeout = request.timeout;

        let mut response = mediator.dispatch(forwarded).await.map_err(HandlerError::from)?;
        response.update_links(|link| {
            if !link.is_noproxy() {
                link.href = uri::join(&root, &link.href);
            }
        });
        response.headers.append(VIA, PROXY_VIA, ", ");
        response.headers.append(PROXY_TMPL, PROXY_TEMPLATE, " ");
        Ok(response)
    }
}

impl Handler for ProxyResolver {
    fn receive<'a>(&'a self, request: Request, mediator: &'a Mediator) -> BoxFuture<'a, HandlerResult> {
        if proxied_uri(&request.target()).is_empty() {
            let root = Self::root_resource(mediator);
            return async move { Ok(root) }.boxed();
        }
        Self::forward(request, mediator).boxed()
    }
}
