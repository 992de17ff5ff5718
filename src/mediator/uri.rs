//! URI splitting for dispatch.
//!
//! # Responsibilities
//! - Split a URI into scheme, authority, path and query
//! - Default scheme-less URIs to the local-authority scheme
//! - Resolve relative hrefs found in Link headers
//!
//! # Design Decisions
//! - `#name` URIs address internal names; the authority is `#name`
//! - Only the first path segment boundary is significant; the remainder
//!   passes through to the handler unchanged
//! - Authorities may contain parenthesized sub-addresses with slashes,
//!   e.g. `host(scripts/worker)`, so splitting respects parentheses
//! - `host:8080` is an authority with a port, not a scheme

/// Scheme used for in-process dispatch by authority.
pub const LOCAL_SCHEME: &str = "httpl";

/// A URI split for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    pub authority: String,
    /// Empty, or starting with `/`. For opaque schemes, everything after `scheme:`.
    pub path: String,
    pub query: Option<String>,
}

impl Target {
    pub fn parse(uri: &str) -> Self {
        if uri.starts_with('#') {
            return Self::hierarchical(LOCAL_SCHEME, uri);
        }
        match scheme_of(uri) {
            Some(scheme) => {
                let rest = &uri[scheme.len() + 1..];
                match rest.strip_prefix("//") {
                    Some(hier) => Self::hierarchical(scheme, hier),
                    None => Self {
                        scheme: scheme.to_lowercase(),
                        authority: String::new(),
                        path: rest.to_string(),
                        query: None,
                    },
                }
            }
            None => Self::hierarchical(LOCAL_SCHEME, uri),
        }
    }

    fn hierarchical(scheme: &str, rest: &str) -> Self {
        let end = authority_end(rest);
        let authority = rest[..end].to_lowercase();
        let remainder = &rest[end..];
        let (path, query) = match remainder.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (remainder.to_string(), None),
        };
        Self {
            scheme: scheme.to_lowercase(),
            authority,
            path,
            query,
        }
    }

    pub fn is_local(&self) -> bool {
        self.scheme == LOCAL_SCHEME
    }

    /// `scheme://authority`, or the bare `#name` for internal names.
    pub fn root(&self) -> String {
        if self.authority.starts_with('#') {
            self.authority.clone()
        } else {
            format!("{}://{}", self.scheme, self.authority)
        }
    }

    /// Path plus query, as passed through to the resolved handler.
    pub fn remainder(&self) -> String {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        match &self.query {
            Some(q) => format!("{}?{}", path, q),
            None => path.to_string(),
        }
    }
}

/// The scheme of `uri`, if it has one.
pub fn scheme_of(uri: &str) -> Option<&str> {
    let colon = uri.find(':')?;
    let scheme = &uri[..colon];
    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    // host:port
    let port_follows = uri[colon + 1..]
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit());
    (valid && !port_follows).then_some(scheme)
}

/// Prefix the local scheme onto scheme-less URIs.
pub fn with_default_scheme(uri: &str) -> String {
    if uri.starts_with('#') || scheme_of(uri).is_some() {
        uri.to_string()
    } else {
        format!("{}://{}", LOCAL_SCHEME, uri)
    }
}

/// Resolve `href` against `base`.
pub fn join(base: &str, href: &str) -> String {
    if href.starts_with('#') || scheme_of(href).is_some() {
        return href.to_string();
    }
    let target = Target::parse(base);
    if let Some(rest) = href.strip_prefix("//") {
        return format!("{}://{}", target.scheme, rest);
    }
    if href.is_empty() {
        return base.to_string();
    }
    if href.starts_with('/') {
        return format!("{}{}", target.root(), href);
    }
    if href.starts_with('?') {
        return format!("{}{}{}", target.root(), target.path, href);
    }
    let dir = match target.path.rfind('/') {
        Some(i) => &target.path[..=i],
        None => "/",
    };
    format!("{}{}{}", target.root(), dir, href)
}

// Slashes inside parentheses belong to the authority, e.g. `dev.local(scripts/worker)`.
fn authority_end(rest: &str) -> usize {
    let mut depth = 0usize;
    for (i, c) in rest.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '/' | '?' if depth == 0 => return i,
            _ => {}
        }
    }
    rest.len()
}

/// Whether `key` parses back as a whole authority, so handlers registered
/// under it are reachable.
pub fn is_authority(key: &str) -> bool {
    !key.is_empty() && authority_end(key) == key.len()
}
