//! Link header parsing and serialization.
//!
//! # Grammar
//! ```text
//! link-header = link-value *( "," link-value )
//! link-value  = "<" href ">" *( ";" param )
//! param       = key [ "=" ( token | quoted-string ) ]
//! ```
//!
//! # Design Decisions
//! - A bare `key` parses to a flag (boolean true) and serializes bare again
//! - `rel` is a whitespace-separated token set; order is kept for output
//! - Values without a `rel` token are not well-formed; parsing skips them,
//!   rewriting keeps them verbatim
//! - Commas and semicolons inside quotes or angle brackets are not separators

use std::collections::BTreeMap;
use std::fmt;

/// Value of a link parameter other than `rel` and `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkParam {
    /// Valueless parameter, e.g. `noproxy`.
    Flag,
    Value(String),
}

/// A single structured link descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub href: String,
    pub rel: Vec<String>,
    pub id: Option<String>,
    pub params: BTreeMap<String, LinkParam>,
}

impl Link {
    /// Create a link; `rel` is split on whitespace.
    pub fn new(href: impl Into<String>, rel: &str) -> Self {
        let mut link = Self {
            href: href.into(),
            rel: Vec::new(),
            id: None,
            params: BTreeMap::new(),
        };
        link.add_rels(rel);
        link
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_flag(mut self, key: &str) -> Self {
        self.params.insert(key.to_lowercase(), LinkParam::Flag);
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params
            .insert(key.to_lowercase(), LinkParam::Value(value.into()));
        self
    }

    fn add_rels(&mut self, rel: &str) {
        for token in rel.split_whitespace() {
            if !self.rel.iter().any(|r| r == token) {
                self.rel.push(token.to_string());
            }
        }
    }

    /// True if `rel` is one of this link's relation tokens.
    pub fn has_rel(&self, rel: &str) -> bool {
        self.rel.iter().any(|r| r.eq_ignore_ascii_case(rel))
    }

    /// True if the link is set, as a flag or as `"true"`.
    pub fn flag(&self, key: &str) -> bool {
        match self.params.get(key) {
            Some(LinkParam::Flag) => true,
            Some(LinkParam::Value(v)) => v.eq_ignore_ascii_case("true"),
            None => false,
        }
    }

    /// Links marked `noproxy` keep their href through proxy hops.
    pub fn is_noproxy(&self) -> bool {
        self.flag("noproxy")
    }

    /// True if the href carries a `{...}` substitution placeholder.
    pub fn is_template(&self) -> bool {
        self.href
            .find('{')
            .is_some_and(|open| self.href[open..].contains('}'))
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>; rel=\"{}\"", self.href, self.rel.join(" "))?;
        if let Some(id) = &self.id {
            write!(f, "; id=\"{}\"", id)?;
        }
        for (key, param) in &self.params {
            match param {
                LinkParam::Flag => write!(f, "; {}", key)?,
                LinkParam::Value(v) => write!(f, "; {}=\"{}\"", key, v)?,
            }
        }
        Ok(())
    }
}

/// Serialize links into a Link header value.
pub fn serialize_links(links: &[Link]) -> String {
    links
        .iter()
        .map(Link::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a Link header value into descriptors, skipping malformed entries.
pub fn parse_link_header(header: &str) -> Vec<Link> {
    split_outside_quotes(header, ',')
        .into_iter()
        .filter_map(parse_link_value)
        .collect()
}

/// Apply `f` to every well-formed link in `header`. Entries that do not
/// parse are carried through verbatim, in place.
pub fn rewrite_link_header(header: &str, mut f: impl FnMut(&mut Link)) -> String {
    split_outside_quotes(header, ',')
        .into_iter()
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(|raw| match parse_link_value(raw) {
            Some(mut link) => {
                f(&mut link);
                link.to_string()
            }
            None => raw.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_link_value(raw: &str) -> Option<Link> {
    let raw = raw.trim();
    let rest = raw.strip_prefix('<')?;
    let close = rest.find('>')?;
    let href = &rest[..close];

    let mut link = Link {
        href: href.to_string(),
        rel: Vec::new(),
        id: None,
        params: BTreeMap::new(),
    };

    for param in split_outside_quotes(&rest[close + 1..], ';') {
        let param = param.trim();
        if param.is_empty() {
            continue;
        }
        let (key, value) = match param.split_once('=') {
            Some((k, v)) => (k.trim().to_lowercase(), Some(unquote(v.trim()))),
            None => (param.to_lowercase(), None),
        };
        match value {
            Some(v) if key == "rel" => link.add_rels(&v),
            Some(v) if key == "id" => link.id = Some(v),
            Some(v) => {
                link.params.insert(key, LinkParam::Value(v));
            }
            None => {
                link.params.insert(key, LinkParam::Flag);
            }
        }
    }

    if link.rel.is_empty() {
        tracing::debug!(href = %link.href, "Skipping link without rel");
        return None;
    }
    Some(link)
}

fn unquote(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
        .to_string()
}

fn split_outside_quotes(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut in_href = false;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match c {
            '"' if !in_href => in_quotes = !in_quotes,
            '<' if !in_quotes => in_href = true,
            '>' if !in_quotes => in_href = false,
            c if c == separator && !in_quotes && !in_href => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVICE_LINKS: &str = "</>; rel=\"self current\", </events>; rel=\"collection\"; id=\"events\", </foo>; rel=\"collection\"; id=\"foo\", </{id}>; rel=\"collection\"";

    #[test]
    fn parses_href_rel_and_id() {
        let links = parse_link_header(SERVICE_LINKS);
        assert_eq!(links.len(), 4);
        assert_eq!(links[0].href, "/");
        assert_eq!(links[0].rel, vec!["self", "current"]);
        assert_eq!(links[2].id.as_deref(), Some("foo"));
        assert!(links[3].is_template());
        assert!(!links[2].is_template());
    }

    #[test]
    fn bare_params_are_flags() {
        let links = parse_link_header("</>; rel=\"self service\"; noproxy, <httpl://test.com>; rel=service");
        assert!(links[0].is_noproxy());
        assert!(!links[1].is_noproxy());
        assert_eq!(links[1].rel, vec!["service"]);
    }

    #[test]
    fn commas_inside_quotes_do_not_split() {
        let links = parse_link_header("</a>; rel=\"item\"; title=\"one, two; three\", </b>; rel=next");
        assert_eq!(links.len(), 2);
        assert_eq!(
            links[0].params.get("title"),
            Some(&LinkParam::Value("one, two; three".into()))
        );
    }

    #[test]
    fn missing_rel_is_skipped() {
        let links = parse_link_header("</a>; title=\"x\", garbage, </b>; rel=\"up\"");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].href, "/b");
    }

    #[test]
    fn rewriting_keeps_unparsed_entries_in_place() {
        let header = "</a>; title=\"x\", </b>; rel=\"up\", garbage";
        let rewritten = rewrite_link_header(header, |link| link.href = format!("httpl://test.com{}", link.href));
        assert_eq!(
            rewritten,
            "</a>; title=\"x\", <httpl://test.com/b>; rel=\"up\", garbage"
        );
    }

    #[test]
    fn serialization_reparses_equivalently() {
        let links = parse_link_header(SERVICE_LINKS);
        let reparsed = parse_link_header(&serialize_links(&links));
        assert_eq!(links, reparsed);
    }

    #[test]
    fn serializes_flags_bare_and_values_quoted() {
        let link = Link::new("/", "self service")
            .with_flag("noproxy")
            .with_param("title", "Root");
        assert_eq!(
            link.to_string(),
            "</>; rel=\"self service\"; noproxy; title=\"Root\""
        );
    }

    #[test]
    fn rel_tokens_are_deduplicated() {
        let link = Link::new("/", "self self current");
        assert_eq!(link.rel, vec!["self", "current"]);
        assert!(link.has_rel("CURRENT"));
    }
}
