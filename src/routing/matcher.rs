//! Route matching logic.
//!
//! # Responsibilities
//! - Match path patterns (exact, segment-aligned prefix, wildcard)
//! - Match method, host header (case-insensitive) and header equality
//! - Combine conditions with AND semantics
//! - Resolve a request to the most specific route of a table
//!
//! # Design Decisions
//! - Host matching is case-insensitive (RFC 9110), port ignored
//! - Path matching is case-sensitive
//! - No regex to guarantee O(n) matching
//! - Precedence is computed when the table is built, so matching is a
//!   first-hit scan and the same request always resolves to the same route

use std::fmt::{self, Debug};
use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{header, HeaderName, HeaderValue, Method, Request};
use thiserror::Error;

use crate::routing::route::Route;
use crate::routing::table::RouteTable;

/// A path pattern could not be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct PatternError(String);

/// Path part of a route predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    /// `/orders` matches only `/orders`.
    Exact(String),
    /// `/orders/*` matches `/orders` and everything below `/orders/`.
    Prefix(String),
    /// `*` or `/*` matches every path.
    Wildcard,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        if raw == "*" || raw == "/*" {
            return Ok(PathPattern::Wildcard);
        }
        if raw.is_empty() {
            return Err(PatternError("path is empty".into()));
        }
        if !raw.starts_with('/') {
            return Err(PatternError(format!("`{raw}` must start with '/'")));
        }
        if raw.chars().any(|c| c.is_whitespace() || c == '?' || c == '#') {
            return Err(PatternError(format!(
                "`{raw}` contains whitespace, '?' or '#'"
            )));
        }
        if let Some(base) = raw.strip_suffix("/*") {
            if base.contains('*') {
                return Err(PatternError(format!(
                    "`{raw}`: '*' is only allowed as a trailing \"/*\""
                )));
            }
            return Ok(PathPattern::Prefix(base.to_string()));
        }
        if raw.contains('*') {
            return Err(PatternError(format!(
                "`{raw}`: '*' is only allowed as a trailing \"/*\""
            )));
        }
        Ok(PathPattern::Exact(raw.to_string()))
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(exact) => path == exact,
            PathPattern::Prefix(base) => {
                path == base
                    || path
                        .strip_prefix(base.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            PathPattern::Wildcard => true,
        }
    }

    /// Ranking key: exact > prefix > wildcard, longer literal first.
    pub fn specificity(&self) -> (u8, usize) {
        match self {
            PathPattern::Exact(p) => (2, p.len()),
            PathPattern::Prefix(p) => (1, p.len()),
            PathPattern::Wildcard => (0, 0),
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathPattern::Exact(path) => f.write_str(path),
            PathPattern::Prefix(base) => write!(f, "{base}/*"),
            PathPattern::Wildcard => f.write_str("*"),
        }
    }
}

/// A non-path condition a request must satisfy.
pub trait Condition: Send + Sync + Debug {
    fn matches(&self, req: &Request<Bytes>) -> bool;
}

/// Request method must be one of a set.
#[derive(Debug, Clone)]
pub struct MethodCondition {
    methods: Vec<Method>,
}

impl MethodCondition {
    pub fn new(methods: Vec<Method>) -> Self {
        Self { methods }
    }
}

impl Condition for MethodCondition {
    fn matches(&self, req: &Request<Bytes>) -> bool {
        self.methods.contains(req.method())
    }
}

/// Host header (or URI authority) must equal a name, ignoring case and port.
#[derive(Debug, Clone)]
pub struct HostCondition {
    expected_host: String,
}

impl HostCondition {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            expected_host: host.into().to_lowercase(),
        }
    }
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

impl Condition for HostCondition {
    fn matches(&self, req: &Request<Bytes>) -> bool {
        req.headers()
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| req.uri().host())
            .map(|h| strip_port(h).eq_ignore_ascii_case(&self.expected_host))
            .unwrap_or(false)
    }
}

/// A header must be present with exactly this value.
#[derive(Debug, Clone)]
pub struct HeaderCondition {
    name: HeaderName,
    value: HeaderValue,
}

impl HeaderCondition {
    pub fn new(name: HeaderName, value: HeaderValue) -> Self {
        Self { name, value }
    }
}

impl Condition for HeaderCondition {
    fn matches(&self, req: &Request<Bytes>) -> bool {
        req.headers()
            .get_all(&self.name)
            .iter()
            .any(|v| v == &self.value)
    }
}

/// Result of resolving a request against a table.
#[derive(Debug, Clone)]
pub enum RouteMatch {
    Matched(Arc<Route>),
    NoMatch,
}

impl RouteMatch {
    pub fn route(&self) -> Option<&Arc<Route>> {
        match self {
            RouteMatch::Matched(route) => Some(route),
            RouteMatch::NoMatch => None,
        }
    }
}

/// Most specific route of `table` accepting `req`.
pub fn match_route(table: &RouteTable, req: &Request<Bytes>) -> RouteMatch {
    table
        .by_precedence()
        .find(|route| route.matches(req))
        .map(|route| RouteMatch::Matched(route.clone()))
        .unwrap_or(RouteMatch::NoMatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method, uri: &str) -> Request<Bytes> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Bytes::new())
            .unwrap()
    }

    #[test]
    fn parses_patterns() {
        assert_eq!(PathPattern::parse("*").unwrap(), PathPattern::Wildcard);
        assert_eq!(PathPattern::parse("/*").unwrap(), PathPattern::Wildcard);
        assert_eq!(
            PathPattern::parse("/orders/*").unwrap(),
            PathPattern::Prefix("/orders".into())
        );
        assert_eq!(
            PathPattern::parse("/orders").unwrap(),
            PathPattern::Exact("/orders".into())
        );
        for bad in ["", "orders", "/a/*/b", "/a*", "/a b", "/a?x=1"] {
            assert!(PathPattern::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn prefix_respects_segment_boundaries() {
        let p = PathPattern::parse("/orders/*").unwrap();
        assert!(p.matches("/orders"));
        assert!(p.matches("/orders/"));
        assert!(p.matches("/orders/42/items"));
        assert!(!p.matches("/ordersX"));
        assert!(!p.matches("/order"));
    }

    #[test]
    fn specificity_ranks_exact_over_prefix_over_wildcard() {
        let exact = PathPattern::parse("/a").unwrap().specificity();
        let long_prefix = PathPattern::parse("/a/b/*").unwrap().specificity();
        let short_prefix = PathPattern::parse("/a/*").unwrap().specificity();
        let wildcard = PathPattern::Wildcard.specificity();
        assert!(exact > long_prefix);
        assert!(long_prefix > short_prefix);
        assert!(short_prefix > wildcard);
    }

    #[test]
    fn host_condition_ignores_case_and_port() {
        let cond = HostCondition::new("Example.com");
        let mut req = request(Method::GET, "/");
        req.headers_mut()
            .insert(header::HOST, HeaderValue::from_static("EXAMPLE.COM:8080"));
        assert!(cond.matches(&req));

        let other = request(Method::GET, "http://other.com/");
        assert!(!cond.matches(&other));

        let authority_only = request(Method::GET, "http://example.com/x");
        assert!(cond.matches(&authority_only));
    }

    #[test]
    fn method_and_header_conditions() {
        let method = MethodCondition::new(vec![Method::GET, Method::HEAD]);
        assert!(method.matches(&request(Method::HEAD, "/")));
        assert!(!method.matches(&request(Method::POST, "/")));

        let header = HeaderCondition::new(
            HeaderName::from_static("x-tenant"),
            HeaderValue::from_static("blue"),
        );
        let mut req = request(Method::GET, "/");
        assert!(!header.matches(&req));
        req.headers_mut()
            .insert("x-tenant", HeaderValue::from_static("blue"));
        assert!(header.matches(&req));
    }
}
