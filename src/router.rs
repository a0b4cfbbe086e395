//! Linear segment-matching router (§4.4), grounded directly on
//! `original_source/framework/include/blaze/router.h` and `router.cpp`: a
//! `Vec<Route>` scanned in insertion order, first match wins. No trie, no
//! radix tree — the spec's Non-goal "pluggable routing algorithms beyond
//! linear segment-matching" rules those out.

use crate::{
    http::types::{percent_decode, Method},
    pipeline::BoxHandler,
};
use std::{collections::HashMap, sync::Arc};

/// One registered route: its method, original pattern (for diagnostics), and
/// precompiled segment list (§3 Route).
pub(crate) struct Route {
    pub(crate) method: Method,
    pub(crate) pattern: String,
    segments: Vec<Segment>,
    pub(crate) handler: Arc<BoxHandler>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// The outcome of a successful [`Router::matches`] call: the matched route's
/// handler, the captured `:name` parameters, and the full ordered list of
/// (percent-decoded) path segments, per §3's "Route match".
pub(crate) struct RouteMatch<'a> {
    pub(crate) handler: &'a Arc<BoxHandler>,
    pub(crate) params: HashMap<String, String>,
    pub(crate) segments: Vec<String>,
    /// Captured `:name` values only, in declaration order — what
    /// [`crate::binder::path::Path`] indexes by position (§4.6 "the k-th
    /// captured path segment").
    pub(crate) captures: Vec<String>,
}

/// Holds the route table (§4.4). Routes are added at startup via
/// [`Router::add_route`] (or the higher-level registration methods on
/// [`crate::App`]) and are read-only once the server starts listening.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub(crate) fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Registers a route. `pattern` is split on `/`; a segment of the form
    /// `:name` becomes a named capture, anything else is matched literally.
    pub(crate) fn add_route(&mut self, method: Method, pattern: &str, handler: Box<BoxHandler>) {
        let segments = split_pattern(pattern);
        self.routes.push(Route {
            method,
            pattern: pattern.to_string(),
            segments,
            handler: Arc::from(handler),
        });
    }

    /// Resolves `(method, path)` to a route, returning the first one
    /// registered whose method and segment pattern both match (§4.4).
    pub(crate) fn matches(&self, method: Method, path: &[u8]) -> Option<RouteMatch<'_>> {
        let path = std::str::from_utf8(path).ok()?;
        let request_segments = split_path(path);

        self.routes
            .iter()
            .filter(|route| route.method == method)
            .find_map(|route| {
                match_one(&route.segments, &request_segments)
                    .map(|(params, segments, captures)| RouteMatch {
                        handler: &route.handler,
                        params,
                        segments,
                        captures,
                    })
            })
    }

    /// Whether some route matches `path` under a *different* method, used to
    /// decide between 404 and 405 (§4.4 allows simplifying to 404; this
    /// crate reports 405 when the more specific information is available).
    pub(crate) fn path_matches_any_method(&self, path: &[u8]) -> bool {
        let Ok(path) = std::str::from_utf8(path) else {
            return false;
        };
        let request_segments = split_path(path);
        self.routes
            .iter()
            .any(|route| match_one(&route.segments, &request_segments).is_some())
    }
}

fn split_pattern(pattern: &str) -> Vec<Segment> {
    split_path(pattern)
        .into_iter()
        .map(|s| match s.strip_prefix(':') {
            Some(name) => Segment::Param(name.to_string()),
            None => Segment::Literal(s),
        })
        .collect()
}

/// Strips a trailing slash (except for the root `/`) and splits on `/`,
/// dropping empty segments so `//api//user` behaves like `/api/user`,
/// matching the donor's collapsing behavior.
fn split_path(path: &str) -> Vec<String> {
    let trimmed = if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    };
    trimmed
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Matches one route's segment pattern against the request's segments,
/// capturing `:name` params and returning the full decoded segment list.
/// A free function so it is trivially unit-testable in isolation.
fn match_one(
    segments: &[Segment],
    request: &[String],
) -> Option<(HashMap<String, String>, Vec<String>, Vec<String>)> {
    if segments.len() != request.len() {
        return None;
    }

    let mut params = HashMap::with_capacity(segments.len());
    let mut decoded = Vec::with_capacity(request.len());
    let mut captures = Vec::new();

    for (pattern_seg, raw_seg) in segments.iter().zip(request.iter()) {
        let value = String::from_utf8_lossy(&percent_decode(raw_seg.as_bytes())).into_owned();

        match pattern_seg {
            Segment::Literal(lit) if lit == raw_seg => {}
            Segment::Literal(_) => return None,
            Segment::Param(name) => {
                params.insert(name.clone(), value.clone());
                captures.push(value.clone());
            }
        }
        decoded.push(value);
    }

    Some((params, decoded, captures))
}

/// Groups route registration under a shared path prefix (§6 `group(prefix)`).
/// A thin builder over [`crate::App`]; see `app.rs`.
pub struct RouteGroup<'a> {
    pub(crate) app: &'a mut crate::app::App,
    pub(crate) prefix: String,
}

impl<'a> RouteGroup<'a> {
    pub(crate) fn new(app: &'a mut crate::app::App, prefix: impl Into<String>) -> Self {
        Self {
            app,
            prefix: prefix.into(),
        }
    }

    fn full_path(&self, path: &str) -> String {
        format!("{}{}", self.prefix.trim_end_matches('/'), path)
    }

    pub fn get<H, T>(self, path: &str, handler: H) -> Self
    where
        H: crate::binder::Handler<T> + Clone + Send + Sync + 'static,
        T: Send + 'static,
    {
        let full = self.full_path(path);
        self.app.route(Method::Get, &full, handler);
        self
    }

    pub fn post<H, T>(self, path: &str, handler: H) -> Self
    where
        H: crate::binder::Handler<T> + Clone + Send + Sync + 'static,
        T: Send + 'static,
    {
        let full = self.full_path(path);
        self.app.route(Method::Post, &full, handler);
        self
    }

    pub fn put<H, T>(self, path: &str, handler: H) -> Self
    where
        H: crate::binder::Handler<T> + Clone + Send + Sync + 'static,
        T: Send + 'static,
    {
        let full = self.full_path(path);
        self.app.route(Method::Put, &full, handler);
        self
    }

    pub fn delete<H, T>(self, path: &str, handler: H) -> Self
    where
        H: crate::binder::Handler<T> + Clone + Send + Sync + 'static,
        T: Send + 'static,
    {
        let full = self.full_path(path);
        self.app.route(Method::Delete, &full, handler);
        self
    }

    pub fn patch<H, T>(self, path: &str, handler: H) -> Self
    where
        H: crate::binder::Handler<T> + Clone + Send + Sync + 'static,
        T: Send + 'static,
    {
        let full = self.full_path(path);
        self.app.route(Method::Patch, &full, handler);
        self
    }

    /// A nested group sharing this group's prefix plus `subpath`.
    pub fn group(&mut self, subpath: &str) -> RouteGroup<'_> {
        RouteGroup::new(self.app, self.full_path(subpath))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segs(pattern: &str) -> Vec<Segment> {
        split_pattern(pattern)
    }

    #[test]
    fn literal_and_param_segments() {
        assert_eq!(
            segs("/users/:id/posts/:post_id"),
            vec![
                Segment::Literal("users".into()),
                Segment::Param("id".into()),
                Segment::Literal("posts".into()),
                Segment::Param("post_id".into()),
            ]
        );
    }

    #[test]
    fn root_path_is_not_collapsed() {
        assert_eq!(split_path("/"), Vec::<String>::new());
    }

    #[test]
    fn slash_collapsing() {
        assert_eq!(split_path("///api//user/"), vec!["api", "user"]);
    }

    #[test]
    fn match_exact_literal() {
        let pattern = segs("/api/users");
        let (params, decoded, captures) = match_one(&pattern, &split_path("/api/users")).unwrap();
        assert!(params.is_empty());
        assert_eq!(decoded, vec!["api", "users"]);
        assert!(captures.is_empty());
    }

    #[test]
    fn match_captures_param() {
        let pattern = segs("/u/:id");
        let (params, _, captures) = match_one(&pattern, &split_path("/u/42")).unwrap();
        assert_eq!(params.get("id"), Some(&"42".to_string()));
        assert_eq!(captures, vec!["42".to_string()]);
    }

    #[test]
    fn match_decodes_percent_encoding() {
        let pattern = segs("/u/:name");
        let (params, _, _) = match_one(&pattern, &split_path("/u/john%20doe")).unwrap();
        assert_eq!(params.get("name"), Some(&"john doe".to_string()));
    }

    #[test]
    fn mismatched_length_fails() {
        let pattern = segs("/a/b");
        assert!(match_one(&pattern, &split_path("/a")).is_none());
    }

    #[test]
    fn mismatched_literal_fails() {
        let pattern = segs("/a/b");
        assert!(match_one(&pattern, &split_path("/a/c")).is_none());
    }

    fn noop_handler() -> Box<BoxHandler> {
        Box::new(|_req, _res, _services| Box::pin(async { Ok(()) }))
    }

    #[test]
    fn router_first_match_wins() {
        let mut router = Router::new();
        router.add_route(Method::Get, "/a/:x", noop_handler());
        router.add_route(Method::Get, "/a/fixed", noop_handler());

        // Both patterns match "/a/fixed"; the first-registered wins.
        let m = router.matches(Method::Get, b"/a/fixed").unwrap();
        assert_eq!(m.params.get("x"), Some(&"fixed".to_string()));
    }
}
