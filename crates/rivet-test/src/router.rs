//! Route pattern matching for the loopback engine.
//!
//! Patterns are `/`-separated segments. A segment starting with `:` is a
//! parameter and captures one path segment; a `*` segment matches the rest
//! of the path, including nothing. Captured parameters are positional.
//!
//! A path can match several routes. [`Router::matches`] returns all of
//! them in priority order (static before parameter before wildcard, then
//! registration order), which is the order the engine tries them in when
//! a handler yields.

use rivet_core::transport::{MethodFilter, RouteId, WsRouteOptions};

/// What kind of requests a route accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteKind {
    /// Plain HTTP requests with a matching method.
    Http(MethodFilter),
    /// WebSocket upgrade requests.
    Ws(WsRouteOptions),
}

/// One registered route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    /// Id the app assigned.
    pub id: RouteId,
    /// Accepted requests.
    pub kind: RouteKind,
}

impl RouteEntry {
    fn accepts(&self, method: &str, upgrade: bool) -> bool {
        match &self.kind {
            RouteKind::Http(filter) => !upgrade && filter.matches(method),
            RouteKind::Ws(_) => upgrade && method.eq_ignore_ascii_case("GET"),
        }
    }
}

/// A route that matched a path, with its captured parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// The matched route.
    pub entry: RouteEntry,
    /// Parameter values in pattern order.
    pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param,
    Wildcard,
}

#[derive(Debug, Clone, Default)]
struct Node {
    segment: String,
    routes: Vec<RouteEntry>,
    static_children: Vec<Node>,
    param_child: Option<Box<Node>>,
    wildcard_child: Option<Box<Node>>,
}

impl Node {
    fn new(segment: &str) -> Self {
        Self {
            segment: segment.to_string(),
            ..Self::default()
        }
    }

    fn insert(&mut self, segments: &[Segment], entry: RouteEntry) {
        let Some((first, rest)) = segments.split_first() else {
            self.routes.push(entry);
            return;
        };
        match first {
            Segment::Static(name) => {
                let index = match self
                    .static_children
                    .binary_search_by(|c| c.segment.as_str().cmp(name))
                {
                    Ok(index) => index,
                    Err(index) => {
                        self.static_children.insert(index, Node::new(name));
                        index
                    }
                };
                self.static_children[index].insert(rest, entry);
            }
            Segment::Param => self
                .param_child
                .get_or_insert_with(|| Box::new(Node::new(":")))
                .insert(rest, entry),
            // Anything after `*` is unreachable, so the wildcard ends the pattern.
            Segment::Wildcard => self
                .wildcard_child
                .get_or_insert_with(|| Box::new(Node::new("*")))
                .routes
                .push(entry),
        }
    }

    fn collect(&self, segments: &[&str], params: &mut Vec<String>, out: &mut Vec<RouteMatch>) {
        match segments.split_first() {
            None => out.extend(self.routes.iter().map(|entry| RouteMatch {
                entry: entry.clone(),
                params: params.clone(),
            })),
            Some((first, rest)) => {
                if let Ok(index) = self
                    .static_children
                    .binary_search_by(|c| c.segment.as_str().cmp(first))
                {
                    self.static_children[index].collect(rest, params, out);
                }
                if let Some(child) = &self.param_child {
                    params.push((*first).to_string());
                    child.collect(rest, params, out);
                    params.pop();
                }
            }
        }
        if let Some(child) = &self.wildcard_child {
            out.extend(child.routes.iter().map(|entry| RouteMatch {
                entry: entry.clone(),
                params: params.clone(),
            }));
        }
    }
}

fn parse_pattern(pattern: &str) -> Vec<Segment> {
    pattern
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s.starts_with(':') {
                Segment::Param
            } else if s == "*" {
                Segment::Wildcard
            } else {
                Segment::Static(s.to_string())
            }
        })
        .collect()
}

/// Route tree of the loopback engine.
#[derive(Debug, Clone, Default)]
pub struct Router {
    root: Node,
    len: usize,
}

impl Router {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route.
    pub fn insert(&mut self, pattern: &str, entry: RouteEntry) {
        self.root.insert(&parse_pattern(pattern), entry);
        self.len += 1;
    }

    /// Every route that accepts the request, in the order to try them.
    pub fn matches(&self, method: &str, path: &str, upgrade: bool) -> Vec<RouteMatch> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut out = Vec::new();
        self.root.collect(&segments, &mut Vec::new(), &mut out);
        out.retain(|m| m.entry.accepts(method, upgrade));
        out
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` if no route is registered.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn http(id: usize, method: Method) -> RouteEntry {
        RouteEntry {
            id: RouteId(id),
            kind: RouteKind::Http(MethodFilter::Only(method)),
        }
    }

    fn ids(matches: &[RouteMatch]) -> Vec<usize> {
        matches.iter().map(|m| m.entry.id.0).collect()
    }

    #[test]
    fn test_parse_pattern() {
        assert_eq!(
            parse_pattern("/users/:id/*"),
            vec![Segment::Static("users".to_string()), Segment::Param, Segment::Wildcard]
        );
        assert!(parse_pattern("/").is_empty());
    }

    #[test]
    fn test_static_match() {
        let mut router = Router::new();
        router.insert("/", http(0, Method::GET));
        router.insert("/users", http(1, Method::GET));

        assert_eq!(ids(&router.matches("GET", "/", false)), vec![0]);
        assert_eq!(ids(&router.matches("GET", "/users", false)), vec![1]);
        assert!(router.matches("GET", "/posts", false).is_empty());
        assert!(router.matches("POST", "/users", false).is_empty());
    }

    #[test]
    fn test_params_are_positional() {
        let mut router = Router::new();
        router.insert("/orgs/:org/users/:user", http(0, Method::GET));

        let found = router.matches("GET", "/orgs/acme/users/42", false);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].params, vec!["acme", "42"]);
    }

    #[test]
    fn test_priority_static_param_wildcard() {
        let mut router = Router::new();
        router.insert("/*", http(0, Method::GET));
        router.insert("/users/:id", http(1, Method::GET));
        router.insert("/users/me", http(2, Method::GET));

        let found = router.matches("GET", "/users/me", false);
        assert_eq!(ids(&found), vec![2, 1, 0]);
        assert_eq!(found[1].params, vec!["me"]);
    }

    #[test]
    fn test_wildcard_matches_empty_rest() {
        let mut router = Router::new();
        router.insert("/static/*", http(0, Method::GET));
        router.insert("/*", http(1, Method::GET));

        assert_eq!(ids(&router.matches("GET", "/static", false)), vec![0, 1]);
        assert_eq!(ids(&router.matches("GET", "/", false)), vec![1]);
        assert_eq!(ids(&router.matches("GET", "/static/css/site.css", false)), vec![0, 1]);
    }

    #[test]
    fn test_upgrade_only_matches_ws_routes() {
        let mut router = Router::new();
        router.insert("/chat", http(0, Method::GET));
        router.insert(
            "/chat",
            RouteEntry {
                id: RouteId(1),
                kind: RouteKind::Ws(WsRouteOptions::default()),
            },
        );

        assert_eq!(ids(&router.matches("GET", "/chat", false)), vec![0]);
        assert_eq!(ids(&router.matches("GET", "/chat", true)), vec![1]);
        assert_eq!(router.len(), 2);
    }

    #[test]
    fn test_any_method() {
        let mut router = Router::new();
        router.insert(
            "/any",
            RouteEntry {
                id: RouteId(0),
                kind: RouteKind::Http(MethodFilter::Any),
            },
        );
        assert_eq!(router.matches("DELETE", "/any", false).len(), 1);
    }
}
