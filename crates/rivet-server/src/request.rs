//! Pooled request wrappers.
//!
//! A [`Request`] reads through to the native request handle. Headers and
//! cookies are materialized on first use and cached for the rest of the
//! request. [`Request::preserve`] copies everything into an owned
//! [`RequestSnapshot`] that survives the wrapper.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use rivet_core::extension::{Extensible, Extensions};
use rivet_core::pool::{Poolable, Pooled};
use rivet_core::transport::{NativeRequest, Token};

use crate::cookie::CookieJar;

/// Per-request state of a pooled request wrapper.
#[derive(Default)]
pub struct RequestState {
    native: Option<Rc<dyn NativeRequest>>,
    headers: Option<Rc<HashMap<String, String>>>,
    cookies: Option<Rc<CookieJar>>,
    extensions: Extensions<Request>,
}

impl Poolable for RequestState {
    type Native = dyn NativeRequest;
    type Handle = Request;

    fn detached() -> Self {
        Self::default()
    }

    fn bind(&mut self, native: Rc<dyn NativeRequest>) {
        self.native = Some(native);
    }

    fn reset(&mut self) {
        self.native = None;
        self.headers = None;
        self.cookies = None;
    }

    fn extensions_mut(&mut self) -> &mut Extensions<Request> {
        &mut self.extensions
    }
}

/// An incoming HTTP request.
///
/// Cheap to clone. Once the request is finished the wrapper goes back to
/// its pool and every accessor returns an empty value.
#[derive(Clone)]
pub struct Request {
    handle: Pooled<RequestState>,
}

impl Request {
    pub(crate) fn from_handle(handle: Pooled<RequestState>) -> Self {
        Self { handle }
    }

    pub(crate) fn handle(&self) -> &Pooled<RequestState> {
        &self.handle
    }

    fn native(&self) -> Option<Rc<dyn NativeRequest>> {
        self.handle.with(|state| state.native.clone()).flatten()
    }

    /// Engine token of this wrapper.
    pub fn token(&self) -> Token {
        self.handle.token()
    }

    /// `true` until the request is finished.
    pub fn is_live(&self) -> bool {
        self.handle.is_live()
    }

    /// Upper-case method name.
    pub fn method(&self) -> String {
        self.native().map(|n| n.method()).unwrap_or_default()
    }

    /// Path without the query string.
    pub fn url(&self) -> String {
        self.native().map(|n| n.url()).unwrap_or_default()
    }

    /// Path plus `?query` when a query string is present.
    pub fn full_url(&self) -> String {
        let Some(native) = self.native() else {
            return String::new();
        };
        let query = native.query_string();
        if query.is_empty() {
            native.url()
        } else {
            format!("{}?{}", native.url(), query)
        }
    }

    /// Raw query string without the leading `?`.
    pub fn query_string(&self) -> String {
        self.native().map(|n| n.query_string()).unwrap_or_default()
    }

    /// Decoded value of one query parameter.
    pub fn query(&self, key: &str) -> Option<String> {
        self.native()?.query(key)
    }

    /// Every query parameter, percent-decoded, in arrival order per key.
    pub fn queries(&self) -> HashMap<String, Vec<String>> {
        parse_queries(&self.query_string())
    }

    /// Route parameter by position.
    pub fn parameter(&self, index: usize) -> Option<String> {
        self.native()?.parameter(index)
    }

    /// All route parameters in pattern order.
    pub fn parameters(&self) -> Vec<String> {
        let Some(native) = self.native() else {
            return Vec::new();
        };
        (0..).map_while(|i| native.parameter(i)).collect()
    }

    /// Header by name, case-insensitive. The first occurrence wins.
    pub fn header(&self, name: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        if let Some(headers) = self.handle.with(|state| state.headers.clone()).flatten() {
            return headers.get(&name).cloned();
        }
        self.native()?.header(&name)
    }

    /// Every header, keyed by lower-case name.
    pub fn headers(&self) -> HashMap<String, String> {
        self.header_map().map(|h| (*h).clone()).unwrap_or_default()
    }

    /// Visits every header in arrival order, duplicates included.
    pub fn for_each_header(&self, mut visit: impl FnMut(&str, &str)) {
        if let Some(native) = self.native() {
            native.for_each_header(&mut visit);
        }
    }

    fn header_map(&self) -> Option<Rc<HashMap<String, String>>> {
        if let Some(headers) = self.handle.with(|state| state.headers.clone()).flatten() {
            return Some(headers);
        }
        let native = self.native()?;
        let mut headers = HashMap::new();
        native.for_each_header(&mut |name, value| {
            headers
                .entry(name.to_ascii_lowercase())
                .or_insert_with(|| value.to_string());
        });
        let headers = Rc::new(headers);
        self.handle
            .with_mut(|state| state.headers = Some(Rc::clone(&headers)));
        Some(headers)
    }

    /// Cookie sent by the client.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookie_jar()?.get(name).map(str::to_string)
    }

    fn cookie_jar(&self) -> Option<Rc<CookieJar>> {
        if let Some(jar) = self.handle.with(|state| state.cookies.clone()).flatten() {
            return Some(jar);
        }
        let jar = Rc::new(
            self.header("cookie")
                .map(|raw| CookieJar::parse(&raw))
                .unwrap_or_default(),
        );
        self.handle.with_mut(|state| state.cookies = Some(Rc::clone(&jar)))?;
        Some(jar)
    }

    /// Lets the engine try the next matching route after this handler.
    pub fn set_yield(&self, yield_to_next: bool) -> &Self {
        if let Some(native) = self.native() {
            native.set_yield(yield_to_next);
        }
        self
    }

    /// The current fall-through flag.
    pub fn get_yield(&self) -> bool {
        self.native().is_some_and(|n| n.get_yield())
    }

    /// `true` for HTTP/1.0 peers.
    pub fn is_ancient(&self) -> bool {
        self.native().is_some_and(|n| n.is_ancient())
    }

    /// Copies everything readable into an owned snapshot.
    ///
    /// Returns `None` once the request is finished.
    pub fn preserve(&self) -> Option<RequestSnapshot> {
        let native = self.native()?;
        let headers = self.header_map()?;
        let cookies = self.cookie_jar()?;
        let parameters = (0..).map_while(|i| native.parameter(i)).collect();
        let query_string = native.query_string();
        Some(RequestSnapshot {
            method: native.method(),
            url: native.url(),
            queries: parse_queries(&query_string),
            query_string,
            parameters,
            headers: (*headers).clone(),
            cookies: (*cookies).clone(),
        })
    }
}

impl Extensible for Request {
    fn with_extensions<R>(&self, f: impl FnOnce(&mut Extensions<Self>) -> R) -> Option<R> {
        self.handle.with_mut(|state| f(&mut state.extensions))
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("token", &self.token())
            .field("method", &self.method())
            .field("url", &self.url())
            .finish()
    }
}

/// Owned copy of a request, independent of the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestSnapshot {
    method: String,
    url: String,
    query_string: String,
    queries: HashMap<String, Vec<String>>,
    parameters: Vec<String>,
    headers: HashMap<String, String>,
    cookies: CookieJar,
}

impl RequestSnapshot {
    /// Upper-case method name.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Path without the query string.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Path plus `?query` when a query string is present.
    pub fn full_url(&self) -> String {
        if self.query_string.is_empty() {
            self.url.clone()
        } else {
            format!("{}?{}", self.url, self.query_string)
        }
    }

    /// Raw query string.
    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    /// First value of a query parameter.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.queries.get(key)?.first().map(String::as_str)
    }

    /// Every query parameter.
    pub fn queries(&self) -> &HashMap<String, Vec<String>> {
        &self.queries
    }

    /// Route parameter by position.
    pub fn parameter(&self, index: usize) -> Option<&str> {
        self.parameters.get(index).map(String::as_str)
    }

    /// All route parameters.
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// Header by name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Every header, keyed by lower-case name.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Cookie sent by the client.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name)
    }
}

fn parse_queries(query_string: &str) -> HashMap<String, Vec<String>> {
    let pairs: Vec<(String, String)> =
        serde_urlencoded::from_str(query_string).unwrap_or_default();
    let mut queries: HashMap<String, Vec<String>> = HashMap::new();
    for (key, value) in pairs {
        queries.entry(key).or_default().push(value);
    }
    queries
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivet_core::pool::Pool;
    use std::cell::Cell;

    struct FakeRequest {
        headers: Vec<(&'static str, &'static str)>,
        query: &'static str,
        params: Vec<&'static str>,
        header_walks: Cell<u32>,
    }

    impl FakeRequest {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                headers: vec![
                    ("Host", "example.com"),
                    ("X-Trace", "first"),
                    ("x-trace", "second"),
                    ("Cookie", "session=abc; theme=dark%20blue"),
                ],
                query: "a=1&b=two%20words&a=3",
                params: vec!["42", "edit"],
                header_walks: Cell::new(0),
            })
        }
    }

    impl NativeRequest for FakeRequest {
        fn method(&self) -> String {
            "GET".to_string()
        }
        fn url(&self) -> String {
            "/users/42/edit".to_string()
        }
        fn query_string(&self) -> String {
            self.query.to_string()
        }
        fn query(&self, key: &str) -> Option<String> {
            parse_queries(self.query).get(key)?.first().cloned()
        }
        fn parameter(&self, index: usize) -> Option<String> {
            self.params.get(index).map(|p| (*p).to_string())
        }
        fn header(&self, name: &str) -> Option<String> {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| (*v).to_string())
        }
        fn for_each_header(&self, visit: &mut dyn FnMut(&str, &str)) {
            self.header_walks.set(self.header_walks.get() + 1);
            for (k, v) in &self.headers {
                visit(k, v);
            }
        }
        fn set_yield(&self, _yield_to_next: bool) {}
        fn get_yield(&self) -> bool {
            false
        }
        fn is_ancient(&self) -> bool {
            false
        }
    }

    fn acquire(pool: &Pool<RequestState>, native: Rc<FakeRequest>) -> Request {
        Request::from_handle(pool.acquire(native))
    }

    #[test]
    fn test_request_line_accessors() {
        let pool = Pool::new("request", 1);
        let req = acquire(&pool, FakeRequest::new());

        assert_eq!(req.method(), "GET");
        assert_eq!(req.url(), "/users/42/edit");
        assert_eq!(req.full_url(), "/users/42/edit?a=1&b=two%20words&a=3");
        assert_eq!(req.parameter(0).as_deref(), Some("42"));
        assert_eq!(req.parameters(), vec!["42", "edit"]);
    }

    #[test]
    fn test_queries_are_multi_valued_and_decoded() {
        let pool = Pool::new("request", 1);
        let req = acquire(&pool, FakeRequest::new());

        let queries = req.queries();
        assert_eq!(queries["a"], vec!["1", "3"]);
        assert_eq!(queries["b"], vec!["two words"]);
        assert_eq!(req.query("a").as_deref(), Some("1"));
    }

    #[test]
    fn test_headers_lowercase_first_wins_and_cached() {
        let pool = Pool::new("request", 1);
        let native = FakeRequest::new();
        let req = acquire(&pool, Rc::clone(&native));

        let headers = req.headers();
        assert_eq!(headers.get("x-trace").map(String::as_str), Some("first"));
        assert_eq!(headers.get("host").map(String::as_str), Some("example.com"));
        let _ = req.headers();
        assert_eq!(req.header("X-TRACE").as_deref(), Some("first"));
        assert_eq!(native.header_walks.get(), 1);
    }

    #[test]
    fn test_cookies_parsed_lazily() {
        let pool = Pool::new("request", 1);
        let req = acquire(&pool, FakeRequest::new());

        assert_eq!(req.cookie("session").as_deref(), Some("abc"));
        assert_eq!(req.cookie("theme").as_deref(), Some("dark blue"));
        assert_eq!(req.cookie("missing"), None);
    }

    #[test]
    fn test_released_request_reads_empty() {
        let pool = Pool::new("request", 1);
        let req = acquire(&pool, FakeRequest::new());
        let _ = req.headers();
        assert!(pool.release(req.handle()));

        assert!(!req.is_live());
        assert_eq!(req.method(), "");
        assert!(req.header("host").is_none());
        assert!(req.preserve().is_none());

        let next = acquire(&pool, FakeRequest::new());
        assert!(next.handle.with(|s| s.headers.is_none()).unwrap_or(false));
    }

    #[test]
    fn test_preserve_outlives_release() {
        let pool = Pool::new("request", 1);
        let req = acquire(&pool, FakeRequest::new());
        let snapshot = req.preserve().unwrap();
        pool.release(req.handle());

        assert_eq!(snapshot.method(), "GET");
        assert_eq!(snapshot.header("Host"), Some("example.com"));
        assert_eq!(snapshot.query("b"), Some("two words"));
        assert_eq!(snapshot.parameter(1), Some("edit"));
        assert_eq!(snapshot.cookie("session"), Some("abc"));
        assert_eq!(snapshot.full_url(), "/users/42/edit?a=1&b=two%20words&a=3");
    }
}
