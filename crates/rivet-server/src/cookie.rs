//! Request cookie jar and `Set-Cookie` serialization.
//!
//! # Example
//!
//! ```rust
//! use rivet_server::cookie::{CookieJar, CookieOptions, SameSite, SetCookie};
//!
//! let jar = CookieJar::parse("session=abc123; theme=dark");
//! assert_eq!(jar.get("session"), Some("abc123"));
//!
//! let cookie = SetCookie::new(
//!     "session",
//!     "a b",
//!     CookieOptions::new()
//!         .http_only(true)
//!         .same_site(SameSite::Strict)
//!         .max_age(3600)
//!         .path("/"),
//! );
//! let header = cookie.to_header_value();
//! assert!(header.starts_with("session=a%20b"));
//! assert!(header.contains("HttpOnly"));
//! assert!(header.contains("SameSite=Strict"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

/// Cookies sent by the client, parsed from the `Cookie` header.
///
/// Values are percent-decoded. When a name repeats, the first occurrence
/// wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: HashMap<String, String>,
}

impl CookieJar {
    /// Create an empty jar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse cookies from a `Cookie` header value.
    pub fn parse(header_value: &str) -> Self {
        let mut cookies = HashMap::new();

        for cookie in header_value.split(';') {
            let cookie = cookie.trim();
            if let Some((name, value)) = cookie.split_once('=') {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                // Remove surrounding quotes if present
                let value = value.trim().trim_matches('"');
                let value = urlencoding::decode(value)
                    .map_or_else(|_| value.to_string(), |v| v.into_owned());
                cookies.entry(name.to_string()).or_insert(value);
            }
        }

        Self { cookies }
    }

    /// Get a cookie value by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Check if a cookie exists.
    pub fn contains(&self, name: &str) -> bool {
        self.cookies.contains_key(name)
    }

    /// Get all cookie names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.cookies.keys().map(String::as_str)
    }

    /// Get an iterator over all cookies.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cookies.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Get the number of cookies.
    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    /// Check if there are no cookies.
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SameSite {
    /// Cookie is sent with cross-site requests.
    None,
    /// Cookie is sent with same-site and cross-site top-level navigations.
    #[default]
    Lax,
    /// Cookie is only sent with same-site requests.
    Strict,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Lax => write!(f, "Lax"),
            Self::Strict => write!(f, "Strict"),
        }
    }
}

/// Attributes of an outgoing cookie.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[must_use]
pub struct CookieOptions {
    domain: Option<String>,
    path: Option<String>,
    max_age: Option<u64>,
    expires: Option<SystemTime>,
    secure: bool,
    http_only: bool,
    same_site: Option<SameSite>,
}

impl CookieOptions {
    /// No attributes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the Domain attribute.
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set the Path attribute.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the Max-Age attribute in seconds.
    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Set the Expires attribute. Rendered as an HTTP date.
    pub fn expires(mut self, at: SystemTime) -> Self {
        self.expires = Some(at);
        self
    }

    /// Set the Secure attribute.
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Set the `HttpOnly` attribute.
    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Set the `SameSite` attribute.
    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }
}

/// One pending `Set-Cookie` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    name: String,
    value: String,
    options: CookieOptions,
}

impl SetCookie {
    /// Creates a cookie. The value is percent-encoded when serialized.
    pub fn new(name: impl Into<String>, value: impl Into<String>, options: CookieOptions) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            options,
        }
    }

    /// A cookie that tells the client to delete `name` (Max-Age=0).
    pub fn remove(name: impl Into<String>) -> Self {
        Self::new(name, "", CookieOptions::new().max_age(0))
    }

    /// Get the cookie name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the unencoded cookie value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Convert to a `Set-Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let opts = &self.options;
        let mut parts = vec![format!("{}={}", self.name, urlencoding::encode(&self.value))];

        if let Some(ref domain) = opts.domain {
            parts.push(format!("Domain={domain}"));
        }

        if let Some(ref path) = opts.path {
            parts.push(format!("Path={path}"));
        }

        if let Some(max_age) = opts.max_age {
            parts.push(format!("Max-Age={max_age}"));
        }

        if let Some(expires) = opts.expires {
            parts.push(format!("Expires={}", httpdate::fmt_http_date(expires)));
        }

        if opts.secure {
            parts.push("Secure".to_string());
        }

        if opts.http_only {
            parts.push("HttpOnly".to_string());
        }

        if let Some(same_site) = opts.same_site {
            parts.push(format!("SameSite={same_site}"));
        }

        parts.join("; ")
    }
}

/// Cookies set on a response that have not been written yet.
///
/// Setting the same name twice keeps only the latest value.
#[derive(Debug, Clone, Default)]
pub(crate) struct PendingCookies {
    cookies: Vec<SetCookie>,
}

impl PendingCookies {
    pub(crate) fn set(&mut self, cookie: SetCookie) {
        match self.cookies.iter_mut().find(|c| c.name == cookie.name) {
            Some(existing) => *existing = cookie,
            None => self.cookies.push(cookie),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Empties the jar, returning one header value per cookie.
    pub(crate) fn take_header_values(&mut self) -> Vec<String> {
        self.cookies
            .drain(..)
            .map(|cookie| cookie.to_header_value())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_parse_single_cookie() {
        let jar = CookieJar::parse("session=abc123");
        assert_eq!(jar.get("session"), Some("abc123"));
        assert_eq!(jar.len(), 1);
    }

    #[test]
    fn test_parse_multiple_cookies() {
        let jar = CookieJar::parse("session=abc123; theme=dark; lang=en");
        assert_eq!(jar.get("session"), Some("abc123"));
        assert_eq!(jar.get("theme"), Some("dark"));
        assert_eq!(jar.get("lang"), Some("en"));
        assert_eq!(jar.len(), 3);
    }

    #[test]
    fn test_parse_cookie_with_spaces() {
        let jar = CookieJar::parse("  session  =  abc123  ");
        assert_eq!(jar.get("session"), Some("abc123"));
    }

    #[test]
    fn test_parse_quoted_and_encoded_values() {
        let jar = CookieJar::parse("name=\"John Doe\"; city=New%20York");
        assert_eq!(jar.get("name"), Some("John Doe"));
        assert_eq!(jar.get("city"), Some("New York"));
    }

    #[test]
    fn test_first_duplicate_wins() {
        let jar = CookieJar::parse("a=1; a=2");
        assert_eq!(jar.get("a"), Some("1"));
    }

    #[test]
    fn test_malformed_pairs_skipped() {
        let jar = CookieJar::parse("novalue; =orphan; ok=1");
        assert_eq!(jar.len(), 1);
        assert!(jar.contains("ok"));
        assert!(CookieJar::parse("").is_empty());
    }

    #[test]
    fn test_set_cookie_simple() {
        let cookie = SetCookie::new("session", "abc123", CookieOptions::new());
        assert_eq!(cookie.to_header_value(), "session=abc123");
    }

    #[test]
    fn test_set_cookie_full() {
        let cookie = SetCookie::new(
            "session",
            "abc123",
            CookieOptions::new()
                .domain("example.com")
                .path("/app")
                .max_age(3600)
                .expires(UNIX_EPOCH + Duration::from_secs(784_111_777))
                .secure(true)
                .http_only(true)
                .same_site(SameSite::Strict),
        );

        let header = cookie.to_header_value();
        assert!(header.contains("session=abc123"));
        assert!(header.contains("Domain=example.com"));
        assert!(header.contains("Path=/app"));
        assert!(header.contains("Max-Age=3600"));
        assert!(header.contains("Expires=Sun, 06 Nov 1994 08:49:37 GMT"));
        assert!(header.contains("Secure"));
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("SameSite=Strict"));
    }

    #[test]
    fn test_set_cookie_remove() {
        let header = SetCookie::remove("session").to_header_value();
        assert!(header.contains("session="));
        assert!(header.contains("Max-Age=0"));
    }

    #[test]
    fn test_pending_cookies_replace_by_name() {
        let mut pending = PendingCookies::default();
        pending.set(SetCookie::new("a", "1", CookieOptions::new()));
        pending.set(SetCookie::new("b", "2", CookieOptions::new()));
        pending.set(SetCookie::new("a", "3", CookieOptions::new()));

        assert_eq!(pending.take_header_values(), vec!["a=3", "b=2"]);
        assert!(pending.is_empty());
    }
}
