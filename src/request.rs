use crate::method::Method;
use std::collections::HashMap;

/// Canonical request snapshot handed to the engine by the host's transport
/// layer.
///
/// # Behavior
/// The engine never parses raw transport events itself; whatever normalized
/// the event is expected to provide a method, a `/`-delimited path, headers,
/// query parameters and a body. Header names are stored lower-cased so the
/// lookup is case-insensitive. A trailing slash on the path is tolerated and
/// normalized away during resolution (except for the root).
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    headers: HashMap<String, String>,
    query: HashMap<String, String>,
    body: Vec<u8>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HashMap::new(),
            query: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_ignores_case() {
        let request = Request::new(Method::Get, "/status").with_header("X-Trace-Id", "abc123");
        assert_eq!(request.header("x-trace-id"), Some("abc123"));
        assert_eq!(request.header("X-TRACE-ID"), Some("abc123"));
        assert_eq!(request.header("x-other"), None);
    }

    #[test]
    fn builder_keeps_body_and_query() {
        let request = Request::new(Method::Post, "/items")
            .with_query("page", "2")
            .with_body("payload");
        assert_eq!(request.query("page"), Some("2"));
        assert_eq!(request.body(), b"payload");
    }
}
