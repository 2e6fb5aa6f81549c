use crate::method::Method;
use crate::request::Request;
use crate::response::Response;
use fnv::FnvBuildHasher;
use std::collections::HashMap;
use uuid::Uuid;

/// Per-invocation execution context.
///
/// # Behavior
/// One exchange is created at the start of an invocation, owned exclusively by
/// that dispatch, and consumed when the final response is emitted. It carries
/// the request snapshot, the response accumulator, the parameters bound during
/// route resolution and the matched route pattern. The pattern and parameters
/// are read-only so samplers and loggers can match against the logical route
/// rather than the literal path.
pub struct Exchange {
    uuid: Uuid,
    request: Request,
    response: Response,
    params: HashMap<String, String, FnvBuildHasher>,
    route_pattern: Option<String>,
    cold_start: bool,
}

impl Exchange {
    pub(crate) fn new(request: Request) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            request,
            response: Response::new(),
            params: HashMap::with_hasher(FnvBuildHasher::default()),
            route_pattern: None,
            cold_start: false,
        }
    }

    /// Unique id of this invocation, used to correlate log lines.
    pub fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn method(&self) -> Method {
        self.request.method()
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// Value bound to a named parameter of the matched pattern. The remainder
    /// consumed by a wildcard segment is bound under `*`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String, FnvBuildHasher> {
        &self.params
    }

    /// Pattern string of the matched route, if resolution succeeded.
    pub fn route_pattern(&self) -> Option<&str> {
        self.route_pattern.as_deref()
    }

    /// True exactly for the first invocation dispatched by a router instance.
    pub fn cold_start(&self) -> bool {
        self.cold_start
    }

    pub(crate) fn set_cold_start(&mut self, cold_start: bool) {
        self.cold_start = cold_start;
    }

    pub(crate) fn set_route(
        &mut self,
        pattern: String,
        params: HashMap<String, String, FnvBuildHasher>,
    ) {
        self.route_pattern = Some(pattern);
        self.params = params;
    }

    pub(crate) fn into_response(self) -> Response {
        self.response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_exchange_has_no_route_info() {
        let exchange = Exchange::new(Request::new(Method::Get, "/x"));
        assert!(exchange.route_pattern().is_none());
        assert!(exchange.params().is_empty());
        assert!(!exchange.cold_start());
        assert_eq!(exchange.response().status(), 200);
    }

    #[test]
    fn route_info_is_readable_after_binding() {
        let mut exchange = Exchange::new(Request::new(Method::Get, "/users/42"));
        let mut params = HashMap::with_hasher(FnvBuildHasher::default());
        params.insert("id".to_string(), "42".to_string());
        exchange.set_route("/users/:id".to_string(), params);

        assert_eq!(exchange.route_pattern(), Some("/users/:id"));
        assert_eq!(exchange.param("id"), Some("42"));
        assert_eq!(exchange.param("missing"), None);
    }
}
