use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// HTTP verbs understood by the route table, plus the special `Any` fallback.
///
/// # Behavior
/// `Any` can be registered like a verb but is only consulted when no
/// verb-specific chain matches the request. Incoming method names are
/// case-insensitive; they are stored and compared in their upper-cased form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Trace,
    Connect,
    Any,
}

impl Method {
    /// Parses a single verb token, ignoring ASCII case.
    ///
    /// # Returns
    /// `None` for anything that is not one of the fixed verbs or `ANY`.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        const TABLE: [(&str, Method); 10] = [
            ("GET", Method::Get),
            ("POST", Method::Post),
            ("PUT", Method::Put),
            ("DELETE", Method::Delete),
            ("PATCH", Method::Patch),
            ("HEAD", Method::Head),
            ("OPTIONS", Method::Options),
            ("TRACE", Method::Trace),
            ("CONNECT", Method::Connect),
            ("ANY", Method::Any),
        ];
        TABLE
            .iter()
            .find(|(name, _)| token.eq_ignore_ascii_case(name))
            .map(|(_, method)| *method)
    }

    /// Upper-cased name of the verb.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
            Method::Any => "ANY",
        }
    }

    pub const fn is_any(&self) -> bool {
        matches!(self, Method::Any)
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
