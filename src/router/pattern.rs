use super::ConfigError;
use std::fmt::{Display, Formatter};

/// One `/`-delimited token of a path pattern.
///
/// # Behavior
/// - `Static` must match the request segment exactly.
/// - `Param` matches any single segment and binds its raw text under a name.
///   Written as `:name` in pattern strings.
/// - `Wildcard` consumes the remainder of the path (possibly empty) as one
///   value. Written as `*` and only valid as the final segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PatternSegment {
    Static(String),
    Param(String),
    Wildcard,
}

impl Display for PatternSegment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternSegment::Static(literal) => write!(f, "{literal}"),
            PatternSegment::Param(name) => write!(f, ":{name}"),
            PatternSegment::Wildcard => write!(f, "*"),
        }
    }
}

/// A parsed path pattern: the canonical string plus its typed segments.
#[derive(Debug, Clone)]
pub(crate) struct Pattern {
    canonical: String,
    segments: Vec<PatternSegment>,
}

impl Pattern {
    /// Parses a pattern string.
    ///
    /// # Errors
    /// - `WildcardPosition` if `*` is followed by further segments.
    /// - `InvalidPath` for a parameter marker with no name (`:`).
    pub(crate) fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut segments = Vec::new();
        for token in split_path(raw) {
            if matches!(segments.last(), Some(PatternSegment::Wildcard)) {
                return Err(ConfigError::wildcard_position(raw));
            }
            if token == "*" {
                segments.push(PatternSegment::Wildcard);
            } else if let Some(name) = token.strip_prefix(':') {
                if name.is_empty() {
                    return Err(ConfigError::invalid_path(raw, "parameter segment has no name"));
                }
                segments.push(PatternSegment::Param(name.to_string()));
            } else {
                segments.push(PatternSegment::Static(token.to_string()));
            }
        }
        let canonical = render(&segments);
        Ok(Self {
            canonical,
            segments,
        })
    }

    /// Canonical form of the pattern: single slashes, no trailing slash
    /// except for the root.
    pub(crate) fn canonical(&self) -> &str {
        &self.canonical
    }

    pub(crate) fn segments(&self) -> &[PatternSegment] {
        &self.segments
    }

    /// Whether this pattern matches the whole of `path`.
    ///
    /// Used by the scoped-middleware filter, which scans an ordered list
    /// instead of the trie because several overlapping scopes may all match
    /// one request.
    pub(crate) fn matches(&self, path: &str) -> bool {
        let segments: Vec<&str> = split_path(path).collect();
        match_segments(&self.segments, &segments)
    }
}

fn render(segments: &[PatternSegment]) -> String {
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut out = String::new();
    for segment in segments {
        out.push('/');
        out.push_str(&segment.to_string());
    }
    out
}

/// Splits a path into non-empty segments. Leading, trailing and duplicate
/// slashes all collapse, which is how the trailing-slash normalization of
/// request paths happens.
pub(crate) fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Pure segment matcher shared by pattern matching and tests.
pub(crate) fn match_segments(pattern: &[PatternSegment], path: &[&str]) -> bool {
    let mut index = 0;
    for segment in pattern {
        match segment {
            PatternSegment::Wildcard => return true,
            PatternSegment::Param(_) => {
                if index >= path.len() {
                    return false;
                }
                index += 1;
            }
            PatternSegment::Static(literal) => {
                if path.get(index).is_none_or(|s| *s != literal.as_str()) {
                    return false;
                }
                index += 1;
            }
        }
    }
    index == path.len()
}
