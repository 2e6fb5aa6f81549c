use super::pattern::{Pattern, PatternSegment, split_path};
use super::{ConfigError, ResolveError};
use crate::handler::Middleware;
use crate::method::Method;
use fnv::FnvBuildHasher;
use std::collections::HashMap;
use std::sync::Arc;

/// Ordered handler chain registered for one verb at one path.
///
/// The registrar guarantees the last entry is a normal-class handler: that
/// entry is the terminal handler of the route. Error-class entries mixed into
/// the chain run only once dispatch has switched to error mode.
pub(crate) struct RouteChain {
    entries: Vec<Middleware>,
}

impl RouteChain {
    pub(crate) fn new(entries: Vec<Middleware>) -> Self {
        Self { entries }
    }

    pub(crate) fn entries(&self) -> &[Middleware] {
        &self.entries
    }

    pub(crate) fn handler_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.name().to_string())
            .collect()
    }
}

struct ParamChild {
    name: String,
    node: RouteNode,
}

/// One path segment of the route table.
///
/// Typed children keep the matching precedence explicit: exact static first,
/// then the single parameter child, then the single wildcard child. A
/// wildcard child is always a leaf; the registrar rejects anything deeper.
struct RouteNode {
    static_children: HashMap<String, RouteNode, FnvBuildHasher>,
    param_child: Option<Box<ParamChild>>,
    wildcard_child: Option<Box<RouteNode>>,
    methods: HashMap<Method, Arc<RouteChain>, FnvBuildHasher>,
    pattern: Option<String>,
}

impl Default for RouteNode {
    fn default() -> Self {
        Self {
            static_children: HashMap::with_hasher(FnvBuildHasher::default()),
            param_child: None,
            wildcard_child: None,
            methods: HashMap::with_hasher(FnvBuildHasher::default()),
            pattern: None,
        }
    }
}

/// Successful resolver outcome: the matched chain plus everything a caller
/// may observe about the match.
pub struct RouteMatch {
    pub(crate) chain: Arc<RouteChain>,
    params: HashMap<String, String, FnvBuildHasher>,
    pattern: String,
    discard_body: bool,
}

impl RouteMatch {
    /// Parameter values bound while walking the trie. A wildcard remainder is
    /// bound under `*`.
    pub fn params(&self) -> &HashMap<String, String, FnvBuildHasher> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Canonical pattern string of the matched route.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// True when a `HEAD` request was answered with the `GET` chain; the
    /// finalizer discards the body in that case.
    pub fn discards_body(&self) -> bool {
        self.discard_body
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        Arc<RouteChain>,
        HashMap<String, String, FnvBuildHasher>,
        String,
        bool,
    ) {
        (self.chain, self.params, self.pattern, self.discard_body)
    }
}

/// The route table: a trie keyed by segment kind, built once during
/// registration and read-only for every dispatch afterwards.
pub(crate) struct RouteTable {
    root: RouteNode,
}

impl RouteTable {
    pub(crate) fn new() -> Self {
        Self {
            root: RouteNode::default(),
        }
    }

    /// Inserts a chain for one verb under a parsed pattern.
    ///
    /// Re-inserting the same verb and pattern overwrites the earlier chain.
    ///
    /// # Errors
    /// `ParamConflict` when a level already has a parameter child under a
    /// different name; two spellings of the same slot would be ambiguous.
    pub(crate) fn insert(
        &mut self,
        method: Method,
        pattern: &Pattern,
        chain: Arc<RouteChain>,
    ) -> Result<(), ConfigError> {
        let mut node = &mut self.root;
        for segment in pattern.segments() {
            match segment {
                PatternSegment::Static(literal) => {
                    node = node
                        .static_children
                        .entry(literal.clone())
                        .or_default();
                }
                PatternSegment::Param(name) => {
                    let child = node.param_child.get_or_insert_with(|| {
                        Box::new(ParamChild {
                            name: name.clone(),
                            node: RouteNode::default(),
                        })
                    });
                    if child.name != *name {
                        return Err(ConfigError::param_conflict(
                            pattern.canonical(),
                            &child.name,
                        ));
                    }
                    node = &mut child.node;
                }
                PatternSegment::Wildcard => {
                    // pattern parsing guarantees this is the final segment
                    node = node
                        .wildcard_child
                        .get_or_insert_with(Default::default)
                        .as_mut();
                }
            }
        }
        node.pattern = Some(pattern.canonical().to_string());
        log::trace!("inserted {} chain at '{}'", method, pattern.canonical());
        node.methods.insert(method, chain);
        Ok(())
    }

    /// Resolves a method and path to the best-matching chain.
    ///
    /// Walks the trie preferring, at each level, an exact static child, then
    /// the parameter child (binding the raw segment text), then the wildcard
    /// child (consuming the remainder). Wildcard ancestors passed on the way
    /// down are remembered; when the walk dead-ends, the deepest one recorded
    /// wins, so a wildcard under a more specific prefix always beats one
    /// under a shallower prefix.
    pub(crate) fn resolve(&self, method: Method, path: &str) -> Result<RouteMatch, ResolveError> {
        let segments: Vec<&str> = split_path(path).collect();

        let mut node = &self.root;
        // deepest wildcard ancestor passed during the walk:
        // (node, index of the first segment it would consume, params bound so far)
        let mut fallback: Option<(&RouteNode, usize, usize)> = None;
        let mut params: Vec<(&str, String)> = Vec::new();
        let mut dead_end = false;
        let mut index = 0;

        while index < segments.len() {
            if let Some(wildcard) = node.wildcard_child.as_deref() {
                if !wildcard.methods.is_empty() {
                    fallback = Some((wildcard, index, params.len()));
                }
            }
            let segment = segments[index];
            if let Some(child) = node.static_children.get(segment) {
                node = child;
            } else if let Some(child) = node.param_child.as_deref() {
                params.push((child.name.as_str(), segment.to_string()));
                node = &child.node;
            } else {
                dead_end = true;
                break;
            }
            index += 1;
        }

        // Candidate selection: the fully-consumed node if it is a terminal
        // match, else its own wildcard child (empty remainder), else the
        // deepest wildcard ancestor recorded during the walk.
        let mut candidate: Option<(&RouteNode, Option<String>)> = None;
        if !dead_end {
            if !node.methods.is_empty() {
                candidate = Some((node, None));
            } else if let Some(wildcard) = node.wildcard_child.as_deref() {
                if !wildcard.methods.is_empty() {
                    candidate = Some((wildcard, Some(String::new())));
                }
            }
        }
        let (candidate, wildcard_rest) = match candidate {
            Some(found) => found,
            None => match fallback {
                Some((wildcard, start, bound)) => {
                    params.truncate(bound);
                    (wildcard, Some(segments[start..].join("/")))
                }
                None => {
                    log::trace!("no node matches path '{path}'");
                    return Err(ResolveError::not_found(path));
                }
            },
        };

        let (chain, discard_body) = match candidate.methods.get(&method) {
            Some(chain) => (chain.clone(), false),
            None => {
                // HEAD reuses GET (body discarded later), then ANY
                if method == Method::Head {
                    if let Some(chain) = candidate.methods.get(&Method::Get) {
                        (chain.clone(), true)
                    } else if let Some(chain) = candidate.methods.get(&Method::Any) {
                        (chain.clone(), false)
                    } else {
                        return Err(ResolveError::method_not_allowed(method, path));
                    }
                } else if let Some(chain) = candidate.methods.get(&Method::Any) {
                    (chain.clone(), false)
                } else {
                    return Err(ResolveError::method_not_allowed(method, path));
                }
            }
        };

        let mut bound: HashMap<String, String, FnvBuildHasher> =
            HashMap::with_capacity_and_hasher(params.len() + 1, FnvBuildHasher::default());
        for (name, value) in params {
            bound.insert(name.to_string(), value);
        }
        if let Some(rest) = wildcard_rest {
            bound.insert("*".to_string(), rest);
        }

        let pattern = candidate.pattern.clone().unwrap_or_else(|| "/".to_string());
        log::trace!("resolved {method} '{path}' to pattern '{pattern}'");
        Ok(RouteMatch {
            chain,
            params: bound,
            pattern,
            discard_body,
        })
    }
}
