//! Compiled path patterns.
//!
//! # Responsibilities
//! - Anchor patterns with `^` and `$`
//! - Compile the pattern once at registration
//! - Derive the reverse format and capture-group count
//! - Build a fresh handler for every matched request

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::handler::{Params, PathArgs, RequestHandler};
use crate::routing::RouteError;

/// Builds a zero-state handler for one request.
pub type HandlerFactory = Arc<dyn Fn() -> Box<dyn RequestHandler> + Send + Sync>;

/// One piece of a reverse format.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder,
}

/// A path pattern with its capture groups replaced by placeholders.
///
/// `/user/([0-9]+)/([a-z]+)/` becomes `/user/%s/%s/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseFormat {
    segments: Vec<Segment>,
}

impl ReverseFormat {
    /// Number of placeholders in the format.
    pub fn placeholders(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Placeholder))
            .count()
    }

    fn fill(&self, args: &[&str]) -> String {
        let mut out = String::new();
        let mut args = args.iter();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder => {
                    if let Some(arg) = args.next() {
                        out.push_str(arg);
                    }
                }
            }
        }
        out
    }
}

impl fmt::Display for ReverseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => f.write_str(text)?,
                Segment::Placeholder => f.write_str("%s")?,
            }
        }
        Ok(())
    }
}

/// A path pattern bound to a handler type.
pub struct Route {
    pattern: String,
    regex: Regex,
    factory: HandlerFactory,
    name: Option<String>,
    params: Params,
    reverse: Option<ReverseFormat>,
    group_count: usize,
}

impl Route {
    /// Compile a route whose handler is `H::default()`.
    pub fn new<H>(pattern: &str, params: Params, name: Option<&str>) -> Result<Self, RouteError>
    where
        H: RequestHandler + Default,
    {
        let factory: HandlerFactory = Arc::new(|| Box::new(H::default()) as Box<dyn RequestHandler>);
        Self::compile(pattern, factory, name, params)
    }

    /// Compile a route from an explicit handler factory.
    pub fn compile(
        pattern: &str,
        factory: HandlerFactory,
        name: Option<&str>,
        params: Params,
    ) -> Result<Self, RouteError> {
        let pattern = anchor(pattern);
        let regex = Regex::new(&pattern).map_err(|source| RouteError::InvalidPattern {
            pattern: pattern.clone(),
            source,
        })?;
        let (reverse, group_count) = find_groups(&pattern, &regex);
        if reverse.is_none() {
            tracing::debug!(pattern = %pattern, "route pattern is not reversible");
        }

        Ok(Self {
            pattern,
            regex,
            factory,
            name: name.filter(|n| !n.is_empty()).map(str::to_string),
            params,
            reverse,
            group_count,
        })
    }

    /// The anchored pattern string.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Per-route configuration handed to `initialize`.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Capture groups usable by `reverse` (0 when not reversible).
    pub fn group_count(&self) -> usize {
        self.group_count
    }

    pub fn reverse_format(&self) -> Option<&ReverseFormat> {
        self.reverse.as_ref()
    }

    pub fn is_reversible(&self) -> bool {
        self.reverse.is_some()
    }

    /// Match the whole path, returning the captured groups in order.
    ///
    /// Optional groups that did not participate yield empty strings.
    pub fn captures(&self, path: &str) -> Option<PathArgs> {
        let caps = self.regex.captures(path)?;
        let args = caps
            .iter()
            .skip(1)
            .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
            .collect();
        Some(PathArgs::new(args))
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// A new handler value for one request.
    pub fn instantiate(&self) -> Box<dyn RequestHandler> {
        (self.factory)()
    }

    /// Substitute `args` for the capture groups of the pattern.
    pub fn reverse(&self, args: &[&str]) -> Result<String, RouteError> {
        let format = self
            .reverse
            .as_ref()
            .ok_or_else(|| RouteError::NotReversible(self.pattern.clone()))?;
        if args.len() != self.group_count {
            return Err(RouteError::ArgumentCount {
                expected: self.group_count,
                actual: args.len(),
            });
        }
        Ok(format.fill(args))
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern)
            .field("name", &self.name)
            .field("group_count", &self.group_count)
            .field("reverse", &self.reverse.as_ref().map(ToString::to_string))
            .finish_non_exhaustive()
    }
}

/// Shorthand for [`Route::new`] with the argument order of the registration API.
pub fn add_route<H>(pattern: &str, params: Params, name: Option<&str>) -> Result<Route, RouteError>
where
    H: RequestHandler + Default,
{
    Route::new::<H>(pattern, params, name)
}

fn anchor(pattern: &str) -> String {
    let mut anchored = String::with_capacity(pattern.len() + 2);
    if !pattern.starts_with('^') {
        anchored.push('^');
    }
    anchored.push_str(pattern);
    if !pattern.ends_with('$') {
        anchored.push('$');
    }
    anchored
}

/// Reverse format and group count for an anchored pattern.
///
/// Patterns whose literal `(` count differs from the number of capture
/// groups (escaped parens, non-capturing or nested groups) are reported as
/// not reversible.
fn find_groups(pattern: &str, regex: &Regex) -> (Option<ReverseFormat>, usize) {
    let body = pattern.strip_prefix('^').unwrap_or(pattern);
    let body = body.strip_suffix('$').unwrap_or(body);

    let groups = regex.captures_len() - 1;
    if body.matches('(').count() != groups {
        return (None, 0);
    }

    let mut segments = Vec::new();
    for (i, fragment) in body.split('(').enumerate() {
        match fragment.find(')') {
            Some(close) if i > 0 => {
                segments.push(Segment::Placeholder);
                push_literal(&mut segments, &fragment[close + 1..]);
            }
            _ => push_literal(&mut segments, fragment),
        }
    }
    (Some(ReverseFormat { segments }), groups)
}

fn push_literal(segments: &mut Vec<Segment>, text: &str) {
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::EmptyHandler;

    fn route(pattern: &str) -> Route {
        Route::new::<EmptyHandler>(pattern, Params::new(), None).unwrap()
    }

    #[test]
    fn test_pattern_is_anchored() {
        assert_eq!(route("/user/([0-9]+)").pattern(), "^/user/([0-9]+)$");
        assert_eq!(route("^/already$").pattern(), "^/already$");
    }

    #[test]
    fn test_match_is_full_string() {
        let r = route("/user/([0-9]+)");
        assert!(r.is_match("/user/42"));
        assert!(!r.is_match("/user/42/extra"));
        assert!(!r.is_match("/prefix/user/42"));
    }

    #[test]
    fn test_reverse_format() {
        let r = route("/user/([0-9]+)/([a-z]+)/");
        assert_eq!(r.group_count(), 2);
        assert_eq!(r.reverse_format().unwrap().to_string(), "/user/%s/%s/");
        assert_eq!(r.reverse(&["42", "profile"]).unwrap(), "/user/42/profile/");
    }

    #[test]
    fn test_zero_group_reverse_returns_literal_path() {
        let r = route("/about");
        assert_eq!(r.group_count(), 0);
        assert_eq!(r.reverse(&[]).unwrap(), "/about");
    }

    #[test]
    fn test_argument_count_mismatch() {
        let r = route("/user/([0-9]+)");
        let err = r.reverse(&["1", "2"]).unwrap_err();
        assert!(matches!(err, RouteError::ArgumentCount { expected: 1, actual: 2 }));
    }

    #[test]
    fn test_nested_groups_disable_reverse_but_not_matching() {
        let r = route(r"/a/((?:x|y)+)");
        assert!(!r.is_reversible());
        assert_eq!(r.group_count(), 0);
        assert!(matches!(r.reverse(&["x"]), Err(RouteError::NotReversible(_))));
        assert!(r.is_match("/a/xyx"));
    }

    #[test]
    fn test_escaped_paren_disables_reverse() {
        let r = route(r"/f\(x\)");
        assert!(!r.is_reversible());
        assert!(r.is_match("/f(x)"));
    }

    #[test]
    fn test_captures_in_order() {
        let r = route("/user/([0-9]+)/([a-z]+)/");
        let args = r.captures("/user/42/profile/").unwrap();
        assert_eq!(args.as_slice(), ["42".to_string(), "profile".to_string()]);
    }

    #[test]
    fn test_unmatched_optional_group_is_empty() {
        let r = route("/items(/[0-9]+)?");
        let args = r.captures("/items").unwrap();
        assert_eq!(args.as_slice(), [String::new()]);
    }

    #[test]
    fn test_invalid_pattern() {
        let err = Route::new::<EmptyHandler>("/broken(", Params::new(), None).unwrap_err();
        assert!(matches!(err, RouteError::InvalidPattern { .. }));
    }

    #[test]
    fn test_round_trip() {
        let r = route("/archive/([0-9]{4})/([a-z-]+)");
        let url = r.reverse(&["2024", "hello-world"]).unwrap();
        let args = r.captures(&url).unwrap();
        assert_eq!(args.as_slice(), ["2024".to_string(), "hello-world".to_string()]);
    }
}
