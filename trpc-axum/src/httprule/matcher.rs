//! Matching concrete paths against a [`PathTemplate`].

use std::collections::HashMap;
use std::ops::Range;

use trpc_axum_core::Pool;

use super::{PathTemplate, Segment};

/// Scratch buffers for component boundaries, reused across matches.
static COMPONENTS: Pool<Vec<Range<usize>>> = Pool::new();

/// Why a path did not match a template.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    /// The path does not match the template's segments.
    #[error("path does not match template")]
    NoMatch,
    /// The template has a verb the path does not end with.
    #[error("verb mismatch")]
    VerbMismatch,
}

struct MatchState<'a> {
    path: &'a str,
    components: &'a [Range<usize>],
    pos: usize,
    captures: HashMap<String, String>,
}

impl MatchState<'_> {
    fn match_segments(&mut self, segments: &[Segment]) -> bool {
        for seg in segments {
            match seg {
                Segment::Literal(lit) => {
                    if self.current() != Some(lit.as_str()) {
                        return false;
                    }
                    self.pos += 1;
                }
                Segment::Wildcard => {
                    if self.current().is_none_or(str::is_empty) {
                        return false;
                    }
                    self.pos += 1;
                }
                Segment::DeepWildcard => self.pos = self.components.len(),
                Segment::Variable(v) => {
                    let start = self.pos;
                    if !self.match_segments(&v.segments) {
                        return false;
                    }
                    let value = if start == self.pos {
                        ""
                    } else {
                        let from = self.components[start].start;
                        let to = self.components[self.pos - 1].end;
                        &self.path[from..to]
                    };
                    self.captures
                        .insert(v.field_path_string(), value.to_owned());
                }
            }
        }
        true
    }

    fn current(&self) -> Option<&str> {
        self.components
            .get(self.pos)
            .map(|r| &self.path[r.clone()])
    }
}

impl PathTemplate {
    /// Match `path` and return the captured values keyed by dot-joined field path.
    ///
    /// `path` must start with `/` and is expected to be percent-decoded
    /// already. A `**` capture that consumed nothing yields an empty string.
    pub fn match_path(&self, path: &str) -> Result<HashMap<String, String>, MatchError> {
        if !path.starts_with('/') {
            return Err(MatchError::NoMatch);
        }

        let mut end = path.len();
        if let Some(verb) = self.verb() {
            let stripped = path
                .strip_suffix(verb)
                .and_then(|p| p.strip_suffix(':'))
                .ok_or(MatchError::VerbMismatch)?;
            end = stripped.len();
        }

        let mut components = COMPONENTS.get_or_else(Vec::new);
        let mut start = 1;
        for (i, byte) in path.as_bytes()[..end].iter().enumerate().skip(1) {
            if *byte == b'/' {
                components.push(start..i);
                start = i + 1;
            }
        }
        components.push(start..end);

        let mut state = MatchState {
            path,
            components: &components,
            pos: 0,
            captures: HashMap::new(),
        };
        let matched = state.match_segments(self.segments()) && state.pos == components.len();
        let captures = state.captures;

        components.clear();
        COMPONENTS.put(components);

        if matched {
            Ok(captures)
        } else {
            Err(MatchError::NoMatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captures(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_match_simple_variables() {
        let tpl = PathTemplate::parse("/foobar/{foo}/bar/{baz}").unwrap();
        assert_eq!(
            tpl.match_path("/foobar/x/bar/y"),
            Ok(captures(&[("foo", "x"), ("baz", "y")]))
        );
    }

    #[test]
    fn test_match_deep_wildcard_empty_suffix() {
        let tpl = PathTemplate::parse("/foo/bar/{a=**}").unwrap();
        assert_eq!(tpl.match_path("/foo/bar"), Ok(captures(&[("a", "")])));
        assert_eq!(
            tpl.match_path("/foo/bar/x/y/z"),
            Ok(captures(&[("a", "x/y/z")]))
        );
    }

    #[test]
    fn test_match_multi_component_variable() {
        let tpl = PathTemplate::parse("/v1/{name=shelves/*/books/*}").unwrap();
        assert_eq!(
            tpl.match_path("/v1/shelves/1/books/2"),
            Ok(captures(&[("name", "shelves/1/books/2")]))
        );
        assert_eq!(
            tpl.match_path("/v1/shelves/1/novels/2"),
            Err(MatchError::NoMatch)
        );
    }

    #[test]
    fn test_match_requires_exact_length() {
        let tpl = PathTemplate::parse("/a/*").unwrap();
        assert_eq!(tpl.match_path("/a/b"), Ok(HashMap::new()));
        assert_eq!(tpl.match_path("/a/b/c"), Err(MatchError::NoMatch));
        assert_eq!(tpl.match_path("/a"), Err(MatchError::NoMatch));
        assert_eq!(tpl.match_path("/a/"), Err(MatchError::NoMatch));
        assert_eq!(tpl.match_path("a/b"), Err(MatchError::NoMatch));
    }

    #[test]
    fn test_match_verb() {
        let tpl = PathTemplate::parse("/v1/{name}:cancel").unwrap();
        assert_eq!(
            tpl.match_path("/v1/op-1:cancel"),
            Ok(captures(&[("name", "op-1")]))
        );
        assert_eq!(tpl.match_path("/v1/op-1"), Err(MatchError::VerbMismatch));
        assert_eq!(
            tpl.match_path("/v1/op-1:undo"),
            Err(MatchError::VerbMismatch)
        );
    }

    #[test]
    fn test_match_multi_colon_verb() {
        let tpl = PathTemplate::parse("/a/b/c:d:e:f:g").unwrap();
        assert_eq!(tpl.match_path("/a/b/c:d:e:f:g"), Ok(HashMap::new()));
        assert_eq!(tpl.match_path("/a/b/c:g"), Err(MatchError::VerbMismatch));
    }

    #[test]
    fn test_match_without_verb_rejects_colon_suffix() {
        let tpl = PathTemplate::parse("/v1/items").unwrap();
        assert_eq!(tpl.match_path("/v1/items:batch"), Err(MatchError::NoMatch));
    }

    #[test]
    fn test_match_is_deterministic() {
        let tpl = PathTemplate::parse("/v1/{a}/{b=x/**}").unwrap();
        let want = captures(&[("a", "1"), ("b", "x/2/3")]);
        for _ in 0..50 {
            assert_eq!(tpl.match_path("/v1/1/x/2/3"), Ok(want.clone()));
            assert_eq!(tpl.match_path("/v1/1/y/2/3"), Err(MatchError::NoMatch));
        }
    }
}
