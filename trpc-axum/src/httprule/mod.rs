//! HTTP rule path templates.
//!
//! Parses URL templates in the `google.api.http` syntax and matches concrete
//! paths against them:
//!
//! ```text
//! Template = "/" Segments [ Verb ] ;
//! Segments = Segment { "/" Segment } ;
//! Segment  = "*" | "**" | LITERAL | Variable ;
//! Variable = "{" FieldPath [ "=" Segments ] "}" ;
//! FieldPath = IDENT { "." IDENT } ;
//! Verb     = ":" LITERAL ;
//! ```
//!
//! # Example
//!
//! ```
//! use trpc_axum::httprule::PathTemplate;
//!
//! let tpl: PathTemplate = "/v1/{name=shelves/*}/books:list".parse().unwrap();
//! let captures = tpl.match_path("/v1/shelves/7/books:list").unwrap();
//! assert_eq!(captures["name"], "shelves/7");
//! ```

mod matcher;
mod parser;

use std::fmt;
use std::str::FromStr;

pub use matcher::MatchError;

/// One segment of a path template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    /// `*`: exactly one path component.
    Wildcard,
    /// `**`: every remaining path component, possibly none.
    DeepWildcard,
    /// A literal path component.
    Literal(String),
    /// `{field.path=segments}`: captures what its segments consume.
    Variable(Variable),
}

/// A capturing variable segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variable {
    /// Field path components, e.g. `["book", "name"]` for `{book.name}`.
    pub field_path: Vec<String>,
    /// Nested segments; a single [`Segment::Wildcard`] when not written.
    pub segments: Vec<Segment>,
}

impl Variable {
    /// The dot-joined field path.
    pub fn field_path_string(&self) -> String {
        self.field_path.join(".")
    }
}

/// A parsed, validated path template. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathTemplate {
    segments: Vec<Segment>,
    verb: Option<String>,
}

/// Errors produced while parsing a template.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HttpRuleError {
    /// The template does not follow the grammar.
    #[error("invalid path template at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    /// A variable contains another variable.
    #[error("nested variable in {0}")]
    NestedVariable(String),

    /// `**` appears somewhere other than the end of the template.
    #[error("'**' must be the last segment")]
    DeepWildcardNotLast,

    /// Two variables bind the same field path.
    #[error("duplicate field path {0}")]
    DuplicateFieldPath(String),
}

impl PathTemplate {
    /// Parse and validate a template.
    pub fn parse(template: &str) -> Result<Self, HttpRuleError> {
        let (segments, verb) = parser::Parser::new(template).parse()?;
        let tpl = PathTemplate { segments, verb };
        tpl.validate()?;
        Ok(tpl)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn verb(&self) -> Option<&str> {
        self.verb.as_deref()
    }

    /// Field paths of every variable, in template order.
    pub fn field_paths(&self) -> impl Iterator<Item = &[String]> {
        self.segments.iter().filter_map(|seg| match seg {
            Segment::Variable(v) => Some(v.field_path.as_slice()),
            _ => None,
        })
    }

    fn validate(&self) -> Result<(), HttpRuleError> {
        let mut seen = std::collections::HashSet::new();
        for seg in &self.segments {
            if let Segment::Variable(v) = seg {
                if v.segments.iter().any(|s| matches!(s, Segment::Variable(_))) {
                    return Err(HttpRuleError::NestedVariable(v.field_path_string()));
                }
                let path = v.field_path_string();
                if !seen.insert(path.clone()) {
                    return Err(HttpRuleError::DuplicateFieldPath(path));
                }
            }
        }

        // `**` may only be the last segment once variables are flattened.
        let flat: Vec<&Segment> = self
            .segments
            .iter()
            .flat_map(|seg| match seg {
                Segment::Variable(v) => v.segments.iter().collect::<Vec<_>>(),
                other => vec![other],
            })
            .collect();
        let last = flat.len().saturating_sub(1);
        if flat
            .iter()
            .enumerate()
            .any(|(i, s)| matches!(s, Segment::DeepWildcard) && i != last)
        {
            return Err(HttpRuleError::DeepWildcardNotLast);
        }
        Ok(())
    }
}

impl FromStr for PathTemplate {
    type Err = HttpRuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PathTemplate::parse(s)
    }
}

fn write_segments(f: &mut fmt::Formatter<'_>, segments: &[Segment]) -> fmt::Result {
    for (i, seg) in segments.iter().enumerate() {
        if i > 0 {
            f.write_str("/")?;
        }
        match seg {
            Segment::Wildcard => f.write_str("*")?,
            Segment::DeepWildcard => f.write_str("**")?,
            Segment::Literal(lit) => f.write_str(lit)?,
            Segment::Variable(v) => {
                write!(f, "{{{}", v.field_path_string())?;
                if v.segments != [Segment::Wildcard] {
                    f.write_str("=")?;
                    write_segments(f, &v.segments)?;
                }
                f.write_str("}")?;
            }
        }
    }
    Ok(())
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("/")?;
        write_segments(f, &self.segments)?;
        if let Some(verb) = &self.verb {
            write!(f, ":{verb}")?;
        }
        Ok(())
    }
}
