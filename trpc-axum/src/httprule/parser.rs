//! Recursive-descent parser for path templates.
//!
//! Single left-to-right pass, no backtracking. Errors carry the byte offset
//! at which parsing stopped.

use super::{HttpRuleError, Segment, Variable};

pub(super) struct Parser<'a> {
    input: &'a [u8],
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    pub(super) fn new(src: &'a str) -> Self {
        Self {
            input: src.as_bytes(),
            src,
            pos: 0,
        }
    }

    /// Parse a whole template into its segments and verb.
    pub(super) fn parse(mut self) -> Result<(Vec<Segment>, Option<String>), HttpRuleError> {
        self.expect(b'/')?;
        let mut segments = self.segments()?;

        let mut verb = None;
        if self.peek() == Some(b':') {
            self.pos += 1;
            verb = Some(self.literal()?);
        }
        if self.pos != self.input.len() {
            return Err(self.error("unexpected character"));
        }

        // A trailing literal swallows any `:` as pchar; split the verb out of it.
        if verb.is_none() {
            if let Some(Segment::Literal(lit)) = segments.last_mut() {
                if let Some(idx) = lit.find(':') {
                    let tail = lit.split_off(idx);
                    let tail = &tail[1..];
                    if lit.is_empty() || tail.is_empty() {
                        return Err(HttpRuleError::Syntax {
                            offset: self.src.len(),
                            message: "empty literal or verb".into(),
                        });
                    }
                    verb = Some(tail.to_owned());
                }
            }
        }

        Ok((segments, verb))
    }

    fn segments(&mut self) -> Result<Vec<Segment>, HttpRuleError> {
        let mut segments = vec![self.segment()?];
        while self.peek() == Some(b'/') {
            self.pos += 1;
            segments.push(self.segment()?);
        }
        Ok(segments)
    }

    fn segment(&mut self) -> Result<Segment, HttpRuleError> {
        match self.peek() {
            Some(b'*') => {
                self.pos += 1;
                if self.peek() == Some(b'*') {
                    self.pos += 1;
                    Ok(Segment::DeepWildcard)
                } else {
                    Ok(Segment::Wildcard)
                }
            }
            Some(b'{') => self.variable().map(Segment::Variable),
            _ => self.literal().map(Segment::Literal),
        }
    }

    fn variable(&mut self) -> Result<Variable, HttpRuleError> {
        self.expect(b'{')?;
        let field_path = self.field_path()?;
        let segments = if self.peek() == Some(b'=') {
            self.pos += 1;
            self.segments()?
        } else {
            vec![Segment::Wildcard]
        };
        self.expect(b'}')?;
        Ok(Variable {
            field_path,
            segments,
        })
    }

    fn field_path(&mut self) -> Result<Vec<String>, HttpRuleError> {
        let mut path = vec![self.ident()?];
        while self.peek() == Some(b'.') {
            self.pos += 1;
            path.push(self.ident()?);
        }
        Ok(path)
    }

    fn ident(&mut self) -> Result<String, HttpRuleError> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => self.pos += 1,
            _ => return Err(self.error("expected identifier")),
        }
        while let Some(c) = self.peek() {
            if !(c.is_ascii_alphanumeric() || c == b'_') {
                break;
            }
            self.pos += 1;
        }
        Ok(self.src[start..self.pos].to_owned())
    }

    /// One or more pchars (RFC 3986), `%XX` escapes included.
    fn literal(&mut self) -> Result<String, HttpRuleError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b'%' {
                let hex = self.input.get(self.pos + 1..self.pos + 3);
                if !hex.is_some_and(|h| h.iter().all(u8::is_ascii_hexdigit)) {
                    return Err(self.error("invalid percent-encoding"));
                }
                self.pos += 3;
            } else if is_pchar(c) {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.error("expected literal"));
        }
        Ok(self.src[start..self.pos].to_owned())
    }

    fn expect(&mut self, want: u8) -> Result<(), HttpRuleError> {
        if self.peek() != Some(want) {
            return Err(self.error(&format!("expected '{}'", want as char)));
        }
        self.pos += 1;
        Ok(())
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn error(&self, message: &str) -> HttpRuleError {
        HttpRuleError::Syntax {
            offset: self.pos,
            message: message.to_owned(),
        }
    }
}

/// `unreserved / sub-delims / ":" / "@"`; `*` only counts inside a literal.
fn is_pchar(c: u8) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            b'-' | b'.'
                | b'_'
                | b'~'
                | b'!'
                | b'$'
                | b'&'
                | b'\''
                | b'('
                | b')'
                | b'*'
                | b'+'
                | b','
                | b';'
                | b'='
                | b':'
                | b'@'
        )
}
