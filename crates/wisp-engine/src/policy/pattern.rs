//! Wildcard patterns for thread-conversion rules
//!
//! `*` matches any run of characters (including none) and `?` matches
//! exactly one. Everything else matches itself. Patterns are compiled to an
//! anchored regex once, when the rule list is loaded.

use crate::error::PolicyError;
use regex::Regex;
use std::fmt;

/// A compiled wildcard pattern.
#[derive(Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Compile `glob`.
    pub fn compile(glob: &str) -> Result<Self, PolicyError> {
        if glob.is_empty() {
            return Err(PolicyError::EmptyPattern(glob.to_string()));
        }

        let mut expr = String::with_capacity(glob.len() * 2 + 6);
        expr.push_str("(?s)^");
        for ch in glob.chars() {
            match ch {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                c if c.is_whitespace() || c.is_control() => {
                    return Err(PolicyError::InvalidCharacter {
                        ch: c,
                        pattern: glob.to_string(),
                    });
                }
                c => {
                    let mut buf = [0u8; 4];
                    expr.push_str(&regex::escape(c.encode_utf8(&mut buf)));
                }
            }
        }
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| PolicyError::Regex {
            pattern: glob.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            source: glob.to_string(),
            regex,
        })
    }

    /// Whether the whole of `text` matches.
    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// The pattern as written
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.source).finish()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}
