//! Regular expressions as TaQL values: `p/glob/`, `f/regex/`, `m/regex/` and SQL patterns.

use crate::error::{TaqlError, TaqlResult};
use regex::{Regex, RegexBuilder};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatternKind {
    /// Shell-style glob, matched against the whole string.
    Glob,
    /// Regular expression matched against the whole string.
    Full,
    /// Regular expression matched anywhere in the string.
    Partial,
    /// SQL `LIKE` pattern (`%` and `_`).
    Sql,
}

/// A compiled pattern. Equality compares the source text, kind and case flag.
#[derive(Clone, Debug)]
pub struct TaqlRegex {
    source: String,
    kind: PatternKind,
    case_insensitive: bool,
    regex: Regex,
}

impl PartialEq for TaqlRegex {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
            && self.kind == other.kind
            && self.case_insensitive == other.case_insensitive
    }
}

impl TaqlRegex {
    pub fn new(source: &str, kind: PatternKind, case_insensitive: bool) -> TaqlResult<Self> {
        let expr = match kind {
            PatternKind::Glob => format!("^(?:{})$", glob_to_regex(source)),
            PatternKind::Full => format!("^(?:{source})$"),
            PatternKind::Partial => source.to_string(),
            PatternKind::Sql => format!("^(?:{})$", sql_to_regex(source)),
        };
        let regex = RegexBuilder::new(&expr)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|err| TaqlError::type_error(format!("invalid pattern {source:?}: {err}")))?;
        Ok(Self {
            source: source.to_string(),
            kind,
            case_insensitive,
            regex,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    /// Replaces every match in `text`; used by `replace(str, regex, replacement)`.
    pub(crate) fn replace_all(&self, text: &str, replacement: &str) -> String {
        let unanchored = match self.kind {
            PatternKind::Partial => None,
            PatternKind::Full => Regex::new(&self.source).ok(),
            PatternKind::Glob => Regex::new(&glob_to_regex(&self.source)).ok(),
            PatternKind::Sql => Regex::new(&sql_to_regex(&self.source)).ok(),
        };
        let regex = unanchored.as_ref().unwrap_or(&self.regex);
        regex.replace_all(text, regex::NoExpand(replacement)).into_owned()
    }
}

impl fmt::Display for TaqlRegex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            PatternKind::Glob => "p",
            PatternKind::Full => "f",
            PatternKind::Partial => "m",
            PatternKind::Sql => "sql",
        };
        write!(f, "{prefix}/{}/", self.source)?;
        if self.case_insensitive {
            f.write_str("i")?;
        }
        Ok(())
    }
}

/// Translates a glob (`*`, `?`, `[...]`, `{a,b}`) into regex syntax.
pub fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2);
    let mut chars = glob.chars().peekable();
    let mut braces = 0usize;
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    out.push('^');
                }
                for c in chars.by_ref() {
                    if c == '\\' {
                        out.push_str("\\\\");
                        continue;
                    }
                    out.push(c);
                    if c == ']' {
                        break;
                    }
                }
            }
            '{' => {
                braces += 1;
                out.push_str("(?:");
            }
            ',' if braces > 0 => out.push('|'),
            '}' if braces > 0 => {
                braces -= 1;
                out.push(')');
            }
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push_str(&regex::escape(&next.to_string()));
                }
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out
}

/// Translates an SQL pattern (`%` any run, `_` any character) into regex syntax.
pub fn sql_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    for c in pattern.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_patterns() {
        let regex = TaqlRegex::new("CS*", PatternKind::Glob, false).unwrap();
        assert!(regex.is_match("CS001"));
        assert!(!regex.is_match("RS001"));
        let braces = TaqlRegex::new("{a,b}?.ms", PatternKind::Glob, false).unwrap();
        assert!(braces.is_match("a1.ms"));
        assert!(!braces.is_match("c1.ms"));
        assert!(!braces.is_match("a1xms"));
    }

    #[test]
    fn sql_and_partial() {
        let like = TaqlRegex::new("ab%_z", PatternKind::Sql, true).unwrap();
        assert!(like.is_match("ABcdZ"));
        assert!(!like.is_match("abz"));
        let partial = TaqlRegex::new("b+", PatternKind::Partial, false).unwrap();
        assert!(partial.is_match("abbc"));
        assert_eq!(partial.replace_all("abbc", "-"), "a-c");
    }
}
