//! Tokenizer for TaQL text.
//!
//! Keywords are not reserved: they come out as identifiers and the parser matches them
//! case-insensitively. Besides the usual numbers and strings the lexer recognizes the literal
//! forms TaQL adds: datetimes (`3Mar16/12:14:23.3`, `2016-03-02/1:4:23`), sexagesimal angles
//! (`2h13m44.5`, `30d13m44.4`, `30.13.44.4`), imaginary numbers (`2i`, `3.5j`), hexadecimal
//! integers and patterns (`p/glob/`, `f/regex/`, `m/regex/i`).

use crate::datetime::{parse_datetime, parse_sexagesimal};
use crate::error::{TaqlError, TaqlResult};
use crate::pattern::PatternKind;
use std::f64::consts::PI;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Token {
    Int(i64),
    Double(f64),
    /// Imaginary part of a complex literal.
    Imaginary(f64),
    Str(String),
    /// Modified Julian day.
    DateTime(f64),
    /// Angle in rad.
    Angle(f64),
    Pattern {
        source: String,
        kind: PatternKind,
        case_insensitive: bool,
    },
    Ident(String),
    Comma,
    Colon,
    Semicolon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Near,
    NotNear,
    Tilde,
    NotTilde,
    Bang,
    AndAnd,
    OrOr,
    Amp,
    Pipe,
    Caret,
    Eof,
}

/// A token with its byte span in the input. `glued` is set when no whitespace separates it
/// from the previous token, which is how unit suffixes (`10km`, `(a+b)deg`) are told apart.
#[derive(Clone, Debug)]
pub(crate) struct Spanned {
    pub token: Token,
    pub start: usize,
    pub end: usize,
    pub glued: bool,
}

pub(crate) struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    pub(crate) fn input(&self) -> &'a str {
        self.input
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn consume_while<F>(&mut self, mut predicate: F) -> &'a str
    where
        F: FnMut(char) -> bool,
    {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !predicate(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.input[start..self.pos]
    }

    fn skip_whitespace(&mut self) {
        self.consume_while(char::is_whitespace);
    }

    fn error(&self, message: impl Into<String>, start: usize) -> TaqlError {
        let near: String = self.input[start..].chars().take(16).collect();
        TaqlError::Parse {
            message: message.into(),
            near,
            prefix: self.input[..start].to_string(),
        }
    }

    pub(crate) fn next_token(&mut self) -> TaqlResult<Spanned> {
        let before = self.pos;
        self.skip_whitespace();
        let glued = self.pos == before && before > 0;
        let start = self.pos;
        let token = self.scan(start)?;
        Ok(Spanned {
            token,
            start,
            end: self.pos,
            glued,
        })
    }

    fn single(&mut self, token: Token) -> TaqlResult<Token> {
        self.bump();
        Ok(token)
    }

    /// Consumes `second` when it follows and returns `double`, else `single`.
    fn pair(&mut self, second: char, double: Token, single: Token) -> TaqlResult<Token> {
        self.bump();
        if self.peek() == Some(second) {
            self.bump();
            Ok(double)
        } else {
            Ok(single)
        }
    }

    fn scan(&mut self, start: usize) -> TaqlResult<Token> {
        let Some(ch) = self.peek() else {
            return Ok(Token::Eof);
        };
        match ch {
            '(' => self.single(Token::LParen),
            ')' => self.single(Token::RParen),
            '[' => self.single(Token::LBracket),
            ']' => self.single(Token::RBracket),
            '{' => self.single(Token::LBrace),
            '}' => self.single(Token::RBrace),
            ',' => self.single(Token::Comma),
            ';' => self.single(Token::Semicolon),
            '+' => self.single(Token::Plus),
            '-' => self.single(Token::Minus),
            '%' => self.single(Token::Percent),
            '^' => self.single(Token::Caret),
            ':' if self.peek_nth(1) == Some(':') && self.peek_nth(2).is_some_and(is_ident_start) => {
                Ok(self.identifier())
            }
            ':' => self.single(Token::Colon),
            '*' => self.pair('*', Token::StarStar, Token::Star),
            '/' => self.pair('/', Token::SlashSlash, Token::Slash),
            '&' => self.pair('&', Token::AndAnd, Token::Amp),
            '|' => self.pair('|', Token::OrOr, Token::Pipe),
            '=' => self.pair('=', Token::Eq, Token::Eq),
            '~' => self.pair('=', Token::Near, Token::Tilde),
            '<' => {
                self.bump();
                match self.peek() {
                    Some('=') => self.single(Token::Le),
                    Some('>') => self.single(Token::Ne),
                    _ => Ok(Token::Lt),
                }
            }
            '>' => self.pair('=', Token::Ge, Token::Gt),
            '!' => {
                self.bump();
                match (self.peek(), self.peek_nth(1)) {
                    (Some('='), _) => self.single(Token::Ne),
                    (Some('~'), Some('=')) => {
                        self.bump();
                        self.single(Token::NotNear)
                    }
                    (Some('~'), _) => self.single(Token::NotTilde),
                    _ => Ok(Token::Bang),
                }
            }
            '\'' | '"' => self.string(start),
            c if c.is_ascii_digit() || (c == '.' && self.peek_nth(1).is_some_and(|d| d.is_ascii_digit())) => {
                self.number(start)
            }
            'p' | 'f' | 'm' | 'P' | 'F' | 'M'
                if matches!(self.peek_nth(1), Some('/' | '%' | '@')) && self.pattern_closes() =>
            {
                self.pattern(start)
            }
            c if is_ident_start(c) => Ok(self.identifier()),
            other => Err(self.error(format!("unexpected character {other:?}"), start)),
        }
    }

    fn string(&mut self, start: usize) -> TaqlResult<Token> {
        let mut out = String::new();
        loop {
            let Some(quote) = self.bump() else {
                break;
            };
            loop {
                match self.bump() {
                    None => return Err(self.error("unterminated string", start)),
                    Some(c) if c == quote => break,
                    Some(c) => out.push(c),
                }
            }
            // Adjacent literals concatenate: 'abc' "def" is "abcdef".
            let save = self.pos;
            self.skip_whitespace();
            if !matches!(self.peek(), Some('\'' | '"')) {
                self.pos = save;
                break;
            }
        }
        Ok(Token::Str(out))
    }

    fn pattern_closes(&self) -> bool {
        let mut chars = self.rest().chars().skip(1);
        let Some(delim) = chars.next() else {
            return false;
        };
        chars.any(|c| c == delim)
    }

    fn pattern(&mut self, start: usize) -> TaqlResult<Token> {
        let kind = match self.bump().map(|c| c.to_ascii_lowercase()) {
            Some('p') => PatternKind::Glob,
            Some('f') => PatternKind::Full,
            _ => PatternKind::Partial,
        };
        let Some(delim) = self.bump() else {
            return Err(self.error("unterminated pattern", start));
        };
        let source = self.consume_while(|c| c != delim).to_string();
        if self.bump() != Some(delim) {
            return Err(self.error("unterminated pattern", start));
        }
        let case_insensitive =
            self.peek() == Some('i') && !self.peek_nth(1).is_some_and(is_ident_part);
        if case_insensitive {
            self.bump();
        }
        Ok(Token::Pattern {
            source,
            kind,
            case_insensitive,
        })
    }

    fn identifier(&mut self) -> Token {
        let start = self.pos;
        loop {
            self.consume_while(is_ident_part);
            if self.peek() == Some(':')
                && self.peek_nth(1) == Some(':')
                && self.peek_nth(2).is_some_and(is_ident_start)
            {
                self.pos += 2;
                continue;
            }
            break;
        }
        Token::Ident(self.input[start..self.pos].to_string())
    }

    fn number(&mut self, start: usize) -> TaqlResult<Token> {
        if let Some(len) = datetime_len(self.rest()) {
            let input = self.input;
            let text = &input[start..start + len];
            self.pos += len;
            let mjd = parse_datetime(text).map_err(|_| self.error("invalid datetime", start))?;
            return Ok(Token::DateTime(mjd));
        }
        if let Some(len) = sexagesimal_len(self.rest()) {
            let input = self.input;
            let text = &input[start..start + len];
            self.pos += len;
            let rad = parse_angle(text).ok_or_else(|| self.error("invalid angle", start))?;
            return Ok(Token::Angle(rad));
        }
        let rest = self.rest();
        if (rest.starts_with("0x") || rest.starts_with("0X"))
            && rest[2..].starts_with(|c: char| c.is_ascii_hexdigit())
        {
            self.pos += 2;
            let hex = self.consume_while(|c| c.is_ascii_hexdigit());
            let value = i64::from_str_radix(hex, 16)
                .map_err(|_| self.error("hexadecimal constant out of range", start))?;
            return Ok(Token::Int(value));
        }

        let mut real = false;
        self.consume_while(|c| c.is_ascii_digit());
        if self.peek() == Some('.') {
            real = true;
            self.bump();
            self.consume_while(|c| c.is_ascii_digit());
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let signed = matches!(self.peek_nth(1), Some('+' | '-'));
            let digit_at = if signed { 2 } else { 1 };
            if self.peek_nth(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                real = true;
                self.pos += digit_at;
                self.consume_while(|c| c.is_ascii_digit());
            }
        }
        let input = self.input;
        let text = &input[start..self.pos];
        if matches!(self.peek(), Some('i' | 'j')) && !self.peek_nth(1).is_some_and(is_ident_part) {
            self.bump();
            return text
                .parse()
                .map(Token::Imaginary)
                .map_err(|_| self.error(format!("invalid number {text:?}"), start));
        }
        let token = if real {
            text.parse().ok().map(Token::Double)
        } else {
            // Integers too large for 64 bits become reals.
            text.parse()
                .ok()
                .map(Token::Int)
                .or_else(|| text.parse().ok().map(Token::Double))
        };
        token.ok_or_else(|| self.error(format!("invalid number {text:?}"), start))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || c == '.'
}

fn digits(bytes: &[u8], from: usize) -> usize {
    bytes
        .get(from..)
        .map_or(0, |rest| rest.iter().take_while(|b| b.is_ascii_digit()).count())
}

/// Length of a datetime literal at the start of `text`: `YYYY-MM-DD` or `DDMonYY[YY]`,
/// optionally followed by `/hh[:mm[:ss.s]]`.
fn datetime_len(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let first = digits(bytes, 0);
    let mut pos = if first == 4 && bytes.get(4) == Some(&b'-') {
        let month = digits(bytes, 5);
        if !(1..=2).contains(&month) || bytes.get(5 + month) != Some(&b'-') {
            return None;
        }
        let day = digits(bytes, 6 + month);
        if !(1..=2).contains(&day) {
            return None;
        }
        6 + month + day
    } else if (1..=2).contains(&first) {
        let letters = bytes[first..]
            .iter()
            .take_while(|b| b.is_ascii_alphabetic())
            .count();
        if letters != 3 || !is_month(&text[first..first + 3]) {
            return None;
        }
        let year = digits(bytes, first + 3);
        if year != 2 && year != 4 {
            return None;
        }
        first + 3 + year
    } else {
        return None;
    };
    if bytes.get(pos) == Some(&b'/') && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit) {
        pos += 1;
        let mut fields = 0;
        loop {
            pos += digits(bytes, pos);
            fields += 1;
            if fields < 3 && bytes.get(pos) == Some(&b':') && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit) {
                pos += 1;
                continue;
            }
            break;
        }
        if bytes.get(pos) == Some(&b'.') {
            pos += 1;
            pos += digits(bytes, pos);
        }
    }
    Some(pos)
}

fn is_month(name: &str) -> bool {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    MONTHS.iter().any(|m| m.eq_ignore_ascii_case(name))
}

/// Length of `12h34m56.7`, `12d34m56.7` or `12.34.56.7` at the start of `text`.
fn sexagesimal_len(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let whole = digits(bytes, 0);
    if whole == 0 {
        return None;
    }
    match bytes.get(whole) {
        Some(b'h' | b'd') if bytes.get(whole + 1).is_some_and(u8::is_ascii_digit) => {
            let mut pos = whole + 1;
            pos += digits(bytes, pos);
            if bytes.get(pos) != Some(&b'm') {
                return None;
            }
            pos += 1;
            pos += digits(bytes, pos);
            if bytes.get(pos) == Some(&b'.') {
                pos += 1;
                pos += digits(bytes, pos);
            }
            Some(pos)
        }
        Some(b'.') => {
            let minutes = digits(bytes, whole + 1);
            let sep = whole + 1 + minutes;
            if minutes == 0 || bytes.get(sep) != Some(&b'.') {
                return None;
            }
            let seconds = digits(bytes, sep + 1);
            if seconds == 0 {
                return None;
            }
            let mut pos = sep + 1 + seconds;
            if bytes.get(pos) == Some(&b'.') {
                pos += 1;
                pos += digits(bytes, pos);
            }
            Some(pos)
        }
        _ => None,
    }
}

fn parse_angle(text: &str) -> Option<f64> {
    if text.contains(['h', 'd']) {
        return parse_sexagesimal(text).ok();
    }
    let mut parts = text.splitn(3, '.');
    let degrees: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    Some((degrees + minutes / 60.0 + seconds / 3600.0) * PI / 180.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(text: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(text);
        let mut out = Vec::new();
        loop {
            let t = lexer.next_token().unwrap().token;
            if t == Token::Eof {
                return out;
            }
            out.push(t);
        }
    }

    #[test]
    fn operators_and_numbers() {
        assert_eq!(
            tokens("a**2 // 3 != 0x1F"),
            vec![
                Token::Ident("a".into()),
                Token::StarStar,
                Token::Int(2),
                Token::SlashSlash,
                Token::Int(3),
                Token::Ne,
                Token::Int(31),
            ]
        );
        assert_eq!(tokens("1.5e3 2i"), vec![Token::Double(1500.0), Token::Imaginary(2.0)]);
        assert_eq!(tokens("a !~= b <> c"), vec![
            Token::Ident("a".into()),
            Token::NotNear,
            Token::Ident("b".into()),
            Token::Ne,
            Token::Ident("c".into()),
        ]);
    }

    #[test]
    fn strings_concatenate() {
        assert_eq!(tokens("'ab' \"cd\""), vec![Token::Str("abcd".into())]);
    }

    #[test]
    fn datetimes_and_angles() {
        let [Token::DateTime(a)] = tokens("3Mar16/12:14:23.3")[..] else {
            panic!("expected a datetime");
        };
        let [Token::DateTime(b)] = tokens("2016-03-03/12:14:23.3")[..] else {
            panic!("expected a datetime");
        };
        assert!((a - b).abs() < 1e-9);
        let [Token::Angle(rad)] = tokens("30d30m0")[..] else {
            panic!("expected an angle");
        };
        assert!((rad - 30.5f64.to_radians()).abs() < 1e-12);
        let [Token::Angle(rad)] = tokens("30.30.0")[..] else {
            panic!("expected an angle");
        };
        assert!((rad - 30.5f64.to_radians()).abs() < 1e-12);
    }

    #[test]
    fn patterns_and_keywords() {
        assert_eq!(
            tokens("name ~ p/a*/i"),
            vec![
                Token::Ident("name".into()),
                Token::Tilde,
                Token::Pattern {
                    source: "a*".into(),
                    kind: PatternKind::Glob,
                    case_insensitive: true
                },
            ]
        );
        assert_eq!(tokens("col::unit"), vec![Token::Ident("col::unit".into())]);
        assert_eq!(tokens("1:5"), vec![Token::Int(1), Token::Colon, Token::Int(5)]);
    }
}
