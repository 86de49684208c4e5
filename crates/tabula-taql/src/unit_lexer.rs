//! Normalizes non-standard unit spellings (as found in FITS headers and old data sets) into
//! unit strings [`Unit::parse`] understands: `DEG` becomes `deg`, `JY/BEAM` becomes
//! `Jy/beam`, `M**2` becomes `m2`.
//!
//! The scanner has two states: it accumulates the letters of one symbol, then flushes the
//! separators and exponents that follow it unchanged.

use crate::error::{TaqlError, TaqlResult};
use crate::units::{is_unit, Unit};
use log::trace;

/// How to read the ambiguous single letters `D`, `H` and `S`.
///
/// By default they keep their SI meaning (debye, henry, siemens); a set flag reads them as
/// day, hour and second instead.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UnitSpellingFlags {
    pub d_is_day: bool,
    pub h_is_hour: bool,
    pub s_is_second: bool,
}

const SPELLINGS: &[(&str, &str)] = &[
    ("DEG", "deg"),
    ("DEGREE", "deg"),
    ("DEGREES", "deg"),
    ("ARCMIN", "arcmin"),
    ("ARCMINUTE", "arcmin"),
    ("ARCSEC", "arcsec"),
    ("ARCSECOND", "arcsec"),
    ("MAS", "mas"),
    ("RAD", "rad"),
    ("RADIAN", "rad"),
    ("RADIANS", "rad"),
    ("SR", "sr"),
    ("STERADIAN", "sr"),
    ("HZ", "Hz"),
    ("HERTZ", "Hz"),
    ("KHZ", "kHz"),
    ("MHZ", "MHz"),
    ("GHZ", "GHz"),
    ("JY", "Jy"),
    ("JANSKY", "Jy"),
    ("KELVIN", "K"),
    ("M", "m"),
    ("METER", "m"),
    ("METRE", "m"),
    ("METERS", "m"),
    ("KM", "km"),
    ("CM", "cm"),
    ("MM", "mm"),
    ("SEC", "s"),
    ("SECOND", "s"),
    ("SECONDS", "s"),
    ("MIN", "min"),
    ("MINUTE", "min"),
    ("MINUTES", "min"),
    ("HR", "h"),
    ("HOUR", "h"),
    ("HOURS", "h"),
    ("DAY", "d"),
    ("DAYS", "d"),
    ("YR", "yr"),
    ("YEAR", "yr"),
    ("YEARS", "yr"),
    ("BEAM", "beam"),
    ("PIXEL", "pixel"),
    ("PIXELS", "pixel"),
    ("PIX", "pixel"),
    ("COUNT", "count"),
    ("COUNTS", "count"),
    ("CT", "count"),
    ("VOLT", "V"),
    ("VOLTS", "V"),
    ("WATT", "W"),
    ("WATTS", "W"),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LexState {
    Accumulate,
    Flush,
}

fn canonical_symbol(symbol: &str, flags: UnitSpellingFlags) -> TaqlResult<String> {
    let mapped = match symbol {
        "D" if flags.d_is_day => Some("d"),
        "H" if flags.h_is_hour => Some("h"),
        "S" if flags.s_is_second => Some("s"),
        _ => None,
    };
    if let Some(mapped) = mapped {
        return Ok(mapped.to_string());
    }
    if is_unit(symbol) {
        return Ok(symbol.to_string());
    }
    let upper = symbol.to_ascii_uppercase();
    SPELLINGS
        .iter()
        .find(|(spelling, _)| *spelling == upper)
        .map(|(_, canonical)| canonical.to_string())
        .ok_or_else(|| TaqlError::Unit(format!("unknown unit spelling {symbol:?}")))
}

/// Rewrites `text` into canonical unit syntax.
pub fn normalize_unit(text: &str, flags: UnitSpellingFlags) -> TaqlResult<String> {
    let mut out = String::with_capacity(text.len());
    let mut symbol = String::new();
    let mut state = LexState::Flush;
    let mut chars = text.trim().chars().peekable();
    while let Some(c) = chars.next() {
        let is_symbol_char = c.is_alphabetic() || c == '_' || c == '%';
        match (state, is_symbol_char) {
            (_, true) => {
                state = LexState::Accumulate;
                symbol.push(c);
            }
            (LexState::Accumulate, false) => {
                out.push_str(&canonical_symbol(&symbol, flags)?);
                symbol.clear();
                state = LexState::Flush;
                flush_char(c, &mut chars, &mut out);
            }
            (LexState::Flush, false) => flush_char(c, &mut chars, &mut out),
        }
    }
    if state == LexState::Accumulate {
        out.push_str(&canonical_symbol(&symbol, flags)?);
    }
    trace!("normalized unit {text:?} to {out:?}");
    Ok(out)
}

fn flush_char(c: char, chars: &mut std::iter::Peekable<std::str::Chars<'_>>, out: &mut String) {
    match c {
        // FITS writes powers as `**`.
        '*' if chars.peek() == Some(&'*') => {
            chars.next();
        }
        c if c.is_whitespace() => {
            if !out.ends_with(' ') && !out.is_empty() {
                out.push(' ');
            }
        }
        c => out.push(c),
    }
}

/// Normalizes and parses in one step.
pub fn parse_unit_spelling(text: &str, flags: UnitSpellingFlags) -> TaqlResult<Unit> {
    Unit::parse(&normalize_unit(text, flags)?)
}
