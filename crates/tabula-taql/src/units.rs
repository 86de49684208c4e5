//! Physical units attached to literals and columns.
//!
//! A unit is a scale factor relative to SI plus the exponents of the base dimensions. Angles
//! and solid angles count as dimensions so that `deg` converts to `rad` but not to a plain
//! number.

use crate::error::{TaqlError, TaqlResult};
use std::f64::consts::PI;
use std::fmt;
use std::sync::OnceLock;

const NDIM: usize = 9;
type Dims = [i8; NDIM];

// m kg s A K cd mol rad sr
const NONE: Dims = [0; NDIM];
const M: Dims = [1, 0, 0, 0, 0, 0, 0, 0, 0];
const KG: Dims = [0, 1, 0, 0, 0, 0, 0, 0, 0];
const S: Dims = [0, 0, 1, 0, 0, 0, 0, 0, 0];
const A: Dims = [0, 0, 0, 1, 0, 0, 0, 0, 0];
const K: Dims = [0, 0, 0, 0, 1, 0, 0, 0, 0];
const CD: Dims = [0, 0, 0, 0, 0, 1, 0, 0, 0];
const MOL: Dims = [0, 0, 0, 0, 0, 0, 1, 0, 0];
const RAD: Dims = [0, 0, 0, 0, 0, 0, 0, 1, 0];
const SR: Dims = [0, 0, 0, 0, 0, 0, 0, 0, 1];
const HZ: Dims = [0, 0, -1, 0, 0, 0, 0, 0, 0];
const NEWTON: Dims = [1, 1, -2, 0, 0, 0, 0, 0, 0];
const JOULE: Dims = [2, 1, -2, 0, 0, 0, 0, 0, 0];
const WATT: Dims = [2, 1, -3, 0, 0, 0, 0, 0, 0];
const PASCAL: Dims = [-1, 1, -2, 0, 0, 0, 0, 0, 0];
const COULOMB: Dims = [0, 0, 1, 1, 0, 0, 0, 0, 0];
const VOLT: Dims = [2, 1, -3, -1, 0, 0, 0, 0, 0];
const FARAD: Dims = [-2, -1, 4, 2, 0, 0, 0, 0, 0];
const OHM: Dims = [2, 1, -3, -2, 0, 0, 0, 0, 0];
const SIEMENS: Dims = [-2, -1, 3, 2, 0, 0, 0, 0, 0];
const WEBER: Dims = [2, 1, -2, -1, 0, 0, 0, 0, 0];
const TESLA: Dims = [0, 1, -2, -1, 0, 0, 0, 0, 0];
const HENRY: Dims = [2, 1, -2, -2, 0, 0, 0, 0, 0];
const LUMEN: Dims = [0, 0, 0, 0, 0, 1, 0, 0, 1];
const LUX: Dims = [-2, 0, 0, 0, 0, 1, 0, 0, 1];
const GRAY: Dims = [2, 0, -2, 0, 0, 0, 0, 0, 0];
const AREA: Dims = [2, 0, 0, 0, 0, 0, 0, 0, 0];
const VOLUME: Dims = [3, 0, 0, 0, 0, 0, 0, 0, 0];
const SPEED: Dims = [1, 0, -1, 0, 0, 0, 0, 0, 0];
const ACCEL: Dims = [1, 0, -2, 0, 0, 0, 0, 0, 0];
const FLUX_DENSITY: Dims = [0, 1, -2, 0, 0, 0, 0, 0, 0];
const KINEMATIC_VISCOSITY: Dims = [2, 0, -1, 0, 0, 0, 0, 0, 0];
const FIELD_STRENGTH: Dims = [-1, 0, 0, 1, 0, 0, 0, 0, 0];
const EXPOSURE: Dims = [0, -1, 1, 1, 0, 0, 0, 0, 0];
const LUMINANCE: Dims = [-2, 0, 0, 0, 0, 1, 0, 0, 0];
const DIPOLE: Dims = [1, 0, 1, 1, 0, 0, 0, 0, 0];

const DEG: f64 = PI / 180.0;
const DAY: f64 = 86400.0;
const YEAR: f64 = 365.25 * DAY;
const AU: f64 = 1.495_978_707e11;
const LIGHT_YEAR: f64 = 9.460_730_472_580_8e15;
const PARSEC: f64 = 3.085_677_581_491_367e16;

/// Unit symbols with their factor to SI and dimensions. Checked before prefix splitting so
/// that e.g. `min`, `Pa` and `Gal` are not read as prefixed units.
const UNITS: &[(&str, f64, Dims)] = &[
    ("m", 1.0, M),
    ("kg", 1.0, KG),
    ("g", 1e-3, KG),
    ("s", 1.0, S),
    ("A", 1.0, A),
    ("K", 1.0, K),
    ("cd", 1.0, CD),
    ("mol", 1.0, MOL),
    ("rad", 1.0, RAD),
    ("sr", 1.0, SR),
    ("Hz", 1.0, HZ),
    ("N", 1.0, NEWTON),
    ("J", 1.0, JOULE),
    ("W", 1.0, WATT),
    ("Pa", 1.0, PASCAL),
    ("C", 1.0, COULOMB),
    ("V", 1.0, VOLT),
    ("F", 1.0, FARAD),
    ("Ohm", 1.0, OHM),
    ("S", 1.0, SIEMENS),
    ("Wb", 1.0, WEBER),
    ("T", 1.0, TESLA),
    ("H", 1.0, HENRY),
    ("lm", 1.0, LUMEN),
    ("lx", 1.0, LUX),
    ("Bq", 1.0, HZ),
    ("Gy", 1.0, GRAY),
    ("Sv", 1.0, GRAY),
    ("deg", DEG, RAD),
    ("arcmin", DEG / 60.0, RAD),
    ("arcsec", DEG / 3600.0, RAD),
    ("as", DEG / 3600.0, RAD),
    ("mas", DEG / 3_600_000.0, RAD),
    ("min", 60.0, S),
    ("h", 3600.0, S),
    ("d", DAY, S),
    ("a", YEAR, S),
    ("cy", 100.0 * YEAR, S),
    ("L", 1e-3, VOLUME),
    ("l", 1e-3, VOLUME),
    ("Jy", 1e-26, FLUX_DENSITY),
    ("AU", AU, M),
    ("pc", PARSEC, M),
    ("Angstrom", 1e-10, M),
    ("%", 0.01, NONE),
    ("D", 3.335_64e-30, DIPOLE),
    // Imperial, CGS and astronomy-specific extras.
    ("fl_oz", 28.413_062_5e-6, VOLUME),
    ("USfl_oz", 29.573_529_562_5e-6, VOLUME),
    ("ft", 0.3048, M),
    ("fur", 201.168, M),
    ("Gal", 0.01, ACCEL),
    ("gal", 4.546_09e-3, VOLUME),
    ("USgal", 3.785_411_784e-3, VOLUME),
    ("G", 1e-4, TESLA),
    ("Gb", 10.0 / (4.0 * PI), A),
    ("ha", 1e4, AREA),
    ("hp", 745.7, WATT),
    ("cwt", 50.802_345_44, KG),
    ("in", 0.0254, M),
    ("kn", 1852.0 / 3600.0, SPEED),
    ("ly", LIGHT_YEAR, M),
    ("Mx", 1e-8, WEBER),
    ("mile", 1609.344, M),
    ("n_mile", 1852.0, M),
    ("Oe", 1000.0 / (4.0 * PI), FIELD_STRENGTH),
    ("oz", 0.028_349_523_125, KG),
    ("lb", 0.453_592_37, KG),
    ("R", 2.58e-4, EXPOSURE),
    ("sb", 1e4, LUMINANCE),
    ("St", 1e-4, KINEMATIC_VISCOSITY),
    ("Torr", 101_325.0 / 760.0, PASCAL),
    ("yd", 0.9144, M),
    ("yr", YEAR, S),
    ("adu", 1.0, NONE),
    ("beam", 1.0, NONE),
    ("count", 1.0, NONE),
    ("pixel", 1.0, NONE),
    ("lambda", 1.0, NONE),
];

const PREFIXES: &[(&str, f64)] = &[
    ("Y", 1e24),
    ("Z", 1e21),
    ("E", 1e18),
    ("P", 1e15),
    ("T", 1e12),
    ("G", 1e9),
    ("M", 1e6),
    ("k", 1e3),
    ("h", 1e2),
    ("da", 1e1),
    ("d", 1e-1),
    ("c", 1e-2),
    ("m", 1e-3),
    ("u", 1e-6),
    ("n", 1e-9),
    ("p", 1e-12),
    ("f", 1e-15),
    ("a", 1e-18),
    ("z", 1e-21),
    ("y", 1e-24),
];

/// Names of the defined units and prefixes, for `SHOW UNITS`-style listings.
pub fn unit_names() -> impl Iterator<Item = &'static str> {
    UNITS.iter().map(|(name, _, _)| *name)
}

pub fn prefix_names() -> impl Iterator<Item = &'static str> {
    PREFIXES.iter().map(|(name, _)| *name)
}

fn lookup_symbol(symbol: &str) -> Option<(f64, Dims)> {
    UNITS
        .iter()
        .find(|(name, _, _)| *name == symbol)
        .map(|(_, factor, dims)| (*factor, *dims))
}

fn lookup_prefixed(symbol: &str) -> Option<(f64, Dims)> {
    if let Some(found) = lookup_symbol(symbol) {
        return Some(found);
    }
    PREFIXES.iter().find_map(|(prefix, scale)| {
        let rest = symbol.strip_prefix(prefix)?;
        if rest.is_empty() {
            return None;
        }
        // `kg` already carries its prefix; prefixes apply to the gram.
        let (factor, dims) = lookup_symbol(rest)?;
        Some((scale * factor, dims))
    })
}

/// A parsed unit such as `km/s`, `GHz` or `m2.kg.s-2`.
#[derive(Clone, Debug, PartialEq)]
pub struct Unit {
    name: String,
    factor: f64,
    dims: Dims,
}

impl Unit {
    pub fn parse(text: &str) -> TaqlResult<Unit> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TaqlError::Unit("empty unit".to_string()));
        }
        let mut factor = 1.0;
        let mut dims = NONE;
        let mut divide = false;
        let mut term = String::new();
        let mut flush = |term: &mut String, divide: bool| -> TaqlResult<()> {
            if term.is_empty() {
                return Ok(());
            }
            let (f, d) = parse_term(term)?;
            let sign: i8 = if divide { -1 } else { 1 };
            factor *= if divide { 1.0 / f } else { f };
            for (acc, exp) in dims.iter_mut().zip(d) {
                *acc += sign * exp;
            }
            term.clear();
            Ok(())
        };
        for c in text.chars() {
            match c {
                '.' | '*' | ' ' => {
                    flush(&mut term, divide)?;
                    divide = false;
                }
                '/' => {
                    flush(&mut term, divide)?;
                    divide = true;
                }
                c => term.push(c),
            }
        }
        flush(&mut term, divide)?;
        Ok(Unit {
            name: text.to_string(),
            factor,
            dims,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scale of one of this unit in SI.
    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn is_dimensionless(&self) -> bool {
        self.dims == NONE
    }

    pub fn conforms(&self, other: &Unit) -> bool {
        self.dims == other.dims
    }

    /// Factor converting values in this unit to `to`.
    pub fn conversion_factor(&self, to: &Unit) -> TaqlResult<f64> {
        if !self.conforms(to) {
            return Err(TaqlError::Unit(format!(
                "units {} and {} do not conform",
                self.name, to.name
            )));
        }
        Ok(self.factor / to.factor)
    }

    pub fn multiply(&self, other: &Unit) -> Unit {
        let mut dims = self.dims;
        for (acc, exp) in dims.iter_mut().zip(other.dims) {
            *acc += exp;
        }
        Unit {
            name: format!("{}.{}", self.name, other.name),
            factor: self.factor * other.factor,
            dims,
        }
    }

    pub fn divide(&self, other: &Unit) -> Unit {
        let mut dims = self.dims;
        for (acc, exp) in dims.iter_mut().zip(other.dims) {
            *acc -= exp;
        }
        Unit {
            name: format!("{}/{}", self.name, other.name),
            factor: self.factor / other.factor,
            dims,
        }
    }

    pub fn inverse(&self) -> Unit {
        let mut dims = self.dims;
        for exp in dims.iter_mut() {
            *exp = -*exp;
        }
        Unit {
            name: format!("1/{}", self.name),
            factor: 1.0 / self.factor,
            dims,
        }
    }

    pub(crate) fn rad() -> &'static Unit {
        static RAD_UNIT: OnceLock<Unit> = OnceLock::new();
        RAD_UNIT.get_or_init(|| Unit {
            name: "rad".to_string(),
            factor: 1.0,
            dims: RAD,
        })
    }

    pub(crate) fn day() -> &'static Unit {
        static DAY_UNIT: OnceLock<Unit> = OnceLock::new();
        DAY_UNIT.get_or_init(|| Unit {
            name: "d".to_string(),
            factor: DAY,
            dims: S,
        })
    }

    pub fn is_angle(&self) -> bool {
        self.dims == RAD
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Whether `text` is a known unit; used by the lexer to decide if letters glued to a number
/// are a unit suffix.
pub fn is_unit(text: &str) -> bool {
    Unit::parse(text).is_ok()
}

/// One factor of a unit: a symbol with an optional SI prefix and an integer exponent,
/// e.g. `km`, `s-1`, `m^2`.
fn parse_term(term: &str) -> TaqlResult<(f64, Dims)> {
    let split = term
        .char_indices()
        .find(|&(i, c)| {
            (c.is_ascii_digit() || c == '-' || c == '+' || c == '^')
                && i > 0
                && !term[..i].ends_with('_')
        })
        .map(|(i, _)| i)
        .unwrap_or(term.len());
    let (symbol, exponent) = term.split_at(split);
    let exponent = exponent.trim_start_matches('^');
    let power: i8 = if exponent.is_empty() {
        1
    } else {
        exponent
            .parse()
            .map_err(|_| TaqlError::Unit(format!("invalid exponent in unit {term:?}")))?
    };
    let (factor, dims) = lookup_prefixed(symbol)
        .ok_or_else(|| TaqlError::Unit(format!("unknown unit {symbol:?}")))?;
    let mut scaled = NONE;
    for (out, exp) in scaled.iter_mut().zip(dims) {
        *out = exp * power;
    }
    Ok((factor.powi(i32::from(power)), scaled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_and_products() {
        let ghz = Unit::parse("GHz").unwrap();
        let mhz = Unit::parse("MHz").unwrap();
        assert!((ghz.conversion_factor(&mhz).unwrap() - 1000.0).abs() < 1e-9);
        let speed = Unit::parse("km/s").unwrap();
        let other = Unit::parse("m.s-1").unwrap();
        assert!(speed.conforms(&other));
        assert!((speed.conversion_factor(&other).unwrap() - 1000.0).abs() < 1e-9);
        assert!(Unit::parse("m/s").unwrap().conforms(&Unit::parse("kn").unwrap()));
    }

    #[test]
    fn table_symbols_win_over_prefixes() {
        assert_eq!(Unit::parse("min").unwrap().factor(), 60.0);
        assert!(Unit::parse("Pa").unwrap().conforms(&Unit::parse("Torr").unwrap()));
        assert!(Unit::parse("Gal").unwrap().conforms(&Unit::parse("m/s2").unwrap()));
        assert!(!Unit::parse("deg").unwrap().conforms(&Unit::parse("s").unwrap()));
        assert!(Unit::parse("furlong").is_err());
    }
}
