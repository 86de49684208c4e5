//! Built-in TaQL functions: name resolution, static result types and evaluation.
//!
//! Functions that need the evaluation context (`rownr`, `rowid`, `rand`, `isdefined` and the
//! group aggregates) are resolved here but evaluated by the expression tree.

use crate::aggregate::{self, Reduction};
use crate::datetime;
use crate::error::{TaqlError, TaqlResult};
use crate::pattern::{PatternKind, TaqlRegex};
use crate::value::{ArrayDatum, Datum, Value, ValueKind, ValueType};
use num_complex::Complex64;
use std::f64::consts::PI;
use tabula_tables::Shape;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FuncCategory {
    Math,
    Logical,
    Conversion,
    DateTime,
    String,
    Array,
    Reduce,
    Astro,
    Misc,
    Aggregate,
}

impl FuncCategory {
    pub const ALL: [FuncCategory; 10] = [
        FuncCategory::Math,
        FuncCategory::Logical,
        FuncCategory::Conversion,
        FuncCategory::DateTime,
        FuncCategory::String,
        FuncCategory::Array,
        FuncCategory::Reduce,
        FuncCategory::Astro,
        FuncCategory::Misc,
        FuncCategory::Aggregate,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FuncCategory::Math => "math",
            FuncCategory::Logical => "logical",
            FuncCategory::Conversion => "conversion",
            FuncCategory::DateTime => "datetime",
            FuncCategory::String => "string",
            FuncCategory::Array => "array",
            FuncCategory::Reduce => "reduce",
            FuncCategory::Astro => "astro",
            FuncCategory::Misc => "misc",
            FuncCategory::Aggregate => "aggregate",
        }
    }

    pub fn from_name(name: &str) -> Option<FuncCategory> {
        let name = name.to_ascii_lowercase();
        match name.as_str() {
            "conv" => Some(FuncCategory::Conversion),
            "aggr" => Some(FuncCategory::Aggregate),
            _ => FuncCategory::ALL.into_iter().find(|c| c.name() == name),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Func {
    Pi,
    E,
    C,
    Rand,
    Sin,
    Sinh,
    Cos,
    Cosh,
    Tan,
    Tanh,
    Asin,
    Acos,
    Atan,
    Atan2,
    Exp,
    Log,
    Log10,
    Pow,
    Sqrt,
    Sqr,
    Cube,
    Norm,
    Abs,
    Arg,
    Fmod,
    Sign,
    Round,
    Floor,
    Ceil,
    Near,
    NearAbs,
    IsNan,
    IsInf,
    IsFinite,
    IsDefined,
    Min2,
    Max2,
    Iif,
    Bool,
    Int,
    Real,
    Imag,
    Complex,
    Conj,
    Str,
    Hms,
    Dms,
    Hdms,
    Datetime,
    MjdToDate,
    Mjd,
    Date,
    Time,
    Year,
    Month,
    Day,
    Weekday,
    Week,
    CMonth,
    CWeekday,
    CDatetime,
    CDate,
    CTime,
    StrLength,
    Upcase,
    Downcase,
    Capitalize,
    SReverse,
    Trim,
    LTrim,
    RTrim,
    Substr,
    Replace,
    Regex,
    Pattern,
    SqlPattern,
    Array,
    NElements,
    NDim,
    Shape,
    Transpose,
    AReverse,
    Resize,
    Diagonal,
    Reduce(Reduction),
    Partial(Reduction),
    Running(Reduction),
    Boxed(Reduction),
    AngDist,
    AngDistX,
    NormAngle,
    Cones,
    AnyCone,
    FindCone,
    RowNr,
    RowId,
    GCount,
    GFirst,
    GLast,
    GReduce(Reduction),
    GReduces(Reduction),
    GAggr,
}

/// How a function treats the units of its arguments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitRule {
    /// The result has no unit.
    Drop,
    /// The result keeps the unit of the first argument.
    Keep,
    /// Angle arguments are converted to rad; the result has no unit.
    AngleIn,
    /// The result is an angle in rad.
    AngleOut,
    /// Angle arguments are converted to rad and the result is in rad.
    AngleInOut,
}

pub struct FuncDef {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub func: Func,
    pub category: FuncCategory,
    pub min_args: usize,
    pub max_args: usize,
    pub help: &'static str,
}

const MANY: usize = usize::MAX;

macro_rules! defs {
    ($( $name:literal [$($alias:literal),*] => $func:ident, $cat:ident, $min:expr, $max:expr, $help:literal; )*) => {
        &[$( FuncDef {
            name: $name,
            aliases: &[$($alias),*],
            func: Func::$func,
            category: FuncCategory::$cat,
            min_args: $min,
            max_args: $max,
            help: $help,
        }, )*]
    };
}

pub static FUNCTIONS: &[FuncDef] = defs! {
    "pi" [] => Pi, Math, 0, 0, "double PI ()";
    "e" [] => E, Math, 0, 0, "double E ()";
    "c" [] => C, Math, 0, 0, "double C () m/s";
    "rand" [] => Rand, Math, 0, 0, "double RAND ()  uniform in [0,1)";
    "sin" [] => Sin, Math, 1, 1, "numeric SIN (numeric)";
    "sinh" [] => Sinh, Math, 1, 1, "numeric SINH (numeric)";
    "cos" [] => Cos, Math, 1, 1, "numeric COS (numeric)";
    "cosh" [] => Cosh, Math, 1, 1, "numeric COSH (numeric)";
    "tan" [] => Tan, Math, 1, 1, "double TAN (real)";
    "tanh" [] => Tanh, Math, 1, 1, "double TANH (real)";
    "asin" [] => Asin, Math, 1, 1, "double ASIN (real) rad";
    "acos" [] => Acos, Math, 1, 1, "double ACOS (real) rad";
    "atan" [] => Atan, Math, 1, 1, "double ATAN (real) rad";
    "atan2" [] => Atan2, Math, 2, 2, "double ATAN2 (real y, real x) rad";
    "exp" [] => Exp, Math, 1, 1, "numeric EXP (numeric)";
    "log" [] => Log, Math, 1, 1, "numeric LOG (numeric)";
    "log10" [] => Log10, Math, 1, 1, "numeric LOG10 (numeric)";
    "pow" [] => Pow, Math, 2, 2, "numeric POW (numeric, numeric exp)";
    "sqrt" [] => Sqrt, Math, 1, 1, "numeric SQRT (numeric)";
    "sqr" ["square"] => Sqr, Math, 1, 1, "numeric SQR (numeric)";
    "cube" [] => Cube, Math, 1, 1, "numeric CUBE (numeric)";
    "norm" [] => Norm, Math, 1, 1, "real NORM (numeric)";
    "abs" ["amplitude"] => Abs, Math, 1, 1, "real ABS (numeric)";
    "arg" ["phase"] => Arg, Math, 1, 1, "double ARG (numeric)";
    "fmod" [] => Fmod, Math, 2, 2, "real FMOD (real, real)  sign of dividend";
    "sign" [] => Sign, Math, 1, 1, "real SIGN (real)";
    "round" [] => Round, Math, 1, 1, "real ROUND (real)  round(-1.6) = -2";
    "floor" [] => Floor, Math, 1, 1, "real FLOOR (real)";
    "ceil" [] => Ceil, Math, 1, 1, "real CEIL (real)";
    "near" [] => Near, Logical, 2, 3, "bool NEAR (numeric, numeric [, double tol])  relative";
    "nearabs" [] => NearAbs, Logical, 2, 3, "bool NEARABS (numeric, numeric [, double tol])  absolute";
    "isnan" [] => IsNan, Logical, 1, 1, "bool ISNAN (numeric)";
    "isinf" [] => IsInf, Logical, 1, 1, "bool ISINF (numeric)";
    "isfinite" [] => IsFinite, Logical, 1, 1, "bool ISFINITE (numeric)";
    "isdefined" ["isdef"] => IsDefined, Logical, 1, 1, "bool ISDEFINED (anytype)  has the cell a value?";
    "iif" [] => Iif, Logical, 3, 3, "anytype IIF (bool cond, arg1, arg2)";
    "bool" ["boolean"] => Bool, Conversion, 1, 1, "bool BOOL (anytype)";
    "int" ["integer"] => Int, Conversion, 1, 1, "int INT (anytype)";
    "real" [] => Real, Conversion, 1, 1, "double REAL (numeric)";
    "imag" [] => Imag, Conversion, 1, 1, "double IMAG (numeric)";
    "complex" [] => Complex, Conversion, 1, 2, "complex COMPLEX (real re, real im)";
    "conj" [] => Conj, Conversion, 1, 1, "numeric CONJ (numeric)";
    "str" ["string"] => Str, Conversion, 1, 2, "string STR (anytype [, int width])";
    "hms" [] => Hms, Conversion, 1, 1, "string HMS (real rad)  e.g. 12h34m56.789";
    "dms" [] => Dms, Conversion, 1, 1, "string DMS (real rad)  e.g. +12d34m56.789";
    "hdms" [] => Hdms, Conversion, 1, 1, "string HDMS (realarray)  alternately HMS and DMS";
    "datetime" [] => Datetime, DateTime, 1, 1, "datetime DATETIME (string)";
    "mjdtodate" [] => MjdToDate, DateTime, 1, 1, "datetime MJDTODATE (real)";
    "mjd" [] => Mjd, DateTime, 0, 1, "double MJD (datetime)";
    "date" [] => Date, DateTime, 0, 1, "datetime DATE (datetime)  date part";
    "time" [] => Time, DateTime, 0, 1, "double TIME (datetime)  time of day in rad";
    "year" [] => Year, DateTime, 0, 1, "int YEAR (datetime)";
    "month" [] => Month, DateTime, 0, 1, "int MONTH (datetime)  1..12";
    "day" [] => Day, DateTime, 0, 1, "int DAY (datetime)  1..31";
    "weekday" ["dow"] => Weekday, DateTime, 0, 1, "int WEEKDAY (datetime)  1=Monday .. 7=Sunday";
    "week" [] => Week, DateTime, 0, 1, "int WEEK (datetime)  ISO week number";
    "cmonth" [] => CMonth, DateTime, 0, 1, "string CMONTH (datetime)  Jan..Dec";
    "cweekday" ["cdow"] => CWeekday, DateTime, 0, 1, "string CWEEKDAY (datetime)  Mon..Sun";
    "cdatetime" ["ctod"] => CDatetime, DateTime, 0, 1, "string CDATETIME (datetime)  YYYY/MM/DD/HH:MM:SS.SSS";
    "cdate" [] => CDate, DateTime, 0, 1, "string CDATE (datetime)  DD-MMM-YYYY";
    "ctime" [] => CTime, DateTime, 0, 1, "string CTIME (datetime)  HH:MM:SS.SSS";
    "strlength" ["len"] => StrLength, String, 1, 1, "int STRLENGTH (string)";
    "upcase" ["upper"] => Upcase, String, 1, 1, "string UPCASE (string)";
    "downcase" ["lower"] => Downcase, String, 1, 1, "string DOWNCASE (string)";
    "capitalize" [] => Capitalize, String, 1, 1, "string CAPITALIZE (string)";
    "sreverse" ["reversestring"] => SReverse, String, 1, 1, "string SREVERSE (string)";
    "trim" [] => Trim, String, 1, 1, "string TRIM (string)";
    "ltrim" [] => LTrim, String, 1, 1, "string LTRIM (string)";
    "rtrim" [] => RTrim, String, 1, 1, "string RTRIM (string)";
    "substr" [] => Substr, String, 2, 3, "string SUBSTR (string, int start [, int n])  start<0 counts from the end";
    "replace" [] => Replace, String, 2, 3, "string REPLACE (string, string|regex [, string replacement])";
    "regex" [] => Regex, String, 1, 1, "regex REGEX (string)";
    "pattern" [] => Pattern, String, 1, 1, "regex PATTERN (string)  glob pattern";
    "sqlpattern" [] => SqlPattern, String, 1, 1, "regex SQLPATTERN (string)  SQL LIKE pattern";
    "array" [] => Array, Array, 2, MANY, "array ARRAY (value, shape)";
    "nelements" ["nelem", "count"] => NElements, Array, 1, 1, "int NELEMENTS (anytype)  1 for a scalar";
    "ndim" [] => NDim, Array, 1, 1, "int NDIM (anytype)  0 for a scalar";
    "shape" [] => Shape, Array, 1, 1, "array SHAPE (anytype)";
    "transpose" [] => Transpose, Array, 1, MANY, "array TRANSPOSE (array [, axes])";
    "areverse" [] => AReverse, Array, 1, MANY, "array AREVERSE (array [, axes])";
    "resize" [] => Resize, Array, 2, 3, "array RESIZE (array, shape [, mode])";
    "diagonal" [] => Diagonal, Array, 1, 3, "array DIAGONAL (array [, firstaxis [, diag]])";
    "angdist" ["angulardistance"] => AngDist, Astro, 2, 2, "double ANGDIST (pairs, pairs) rad";
    "angdistx" ["angulardistancex"] => AngDistX, Astro, 2, 2, "double ANGDISTX (pairs, pairs) rad";
    "normangle" [] => NormAngle, Astro, 1, 1, "double NORMANGLE (real)  into [-pi, pi)";
    "cones" [] => Cones, Astro, 2, 3, "bool CONES (sources, cones [, radii])";
    "anycone" [] => AnyCone, Astro, 2, 3, "bool ANYCONE (source, cones [, radii])";
    "findcone" [] => FindCone, Astro, 2, 3, "int FINDCONE (sources, cones [, radii])";
    "rownr" ["rownumber"] => RowNr, Misc, 0, 0, "int ROWNR ()  row number in the current table";
    "rowid" [] => RowId, Misc, 0, 0, "int ROWID ()  row number in the input table";
    "gcount" [] => GCount, Aggregate, 0, 1, "int GCOUNT ([column])";
    "gfirst" [] => GFirst, Aggregate, 1, 1, "anytype GFIRST (anytype)";
    "glast" [] => GLast, Aggregate, 1, 1, "anytype GLAST (anytype)";
    "gaggr" ["gstack"] => GAggr, Aggregate, 1, 1, "array GAGGR (anytype)  stack group values";
};

impl Func {
    /// Resolves a function by (case-insensitive) name and argument count.
    pub fn lookup(name: &str, nargs: usize) -> TaqlResult<Func> {
        let lower = name.to_ascii_lowercase();
        let unknown = || TaqlError::UnknownFunction {
            name: name.to_string(),
            nargs,
        };
        match (lower.as_str(), nargs) {
            ("min", 2) => return Ok(Func::Min2),
            ("max", 2) => return Ok(Func::Max2),
            _ => {}
        }
        if let Some(def) = FUNCTIONS
            .iter()
            .find(|d| d.name == lower || d.aliases.contains(&lower.as_str()))
        {
            if nargs < def.min_args || nargs > def.max_args {
                return Err(unknown());
            }
            return Ok(def.func);
        }
        let (func, min, max) = reduction_family(&lower).ok_or_else(unknown)?;
        if nargs < min || nargs > max {
            return Err(unknown());
        }
        Ok(func)
    }

    pub fn category(self) -> FuncCategory {
        match self {
            Func::Reduce(_) | Func::Partial(_) | Func::Running(_) | Func::Boxed(_) => {
                FuncCategory::Reduce
            }
            Func::GReduce(_) | Func::GReduces(_) => FuncCategory::Aggregate,
            Func::Min2 | Func::Max2 => FuncCategory::Logical,
            other => FUNCTIONS
                .iter()
                .find(|d| d.func == other)
                .map_or(FuncCategory::Misc, |d| d.category),
        }
    }

    pub fn is_aggregate(self) -> bool {
        self.category() == FuncCategory::Aggregate
    }

    /// Whether the function needs the evaluation context rather than only its arguments.
    pub fn needs_context(self) -> bool {
        matches!(self, Func::Rand | Func::RowNr | Func::RowId | Func::IsDefined) || self.is_aggregate()
    }

    /// Date functions called without an argument use the current time and are not constant.
    pub fn defaults_to_now(self, nargs: usize) -> bool {
        nargs == 0 && self.category() == FuncCategory::DateTime
    }

    pub fn unit_rule(self) -> UnitRule {
        use Func::*;
        match self {
            Sin | Cos | Tan | Hms | Dms | Hdms | Cones | AnyCone | FindCone => UnitRule::AngleIn,
            Asin | Acos | Atan | Atan2 | Arg | Time => UnitRule::AngleOut,
            AngDist | AngDistX | NormAngle => UnitRule::AngleInOut,
            Abs | Round | Floor | Ceil | Min2 | Max2 | Real | Imag | Conj | Fmod | Iif | Array
            | Transpose | AReverse | Resize | Diagonal | GFirst | GLast | GAggr => UnitRule::Keep,
            Reduce(r) | Partial(r) | Running(r) | Boxed(r) | GReduce(r) | GReduces(r) => {
                match r {
                    Reduction::Sum
                    | Reduction::Min
                    | Reduction::Max
                    | Reduction::Mean
                    | Reduction::Stddev
                    | Reduction::SampleStddev
                    | Reduction::Avdev
                    | Reduction::Rms
                    | Reduction::Median
                    | Reduction::Fractile => UnitRule::Keep,
                    _ => UnitRule::Drop,
                }
            }
            _ => UnitRule::Drop,
        }
    }

    /// Result type and kind, checked when the expression is built.
    pub fn result_type(
        self,
        args: &[(ValueType, ValueKind)],
    ) -> TaqlResult<(ValueType, ValueKind)> {
        use ValueType as T;
        let any_array = args.iter().any(|(_, k)| *k == ValueKind::Array);
        let elementwise = if any_array {
            ValueKind::Array
        } else {
            ValueKind::Scalar
        };
        let arg = |i: usize| args.get(i).map(|(t, _)| *t);
        let wrong = |what: &str| {
            TaqlError::type_error(format!(
                "{self:?}: argument must be {what}, found {}",
                args.iter()
                    .map(|(t, _)| t.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        };
        let numeric = |i: usize| arg(i).is_some_and(ValueType::is_numeric);
        let real = |i: usize| arg(i).is_some_and(ValueType::is_real);
        let datelike = |i: usize| {
            arg(i).is_none()
                || matches!(arg(i), Some(T::Date | T::Double | T::Int | T::String))
        };
        let is_string = |i: usize| arg(i) == Some(T::String);
        let scalar = |t: ValueType| Ok((t, ValueKind::Scalar));
        let array = |t: ValueType| Ok((t, ValueKind::Array));
        let elem = |t: ValueType| Ok((t, elementwise));

        match self {
            Func::Pi | Func::E | Func::C | Func::Rand => scalar(T::Double),
            Func::Sin | Func::Sinh | Func::Cos | Func::Cosh | Func::Exp | Func::Log
            | Func::Log10 | Func::Sqrt => {
                if !numeric(0) {
                    return Err(wrong("numeric"));
                }
                elem(if arg(0) == Some(T::Complex) { T::Complex } else { T::Double })
            }
            Func::Tan | Func::Tanh | Func::Asin | Func::Acos | Func::Atan | Func::NormAngle => {
                if !real(0) {
                    return Err(wrong("real"));
                }
                elem(T::Double)
            }
            Func::Atan2 => {
                if !real(0) || !real(1) {
                    return Err(wrong("real"));
                }
                elem(T::Double)
            }
            Func::Pow => {
                if !numeric(0) || !numeric(1) {
                    return Err(wrong("numeric"));
                }
                let complex = arg(0) == Some(T::Complex) || arg(1) == Some(T::Complex);
                elem(if complex { T::Complex } else { T::Double })
            }
            Func::Sqr | Func::Cube | Func::Conj => {
                if !numeric(0) {
                    return Err(wrong("numeric"));
                }
                elem(arg(0).unwrap_or(T::Double))
            }
            Func::Norm | Func::Abs => {
                if !numeric(0) {
                    return Err(wrong("numeric"));
                }
                elem(if arg(0) == Some(T::Int) { T::Int } else { T::Double })
            }
            Func::Arg | Func::Real | Func::Imag => {
                if !numeric(0) {
                    return Err(wrong("numeric"));
                }
                elem(T::Double)
            }
            Func::Sign | Func::Round | Func::Floor | Func::Ceil => {
                if !real(0) {
                    return Err(wrong("real"));
                }
                elem(arg(0).unwrap_or(T::Double))
            }
            Func::Fmod | Func::Min2 | Func::Max2 => {
                if !real(0) || !real(1) {
                    return Err(wrong("real"));
                }
                let t = ValueType::promote(arg(0).unwrap_or(T::Int), arg(1).unwrap_or(T::Int))
                    .ok_or_else(|| wrong("real"))?;
                elem(t)
            }
            Func::Near | Func::NearAbs => {
                if !numeric(0) || !numeric(1) || (args.len() == 3 && !real(2)) {
                    return Err(wrong("numeric"));
                }
                elem(T::Bool)
            }
            Func::IsNan | Func::IsInf | Func::IsFinite => {
                if !numeric(0) {
                    return Err(wrong("numeric"));
                }
                elem(T::Bool)
            }
            Func::IsDefined => scalar(T::Bool),
            Func::Iif => {
                if arg(0) != Some(T::Bool) {
                    return Err(wrong("bool for the condition"));
                }
                let (a, b) = (arg(1).unwrap_or(T::Int), arg(2).unwrap_or(T::Int));
                let t = if a == b {
                    a
                } else {
                    ValueType::promote(a, b).ok_or_else(|| {
                        TaqlError::type_error(format!("iif branches have types {a} and {b}"))
                    })?
                };
                elem(t)
            }
            Func::Bool => {
                if matches!(arg(0), Some(T::Regex | T::Date)) {
                    return Err(wrong("bool, numeric or string"));
                }
                elem(T::Bool)
            }
            Func::Int => {
                if matches!(arg(0), Some(T::Regex | T::Complex)) {
                    return Err(wrong("bool, real or string"));
                }
                elem(T::Int)
            }
            Func::Complex => {
                if args.len() == 2 && (!real(0) || !real(1)) {
                    return Err(wrong("real"));
                }
                if args.len() == 1 && !numeric(0) && !is_string(0) {
                    return Err(wrong("numeric or string"));
                }
                elem(T::Complex)
            }
            Func::Str => {
                if arg(0) == Some(T::Regex) || (args.len() == 2 && arg(1) != Some(T::Int)) {
                    return Err(wrong("a value and an integer width"));
                }
                elem(T::String)
            }
            Func::Hms | Func::Dms | Func::Hdms => {
                if !real(0) {
                    return Err(wrong("real"));
                }
                elem(T::String)
            }
            Func::Datetime => {
                if !is_string(0) {
                    return Err(wrong("string"));
                }
                elem(T::Date)
            }
            Func::MjdToDate => {
                if !real(0) {
                    return Err(wrong("real"));
                }
                elem(T::Date)
            }
            Func::Mjd | Func::Time | Func::Date | Func::Year | Func::Month | Func::Day
            | Func::Weekday | Func::Week | Func::CMonth | Func::CWeekday | Func::CDatetime
            | Func::CDate | Func::CTime => {
                if !datelike(0) {
                    return Err(wrong("datetime"));
                }
                let t = match self {
                    Func::Mjd | Func::Time => T::Double,
                    Func::Date => T::Date,
                    Func::Year | Func::Month | Func::Day | Func::Weekday | Func::Week => T::Int,
                    _ => T::String,
                };
                elem(t)
            }
            Func::StrLength => {
                if !is_string(0) {
                    return Err(wrong("string"));
                }
                elem(T::Int)
            }
            Func::Upcase | Func::Downcase | Func::Capitalize | Func::SReverse | Func::Trim
            | Func::LTrim | Func::RTrim => {
                if !is_string(0) {
                    return Err(wrong("string"));
                }
                elem(T::String)
            }
            Func::Substr => {
                if !is_string(0) || !real(1) || (args.len() == 3 && !real(2)) {
                    return Err(wrong("string, int [, int]"));
                }
                elem(T::String)
            }
            Func::Replace => {
                if !is_string(0)
                    || !matches!(arg(1), Some(T::String | T::Regex))
                    || (args.len() == 3 && !is_string(2))
                {
                    return Err(wrong("string, string or regex [, string]"));
                }
                elem(T::String)
            }
            Func::Regex | Func::Pattern | Func::SqlPattern => {
                if !is_string(0) {
                    return Err(wrong("string"));
                }
                scalar(T::Regex)
            }
            Func::Array => {
                if arg(0) == Some(T::Regex) || !args[1..].iter().all(|(t, _)| *t == T::Int) {
                    return Err(wrong("a value and integer shape"));
                }
                array(arg(0).unwrap_or(T::Int))
            }
            Func::NElements | Func::NDim => scalar(T::Int),
            Func::Shape => array(T::Int),
            Func::Transpose | Func::AReverse | Func::Resize | Func::Diagonal => {
                if !args[1..].iter().all(|(t, _)| *t == T::Int) {
                    return Err(wrong("an array and integer axes"));
                }
                array(arg(0).unwrap_or(T::Int))
            }
            Func::Reduce(r) => {
                if r.takes_fraction() && args.len() != 2 {
                    return Err(wrong("an array and a fraction"));
                }
                scalar(r.result_type(arg(0).unwrap_or(T::Int))?)
            }
            Func::Partial(r) | Func::Running(r) | Func::Boxed(r) => {
                let extra = usize::from(r.takes_fraction());
                let sizes = &args[1..args.len().saturating_sub(extra).max(1)];
                if !sizes.iter().all(|(t, _)| *t == T::Int) {
                    return Err(wrong("an array and integer axes or widths"));
                }
                array(r.result_type(arg(0).unwrap_or(T::Int))?)
            }
            Func::AngDist | Func::AngDistX => {
                if !real(0) || !real(1) {
                    return Err(wrong("real arrays of positions"));
                }
                array(T::Double)
            }
            Func::Cones | Func::AnyCone | Func::FindCone => {
                if !args.iter().all(|(t, _)| t.is_real()) {
                    return Err(wrong("real arrays of positions"));
                }
                // anycone and findcone give a scalar for a single source
                array(if self == Func::FindCone { T::Int } else { T::Bool })
            }
            Func::RowNr | Func::RowId | Func::GCount => scalar(T::Int),
            Func::GFirst | Func::GLast => Ok((arg(0).unwrap_or(T::Int), args[0].1)),
            Func::GReduce(r) => scalar(r.result_type(arg(0).unwrap_or(T::Int))?),
            Func::GReduces(r) => array(r.result_type(arg(0).unwrap_or(T::Int))?),
            Func::GAggr => array(arg(0).unwrap_or(T::Int)),
        }
    }

    /// Evaluates a context-free function on evaluated arguments.
    pub fn evaluate(self, args: &[Datum]) -> TaqlResult<Datum> {
        use ValueType as T;
        let a0 = || {
            args.first()
                .cloned()
                .unwrap_or_else(|| Datum::Scalar(Value::Date(datetime::now_mjd())))
        };
        let scalar = |v: Value| Ok(Datum::Scalar(v));
        match self {
            Func::Pi => scalar(Value::Double(PI)),
            Func::E => scalar(Value::Double(std::f64::consts::E)),
            Func::C => scalar(Value::Double(299_792_458.0)),
            Func::Sin => complex_or_real(&a0(), Complex64::sin, f64::sin),
            Func::Sinh => complex_or_real(&a0(), Complex64::sinh, f64::sinh),
            Func::Cos => complex_or_real(&a0(), Complex64::cos, f64::cos),
            Func::Cosh => complex_or_real(&a0(), Complex64::cosh, f64::cosh),
            Func::Exp => complex_or_real(&a0(), Complex64::exp, f64::exp),
            Func::Log => complex_or_real(&a0(), Complex64::ln, f64::ln),
            Func::Log10 => complex_or_real(&a0(), Complex64::log10, f64::log10),
            Func::Sqrt => complex_or_real(&a0(), Complex64::sqrt, f64::sqrt),
            Func::Tan => real_fn(&a0(), f64::tan),
            Func::Tanh => real_fn(&a0(), f64::tanh),
            Func::Asin => real_fn(&a0(), f64::asin),
            Func::Acos => real_fn(&a0(), f64::acos),
            Func::Atan => real_fn(&a0(), f64::atan),
            Func::NormAngle => real_fn(&a0(), normalize_angle),
            Func::Atan2 => Datum::zip_with(&args[0], &args[1], T::Double, |y, x| {
                Ok(Value::Double(y.as_double()?.atan2(x.as_double()?)))
            }),
            Func::Pow => {
                let complex = args[0].value_type() == T::Complex || args[1].value_type() == T::Complex;
                let rt = if complex { T::Complex } else { T::Double };
                Datum::zip_with(&args[0], &args[1], rt, |a, b| {
                    if complex {
                        Ok(Value::Complex(a.as_complex()?.powc(b.as_complex()?)))
                    } else {
                        Ok(Value::Double(a.as_double()?.powf(b.as_double()?)))
                    }
                })
            }
            Func::Sqr | Func::Cube => {
                let n = if self == Func::Sqr { 2 } else { 3 };
                let rt = args[0].value_type();
                a0().map(rt, |v| {
                    Ok(match v {
                        Value::Int(i) => Value::Int(i.wrapping_pow(n)),
                        Value::Complex(c) => Value::Complex(c.powi(n as i32)),
                        other => Value::Double(other.as_double()?.powi(n as i32)),
                    })
                })
            }
            Func::Norm | Func::Abs => {
                let rt = if args[0].value_type() == T::Int { T::Int } else { T::Double };
                let norm = self == Func::Norm;
                a0().map(rt, |v| {
                    Ok(match v {
                        Value::Int(i) if norm => Value::Int(i.wrapping_mul(*i)),
                        Value::Int(i) => Value::Int(i.wrapping_abs()),
                        Value::Complex(c) if norm => Value::Double(c.norm_sqr()),
                        Value::Complex(c) => Value::Double(c.norm()),
                        other if norm => Value::Double(other.as_double()?.powi(2)),
                        other => Value::Double(other.as_double()?.abs()),
                    })
                })
            }
            Func::Arg => a0().map(T::Double, |v| Ok(Value::Double(v.as_complex()?.arg()))),
            Func::Real => a0().map(T::Double, |v| Ok(Value::Double(v.as_complex()?.re))),
            Func::Imag => a0().map(T::Double, |v| Ok(Value::Double(v.as_complex()?.im))),
            Func::Conj => {
                let rt = args[0].value_type();
                a0().map(rt, |v| {
                    Ok(match v {
                        Value::Complex(c) => Value::Complex(c.conj()),
                        other => other.clone(),
                    })
                })
            }
            Func::Sign | Func::Round | Func::Floor | Func::Ceil => {
                let rt = args[0].value_type();
                a0().map(rt, |v| {
                    Ok(match v {
                        Value::Int(i) if self == Func::Sign => Value::Int(i.signum()),
                        Value::Int(i) => Value::Int(*i),
                        other => {
                            let x = other.as_double()?;
                            Value::Double(match self {
                                Func::Sign => {
                                    if x > 0.0 {
                                        1.0
                                    } else if x < 0.0 {
                                        -1.0
                                    } else {
                                        0.0
                                    }
                                }
                                Func::Round => x.round(),
                                Func::Floor => x.floor(),
                                _ => x.ceil(),
                            })
                        }
                    })
                })
            }
            Func::Fmod | Func::Min2 | Func::Max2 => {
                let rt = ValueType::promote(args[0].value_type(), args[1].value_type())
                    .unwrap_or(T::Double);
                Datum::zip_with(&args[0], &args[1], rt, |a, b| {
                    if rt == T::Int {
                        let (x, y) = (a.as_int()?, b.as_int()?);
                        Ok(Value::Int(match self {
                            Func::Fmod => {
                                if y == 0 {
                                    return Err(TaqlError::eval("fmod by zero"));
                                }
                                x.wrapping_rem(y)
                            }
                            Func::Min2 => x.min(y),
                            _ => x.max(y),
                        }))
                    } else {
                        let (x, y) = (a.as_double()?, b.as_double()?);
                        Ok(Value::Double(match self {
                            Func::Fmod => x % y,
                            Func::Min2 => x.min(y),
                            _ => x.max(y),
                        }))
                    }
                })
            }
            Func::Near | Func::NearAbs => {
                let tol = match args.get(2) {
                    Some(t) => t.as_scalar()?.as_double()?,
                    None => 1e-13,
                };
                let relative = self == Func::Near;
                Datum::zip_with(&args[0], &args[1], T::Bool, |a, b| {
                    let (x, y) = (a.as_complex()?, b.as_complex()?);
                    Ok(Value::Bool(if relative {
                        near(x, y, tol)
                    } else {
                        (x - y).norm() <= tol
                    }))
                })
            }
            Func::IsNan | Func::IsInf | Func::IsFinite => a0().map(T::Bool, |v| {
                let c = v.as_complex()?;
                Ok(Value::Bool(match self {
                    Func::IsNan => c.re.is_nan() || c.im.is_nan(),
                    Func::IsInf => c.re.is_infinite() || c.im.is_infinite(),
                    _ => c.re.is_finite() && c.im.is_finite(),
                }))
            }),
            Func::Iif => iif(&args[0], &args[1], &args[2]),
            Func::Bool => a0().map(T::Bool, |v| {
                Ok(Value::Bool(match v {
                    Value::Bool(b) => *b,
                    Value::String(s) => {
                        matches!(s.trim_start().chars().next(), Some('T' | 't' | 'Y' | 'y' | '1'))
                    }
                    other => other.as_complex()? != Complex64::new(0.0, 0.0),
                }))
            }),
            Func::Int => a0().map(T::Int, |v| {
                Ok(Value::Int(match v {
                    Value::Bool(b) => i64::from(*b),
                    Value::String(s) => parse_int(s)?,
                    other => other.as_double()?.trunc() as i64,
                }))
            }),
            Func::Complex => {
                if args.len() == 2 {
                    Datum::zip_with(&args[0], &args[1], T::Complex, |re, im| {
                        Ok(Value::Complex(Complex64::new(re.as_double()?, im.as_double()?)))
                    })
                } else {
                    a0().map(T::Complex, |v| match v {
                        Value::String(s) => parse_complex(s).map(Value::Complex),
                        other => other.as_complex().map(Value::Complex),
                    })
                }
            }
            Func::Str => {
                let width = match args.get(1) {
                    Some(w) => Some(w.as_scalar()?.as_int()?),
                    None => None,
                };
                a0().map(T::String, |v| Ok(Value::String(to_width(v, width))))
            }
            Func::Hms => real_to_string(&a0(), datetime::format_hms),
            Func::Dms => real_to_string(&a0(), datetime::format_dms),
            Func::Hdms => {
                let values = a0().flatten();
                let mut out = Vec::with_capacity(values.len());
                for (i, v) in values.iter().enumerate() {
                    let rad = v.as_double()?;
                    out.push(Value::String(if i % 2 == 0 {
                        datetime::format_hms(rad)
                    } else {
                        datetime::format_dms(rad)
                    }));
                }
                match a0() {
                    Datum::Scalar(_) => Ok(Datum::Scalar(out.remove(0))),
                    Datum::Array(a) => Ok(Datum::Array(a.with_values(T::String, out)?)),
                }
            }
            Func::Datetime => a0().map(T::Date, |v| {
                Ok(Value::Date(datetime::parse_datetime(v.as_str()?)?))
            }),
            Func::MjdToDate => a0().map(T::Date, |v| Ok(Value::Date(v.as_double()?))),
            Func::Mjd => date_fn(&a0(), T::Double, |d| Ok(Value::Double(d))),
            Func::Date => date_fn(&a0(), T::Date, |d| Ok(Value::Date(d.floor()))),
            Func::Time => date_fn(&a0(), T::Double, |d| {
                Ok(Value::Double(datetime::time_of_day(d)))
            }),
            Func::Year => date_fn(&a0(), T::Int, |d| datetime::year(d).map(Value::Int)),
            Func::Month => date_fn(&a0(), T::Int, |d| datetime::month(d).map(Value::Int)),
            Func::Day => date_fn(&a0(), T::Int, |d| datetime::day(d).map(Value::Int)),
            Func::Weekday => date_fn(&a0(), T::Int, |d| datetime::weekday(d).map(Value::Int)),
            Func::Week => date_fn(&a0(), T::Int, |d| datetime::week(d).map(Value::Int)),
            Func::CMonth => date_fn(&a0(), T::String, |d| {
                datetime::month_name(d).map(Value::from)
            }),
            Func::CWeekday => date_fn(&a0(), T::String, |d| {
                datetime::weekday_name(d).map(Value::from)
            }),
            Func::CDatetime => date_fn(&a0(), T::String, |d| {
                Ok(Value::String(datetime::format_datetime(d)))
            }),
            Func::CDate => date_fn(&a0(), T::String, |d| {
                datetime::format_date(d).map(Value::String)
            }),
            Func::CTime => date_fn(&a0(), T::String, |d| {
                datetime::format_time(d).map(Value::String)
            }),
            Func::StrLength => a0().map(T::Int, |v| {
                Ok(Value::Int(v.as_str()?.chars().count() as i64))
            }),
            Func::Upcase => string_fn(&a0(), str::to_uppercase),
            Func::Downcase => string_fn(&a0(), str::to_lowercase),
            Func::Capitalize => string_fn(&a0(), capitalize),
            Func::SReverse => string_fn(&a0(), |s| s.chars().rev().collect()),
            Func::Trim => string_fn(&a0(), |s| s.trim().to_string()),
            Func::LTrim => string_fn(&a0(), |s| s.trim_start().to_string()),
            Func::RTrim => string_fn(&a0(), |s| s.trim_end().to_string()),
            Func::Substr => {
                let start = args[1].as_scalar()?.as_int()?;
                let len = match args.get(2) {
                    Some(n) => Some(n.as_scalar()?.as_int()?),
                    None => None,
                };
                a0().map(T::String, |v| Ok(Value::String(substr(v.as_str()?, start, len))))
            }
            Func::Replace => {
                let replacement = match args.get(2) {
                    Some(r) => r.as_scalar()?.as_str()?.to_string(),
                    None => String::new(),
                };
                let what = args[1].as_scalar()?.clone();
                a0().map(T::String, |v| {
                    let src = v.as_str()?;
                    Ok(Value::String(match &what {
                        Value::Regex(r) => r.replace_all(src, &replacement),
                        other => src.replace(other.as_str()?, &replacement),
                    }))
                })
            }
            Func::Regex | Func::Pattern | Func::SqlPattern => {
                let kind = match self {
                    Func::Regex => PatternKind::Full,
                    Func::Pattern => PatternKind::Glob,
                    _ => PatternKind::Sql,
                };
                let text = args[0].as_scalar()?.as_str()?;
                scalar(Value::Regex(TaqlRegex::new(text, kind, false)?))
            }
            Func::Array => make_array(&args[0], &int_list(&args[1..])?),
            Func::NElements => scalar(Value::Int(match &args[0] {
                Datum::Scalar(_) => 1,
                Datum::Array(a) => a.len() as i64,
            })),
            Func::NDim => scalar(Value::Int(match &args[0] {
                Datum::Scalar(_) => 0,
                Datum::Array(a) => a.shape().ndim() as i64,
            })),
            Func::Shape => {
                let dims = match &args[0] {
                    Datum::Scalar(_) => Vec::new(),
                    Datum::Array(a) => a.shape().dims().iter().map(|&d| Value::Int(d as i64)).collect(),
                };
                Ok(Datum::Array(ArrayDatum::new(
                    Shape::vector(dims.len()),
                    T::Int,
                    dims,
                )?))
            }
            Func::Transpose => transpose(&args[0].clone().into_array(), &int_list(&args[1..])?),
            Func::AReverse => areverse(&args[0].clone().into_array(), &int_list(&args[1..])?),
            Func::Resize => {
                let mode = match args.get(2) {
                    Some(m) => Some(m.as_scalar()?.as_int()?),
                    None => None,
                };
                resize(&args[0].clone().into_array(), &int_list(&args[1..2])?, mode)
            }
            Func::Diagonal => {
                let first = match args.get(1) {
                    Some(a) => a.as_scalar()?.as_int()?,
                    None => 0,
                };
                let offset = match args.get(2) {
                    Some(a) => a.as_scalar()?.as_int()?,
                    None => 0,
                };
                diagonal(&args[0].clone().into_array(), first, offset)
            }
            Func::Reduce(r) => {
                let fraction = fraction_arg(r, args)?;
                aggregate::reduce_datum(r, &args[0], fraction).map(Datum::Scalar)
            }
            Func::Partial(r) | Func::Running(r) | Func::Boxed(r) => {
                let fraction = fraction_arg(r, args)?;
                let extra = usize::from(r.takes_fraction());
                let sizes = int_list(&args[1..args.len() - extra])?;
                let array = args[0].clone().into_array();
                match self {
                    Func::Partial(_) => aggregate::partial_reduce(r, &array, &sizes, fraction),
                    Func::Running(_) => aggregate::running_reduce(r, &array, &sizes, fraction),
                    _ => aggregate::boxed_reduce(r, &array, &sizes, fraction),
                }
            }
            Func::AngDist => ang_dist(&args[0], &args[1], false),
            Func::AngDistX => ang_dist(&args[0], &args[1], true),
            Func::Cones | Func::AnyCone | Func::FindCone => cones(self, args),
            Func::Rand
            | Func::IsDefined
            | Func::RowNr
            | Func::RowId
            | Func::GCount
            | Func::GFirst
            | Func::GLast
            | Func::GReduce(_)
            | Func::GReduces(_)
            | Func::GAggr => Err(TaqlError::eval(format!(
                "{self:?} needs an evaluation context"
            ))),
        }
    }
}

/// Resolves the reduction families: `sum`, `sums`, `runningsum`, `boxedsum`, `gsum`, `gsums`.
fn reduction_family(name: &str) -> Option<(Func, usize, usize)> {
    let args = |r: Reduction, base: usize| {
        let extra = usize::from(r.takes_fraction());
        (base + extra, base + extra)
    };
    if let Some(r) = Reduction::from_name(name) {
        let (min, max) = args(r, 1);
        return Some((Func::Reduce(r), min, max));
    }
    if let Some(rest) = name.strip_prefix("running") {
        let r = Reduction::from_name(rest)?;
        return Some((Func::Running(r), 2, MANY));
    }
    if let Some(rest) = name.strip_prefix("boxed") {
        let r = Reduction::from_name(rest)?;
        return Some((Func::Boxed(r), 2, MANY));
    }
    if let Some(rest) = name.strip_prefix('g') {
        if let Some(r) = Reduction::from_name(rest) {
            let (min, max) = args(r, 1);
            return Some((Func::GReduce(r), min, max));
        }
        if let Some(r) = rest.strip_suffix('s').and_then(Reduction::from_name) {
            return Some((Func::GReduces(r), 1, 1));
        }
    }
    let r = name.strip_suffix('s').and_then(Reduction::from_name)?;
    Some((Func::Partial(r), 2, MANY))
}

fn fraction_arg(r: Reduction, args: &[Datum]) -> TaqlResult<f64> {
    if !r.takes_fraction() {
        return Ok(0.0);
    }
    args.last()
        .ok_or_else(|| TaqlError::eval("fractile needs a fraction"))?
        .as_scalar()?
        .as_double()
}

fn complex_or_real(
    arg: &Datum,
    complex: impl Fn(Complex64) -> Complex64,
    real: impl Fn(f64) -> f64,
) -> TaqlResult<Datum> {
    if arg.value_type() == ValueType::Complex {
        arg.clone()
            .map(ValueType::Complex, |v| Ok(Value::Complex(complex(v.as_complex()?))))
    } else {
        real_fn(arg, real)
    }
}

fn real_fn(arg: &Datum, f: impl Fn(f64) -> f64) -> TaqlResult<Datum> {
    arg.clone()
        .map(ValueType::Double, |v| Ok(Value::Double(f(v.as_double()?))))
}

fn real_to_string(arg: &Datum, f: impl Fn(f64) -> String) -> TaqlResult<Datum> {
    arg.clone()
        .map(ValueType::String, |v| Ok(Value::String(f(v.as_double()?))))
}

fn string_fn(arg: &Datum, f: impl Fn(&str) -> String) -> TaqlResult<Datum> {
    arg.clone()
        .map(ValueType::String, |v| Ok(Value::String(f(v.as_str()?))))
}

fn date_fn(
    arg: &Datum,
    result_type: ValueType,
    f: impl Fn(f64) -> TaqlResult<Value>,
) -> TaqlResult<Datum> {
    arg.clone().map(result_type, |v| match v {
        Value::String(s) => f(datetime::parse_datetime(s)?),
        other => f(other.as_date()?),
    })
}

pub(crate) fn normalize_angle(rad: f64) -> f64 {
    let two_pi = 2.0 * PI;
    let mut a = (rad + PI).rem_euclid(two_pi) - PI;
    if a >= PI {
        a -= two_pi;
    }
    a
}

pub(crate) fn near(x: Complex64, y: Complex64, tol: f64) -> bool {
    if x == y {
        return true;
    }
    let scale = x.norm().max(y.norm());
    (x - y).norm() <= tol * scale
}

fn iif(cond: &Datum, a: &Datum, b: &Datum) -> TaqlResult<Datum> {
    let rt = if a.value_type() == b.value_type() {
        a.value_type()
    } else {
        ValueType::promote(a.value_type(), b.value_type()).unwrap_or(a.value_type())
    };
    let select = |c: &Value, x: &Value, y: &Value| -> TaqlResult<Value> {
        let chosen = if c.as_bool()? { x } else { y };
        if chosen.value_type() == rt {
            Ok(chosen.clone())
        } else {
            chosen.convert_to(rt)
        }
    };
    let like = [cond, a, b].into_iter().find_map(|d| match d {
        Datum::Array(array) => Some(array),
        Datum::Scalar(_) => None,
    });
    let Some(like) = like else {
        return select(cond.as_scalar()?, a.as_scalar()?, b.as_scalar()?).map(Datum::Scalar);
    };
    let target = Datum::Array(like.clone());
    let conds = broadcast_values(cond, &target)?;
    let xs = broadcast_values(a, &target)?;
    let ys = broadcast_values(b, &target)?;
    let values = conds
        .iter()
        .zip(xs.iter().zip(&ys))
        .map(|(c, (x, y))| select(c, x, y))
        .collect::<TaqlResult<Vec<_>>>()?;
    Ok(Datum::Array(like.with_values(rt, values)?))
}

fn broadcast_values(datum: &Datum, like: &Datum) -> TaqlResult<Vec<Value>> {
    let Datum::Array(target) = like else {
        return Ok(datum.flatten());
    };
    match datum {
        Datum::Scalar(v) => Ok(vec![v.clone(); target.len()]),
        Datum::Array(a) if a.shape() == target.shape() => Ok(a.values().to_vec()),
        Datum::Array(a) => Err(TaqlError::Conformance(format!(
            "array shapes {} and {} differ",
            a.shape(),
            target.shape()
        ))),
    }
}

fn parse_int(text: &str) -> TaqlResult<i64> {
    let t = text.trim();
    if let Ok(i) = t.parse::<i64>() {
        return Ok(i);
    }
    t.parse::<f64>()
        .map(|d| d.trunc() as i64)
        .map_err(|_| TaqlError::eval(format!("cannot convert {text:?} to an integer")))
}

fn parse_complex(text: &str) -> TaqlResult<Complex64> {
    let t = text.trim().trim_start_matches('(').trim_end_matches(')');
    let invalid = || TaqlError::eval(format!("cannot convert {text:?} to a complex"));
    match t.split_once(',') {
        Some((re, im)) => Ok(Complex64::new(
            re.trim().parse().map_err(|_| invalid())?,
            im.trim().parse().map_err(|_| invalid())?,
        )),
        None => Ok(Complex64::new(t.parse().map_err(|_| invalid())?, 0.0)),
    }
}

fn to_width(value: &Value, width: Option<i64>) -> String {
    let text = value.to_string();
    let Some(width) = width.filter(|&w| w > 0) else {
        return text;
    };
    let width = width as usize;
    let len = text.chars().count();
    if len >= width {
        return text.chars().take(width).collect();
    }
    match value {
        Value::String(_) => format!("{text:<width$}"),
        _ => format!("{text:>width$}"),
    }
}

fn capitalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut start = true;
    for c in text.chars() {
        if start && c.is_alphabetic() {
            out.extend(c.to_uppercase());
            start = false;
        } else {
            out.push(c);
            if c.is_whitespace() {
                start = true;
            }
        }
    }
    out
}

fn substr(text: &str, start: i64, len: Option<i64>) -> String {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len() as i64;
    let begin = if start < 0 { (n + start).max(0) } else { start.min(n) };
    let end = match len {
        Some(l) => (begin + l.max(0)).min(n),
        None => n,
    };
    chars[begin as usize..end as usize].iter().collect()
}

fn int_list(args: &[Datum]) -> TaqlResult<Vec<usize>> {
    let mut out = Vec::new();
    for arg in args {
        for v in arg.flatten() {
            let i = v.as_int()?;
            if i < 0 {
                return Err(TaqlError::eval(format!("negative axis or length {i}")));
            }
            out.push(i as usize);
        }
    }
    Ok(out)
}

fn make_array(value: &Datum, dims: &[usize]) -> TaqlResult<Datum> {
    let too_large = || TaqlError::eval(format!("array() shape {dims:?} is too large"));
    let n = if dims.is_empty() {
        0
    } else {
        dims.iter()
            .try_fold(1usize, |n, &d| n.checked_mul(d))
            .ok_or_else(too_large)?
    };
    let shape = Shape::new(dims.to_vec());
    let source = value.flatten();
    if source.is_empty() && n > 0 {
        return Err(TaqlError::eval("array() needs at least one fill value"));
    }
    let mut values: Vec<Value> = Vec::new();
    values.try_reserve_exact(n).map_err(|_| too_large())?;
    values.extend((0..n).map(|i| source[i % source.len()].clone()));
    Ok(Datum::Array(ArrayDatum::new(shape, value.value_type(), values)?))
}

/// Moves the given axes to the front (all axes reversed when none are given).
fn transpose(array: &ArrayDatum, axes: &[usize]) -> TaqlResult<Datum> {
    let ndim = array.shape().ndim();
    let perm: Vec<usize> = if axes.is_empty() {
        (0..ndim).rev().collect()
    } else {
        if axes.iter().any(|&a| a >= ndim) {
            return Err(TaqlError::eval("transpose axis exceeds dimensionality"));
        }
        let mut perm = axes.to_vec();
        perm.extend((0..ndim).filter(|a| !axes.contains(a)));
        perm
    };
    let dims = array.shape().dims();
    let out_shape = Shape::new(perm.iter().map(|&a| dims[a]).collect::<Vec<_>>());
    let mut values = Vec::with_capacity(array.len());
    for offset in 0..array.len() {
        let out_index = out_shape.index_of(offset);
        let mut src = vec![0; ndim];
        for (k, &a) in perm.iter().enumerate() {
            src[a] = out_index[k];
        }
        let src_offset = array
            .shape()
            .offset(&src)
            .ok_or_else(|| TaqlError::eval("transpose index out of range"))?;
        values.push(array.values()[src_offset].clone());
    }
    Ok(Datum::Array(ArrayDatum::new(out_shape, array.value_type(), values)?))
}

fn areverse(array: &ArrayDatum, axes: &[usize]) -> TaqlResult<Datum> {
    let dims = array.shape().dims();
    let reversed: Vec<bool> = (0..dims.len())
        .map(|a| axes.is_empty() || axes.contains(&a))
        .collect();
    let mut values = Vec::with_capacity(array.len());
    for offset in 0..array.len() {
        let mut index = array.shape().index_of(offset);
        for (a, i) in index.iter_mut().enumerate() {
            if reversed[a] {
                *i = dims[a] - 1 - *i;
            }
        }
        let src = array
            .shape()
            .offset(&index)
            .ok_or_else(|| TaqlError::eval("areverse index out of range"))?;
        values.push(array.values()[src].clone());
    }
    Ok(Datum::Array(array.with_values(array.value_type(), values)?))
}

/// Without a mode, overlapping elements are copied and new ones are zero; mode 0 upsamples
/// (`1,2 -> 1,1,2,2`) and mode 1 repeats (`1,2 -> 1,2,1,2`).
fn resize(array: &ArrayDatum, dims: &[usize], mode: Option<i64>) -> TaqlResult<Datum> {
    let in_dims = array.shape().dims();
    if dims.len() != in_dims.len() {
        return Err(TaqlError::eval(format!(
            "resize shape has {} axes, array has {}",
            dims.len(),
            in_dims.len()
        )));
    }
    let out_shape = Shape::new(dims.to_vec());
    let fill = match array.value_type() {
        ValueType::Bool => Value::Bool(false),
        ValueType::String => Value::String(String::new()),
        ValueType::Double => Value::Double(0.0),
        ValueType::Complex => Value::Complex(Complex64::new(0.0, 0.0)),
        ValueType::Date => Value::Date(0.0),
        _ => Value::Int(0),
    };
    let mut values = Vec::with_capacity(out_shape.nelements());
    for offset in 0..out_shape.nelements() {
        let out_index = out_shape.index_of(offset);
        let src: Vec<usize> = match mode {
            None => out_index,
            Some(0) => out_index
                .iter()
                .zip(dims.iter().zip(in_dims))
                .map(|(&i, (&n_out, &n_in))| i * n_in / n_out.max(1))
                .collect(),
            Some(_) => out_index
                .iter()
                .zip(in_dims)
                .map(|(&i, &n_in)| if n_in == 0 { i } else { i % n_in })
                .collect(),
        };
        let value = array
            .shape()
            .offset(&src)
            .map_or_else(|| fill.clone(), |o| array.values()[o].clone());
        values.push(value);
    }
    Ok(Datum::Array(ArrayDatum::new(out_shape, array.value_type(), values)?))
}

/// Diagonal of the 2-dim planes formed by axes `first` and `first + 1`.
fn diagonal(array: &ArrayDatum, first: i64, offset: i64) -> TaqlResult<Datum> {
    let dims = array.shape().dims();
    let a = usize::try_from(first)
        .ok()
        .filter(|&a| a + 1 < dims.len())
        .ok_or_else(|| {
            TaqlError::eval(format!(
                "diagonal needs axes {first} and {} in an array of {} axes",
                first + 1,
                dims.len()
            ))
        })?;
    let (n0, n1) = (dims[a] as i64, dims[a + 1] as i64);
    let len = if offset >= 0 {
        n0.min(n1 - offset).max(0)
    } else {
        (n0 + offset).min(n1).max(0)
    } as usize;
    let mut out_dims: Vec<usize> = dims[..a].to_vec();
    out_dims.push(len);
    out_dims.extend_from_slice(&dims[a + 2..]);
    let out_shape = Shape::new(out_dims);
    let mut values = Vec::with_capacity(out_shape.nelements());
    for o in 0..out_shape.nelements() {
        let out_index = out_shape.index_of(o);
        let k = out_index[a] as i64;
        let (i, j) = if offset >= 0 { (k, k + offset) } else { (k - offset, k) };
        let mut src: Vec<usize> = out_index[..a].to_vec();
        src.push(i as usize);
        src.push(j as usize);
        src.extend_from_slice(&out_index[a + 1..]);
        let src_offset = array
            .shape()
            .offset(&src)
            .ok_or_else(|| TaqlError::eval("diagonal index out of range"))?;
        values.push(array.values()[src_offset].clone());
    }
    Ok(Datum::Array(ArrayDatum::new(out_shape, array.value_type(), values)?))
}

fn positions(datum: &Datum, group: usize, what: &str) -> TaqlResult<Vec<Vec<f64>>> {
    let values = datum
        .flatten()
        .iter()
        .map(Value::as_double)
        .collect::<TaqlResult<Vec<_>>>()?;
    if values.is_empty() || values.len() % group != 0 {
        return Err(TaqlError::eval(format!(
            "{what} must hold a multiple of {group} values, found {}",
            values.len()
        )));
    }
    Ok(values.chunks(group).map(<[f64]>::to_vec).collect())
}

/// Great-circle distance between (lon, lat) positions in rad.
pub(crate) fn angular_distance(a: &[f64], b: &[f64]) -> f64 {
    let (dlon, dlat) = (b[0] - a[0], b[1] - a[1]);
    let h = (dlat / 2.0).sin().powi(2) + a[1].cos() * b[1].cos() * (dlon / 2.0).sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin()
}

fn ang_dist(a: &Datum, b: &Datum, cross: bool) -> TaqlResult<Datum> {
    let pa = positions(a, 2, "angdist positions")?;
    let pb = positions(b, 2, "angdist positions")?;
    if cross {
        let mut values = Vec::with_capacity(pa.len() * pb.len());
        for q in &pb {
            for p in &pa {
                values.push(Value::Double(angular_distance(p, q)));
            }
        }
        return Ok(Datum::Array(ArrayDatum::new(
            Shape::new(vec![pa.len(), pb.len()]),
            ValueType::Double,
            values,
        )?));
    }
    let n = pa.len().max(pb.len());
    if !(pa.len() == pb.len() || pa.len() == 1 || pb.len() == 1) {
        return Err(TaqlError::Conformance(format!(
            "angdist has {} and {} positions",
            pa.len(),
            pb.len()
        )));
    }
    let values = (0..n)
        .map(|i| {
            let p = &pa[if pa.len() == 1 { 0 } else { i }];
            let q = &pb[if pb.len() == 1 { 0 } else { i }];
            Value::Double(angular_distance(p, q))
        })
        .collect();
    Ok(Datum::Array(ArrayDatum::new(Shape::vector(n), ValueType::Double, values)?))
}

/// Cone searches. Cones are `(lon, lat, radius)` triples, or positions plus separate radii.
/// `cones` yields a `[ncones, nsources]` (or `[ncones, nsources, nradii]`) bool array,
/// `anycone` tells per source whether any cone contains it and `findcone` gives the index of
/// the first such cone (-1 if none). A single source gives a scalar.
fn cones(func: Func, args: &[Datum]) -> TaqlResult<Datum> {
    let sources = positions(&args[0], 2, "sources")?;
    let (centres, radii): (Vec<Vec<f64>>, Vec<f64>) = if args.len() == 3 {
        let centres = positions(&args[1], 2, "cone positions")?;
        let radii = args[2]
            .flatten()
            .iter()
            .map(Value::as_double)
            .collect::<TaqlResult<Vec<_>>>()?;
        (centres, radii)
    } else {
        let triples = positions(&args[1], 3, "cones")?;
        let centres = triples.iter().map(|t| t[..2].to_vec()).collect();
        let radii = triples.iter().map(|t| t[2]).collect();
        (centres, radii)
    };
    let separate = args.len() == 3;
    // inside(source, cone, radius index)
    let inside = |s: &[f64], c: usize, r: usize| angular_distance(s, &centres[c]) <= radii[r];
    let radius_indices = |c: usize| -> Vec<usize> {
        if separate {
            (0..radii.len()).collect()
        } else {
            vec![c]
        }
    };

    match func {
        Func::Cones => {
            let mut values = Vec::new();
            let shape = if separate {
                for r in 0..radii.len() {
                    for s in &sources {
                        for c in 0..centres.len() {
                            values.push(Value::Bool(inside(s, c, r)));
                        }
                    }
                }
                vec![centres.len(), sources.len(), radii.len()]
            } else {
                for s in &sources {
                    for c in 0..centres.len() {
                        values.push(Value::Bool(inside(s, c, c)));
                    }
                }
                vec![centres.len(), sources.len()]
            };
            Ok(Datum::Array(ArrayDatum::new(Shape::new(shape), ValueType::Bool, values)?))
        }
        _ => {
            let mut values = Vec::with_capacity(sources.len());
            for s in &sources {
                let found = (0..centres.len())
                    .find(|&c| radius_indices(c).into_iter().any(|r| inside(s, c, r)));
                values.push(if func == Func::AnyCone {
                    Value::Bool(found.is_some())
                } else {
                    Value::Int(found.map_or(-1, |c| c as i64))
                });
            }
            let rt = if func == Func::AnyCone { ValueType::Bool } else { ValueType::Int };
            if values.len() == 1 {
                Ok(Datum::Scalar(values.remove(0)))
            } else {
                Ok(Datum::Array(ArrayDatum::new(Shape::vector(values.len()), rt, values)?))
            }
        }
    }
}

/// All function names of a category, for `SHOW FUNCTIONS`.
pub fn describe(category: Option<FuncCategory>) -> String {
    let mut out = String::new();
    for cat in FuncCategory::ALL {
        if category.is_some_and(|c| c != cat) {
            continue;
        }
        out.push_str(&format!("{} functions:\n", cat.name()));
        for def in FUNCTIONS.iter().filter(|d| d.category == cat) {
            out.push_str("  ");
            out.push_str(def.help);
            if !def.aliases.is_empty() {
                out.push_str(&format!("  (aka {})", def.aliases.join(", ")));
            }
            out.push('\n');
        }
        match cat {
            FuncCategory::Logical => out.push_str("  numeric MIN (numeric, numeric)\n  numeric MAX (numeric, numeric)\n"),
            FuncCategory::Reduce => {
                for r in Reduction::ALL {
                    out.push_str(&format!(
                        "  {0} (array)  {0}s (array, axes)  running{0} (array, widths)  boxed{0} (array, sizes)\n",
                        r.name()
                    ));
                }
            }
            FuncCategory::Aggregate => {
                for r in Reduction::ALL {
                    out.push_str(&format!("  g{0} (anytype)  g{0}s (array)\n", r.name()));
                }
            }
            _ => {}
        }
    }
    out
}
