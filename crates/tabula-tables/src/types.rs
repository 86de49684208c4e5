use crate::error::{TableError, TableResult};
use num_complex::{Complex32, Complex64};
use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::fmt;

/// Element type of a column or cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    UInt8,
    Int8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    Complex,
    DComplex,
    String,
}

impl DataType {
    pub const ALL: [DataType; 14] = [
        DataType::Bool,
        DataType::UInt8,
        DataType::Int8,
        DataType::Int16,
        DataType::UInt16,
        DataType::Int32,
        DataType::UInt32,
        DataType::Int64,
        DataType::UInt64,
        DataType::Float,
        DataType::Double,
        DataType::Complex,
        DataType::DComplex,
        DataType::String,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DataType::Bool => "Bool",
            DataType::UInt8 => "UInt8",
            DataType::Int8 => "Int8",
            DataType::Int16 => "Int16",
            DataType::UInt16 => "UInt16",
            DataType::Int32 => "Int32",
            DataType::UInt32 => "UInt32",
            DataType::Int64 => "Int64",
            DataType::UInt64 => "UInt64",
            DataType::Float => "Float",
            DataType::Double => "Double",
            DataType::Complex => "Complex",
            DataType::DComplex => "DComplex",
            DataType::String => "String",
        }
    }

    /// Stable on-disk code of the type.
    pub fn code(self) -> u8 {
        match self {
            DataType::Bool => 0,
            DataType::UInt8 => 1,
            DataType::Int8 => 2,
            DataType::Int16 => 3,
            DataType::UInt16 => 4,
            DataType::Int32 => 5,
            DataType::UInt32 => 6,
            DataType::Int64 => 7,
            DataType::UInt64 => 8,
            DataType::Float => 9,
            DataType::Double => 10,
            DataType::Complex => 11,
            DataType::DComplex => 12,
            DataType::String => 13,
        }
    }

    pub fn from_code(code: u8) -> TableResult<Self> {
        Self::ALL
            .get(code as usize)
            .copied()
            .ok_or_else(|| TableError::Corrupt(format!("unknown data type code {code}")))
    }

    /// Width in bytes of one encoded value, `None` for strings.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            DataType::Bool | DataType::UInt8 | DataType::Int8 => Some(1),
            DataType::Int16 | DataType::UInt16 => Some(2),
            DataType::Int32 | DataType::UInt32 | DataType::Float => Some(4),
            DataType::Int64 | DataType::UInt64 | DataType::Double | DataType::Complex => Some(8),
            DataType::DComplex => Some(16),
            DataType::String => None,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DataType::UInt8
                | DataType::Int8
                | DataType::Int16
                | DataType::UInt16
                | DataType::Int32
                | DataType::UInt32
                | DataType::Int64
                | DataType::UInt64
        )
    }

    pub fn is_real(self) -> bool {
        matches!(self, DataType::Float | DataType::Double)
    }

    pub fn is_complex(self) -> bool {
        matches!(self, DataType::Complex | DataType::DComplex)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_real() || self.is_complex()
    }

    fn is_signed(self) -> bool {
        matches!(
            self,
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
        )
    }

    fn int_bits(self) -> u32 {
        match self {
            DataType::UInt8 | DataType::Int8 => 8,
            DataType::Int16 | DataType::UInt16 => 16,
            DataType::Int32 | DataType::UInt32 => 32,
            DataType::Int64 | DataType::UInt64 => 64,
            _ => 0,
        }
    }

    /// Whether a value of this type can be stored into a `to` cell without loss of kind.
    ///
    /// Integers widen (unsigned into wider signed, never signed into unsigned), every numeric
    /// type converts into the real and complex types that can hold it, and `Bool` and `String`
    /// only convert into themselves.
    pub fn can_promote_to(self, to: DataType) -> bool {
        if self == to {
            return true;
        }
        match (self, to) {
            (DataType::Bool, _) | (_, DataType::Bool) => false,
            (DataType::String, _) | (_, DataType::String) => false,
            (from, to) if from.is_integer() && to.is_integer() => {
                match (from.is_signed(), to.is_signed()) {
                    (false, false) | (true, true) => from.int_bits() <= to.int_bits(),
                    (false, true) => from.int_bits() < to.int_bits(),
                    (true, false) => false,
                }
            }
            (from, DataType::Float | DataType::Double) => from.is_integer() || from.is_real(),
            (from, DataType::Complex) => from.is_integer() || from == DataType::Float,
            (from, DataType::DComplex) => from.is_numeric(),
            _ => false,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single typed value.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Bool(bool),
    UInt8(u8),
    Int8(i8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Complex(Complex32),
    DComplex(Complex64),
    String(String),
}

impl Scalar {
    pub fn data_type(&self) -> DataType {
        match self {
            Scalar::Bool(_) => DataType::Bool,
            Scalar::UInt8(_) => DataType::UInt8,
            Scalar::Int8(_) => DataType::Int8,
            Scalar::Int16(_) => DataType::Int16,
            Scalar::UInt16(_) => DataType::UInt16,
            Scalar::Int32(_) => DataType::Int32,
            Scalar::UInt32(_) => DataType::UInt32,
            Scalar::Int64(_) => DataType::Int64,
            Scalar::UInt64(_) => DataType::UInt64,
            Scalar::Float(_) => DataType::Float,
            Scalar::Double(_) => DataType::Double,
            Scalar::Complex(_) => DataType::Complex,
            Scalar::DComplex(_) => DataType::DComplex,
            Scalar::String(_) => DataType::String,
        }
    }

    /// The zero value of a type (`false`, `0`, empty string).
    pub fn default_for(data_type: DataType) -> Scalar {
        match data_type {
            DataType::Bool => Scalar::Bool(false),
            DataType::UInt8 => Scalar::UInt8(0),
            DataType::Int8 => Scalar::Int8(0),
            DataType::Int16 => Scalar::Int16(0),
            DataType::UInt16 => Scalar::UInt16(0),
            DataType::Int32 => Scalar::Int32(0),
            DataType::UInt32 => Scalar::UInt32(0),
            DataType::Int64 => Scalar::Int64(0),
            DataType::UInt64 => Scalar::UInt64(0),
            DataType::Float => Scalar::Float(0.0),
            DataType::Double => Scalar::Double(0.0),
            DataType::Complex => Scalar::Complex(Complex32::new(0.0, 0.0)),
            DataType::DComplex => Scalar::DComplex(Complex64::new(0.0, 0.0)),
            DataType::String => Scalar::String(String::new()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::String(v) => Some(v),
            _ => None,
        }
    }

    /// Integer value for integer types.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::UInt8(v) => Some(i64::from(*v)),
            Scalar::Int8(v) => Some(i64::from(*v)),
            Scalar::Int16(v) => Some(i64::from(*v)),
            Scalar::UInt16(v) => Some(i64::from(*v)),
            Scalar::Int32(v) => Some(i64::from(*v)),
            Scalar::UInt32(v) => Some(i64::from(*v)),
            Scalar::Int64(v) => Some(*v),
            Scalar::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Real value for integer and real types.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Float(v) => Some(f64::from(*v)),
            Scalar::Double(v) => Some(*v),
            Scalar::UInt64(v) => Some(*v as f64),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Complex value for every numeric type.
    pub fn as_complex(&self) -> Option<Complex64> {
        match self {
            Scalar::Complex(v) => Some(Complex64::new(f64::from(v.re), f64::from(v.im))),
            Scalar::DComplex(v) => Some(*v),
            other => other.as_f64().map(|re| Complex64::new(re, 0.0)),
        }
    }

    /// Converts the value into `to`, following [`DataType::can_promote_to`].
    pub fn promote_to(&self, to: DataType) -> TableResult<Scalar> {
        let from = self.data_type();
        if from == to {
            return Ok(self.clone());
        }
        if !from.can_promote_to(to) {
            return Err(TableError::InvalidPromotion { from, to });
        }
        let invalid = || TableError::InvalidPromotion { from, to };
        let promoted = match to {
            DataType::Int16 => Scalar::Int16(self.as_i64().ok_or_else(invalid)? as i16),
            DataType::UInt16 => Scalar::UInt16(self.as_i64().ok_or_else(invalid)? as u16),
            DataType::Int32 => Scalar::Int32(self.as_i64().ok_or_else(invalid)? as i32),
            DataType::UInt32 => Scalar::UInt32(self.as_i64().ok_or_else(invalid)? as u32),
            DataType::Int64 => Scalar::Int64(self.as_i64().ok_or_else(invalid)?),
            DataType::UInt64 => Scalar::UInt64(self.as_i64().ok_or_else(invalid)? as u64),
            DataType::Float => Scalar::Float(self.as_f64().ok_or_else(invalid)? as f32),
            DataType::Double => Scalar::Double(self.as_f64().ok_or_else(invalid)?),
            DataType::Complex => {
                let c = self.as_complex().ok_or_else(invalid)?;
                Scalar::Complex(Complex32::new(c.re as f32, c.im as f32))
            }
            DataType::DComplex => Scalar::DComplex(self.as_complex().ok_or_else(invalid)?),
            _ => return Err(invalid()),
        };
        Ok(promoted)
    }

    /// Total order used for sorting: by type first, then by value (NaN sorts last).
    pub fn total_cmp(&self, other: &Scalar) -> Ordering {
        match (self, other) {
            (Scalar::Bool(a), Scalar::Bool(b)) => a.cmp(b),
            (Scalar::String(a), Scalar::String(b)) => a.cmp(b),
            (Scalar::Complex(_) | Scalar::DComplex(_), Scalar::Complex(_) | Scalar::DComplex(_)) => {
                let (a, b) = (self.as_complex(), other.as_complex());
                match (a, b) {
                    (Some(a), Some(b)) => OrderedFloat(a.norm())
                        .cmp(&OrderedFloat(b.norm()))
                        .then(OrderedFloat(a.arg()).cmp(&OrderedFloat(b.arg()))),
                    _ => Ordering::Equal,
                }
            }
            (a, b) => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) if !a.data_type().is_real() && !b.data_type().is_real() => {
                    x.cmp(&y)
                }
                _ => match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => OrderedFloat(x).cmp(&OrderedFloat(y)),
                    _ => a.data_type().code().cmp(&b.data_type().code()),
                },
            },
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{v}"),
            Scalar::UInt8(v) => write!(f, "{v}"),
            Scalar::Int8(v) => write!(f, "{v}"),
            Scalar::Int16(v) => write!(f, "{v}"),
            Scalar::UInt16(v) => write!(f, "{v}"),
            Scalar::Int32(v) => write!(f, "{v}"),
            Scalar::UInt32(v) => write!(f, "{v}"),
            Scalar::Int64(v) => write!(f, "{v}"),
            Scalar::UInt64(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Double(v) => write!(f, "{v}"),
            Scalar::Complex(v) => write!(f, "({}, {})", v.re, v.im),
            Scalar::DComplex(v) => write!(f, "({}, {})", v.re, v.im),
            Scalar::String(v) => write!(f, "{v:?}"),
        }
    }
}

macro_rules! impl_scalar_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Scalar {
                fn from(value: $ty) -> Self {
                    Scalar::$variant(value)
                }
            }
        )*
    };
}

impl_scalar_from!(
    bool => Bool,
    u8 => UInt8,
    i8 => Int8,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float,
    f64 => Double,
    Complex32 => Complex,
    Complex64 => DComplex,
    String => String,
);

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_table() {
        assert!(DataType::UInt8.can_promote_to(DataType::Int16));
        assert!(!DataType::Int16.can_promote_to(DataType::UInt16));
        assert!(DataType::UInt32.can_promote_to(DataType::Int64));
        assert!(!DataType::UInt64.can_promote_to(DataType::Int64));
        assert!(DataType::Int32.can_promote_to(DataType::Double));
        assert!(DataType::Float.can_promote_to(DataType::Complex));
        assert!(!DataType::Double.can_promote_to(DataType::Complex));
        assert!(DataType::Double.can_promote_to(DataType::DComplex));
        assert!(!DataType::Bool.can_promote_to(DataType::Int32));
        assert!(!DataType::Int32.can_promote_to(DataType::String));
        assert!(!DataType::Double.can_promote_to(DataType::Int64));
    }

    #[test]
    fn promote_values() {
        assert_eq!(
            Scalar::Int16(-3).promote_to(DataType::Double).unwrap(),
            Scalar::Double(-3.0)
        );
        assert_eq!(
            Scalar::UInt8(7).promote_to(DataType::DComplex).unwrap(),
            Scalar::DComplex(Complex64::new(7.0, 0.0))
        );
        assert!(matches!(
            Scalar::from("x").promote_to(DataType::Int32),
            Err(TableError::InvalidPromotion { .. })
        ));
    }
}
