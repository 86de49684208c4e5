//! Values flowing through expression evaluation.
//!
//! TaQL computes in a small set of types (bool, 64-bit int, double, double complex, string,
//! datetime and regex); column values are widened into these on read and narrowed back on
//! write.

use crate::error::{TaqlError, TaqlResult};
use crate::pattern::TaqlRegex;
use num_complex::Complex64;
use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::fmt;
use tabula_tables::{ArrayData, ArrayValue, Cell, DataType, Scalar, Shape};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Int,
    Double,
    Complex,
    String,
    Date,
    Regex,
}

impl ValueType {
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Double => "double",
            ValueType::Complex => "complex",
            ValueType::String => "string",
            ValueType::Date => "datetime",
            ValueType::Regex => "regex",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ValueType::Int | ValueType::Double | ValueType::Complex)
    }

    pub fn is_real(self) -> bool {
        matches!(self, ValueType::Int | ValueType::Double)
    }

    /// Common type of two numeric operands (`Int < Double < Complex`).
    pub fn promote(a: ValueType, b: ValueType) -> Option<ValueType> {
        use ValueType::*;
        match (a, b) {
            (x, y) if x == y => Some(x),
            (Int, Double) | (Double, Int) => Some(Double),
            (Complex, Int | Double) | (Int | Double, Complex) => Some(Complex),
            _ => None,
        }
    }

    /// Evaluation type of a column holding `data_type` values.
    pub fn of_data_type(data_type: DataType) -> ValueType {
        match data_type {
            DataType::Bool => ValueType::Bool,
            DataType::Float | DataType::Double => ValueType::Double,
            DataType::Complex | DataType::DComplex => ValueType::Complex,
            DataType::String => ValueType::String,
            _ => ValueType::Int,
        }
    }

    /// Column type used to store values of this type.
    pub fn storage_type(self) -> TaqlResult<DataType> {
        Ok(match self {
            ValueType::Bool => DataType::Bool,
            ValueType::Int => DataType::Int64,
            ValueType::Double | ValueType::Date => DataType::Double,
            ValueType::Complex => DataType::DComplex,
            ValueType::String => DataType::String,
            ValueType::Regex => {
                return Err(TaqlError::type_error("a regex cannot be stored in a column"))
            }
        })
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Scalar,
    Array,
}

/// A single value. Dates are modified Julian days.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Double(f64),
    Complex(Complex64),
    String(String),
    Date(f64),
    Regex(TaqlRegex),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Double(_) => ValueType::Double,
            Value::Complex(_) => ValueType::Complex,
            Value::String(_) => ValueType::String,
            Value::Date(_) => ValueType::Date,
            Value::Regex(_) => ValueType::Regex,
        }
    }

    fn mismatch(&self, wanted: &str) -> TaqlError {
        TaqlError::type_error(format!(
            "expected {wanted} value, found {} ({self})",
            self.value_type()
        ))
    }

    pub fn as_bool(&self) -> TaqlResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn as_int(&self) -> TaqlResult<i64> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Double(d) => Ok(*d as i64),
            other => Err(other.mismatch("integer")),
        }
    }

    /// Real value; dates yield their MJD.
    pub fn as_double(&self) -> TaqlResult<f64> {
        match self {
            Value::Int(i) => Ok(*i as f64),
            Value::Double(d) | Value::Date(d) => Ok(*d),
            other => Err(other.mismatch("real")),
        }
    }

    pub fn as_complex(&self) -> TaqlResult<Complex64> {
        match self {
            Value::Int(i) => Ok(Complex64::new(*i as f64, 0.0)),
            Value::Double(d) => Ok(Complex64::new(*d, 0.0)),
            Value::Complex(c) => Ok(*c),
            other => Err(other.mismatch("numeric")),
        }
    }

    pub fn as_str(&self) -> TaqlResult<&str> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(other.mismatch("string")),
        }
    }

    pub fn as_date(&self) -> TaqlResult<f64> {
        match self {
            Value::Date(d) | Value::Double(d) => Ok(*d),
            Value::Int(i) => Ok(*i as f64),
            other => Err(other.mismatch("datetime")),
        }
    }

    pub fn as_regex(&self) -> TaqlResult<&TaqlRegex> {
        match self {
            Value::Regex(r) => Ok(r),
            other => Err(other.mismatch("regex")),
        }
    }

    /// Converts a numeric value to another numeric type.
    pub fn convert_to(&self, to: ValueType) -> TaqlResult<Value> {
        if self.value_type() == to {
            return Ok(self.clone());
        }
        Ok(match to {
            ValueType::Int => Value::Int(self.as_int()?),
            ValueType::Double => Value::Double(self.as_double()?),
            ValueType::Complex => Value::Complex(self.as_complex()?),
            ValueType::Date => Value::Date(self.as_date()?),
            _ => {
                return Err(TaqlError::type_error(format!(
                    "cannot convert {} to {to}",
                    self.value_type()
                )))
            }
        })
    }

    pub fn from_scalar(scalar: &Scalar) -> Value {
        match scalar {
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::UInt8(v) => Value::Int(i64::from(*v)),
            Scalar::Int8(v) => Value::Int(i64::from(*v)),
            Scalar::Int16(v) => Value::Int(i64::from(*v)),
            Scalar::UInt16(v) => Value::Int(i64::from(*v)),
            Scalar::Int32(v) => Value::Int(i64::from(*v)),
            Scalar::UInt32(v) => Value::Int(i64::from(*v)),
            Scalar::Int64(v) => Value::Int(*v),
            Scalar::UInt64(v) => Value::Int(*v as i64),
            Scalar::Float(v) => Value::Double(f64::from(*v)),
            Scalar::Double(v) => Value::Double(*v),
            Scalar::Complex(c) => Value::Complex(Complex64::new(f64::from(c.re), f64::from(c.im))),
            Scalar::DComplex(c) => Value::Complex(*c),
            Scalar::String(s) => Value::String(s.clone()),
        }
    }

    /// Narrows the value into a cell of `data_type`. A double written into an integer column
    /// is truncated; a value outside the range of the column type is an error.
    pub fn to_scalar(&self, data_type: DataType) -> TaqlResult<Scalar> {
        let cannot = || {
            TaqlError::type_error(format!(
                "cannot store {} value into a {data_type} column",
                self.value_type()
            ))
        };
        Ok(match data_type {
            DataType::Bool => Scalar::Bool(self.as_bool().map_err(|_| cannot())?),
            DataType::String => Scalar::String(self.as_str().map_err(|_| cannot())?.to_string()),
            DataType::Complex | DataType::DComplex => {
                let c = self.as_complex().map_err(|_| cannot())?;
                if data_type == DataType::Complex {
                    Scalar::Complex(num_complex::Complex32::new(c.re as f32, c.im as f32))
                } else {
                    Scalar::DComplex(c)
                }
            }
            DataType::Float => Scalar::Float(self.as_double().map_err(|_| cannot())? as f32),
            DataType::Double => Scalar::Double(self.as_double().map_err(|_| cannot())?),
            DataType::UInt64 => {
                let v = match self {
                    Value::Int(i) => u64::try_from(*i).ok(),
                    Value::Double(d) | Value::Date(d) => truncated(*d, 0.0, u64::MAX as f64).map(|t| t as u64),
                    _ => return Err(cannot()),
                };
                Scalar::UInt64(v.ok_or_else(|| self.out_of_range(data_type))?)
            }
            int_type => {
                let v = match self {
                    Value::Int(i) => *i,
                    Value::Double(d) | Value::Date(d) => truncated(*d, i64::MIN as f64, i64::MAX as f64)
                        .map(|t| t as i64)
                        .ok_or_else(|| self.out_of_range(data_type))?,
                    _ => return Err(cannot()),
                };
                let narrowed = match int_type {
                    DataType::UInt8 => u8::try_from(v).ok().map(Scalar::UInt8),
                    DataType::Int8 => i8::try_from(v).ok().map(Scalar::Int8),
                    DataType::Int16 => i16::try_from(v).ok().map(Scalar::Int16),
                    DataType::UInt16 => u16::try_from(v).ok().map(Scalar::UInt16),
                    DataType::Int32 => i32::try_from(v).ok().map(Scalar::Int32),
                    DataType::UInt32 => u32::try_from(v).ok().map(Scalar::UInt32),
                    _ => Some(Scalar::Int64(v)),
                };
                narrowed.ok_or_else(|| self.out_of_range(data_type))?
            }
        })
    }

    fn out_of_range(&self, data_type: DataType) -> TaqlError {
        TaqlError::type_error(format!("value {self} is out of range for a {data_type} column"))
    }

    /// Total order used by sorting, grouping and DISTINCT.
    ///
    /// Numbers (and dates) compare numerically, complex values by real then imaginary part;
    /// values of unrelated types order by type.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Complex(a), Value::Complex(b)) => OrderedFloat(a.re)
                .cmp(&OrderedFloat(b.re))
                .then(OrderedFloat(a.im).cmp(&OrderedFloat(b.im))),
            (Value::Regex(a), Value::Regex(b)) => a.source().cmp(b.source()),
            (a, b) => match (a.as_double(), b.as_double()) {
                (Ok(x), Ok(y)) => OrderedFloat(x).cmp(&OrderedFloat(y)),
                _ => type_rank(a).cmp(&type_rank(b)),
            },
        }
    }
}

/// `d` truncated towards zero, or `None` when it is not finite or falls outside `[lo, hi)`.
/// The upper bounds used here (`2^63`, `2^64`) are exact as doubles.
fn truncated(d: f64, lo: f64, hi: f64) -> Option<f64> {
    let t = d.trunc();
    (t.is_finite() && t >= lo && t < hi).then_some(t)
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Bool(_) => 0,
        Value::Int(_) | Value::Double(_) | Value::Date(_) => 1,
        Value::Complex(_) => 2,
        Value::String(_) => 3,
        Value::Regex(_) => 4,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => f.write_str(if *b { "T" } else { "F" }),
            Value::Int(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Complex(c) => write!(f, "({}, {})", c.re, c.im),
            Value::String(s) => f.write_str(s),
            Value::Date(mjd) => f.write_str(&crate::datetime::format_datetime(*mjd)),
            Value::Regex(r) => write!(f, "{r}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<Complex64> for Value {
    fn from(value: Complex64) -> Self {
        Value::Complex(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

/// An N-dimensional array of values in storage order (first axis varies fastest).
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayDatum {
    shape: Shape,
    value_type: ValueType,
    values: Vec<Value>,
}

impl ArrayDatum {
    pub fn new(shape: Shape, value_type: ValueType, values: Vec<Value>) -> TaqlResult<Self> {
        let expected = if shape.ndim() == 0 { 0 } else { shape.nelements() };
        if expected != values.len() {
            return Err(TaqlError::Conformance(format!(
                "shape {shape} needs {expected} values, got {}",
                values.len()
            )));
        }
        Ok(Self {
            shape,
            value_type,
            values,
        })
    }

    /// A 1-dim array; the element type is taken from the first value (`Int` when empty).
    pub fn vector(values: Vec<Value>) -> Self {
        let value_type = values.first().map_or(ValueType::Int, Value::value_type);
        Self {
            shape: Shape::vector(values.len()),
            value_type,
            values,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Same shape, new values (produced by an elementwise operation).
    pub fn with_values(&self, value_type: ValueType, values: Vec<Value>) -> TaqlResult<Self> {
        ArrayDatum::new(self.shape.clone(), value_type, values)
    }

    pub fn from_array_value(array: &ArrayValue) -> Self {
        let values: Vec<Value> = array.data().iter().map(|s| Value::from_scalar(&s)).collect();
        Self {
            shape: array.shape().clone(),
            value_type: ValueType::of_data_type(array.data_type()),
            values,
        }
    }

    pub fn to_array_value(&self, data_type: DataType) -> TaqlResult<ArrayValue> {
        let mut data = ArrayData::empty(data_type);
        for value in &self.values {
            data.push(value.to_scalar(data_type)?)?;
        }
        Ok(ArrayValue::new(self.shape.clone(), data)?)
    }
}

/// Result of evaluating an expression for one row: a scalar or an array.
#[derive(Clone, Debug, PartialEq)]
pub enum Datum {
    Scalar(Value),
    Array(ArrayDatum),
}

impl Datum {
    pub fn value_type(&self) -> ValueType {
        match self {
            Datum::Scalar(v) => v.value_type(),
            Datum::Array(a) => a.value_type(),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Datum::Scalar(_) => ValueKind::Scalar,
            Datum::Array(_) => ValueKind::Array,
        }
    }

    pub fn as_scalar(&self) -> TaqlResult<&Value> {
        match self {
            Datum::Scalar(v) => Ok(v),
            Datum::Array(a) => Err(TaqlError::type_error(format!(
                "expected a scalar, found an array of shape {}",
                a.shape()
            ))),
        }
    }

    pub fn into_scalar(self) -> TaqlResult<Value> {
        match self {
            Datum::Scalar(v) => Ok(v),
            Datum::Array(a) => Err(TaqlError::type_error(format!(
                "expected a scalar, found an array of shape {}",
                a.shape()
            ))),
        }
    }

    /// The array, or a 1-element vector for a scalar.
    pub fn into_array(self) -> ArrayDatum {
        match self {
            Datum::Array(a) => a,
            Datum::Scalar(v) => ArrayDatum::vector(vec![v]),
        }
    }

    /// All elements in storage order.
    pub fn flatten(&self) -> Vec<Value> {
        match self {
            Datum::Scalar(v) => vec![v.clone()],
            Datum::Array(a) => a.values().to_vec(),
        }
    }

    pub fn from_cell(cell: &Cell) -> TaqlResult<Datum> {
        match cell {
            Cell::Scalar(s) => Ok(Datum::Scalar(Value::from_scalar(s))),
            Cell::Array(a) => Ok(Datum::Array(ArrayDatum::from_array_value(a))),
            Cell::Undefined => Err(TaqlError::eval("cell has no value")),
        }
    }

    /// Applies `f` to every element, keeping the shape.
    pub fn map(
        self,
        result_type: ValueType,
        f: impl Fn(&Value) -> TaqlResult<Value>,
    ) -> TaqlResult<Datum> {
        match self {
            Datum::Scalar(v) => Ok(Datum::Scalar(f(&v)?)),
            Datum::Array(a) => {
                let values = a.values().iter().map(f).collect::<TaqlResult<Vec<_>>>()?;
                Ok(Datum::Array(a.with_values(result_type, values)?))
            }
        }
    }

    /// Combines two operands elementwise. A scalar is broadcast against an array; two arrays
    /// must have the same shape.
    pub fn zip_with(
        left: &Datum,
        right: &Datum,
        result_type: ValueType,
        f: impl Fn(&Value, &Value) -> TaqlResult<Value>,
    ) -> TaqlResult<Datum> {
        match (left, right) {
            (Datum::Scalar(a), Datum::Scalar(b)) => Ok(Datum::Scalar(f(a, b)?)),
            (Datum::Array(a), Datum::Scalar(b)) => {
                let values = a
                    .values()
                    .iter()
                    .map(|x| f(x, b))
                    .collect::<TaqlResult<Vec<_>>>()?;
                Ok(Datum::Array(a.with_values(result_type, values)?))
            }
            (Datum::Scalar(a), Datum::Array(b)) => {
                let values = b
                    .values()
                    .iter()
                    .map(|y| f(a, y))
                    .collect::<TaqlResult<Vec<_>>>()?;
                Ok(Datum::Array(b.with_values(result_type, values)?))
            }
            (Datum::Array(a), Datum::Array(b)) => {
                if a.shape() != b.shape() {
                    return Err(TaqlError::Conformance(format!(
                        "array shapes {} and {} differ",
                        a.shape(),
                        b.shape()
                    )));
                }
                let values = a
                    .values()
                    .iter()
                    .zip(b.values())
                    .map(|(x, y)| f(x, y))
                    .collect::<TaqlResult<Vec<_>>>()?;
                Ok(Datum::Array(a.with_values(result_type, values)?))
            }
        }
    }
}

impl From<Value> for Datum {
    fn from(value: Value) -> Self {
        Datum::Scalar(value)
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Scalar(v) => write!(f, "{v}"),
            Datum::Array(a) => {
                f.write_str("[")?;
                for (i, v) in a.values().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
        }
    }
}
