//! Reductions shared by the array functions (`sum`, `sums`, `runningsum`, `boxedsum`) and the
//! group aggregates (`gsum`, `gsums`).

use crate::error::{TaqlError, TaqlResult};
use crate::value::{ArrayDatum, Datum, Value, ValueType};
use num_complex::Complex64;
use ordered_float::OrderedFloat;
use tabula_tables::Shape;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Reduction {
    Sum,
    Product,
    SumSqr,
    Min,
    Max,
    Mean,
    Variance,
    SampleVariance,
    Stddev,
    SampleStddev,
    Avdev,
    Rms,
    Median,
    Fractile,
    Any,
    All,
    NTrue,
    NFalse,
}

impl Reduction {
    pub const ALL: [Reduction; 18] = [
        Reduction::Sum,
        Reduction::Product,
        Reduction::SumSqr,
        Reduction::Min,
        Reduction::Max,
        Reduction::Mean,
        Reduction::Variance,
        Reduction::SampleVariance,
        Reduction::Stddev,
        Reduction::SampleStddev,
        Reduction::Avdev,
        Reduction::Rms,
        Reduction::Median,
        Reduction::Fractile,
        Reduction::Any,
        Reduction::All,
        Reduction::NTrue,
        Reduction::NFalse,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Reduction::Sum => "sum",
            Reduction::Product => "product",
            Reduction::SumSqr => "sumsqr",
            Reduction::Min => "min",
            Reduction::Max => "max",
            Reduction::Mean => "mean",
            Reduction::Variance => "variance",
            Reduction::SampleVariance => "samplevariance",
            Reduction::Stddev => "stddev",
            Reduction::SampleStddev => "samplestddev",
            Reduction::Avdev => "avdev",
            Reduction::Rms => "rms",
            Reduction::Median => "median",
            Reduction::Fractile => "fractile",
            Reduction::Any => "any",
            Reduction::All => "all",
            Reduction::NTrue => "ntrue",
            Reduction::NFalse => "nfalse",
        }
    }

    /// Looks up a base name (lowercase), including the aliases `sumsquare` and `avg`.
    pub fn from_name(name: &str) -> Option<Reduction> {
        match name {
            "sumsquare" => Some(Reduction::SumSqr),
            "avg" => Some(Reduction::Mean),
            _ => Reduction::ALL.into_iter().find(|r| r.name() == name),
        }
    }

    /// Extra scalar argument after the data (the fraction of `fractile`).
    pub fn takes_fraction(self) -> bool {
        self == Reduction::Fractile
    }

    pub fn result_type(self, arg: ValueType) -> TaqlResult<ValueType> {
        let wrong = || {
            TaqlError::type_error(format!("{}() cannot be applied to {arg} values", self.name()))
        };
        match self {
            Reduction::Any | Reduction::All => match arg {
                ValueType::Bool => Ok(ValueType::Bool),
                _ => Err(wrong()),
            },
            Reduction::NTrue | Reduction::NFalse => match arg {
                ValueType::Bool => Ok(ValueType::Int),
                _ => Err(wrong()),
            },
            Reduction::Sum | Reduction::Product | Reduction::SumSqr => match arg {
                ValueType::Int | ValueType::Double | ValueType::Complex => Ok(arg),
                _ => Err(wrong()),
            },
            Reduction::Mean => match arg {
                ValueType::Int | ValueType::Double => Ok(ValueType::Double),
                ValueType::Complex => Ok(ValueType::Complex),
                _ => Err(wrong()),
            },
            Reduction::Variance
            | Reduction::SampleVariance
            | Reduction::Stddev
            | Reduction::SampleStddev
            | Reduction::Avdev => match arg {
                ValueType::Int | ValueType::Double | ValueType::Complex => Ok(ValueType::Double),
                _ => Err(wrong()),
            },
            Reduction::Min | Reduction::Max => match arg {
                ValueType::Int | ValueType::Double => Ok(arg),
                _ => Err(wrong()),
            },
            Reduction::Rms | Reduction::Median | Reduction::Fractile => match arg {
                ValueType::Int | ValueType::Double => Ok(ValueType::Double),
                _ => Err(wrong()),
            },
        }
    }

    /// Reduces `values` (all of type `arg`) to one value.
    pub fn reduce(self, values: &[Value], arg: ValueType, fraction: f64) -> TaqlResult<Value> {
        let result_type = self.result_type(arg)?;
        match self {
            Reduction::Any => bools(values).map(|b| Value::Bool(b.iter().any(|&x| x))),
            Reduction::All => bools(values).map(|b| Value::Bool(b.iter().all(|&x| x))),
            Reduction::NTrue => {
                bools(values).map(|b| Value::Int(b.iter().filter(|&&x| x).count() as i64))
            }
            Reduction::NFalse => {
                bools(values).map(|b| Value::Int(b.iter().filter(|&&x| !x).count() as i64))
            }
            Reduction::Sum | Reduction::Product | Reduction::SumSqr => {
                sum_like(self, values, result_type)
            }
            Reduction::Min | Reduction::Max => {
                if values.is_empty() {
                    return Err(TaqlError::eval(format!("{}() of an empty set", self.name())));
                }
                if result_type == ValueType::Int {
                    let ints = values.iter().map(Value::as_int).collect::<TaqlResult<Vec<_>>>()?;
                    let v = if self == Reduction::Min {
                        ints.iter().min()
                    } else {
                        ints.iter().max()
                    };
                    Ok(Value::Int(v.copied().unwrap_or_default()))
                } else {
                    let reals = reals(values)?;
                    let v = reals.iter().copied().fold(
                        if self == Reduction::Min { f64::INFINITY } else { f64::NEG_INFINITY },
                        |acc, x| if self == Reduction::Min { acc.min(x) } else { acc.max(x) },
                    );
                    Ok(Value::Double(v))
                }
            }
            Reduction::Mean => {
                if result_type == ValueType::Complex {
                    let c = complexes(values)?;
                    let n = c.len() as f64;
                    Ok(Value::Complex(c.iter().sum::<Complex64>() / n))
                } else {
                    Ok(Value::Double(mean(&reals(values)?)))
                }
            }
            Reduction::Variance | Reduction::SampleVariance => {
                Ok(Value::Double(variance(values, arg, self == Reduction::SampleVariance)?))
            }
            Reduction::Stddev | Reduction::SampleStddev => Ok(Value::Double(
                variance(values, arg, self == Reduction::SampleStddev)?.sqrt(),
            )),
            Reduction::Avdev => {
                if arg == ValueType::Complex {
                    let c = complexes(values)?;
                    let m = c.iter().sum::<Complex64>() / c.len() as f64;
                    Ok(Value::Double(
                        c.iter().map(|x| (x - m).norm()).sum::<f64>() / c.len() as f64,
                    ))
                } else {
                    let r = reals(values)?;
                    let m = mean(&r);
                    Ok(Value::Double(
                        r.iter().map(|x| (x - m).abs()).sum::<f64>() / r.len() as f64,
                    ))
                }
            }
            Reduction::Rms => {
                let r = reals(values)?;
                Ok(Value::Double(
                    (r.iter().map(|x| x * x).sum::<f64>() / r.len() as f64).sqrt(),
                ))
            }
            Reduction::Median => {
                let mut r = reals(values)?;
                if r.is_empty() {
                    return Err(TaqlError::eval("median() of an empty set"));
                }
                r.sort_by_key(|&x| OrderedFloat(x));
                let n = r.len();
                Ok(Value::Double(if n % 2 == 1 {
                    r[n / 2]
                } else {
                    (r[n / 2 - 1] + r[n / 2]) / 2.0
                }))
            }
            Reduction::Fractile => {
                if !(0.0..=1.0).contains(&fraction) {
                    return Err(TaqlError::eval(format!(
                        "fractile {fraction} not in [0,1]"
                    )));
                }
                let mut r = reals(values)?;
                if r.is_empty() {
                    return Err(TaqlError::eval("fractile() of an empty set"));
                }
                r.sort_by_key(|&x| OrderedFloat(x));
                let pos = (fraction * (r.len() - 1) as f64 + 0.01) as usize;
                Ok(Value::Double(r[pos.min(r.len() - 1)]))
            }
        }
    }

    /// Value used for elements of a running reduction whose window does not fit the array.
    fn edge_value(self, result_type: ValueType) -> Value {
        match result_type {
            ValueType::Bool => Value::Bool(false),
            ValueType::Int => Value::Int(0),
            ValueType::Complex => Value::Complex(Complex64::new(0.0, 0.0)),
            _ => Value::Double(0.0),
        }
    }
}

fn bools(values: &[Value]) -> TaqlResult<Vec<bool>> {
    values.iter().map(Value::as_bool).collect()
}

fn reals(values: &[Value]) -> TaqlResult<Vec<f64>> {
    values.iter().map(Value::as_double).collect()
}

fn complexes(values: &[Value]) -> TaqlResult<Vec<Complex64>> {
    values.iter().map(Value::as_complex).collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn sum_like(reduction: Reduction, values: &[Value], result_type: ValueType) -> TaqlResult<Value> {
    match result_type {
        ValueType::Int => {
            let ints = values.iter().map(Value::as_int).collect::<TaqlResult<Vec<_>>>()?;
            Ok(Value::Int(match reduction {
                Reduction::Sum => ints.iter().fold(0i64, |a, &x| a.wrapping_add(x)),
                Reduction::Product => ints.iter().fold(1i64, |a, &x| a.wrapping_mul(x)),
                _ => ints.iter().fold(0i64, |a, &x| a.wrapping_add(x.wrapping_mul(x))),
            }))
        }
        ValueType::Complex => {
            let c = complexes(values)?;
            Ok(Value::Complex(match reduction {
                Reduction::Sum => c.iter().sum(),
                Reduction::Product => c.iter().product(),
                _ => c.iter().map(|x| x * x).sum(),
            }))
        }
        _ => {
            let r = reals(values)?;
            Ok(Value::Double(match reduction {
                Reduction::Sum => r.iter().sum(),
                Reduction::Product => r.iter().product(),
                _ => r.iter().map(|x| x * x).sum(),
            }))
        }
    }
}

/// Population (or sample) variance; for complex values the sum of the real and imaginary
/// variances.
fn variance(values: &[Value], arg: ValueType, sample: bool) -> TaqlResult<f64> {
    let n = values.len();
    let divisor = if sample { n.saturating_sub(1) } else { n };
    if divisor == 0 {
        return Ok(0.0);
    }
    let sumsq = if arg == ValueType::Complex {
        let c = complexes(values)?;
        let m = c.iter().sum::<Complex64>() / n as f64;
        c.iter().map(|x| (x - m).norm_sqr()).sum::<f64>()
    } else {
        let r = reals(values)?;
        let m = mean(&r);
        r.iter().map(|x| (x - m) * (x - m)).sum::<f64>()
    };
    Ok(sumsq / divisor as f64)
}

/// Reduces a whole datum (an array's elements or a scalar on its own).
pub fn reduce_datum(reduction: Reduction, datum: &Datum, fraction: f64) -> TaqlResult<Value> {
    let values = datum.flatten();
    reduction.reduce(&values, datum.value_type(), fraction)
}

/// Reduces along `axes`, keeping the other axes (`sums(array, axes)`).
pub fn partial_reduce(
    reduction: Reduction,
    array: &ArrayDatum,
    axes: &[usize],
    fraction: f64,
) -> TaqlResult<Datum> {
    let shape = array.shape().dims();
    for &axis in axes {
        if axis >= shape.len() {
            return Err(TaqlError::eval(format!(
                "axis {axis} exceeds dimensionality {}",
                shape.len()
            )));
        }
    }
    let kept: Vec<usize> = (0..shape.len()).filter(|a| !axes.contains(a)).collect();
    let out_dims: Vec<usize> = if kept.is_empty() {
        vec![1]
    } else {
        kept.iter().map(|&a| shape[a]).collect()
    };
    let out_shape = Shape::new(out_dims);
    let mut buckets: Vec<Vec<Value>> = vec![Vec::new(); out_shape.nelements()];
    for (offset, value) in array.values().iter().enumerate() {
        let index = array.shape().index_of(offset);
        let out_index: Vec<usize> = if kept.is_empty() {
            vec![0]
        } else {
            kept.iter().map(|&a| index[a]).collect()
        };
        let out = out_shape
            .offset(&out_index)
            .ok_or_else(|| TaqlError::eval("reduction index out of range"))?;
        buckets[out].push(value.clone());
    }
    let result_type = reduction.result_type(array.value_type())?;
    let values = buckets
        .iter()
        .map(|b| reduction.reduce(b, array.value_type(), fraction))
        .collect::<TaqlResult<Vec<_>>>()?;
    Ok(Datum::Array(ArrayDatum::new(out_shape, result_type, values)?))
}

/// Reduces a sliding window centred on every element (`runningsum(array, widths)`).
///
/// Window widths are full widths per axis (missing trailing axes use width 1). Elements
/// whose window does not fit inside the array are set to zero.
pub fn running_reduce(
    reduction: Reduction,
    array: &ArrayDatum,
    widths: &[usize],
    fraction: f64,
) -> TaqlResult<Datum> {
    let shape = array.shape();
    let dims = shape.dims();
    let half: Vec<usize> = (0..dims.len())
        .map(|a| widths.get(a).copied().unwrap_or(1) / 2)
        .collect();
    let result_type = reduction.result_type(array.value_type())?;
    let mut values = Vec::with_capacity(array.len());
    for offset in 0..array.len() {
        let index = shape.index_of(offset);
        let fits = index
            .iter()
            .zip(dims)
            .zip(&half)
            .all(|((&i, &n), &h)| i >= h && i + h < n);
        if !fits {
            values.push(reduction.edge_value(result_type));
            continue;
        }
        let start: Vec<usize> = index.iter().zip(&half).map(|(&i, &h)| i - h).collect();
        let end: Vec<usize> = index.iter().zip(&half).map(|(&i, &h)| i + h + 1).collect();
        let window = window_values(array, &start, &end)?;
        values.push(reduction.reduce(&window, array.value_type(), fraction)?);
    }
    Ok(Datum::Array(ArrayDatum::new(shape.clone(), result_type, values)?))
}

/// Reduces non-overlapping boxes (`boxedsum(array, box sizes)`); a partial box at the end of
/// an axis is reduced as well.
pub fn boxed_reduce(
    reduction: Reduction,
    array: &ArrayDatum,
    sizes: &[usize],
    fraction: f64,
) -> TaqlResult<Datum> {
    let dims = array.shape().dims();
    let boxes: Vec<usize> = (0..dims.len())
        .map(|a| sizes.get(a).copied().unwrap_or(1).max(1))
        .collect();
    let out_shape = Shape::new(
        dims.iter()
            .zip(&boxes)
            .map(|(&n, &b)| n.div_ceil(b))
            .collect::<Vec<_>>(),
    );
    let result_type = reduction.result_type(array.value_type())?;
    let mut values = Vec::with_capacity(out_shape.nelements());
    for offset in 0..out_shape.nelements() {
        let index = out_shape.index_of(offset);
        let start: Vec<usize> = index.iter().zip(&boxes).map(|(&i, &b)| i * b).collect();
        let end: Vec<usize> = start
            .iter()
            .zip(&boxes)
            .zip(dims)
            .map(|((&s, &b), &n)| (s + b).min(n))
            .collect();
        let window = window_values(array, &start, &end)?;
        values.push(reduction.reduce(&window, array.value_type(), fraction)?);
    }
    Ok(Datum::Array(ArrayDatum::new(out_shape, result_type, values)?))
}

fn window_values(array: &ArrayDatum, start: &[usize], end: &[usize]) -> TaqlResult<Vec<Value>> {
    let window_shape = Shape::new(
        start
            .iter()
            .zip(end)
            .map(|(&s, &e)| e - s)
            .collect::<Vec<_>>(),
    );
    let mut out = Vec::with_capacity(window_shape.nelements());
    for w in 0..window_shape.nelements() {
        let local = window_shape.index_of(w);
        let global: Vec<usize> = local.iter().zip(start).map(|(&l, &s)| l + s).collect();
        let offset = array
            .shape()
            .offset(&global)
            .ok_or_else(|| TaqlError::eval("window index out of range"))?;
        out.push(array.values()[offset].clone());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|&v| Value::Int(v)).collect()
    }

    #[test]
    fn scalar_reductions() {
        let v = ints(&[1, 2, 3, 4]);
        assert_eq!(Reduction::Sum.reduce(&v, ValueType::Int, 0.0).unwrap(), Value::Int(10));
        assert_eq!(Reduction::Product.reduce(&v, ValueType::Int, 0.0).unwrap(), Value::Int(24));
        assert_eq!(Reduction::Mean.reduce(&v, ValueType::Int, 0.0).unwrap(), Value::Double(2.5));
        assert_eq!(Reduction::Median.reduce(&v, ValueType::Int, 0.0).unwrap(), Value::Double(2.5));
        assert_eq!(
            Reduction::Variance.reduce(&v, ValueType::Int, 0.0).unwrap(),
            Value::Double(1.25)
        );
        assert_eq!(
            Reduction::Fractile.reduce(&v, ValueType::Int, 0.5).unwrap(),
            Value::Double(2.0)
        );
        assert!(Reduction::Any.reduce(&v, ValueType::Int, 0.0).is_err());
    }

    #[test]
    fn partial_sums_keep_other_axes() {
        // 2x3 array in storage order: columns (1,2) (3,4) (5,6)
        let array =
            ArrayDatum::new(Shape::new(vec![2, 3]), ValueType::Int, ints(&[1, 2, 3, 4, 5, 6]))
                .unwrap();
        let Datum::Array(sums) = partial_reduce(Reduction::Sum, &array, &[0], 0.0).unwrap() else {
            panic!("expected an array");
        };
        assert_eq!(sums.shape().dims(), &[3]);
        assert_eq!(sums.values(), ints(&[3, 7, 11]).as_slice());
    }
}
