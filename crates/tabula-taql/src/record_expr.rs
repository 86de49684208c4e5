//! Expressions over a record instead of a table.
//!
//! Field names resolve against the record the expression is parsed with; evaluation may use
//! any record with the same field types. Table-only constructs (`rownr()`, aggregates, column
//! keywords) fail while parsing.

use crate::bind::Binder;
use crate::error::{TaqlError, TaqlResult};
use crate::node::{EvalContext, TableExprNode};
use crate::parser::parse_expression;
use crate::udf::FunctionRegistry;
use crate::units::Unit;
use crate::value::{ArrayDatum, Datum, Value};
use num_complex::Complex64;
use tabula_tables::Record;

#[derive(Clone, Debug)]
pub struct RecordExpr {
    node: TableExprNode,
}

impl RecordExpr {
    pub fn parse(record: &Record, text: &str) -> TaqlResult<Self> {
        Self::parse_with(record, text, &FunctionRegistry::default())
    }

    /// Parses with user-defined functions available.
    pub fn parse_with(record: &Record, text: &str, functions: &FunctionRegistry) -> TaqlResult<Self> {
        let expr = parse_expression(text)?;
        let node = Binder::new(functions).with_record(record).bind(&expr)?;
        Ok(Self { node })
    }

    pub fn node(&self) -> &TableExprNode {
        &self.node
    }

    pub fn evaluate(&self, record: &Record) -> TaqlResult<Datum> {
        self.node.get(&EvalContext::record(record), 0)
    }
}

fn scalar(record: &Record, text: &str) -> TaqlResult<Value> {
    RecordExpr::parse(record, text)?.evaluate(record)?.into_scalar()
}

fn array(record: &Record, text: &str) -> TaqlResult<ArrayDatum> {
    Ok(RecordExpr::parse(record, text)?.evaluate(record)?.into_array())
}

pub fn expr_to_bool(record: &Record, text: &str) -> TaqlResult<bool> {
    scalar(record, text)?.as_bool()
}

/// Integer result; a real result is truncated after adding 0.0001, so `3*0.1*10` gives 3.
pub fn expr_to_int(record: &Record, text: &str) -> TaqlResult<i64> {
    match scalar(record, text)? {
        Value::Int(i) => Ok(i),
        other => Ok((other.as_double()? + 0.0001).trunc() as i64),
    }
}

/// Real result, converted to `unit` when given (the expression must then carry a unit).
pub fn expr_to_double(record: &Record, text: &str, unit: Option<&str>) -> TaqlResult<f64> {
    let expr = RecordExpr::parse(record, text)?;
    let node = match unit {
        None => expr.node,
        Some(unit) => {
            if expr.node.unit().is_none() {
                Unit::parse(unit)?;
                return Err(TaqlError::Unit(format!(
                    "expression {text:?} has no unit to convert to {unit}"
                )));
            }
            expr.node.with_unit(unit)?
        }
    };
    node.get_double(&EvalContext::record(record), 0)
}

pub fn expr_to_complex(record: &Record, text: &str) -> TaqlResult<Complex64> {
    scalar(record, text)?.as_complex()
}

pub fn expr_to_string(record: &Record, text: &str) -> TaqlResult<String> {
    Ok(scalar(record, text)?.as_str()?.to_string())
}

/// Date as a modified Julian day.
pub fn expr_to_date(record: &Record, text: &str) -> TaqlResult<f64> {
    scalar(record, text)?.as_date()
}

pub fn expr_to_array_bool(record: &Record, text: &str) -> TaqlResult<Vec<bool>> {
    array(record, text)?.values().iter().map(Value::as_bool).collect()
}

pub fn expr_to_array_int(record: &Record, text: &str) -> TaqlResult<Vec<i64>> {
    array(record, text)?
        .values()
        .iter()
        .map(|v| match v {
            Value::Int(i) => Ok(*i),
            other => Ok((other.as_double()? + 0.0001).trunc() as i64),
        })
        .collect()
}

pub fn expr_to_array_double(record: &Record, text: &str) -> TaqlResult<Vec<f64>> {
    array(record, text)?.values().iter().map(Value::as_double).collect()
}

pub fn expr_to_array_complex(record: &Record, text: &str) -> TaqlResult<Vec<Complex64>> {
    array(record, text)?.values().iter().map(Value::as_complex).collect()
}

pub fn expr_to_array_string(record: &Record, text: &str) -> TaqlResult<Vec<String>> {
    array(record, text)?
        .values()
        .iter()
        .map(|v| Ok(v.as_str()?.to_string()))
        .collect()
}

pub fn expr_to_array_date(record: &Record, text: &str) -> TaqlResult<Vec<f64>> {
    array(record, text)?.values().iter().map(Value::as_date).collect()
}
