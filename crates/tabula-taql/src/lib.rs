//! TaQL, the table query language of tabula.
//!
//! This crate focuses on:
//! - An expression tree over table columns, record fields and constants, typed and unit-checked
//!   when it is built, folded when its operands are constant and evaluated either row by row or
//!   a whole column at a time.
//! - Range extraction: per-column value intervals implied by a WHERE expression, used to
//!   pre-filter rows before the exact evaluation.
//! - A lexer and parser for TaQL statements and standalone expressions, and a session that
//!   executes statements against a catalog of tables.
//! - Record expressions: TaQL expressions evaluated against a [`tabula_tables::Record`].

#![forbid(unsafe_code)]

mod aggregate;
pub mod ast;
mod bind;
mod datetime;
mod error;
mod executor;
mod functions;
mod lexer;
mod node;
mod parser;
mod pattern;
mod ranges;
mod record_expr;
mod set;
mod udf;
mod unit_lexer;
mod units;
mod value;

pub use crate::aggregate::Reduction;
pub use crate::datetime::{datetime_from_mjd, format_datetime, mjd_from_datetime, parse_datetime, parse_sexagesimal};
pub use crate::error::{TaqlError, TaqlResult};
pub use crate::executor::{QueryResult, TaqlOptions, TaqlSession};
pub use crate::functions::{describe as describe_functions, Func, FuncCategory};
pub use crate::node::{BinaryOp, ColumnData, EvalContext, IndexSpec, TableExprNode, UnaryOp};
pub use crate::parser::{parse_expression, parse_statement};
pub use crate::pattern::{PatternKind, TaqlRegex};
pub use crate::ranges::{Bound, ColumnRange, Interval, RangeSet};
pub use crate::record_expr::{
    expr_to_array_bool, expr_to_array_complex, expr_to_array_date, expr_to_array_double,
    expr_to_array_int, expr_to_array_string, expr_to_bool, expr_to_complex, expr_to_date,
    expr_to_double, expr_to_int, expr_to_string, RecordExpr,
};
pub use crate::set::{SetElement, TableExprSet};
pub use crate::udf::{FunctionRegistry, UserFunction};
pub use crate::unit_lexer::{normalize_unit, parse_unit_spelling, UnitSpellingFlags};
pub use crate::units::Unit;
pub use crate::value::{ArrayDatum, Datum, Value, ValueKind, ValueType};
