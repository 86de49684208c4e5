//! Range extraction: derive per-column value intervals from a WHERE expression.
//!
//! The result is a superset of the qualifying rows, never a subset: a row whose column values
//! fall outside the extracted ranges cannot satisfy the expression. Sub-expressions that cannot
//! be analysed impose no constraint. Callers use the ranges to pre-filter rows cheaply before
//! evaluating the full expression.

use crate::error::TaqlResult;
use crate::node::{compare_values, BinaryOp, ColumnData, EvalContext, NodeKind, TableExprNode};
use crate::set::SetElement;
use crate::value::{Datum, Value, ValueKind};
use log::trace;
use std::cmp::Ordering;

#[derive(Clone, Debug, PartialEq)]
pub struct Bound {
    pub value: Value,
    pub inclusive: bool,
}

/// An interval of column values; a missing bound is unbounded.
#[derive(Clone, Debug, PartialEq)]
pub struct Interval {
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
}

impl Interval {
    pub fn point(value: Value) -> Self {
        Self {
            lower: Some(Bound {
                value: value.clone(),
                inclusive: true,
            }),
            upper: Some(Bound {
                value,
                inclusive: true,
            }),
        }
    }

    /// Whether `value` may lie in the interval. Values that do not compare (NaN, unrelated
    /// types) are kept.
    pub fn contains(&self, value: &Value) -> bool {
        let cmp = |b: &Bound| compare_values(value, &b.value).ok().flatten();
        let above = self.lower.as_ref().map_or(true, |b| match cmp(b) {
            Some(Ordering::Less) => false,
            Some(Ordering::Equal) => b.inclusive,
            _ => true,
        });
        let below = self.upper.as_ref().map_or(true, |b| match cmp(b) {
            Some(Ordering::Greater) => false,
            Some(Ordering::Equal) => b.inclusive,
            _ => true,
        });
        above && below
    }

    /// Intersection, `None` when it is certainly empty.
    fn intersect(&self, other: &Interval) -> Option<Interval> {
        let lower = tighter(self.lower.as_ref(), other.lower.as_ref(), Ordering::Greater);
        let upper = tighter(self.upper.as_ref(), other.upper.as_ref(), Ordering::Less);
        if let (Some(lo), Some(hi)) = (&lower, &upper) {
            match compare_values(&lo.value, &hi.value).ok().flatten() {
                Some(Ordering::Greater) => return None,
                Some(Ordering::Equal) if !(lo.inclusive && hi.inclusive) => return None,
                _ => {}
            }
        }
        Some(Interval { lower, upper })
    }
}

/// The more restrictive of two bounds: the larger lower bound (`prefer == Greater`) or the
/// smaller upper bound. When the bounds do not compare, the first is kept.
fn tighter(a: Option<&Bound>, b: Option<&Bound>, prefer: Ordering) -> Option<Bound> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) | (None, Some(x)) => Some(x.clone()),
        (Some(x), Some(y)) => Some(match compare_values(&x.value, &y.value).ok().flatten() {
            Some(Ordering::Equal) => Bound {
                value: x.value.clone(),
                inclusive: x.inclusive && y.inclusive,
            },
            Some(o) if o == prefer => x.clone(),
            Some(_) => y.clone(),
            None => x.clone(),
        }),
    }
}

/// The values a column may take: a union of intervals.
#[derive(Clone, Debug)]
pub struct ColumnRange {
    column: TableExprNode,
    intervals: Vec<Interval>,
}

impl ColumnRange {
    pub fn column(&self) -> &str {
        self.column.column_name().unwrap_or_default()
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.intervals.iter().any(|i| i.contains(value))
    }
}

/// A conjunction of column ranges. An empty set constrains nothing.
#[derive(Clone, Debug, Default)]
pub struct RangeSet {
    columns: Vec<ColumnRange>,
}

impl RangeSet {
    pub fn columns(&self) -> &[ColumnRange] {
        &self.columns
    }

    pub fn is_unconstrained(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnRange> {
        self.columns.iter().find(|c| c.column() == name)
    }

    /// Whether a row with the given column values may satisfy the expression.
    pub fn admits(&self, values: &dyn Fn(&str) -> Option<Value>) -> bool {
        self.columns.iter().all(|range| match values(range.column()) {
            Some(value) => range.contains(&value),
            None => true,
        })
    }

    /// Keeps the rows (in order) whose column values lie in the ranges, reading each
    /// constrained column once.
    pub fn filter_rows(&self, ctx: &EvalContext<'_>, rows: &[u64]) -> TaqlResult<Vec<u64>> {
        let mut keep = vec![true; rows.len()];
        for range in &self.columns {
            let data = range.column.get_column(ctx, rows)?;
            for (i, flag) in keep.iter_mut().enumerate() {
                if *flag {
                    *flag = match data_value(&data, i) {
                        Some(value) => range.contains(&value),
                        None => true,
                    };
                }
            }
        }
        Ok(rows
            .iter()
            .zip(keep)
            .filter_map(|(&row, k)| k.then_some(row))
            .collect())
    }

    fn and(mut self, other: RangeSet) -> RangeSet {
        for range in other.columns {
            match self
                .columns
                .iter_mut()
                .find(|c| c.column() == range.column())
            {
                Some(existing) => {
                    let mut intervals = Vec::new();
                    for a in &existing.intervals {
                        for b in &range.intervals {
                            intervals.extend(a.intersect(b));
                        }
                    }
                    existing.intervals = intervals;
                }
                None => self.columns.push(range),
            }
        }
        self
    }

    /// Union; only columns constrained on both sides stay constrained.
    fn or(self, other: RangeSet) -> Option<RangeSet> {
        let mut columns = Vec::new();
        for mut range in self.columns {
            if let Some(theirs) = other.columns.iter().find(|c| c.column() == range.column()) {
                range.intervals.extend(theirs.intervals.iter().cloned());
                columns.push(range);
            }
        }
        if columns.is_empty() {
            trace!("range extraction: OR of unrelated columns");
            return None;
        }
        Some(RangeSet { columns })
    }
}

fn data_value(data: &ColumnData, index: usize) -> Option<Value> {
    match data.datum(index)? {
        Datum::Scalar(value) => Some(value),
        Datum::Array(_) => None,
    }
}

impl TableExprNode {
    /// Per-column value ranges implied by this (boolean) expression.
    pub fn ranges(&self) -> RangeSet {
        extract(self).unwrap_or_default()
    }
}

fn is_scalar_column(node: &TableExprNode) -> bool {
    matches!(node.kind(), NodeKind::Column { .. }) && node.value_kind() == ValueKind::Scalar
}

fn constant_scalar(node: &TableExprNode) -> Option<Value> {
    match node.constant_value()? {
        Datum::Scalar(value) => Some(value.clone()),
        Datum::Array(_) => None,
    }
}

fn single(column: &TableExprNode, interval: Interval) -> RangeSet {
    RangeSet {
        columns: vec![ColumnRange {
            column: column.clone(),
            intervals: vec![interval],
        }],
    }
}

fn extract(node: &TableExprNode) -> Option<RangeSet> {
    match node.kind() {
        NodeKind::Binary(BinaryOp::And, a, b) => match (extract(a), extract(b)) {
            (Some(x), Some(y)) => Some(x.and(y)),
            (Some(x), None) | (None, Some(x)) => Some(x),
            (None, None) => None,
        },
        NodeKind::Binary(BinaryOp::Or, a, b) => extract(a)?.or(extract(b)?),
        NodeKind::Binary(op, a, b) if op.is_comparison() => {
            if is_scalar_column(a) {
                comparison(*op, a, &constant_scalar(b)?)
            } else if is_scalar_column(b) {
                comparison(op.mirrored(), b, &constant_scalar(a)?)
            } else {
                None
            }
        }
        NodeKind::In {
            expr,
            set,
            negate: false,
        } if is_scalar_column(expr) => {
            let mut intervals = Vec::new();
            for element in set.elements() {
                intervals.extend(element_intervals(element)?);
            }
            Some(RangeSet {
                columns: vec![ColumnRange {
                    column: expr.clone(),
                    intervals,
                }],
            })
        }
        other => {
            trace!("range extraction gives up on {}", describe(other));
            None
        }
    }
}

fn describe(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::Unary(..) => "a unary operator",
        NodeKind::Binary(..) => "a binary operator",
        NodeKind::Func(..) | NodeKind::Udf(..) => "a function call",
        NodeKind::In { .. } => "a set lookup",
        _ => "an operand",
    }
}

fn comparison(op: BinaryOp, column: &TableExprNode, value: &Value) -> Option<RangeSet> {
    let bound = |inclusive| {
        Some(Bound {
            value: value.clone(),
            inclusive,
        })
    };
    let interval = match op {
        BinaryOp::Eq => Interval::point(value.clone()),
        BinaryOp::Lt => Interval {
            lower: None,
            upper: bound(false),
        },
        BinaryOp::Le => Interval {
            lower: None,
            upper: bound(true),
        },
        BinaryOp::Gt => Interval {
            lower: bound(false),
            upper: None,
        },
        BinaryOp::Ge => Interval {
            lower: bound(true),
            upper: None,
        },
        _ => {
            trace!("range extraction gives up on operator {}", op.symbol());
            return None;
        }
    };
    Some(single(column, interval))
}

fn element_intervals(element: &SetElement) -> Option<Vec<Interval>> {
    let bound = |node: &Option<TableExprNode>, inclusive: bool| -> Option<Option<Bound>> {
        match node {
            None => Some(None),
            Some(node) => Some(Some(Bound {
                value: constant_scalar(node)?,
                inclusive,
            })),
        }
    };
    match element {
        SetElement::Value(node) => match node.constant_value()? {
            Datum::Scalar(value) => Some(vec![Interval::point(value.clone())]),
            Datum::Array(array) => Some(array.values().iter().cloned().map(Interval::point).collect()),
        },
        SetElement::Range { start, end, .. } => Some(vec![Interval {
            lower: bound(start, true)?,
            upper: bound(end, false)?,
        }]),
        SetElement::Interval {
            lower,
            upper,
            lower_closed,
            upper_closed,
        } => Some(vec![Interval {
            lower: bound(lower, *lower_closed)?,
            upper: bound(upper, *upper_closed)?,
        }]),
    }
}
