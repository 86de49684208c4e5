//! The expression tree.
//!
//! A [`TableExprNode`] is a cheap, shareable handle to an immutable node. Every constructor
//! resolves the result type, kind and unit of the new node, so type and unit errors surface
//! while an expression is being built rather than while it is evaluated. A node whose operands
//! are all constant is evaluated on the spot and replaced by a constant.
//!
//! Nodes evaluate in two ways: [`TableExprNode::get`] computes the value for a single row and
//! [`TableExprNode::get_column`] computes a whole column of values for a list of rows, reading
//! each referenced column once.

use crate::aggregate::Reduction;
use crate::error::{TaqlError, TaqlResult};
use crate::functions::{self, Func, UnitRule};
use crate::set::TableExprSet;
use crate::udf::UserFunction;
use crate::units::Unit;
use crate::value::{ArrayDatum, Datum, Value, ValueKind, ValueType};
use log::trace;
use num_complex::Complex64;
use std::cmp::Ordering;
use std::sync::Arc;
use tabula_tables::{ColumnDesc, Record, RecordField, Scalar, Shape, TableView};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `~=`: equal within a relative tolerance of 1e-5.
    Near,
    NotNear,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Match,
    NotMatch,
}

const NEAR_TOLERANCE: f64 = 1e-5;

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::IntDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Near => "~=",
            BinaryOp::NotNear => "!~=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Match => "~",
            BinaryOp::NotMatch => "!~",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::Near
                | BinaryOp::NotNear
        )
    }

    /// The comparison with its operands swapped: `a < b` is `b > a`.
    pub fn mirrored(self) -> BinaryOp {
        match self {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::Le => BinaryOp::Ge,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Ge => BinaryOp::Le,
            other => other,
        }
    }
}

/// One axis of an index expression `a[i, start:end:step]`.
#[derive(Clone, Debug)]
pub enum IndexSpec {
    Single(TableExprNode),
    Slice {
        start: Option<TableExprNode>,
        end: Option<TableExprNode>,
        step: Option<TableExprNode>,
    },
}

impl IndexSpec {
    fn nodes(&self) -> impl Iterator<Item = &TableExprNode> {
        let (a, b, c) = match self {
            IndexSpec::Single(node) => (Some(node), None, None),
            IndexSpec::Slice { start, end, step } => (start.as_ref(), end.as_ref(), step.as_ref()),
        };
        a.into_iter().chain(b).chain(c)
    }
}

#[derive(Clone, Debug)]
pub(crate) enum NodeKind {
    Const(Datum),
    Column {
        name: String,
        desc: ColumnDesc,
        /// Set for epoch columns: factor converting stored values to days.
        epoch_scale: Option<f64>,
    },
    Field {
        path: String,
    },
    Unary(UnaryOp, TableExprNode),
    Binary(BinaryOp, TableExprNode, TableExprNode),
    Func(Func, Vec<TableExprNode>),
    Udf(Arc<dyn UserFunction>, Vec<TableExprNode>),
    In {
        expr: TableExprNode,
        set: TableExprSet,
        negate: bool,
    },
    Index {
        array: TableExprNode,
        indices: Vec<IndexSpec>,
    },
    /// Multiplies by a unit conversion factor.
    Scale(TableExprNode, f64),
    ArrayLit(Vec<TableExprNode>),
}

#[derive(Debug)]
struct ExprNode {
    kind: NodeKind,
    value_type: ValueType,
    value_kind: ValueKind,
    unit: Option<Unit>,
}

#[derive(Clone, Debug)]
pub struct TableExprNode {
    rep: Arc<ExprNode>,
}

pub(crate) fn column_unit(desc: &ColumnDesc) -> TaqlResult<Option<Unit>> {
    match desc.unit.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => Ok(Some(Unit::parse(text)?)),
        _ => Ok(None),
    }
}

/// Days per stored unit for a column described as an epoch (keyword `MEASINFO.type ==
/// "epoch"`), `None` for other columns.
pub(crate) fn epoch_scale(desc: &ColumnDesc) -> TaqlResult<Option<f64>> {
    let is_epoch = matches!(
        desc.keywords.get_path("MEASINFO.type"),
        Some(RecordField::Scalar(Scalar::String(kind))) if kind.eq_ignore_ascii_case("epoch")
    );
    if !is_epoch {
        return Ok(None);
    }
    match column_unit(desc)? {
        Some(unit) => Ok(Some(unit.conversion_factor(Unit::day())?)),
        None => Ok(Some(1.0)),
    }
}

/// What an expression is evaluated against.
#[derive(Clone, Copy, Debug, Default)]
pub struct EvalContext<'a> {
    pub table: Option<&'a dyn TableView>,
    pub record: Option<&'a Record>,
    /// Rows of the current group, for aggregate functions.
    pub group: Option<&'a [u64]>,
}

impl<'a> EvalContext<'a> {
    pub fn table(table: &'a dyn TableView) -> Self {
        Self {
            table: Some(table),
            ..Self::default()
        }
    }

    pub fn record(record: &'a Record) -> Self {
        Self {
            record: Some(record),
            ..Self::default()
        }
    }

    pub fn with_group(self, group: &'a [u64]) -> Self {
        Self {
            group: Some(group),
            ..self
        }
    }

    fn require_table(&self, what: &str) -> TaqlResult<&'a dyn TableView> {
        self.table.ok_or_else(|| TaqlError::NoTable(what.to_string()))
    }
}

/// A column of evaluated values; scalar results are kept in typed vectors.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnData {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    Double(Vec<f64>),
    Complex(Vec<Complex64>),
    String(Vec<String>),
    Date(Vec<f64>),
    Datums(Vec<Datum>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Bool(v) => v.len(),
            ColumnData::Int(v) => v.len(),
            ColumnData::Double(v) | ColumnData::Date(v) => v.len(),
            ColumnData::Complex(v) => v.len(),
            ColumnData::String(v) => v.len(),
            ColumnData::Datums(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn datum(&self, index: usize) -> Option<Datum> {
        let value = match self {
            ColumnData::Bool(v) => Value::Bool(*v.get(index)?),
            ColumnData::Int(v) => Value::Int(*v.get(index)?),
            ColumnData::Double(v) => Value::Double(*v.get(index)?),
            ColumnData::Complex(v) => Value::Complex(*v.get(index)?),
            ColumnData::String(v) => Value::String(v.get(index)?.clone()),
            ColumnData::Date(v) => Value::Date(*v.get(index)?),
            ColumnData::Datums(v) => return v.get(index).cloned(),
        };
        Some(Datum::Scalar(value))
    }

    pub fn into_datums(self) -> Vec<Datum> {
        fn wrap<T>(values: Vec<T>, f: impl Fn(T) -> Value) -> Vec<Datum> {
            values.into_iter().map(|v| Datum::Scalar(f(v))).collect()
        }
        match self {
            ColumnData::Bool(v) => wrap(v, Value::Bool),
            ColumnData::Int(v) => wrap(v, Value::Int),
            ColumnData::Double(v) => wrap(v, Value::Double),
            ColumnData::Complex(v) => wrap(v, Value::Complex),
            ColumnData::String(v) => wrap(v, Value::String),
            ColumnData::Date(v) => wrap(v, Value::Date),
            ColumnData::Datums(v) => v,
        }
    }

    /// Packs evaluated datums, using a typed vector when all of them are scalars of
    /// `value_type`.
    pub fn from_datums(value_type: ValueType, datums: Vec<Datum>) -> ColumnData {
        if datums.iter().any(|d| d.kind() == ValueKind::Array || d.value_type() != value_type) {
            return ColumnData::Datums(datums);
        }
        let scalars = datums.into_iter().filter_map(|d| match d {
            Datum::Scalar(v) => Some(v),
            Datum::Array(_) => None,
        });
        match value_type {
            ValueType::Bool => ColumnData::Bool(scalars.filter_map(|v| v.as_bool().ok()).collect()),
            ValueType::Int => ColumnData::Int(scalars.filter_map(|v| v.as_int().ok()).collect()),
            ValueType::Double => {
                ColumnData::Double(scalars.filter_map(|v| v.as_double().ok()).collect())
            }
            ValueType::Complex => {
                ColumnData::Complex(scalars.filter_map(|v| v.as_complex().ok()).collect())
            }
            ValueType::Date => ColumnData::Date(scalars.filter_map(|v| v.as_date().ok()).collect()),
            ValueType::String => ColumnData::String(
                scalars
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s),
                        _ => None,
                    })
                    .collect(),
            ),
            ValueType::Regex => ColumnData::Datums(scalars.map(Datum::Scalar).collect()),
        }
    }

    fn reals(&self) -> Option<Vec<f64>> {
        match self {
            ColumnData::Int(v) => Some(v.iter().map(|&i| i as f64).collect()),
            ColumnData::Double(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl TableExprNode {
    fn make(kind: NodeKind, value_type: ValueType, value_kind: ValueKind, unit: Option<Unit>) -> Self {
        Self {
            rep: Arc::new(ExprNode {
                kind,
                value_type,
                value_kind,
                unit,
            }),
        }
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        Self::from_datum(Datum::Scalar(value.into()))
    }

    pub fn from_datum(datum: Datum) -> Self {
        let (value_type, value_kind) = (datum.value_type(), datum.kind());
        Self::make(NodeKind::Const(datum), value_type, value_kind, None)
    }

    /// A reference to a column of `table`. Columns described as epochs (keyword
    /// `MEASINFO.type == "epoch"`) evaluate as datetimes.
    pub fn column(table: &dyn TableView, name: &str) -> TaqlResult<Self> {
        let desc = table
            .column_desc(name)
            .map_err(|_| TaqlError::UnknownColumn(name.to_string()))?;
        let unit = column_unit(&desc)?;
        let epoch_scale = epoch_scale(&desc)?;
        let mut value_type = ValueType::of_data_type(desc.data_type);
        let mut unit = unit;
        if epoch_scale.is_some() {
            value_type = ValueType::Date;
            unit = None;
        }
        let value_kind = if desc.is_array() {
            ValueKind::Array
        } else {
            ValueKind::Scalar
        };
        Ok(Self::make(
            NodeKind::Column {
                name: name.to_string(),
                desc,
                epoch_scale,
            },
            value_type,
            value_kind,
            unit,
        ))
    }

    /// A reference to a (possibly nested, `a.b.c`) field of `record`. The record only fixes
    /// the type; values come from the record in the evaluation context.
    pub fn field(record: &Record, path: &str) -> TaqlResult<Self> {
        let field = record
            .get_path(path)
            .ok_or_else(|| TaqlError::UnknownField(path.to_string()))?;
        let (value_type, value_kind) = match field {
            RecordField::Scalar(s) => (ValueType::of_data_type(s.data_type()), ValueKind::Scalar),
            RecordField::Array(a) => (ValueType::of_data_type(a.data_type()), ValueKind::Array),
            RecordField::Record(_) => {
                return Err(TaqlError::type_error(format!(
                    "field {path} is a record, not a value"
                )))
            }
        };
        Ok(Self::make(
            NodeKind::Field {
                path: path.to_string(),
            },
            value_type,
            value_kind,
            None,
        ))
    }

    pub fn value_type(&self) -> ValueType {
        self.rep.value_type
    }

    pub fn value_kind(&self) -> ValueKind {
        self.rep.value_kind
    }

    pub fn unit(&self) -> Option<&Unit> {
        self.rep.unit.as_ref()
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.rep.kind, NodeKind::Const(_))
    }

    pub fn constant_value(&self) -> Option<&Datum> {
        match &self.rep.kind {
            NodeKind::Const(d) => Some(d),
            _ => None,
        }
    }

    pub(crate) fn kind(&self) -> &NodeKind {
        &self.rep.kind
    }

    /// The referenced column, when this node is a plain column reference.
    pub fn column_name(&self) -> Option<&str> {
        match &self.rep.kind {
            NodeKind::Column { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn ptr_eq(&self, other: &TableExprNode) -> bool {
        Arc::ptr_eq(&self.rep, &other.rep)
    }

    fn children(&self) -> Vec<&TableExprNode> {
        match &self.rep.kind {
            NodeKind::Const(_) | NodeKind::Column { .. } | NodeKind::Field { .. } => Vec::new(),
            NodeKind::Unary(_, a) | NodeKind::Scale(a, _) => vec![a],
            NodeKind::Binary(_, a, b) => vec![a, b],
            NodeKind::Func(_, args) | NodeKind::Udf(_, args) | NodeKind::ArrayLit(args) => {
                args.iter().collect()
            }
            NodeKind::In { expr, set, .. } => {
                let mut nodes = vec![expr];
                nodes.extend(set.nodes());
                nodes
            }
            NodeKind::Index { array, indices } => {
                let mut nodes = vec![array];
                nodes.extend(indices.iter().flat_map(IndexSpec::nodes));
                nodes
            }
        }
    }

    /// Whether any node in the tree satisfies `pred`.
    pub(crate) fn any_node(&self, pred: &dyn Fn(&TableExprNode) -> bool) -> bool {
        pred(self) || self.children().into_iter().any(|c| c.any_node(pred))
    }

    pub fn uses_aggregate(&self) -> bool {
        self.any_node(&|n| matches!(&n.rep.kind, NodeKind::Func(f, _) if f.is_aggregate()))
    }

    /// Whether evaluation needs a table (columns, row numbers, aggregates).
    pub fn uses_table(&self) -> bool {
        self.any_node(&|n| match &n.rep.kind {
            NodeKind::Column { .. } => true,
            NodeKind::Func(f, _) => matches!(f, Func::RowNr | Func::RowId) || f.is_aggregate(),
            _ => false,
        })
    }

    fn is_foldable(&self) -> bool {
        let pure = match &self.rep.kind {
            NodeKind::Const(_) => return false,
            NodeKind::Column { .. } | NodeKind::Field { .. } => false,
            NodeKind::Func(f, args) => !f.needs_context() && !f.defaults_to_now(args.len()),
            NodeKind::Udf(udf, _) => udf.is_deterministic(),
            _ => true,
        };
        pure && self.children().iter().all(|c| c.is_constant())
    }

    /// Replaces the node by its value when all operands are constant.
    fn folded(self) -> TaqlResult<Self> {
        if !self.is_foldable() {
            return Ok(self);
        }
        let datum = self.get(&EvalContext::default(), 0)?;
        trace!("folded constant expression to {datum}");
        let value_kind = datum.kind();
        Ok(Self::make(
            NodeKind::Const(datum),
            self.value_type(),
            value_kind,
            self.rep.unit.clone(),
        ))
    }

    fn retagged(&self, unit: Option<Unit>) -> Self {
        Self::make(self.rep.kind.clone(), self.value_type(), self.value_kind(), unit)
    }

    fn scaled(self, factor: f64, unit: Unit) -> TaqlResult<Self> {
        if factor == 1.0 {
            return Ok(self.retagged(Some(unit)));
        }
        let value_type = match self.value_type() {
            ValueType::Int | ValueType::Double => ValueType::Double,
            ValueType::Complex => ValueType::Complex,
            other => {
                return Err(TaqlError::Unit(format!(
                    "a {other} value cannot be converted to unit {unit}"
                )))
            }
        };
        let value_kind = self.value_kind();
        Self::make(NodeKind::Scale(self, factor), value_type, value_kind, Some(unit)).folded()
    }

    /// Attaches a unit (`10m`, `(expr)km`; the unit is glued to the number or parenthesis).
    /// A value that already has a unit is converted.
    pub fn with_unit(self, unit: &str) -> TaqlResult<Self> {
        let target = Unit::parse(unit)?;
        match self.unit() {
            None => Ok(self.retagged(Some(target))),
            Some(current) => {
                let factor = current.conversion_factor(&target)?;
                self.scaled(factor, target)
            }
        }
    }

    /// Converts an angle to rad; a value without a unit is taken to be in rad already.
    fn in_radians(self) -> TaqlResult<Self> {
        match self.unit() {
            None => Ok(self),
            Some(unit) if unit.is_angle() => {
                let factor = unit.conversion_factor(Unit::rad())?;
                self.scaled(factor, Unit::rad().clone())
            }
            Some(unit) => Err(TaqlError::Unit(format!("unit {unit} is not an angle"))),
        }
    }

    pub fn unary(op: UnaryOp, operand: TableExprNode) -> TaqlResult<Self> {
        let t = operand.value_type();
        let value_type = match op {
            UnaryOp::Neg if t.is_numeric() => t,
            UnaryOp::Not if t == ValueType::Bool => t,
            UnaryOp::BitNot if t == ValueType::Int => t,
            _ => {
                return Err(TaqlError::type_error(format!(
                    "operator {op:?} cannot be applied to a {t} operand"
                )))
            }
        };
        let unit = if op == UnaryOp::Neg {
            operand.rep.unit.clone()
        } else {
            None
        };
        let value_kind = operand.value_kind();
        Self::make(NodeKind::Unary(op, operand), value_type, value_kind, unit).folded()
    }

    pub fn binary(op: BinaryOp, left: TableExprNode, right: TableExprNode) -> TaqlResult<Self> {
        use ValueType as T;
        let (lt, rt) = (left.value_type(), right.value_type());
        let value_kind = if left.value_kind() == ValueKind::Scalar
            && right.value_kind() == ValueKind::Scalar
        {
            ValueKind::Scalar
        } else {
            ValueKind::Array
        };
        let mismatch = || {
            TaqlError::type_error(format!(
                "operator {} cannot be applied to {lt} and {rt} operands",
                op.symbol()
            ))
        };
        let numeric = lt.is_numeric() && rt.is_numeric();
        let mut right = right;
        let (value_type, unit) = match op {
            BinaryOp::Add | BinaryOp::Sub => match (lt, rt) {
                (T::String, T::String) if op == BinaryOp::Add => (T::String, None),
                (T::Date, T::Date) if op == BinaryOp::Sub => (T::Double, Some(Unit::day().clone())),
                (T::Date, T::Int | T::Double) => {
                    right = in_days(right)?;
                    (T::Date, None)
                }
                (T::Int | T::Double, T::Date) if op == BinaryOp::Add => {
                    let left = in_days(left)?;
                    return Self::make(NodeKind::Binary(op, right, left), T::Date, value_kind, None)
                        .folded();
                }
                _ if numeric => {
                    let (unit, converted) = harmonize_units(&left, right)?;
                    right = converted;
                    (T::promote(lt, rt).ok_or_else(mismatch)?, unit)
                }
                _ => return Err(mismatch()),
            },
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::IntDiv | BinaryOp::Mod => {
                if !numeric || (op != BinaryOp::Mul && op != BinaryOp::Div && !(lt.is_real() && rt.is_real())) {
                    return Err(mismatch());
                }
                let promoted = T::promote(lt, rt).ok_or_else(mismatch)?;
                let value_type = match op {
                    BinaryOp::Div if promoted == T::Int => T::Double,
                    _ => promoted,
                };
                let unit = match op {
                    BinaryOp::Mul => combine_units(left.unit(), right.unit(), Unit::multiply),
                    BinaryOp::Div | BinaryOp::IntDiv => {
                        combine_units(left.unit(), right.unit(), Unit::divide)
                    }
                    _ => {
                        let (unit, converted) = harmonize_units(&left, right)?;
                        right = converted;
                        unit
                    }
                };
                (value_type, unit)
            }
            BinaryOp::Pow => {
                if !numeric {
                    return Err(mismatch());
                }
                let complex = lt == T::Complex || rt == T::Complex;
                (if complex { T::Complex } else { T::Double }, None)
            }
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::Near
            | BinaryOp::NotNear => {
                let ordered = !matches!(
                    op,
                    BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Near | BinaryOp::NotNear
                );
                let ok = match (lt, rt) {
                    _ if numeric => {
                        let (_, converted) = harmonize_units(&left, right)?;
                        right = converted;
                        true
                    }
                    (T::Date, T::Date | T::Int | T::Double) | (T::Int | T::Double, T::Date) => true,
                    (T::String, T::String) => !matches!(op, BinaryOp::Near | BinaryOp::NotNear),
                    (T::Bool, T::Bool) => !ordered && !matches!(op, BinaryOp::Near | BinaryOp::NotNear),
                    _ => false,
                };
                if !ok {
                    return Err(mismatch());
                }
                (T::Bool, None)
            }
            BinaryOp::And | BinaryOp::Or => {
                if lt != T::Bool || rt != T::Bool {
                    return Err(mismatch());
                }
                (T::Bool, None)
            }
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                if lt != T::Int || rt != T::Int {
                    return Err(mismatch());
                }
                (T::Int, None)
            }
            BinaryOp::Match | BinaryOp::NotMatch => match (lt, rt) {
                (T::String, T::Regex) => (T::Bool, None),
                (T::Regex, T::String) => {
                    return Self::make(NodeKind::Binary(op, right, left), T::Bool, value_kind, None)
                        .folded()
                }
                _ => return Err(mismatch()),
            },
        };
        Self::make(NodeKind::Binary(op, left, right), value_type, value_kind, unit).folded()
    }

    pub fn function(func: Func, args: Vec<TableExprNode>) -> TaqlResult<Self> {
        let mut args = args;
        let unit = match func.unit_rule() {
            UnitRule::Drop => None,
            UnitRule::Keep => {
                let first = if func == Func::Iif { 1 } else { 0 };
                let harmonized = matches!(func, Func::Iif | Func::Min2 | Func::Max2 | Func::Fmod);
                if harmonized && args.len() > first + 1 {
                    let second = args.remove(first + 1);
                    let (unit, converted) = harmonize_units(&args[first], second)?;
                    args.insert(first + 1, converted);
                    unit
                } else {
                    args.get(first).and_then(|a| a.rep.unit.clone())
                }
            }
            UnitRule::AngleIn => {
                args = to_radians(args)?;
                None
            }
            UnitRule::AngleOut => Some(Unit::rad().clone()),
            UnitRule::AngleInOut => {
                args = to_radians(args)?;
                Some(Unit::rad().clone())
            }
        };
        let types: Vec<(ValueType, ValueKind)> =
            args.iter().map(|a| (a.value_type(), a.value_kind())).collect();
        let (value_type, value_kind) = func.result_type(&types)?;
        if func.is_aggregate() {
            if let Some(nested) = args.iter().find(|a| a.uses_aggregate()) {
                return Err(TaqlError::type_error(format!(
                    "aggregate functions cannot be nested ({func:?} of {:?})",
                    nested.rep.kind
                )));
            }
        }
        Self::make(NodeKind::Func(func, args), value_type, value_kind, unit).folded()
    }

    pub fn user_function(function: Arc<dyn UserFunction>, args: Vec<TableExprNode>) -> TaqlResult<Self> {
        let types: Vec<(ValueType, ValueKind)> =
            args.iter().map(|a| (a.value_type(), a.value_kind())).collect();
        let (value_type, value_kind) = function.result_type(&types)?;
        let unit = function.unit().map(Unit::parse).transpose()?;
        Self::make(NodeKind::Udf(function, args), value_type, value_kind, unit).folded()
    }

    /// `expr IN set` (or `NOT IN` when `negate`).
    pub fn in_set(expr: TableExprNode, set: TableExprSet, negate: bool) -> TaqlResult<Self> {
        let set = set.checked_for(&expr)?;
        let value_kind = expr.value_kind();
        Self::make(NodeKind::In { expr, set, negate }, ValueType::Bool, value_kind, None).folded()
    }

    /// Indexes or slices an array with 0-based indices and exclusive slice ends.
    pub fn index(array: TableExprNode, indices: Vec<IndexSpec>) -> TaqlResult<Self> {
        if array.value_kind() != ValueKind::Array {
            return Err(TaqlError::type_error("only arrays can be indexed"));
        }
        for node in indices.iter().flat_map(IndexSpec::nodes) {
            if node.value_type() != ValueType::Int || node.value_kind() != ValueKind::Scalar {
                return Err(TaqlError::type_error("array indices must be integer scalars"));
            }
        }
        let value_kind = if indices.iter().all(|i| matches!(i, IndexSpec::Single(_))) {
            ValueKind::Scalar
        } else {
            ValueKind::Array
        };
        let value_type = array.value_type();
        let unit = array.rep.unit.clone();
        Self::make(NodeKind::Index { array, indices }, value_type, value_kind, unit).folded()
    }

    /// An array literal `[a, b, c]`. Array elements are stacked along a new last axis.
    pub fn array(elements: Vec<TableExprNode>) -> TaqlResult<Self> {
        let mut value_type: Option<ValueType> = None;
        for element in &elements {
            let t = element.value_type();
            value_type = Some(match value_type {
                None => t,
                Some(current) if current == t => t,
                Some(current) => ValueType::promote(current, t).ok_or_else(|| {
                    TaqlError::type_error(format!("array mixes {current} and {t} elements"))
                })?,
            });
        }
        let unit = elements.first().and_then(|e| e.rep.unit.clone());
        Self::make(
            NodeKind::ArrayLit(elements),
            value_type.unwrap_or(ValueType::Int),
            ValueKind::Array,
            unit,
        )
        .folded()
    }

    /// Evaluates the expression for one row.
    pub fn get(&self, ctx: &EvalContext<'_>, row: u64) -> TaqlResult<Datum> {
        match &self.rep.kind {
            NodeKind::Const(datum) => Ok(datum.clone()),
            NodeKind::Column {
                name, epoch_scale, ..
            } => {
                let table = ctx.require_table(name)?;
                let cell = table.get_cell(name, row)?;
                let datum = Datum::from_cell(&cell)?;
                match epoch_scale {
                    Some(scale) => to_dates(datum, *scale),
                    None => Ok(datum),
                }
            }
            NodeKind::Field { path } => {
                let record = ctx
                    .record
                    .ok_or_else(|| TaqlError::eval(format!("field {path} needs a record")))?;
                match record.get_path(path) {
                    Some(RecordField::Scalar(s)) => Ok(Datum::Scalar(Value::from_scalar(s))),
                    Some(RecordField::Array(a)) => Ok(Datum::Array(ArrayDatum::from_array_value(a))),
                    Some(RecordField::Record(_)) => Err(TaqlError::type_error(format!(
                        "field {path} is a record, not a value"
                    ))),
                    None => Err(TaqlError::UnknownField(path.clone())),
                }
            }
            NodeKind::Unary(op, operand) => {
                let datum = operand.get(ctx, row)?;
                apply_unary(*op, datum)
            }
            NodeKind::Binary(op, left, right) => {
                let a = left.get(ctx, row)?;
                if let Datum::Scalar(Value::Bool(b)) = &a {
                    match op {
                        BinaryOp::And if !b => return Ok(Datum::Scalar(Value::Bool(false))),
                        BinaryOp::Or if *b => return Ok(Datum::Scalar(Value::Bool(true))),
                        _ => {}
                    }
                }
                let b = right.get(ctx, row)?;
                apply_binary(*op, self.value_type(), &a, &b)
            }
            NodeKind::Func(func, args) => self.eval_function(*func, args, ctx, row),
            NodeKind::Udf(function, args) => {
                let values = args
                    .iter()
                    .map(|a| a.get(ctx, row))
                    .collect::<TaqlResult<Vec<_>>>()?;
                function.evaluate(&values)
            }
            NodeKind::In { expr, set, negate } => {
                let datum = expr.get(ctx, row)?;
                let negate = *negate;
                datum.map(ValueType::Bool, |v| {
                    Ok(Value::Bool(set.contains(ctx, row, v)? != negate))
                })
            }
            NodeKind::Index { array, indices } => {
                let array = array.get(ctx, row)?.into_array();
                index_array(&array, indices, ctx, row)
            }
            NodeKind::Scale(operand, factor) => {
                let factor = *factor;
                let value_type = self.value_type();
                operand.get(ctx, row)?.map(value_type, |v| match v {
                    Value::Complex(c) => Ok(Value::Complex(c * factor)),
                    other => Ok(Value::Double(other.as_double()? * factor)),
                })
            }
            NodeKind::ArrayLit(elements) => {
                let datums = elements
                    .iter()
                    .map(|e| e.get(ctx, row))
                    .collect::<TaqlResult<Vec<_>>>()?;
                stack(self.value_type(), datums)
            }
        }
    }

    pub fn get_bool(&self, ctx: &EvalContext<'_>, row: u64) -> TaqlResult<bool> {
        self.get(ctx, row)?.as_scalar()?.as_bool()
    }

    pub fn get_int(&self, ctx: &EvalContext<'_>, row: u64) -> TaqlResult<i64> {
        self.get(ctx, row)?.as_scalar()?.as_int()
    }

    pub fn get_double(&self, ctx: &EvalContext<'_>, row: u64) -> TaqlResult<f64> {
        self.get(ctx, row)?.as_scalar()?.as_double()
    }

    pub fn get_complex(&self, ctx: &EvalContext<'_>, row: u64) -> TaqlResult<Complex64> {
        self.get(ctx, row)?.as_scalar()?.as_complex()
    }

    pub fn get_string(&self, ctx: &EvalContext<'_>, row: u64) -> TaqlResult<String> {
        Ok(self.get(ctx, row)?.as_scalar()?.as_str()?.to_string())
    }

    pub fn get_date(&self, ctx: &EvalContext<'_>, row: u64) -> TaqlResult<f64> {
        self.get(ctx, row)?.as_scalar()?.as_date()
    }

    /// Whether [`TableExprNode::get_column`] can evaluate this node column-wise; otherwise it
    /// falls back to evaluating row by row.
    pub fn is_column_evaluable(&self) -> bool {
        let local = match &self.rep.kind {
            NodeKind::Const(_) => true,
            NodeKind::Column { .. } => self.value_kind() == ValueKind::Scalar,
            NodeKind::Unary(..) | NodeKind::Binary(..) | NodeKind::Scale(..) => {
                self.value_kind() == ValueKind::Scalar
            }
            _ => false,
        };
        local && self.children().iter().all(|c| c.is_column_evaluable())
    }

    /// Evaluates the expression for all `rows` at once.
    pub fn get_column(&self, ctx: &EvalContext<'_>, rows: &[u64]) -> TaqlResult<ColumnData> {
        if self.is_column_evaluable() {
            match &self.rep.kind {
                NodeKind::Const(datum) => {
                    return Ok(ColumnData::from_datums(
                        self.value_type(),
                        vec![datum.clone(); rows.len()],
                    ))
                }
                NodeKind::Column {
                    name, epoch_scale, ..
                } => {
                    let table = ctx.require_table(name)?;
                    let scalars = table.column(name)?.get_column_cells(rows)?;
                    let values = scalars.iter().map(Value::from_scalar);
                    let datums: Vec<Datum> = match epoch_scale {
                        Some(scale) => values
                            .map(|v| Ok(Datum::Scalar(Value::Date(v.as_double()? * scale))))
                            .collect::<TaqlResult<_>>()?,
                        None => values.map(Datum::Scalar).collect(),
                    };
                    return Ok(ColumnData::from_datums(self.value_type(), datums));
                }
                NodeKind::Binary(op, left, right) => {
                    let a = left.get_column(ctx, rows)?;
                    let b = right.get_column(ctx, rows)?;
                    if let Some(fast) = binary_column(*op, self.value_type(), &a, &b) {
                        return Ok(fast);
                    }
                    let datums = a
                        .into_datums()
                        .iter()
                        .zip(b.into_datums().iter())
                        .map(|(x, y)| apply_binary(*op, self.value_type(), x, y))
                        .collect::<TaqlResult<Vec<_>>>()?;
                    return Ok(ColumnData::from_datums(self.value_type(), datums));
                }
                NodeKind::Unary(op, operand) => {
                    let datums = operand
                        .get_column(ctx, rows)?
                        .into_datums()
                        .into_iter()
                        .map(|d| apply_unary(*op, d))
                        .collect::<TaqlResult<Vec<_>>>()?;
                    return Ok(ColumnData::from_datums(self.value_type(), datums));
                }
                _ => {}
            }
        }
        let datums = rows
            .iter()
            .map(|&row| self.get(ctx, row))
            .collect::<TaqlResult<Vec<_>>>()?;
        Ok(ColumnData::from_datums(self.value_type(), datums))
    }

    fn eval_function(
        &self,
        func: Func,
        args: &[TableExprNode],
        ctx: &EvalContext<'_>,
        row: u64,
    ) -> TaqlResult<Datum> {
        if func.is_aggregate() {
            return self.eval_aggregate(func, args, ctx);
        }
        match func {
            Func::Rand => Ok(Datum::Scalar(Value::Double(rand::random::<f64>()))),
            Func::RowNr => {
                ctx.require_table("rownr()")?;
                Ok(Datum::Scalar(Value::Int(row as i64)))
            }
            Func::RowId => {
                let table = ctx.require_table("rowid()")?;
                Ok(Datum::Scalar(Value::Int(table.root_row(row)? as i64)))
            }
            Func::IsDefined => {
                let arg = &args[0];
                let defined = match &arg.rep.kind {
                    NodeKind::Column { name, .. } => {
                        ctx.require_table(name)?.get_cell(name, row)?.is_defined()
                    }
                    NodeKind::Field { path } => {
                        ctx.record.is_some_and(|r| r.get_path(path).is_some())
                    }
                    _ => arg.get(ctx, row).is_ok(),
                };
                Ok(Datum::Scalar(Value::Bool(defined)))
            }
            Func::Iif => {
                let cond = args[0].get(ctx, row)?;
                if let Datum::Scalar(c) = &cond {
                    let chosen = if c.as_bool()? { &args[1] } else { &args[2] };
                    let datum = chosen.get(ctx, row)?;
                    let value_type = self.value_type();
                    if datum.value_type() == value_type {
                        return Ok(datum);
                    }
                    return datum.map(value_type, |v| v.convert_to(value_type));
                }
                let a = args[1].get(ctx, row)?;
                let b = args[2].get(ctx, row)?;
                func.evaluate(&[cond, a, b])
            }
            _ => {
                let values = args
                    .iter()
                    .map(|a| a.get(ctx, row))
                    .collect::<TaqlResult<Vec<_>>>()?;
                func.evaluate(&values)
            }
        }
    }

    fn eval_aggregate(
        &self,
        func: Func,
        args: &[TableExprNode],
        ctx: &EvalContext<'_>,
    ) -> TaqlResult<Datum> {
        let group = ctx
            .group
            .ok_or_else(|| TaqlError::eval(format!("{func:?} can only be used in a selection")))?;
        let gather = |arg: &TableExprNode| -> TaqlResult<Vec<Datum>> {
            group.iter().map(|&r| arg.get(ctx, r)).collect()
        };
        match func {
            Func::GCount => {
                let count = match args.first() {
                    None => group.len(),
                    Some(arg) => {
                        let defined = TableExprNode::function(Func::IsDefined, vec![arg.clone()])?;
                        let mut n = 0;
                        for &r in group {
                            if defined.get_bool(ctx, r)? {
                                n += 1;
                            }
                        }
                        n
                    }
                };
                Ok(Datum::Scalar(Value::Int(count as i64)))
            }
            Func::GFirst | Func::GLast => {
                let row = if func == Func::GFirst {
                    group.first()
                } else {
                    group.last()
                };
                let row = row.ok_or_else(|| TaqlError::eval("aggregate over an empty group"))?;
                args[0].get(ctx, *row)
            }
            Func::GReduce(reduction) => {
                let fraction = aggregate_fraction(reduction, args, ctx)?;
                let values: Vec<Value> = gather(&args[0])?.iter().flat_map(Datum::flatten).collect();
                reduction
                    .reduce(&values, args[0].value_type(), fraction)
                    .map(Datum::Scalar)
            }
            Func::GReduces(reduction) => {
                let fraction = aggregate_fraction(reduction, args, ctx)?;
                let datums = gather(&args[0])?;
                reduce_elementwise(reduction, args[0].value_type(), &datums, fraction)
            }
            Func::GAggr => stack(args[0].value_type(), gather(&args[0])?),
            other => Err(TaqlError::eval(format!("{other:?} is not an aggregate"))),
        }
    }
}

fn aggregate_fraction(
    reduction: Reduction,
    args: &[TableExprNode],
    ctx: &EvalContext<'_>,
) -> TaqlResult<f64> {
    if !reduction.takes_fraction() {
        return Ok(0.0);
    }
    let node = args
        .get(1)
        .ok_or_else(|| TaqlError::eval("fractile needs a fraction"))?;
    node.get(ctx, 0)?.as_scalar()?.as_double()
}

/// Reduces corresponding elements of equally shaped arrays (`gsums`, `gmeans`, ...).
fn reduce_elementwise(
    reduction: Reduction,
    arg_type: ValueType,
    datums: &[Datum],
    fraction: f64,
) -> TaqlResult<Datum> {
    let arrays: Vec<ArrayDatum> = datums.iter().cloned().map(Datum::into_array).collect();
    let Some(first) = arrays.first() else {
        return Err(TaqlError::eval("aggregate over an empty group"));
    };
    if let Some(other) = arrays.iter().find(|a| a.shape() != first.shape()) {
        return Err(TaqlError::Conformance(format!(
            "group arrays have shapes {} and {}",
            first.shape(),
            other.shape()
        )));
    }
    let result_type = reduction.result_type(arg_type)?;
    let mut values = Vec::with_capacity(first.len());
    for i in 0..first.len() {
        let column: Vec<Value> = arrays.iter().map(|a| a.values()[i].clone()).collect();
        values.push(reduction.reduce(&column, arg_type, fraction)?);
    }
    Ok(Datum::Array(first.with_values(result_type, values)?))
}

/// Stacks scalars into a vector, or equally shaped arrays along a new last axis.
fn stack(value_type: ValueType, datums: Vec<Datum>) -> TaqlResult<Datum> {
    let convert = |v: Value| {
        if v.value_type() == value_type {
            Ok(v)
        } else {
            v.convert_to(value_type)
        }
    };
    if datums.iter().all(|d| d.kind() == ValueKind::Scalar) {
        let values = datums
            .into_iter()
            .map(|d| d.into_scalar().and_then(convert))
            .collect::<TaqlResult<Vec<_>>>()?;
        return Ok(Datum::Array(ArrayDatum::new(
            Shape::vector(values.len()),
            value_type,
            values,
        )?));
    }
    let arrays: Vec<ArrayDatum> = datums.into_iter().map(Datum::into_array).collect();
    let shape = arrays[0].shape().clone();
    if let Some(other) = arrays.iter().find(|a| *a.shape() != shape) {
        return Err(TaqlError::Conformance(format!(
            "cannot stack arrays of shapes {shape} and {}",
            other.shape()
        )));
    }
    let mut dims = shape.dims().to_vec();
    dims.push(arrays.len());
    let values = arrays
        .into_iter()
        .flat_map(ArrayDatum::into_values)
        .map(convert)
        .collect::<TaqlResult<Vec<_>>>()?;
    Ok(Datum::Array(ArrayDatum::new(Shape::new(dims), value_type, values)?))
}

fn to_dates(datum: Datum, scale: f64) -> TaqlResult<Datum> {
    datum.map(ValueType::Date, |v| Ok(Value::Date(v.as_double()? * scale)))
}

/// Unit of a sum or comparison: the right operand is converted into the left's unit. An
/// operand without a unit is taken to be in the other's unit.
fn harmonize_units(
    left: &TableExprNode,
    right: TableExprNode,
) -> TaqlResult<(Option<Unit>, TableExprNode)> {
    match (left.unit(), right.unit().cloned()) {
        (Some(lu), Some(ru)) => {
            let factor = ru.conversion_factor(lu)?;
            let converted = right.scaled(factor, lu.clone())?;
            Ok((Some(lu.clone()), converted))
        }
        (Some(unit), None) => Ok((Some(unit.clone()), right)),
        (None, Some(unit)) => Ok((Some(unit), right)),
        (None, None) => Ok((None, right)),
    }
}

fn combine_units(
    left: Option<&Unit>,
    right: Option<&Unit>,
    op: impl Fn(&Unit, &Unit) -> Unit,
) -> Option<Unit> {
    match (left, right) {
        (Some(a), Some(b)) => Some(op(a, b)),
        (Some(a), None) => Some(a.clone()),
        (None, Some(b)) => Some(op(&dimensionless(), b)),
        (None, None) => None,
    }
}

fn dimensionless() -> Unit {
    // `Unit::parse("")` is an error; a dimensionless unit is the ratio of a unit with itself.
    Unit::rad().divide(Unit::rad())
}

/// Converts a time interval added to a date into days.
fn in_days(node: TableExprNode) -> TaqlResult<TableExprNode> {
    match node.unit().cloned() {
        None => Ok(node),
        Some(unit) => {
            let factor = unit.conversion_factor(Unit::day())?;
            node.scaled(factor, Unit::day().clone())
        }
    }
}

fn to_radians(args: Vec<TableExprNode>) -> TaqlResult<Vec<TableExprNode>> {
    args.into_iter().map(TableExprNode::in_radians).collect()
}

fn apply_unary(op: UnaryOp, datum: Datum) -> TaqlResult<Datum> {
    let value_type = datum.value_type();
    datum.map(value_type, |v| {
        Ok(match (op, v) {
            (UnaryOp::Neg, Value::Int(i)) => Value::Int(i.wrapping_neg()),
            (UnaryOp::Neg, Value::Double(d)) => Value::Double(-d),
            (UnaryOp::Neg, Value::Complex(c)) => Value::Complex(-c),
            (UnaryOp::Not, Value::Bool(b)) => Value::Bool(!b),
            (UnaryOp::BitNot, Value::Int(i)) => Value::Int(!i),
            (op, other) => {
                return Err(TaqlError::type_error(format!(
                    "operator {op:?} cannot be applied to {}",
                    other.value_type()
                )))
            }
        })
    })
}

pub(crate) fn apply_binary(
    op: BinaryOp,
    result_type: ValueType,
    left: &Datum,
    right: &Datum,
) -> TaqlResult<Datum> {
    Datum::zip_with(left, right, result_type, |a, b| binary_value(op, result_type, a, b))
}

fn binary_value(op: BinaryOp, result_type: ValueType, a: &Value, b: &Value) -> TaqlResult<Value> {
    use BinaryOp::*;
    match op {
        Add => match (a, b) {
            (Value::String(x), Value::String(y)) => Ok(Value::String(format!("{x}{y}"))),
            (Value::Date(d), other) | (other, Value::Date(d)) => {
                Ok(Value::Date(d + other.as_double()?))
            }
            _ => arithmetic(result_type, a, b, i64::wrapping_add, |x, y| x + y, |x, y| x + y),
        },
        Sub => match (a, b) {
            (Value::Date(x), Value::Date(y)) => Ok(Value::Double(x - y)),
            (Value::Date(x), other) => Ok(Value::Date(x - other.as_double()?)),
            _ => arithmetic(result_type, a, b, i64::wrapping_sub, |x, y| x - y, |x, y| x - y),
        },
        Mul => arithmetic(result_type, a, b, i64::wrapping_mul, |x, y| x * y, |x, y| x * y),
        Div => match result_type {
            ValueType::Complex => Ok(Value::Complex(a.as_complex()? / b.as_complex()?)),
            _ => Ok(Value::Double(a.as_double()? / b.as_double()?)),
        },
        IntDiv => match result_type {
            ValueType::Int => {
                let (x, y) = (a.as_int()?, b.as_int()?);
                if y == 0 {
                    return Err(TaqlError::eval("integer division by zero"));
                }
                Ok(Value::Int(floor_div(x, y)))
            }
            _ => Ok(Value::Double((a.as_double()? / b.as_double()?).floor())),
        },
        Mod => match result_type {
            ValueType::Int => {
                let (x, y) = (a.as_int()?, b.as_int()?);
                if y == 0 {
                    return Err(TaqlError::eval("integer modulo by zero"));
                }
                Ok(Value::Int(x.wrapping_sub(floor_div(x, y).wrapping_mul(y))))
            }
            _ => {
                let (x, y) = (a.as_double()?, b.as_double()?);
                Ok(Value::Double(x - y * (x / y).floor()))
            }
        },
        Pow => match result_type {
            ValueType::Complex => Ok(Value::Complex(a.as_complex()?.powc(b.as_complex()?))),
            _ => Ok(Value::Double(a.as_double()?.powf(b.as_double()?))),
        },
        Eq | Ne | Lt | Le | Gt | Ge => compare(op, a, b).map(Value::Bool),
        Near | NotNear => {
            let near = functions::near(a.as_complex_or_date()?, b.as_complex_or_date()?, NEAR_TOLERANCE);
            Ok(Value::Bool(near == (op == Near)))
        }
        And => Ok(Value::Bool(a.as_bool()? && b.as_bool()?)),
        Or => Ok(Value::Bool(a.as_bool()? || b.as_bool()?)),
        BitAnd => Ok(Value::Int(a.as_int()? & b.as_int()?)),
        BitOr => Ok(Value::Int(a.as_int()? | b.as_int()?)),
        BitXor => Ok(Value::Int(a.as_int()? ^ b.as_int()?)),
        Match | NotMatch => {
            let matched = b.as_regex()?.is_match(a.as_str()?);
            Ok(Value::Bool(matched == (op == Match)))
        }
    }
}

/// Division rounding towards minus infinity; `i64::MIN // -1` wraps like the other integer
/// operators.
fn floor_div(x: i64, y: i64) -> i64 {
    let q = x.wrapping_div(y);
    if (x.wrapping_rem(y) != 0) && ((x < 0) != (y < 0)) {
        q - 1
    } else {
        q
    }
}

fn arithmetic(
    result_type: ValueType,
    a: &Value,
    b: &Value,
    int_op: impl Fn(i64, i64) -> i64,
    real_op: impl Fn(f64, f64) -> f64,
    complex_op: impl Fn(Complex64, Complex64) -> Complex64,
) -> TaqlResult<Value> {
    match result_type {
        ValueType::Int => Ok(Value::Int(int_op(a.as_int()?, b.as_int()?))),
        ValueType::Double => Ok(Value::Double(real_op(a.as_double()?, b.as_double()?))),
        ValueType::Complex => Ok(Value::Complex(complex_op(a.as_complex()?, b.as_complex()?))),
        other => Err(TaqlError::type_error(format!(
            "arithmetic on {other} values"
        ))),
    }
}

/// Ordering of two comparable values, `None` when unordered (NaN).
pub(crate) fn compare_values(a: &Value, b: &Value) -> TaqlResult<Option<Ordering>> {
    Ok(match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Complex(_), _) | (_, Value::Complex(_)) => {
            let (x, y) = (a.as_complex()?, b.as_complex()?);
            if x == y {
                Some(Ordering::Equal)
            } else {
                x.norm().partial_cmp(&y.norm()).map(|o| {
                    if o == Ordering::Equal {
                        // same magnitude, different values
                        x.arg().partial_cmp(&y.arg()).unwrap_or(Ordering::Less)
                    } else {
                        o
                    }
                })
            }
        }
        _ => a.as_double()?.partial_cmp(&b.as_double()?),
    })
}

fn compare(op: BinaryOp, a: &Value, b: &Value) -> TaqlResult<bool> {
    let ordering = compare_values(a, b)?;
    Ok(match ordering {
        None => op == BinaryOp::Ne,
        Some(o) => match op {
            BinaryOp::Eq => o == Ordering::Equal,
            BinaryOp::Ne => o != Ordering::Equal,
            BinaryOp::Lt => o == Ordering::Less,
            BinaryOp::Le => o != Ordering::Greater,
            BinaryOp::Gt => o == Ordering::Greater,
            _ => o != Ordering::Less,
        },
    })
}

/// Column-wise fast path for real operands.
fn binary_column(
    op: BinaryOp,
    result_type: ValueType,
    a: &ColumnData,
    b: &ColumnData,
) -> Option<ColumnData> {
    use BinaryOp::*;
    match (a, b) {
        (ColumnData::Int(x), ColumnData::Int(y)) if result_type == ValueType::Int => {
            let f: fn(i64, i64) -> i64 = match op {
                Add => i64::wrapping_add,
                Sub => i64::wrapping_sub,
                Mul => i64::wrapping_mul,
                BitAnd => |p, q| p & q,
                BitOr => |p, q| p | q,
                BitXor => |p, q| p ^ q,
                _ => return None,
            };
            Some(ColumnData::Int(x.iter().zip(y).map(|(&p, &q)| f(p, q)).collect()))
        }
        (ColumnData::Int(x), ColumnData::Int(y)) if op.is_comparison() && op != Near && op != NotNear => {
            let f: fn(&i64, &i64) -> bool = match op {
                Eq => |p, q| p == q,
                Ne => |p, q| p != q,
                Lt => |p, q| p < q,
                Le => |p, q| p <= q,
                Gt => |p, q| p > q,
                _ => |p, q| p >= q,
            };
            Some(ColumnData::Bool(x.iter().zip(y).map(|(p, q)| f(p, q)).collect()))
        }
        (ColumnData::Bool(x), ColumnData::Bool(y)) if matches!(op, And | Or) => {
            let values = x
                .iter()
                .zip(y)
                .map(|(&p, &q)| if op == And { p && q } else { p || q })
                .collect();
            Some(ColumnData::Bool(values))
        }
        _ => {
            let (x, y) = (a.reals()?, b.reals()?);
            if result_type == ValueType::Double {
                let f: fn(f64, f64) -> f64 = match op {
                    Add => |p, q| p + q,
                    Sub => |p, q| p - q,
                    Mul => |p, q| p * q,
                    Div => |p, q| p / q,
                    _ => return None,
                };
                Some(ColumnData::Double(x.iter().zip(&y).map(|(&p, &q)| f(p, q)).collect()))
            } else if result_type == ValueType::Bool && op.is_comparison() && op != Near && op != NotNear {
                let f: fn(f64, f64) -> bool = match op {
                    Eq => |p, q| p == q,
                    Ne => |p, q| p != q,
                    Lt => |p, q| p < q,
                    Le => |p, q| p <= q,
                    Gt => |p, q| p > q,
                    _ => |p, q| p >= q,
                };
                Some(ColumnData::Bool(x.iter().zip(&y).map(|(&p, &q)| f(p, q)).collect()))
            } else {
                None
            }
        }
    }
}

/// Resolves one axis of an index expression to (start, end, step), clamped to `len`.
/// Negative positions count from the end.
fn axis_range(
    spec: &IndexSpec,
    len: usize,
    ctx: &EvalContext<'_>,
    row: u64,
) -> TaqlResult<(usize, usize, usize)> {
    let n = len as i64;
    let resolve = |node: &TableExprNode| -> TaqlResult<i64> {
        let i = node.get_int(ctx, row)?;
        Ok(if i < 0 { i + n } else { i })
    };
    match spec {
        IndexSpec::Single(node) => {
            let i = resolve(node)?;
            if i < 0 || i >= n {
                return Err(TaqlError::eval(format!(
                    "index {i} out of range for an axis of length {len}"
                )));
            }
            Ok((i as usize, i as usize + 1, 1))
        }
        IndexSpec::Slice { start, end, step } => {
            let start = start.as_ref().map(resolve).transpose()?.unwrap_or(0).clamp(0, n);
            let end = end.as_ref().map(resolve).transpose()?.unwrap_or(n).clamp(0, n);
            let step = match step {
                Some(node) => node.get_int(ctx, row)?,
                None => 1,
            };
            if step <= 0 {
                return Err(TaqlError::eval(format!("slice step {step} must be positive")));
            }
            Ok((start as usize, end.max(start) as usize, step as usize))
        }
    }
}

fn index_array(
    array: &ArrayDatum,
    indices: &[IndexSpec],
    ctx: &EvalContext<'_>,
    row: u64,
) -> TaqlResult<Datum> {
    let dims = array.shape().dims();
    if indices.len() != dims.len() {
        return Err(TaqlError::Conformance(format!(
            "{} indices given for an array of shape {}",
            indices.len(),
            array.shape()
        )));
    }
    let ranges = indices
        .iter()
        .zip(dims)
        .map(|(spec, &len)| axis_range(spec, len, ctx, row))
        .collect::<TaqlResult<Vec<_>>>()?;
    let out_dims: Vec<usize> = ranges
        .iter()
        .map(|&(start, end, step)| (end - start).div_ceil(step))
        .collect();
    let out_shape = Shape::new(out_dims);
    let mut values = Vec::with_capacity(out_shape.nelements());
    for offset in 0..out_shape.nelements() {
        let index: Vec<usize> = out_shape
            .index_of(offset)
            .iter()
            .zip(&ranges)
            .map(|(&i, &(start, _, step))| start + i * step)
            .collect();
        let src = array
            .shape()
            .offset(&index)
            .ok_or_else(|| TaqlError::eval("array index out of range"))?;
        values.push(array.values()[src].clone());
    }
    if indices.iter().all(|i| matches!(i, IndexSpec::Single(_))) {
        return values
            .into_iter()
            .next()
            .map(Datum::Scalar)
            .ok_or_else(|| TaqlError::eval("empty array index"));
    }
    Ok(Datum::Array(ArrayDatum::new(out_shape, array.value_type(), values)?))
}

impl Value {
    /// Numeric value for tolerance comparisons; dates count as their MJD.
    fn as_complex_or_date(&self) -> TaqlResult<Complex64> {
        match self {
            Value::Date(d) => Ok(Complex64::new(*d, 0.0)),
            other => other.as_complex(),
        }
    }
}
