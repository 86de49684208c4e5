//! Turns parsed expressions into expression trees by resolving names against the table or
//! record they are evaluated on.

use crate::ast::{self, Expr, IndexItem, Literal, Select, SetItem};
use crate::error::{TaqlError, TaqlResult};
use crate::functions::Func;
use crate::node::{BinaryOp, IndexSpec, TableExprNode, UnaryOp};
use crate::pattern::{PatternKind, TaqlRegex};
use crate::set::{SetElement, TableExprSet};
use crate::udf::FunctionRegistry;
use crate::value::{ArrayDatum, Datum, Value, ValueType};
use num_complex::Complex64;
use tabula_tables::{Record, RecordField, TableView};

/// Runs a subquery and returns its single result column as an array.
pub(crate) type SubqueryRunner<'a> = dyn Fn(&Select) -> TaqlResult<Datum> + 'a;

#[derive(Clone)]
pub(crate) struct Binder<'a> {
    table: Option<&'a dyn TableView>,
    table_alias: Option<&'a str>,
    record: Option<&'a Record>,
    functions: &'a FunctionRegistry,
    aggregates: bool,
    subquery: Option<&'a SubqueryRunner<'a>>,
    /// Select-list aliases, visible in ORDERBY and HAVING.
    aliases: Vec<(String, TableExprNode)>,
}

impl<'a> Binder<'a> {
    pub(crate) fn new(functions: &'a FunctionRegistry) -> Self {
        Self {
            table: None,
            table_alias: None,
            record: None,
            functions,
            aggregates: false,
            subquery: None,
            aliases: Vec::new(),
        }
    }

    pub(crate) fn with_table(mut self, table: &'a dyn TableView, alias: Option<&'a str>) -> Self {
        self.table = Some(table);
        self.table_alias = alias;
        self
    }

    pub(crate) fn with_record(mut self, record: &'a Record) -> Self {
        self.record = Some(record);
        self
    }

    pub(crate) fn with_subqueries(mut self, runner: &'a SubqueryRunner<'a>) -> Self {
        self.subquery = Some(runner);
        self
    }

    /// Allows aggregate functions (SELECT list, HAVING, CALC).
    pub(crate) fn aggregates(&self, allowed: bool) -> Self {
        Self {
            aggregates: allowed,
            ..self.clone()
        }
    }

    pub(crate) fn with_aliases(&self, aliases: Vec<(String, TableExprNode)>) -> Self {
        Self {
            aliases,
            ..self.clone()
        }
    }

    pub(crate) fn bind(&self, expr: &Expr) -> TaqlResult<TableExprNode> {
        match expr {
            Expr::Literal(literal) => literal_node(literal),
            Expr::Name(name) => self.name(name),
            Expr::WithUnit(inner, unit) => self.bind(inner)?.with_unit(unit),
            Expr::Unary(op, operand) => {
                let op = match op {
                    ast::UnaryOp::Neg => UnaryOp::Neg,
                    ast::UnaryOp::Not => UnaryOp::Not,
                    ast::UnaryOp::BitNot => UnaryOp::BitNot,
                };
                TableExprNode::unary(op, self.bind(operand)?)
            }
            Expr::Binary(op, left, right) => {
                let (left, right) = (self.bind(left)?, self.bind(right)?);
                TableExprNode::binary(binary_op(*op, &left, &right), left, right)
            }
            Expr::Call { name, args } => self.call(name, args),
            Expr::In { expr, set, negate } => {
                let expr = self.bind(expr)?;
                TableExprNode::in_set(expr, self.set(set)?, *negate)
            }
            Expr::Between {
                expr,
                lower,
                upper,
                negate,
            } => {
                let set = TableExprSet::closed_interval(self.bind(lower)?, self.bind(upper)?);
                TableExprNode::in_set(self.bind(expr)?, set, *negate)
            }
            Expr::Around {
                expr,
                mid,
                width,
                negate,
            } => {
                let mid = self.bind(mid)?;
                let half = TableExprNode::binary(
                    BinaryOp::Div,
                    self.bind(width)?,
                    TableExprNode::constant(2.0),
                )?;
                let lower = TableExprNode::binary(BinaryOp::Sub, mid.clone(), half.clone())?;
                let upper = TableExprNode::binary(BinaryOp::Add, mid, half)?;
                let set = TableExprSet::closed_interval(lower, upper);
                TableExprNode::in_set(self.bind(expr)?, set, *negate)
            }
            Expr::Like {
                expr,
                pattern,
                case_insensitive,
                negate,
            } => {
                let pattern = self.bind(pattern)?;
                let text = match pattern.constant_value() {
                    Some(Datum::Scalar(Value::String(text))) => text.clone(),
                    _ => return Err(TaqlError::type_error("LIKE needs a constant string pattern")),
                };
                let regex = TaqlRegex::new(&text, PatternKind::Sql, *case_insensitive)?;
                let op = if *negate {
                    BinaryOp::NotMatch
                } else {
                    BinaryOp::Match
                };
                TableExprNode::binary(op, self.bind(expr)?, TableExprNode::constant(Value::Regex(regex)))
            }
            Expr::Index { array, indices } => {
                let array = self.bind(array)?;
                let indices = indices
                    .iter()
                    .map(|item| self.index(item))
                    .collect::<TaqlResult<Vec<_>>>()?;
                TableExprNode::index(array, indices)
            }
            Expr::Array(items) => {
                if items.iter().all(|i| matches!(i, SetItem::Value(_))) {
                    let elements = items
                        .iter()
                        .filter_map(|i| match i {
                            SetItem::Value(e) => Some(self.bind(e)),
                            _ => None,
                        })
                        .collect::<TaqlResult<Vec<_>>>()?;
                    TableExprNode::array(elements)
                } else {
                    self.set(items)?.to_array()
                }
            }
            Expr::Subquery(select) => {
                let runner = self
                    .subquery
                    .ok_or_else(|| TaqlError::Unsupported("subqueries in this context".into()))?;
                Ok(TableExprNode::from_datum(runner(select)?))
            }
        }
    }

    fn name(&self, name: &str) -> TaqlResult<TableExprNode> {
        if let Some((column, key)) = name.split_once("::") {
            return self.keyword(name, column, key);
        }
        if let Some((_, node)) = self.aliases.iter().find(|(alias, _)| alias == name) {
            return Ok(node.clone());
        }
        if let Some(table) = self.table {
            let column = match self.table_alias {
                Some(alias) => name
                    .strip_prefix(alias)
                    .and_then(|rest| rest.strip_prefix('.'))
                    .unwrap_or(name),
                None => name,
            };
            match TableExprNode::column(table, column) {
                Err(TaqlError::UnknownColumn(_)) if self.record.is_some() => {}
                other => return other,
            }
        }
        match self.record {
            Some(record) => TableExprNode::field(record, name),
            None => Err(TaqlError::NoTable(format!("column {name}"))),
        }
    }

    /// `col::key` (column keyword) or `::key` (table keyword); `key` may be a path `a.b`.
    fn keyword(&self, name: &str, column: &str, key: &str) -> TaqlResult<TableExprNode> {
        let table = self
            .table
            .ok_or_else(|| TaqlError::NoTable(format!("keyword {name}")))?;
        let unknown = || TaqlError::UnknownField(name.to_string());
        if column.is_empty() {
            let field = table.keywords().get_path(key).ok_or_else(unknown)?;
            return field_constant(name, field);
        }
        let desc = table
            .column_desc(column)
            .map_err(|_| TaqlError::UnknownColumn(column.to_string()))?;
        let field = desc.keywords.get_path(key).ok_or_else(unknown)?;
        field_constant(name, field)
    }

    fn call(&self, name: &str, args: &[Expr]) -> TaqlResult<TableExprNode> {
        let args = args
            .iter()
            .map(|a| self.bind(a))
            .collect::<TaqlResult<Vec<_>>>()?;
        let func = match Func::lookup(name, args.len()) {
            Ok(func) => func,
            Err(err @ TaqlError::UnknownFunction { .. }) => {
                return match self.functions.get(name) {
                    Some(udf) => TableExprNode::user_function(udf.clone(), args),
                    None => Err(err),
                };
            }
            Err(err) => return Err(err),
        };
        let needs_table = func.is_aggregate() || matches!(func, Func::RowNr | Func::RowId);
        if needs_table && self.table.is_none() {
            return Err(TaqlError::NoTable(format!("{name}()")));
        }
        if func.is_aggregate() && !self.aggregates {
            return Err(TaqlError::type_error(format!(
                "aggregate function {name} can only be used in SELECT, HAVING or CALC"
            )));
        }
        TableExprNode::function(func, args)
    }

    fn set(&self, items: &[SetItem]) -> TaqlResult<TableExprSet> {
        let bind_opt = |e: &Option<Expr>| e.as_ref().map(|e| self.bind(e)).transpose();
        let elements = items
            .iter()
            .map(|item| {
                Ok(match item {
                    SetItem::Value(e) => SetElement::Value(self.bind(e)?),
                    SetItem::Range { start, end, step } => SetElement::Range {
                        start: bind_opt(start)?,
                        end: bind_opt(end)?,
                        step: bind_opt(step)?,
                    },
                    SetItem::Interval {
                        lower,
                        upper,
                        lower_closed,
                        upper_closed,
                    } => SetElement::Interval {
                        lower: bind_opt(lower)?,
                        upper: bind_opt(upper)?,
                        lower_closed: *lower_closed,
                        upper_closed: *upper_closed,
                    },
                })
            })
            .collect::<TaqlResult<Vec<_>>>()?;
        Ok(TableExprSet::new(elements))
    }

    fn index(&self, item: &IndexItem) -> TaqlResult<IndexSpec> {
        let bind_opt = |e: &Option<Expr>| e.as_ref().map(|e| self.bind(e)).transpose();
        Ok(match item {
            IndexItem::Single(e) => IndexSpec::Single(self.bind(e)?),
            IndexItem::Slice { start, end, step } => IndexSpec::Slice {
                start: bind_opt(start)?,
                end: bind_opt(end)?,
                step: bind_opt(step)?,
            },
        })
    }
}

fn literal_node(literal: &Literal) -> TaqlResult<TableExprNode> {
    Ok(match literal {
        Literal::Bool(b) => TableExprNode::constant(*b),
        Literal::Int(i) => TableExprNode::constant(*i),
        Literal::Double(d) => TableExprNode::constant(*d),
        Literal::Imaginary(im) => TableExprNode::constant(Complex64::new(0.0, *im)),
        Literal::String(s) => TableExprNode::constant(s.as_str()),
        Literal::DateTime(mjd) => TableExprNode::constant(Value::Date(*mjd)),
        Literal::Angle(rad) => TableExprNode::constant(*rad).with_unit("rad")?,
        Literal::Pattern {
            source,
            kind,
            case_insensitive,
        } => TableExprNode::constant(Value::Regex(TaqlRegex::new(
            source,
            *kind,
            *case_insensitive,
        )?)),
    })
}

fn binary_op(op: ast::BinaryOp, left: &TableExprNode, right: &TableExprNode) -> BinaryOp {
    use ast::BinaryOp as A;
    let regex = left.value_type() == ValueType::Regex || right.value_type() == ValueType::Regex;
    match op {
        A::Add => BinaryOp::Add,
        A::Sub => BinaryOp::Sub,
        A::Mul => BinaryOp::Mul,
        A::Div => BinaryOp::Div,
        A::IntDiv => BinaryOp::IntDiv,
        A::Mod => BinaryOp::Mod,
        A::Pow => BinaryOp::Pow,
        // `name == p/a*/` matches like `name ~ p/a*/`.
        A::Eq if regex => BinaryOp::Match,
        A::Ne if regex => BinaryOp::NotMatch,
        A::Eq => BinaryOp::Eq,
        A::Ne => BinaryOp::Ne,
        A::Lt => BinaryOp::Lt,
        A::Le => BinaryOp::Le,
        A::Gt => BinaryOp::Gt,
        A::Ge => BinaryOp::Ge,
        A::Near => BinaryOp::Near,
        A::NotNear => BinaryOp::NotNear,
        A::And => BinaryOp::And,
        A::Or => BinaryOp::Or,
        A::Xor if left.value_type() == ValueType::Bool => BinaryOp::Ne,
        A::Xor => BinaryOp::BitXor,
        A::BitAnd => BinaryOp::BitAnd,
        A::BitOr => BinaryOp::BitOr,
        A::BitXor => BinaryOp::BitXor,
        A::Match => BinaryOp::Match,
        A::NotMatch => BinaryOp::NotMatch,
    }
}

pub(crate) fn field_constant(name: &str, field: &RecordField) -> TaqlResult<TableExprNode> {
    match field {
        RecordField::Scalar(s) => Ok(TableExprNode::constant(Value::from_scalar(s))),
        RecordField::Array(a) => Ok(TableExprNode::from_datum(Datum::Array(
            ArrayDatum::from_array_value(a),
        ))),
        RecordField::Record(_) => Err(TaqlError::type_error(format!(
            "{name} is a record, not a value"
        ))),
    }
}
