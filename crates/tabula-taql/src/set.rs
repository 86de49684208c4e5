//! Sets used by `IN`: discrete values, ranges `start:end:step` and intervals `{a,b}`, `<a,b>`.

use crate::error::{TaqlError, TaqlResult};
use crate::node::{compare_values, EvalContext, TableExprNode};
use crate::value::{Value, ValueType};
use std::cmp::Ordering;

#[derive(Clone, Debug)]
pub enum SetElement {
    /// A value; all elements of an array value are members.
    Value(TableExprNode),
    /// `start:end:step`, end exclusive. Open ends are unbounded; the step defaults to 1.
    Range {
        start: Option<TableExprNode>,
        end: Option<TableExprNode>,
        step: Option<TableExprNode>,
    },
    /// A continuous interval; `{` and `}` are closed bounds, `<` and `>` open ones.
    Interval {
        lower: Option<TableExprNode>,
        upper: Option<TableExprNode>,
        lower_closed: bool,
        upper_closed: bool,
    },
}

impl SetElement {
    fn nodes(&self) -> Vec<&TableExprNode> {
        match self {
            SetElement::Value(node) => vec![node],
            SetElement::Range { start, end, step } => {
                [start, end, step].into_iter().flatten().collect()
            }
            SetElement::Interval { lower, upper, .. } => [lower, upper].into_iter().flatten().collect(),
        }
    }

    fn map_nodes(
        self,
        mut f: impl FnMut(TableExprNode) -> TaqlResult<TableExprNode>,
    ) -> TaqlResult<SetElement> {
        Ok(match self {
            SetElement::Value(node) => SetElement::Value(f(node)?),
            SetElement::Range { start, end, step } => SetElement::Range {
                start: start.map(&mut f).transpose()?,
                end: end.map(&mut f).transpose()?,
                step: step.map(&mut f).transpose()?,
            },
            SetElement::Interval {
                lower,
                upper,
                lower_closed,
                upper_closed,
            } => SetElement::Interval {
                lower: lower.map(&mut f).transpose()?,
                upper: upper.map(&mut f).transpose()?,
                lower_closed,
                upper_closed,
            },
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct TableExprSet {
    elements: Vec<SetElement>,
}

impl TableExprSet {
    pub fn new(elements: Vec<SetElement>) -> Self {
        Self { elements }
    }

    pub fn from_values(values: Vec<TableExprNode>) -> Self {
        Self::new(values.into_iter().map(SetElement::Value).collect())
    }

    /// The closed interval `[lower, upper]` (`BETWEEN lower AND upper`).
    pub fn closed_interval(lower: TableExprNode, upper: TableExprNode) -> Self {
        Self::new(vec![SetElement::Interval {
            lower: Some(lower),
            upper: Some(upper),
            lower_closed: true,
            upper_closed: true,
        }])
    }

    pub fn elements(&self) -> &[SetElement] {
        &self.elements
    }

    pub(crate) fn nodes(&self) -> impl Iterator<Item = &TableExprNode> {
        self.elements.iter().flat_map(SetElement::nodes)
    }

    pub fn is_constant(&self) -> bool {
        self.nodes().all(TableExprNode::is_constant)
    }

    /// Whether the set only holds discrete values and bounded ranges.
    pub fn is_bounded_discrete(&self) -> bool {
        self.elements.iter().all(|e| match e {
            SetElement::Value(_) => true,
            SetElement::Range { start, end, .. } => start.is_some() && end.is_some(),
            SetElement::Interval { .. } => false,
        })
    }

    /// Checks that the members can be compared with `expr` and converts them to its unit.
    pub(crate) fn checked_for(self, expr: &TableExprNode) -> TaqlResult<Self> {
        let target = expr.value_type();
        for element in &self.elements {
            for node in element.nodes() {
                let t = node.value_type();
                let ranged = !matches!(element, SetElement::Value(_));
                let compatible = match (target, t) {
                    (a, b) if a.is_real() && b.is_real() => true,
                    (ValueType::Complex, b) | (b, ValueType::Complex) => {
                        !ranged && b.is_numeric()
                    }
                    (ValueType::Date, b) | (b, ValueType::Date) => {
                        b == ValueType::Date || b.is_real()
                    }
                    (ValueType::String, ValueType::String) => true,
                    (ValueType::Bool, ValueType::Bool) => !ranged,
                    _ => false,
                };
                if !compatible {
                    return Err(TaqlError::type_error(format!(
                        "a {target} value cannot be looked up in a set of {t} values"
                    )));
                }
            }
            if let SetElement::Range { step: Some(step), .. } = element {
                if !step.value_type().is_real() {
                    return Err(TaqlError::type_error("a range step must be real"));
                }
            }
        }
        let Some(unit) = expr.unit() else {
            return Ok(self);
        };
        let name = unit.name().to_string();
        let elements = self
            .elements
            .into_iter()
            .map(|e| {
                e.map_nodes(|node| {
                    if node.unit().is_some() {
                        node.with_unit(&name)
                    } else {
                        Ok(node)
                    }
                })
            })
            .collect::<TaqlResult<Vec<_>>>()?;
        Ok(Self { elements })
    }

    pub(crate) fn contains(&self, ctx: &EvalContext<'_>, row: u64, value: &Value) -> TaqlResult<bool> {
        for element in &self.elements {
            if element_contains(element, ctx, row, value)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Expands discrete values and bounded ranges into an array expression (`[1:4]` is
    /// `[1,2,3]`).
    pub fn to_array(&self) -> TaqlResult<TableExprNode> {
        let mut nodes = Vec::new();
        for element in &self.elements {
            match element {
                SetElement::Value(node) => nodes.push(node.clone()),
                SetElement::Range {
                    start: Some(start),
                    end: Some(end),
                    step,
                } => nodes.extend(expand_range(start, end, step.as_ref())?),
                _ => {
                    return Err(TaqlError::type_error(
                        "an open range or interval cannot be used as a value",
                    ))
                }
            }
        }
        TableExprNode::array(nodes)
    }
}

fn constant(node: &TableExprNode) -> TaqlResult<Value> {
    node.constant_value()
        .ok_or_else(|| TaqlError::type_error("range bounds must be constant when used as a value"))?
        .as_scalar()
        .cloned()
}

fn expand_range(
    start: &TableExprNode,
    end: &TableExprNode,
    step: Option<&TableExprNode>,
) -> TaqlResult<Vec<TableExprNode>> {
    let (start, end) = (constant(start)?, constant(end)?);
    let step = step.map(constant).transpose()?.unwrap_or(Value::Int(1));
    let all_int = [&start, &end, &step]
        .iter()
        .all(|v| matches!(v, Value::Int(_)));
    if all_int {
        let (s, e, st) = (start.as_int()?, end.as_int()?, step.as_int()?);
        if st <= 0 {
            return Err(TaqlError::eval(format!("range step {st} must be positive")));
        }
        return Ok((s..e)
            .step_by(st as usize)
            .map(TableExprNode::constant)
            .collect());
    }
    let (s, e, st) = (start.as_double()?, end.as_double()?, step.as_double()?);
    if st <= 0.0 || !st.is_finite() {
        return Err(TaqlError::eval(format!("range step {st} must be positive")));
    }
    let mut nodes = Vec::new();
    let mut k = 0.0;
    loop {
        let v = s + k * st;
        if v >= e {
            break;
        }
        nodes.push(TableExprNode::constant(v));
        k += 1.0;
    }
    Ok(nodes)
}

fn is_equal(a: &Value, b: &Value) -> TaqlResult<bool> {
    Ok(compare_values(a, b)? == Some(Ordering::Equal))
}

fn element_contains(
    element: &SetElement,
    ctx: &EvalContext<'_>,
    row: u64,
    value: &Value,
) -> TaqlResult<bool> {
    match element {
        SetElement::Value(node) => {
            for member in node.get(ctx, row)?.flatten() {
                if is_equal(value, &member)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        SetElement::Range { start, end, step } => {
            let x = value.as_double()?;
            let start = start.as_ref().map(|n| n.get_double(ctx, row)).transpose()?;
            let end = end.as_ref().map(|n| n.get_double(ctx, row)).transpose()?;
            let step = match step {
                Some(n) => n.get_double(ctx, row)?,
                None => 1.0,
            };
            if step <= 0.0 {
                return Err(TaqlError::eval(format!("range step {step} must be positive")));
            }
            if start.is_some_and(|s| x < s) || end.is_some_and(|e| x >= e) {
                return Ok(false);
            }
            let Some(base) = start.or(end) else {
                return Ok(true);
            };
            let k = (x - base) / step;
            Ok((k - k.round()).abs() <= 1e-9 * k.abs().max(1.0))
        }
        SetElement::Interval {
            lower,
            upper,
            lower_closed,
            upper_closed,
        } => {
            if let Some(lower) = lower {
                let bound = lower.get(ctx, row)?.into_scalar()?;
                match compare_values(value, &bound)? {
                    Some(Ordering::Greater) => {}
                    Some(Ordering::Equal) if *lower_closed => {}
                    _ => return Ok(false),
                }
            }
            if let Some(upper) = upper {
                let bound = upper.get(ctx, row)?.into_scalar()?;
                match compare_values(value, &bound)? {
                    Some(Ordering::Less) => {}
                    Some(Ordering::Equal) if *upper_closed => {}
                    _ => return Ok(false),
                }
            }
            Ok(true)
        }
    }
}
