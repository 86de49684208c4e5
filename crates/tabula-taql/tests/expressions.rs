use pretty_assertions::assert_eq;
use proptest::prelude::*;
use tabula_tables::{
    ColumnDesc, DataType, RefTable, Scalar, StorageKind, StorageOptions, Table, TableDesc,
    TableOptions,
};
use tabula_taql::{
    BinaryOp, ColumnData, Datum, EvalContext, Func, TableExprNode, TableExprSet, TaqlError, UnaryOp,
    Value, ValueKind, ValueType,
};

fn memory(rows: u64) -> TableOptions {
    TableOptions {
        storage: StorageOptions {
            kind: StorageKind::Memory,
            ..StorageOptions::default()
        },
        initial_rows: rows,
    }
}

/// Column `X` holds 1..=n, `Y` holds X/2 in m.
fn numbers(n: i32) -> Table {
    let desc = TableDesc::new()
        .with_column(ColumnDesc::scalar("X", DataType::Int32))
        .unwrap()
        .with_column(ColumnDesc::scalar("Y", DataType::Double).with_unit("m"))
        .unwrap();
    let mut table = Table::create("numbers", desc, memory(n as u64)).unwrap();
    {
        let mut x = table.column_mut("X").unwrap();
        for row in 0..n {
            x.put(row as u64, Scalar::Int32(row + 1)).unwrap();
        }
    }
    {
        let mut y = table.column_mut("Y").unwrap();
        for row in 0..n {
            y.put(row as u64, Scalar::Double(f64::from(row + 1) / 2.0)).unwrap();
        }
    }
    table
}

fn int(v: i64) -> TableExprNode {
    TableExprNode::constant(v)
}

#[test]
fn conjunction_selects_rows_and_masks_a_view() {
    let table = numbers(5).into_shared();
    let guard = table.read();
    let x = TableExprNode::column(&*guard, "X").unwrap();
    let cond = TableExprNode::binary(
        BinaryOp::And,
        TableExprNode::binary(BinaryOp::Gt, x.clone(), int(2)).unwrap(),
        TableExprNode::binary(BinaryOp::Lt, x.clone(), int(5)).unwrap(),
    )
    .unwrap();
    let ctx = EvalContext::table(&*guard);
    let mask: Vec<bool> = (0..5).map(|row| cond.get_bool(&ctx, row).unwrap()).collect();
    assert_eq!(mask, vec![false, false, true, true, false]);

    let gsum = Func::lookup("gsum", 1).unwrap();
    let total = TableExprNode::function(gsum, vec![x.clone()]).unwrap();
    let rows: Vec<u64> = (0..5).collect();
    assert_eq!(total.get_int(&ctx.with_group(&rows), 4).unwrap(), 15);
    drop(guard);

    let view = RefTable::from_mask(&table, &mask);
    assert_eq!(tabula_tables::TableView::nrow(&view), 2);
    assert_eq!(tabula_tables::TableView::row_numbers(&view), vec![2, 3]);
}

#[test]
fn constant_operands_fold() {
    let sum = TableExprNode::binary(BinaryOp::Add, int(2), int(3)).unwrap();
    assert!(sum.is_constant());
    assert_eq!(sum.constant_value(), Some(&Datum::Scalar(Value::Int(5))));

    let neg = TableExprNode::unary(UnaryOp::Neg, TableExprNode::constant(1.5)).unwrap();
    assert_eq!(neg.constant_value(), Some(&Datum::Scalar(Value::Double(-1.5))));

    let table = numbers(3);
    let x = TableExprNode::column(&table, "X").unwrap();
    let partial = TableExprNode::binary(BinaryOp::Add, x, int(1)).unwrap();
    assert!(!partial.is_constant());
}

#[test]
fn type_errors_are_raised_when_building() {
    let err = TableExprNode::binary(BinaryOp::Add, int(1), TableExprNode::constant("a")).unwrap_err();
    assert!(matches!(err, TaqlError::Type(_)), "{err}");

    let err = TableExprNode::binary(BinaryOp::And, int(1), TableExprNode::constant(true)).unwrap_err();
    assert!(matches!(err, TaqlError::Type(_)), "{err}");

    let err = TableExprNode::unary(UnaryOp::Not, TableExprNode::constant(2.0)).unwrap_err();
    assert!(matches!(err, TaqlError::Type(_)), "{err}");
}

#[test]
fn result_types_follow_promotion() {
    let table = numbers(4);
    let x = TableExprNode::column(&table, "X").unwrap();
    assert_eq!(x.value_type(), ValueType::Int);
    assert_eq!(x.value_kind(), ValueKind::Scalar);

    let half = TableExprNode::binary(BinaryOp::Div, x.clone(), int(2)).unwrap();
    assert_eq!(half.value_type(), ValueType::Double);

    let product = TableExprNode::binary(BinaryOp::Mul, x.clone(), int(2)).unwrap();
    assert_eq!(product.value_type(), ValueType::Int);

    let ctx = EvalContext::table(&table);
    assert_eq!(half.get_double(&ctx, 2).unwrap(), 1.5);
    assert_eq!(product.get_int(&ctx, 3).unwrap(), 8);
}

#[test]
fn column_units_are_converted() {
    let table = numbers(4);
    let y = TableExprNode::column(&table, "Y").unwrap();
    assert_eq!(y.unit().map(|u| u.name().to_string()), Some("m".to_string()));

    let in_cm = y.clone().with_unit("cm").unwrap();
    let ctx = EvalContext::table(&table);
    assert!((in_cm.get_double(&ctx, 1).unwrap() - 100.0).abs() < 1e-9);

    let err = y.with_unit("s").unwrap_err();
    assert!(matches!(err, TaqlError::Unit(_)), "{err}");
}

#[test]
fn whole_column_evaluation_matches_row_evaluation() {
    let table = numbers(6);
    let x = TableExprNode::column(&table, "X").unwrap();
    let expr = TableExprNode::binary(
        BinaryOp::Mod,
        TableExprNode::binary(BinaryOp::Mul, x, int(3)).unwrap(),
        int(4),
    )
    .unwrap();
    let ctx = EvalContext::table(&table);
    let rows: Vec<u64> = (0..6).collect();
    let column = expr.get_column(&ctx, &rows).unwrap();
    let by_row: Vec<i64> = rows.iter().map(|&r| expr.get_int(&ctx, r).unwrap()).collect();
    assert_eq!(column, ColumnData::Int(by_row));
}

#[test]
fn set_membership() {
    let table = numbers(5);
    let x = TableExprNode::column(&table, "X").unwrap();
    let set = TableExprSet::from_values(vec![int(1), int(4), int(9)]);
    let node = TableExprNode::in_set(x.clone(), set, false).unwrap();
    let ctx = EvalContext::table(&table);
    let flags: Vec<bool> = (0..5).map(|r| node.get_bool(&ctx, r).unwrap()).collect();
    assert_eq!(flags, vec![true, false, false, true, false]);

    let interval = TableExprSet::closed_interval(int(2), int(3));
    let node = TableExprNode::in_set(x, interval, true).unwrap();
    let flags: Vec<bool> = (0..5).map(|r| node.get_bool(&ctx, r).unwrap()).collect();
    assert_eq!(flags, vec![true, false, false, true, true]);
}

#[test]
fn ranges_of_a_conjunction() {
    let table = numbers(5);
    let x = TableExprNode::column(&table, "X").unwrap();
    let cond = TableExprNode::binary(
        BinaryOp::And,
        TableExprNode::binary(BinaryOp::Ge, x.clone(), int(2)).unwrap(),
        TableExprNode::binary(BinaryOp::Lt, int(7), x).unwrap(),
    )
    .unwrap();
    let ranges = cond.ranges();
    let range = ranges.column("X").expect("X is constrained");
    assert_eq!(range.intervals().len(), 1);
    assert!(range.contains(&Value::Int(8)));
    assert!(!range.contains(&Value::Int(7)));
    assert!(!range.contains(&Value::Int(1)));
}

#[test]
fn functions_without_a_range_leave_the_column_free() {
    let table = numbers(5);
    let x = TableExprNode::column(&table, "X").unwrap();
    let y = TableExprNode::column(&table, "Y").unwrap();
    let cond = TableExprNode::binary(
        BinaryOp::Or,
        TableExprNode::binary(BinaryOp::Gt, x, int(3)).unwrap(),
        TableExprNode::binary(BinaryOp::Gt, y, TableExprNode::constant(1.0)).unwrap(),
    )
    .unwrap();
    assert!(cond.ranges().is_unconstrained());
}

#[derive(Clone, Copy, Debug)]
enum Cmp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Cmp {
    fn op(self) -> BinaryOp {
        match self {
            Cmp::Lt => BinaryOp::Lt,
            Cmp::Le => BinaryOp::Le,
            Cmp::Gt => BinaryOp::Gt,
            Cmp::Ge => BinaryOp::Ge,
            Cmp::Eq => BinaryOp::Eq,
            Cmp::Ne => BinaryOp::Ne,
        }
    }
}

fn cmp_strategy() -> impl Strategy<Value = Cmp> {
    prop_oneof![
        Just(Cmp::Lt),
        Just(Cmp::Le),
        Just(Cmp::Gt),
        Just(Cmp::Ge),
        Just(Cmp::Eq),
        Just(Cmp::Ne),
    ]
}

proptest! {
    /// Rows dropped by the extracted ranges never satisfy the expression.
    #[test]
    fn extracted_ranges_keep_every_qualifying_row(
        first in (cmp_strategy(), 0i64..12),
        second in (cmp_strategy(), 0i64..12),
        use_or in any::<bool>(),
        flip in any::<bool>(),
    ) {
        let table = numbers(10);
        let x = TableExprNode::column(&table, "X").unwrap();
        let leaf = |(cmp, value): (Cmp, i64), flip: bool| {
            if flip {
                TableExprNode::binary(cmp.op(), int(value), x.clone()).unwrap()
            } else {
                TableExprNode::binary(cmp.op(), x.clone(), int(value)).unwrap()
            }
        };
        let op = if use_or { BinaryOp::Or } else { BinaryOp::And };
        let cond = TableExprNode::binary(op, leaf(first, flip), leaf(second, false)).unwrap();

        let ctx = EvalContext::table(&table);
        let rows: Vec<u64> = (0..10).collect();
        let kept = cond.ranges().filter_rows(&ctx, &rows).unwrap();
        for row in rows {
            if cond.get_bool(&ctx, row).unwrap() {
                prop_assert!(kept.contains(&row), "row {} satisfies but was dropped", row);
            }
        }
    }
}
