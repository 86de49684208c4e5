use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;
use tabula_tables::{
    ColumnDesc, DataType, Scalar, StorageKind, StorageOptions, Table, TableDesc, TableOptions,
};
use tabula_taql::{BinaryOp, EvalContext, TableExprNode};

fn bench_rows() -> u64 {
    std::env::var("TABULA_TAQL_BENCH_ROWS")
        .ok()
        .and_then(|v| v.replace('_', "").parse::<u64>().ok())
        .filter(|&v| (1_000..=10_000_000).contains(&v))
        .unwrap_or(100_000)
}

fn table(rows: u64) -> Table {
    let desc = TableDesc::new()
        .with_column(ColumnDesc::scalar("X", DataType::Int32))
        .unwrap()
        .with_column(ColumnDesc::scalar("Y", DataType::Double))
        .unwrap();
    let options = TableOptions {
        storage: StorageOptions {
            kind: StorageKind::Memory,
            ..StorageOptions::default()
        },
        initial_rows: rows,
    };
    let mut table = Table::create("bench", desc, options).unwrap();
    let xs: Vec<Scalar> = (0..rows).map(|r| Scalar::Int32((r % 1000) as i32)).collect();
    let ys: Vec<Scalar> = (0..rows).map(|r| Scalar::Double(r as f64 * 0.5)).collect();
    table.column_mut("X").unwrap().put_column(&xs).unwrap();
    table.column_mut("Y").unwrap().put_column(&ys).unwrap();
    table
}

/// `X > 100 && X < 500 && Y * 2 > 10`
fn condition(table: &Table) -> TableExprNode {
    let x = TableExprNode::column(table, "X").unwrap();
    let y = TableExprNode::column(table, "Y").unwrap();
    let range = TableExprNode::binary(
        BinaryOp::And,
        TableExprNode::binary(BinaryOp::Gt, x.clone(), TableExprNode::constant(100i64)).unwrap(),
        TableExprNode::binary(BinaryOp::Lt, x, TableExprNode::constant(500i64)).unwrap(),
    )
    .unwrap();
    let scaled = TableExprNode::binary(
        BinaryOp::Gt,
        TableExprNode::binary(BinaryOp::Mul, y, TableExprNode::constant(2i64)).unwrap(),
        TableExprNode::constant(10i64),
    )
    .unwrap();
    TableExprNode::binary(BinaryOp::And, range, scaled).unwrap()
}

fn bench_where(c: &mut Criterion) {
    let rows = bench_rows();
    let table = table(rows);
    let node = condition(&table);
    let all: Vec<u64> = (0..rows).collect();

    let mut group = c.benchmark_group("where");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    group.bench_with_input(BenchmarkId::new("row_by_row", rows), &rows, |b, _| {
        b.iter(|| {
            let ctx = EvalContext::table(&table);
            let hits = all
                .iter()
                .filter(|&&row| node.get_bool(&ctx, row).unwrap())
                .count();
            black_box(hits)
        })
    });

    group.bench_with_input(BenchmarkId::new("whole_column", rows), &rows, |b, _| {
        b.iter(|| {
            let ctx = EvalContext::table(&table);
            black_box(node.get_column(&ctx, &all).unwrap().len())
        })
    });

    group.bench_with_input(BenchmarkId::new("range_prefilter", rows), &rows, |b, _| {
        b.iter(|| {
            let ctx = EvalContext::table(&table);
            let candidates = node.ranges().filter_rows(&ctx, &all).unwrap();
            black_box(node.get_column(&ctx, &candidates).unwrap().len())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_where);
criterion_main!(benches);
