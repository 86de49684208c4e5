use pretty_assertions::assert_eq;
use tabula_tables::{
    ArrayData, ArrayValue, Cell, ColumnKind, ColumnLayout, DataType, IncrementalStore, Scalar,
    Shape, StorageManager, TableError,
};

fn int_store(bucket_size: usize) -> IncrementalStore {
    IncrementalStore::new(
        bucket_size,
        vec![ColumnLayout::new(DataType::Int32, ColumnKind::Scalar)],
    )
    .unwrap()
}

fn int(value: i32) -> Cell {
    Cell::Scalar(Scalar::Int32(value))
}

fn column_values(store: &IncrementalStore, column: usize) -> Vec<Cell> {
    let rows: Vec<u64> = (0..store.nrow()).collect();
    store.get_rows(column, &rows).unwrap()
}

fn runs(store: &IncrementalStore, column: usize) -> Vec<u64> {
    store
        .buckets()
        .flat_map(|(start, bucket)| {
            bucket
                .row_index(column)
                .iter()
                .map(move |row| start + row)
                .collect::<Vec<_>>()
        })
        .collect()
}

#[test]
fn new_rows_start_as_one_run() {
    let mut store = int_store(1024);
    store.add_rows(10).unwrap();
    assert_eq!(store.nrow(), 10);
    assert_eq!(store.bucket_count(), 1);
    assert_eq!(runs(&store, 0), vec![0]);
    assert_eq!(store.get(0, 9).unwrap(), int(0));
    assert!(matches!(
        store.get(0, 10),
        Err(TableError::RowOutOfRange { row: 10, nrow: 10 })
    ));
}

#[test]
fn runs_stay_maximal() {
    let mut store = int_store(1024);
    store.add_rows(10).unwrap();

    store.put(0, 5, &int(7)).unwrap();
    assert_eq!(runs(&store, 0), vec![0, 5, 6]);
    store.put(0, 5, &int(0)).unwrap();
    assert_eq!(runs(&store, 0), vec![0]);

    store.put(0, 0, &int(3)).unwrap();
    assert_eq!(runs(&store, 0), vec![0, 1]);
    store.put(0, 1, &int(3)).unwrap();
    assert_eq!(runs(&store, 0), vec![0, 2]);

    store.put(0, 9, &int(4)).unwrap();
    assert_eq!(runs(&store, 0), vec![0, 2, 9]);
    store.put(0, 8, &int(4)).unwrap();
    assert_eq!(runs(&store, 0), vec![0, 2, 8]);

    // An equal value is a no-op.
    store.put(0, 3, &int(0)).unwrap();
    assert_eq!(runs(&store, 0), vec![0, 2, 8]);

    let values: Vec<Cell> = [3, 3, 0, 0, 0, 0, 0, 0, 4, 4].into_iter().map(int).collect();
    assert_eq!(column_values(&store, 0), values);
    assert!(store.check());
}

#[test]
fn full_buckets_split_and_keep_every_value() {
    let mut store = int_store(128);
    let nrow = 400u64;
    store.add_rows(nrow).unwrap();
    let mut model = vec![0i32; nrow as usize];
    // Scattered writes hit the middle of runs as well as their borders.
    let mut row = 7u64;
    for step in 0..600 {
        row = (row * 31 + 17) % nrow;
        let value = (step % 5) as i32;
        store.put(0, row, &int(value)).unwrap();
        model[row as usize] = value;
    }
    assert!(store.bucket_count() > 1);
    assert!(store.check(), "{:?}", store.first_violation());
    let expected: Vec<Cell> = model.iter().copied().map(int).collect();
    assert_eq!(column_values(&store, 0), expected);
    for row in [0, 1, 199, 398, 399] {
        assert_eq!(store.get(0, row).unwrap(), int(model[row as usize]));
    }
}

#[test]
fn appends_split_at_the_end() {
    let mut store = int_store(128);
    for value in 0..100 {
        store.add_rows(1).unwrap();
        store.put(0, value as u64, &int(value)).unwrap();
    }
    assert!(store.bucket_count() > 1);
    assert!(store.check());
    let expected: Vec<Cell> = (0..100).map(int).collect();
    assert_eq!(column_values(&store, 0), expected);
}

#[test]
fn remove_row_shifts_later_rows() {
    let mut store = int_store(128);
    store.add_rows(60).unwrap();
    let mut model: Vec<i32> = (0..60).collect();
    for (row, &value) in model.iter().enumerate() {
        store.put(0, row as u64, &int(value)).unwrap();
    }
    for row in [0u64, 30, 57, 10, 10] {
        store.remove_row(row).unwrap();
        model.remove(row as usize);
    }
    assert_eq!(store.nrow(), 55);
    assert!(store.check());
    let expected: Vec<Cell> = model.iter().copied().map(int).collect();
    assert_eq!(column_values(&store, 0), expected);
    assert!(store.remove_row(55).is_err());
}

#[test]
fn removing_a_row_merges_equal_neighbours() {
    let mut store = int_store(1024);
    store.add_rows(6).unwrap();
    store.put(0, 2, &int(9)).unwrap();
    assert_eq!(runs(&store, 0), vec![0, 2, 3]);
    store.remove_row(2).unwrap();
    assert_eq!(runs(&store, 0), vec![0]);
}

#[test]
fn strings_and_oversized_values() {
    let mut store = IncrementalStore::new(
        128,
        vec![ColumnLayout::new(DataType::String, ColumnKind::Scalar)],
    )
    .unwrap();
    store.add_rows(20).unwrap();
    for row in 0..20u64 {
        let text = "x".repeat(row as usize);
        store.put(0, row, &Cell::Scalar(Scalar::from(text.as_str()))).unwrap();
    }
    assert!(store.check());
    assert_eq!(store.get(0, 19).unwrap(), Cell::Scalar(Scalar::from("x".repeat(19).as_str())));

    let huge = Cell::Scalar(Scalar::from("y".repeat(500).as_str()));
    assert!(matches!(store.put(0, 3, &huge), Err(TableError::ValueTooLarge { .. })));
    assert_eq!(store.get(0, 3).unwrap(), Cell::Scalar(Scalar::from("xxx")));
}

#[test]
fn fixed_item_larger_than_bucket_is_rejected() {
    let err = IncrementalStore::new(
        64,
        vec![ColumnLayout::new(
            DataType::Double,
            ColumnKind::FixedArray(Shape::new([4, 4])),
        )],
    )
    .unwrap_err();
    assert!(matches!(err, TableError::ValueTooLarge { len: 128, .. }));
}

#[test]
fn variable_shape_arrays_live_in_the_heap() {
    let mut store = IncrementalStore::new(
        256,
        vec![ColumnLayout::new(DataType::Float, ColumnKind::VarArray { ndim: None })],
    )
    .unwrap();
    store.add_rows(4).unwrap();
    assert_eq!(store.get(0, 2).unwrap(), Cell::Undefined);

    let small = ArrayValue::vector(ArrayData::Float(vec![1.0, 2.0]));
    let square = ArrayValue::filled(Shape::new([2, 2]), &Scalar::Float(0.5));
    store.put(0, 1, &Cell::Array(small.clone())).unwrap();
    store.put(0, 2, &Cell::Array(square.clone())).unwrap();
    assert_eq!(store.get(0, 1).unwrap(), Cell::Array(small));
    assert_eq!(store.get(0, 2).unwrap(), Cell::Array(square.clone()));
    assert_eq!(store.get(0, 3).unwrap(), Cell::Undefined);

    let replaced = ArrayValue::filled(Shape::new([2, 2]), &Scalar::Float(9.0));
    store.put(0, 2, &Cell::Array(replaced.clone())).unwrap();
    assert_eq!(store.get(0, 2).unwrap(), Cell::Array(replaced));
}

#[test]
fn heap_slots_are_recycled_when_arrays_change_shape() {
    let mut store = IncrementalStore::new(
        256,
        vec![ColumnLayout::new(DataType::Int32, ColumnKind::VarArray { ndim: None })],
    )
    .unwrap();
    store.add_rows(3).unwrap();
    for round in 0..50 {
        let len = 2 + round % 2;
        let array = ArrayValue::vector(ArrayData::Int32(vec![round as i32; len]));
        store.put(0, 1, &Cell::Array(array.clone())).unwrap();
        assert_eq!(store.get(0, 1).unwrap(), Cell::Array(array));
    }
    let heap = store.heap(0).unwrap();
    assert!(heap.len() <= 2, "heap grew to {} slots", heap.len());
    assert_eq!(heap.live(), 1);

    store.remove_row(1).unwrap();
    assert_eq!(store.heap(0).unwrap().live(), 0);
    assert_eq!(store.get(0, 1).unwrap(), Cell::Undefined);
}

#[test]
fn adding_and_removing_columns_keeps_data() {
    let mut store = int_store(256);
    store.add_rows(5).unwrap();
    store.put(0, 4, &int(8)).unwrap();
    store
        .add_column(ColumnLayout {
            default: Some(Scalar::Double(1.5)),
            ..ColumnLayout::new(DataType::Double, ColumnKind::Scalar)
        })
        .unwrap();
    assert_eq!(store.ncolumn(), 2);
    assert_eq!(store.get(1, 0).unwrap(), Cell::Scalar(Scalar::Double(1.5)));
    assert_eq!(store.get(0, 4).unwrap(), int(8));

    store.remove_column(0).unwrap();
    assert_eq!(store.ncolumn(), 1);
    assert_eq!(store.get(0, 4).unwrap(), Cell::Scalar(Scalar::Double(1.5)));
}

#[test]
fn new_rows_get_the_default_not_the_last_value() {
    let mut store = int_store(256);
    store.add_rows(3).unwrap();
    store.put(0, 2, &int(5)).unwrap();
    store.add_rows(2).unwrap();
    assert_eq!(store.get(0, 3).unwrap(), int(0));
    assert_eq!(runs(&store, 0), vec![0, 2, 3]);
}
