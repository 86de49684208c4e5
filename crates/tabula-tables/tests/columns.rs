use pretty_assertions::assert_eq;
use tabula_tables::{
    ArrayData, ArrayValue, ColumnDesc, DataType, RowRange, Scalar, Shape, Slicer, StorageKind,
    StorageOptions, Table, TableDesc, TableError, TableOptions,
};

fn options(kind: StorageKind, rows: u64) -> TableOptions {
    TableOptions {
        storage: StorageOptions {
            kind,
            bucket_size: 512,
        },
        initial_rows: rows,
    }
}

fn scalar_table(kind: StorageKind) -> Table {
    let desc = TableDesc::new()
        .with_column(ColumnDesc::scalar("id", DataType::Int32))
        .unwrap()
        .with_column(ColumnDesc::scalar("flux", DataType::Double).with_unit("Jy"))
        .unwrap()
        .with_column(ColumnDesc::scalar("name", DataType::String))
        .unwrap();
    Table::create("scalars", desc, options(kind, 4)).unwrap()
}

fn array_table(kind: StorageKind) -> Table {
    let desc = TableDesc::new()
        .with_column(ColumnDesc::array("data", DataType::Float).with_shape(Shape::new([2, 3])))
        .unwrap()
        .with_column(ColumnDesc::array("var", DataType::Int32).with_ndim(1))
        .unwrap();
    Table::create("arrays", desc, options(kind, 3)).unwrap()
}

#[test]
fn scalar_put_promotes_and_rejects() {
    for kind in [StorageKind::Incremental, StorageKind::Memory] {
        let mut table = scalar_table(kind);
        let mut id = table.column_mut("id").unwrap();
        id.put(0, Scalar::Int16(-4)).unwrap();
        id.put(1, Scalar::UInt8(200)).unwrap();
        let err = id.put(2, Scalar::Double(1.5)).unwrap_err();
        assert!(matches!(err, TableError::TypeMismatch { .. }));
        let err = id.put(2, Scalar::UInt32(1)).unwrap_err();
        assert!(matches!(err, TableError::TypeMismatch { .. }));
        assert!(matches!(
            id.put(4, Scalar::Int32(1)),
            Err(TableError::RowOutOfRange { row: 4, nrow: 4 })
        ));

        let mut flux = table.column_mut("flux").unwrap();
        flux.put(0, Scalar::Int32(3)).unwrap();
        flux.put(1, Scalar::Float(0.25)).unwrap();
        assert!(flux.put(2, Scalar::from("3")).is_err());

        let id = table.column("id").unwrap();
        assert_eq!(id.get(0).unwrap(), Scalar::Int32(-4));
        assert_eq!(id.get(1).unwrap(), Scalar::Int32(200));
        assert_eq!(id.get_as(0, DataType::Double).unwrap(), Scalar::Double(-4.0));
        assert!(id.get_as(0, DataType::Int16).is_err());
        assert_eq!(
            table.column("flux").unwrap().get_column().unwrap(),
            vec![
                Scalar::Double(3.0),
                Scalar::Double(0.25),
                Scalar::Double(0.0),
                Scalar::Double(0.0)
            ]
        );
        assert_eq!(table.column("flux").unwrap().desc().unit.as_deref(), Some("Jy"));
    }
}

#[test]
fn whole_column_puts_check_lengths_first() {
    let mut table = scalar_table(StorageKind::Incremental);
    let mut name = table.column_mut("name").unwrap();
    let err = name
        .put_column(&[Scalar::from("a"), Scalar::from("b")])
        .unwrap_err();
    assert!(matches!(err, TableError::LengthMismatch { expected: 4, actual: 2 }));
    // The bad value sits in the middle: nothing is written.
    let err = name
        .put_column(&[
            Scalar::from("a"),
            Scalar::Int32(1),
            Scalar::from("c"),
            Scalar::from("d"),
        ])
        .unwrap_err();
    assert!(matches!(err, TableError::TypeMismatch { .. }));
    assert_eq!(name.reader().get(0).unwrap(), Scalar::from(""));

    name.put_column(&["w", "x", "y", "z"].map(Scalar::from)).unwrap();
    name.put_column_range(RowRange::new(1, 2, 2), &["X", "Z"].map(Scalar::from))
        .unwrap();
    let column = table.column("name").unwrap();
    assert_eq!(
        column.get_column().unwrap(),
        ["w", "X", "y", "Z"].map(Scalar::from).to_vec()
    );
    assert_eq!(
        column.get_column_range(RowRange::new(0, 2, 3)).unwrap(),
        ["w", "Z"].map(Scalar::from).to_vec()
    );
    assert_eq!(
        column.get_column_cells(&[2, 0]).unwrap(),
        ["y", "w"].map(Scalar::from).to_vec()
    );
}

#[test]
fn fixed_shape_mismatch_leaves_cell_unchanged() {
    for kind in [StorageKind::Incremental, StorageKind::Memory] {
        let mut table = array_table(kind);
        let good = ArrayValue::new(
            Shape::new([2, 3]),
            ArrayData::Float(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
        )
        .unwrap();
        let mut data = table.column_mut("data").unwrap();
        data.put_array(1, &good).unwrap();
        let bad = ArrayValue::filled(Shape::new([3, 2]), &Scalar::Float(9.0));
        let err = data.put_array(1, &bad).unwrap_err();
        assert!(matches!(err, TableError::ShapeMismatch { .. }));
        assert!(matches!(
            data.set_shape(1, &Shape::new([6])),
            Err(TableError::FixedShape(_))
        ));

        let data = table.column("data").unwrap();
        assert_eq!(data.get_array(1).unwrap(), good);
        assert_eq!(data.shape(0).unwrap(), Shape::new([2, 3]));
        assert_eq!(
            data.get_array(0).unwrap(),
            ArrayValue::filled(Shape::new([2, 3]), &Scalar::Float(0.0))
        );
    }
}

#[test]
fn variable_shape_cells() {
    let mut table = array_table(StorageKind::Incremental);
    let var = table.column("var").unwrap();
    assert!(!var.is_defined(0).unwrap());
    assert!(matches!(var.get_array(0), Err(TableError::UndefinedCell { row: 0, .. })));

    let mut var = table.column_mut("var").unwrap();
    assert!(var.set_shape(0, &Shape::vector(4)).unwrap());
    assert!(!var.set_shape(0, &Shape::vector(4)).unwrap());
    let err = var.set_shape(1, &Shape::new([2, 2])).unwrap_err();
    assert!(matches!(err, TableError::Conformance(_)));

    let values = ArrayValue::vector(ArrayData::Int16(vec![7, 8]));
    var.put_slice(0, &Slicer::range(vec![1], vec![3]), &values).unwrap();
    var.put_array(2, &ArrayValue::vector(ArrayData::Int32(vec![5, 6, 7])))
        .unwrap();

    let var = table.column("var").unwrap();
    assert_eq!(
        var.get_array(0).unwrap(),
        ArrayValue::vector(ArrayData::Int32(vec![0, 7, 8, 0]))
    );
    assert_eq!(
        var.get_slice(0, &Slicer::new(vec![0], vec![4], vec![2])).unwrap(),
        ArrayValue::vector(ArrayData::Int32(vec![0, 8]))
    );
    assert_eq!(var.shape(2).unwrap(), Shape::vector(3));
    assert!(matches!(
        var.get_array_column_cells(&[0, 2]),
        Err(TableError::Conformance(_))
    ));
    assert!(matches!(var.get_array_column(), Err(TableError::UndefinedCell { row: 1, .. })));
}

#[test]
fn array_columns_stack_along_the_last_axis() {
    let mut table = array_table(StorageKind::Memory);
    let column = ArrayValue::new(
        Shape::new([2, 3, 3]),
        ArrayData::Float((0..18).map(|v| v as f32).collect()),
    )
    .unwrap();
    table.column_mut("data").unwrap().put_array_column(&column).unwrap();
    let data = table.column("data").unwrap();
    assert_eq!(data.get_array_column().unwrap(), column);
    assert_eq!(
        data.get_array(2).unwrap().data(),
        &ArrayData::Float((12..18).map(|v| v as f32).collect())
    );

    let short = ArrayValue::filled(Shape::new([2, 3, 2]), &Scalar::Float(1.0));
    let err = table.column_mut("data").unwrap().put_array_column(&short).unwrap_err();
    assert!(matches!(err, TableError::LengthMismatch { expected: 3, actual: 2 }));
}

#[test]
fn scalar_access_to_array_column_is_a_type_error() {
    let table = array_table(StorageKind::Memory);
    assert!(matches!(
        table.column("data").unwrap().get(0),
        Err(TableError::TypeMismatch { .. })
    ));
    let table = scalar_table(StorageKind::Memory);
    assert!(matches!(
        table.column("id").unwrap().get_array(0),
        Err(TableError::TypeMismatch { .. })
    ));
}

#[test]
fn read_only_columns_and_defaults() {
    let desc = TableDesc::new()
        .with_column(ColumnDesc::scalar("fixed", DataType::Int64).read_only())
        .unwrap()
        .with_column(ColumnDesc::scalar("weight", DataType::Double).with_default(Scalar::Int32(1)))
        .unwrap();
    let mut table = Table::create("t", desc, options(StorageKind::Incremental, 2)).unwrap();
    assert!(matches!(table.column_mut("fixed"), Err(TableError::NotWritable(_))));
    assert_eq!(table.column("weight").unwrap().get(1).unwrap(), Scalar::Double(1.0));
    table.add_rows(1).unwrap();
    assert_eq!(table.column("weight").unwrap().get(2).unwrap(), Scalar::Double(1.0));

    let bad = ColumnDesc::scalar("bad", DataType::Int32).with_default(Scalar::from("x"));
    assert!(matches!(table.add_column(bad), Err(TableError::TypeMismatch { .. })));
}

#[test]
fn copy_between_tables_promotes() {
    let mut source = scalar_table(StorageKind::Memory);
    source
        .column_mut("id")
        .unwrap()
        .put_column(&[3, 1, 2, 0].map(Scalar::Int32))
        .unwrap();
    let desc = TableDesc::new()
        .with_column(ColumnDesc::scalar("wide", DataType::Int64))
        .unwrap()
        .with_column(ColumnDesc::scalar("narrow", DataType::Int16))
        .unwrap();
    let mut target = Table::create("copy", desc, options(StorageKind::Incremental, 4)).unwrap();
    target
        .column_mut("wide")
        .unwrap()
        .copy_from(&source.column("id").unwrap())
        .unwrap();
    assert_eq!(
        target.column("wide").unwrap().get_column().unwrap(),
        [3, 1, 2, 0].map(Scalar::Int64).to_vec()
    );
    let err = target
        .column_mut("narrow")
        .unwrap()
        .copy_from(&source.column("id").unwrap())
        .unwrap_err();
    assert!(matches!(err, TableError::TypeMismatch { .. }));
    assert_eq!(
        target.column("narrow").unwrap().get_column().unwrap(),
        vec![Scalar::Int16(0); 4]
    );
}

#[test]
fn sorting_rows_by_column() {
    let mut table = scalar_table(StorageKind::Memory);
    table
        .column_mut("flux")
        .unwrap()
        .put_column(&[2.5, -1.0, 2.5, 0.0].map(Scalar::Double))
        .unwrap();
    let flux = table.column("flux").unwrap();
    assert_eq!(flux.sorted_rows(true).unwrap(), vec![1, 3, 0, 2]);
    assert_eq!(flux.sorted_rows(false).unwrap(), vec![0, 2, 3, 1]);
}

#[test]
fn unknown_columns() {
    let table = scalar_table(StorageKind::Memory);
    assert!(matches!(table.column("nope"), Err(TableError::UnknownColumn(name)) if name == "nope"));
}
