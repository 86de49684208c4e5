use pretty_assertions::assert_eq;
use tabula_tables::{
    ArrayData, ArrayValue, Cell, ColumnDesc, ColumnKind, ConcatTable, DataType, Scalar, Shape,
    SharedTable, StorageKind, StorageOptions, Table, TableDesc, TableError, TableOptions,
    TableView,
};

fn part(name: &str, first: i32, nrow: u64, shape: [usize; 1]) -> Table {
    let desc = TableDesc::new()
        .with_column(ColumnDesc::scalar("X", DataType::Int32))
        .unwrap()
        .with_column(ColumnDesc::array("ARR", DataType::Double).with_shape(Shape::new(shape)))
        .unwrap();
    let options = TableOptions {
        storage: StorageOptions::default(),
        initial_rows: nrow,
    };
    let mut table = Table::create(name, desc, options).unwrap();
    for row in 0..nrow {
        table
            .column_mut("X")
            .unwrap()
            .put(row, Scalar::Int32(first + row as i32))
            .unwrap();
    }
    table
}

fn xs(view: &dyn TableView) -> Vec<Scalar> {
    view.column("X").unwrap().get_column().unwrap()
}

#[test]
fn rows_map_onto_the_parts_in_order() {
    let mut a = part("a", 10, 2, [2]);
    a.keywords_mut().set("origin", Scalar::from("a"));
    let b = part("b", 20, 3, [2]);
    let concat = ConcatTable::new("ab", vec![a.into_shared(), b.into_shared()]).unwrap();

    assert_eq!(concat.nrow(), 5);
    assert_eq!(concat.locate(0).unwrap(), (0, 0));
    assert_eq!(concat.locate(1).unwrap(), (0, 1));
    assert_eq!(concat.locate(2).unwrap(), (1, 0));
    assert_eq!(concat.locate(4).unwrap(), (1, 2));
    assert!(matches!(
        concat.locate(5),
        Err(TableError::RowOutOfRange { row: 5, nrow: 5 })
    ));
    assert_eq!(xs(&concat), [10, 11, 20, 21, 22].map(Scalar::Int32).to_vec());
    assert_eq!(
        concat.get_cells("X", &[4, 0, 2]).unwrap(),
        [22, 10, 20].map(|x| Cell::Scalar(Scalar::Int32(x))).to_vec()
    );
    assert!(concat.keywords().get("origin").is_some());
    assert_eq!(concat.row_numbers(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn writes_reach_the_owning_part() {
    let a = part("a", 0, 2, [2]).into_shared();
    let b = part("b", 0, 2, [2]).into_shared();
    let mut concat = ConcatTable::new("ab", vec![a.clone(), b.clone()]).unwrap();
    concat.put_cell("X", 3, Cell::Scalar(Scalar::Int32(99))).unwrap();
    assert_eq!(
        b.read().column("X").unwrap().get(1).unwrap(),
        Scalar::Int32(99)
    );
    assert_eq!(
        a.read().column("X").unwrap().get_column().unwrap(),
        vec![Scalar::Int32(0), Scalar::Int32(1)]
    );

    // Rows added to a part after concatenation show up in the view.
    b.write().add_rows(1).unwrap();
    assert_eq!(concat.nrow(), 5);
}

#[test]
fn differing_fixed_shapes_become_variable() {
    let a = part("a", 0, 1, [2]);
    let b = part("b", 0, 1, [3]);
    let concat = ConcatTable::new("ab", vec![a.into_shared(), b.into_shared()]).unwrap();
    assert_eq!(
        concat.column_desc("ARR").unwrap().kind,
        ColumnKind::VarArray { ndim: None }
    );
    assert_eq!(concat.column_desc("X").unwrap().kind, ColumnKind::Scalar);
}

#[test]
fn non_conforming_tables_are_rejected() {
    assert!(matches!(
        ConcatTable::new("none", Vec::<SharedTable>::new()),
        Err(TableError::Invalid(_))
    ));

    let options = TableOptions::default();
    let renamed = TableDesc::new()
        .with_column(ColumnDesc::scalar("Y", DataType::Int32))
        .unwrap()
        .with_column(ColumnDesc::array("ARR", DataType::Double).with_shape(Shape::new([2])))
        .unwrap();
    let retyped = TableDesc::new()
        .with_column(ColumnDesc::scalar("X", DataType::Double))
        .unwrap()
        .with_column(ColumnDesc::array("ARR", DataType::Double).with_shape(Shape::new([2])))
        .unwrap();
    let narrow = TableDesc::new()
        .with_column(ColumnDesc::scalar("X", DataType::Int32))
        .unwrap();
    for desc in [renamed, retyped, narrow] {
        let other = Table::create("other", desc, options).unwrap();
        let result = ConcatTable::new(
            "bad",
            vec![part("a", 0, 1, [2]).into_shared(), other.into_shared()],
        );
        assert!(matches!(result, Err(TableError::Invalid(_))), "{result:?}");
    }
}

#[test]
fn deep_copy_is_independent_of_the_source() {
    let mut source = part("source", 5, 3, [2]);
    source.keywords_mut().set("telescope", Scalar::from("WSRT"));
    source.info_mut().kind = "Measurement".into();
    let array = ArrayValue::new(Shape::new([2]), ArrayData::Double(vec![1.5, 2.5])).unwrap();
    source.column_mut("ARR").unwrap().put_array(1, &array).unwrap();

    let storage = StorageOptions {
        kind: StorageKind::Memory,
        ..StorageOptions::default()
    };
    let mut copy = source.deep_copy("copy", storage).unwrap();
    assert_eq!(copy.name(), "copy");
    assert_eq!(copy.nrow(), 3);
    assert_eq!(copy.desc(), source.desc());
    assert_eq!(copy.info(), source.info());
    assert!(copy.keywords().get("telescope").is_some());
    assert!(copy.path().is_none());
    assert_eq!(copy.storage().kind(), StorageKind::Memory);
    assert_eq!(
        copy.column("X").unwrap().get_column().unwrap(),
        source.column("X").unwrap().get_column().unwrap()
    );
    assert_eq!(copy.column("ARR").unwrap().get_array(1).unwrap(), array);

    copy.column_mut("X").unwrap().put(0, Scalar::Int32(-1)).unwrap();
    assert_eq!(source.column("X").unwrap().get(0).unwrap(), Scalar::Int32(5));
}
