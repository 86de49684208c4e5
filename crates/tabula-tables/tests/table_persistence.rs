use pretty_assertions::assert_eq;
use tabula_tables::{
    ArrayData, ArrayValue, ColumnDesc, DataType, Record, RecordField, Scalar, Shape, StorageKind,
    StorageOptions, Table, TableDesc, TableError, TableOptions, TableView,
};

fn build(kind: StorageKind) -> Table {
    let desc = TableDesc::new()
        .with_column(ColumnDesc::scalar("time", DataType::Double).with_unit("s"))
        .unwrap()
        .with_column(ColumnDesc::scalar("antenna", DataType::String))
        .unwrap()
        .with_column(ColumnDesc::array("uvw", DataType::Double).with_shape(Shape::vector(3)))
        .unwrap()
        .with_column(ColumnDesc::array("flags", DataType::Bool))
        .unwrap();
    let options = TableOptions {
        storage: StorageOptions {
            kind,
            bucket_size: 256,
        },
        initial_rows: 50,
    };
    let mut table = Table::create("vis", desc, options).unwrap();
    for row in 0..50u64 {
        let mut time = table.column_mut("time").unwrap();
        time.put(row, Scalar::Double((row / 10) as f64)).unwrap();
        let mut antenna = table.column_mut("antenna").unwrap();
        antenna.put(row, Scalar::from(format!("ANT{}", row % 7).as_str())).unwrap();
        let mut uvw = table.column_mut("uvw").unwrap();
        uvw.put_array(
            row,
            &ArrayValue::vector(ArrayData::Double(vec![row as f64, 1.0, -(row as f64)])),
        )
        .unwrap();
        if row % 3 == 0 {
            let mut flags = table.column_mut("flags").unwrap();
            let shape = Shape::vector((row % 4 + 1) as usize);
            flags
                .put_array(row, &ArrayValue::filled(shape, &Scalar::Bool(true)))
                .unwrap();
        }
    }
    table.keywords_mut().set("telescope", Scalar::from("LOFAR"));
    let mut sub = Record::new();
    sub.set("epoch", Scalar::Double(51544.5));
    table.keywords_mut().set("meta", sub);
    table
        .column_keywords_mut("time")
        .unwrap()
        .set("MEASINFO", Scalar::from("epoch"));
    table.info_mut().kind = "MeasurementSet".to_string();
    table
}

fn snapshot(table: &dyn TableView) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for row in 0..table.nrow() {
        let mut cells = Vec::new();
        for name in table.column_names() {
            cells.push(format!("{:?}", table.get_cell(&name, row).unwrap()));
        }
        rows.push(cells);
    }
    rows
}

#[test]
fn save_and_open_round_trip() {
    for kind in [StorageKind::Incremental, StorageKind::Memory] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vis.tab");
        let mut table = build(kind);
        let expected = snapshot(&table);
        table.save(&path).unwrap();
        assert_eq!(table.path(), Some(path.as_path()));
        drop(table);

        let table = Table::open(&path).unwrap();
        assert_eq!(table.name(), "vis");
        assert_eq!(table.nrow(), 50);
        assert_eq!(table.storage().kind(), kind);
        assert_eq!(snapshot(&table), expected);
        assert_eq!(
            table.keywords().get_path("meta.epoch"),
            Some(&RecordField::Scalar(Scalar::Double(51544.5)))
        );
        let time = table.desc().column("time").unwrap();
        assert_eq!(time.unit.as_deref(), Some("s"));
        assert!(time.keywords.contains("MEASINFO"));
        assert_eq!(table.info().kind, "MeasurementSet");
        assert!(!table.column("flags").unwrap().is_defined(1).unwrap());
    }
}

#[test]
fn changes_are_flushed_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let mut table = build(StorageKind::Incremental);
    table.save(dir.path()).unwrap();
    table.remove_rows(&[0, 49, 10]).unwrap();
    table.rename_column("antenna", "station").unwrap();
    drop(table);

    let table = Table::open(dir.path()).unwrap();
    assert_eq!(table.nrow(), 47);
    let station = table.column("station").unwrap();
    assert_eq!(station.get(0).unwrap(), Scalar::from("ANT1"));
    assert_eq!(station.get(9).unwrap(), Scalar::from("ANT4"));
    assert!(table.column("antenna").is_err());
}

#[test]
fn structural_changes() {
    let mut table = build(StorageKind::Incremental);
    table
        .add_column(ColumnDesc::scalar("weight", DataType::Float).with_default(Scalar::Float(1.0)))
        .unwrap();
    assert!(matches!(
        table.add_column(ColumnDesc::scalar("weight", DataType::Float)),
        Err(TableError::DuplicateColumn(_))
    ));
    assert_eq!(table.column("weight").unwrap().get(49).unwrap(), Scalar::Float(1.0));
    assert_eq!(table.column("time").unwrap().get(49).unwrap(), Scalar::Double(4.0));

    table.remove_column("uvw").unwrap();
    assert_eq!(table.column_names(), vec!["time", "antenna", "flags", "weight"]);
    assert_eq!(table.column("antenna").unwrap().get(8).unwrap(), Scalar::from("ANT1"));
    assert!(matches!(table.remove_row(50), Err(TableError::RowOutOfRange { .. })));
}

#[test]
fn opening_garbage_fails() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("table.dat"), b"not a table").unwrap();
    assert!(matches!(Table::open(dir.path()), Err(TableError::Corrupt(_))));
    let missing = dir.path().join("missing");
    assert!(matches!(Table::open(missing), Err(TableError::Io(_))));
}
