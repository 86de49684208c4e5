use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use tabula_tables::{
    ColumnDesc, DataType, RefTable, RefTableDescriptor, Scalar, SharedTable, StorageOptions, Table,
    TableDesc, TableError, TableInfo, TableOptions, TableView,
};

fn root(nrow: u64) -> SharedTable {
    let desc = TableDesc::new()
        .with_column(ColumnDesc::scalar("X", DataType::Int32))
        .unwrap()
        .with_column(ColumnDesc::scalar("label", DataType::String))
        .unwrap();
    let options = TableOptions {
        storage: StorageOptions::default(),
        initial_rows: nrow,
    };
    let mut table = Table::create("root", desc, options).unwrap();
    for row in 0..nrow {
        table
            .column_mut("X")
            .unwrap()
            .put(row, Scalar::Int32(row as i32 + 1))
            .unwrap();
        table
            .column_mut("label")
            .unwrap()
            .put(row, Scalar::from(format!("r{row}").as_str()))
            .unwrap();
    }
    table.into_shared()
}

fn xs(view: &RefTable) -> Vec<Scalar> {
    view.column("X").unwrap().get_column().unwrap()
}

#[test]
fn mask_view() {
    let root = root(5);
    let view = RefTable::from_mask(&root, &[false, false, true, true, false]);
    assert_eq!(view.nrow(), 2);
    assert_eq!(view.row_numbers(), vec![2, 3]);
    assert!(view.row_order());
    assert_eq!(xs(&view), vec![Scalar::Int32(3), Scalar::Int32(4)]);

    let short = RefTable::from_mask(&root, &[true]);
    assert_eq!(short.row_numbers(), vec![0]);
    let long = RefTable::from_mask(&root, &[true; 9]);
    assert_eq!(long.nrow(), 5);
}

#[test]
fn row_views_resolve_to_the_root() {
    let root = root(6);
    let view = RefTable::from_rows(&root, &[5, 1, 3]).unwrap();
    assert!(!view.row_order());
    assert_eq!(xs(&view), [6, 2, 4].map(Scalar::Int32).to_vec());

    let nested = view.select_rows(&[2, 0]).unwrap();
    assert_eq!(nested.row_numbers(), vec![3, 5]);
    assert!(nested.row_order());
    assert!(nested.root().ptr_eq(&root));
    assert_eq!(nested.root_row(1).unwrap(), 5);

    assert!(matches!(
        RefTable::from_rows(&root, &[1, 6]),
        Err(TableError::RowOutOfRange { row: 6, nrow: 6 })
    ));
    assert!(matches!(
        view.select_rows(&[3]),
        Err(TableError::RowOutOfRange { row: 3, nrow: 3 })
    ));

    let mut rows = vec![0, 2];
    assert!(!view.adjust_rownrs(&mut rows, true).unwrap());
    assert_eq!(rows, vec![5, 3]);
    assert_eq!(view.root_rownrs(&[1, 2]).unwrap(), vec![1, 3]);
}

#[test]
fn projection_and_renaming() {
    let root = root(3);
    let mut view = RefTable::project(&root, &["label"]).unwrap();
    assert_eq!(view.column_names(), vec!["label"]);
    assert!(view.column("X").is_err());
    assert!(RefTable::project(&root, &["nope"]).is_err());

    view.rename_column("label", "name").unwrap();
    assert_eq!(view.root_column("name").unwrap(), "label");
    assert_eq!(view.column("name").unwrap().get(2).unwrap(), Scalar::from("r2"));

    let again = view.select_columns(&["name"]).unwrap();
    assert_eq!(again.name_map().get("name").map(String::as_str), Some("label"));

    view.remove_column("name").unwrap();
    assert!(view.column_names().is_empty());
    assert_eq!(root.read().desc().len(), 2);
}

#[test]
fn writes_go_through_to_the_root() {
    let root = root(4);
    let mut view = RefTable::from_rows(&root, &[3, 1]).unwrap();
    view.column_mut("X").unwrap().put(0, Scalar::Int32(40)).unwrap();
    assert_eq!(
        root.read().column("X").unwrap().get(3).unwrap(),
        Scalar::Int32(40)
    );
}

#[test]
fn adding_columns() {
    let root = root(2);
    let mut view = RefTable::full(&root);
    view.remove_column("label").unwrap();
    view.add_column(ColumnDesc::scalar("label", DataType::String), false)
        .unwrap();
    assert!(matches!(
        view.add_column(ColumnDesc::scalar("X", DataType::Int32), true),
        Err(TableError::DuplicateColumn(_))
    ));
    assert!(view
        .add_column(ColumnDesc::scalar("flag", DataType::Bool), false)
        .is_err());
    view.add_column(ColumnDesc::scalar("flag", DataType::Bool), true)
        .unwrap();
    assert!(root.read().desc().column("flag").is_some());
    assert_eq!(view.column("flag").unwrap().get(1).unwrap(), Scalar::Bool(false));
}

#[test]
fn row_editing() {
    let root = root(10);
    let mut view = RefTable::from_rows(&root, &[]).unwrap();
    view.add_rownr(4).unwrap();
    view.add_rownr_range(6, 8).unwrap();
    assert_eq!(view.row_numbers(), vec![4, 6, 7, 8]);
    assert!(view.row_order());
    view.add_rownr(2).unwrap();
    assert!(!view.row_order());
    assert!(view.add_rownr(10).is_err());

    view.remove_row(1).unwrap();
    assert_eq!(view.row_numbers(), vec![4, 7, 8, 2]);
    assert!(view.remove_row(4).is_err());
    view.set_nrrow(2).unwrap();
    assert_eq!(view.row_numbers(), vec![4, 7]);
    assert!(view.set_nrrow(3).is_err());
    assert_eq!(root.nrow(), 10);
}

#[test]
fn set_algebra() {
    let root = root(8);
    let a = RefTable::from_rows(&root, &[1, 2, 3, 5]).unwrap();
    let b = RefTable::from_rows(&root, &[6, 3, 1]).unwrap();
    assert_eq!(a.and(&b).unwrap().row_numbers(), vec![1, 3]);
    assert_eq!(a.or(&b).unwrap().row_numbers(), vec![1, 2, 3, 5, 6]);
    assert_eq!(a.sub(&b).unwrap().row_numbers(), vec![2, 5]);
    assert_eq!(a.xor(&b).unwrap().row_numbers(), vec![2, 5, 6]);
    assert_eq!(a.not().row_numbers(), vec![0, 4, 6, 7]);
    assert!(a.or(&b).unwrap().row_order());

    let other = self::root(8);
    let c = RefTable::full(&other);
    assert!(matches!(a.and(&c), Err(TableError::DifferentRoot)));
}

fn descriptor(root_nrow: u64, rows: Vec<u64>) -> RefTableDescriptor {
    let mut name_map = BTreeMap::new();
    name_map.insert("a".to_string(), "A".to_string());
    name_map.insert("b".to_string(), "b".to_string());
    RefTableDescriptor {
        version: RefTableDescriptor::select_version(rows.len() as u64, root_nrow, &rows),
        root_path: "../root".to_string(),
        name_map,
        columns: vec!["b".to_string(), "a".to_string()],
        root_nrow,
        row_order: true,
        rows,
        info: TableInfo {
            kind: "view".to_string(),
            ..TableInfo::default()
        },
    }
}

#[test]
fn descriptor_versions() {
    let limit = u64::from(u32::MAX);
    for (root_nrow, rows, version) in [
        (limit - 1, vec![0, limit - 2], 2),
        (limit, vec![0, 1], 3),
        (limit + 1, vec![limit], 3),
        (10, vec![], 2),
    ] {
        let descriptor = descriptor(root_nrow, rows);
        assert_eq!(descriptor.version, version);
        let bytes = descriptor.encode().unwrap();
        assert_eq!(RefTableDescriptor::decode(&bytes).unwrap(), descriptor);
    }
}

#[test]
fn descriptor_version_one_has_no_column_order() {
    let mut old = descriptor(5, vec![1, 2]);
    old.version = 1;
    let decoded = RefTableDescriptor::decode(&old.encode().unwrap()).unwrap();
    assert!(decoded.columns.is_empty());
    assert_eq!(decoded.rows, vec![1, 2]);
    assert_eq!(decoded.name_map, old.name_map);

    let mut future = descriptor(5, vec![1]);
    future.version = 4;
    assert!(matches!(future.encode(), Err(TableError::UnsupportedVersion(4))));
    let mut bytes = descriptor(5, vec![1]).encode().unwrap();
    bytes[8..12].copy_from_slice(&4u32.to_le_bytes());
    assert!(matches!(
        RefTableDescriptor::decode(&bytes),
        Err(TableError::UnsupportedVersion(4))
    ));
}

#[test]
fn narrow_descriptor_rejects_wide_rows() {
    let mut wide = descriptor(10, vec![u64::from(u32::MAX) + 3]);
    wide.version = 2;
    assert!(wide.encode().is_err());
}

#[test]
fn save_and_open_view() {
    let dir = tempfile::tempdir().unwrap();
    let root_dir = dir.path().join("tables").join("main");
    let view_dir = dir.path().join("views").join("sel");
    let root = root(6);
    root.write().save(&root_dir).unwrap();

    let mut view = RefTable::from_rows(&root, &[4, 0, 2]).unwrap();
    view.rename_column("X", "x").unwrap();
    view.info_mut().readme = "every other row".to_string();
    view.save(&view_dir).unwrap();
    assert!(!view.is_changed());
    drop(view);

    let opened = RefTable::open(&view_dir).unwrap();
    assert_eq!(opened.row_numbers(), vec![4, 0, 2]);
    assert!(!opened.row_order());
    assert_eq!(opened.column_names(), vec!["x", "label"]);
    assert_eq!(
        opened.column("x").unwrap().get_column().unwrap(),
        [5, 1, 3].map(Scalar::Int32).to_vec()
    );
    assert_eq!(opened.info().readme, "every other row");

    let shared = RefTable::open_with_root(&view_dir, &root).unwrap();
    assert!(shared.root().ptr_eq(&root));
}

#[test]
fn view_on_unsaved_root_cannot_be_saved() {
    let dir = tempfile::tempdir().unwrap();
    let root = root(2);
    let mut view = RefTable::full(&root);
    assert!(matches!(view.save(dir.path()), Err(TableError::NotPersistent(_))));
}

#[test]
fn opening_fails_when_root_shrank() {
    let dir = tempfile::tempdir().unwrap();
    let root_dir = dir.path().join("root");
    let view_dir = dir.path().join("view");
    let root = root(6);
    root.write().save(&root_dir).unwrap();
    RefTable::from_rows(&root, &[1]).unwrap().save(&view_dir).unwrap();

    root.write().remove_row(5).unwrap();
    root.write().flush().unwrap();
    assert!(matches!(
        RefTable::open(&view_dir),
        Err(TableError::RootShrunk { expected: 6, actual: 5 })
    ));
}

#[test]
fn columns_missing_from_the_root_are_dropped_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let root_dir = dir.path().join("root");
    let view_dir = dir.path().join("view");
    let root = root(3);
    root.write().save(&root_dir).unwrap();
    RefTable::full(&root).save(&view_dir).unwrap();

    root.write().remove_column("label").unwrap();
    let opened = RefTable::open_with_root(&view_dir, &root).unwrap();
    assert_eq!(opened.column_names(), vec!["X"]);
    assert!(opened.root_column("label").is_err());
}
