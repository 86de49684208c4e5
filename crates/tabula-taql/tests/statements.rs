use pretty_assertions::assert_eq;
use std::sync::Arc;
use tabula_tables::{
    ColumnDesc, DataType, RecordField, Scalar, StorageKind, StorageOptions, Table, TableDesc,
    TableOptions, TableView,
};
use tabula_taql::{
    Datum, QueryResult, TaqlError, TaqlResult, TaqlSession, UserFunction, Value, ValueKind,
    ValueType,
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

/// `t`: X = 1..=5, NAME = a b c d e, GRP = X % 2, FLUX in Jy.
fn session() -> TaqlSession {
    let desc = TableDesc::new()
        .with_column(ColumnDesc::scalar("X", DataType::Int32))
        .unwrap()
        .with_column(ColumnDesc::scalar("NAME", DataType::String))
        .unwrap()
        .with_column(ColumnDesc::scalar("GRP", DataType::Int32))
        .unwrap()
        .with_column(ColumnDesc::scalar("FLUX", DataType::Double).with_unit("Jy"))
        .unwrap();
    let mut table = Table::create("t", desc, memory(5)).unwrap();
    let names = ["a", "b", "c", "d", "e"];
    for row in 0..5u64 {
        let x = row as i32 + 1;
        table.column_mut("X").unwrap().put(row, Scalar::Int32(x)).unwrap();
        table.column_mut("NAME").unwrap().put(row, Scalar::from(names[row as usize])).unwrap();
        table.column_mut("GRP").unwrap().put(row, Scalar::Int32(x % 2)).unwrap();
        table
            .column_mut("FLUX")
            .unwrap()
            .put(row, Scalar::Double(f64::from(x) * 0.5))
            .unwrap();
    }
    let mut session = TaqlSession::new();
    session.register_table("t", table.into_shared());
    session
}

fn ints(result: &QueryResult, column: &str) -> Vec<i64> {
    result
        .column_values(column)
        .unwrap()
        .iter()
        .map(|d| d.as_scalar().unwrap().as_int().unwrap())
        .collect()
}

fn strings(result: &QueryResult, column: &str) -> Vec<String> {
    result
        .column_values(column)
        .unwrap()
        .iter()
        .map(|d| d.as_scalar().unwrap().as_str().unwrap().to_string())
        .collect()
}

fn scalar(result: &QueryResult) -> Value {
    let values = result.values().expect("a CALC result");
    assert_eq!(values.len(), 1);
    values[0].as_scalar().unwrap().clone()
}

#[test]
fn select_where_gives_a_reference_view() {
    let mut s = session();
    let result = s.execute("SELECT FROM t WHERE X > 2 && X < 5").unwrap();
    assert!(matches!(result, QueryResult::View(_)));
    assert_eq!(result.row_numbers(), Some(vec![2, 3]));
    assert_eq!(result.column_names(), vec!["X", "NAME", "GRP", "FLUX"]);
}

#[test]
fn select_columns_with_aliases() {
    let mut s = session();
    let result = s.execute("SELECT NAME AS label, X FROM t WHERE X IN [1, 3, 5]").unwrap();
    assert_eq!(result.column_names(), vec!["label", "X"]);
    assert_eq!(strings(&result, "label"), vec!["a", "c", "e"]);
    assert_eq!(result.row_numbers(), Some(vec![0, 2, 4]));
}

#[test]
fn computed_columns_are_materialized() {
    let mut s = session();
    let result = s.execute("SELECT X * 10 AS big, upcase(NAME) FROM t LIMIT 2").unwrap();
    assert!(matches!(result, QueryResult::Table(_)));
    assert_eq!(result.column_names(), vec!["big", "Col_2"]);
    assert_eq!(ints(&result, "big"), vec![10, 20]);
    assert_eq!(strings(&result, "Col_2"), vec!["A", "B"]);
}

#[test]
fn order_offset_and_limit() {
    let mut s = session();
    let result = s.execute("SELECT X FROM t ORDERBY X DESC LIMIT 2 OFFSET 1").unwrap();
    assert_eq!(ints(&result, "X"), vec![4, 3]);

    let result = s.execute("SELECT X FROM t LIMIT 1:5:2").unwrap();
    assert_eq!(ints(&result, "X"), vec![2, 4]);

    let result = s.execute("SELECT X FROM t LIMIT -2:").unwrap();
    assert_eq!(ints(&result, "X"), vec![4, 5]);
}

#[test]
fn distinct_keeps_first_occurrences() {
    let mut s = session();
    let result = s.execute("SELECT DISTINCT GRP FROM t").unwrap();
    assert_eq!(ints(&result, "GRP"), vec![1, 0]);
}

#[test]
fn group_by_with_aggregates() {
    let mut s = session();
    let result = s
        .execute("SELECT GRP, gsum(X) AS total, gcount() AS n FROM t GROUPBY GRP")
        .unwrap();
    assert_eq!(ints(&result, "GRP"), vec![0, 1]);
    assert_eq!(ints(&result, "total"), vec![6, 9]);
    assert_eq!(ints(&result, "n"), vec![2, 3]);

    let result = s
        .execute("SELECT GRP, gsum(X) AS total FROM t GROUPBY GRP HAVING total > 7")
        .unwrap();
    assert_eq!(ints(&result, "GRP"), vec![1]);
}

#[test]
fn aggregate_without_groups_gives_one_row() {
    let mut s = session();
    let result = s.execute("SELECT gmin(X) AS lo, gmax(X) AS hi FROM t").unwrap();
    assert_eq!(ints(&result, "lo"), vec![1]);
    assert_eq!(ints(&result, "hi"), vec![5]);

    let empty = s.execute("SELECT gcount() AS n FROM t WHERE X > 10").unwrap();
    assert_eq!(empty.nrow(), Some(0));
}

#[test]
fn giving_registers_the_result() {
    let mut s = session();
    s.execute("SELECT FROM t WHERE X >= 4 GIVING big").unwrap();
    assert!(s.view("big").is_some());
    let result = s.execute("SELECT FROM big WHERE X == 5").unwrap();
    assert_eq!(result.row_numbers(), Some(vec![4]));
}

#[test]
fn nested_queries() {
    let mut s = session();
    let result = s
        .execute("SELECT NAME FROM [SELECT FROM t WHERE X > 1] WHERE X < 4")
        .unwrap();
    assert_eq!(strings(&result, "NAME"), vec!["b", "c"]);

    let result = s
        .execute("SELECT FROM t WHERE X IN [SELECT X FROM t WHERE GRP == 0]")
        .unwrap();
    assert_eq!(result.row_numbers(), Some(vec![1, 3]));
}

#[test]
fn patterns_and_like() {
    let mut s = session();
    s.execute("UPDATE t SET NAME = 'alpha' WHERE X == 2").unwrap();
    let result = s.execute("SELECT FROM t WHERE NAME ~ p/a*/").unwrap();
    assert_eq!(result.row_numbers(), Some(vec![0, 1]));
    let result = s.execute("SELECT FROM t WHERE NAME LIKE 'al%'").unwrap();
    assert_eq!(result.row_numbers(), Some(vec![1]));
}

#[test]
fn update_sees_old_values() {
    let mut s = session();
    let count = s.execute("UPDATE t SET X = X + 100, GRP = X WHERE X <= 2").unwrap();
    assert_eq!(count.count(), Some(2));
    let result = s.execute("SELECT X, GRP FROM t").unwrap();
    assert_eq!(ints(&result, "X"), vec![101, 102, 3, 4, 5]);
    assert_eq!(ints(&result, "GRP"), vec![1, 2, 1, 0, 1]);
}

#[test]
fn update_converts_units() {
    let mut s = session();
    s.execute("UPDATE t SET FLUX = 2000mJy WHERE rownr() == 0").unwrap();
    let result = s.execute("CALC FLUX FROM t").unwrap();
    let flux = result.values().unwrap()[0].as_scalar().unwrap().as_double().unwrap();
    assert!((flux - 2.0).abs() < 1e-12, "{flux}");

    let err = s.execute("UPDATE t SET FLUX = 3m").unwrap_err();
    assert!(matches!(err, TaqlError::Unit(_)), "{err}");
}

#[test]
fn update_through_a_view_writes_the_root() {
    let mut s = session();
    s.execute("SELECT FROM t WHERE GRP == 0 GIVING even").unwrap();
    s.execute("UPDATE even SET X = 0").unwrap();
    let table = s.table("t").unwrap();
    let guard = table.read();
    let x: Vec<Scalar> = guard.column("X").unwrap().get_column().unwrap();
    assert_eq!(
        x,
        vec![
            Scalar::Int32(1),
            Scalar::Int32(0),
            Scalar::Int32(3),
            Scalar::Int32(0),
            Scalar::Int32(5)
        ]
    );
}

#[test]
fn insert_and_delete() {
    let mut s = session();
    let inserted = s
        .execute("INSERT INTO t (X, NAME) VALUES (6, 'f'), (7, 'g')")
        .unwrap();
    assert_eq!(inserted.count(), Some(2));
    assert_eq!(s.table("t").unwrap().nrow(), 7);

    let inserted = s.execute("INSERT INTO t SET X = 8, NAME = 'h'").unwrap();
    assert_eq!(inserted.count(), Some(1));

    let deleted = s.execute("DELETE FROM t WHERE X > 5").unwrap();
    assert_eq!(deleted.count(), Some(3));
    let result = s.execute("SELECT NAME FROM t").unwrap();
    assert_eq!(strings(&result, "NAME"), vec!["a", "b", "c", "d", "e"]);

    let err = s.execute("INSERT INTO t (X, NAME) VALUES (1)").unwrap_err();
    assert!(matches!(err, TaqlError::Eval(_)), "{err}");
}

#[test]
fn failed_insert_adds_no_rows() {
    let mut s = session();
    s.execute("CREATE TABLE vecs (A I4, ARR R8 [SHAPE=[2]])").unwrap();
    let err = s.execute("INSERT INTO vecs VALUES (1, [1.0, 2.0, 3.0])").unwrap_err();
    assert!(matches!(err, TaqlError::Table(_)), "{err}");
    assert_eq!(s.table("vecs").unwrap().nrow(), 0);

    s.execute("INSERT INTO vecs VALUES (1, [1.0, 2.0])").unwrap();
    assert_eq!(s.table("vecs").unwrap().nrow(), 1);

    let err = s.execute("INSERT INTO t (X) VALUES (1), (9999999999)").unwrap_err();
    assert!(matches!(err, TaqlError::Type(_)), "{err}");
    assert_eq!(s.table("t").unwrap().nrow(), 5);
}

#[test]
fn failed_update_changes_nothing() {
    let mut s = session();
    let err = s.execute("UPDATE t SET GRP = 7, X = iif(X == 5, 9999999999, 0)").unwrap_err();
    assert!(matches!(err, TaqlError::Type(_)), "{err}");
    let result = s.execute("SELECT X, GRP FROM t").unwrap();
    assert_eq!(ints(&result, "X"), vec![1, 2, 3, 4, 5]);
    assert_eq!(ints(&result, "GRP"), vec![1, 0, 1, 0, 1]);
}

#[test]
fn integer_division_at_the_limits() {
    let mut s = session();
    assert_eq!(
        scalar(&s.execute("CALC (-9223372036854775807 - 1) // -1").unwrap()),
        Value::Int(i64::MIN)
    );
    assert_eq!(
        scalar(&s.execute("CALC (-9223372036854775807 - 1) % -1").unwrap()),
        Value::Int(0)
    );
    assert_eq!(scalar(&s.execute("CALC -7 // 2").unwrap()), Value::Int(-4));
    let err = s.execute("CALC 1 // 0").unwrap_err();
    assert!(matches!(err, TaqlError::Eval(_)), "{err}");
}

#[test]
fn oversized_arrays_are_errors() {
    let mut s = session();
    let err = s.execute("CALC array(0, 9223372036854775807)").unwrap_err();
    assert!(matches!(err, TaqlError::Eval(_)), "{err}");
    let err = s.execute("CALC array(0, 4294967296, 4294967296)").unwrap_err();
    assert!(matches!(err, TaqlError::Eval(_)), "{err}");
}

#[test]
fn views_cannot_change_shape() {
    let mut s = session();
    s.execute("SELECT FROM t WHERE X > 3 GIVING v").unwrap();
    let err = s.execute("DELETE FROM v").unwrap_err();
    assert!(matches!(err, TaqlError::Unsupported(_)), "{err}");
}

#[test]
fn calc_forms() {
    let mut s = session();
    assert_eq!(scalar(&s.execute("CALC 2 + 3").unwrap()), Value::Int(5));
    assert_eq!(scalar(&s.execute("CALC gsum(X) FROM t").unwrap()), Value::Int(15));
    assert_eq!(scalar(&s.execute("CALC sum([1, 2, 3])").unwrap()), Value::Int(6));

    let per_row = s.execute("CALC X * 2 FROM t").unwrap();
    let values: Vec<i64> = per_row
        .values()
        .unwrap()
        .iter()
        .map(|d| d.as_scalar().unwrap().as_int().unwrap())
        .collect();
    assert_eq!(values, vec![2, 4, 6, 8, 10]);

    let km = scalar(&s.execute("CALC 1km + 500m").unwrap());
    assert_eq!(km, Value::Double(1.5));

    let r = scalar(&s.execute("CALC rand()").unwrap()).as_double().unwrap();
    assert!((0.0..1.0).contains(&r));
}

#[test]
fn row_functions_need_a_table() {
    let mut s = session();
    let err = s.execute("CALC rownr()").unwrap_err();
    assert!(matches!(err, TaqlError::NoTable(_)), "{err}");
    let err = s.execute("CALC gsum(1)").unwrap_err();
    assert!(matches!(err, TaqlError::NoTable(_)), "{err}");

    let rows = s.execute("SELECT FROM t WHERE rownr() % 2 == 0").unwrap();
    assert_eq!(rows.row_numbers(), Some(vec![0, 2, 4]));
}

#[test]
fn unknown_names() {
    let mut s = session();
    let err = s.execute("SELECT FROM t WHERE NOPE > 1").unwrap_err();
    assert!(matches!(err, TaqlError::UnknownColumn(_)), "{err}");
    let err = s.execute("SELECT FROM nowhere").unwrap_err();
    assert!(matches!(err, TaqlError::UnknownTable(_)), "{err}");
    let err = s.execute("CALC frobnicate(1)").unwrap_err();
    assert!(matches!(err, TaqlError::UnknownFunction { nargs: 1, .. }), "{err}");
}

#[test]
fn create_and_alter_table() {
    let mut s = session();
    let created = s
        .execute("CREATE TABLE obs (TIME EPOCH, DATA R8 [SHAPE=[2,3]], SRC S [COMMENT='source']) LIMIT 3")
        .unwrap();
    assert_eq!(created.nrow(), Some(3));
    let err = s.execute("CREATE TABLE obs (A I4)").unwrap_err();
    assert!(matches!(err, TaqlError::Eval(_)), "{err}");

    s.execute("UPDATE obs SET DATA = 1.5, TIME = 2016-03-03/12:00:00").unwrap();
    let result = s.execute("SELECT FROM obs").unwrap();
    let times = result.column_values("TIME").unwrap();
    assert_eq!(times[0].value_type(), ValueType::Date);
    let mjd = times[0].as_scalar().unwrap().as_date().unwrap();
    assert!((mjd - 57450.5).abs() < 1e-9);
    let data = result.column_values("DATA").unwrap();
    assert_eq!(data[2].kind(), ValueKind::Array);
    assert_eq!(data[2].flatten(), vec![Value::Double(1.5); 6]);

    s.execute("ALTER TABLE obs ADD COLUMN FLAG B RENAME COLUMN SRC TO SOURCE ADD ROW 2")
        .unwrap();
    s.execute("ALTER TABLE obs SET KEYWORD observer = 'me', DATA::scale = 2.5")
        .unwrap();
    s.execute("ALTER TABLE obs DROP COLUMN FLAG").unwrap();

    let table = s.table("obs").unwrap();
    let guard = table.read();
    assert_eq!(guard.nrow(), 5);
    assert_eq!(guard.column_names(), vec!["TIME", "DATA", "SOURCE"]);
    assert_eq!(
        guard.keywords().get("observer"),
        Some(&RecordField::Scalar(Scalar::from("me")))
    );
    assert_eq!(
        guard.column_desc("DATA").unwrap().keywords.get("scale"),
        Some(&RecordField::Scalar(Scalar::Double(2.5)))
    );
    drop(guard);

    let kw = s.execute("CALC DATA::scale * 2 FROM obs").unwrap();
    assert_eq!(kw.values().unwrap()[0], Datum::Scalar(Value::Double(5.0)));
}

#[test]
fn tables_round_trip_through_paths() {
    let dir = tempfile::tempdir().unwrap();
    let path = |name: &str| dir.path().join(name).to_str().unwrap().to_string();
    let (base, view, computed) = (path("base"), path("view"), path("computed"));

    let mut s = TaqlSession::new();
    s.execute(&format!("CREATE TABLE '{base}' (V I4) LIMIT 4")).unwrap();
    s.execute(&format!("UPDATE '{base}' SET V = rownr() * 3")).unwrap();
    s.table(&base).unwrap().write().flush().unwrap();
    s.execute(&format!("SELECT FROM '{base}' WHERE V > 3 GIVING '{view}'"))
        .unwrap();
    s.execute(&format!("SELECT V * 2 AS W FROM '{base}' GIVING '{computed}'"))
        .unwrap();
    drop(s);

    let mut fresh = TaqlSession::new();
    let result = fresh.execute(&format!("SELECT V FROM '{view}'")).unwrap();
    assert_eq!(ints(&result, "V"), vec![6, 9]);
    let result = fresh.execute(&format!("SELECT FROM '{computed}'")).unwrap();
    assert_eq!(ints(&result, "W"), vec![0, 6, 12, 18]);
}

#[test]
fn show_functions_lists_categories() {
    let mut s = session();
    let text = s.execute("SHOW FUNCTIONS datetime").unwrap();
    let text = text.text().unwrap();
    assert!(text.contains("CDATETIME"), "{text}");
    assert!(!text.contains("SQRT"), "{text}");
    assert!(s.execute("SHOW FUNCTIONS nonsense").is_err());
}

#[derive(Debug)]
struct Hypot;

impl UserFunction for Hypot {
    fn result_type(&self, args: &[(ValueType, ValueKind)]) -> TaqlResult<(ValueType, ValueKind)> {
        match args {
            [(a, ValueKind::Scalar), (b, ValueKind::Scalar)] if a.is_real() && b.is_real() => {
                Ok((ValueType::Double, ValueKind::Scalar))
            }
            _ => Err(TaqlError::Type("geo.hypot needs two real scalars".into())),
        }
    }

    fn evaluate(&self, args: &[Datum]) -> TaqlResult<Datum> {
        let a = args[0].as_scalar()?.as_double()?;
        let b = args[1].as_scalar()?.as_double()?;
        Ok(Datum::Scalar(Value::Double(a.hypot(b))))
    }
}

#[test]
fn user_defined_functions() {
    let mut s = session();
    s.functions_mut().register("geo.hypot", Arc::new(Hypot)).unwrap();
    assert_eq!(scalar(&s.execute("CALC geo.hypot(3, 4)").unwrap()), Value::Double(5.0));

    let result = s.execute("SELECT FROM t WHERE GEO.HYPOT(X, 0) > 4").unwrap();
    assert_eq!(result.row_numbers(), Some(vec![4]));

    let err = s.execute("CALC geo.hypot('a', 4)").unwrap_err();
    assert!(matches!(err, TaqlError::Type(_)), "{err}");
}
