use num_complex::Complex64;
use pretty_assertions::assert_eq;
use tabula_tables::{ArrayData, ArrayValue, DataType, Record, Scalar};
use tabula_taql::{
    expr_to_array_double, expr_to_array_int, expr_to_bool, expr_to_complex, expr_to_date,
    expr_to_double, expr_to_int, expr_to_string, normalize_unit, parse_datetime,
    parse_unit_spelling, Datum, RecordExpr, TaqlError, Unit, UnitSpellingFlags, Value,
};

fn record(a: i32) -> Record {
    let mut sub = Record::new();
    sub.set("x", Scalar::Int32(7));
    let arr = ArrayData::from_scalars(
        DataType::Double,
        vec![Scalar::Double(1.0), Scalar::Double(2.0), Scalar::Double(3.0)],
    )
    .unwrap();

    let mut record = Record::new();
    record.set("a", Scalar::Int32(a));
    record.set("b", Scalar::Double(2.5));
    record.set("name", Scalar::from("abc"));
    record.set("arr", ArrayValue::vector(arr));
    record.set("sub", sub);
    record
}

#[test]
fn scalar_results() {
    let rec = record(3);
    assert_eq!(expr_to_int(&rec, "a * 2").unwrap(), 6);
    assert_eq!(expr_to_int(&rec, "sub.x + a").unwrap(), 10);
    assert_eq!(expr_to_double(&rec, "b + 1", None).unwrap(), 3.5);
    assert!(expr_to_bool(&rec, "a > 2 && name == 'abc'").unwrap());
    assert!(expr_to_bool(&rec, "name ~ m/b/").unwrap());
    assert_eq!(expr_to_string(&rec, "upcase(name) + '!'").unwrap(), "ABC!");
    assert_eq!(
        expr_to_complex(&rec, "1 + 2i").unwrap(),
        Complex64::new(1.0, 2.0)
    );
}

#[test]
fn integer_results_absorb_rounding_noise() {
    let rec = record(3);
    assert_eq!(expr_to_int(&rec, "3 * 0.1 * 10").unwrap(), 3);
    assert_eq!(expr_to_int(&rec, "b").unwrap(), 2);
}

#[test]
fn array_results() {
    let rec = record(3);
    assert_eq!(expr_to_array_double(&rec, "arr * 2").unwrap(), vec![2.0, 4.0, 6.0]);
    assert_eq!(expr_to_double(&rec, "sum(arr)", None).unwrap(), 6.0);
    assert_eq!(expr_to_array_int(&rec, "a").unwrap(), vec![3]);
    assert_eq!(expr_to_int(&rec, "nelements(arr)").unwrap(), 3);
}

#[test]
fn unit_conversion_of_results() {
    let rec = record(3);
    assert_eq!(expr_to_double(&rec, "1km", Some("m")).unwrap(), 1000.0);
    let err = expr_to_double(&rec, "b", Some("m")).unwrap_err();
    assert!(matches!(err, TaqlError::Unit(_)), "{err}");
    let err = expr_to_double(&rec, "1km", Some("s")).unwrap_err();
    assert!(matches!(err, TaqlError::Unit(_)), "{err}");
}

#[test]
fn units_glued_to_numbers_and_parentheses() {
    let rec = record(3);
    assert_eq!(expr_to_double(&rec, "10m", Some("cm")).unwrap(), 1000.0);
    let mhz = expr_to_double(&rec, "(1e9Hz + 1GHz)MHz", None).unwrap();
    assert!((mhz - 2000.0).abs() < 1e-9, "{mhz}");
    let mhz = expr_to_double(&rec, "(a * 1kHz)MHz", None).unwrap();
    assert!((mhz - 0.003).abs() < 1e-12, "{mhz}");
}

#[test]
fn dates() {
    let rec = record(3);
    assert_eq!(expr_to_date(&rec, "2000-01-01").unwrap(), 51544.0);
    assert_eq!(expr_to_date(&rec, "datetime('2000-01-01') + 1").unwrap(), 51545.0);
    assert_eq!(expr_to_int(&rec, "year(3Mar16)").unwrap(), 2016);
    assert_eq!(expr_to_string(&rec, "cdate(3Mar16)").unwrap(), "03-Mar-2016");
    assert_eq!(expr_to_double(&rec, "2000-01-03 - 2000-01-01", None).unwrap(), 2.0);
    assert_eq!(parse_datetime("3Mar16").unwrap(), 57450.0);
}

#[test]
fn parsed_once_evaluated_on_many_records() {
    let expr = RecordExpr::parse(&record(0), "a + sub.x").unwrap();
    assert_eq!(expr.evaluate(&record(1)).unwrap(), Datum::Scalar(Value::Int(8)));
    assert_eq!(expr.evaluate(&record(5)).unwrap(), Datum::Scalar(Value::Int(12)));
}

#[test]
fn table_constructs_are_rejected() {
    let rec = record(3);
    let err = RecordExpr::parse(&rec, "rownr()").unwrap_err();
    assert!(matches!(err, TaqlError::NoTable(_)), "{err}");
    let err = RecordExpr::parse(&rec, "gsum(a)").unwrap_err();
    assert!(matches!(err, TaqlError::NoTable(_)), "{err}");
    let err = RecordExpr::parse(&rec, "a::unit").unwrap_err();
    assert!(matches!(err, TaqlError::NoTable(_)), "{err}");
    let err = RecordExpr::parse(&rec, "missing + 1").unwrap_err();
    assert!(matches!(err, TaqlError::UnknownField(_)), "{err}");
    let err = RecordExpr::parse(&rec, "sub").unwrap_err();
    assert!(matches!(err, TaqlError::Type(_)), "{err}");
}

#[test]
fn unit_algebra() {
    let kms = Unit::parse("km/s").unwrap();
    let ms = Unit::parse("m/s").unwrap();
    assert!(kms.conforms(&ms));
    assert_eq!(kms.conversion_factor(&ms).unwrap(), 1000.0);
    assert!(Unit::parse("deg").unwrap().is_angle());
    assert!(Unit::parse("Jy").unwrap().conversion_factor(&ms).is_err());
    assert!(Unit::parse("blorp").is_err());
}

#[test]
fn unit_spellings() {
    let default = UnitSpellingFlags::default();
    assert_eq!(normalize_unit("DEG", default).unwrap(), "deg");
    assert_eq!(normalize_unit("JY/BEAM", default).unwrap(), "Jy/beam");
    assert_eq!(normalize_unit("M**2", default).unwrap(), "m2");
    assert_eq!(normalize_unit("S", default).unwrap(), "S");

    let seconds = UnitSpellingFlags {
        s_is_second: true,
        ..UnitSpellingFlags::default()
    };
    assert_eq!(normalize_unit("S", seconds).unwrap(), "s");
    let hours = UnitSpellingFlags {
        h_is_hour: true,
        ..UnitSpellingFlags::default()
    };
    let hour = parse_unit_spelling("H", hours).unwrap();
    assert_eq!(hour.conversion_factor(&Unit::parse("s").unwrap()).unwrap(), 3600.0);
    assert!(normalize_unit("FROBS", default).is_err());
}
