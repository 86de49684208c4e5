use pretty_assertions::assert_eq;
use tabula_taql::ast::{
    AlterAction, BinaryOp, Expr, Giving, Limit, Literal, SelectColumn, SetItem, Statement,
    TableSource, UnaryOp,
};
use tabula_taql::{parse_expression, parse_statement, PatternKind, TaqlError};

fn int(v: i64) -> Box<Expr> {
    Box::new(Expr::Literal(Literal::Int(v)))
}

fn name(n: &str) -> Box<Expr> {
    Box::new(Expr::Name(n.to_string()))
}

fn bin(op: BinaryOp, a: Box<Expr>, b: Box<Expr>) -> Box<Expr> {
    Box::new(Expr::Binary(op, a, b))
}

fn expr(text: &str) -> Expr {
    parse_expression(text).unwrap_or_else(|err| panic!("{text}: {err}"))
}

#[test]
fn arithmetic_precedence() {
    assert_eq!(
        expr("1 + 2 * 3"),
        *bin(BinaryOp::Add, int(1), bin(BinaryOp::Mul, int(2), int(3)))
    );
    assert_eq!(
        expr("(1 + 2) * 3"),
        *bin(BinaryOp::Mul, bin(BinaryOp::Add, int(1), int(2)), int(3))
    );
    assert_eq!(
        expr("10 - 4 - 3"),
        *bin(BinaryOp::Sub, bin(BinaryOp::Sub, int(10), int(4)), int(3))
    );
}

#[test]
fn power_is_right_associative_and_binds_tighter_than_minus() {
    assert_eq!(
        expr("2 ** 3 ** 2"),
        *bin(BinaryOp::Pow, int(2), bin(BinaryOp::Pow, int(3), int(2)))
    );
    assert_eq!(
        expr("-2 ** 2"),
        Expr::Unary(UnaryOp::Neg, bin(BinaryOp::Pow, int(2), int(2)))
    );
}

#[test]
fn logical_precedence() {
    assert_eq!(
        expr("a || b && c"),
        *bin(BinaryOp::Or, name("a"), bin(BinaryOp::And, name("b"), name("c")))
    );
    assert_eq!(
        expr("NOT a AND b"),
        *bin(
            BinaryOp::And,
            Box::new(Expr::Unary(UnaryOp::Not, name("a"))),
            name("b")
        )
    );
    assert_eq!(
        expr("x > 1 and y <= 2"),
        *bin(
            BinaryOp::And,
            bin(BinaryOp::Gt, name("x"), int(1)),
            bin(BinaryOp::Le, name("y"), int(2))
        )
    );
}

#[test]
fn between_keeps_its_own_and() {
    assert_eq!(
        expr("x BETWEEN 1 AND 3 AND flag"),
        *bin(
            BinaryOp::And,
            Box::new(Expr::Between {
                expr: name("x"),
                lower: int(1),
                upper: int(3),
                negate: false,
            }),
            name("flag")
        )
    );
}

#[test]
fn set_forms() {
    assert_eq!(
        expr("x NOT IN [1, 2:5]"),
        Expr::In {
            expr: name("x"),
            set: vec![
                SetItem::Value(*int(1)),
                SetItem::Range {
                    start: Some(*int(2)),
                    end: Some(*int(5)),
                    step: None,
                },
            ],
            negate: true,
        }
    );
    assert_eq!(
        expr("x IN <1, 5}"),
        Expr::In {
            expr: name("x"),
            set: vec![SetItem::Interval {
                lower: Some(*int(1)),
                upper: Some(*int(5)),
                lower_closed: false,
                upper_closed: true,
            }],
            negate: false,
        }
    );
}

#[test]
fn units_glue_to_numbers_and_parentheses() {
    assert_eq!(expr("10km"), Expr::WithUnit(int(10), "km".into()));
    assert_eq!(
        expr("(a + b)deg"),
        Expr::WithUnit(bin(BinaryOp::Add, name("a"), name("b")), "deg".into())
    );
}

#[test]
fn calls_keywords_and_patterns() {
    assert_eq!(
        expr("gcount(*)"),
        Expr::Call {
            name: "gcount".into(),
            args: vec![],
        }
    );
    assert_eq!(expr("DATA::unit"), *name("DATA::unit"));
    assert_eq!(
        expr("name ~ p/a*/i"),
        *bin(
            BinaryOp::Match,
            name("name"),
            Box::new(Expr::Literal(Literal::Pattern {
                source: "a*".into(),
                kind: PatternKind::Glob,
                case_insensitive: true,
            }))
        )
    );
    assert_eq!(expr("T"), Expr::Literal(Literal::Bool(true)));
}

#[test]
fn select_clauses() {
    let Statement::Select(select) = parse_statement(
        "SELECT DISTINCT a AS x, * FROM tab t WHERE a > 1 GROUP BY a HAVING gcount() > 1 \
         ORDER BY a DESC, b LIMIT 2:10:2 OFFSET 1 GIVING result",
    )
    .unwrap() else {
        panic!("expected SELECT");
    };
    assert!(select.distinct);
    assert_eq!(select.columns.len(), 2);
    assert_eq!(select.columns[1], SelectColumn::All);
    let from = select.from.unwrap();
    assert_eq!(from.source, TableSource::Name("tab".into()));
    assert_eq!(from.alias.as_deref(), Some("t"));
    assert_eq!(select.group_by, vec![*name("a")]);
    assert!(select.having.is_some());
    assert_eq!(select.order_by.len(), 2);
    assert!(select.order_by[0].descending);
    assert!(!select.order_by[1].descending);
    assert_eq!(
        select.limit,
        Some(Limit::Slice {
            start: Some(*int(2)),
            end: Some(*int(10)),
            step: Some(*int(2)),
        })
    );
    assert_eq!(select.offset, Some(*int(1)));
    assert_eq!(select.giving, Some(Giving::Name("result".into())));
}

#[test]
fn other_statements() {
    assert!(matches!(
        parse_statement("UPDATE t SET a = 1, b = a + 1 WHERE c LIMIT 3").unwrap(),
        Statement::Update(u) if u.assignments.len() == 2 && u.limit.is_some()
    ));
    assert!(matches!(
        parse_statement("INSERT INTO t (a, b) VALUES (1, 2), [3, 4]").unwrap(),
        Statement::Insert(i) if i.columns == ["a", "b"] && i.rows.len() == 2
    ));
    assert!(matches!(
        parse_statement("DELETE FROM t WHERE a == 1").unwrap(),
        Statement::Delete(d) if d.where_clause.is_some()
    ));
    assert!(matches!(
        parse_statement("CALC 1 + 2;").unwrap(),
        Statement::Calc(c) if c.from.is_none()
    ));
    assert!(matches!(
        parse_statement("SHOW FUNCTIONS math").unwrap(),
        Statement::ShowFunctions(Some(c)) if c == "math"
    ));

    let Statement::CreateTable(create) =
        parse_statement("CREATE TABLE 'dir/new' (a I4, b R8 [NDIM=2, UNIT='m']) LIMIT 10").unwrap()
    else {
        panic!("expected CREATE TABLE");
    };
    assert_eq!(create.name, TableSource::Path("dir/new".into()));
    assert_eq!(create.columns[1].type_code, "R8");
    assert_eq!(create.columns[1].properties.len(), 2);
    assert_eq!(create.limit, Some(*int(10)));

    let Statement::AlterTable(alter) =
        parse_statement("ALTER TABLE t RENAME COLUMN a TO b DROP COLUMNS c, d SET KEYWORD ::k = 1")
            .unwrap()
    else {
        panic!("expected ALTER TABLE");
    };
    assert_eq!(
        alter.actions,
        vec![
            AlterAction::RenameColumn(vec![("a".into(), "b".into())]),
            AlterAction::DropColumn(vec!["c".into(), "d".into()]),
            AlterAction::SetKeyword(vec![("::k".into(), *int(1))]),
        ]
    );
}

#[test]
fn parse_errors_report_the_offending_token() {
    let err = parse_statement("SELECT FROM t WHERE x > )").unwrap_err();
    let TaqlError::Parse { near, prefix, .. } = err else {
        panic!("expected a parse error, got {err}");
    };
    assert_eq!(near, ")");
    assert_eq!(prefix, "SELECT FROM t WHERE x > ");

    let err = parse_expression("1 +").unwrap_err();
    assert!(matches!(err, TaqlError::Parse { ref near, .. } if near == "end of input"), "{err}");

    let err = parse_statement("SELECT FROM t WHERE a WHERE b").unwrap_err();
    assert!(err.to_string().contains("more than once"), "{err}");

    assert!(matches!(parse_statement("FROB t").unwrap_err(), TaqlError::Parse { .. }));
}

#[test]
fn unsupported_forms() {
    let err = parse_statement("SELECT FROM a, b").unwrap_err();
    assert!(matches!(err, TaqlError::Unsupported(_)), "{err}");
    let err = parse_statement("UPDATE t SET data[1] = 0").unwrap_err();
    assert!(matches!(err, TaqlError::Unsupported(_)), "{err}");
}
