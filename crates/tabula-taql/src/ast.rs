//! Syntax tree of parsed TaQL text, before names are bound to a table or record.

use crate::pattern::PatternKind;

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Double(f64),
    /// Imaginary number `3i`; `1+3i` is the sum of a real and an imaginary literal.
    Imaginary(f64),
    String(String),
    /// Modified Julian day.
    DateTime(f64),
    /// Sexagesimal angle, in rad.
    Angle(f64),
    Pattern {
        source: String,
        kind: PatternKind,
        case_insensitive: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    /// `!` and `NOT`.
    Not,
    /// `~` in prefix position.
    BitNot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Near,
    NotNear,
    And,
    Or,
    /// `XOR`: logical on booleans, bitwise on integers.
    Xor,
    BitAnd,
    BitOr,
    BitXor,
    Match,
    NotMatch,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// Column, record field (`a.b`), qualified column (`t.col`) or keyword (`col::key`,
    /// `::key`).
    Name(String),
    /// `10km`, `(a+b)deg`.
    WithUnit(Box<Expr>, String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    In {
        expr: Box<Expr>,
        set: Vec<SetItem>,
        negate: bool,
    },
    Between {
        expr: Box<Expr>,
        lower: Box<Expr>,
        upper: Box<Expr>,
        negate: bool,
    },
    /// `x AROUND mid IN width`: the closed interval `[mid - width/2, mid + width/2]`.
    Around {
        expr: Box<Expr>,
        mid: Box<Expr>,
        width: Box<Expr>,
        negate: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        case_insensitive: bool,
        negate: bool,
    },
    Index {
        array: Box<Expr>,
        indices: Vec<IndexItem>,
    },
    /// `[1, 2, 3]` or `[1:4]`.
    Array(Vec<SetItem>),
    Subquery(Box<Select>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum SetItem {
    Value(Expr),
    Range {
        start: Option<Expr>,
        end: Option<Expr>,
        step: Option<Expr>,
    },
    Interval {
        lower: Option<Expr>,
        upper: Option<Expr>,
        lower_closed: bool,
        upper_closed: bool,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum IndexItem {
    Single(Expr),
    Slice {
        start: Option<Expr>,
        end: Option<Expr>,
        step: Option<Expr>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum TableSource {
    /// A table registered in the session, or a table directory.
    Name(String),
    /// A quoted table directory.
    Path(String),
    Subquery(Box<Select>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableRef {
    pub source: TableSource,
    pub alias: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SelectColumn {
    /// `*`
    All,
    Expr { expr: Expr, alias: Option<String> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderKey {
    pub expr: Expr,
    pub descending: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Limit {
    Count(Expr),
    /// `LIMIT start:end:step`; negative values count from the end.
    Slice {
        start: Option<Expr>,
        end: Option<Expr>,
        step: Option<Expr>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Giving {
    Name(String),
    Path(String),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Select {
    pub distinct: bool,
    pub columns: Vec<SelectColumn>,
    pub from: Option<TableRef>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<Limit>,
    pub offset: Option<Expr>,
    pub giving: Option<Giving>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    pub table: TableRef,
    pub assignments: Vec<Assignment>,
    pub where_clause: Option<Expr>,
    pub limit: Option<Limit>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Insert {
    pub table: TableRef,
    /// Empty means all columns in table order.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Expr>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Delete {
    pub table: TableRef,
    pub where_clause: Option<Expr>,
    pub limit: Option<Limit>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Calc {
    pub expr: Expr,
    pub from: Option<TableRef>,
}

/// `name TYPE [NDIM=n, SHAPE=[..], UNIT='..', COMMENT='..']`
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub type_code: String,
    pub properties: Vec<(String, Expr)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CreateTable {
    pub name: TableSource,
    pub columns: Vec<ColumnSpec>,
    /// Initial number of rows.
    pub limit: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AlterAction {
    AddColumn(Vec<ColumnSpec>),
    RenameColumn(Vec<(String, String)>),
    DropColumn(Vec<String>),
    /// `SET KEYWORD key = value`; `col::key` addresses a column keyword and `a.b` a nested
    /// field.
    SetKeyword(Vec<(String, Expr)>),
    AddRow(Expr),
}

#[derive(Clone, Debug, PartialEq)]
pub struct AlterTable {
    pub table: TableRef,
    pub actions: Vec<AlterAction>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Select(Select),
    Update(Update),
    Insert(Insert),
    Delete(Delete),
    Calc(Calc),
    CreateTable(CreateTable),
    AlterTable(AlterTable),
    ShowFunctions(Option<String>),
}
