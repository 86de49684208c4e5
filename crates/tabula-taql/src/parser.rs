//! Recursive-descent parser for TaQL statements and expressions.
//!
//! Expressions are parsed with precedence climbing. From loosest to tightest binding:
//! `OR`/`||`/`XOR`, `AND`/`&&`, comparisons (including `IN`, `BETWEEN`, `AROUND`, `LIKE` and
//! the match operators `~`/`!~`), `|`, `^`, `&`, `+`/`-`, `*`/`/`/`//`/`%`, unary operators,
//! `**` (right associative) and finally indexing and unit suffixes. `NOT` binds looser than
//! the comparisons, `!` binds like the other unary operators.
//!
//! The parser keeps all of its state in the [`Parser`] value; parses are independent and may
//! run concurrently.

use crate::ast::{
    AlterAction, AlterTable, Assignment, BinaryOp, Calc, ColumnSpec, CreateTable, Delete, Expr,
    Giving, IndexItem, Insert, Limit, Literal, OrderKey, Select, SelectColumn, SetItem, Statement,
    TableRef, TableSource, UnaryOp, Update,
};
use crate::error::{TaqlError, TaqlResult};
use crate::lexer::{Lexer, Spanned, Token};

/// Words that end a clause and therefore cannot be table aliases.
const CLAUSE_KEYWORDS: &[&str] = &[
    "FROM", "WHERE", "GROUPBY", "GROUP", "HAVING", "ORDERBY", "ORDER", "LIMIT", "OFFSET", "GIVING",
    "INTO", "SET", "VALUES", "JOIN", "INNER", "LEFT", "RIGHT", "CROSS", "AS", "ADD", "RENAME",
    "DROP", "DELETE",
];

const UNARY_PREC: u8 = 9;
const COMPARISON_PREC: u8 = 3;
/// Operands of `IN`, `BETWEEN` and friends bind tighter than comparisons.
const OPERAND_PREC: u8 = 4;

enum Infix {
    Binary(BinaryOp),
    /// `IN`, `BETWEEN`, `AROUND`, `LIKE`, `ILIKE`, optionally preceded by `NOT`.
    Keyword,
}

pub(crate) struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: Spanned,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(input: &'a str) -> TaqlResult<Self> {
        let mut lexer = Lexer::new(input);
        let lookahead = lexer.next_token()?;
        Ok(Self { lexer, lookahead })
    }

    fn bump(&mut self) -> TaqlResult<Spanned> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.lookahead, next))
    }

    fn error(&self, message: impl Into<String>) -> TaqlError {
        let input = self.lexer.input();
        let near = if self.lookahead.token == Token::Eof {
            "end of input".to_string()
        } else {
            input[self.lookahead.start..self.lookahead.end].to_string()
        };
        TaqlError::Parse {
            message: message.into(),
            near,
            prefix: input[..self.lookahead.start].to_string(),
        }
    }

    fn at(&self, token: &Token) -> bool {
        &self.lookahead.token == token
    }

    fn eat(&mut self, token: &Token) -> TaqlResult<bool> {
        if self.at(token) {
            self.bump()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> TaqlResult<()> {
        if self.at(&token) {
            self.bump()?;
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn is_kw(&self, keyword: &str) -> bool {
        matches!(&self.lookahead.token, Token::Ident(word) if word.eq_ignore_ascii_case(keyword))
    }

    fn eat_kw(&mut self, keyword: &str) -> TaqlResult<bool> {
        if self.is_kw(keyword) {
            self.bump()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect_kw(&mut self, keyword: &str) -> TaqlResult<()> {
        if self.eat_kw(keyword)? {
            Ok(())
        } else {
            Err(self.error(format!("expected {keyword}")))
        }
    }

    fn ident(&mut self, what: &str) -> TaqlResult<String> {
        match &self.lookahead.token {
            Token::Ident(name) => {
                let name = name.clone();
                self.bump()?;
                Ok(name)
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    fn at_clause_keyword(&self) -> bool {
        CLAUSE_KEYWORDS.iter().any(|kw| self.is_kw(kw))
    }

    fn at_end(&self) -> bool {
        matches!(
            self.lookahead.token,
            Token::Eof | Token::Semicolon | Token::RParen | Token::RBracket
        )
    }

    fn finish(&mut self) -> TaqlResult<()> {
        self.eat(&Token::Semicolon)?;
        if !self.at(&Token::Eof) {
            return Err(self.error("unexpected text after the end of the command"));
        }
        Ok(())
    }

    pub(crate) fn statement(&mut self) -> TaqlResult<Statement> {
        let statement = if self.is_kw("SELECT") {
            Statement::Select(self.select()?)
        } else if self.eat_kw("UPDATE")? {
            Statement::Update(self.update()?)
        } else if self.eat_kw("INSERT")? {
            Statement::Insert(self.insert()?)
        } else if self.eat_kw("DELETE")? {
            Statement::Delete(self.delete()?)
        } else if self.eat_kw("CALC")? {
            let expr = self.parse_expr(0)?;
            let from = if self.eat_kw("FROM")? {
                Some(self.table_ref()?)
            } else {
                None
            };
            Statement::Calc(Calc { expr, from })
        } else if self.eat_kw("CREATE")? {
            self.expect_kw("TABLE")?;
            Statement::CreateTable(self.create_table()?)
        } else if self.eat_kw("ALTER")? {
            self.expect_kw("TABLE")?;
            Statement::AlterTable(self.alter_table()?)
        } else if self.eat_kw("SHOW")? {
            if !(self.eat_kw("FUNCTIONS")? || self.eat_kw("FUNCTION")? || self.eat_kw("FUNC")?) {
                return Err(self.error("expected FUNCTIONS"));
            }
            let category = match &self.lookahead.token {
                Token::Ident(name) => {
                    let name = name.clone();
                    self.bump()?;
                    Some(name)
                }
                _ => None,
            };
            Statement::ShowFunctions(category)
        } else {
            return Err(self.error("expected a TaQL command"));
        };
        self.finish()?;
        Ok(statement)
    }

    pub(crate) fn standalone_expr(&mut self) -> TaqlResult<Expr> {
        let expr = self.parse_expr(0)?;
        self.finish()?;
        Ok(expr)
    }

    fn select(&mut self) -> TaqlResult<Select> {
        self.expect_kw("SELECT")?;
        let mut select = Select {
            distinct: self.eat_kw("DISTINCT")?,
            ..Select::default()
        };
        if !self.at_end() && !self.at_clause_keyword() {
            loop {
                if self.eat(&Token::Star)? {
                    select.columns.push(SelectColumn::All);
                } else {
                    let expr = self.parse_expr(0)?;
                    let alias = if self.eat_kw("AS")? {
                        Some(self.ident("a column name after AS")?)
                    } else {
                        None
                    };
                    select.columns.push(SelectColumn::Expr { expr, alias });
                }
                if !self.eat(&Token::Comma)? {
                    break;
                }
            }
        }
        loop {
            let duplicate = |parser: &Self, clause: &str| {
                parser.error(format!("{clause} is given more than once"))
            };
            if self.eat_kw("FROM")? {
                if select.from.is_some() {
                    return Err(duplicate(self, "FROM"));
                }
                select.from = Some(self.table_ref()?);
                if self.at(&Token::Comma) || self.at_join() {
                    return Err(TaqlError::Unsupported(
                        "queries over more than one table".to_string(),
                    ));
                }
            } else if self.eat_kw("WHERE")? {
                if select.where_clause.is_some() {
                    return Err(duplicate(self, "WHERE"));
                }
                select.where_clause = Some(self.parse_expr(0)?);
            } else if self.eat_two_word("GROUPBY", "GROUP")? {
                if !select.group_by.is_empty() {
                    return Err(duplicate(self, "GROUPBY"));
                }
                select.group_by = self.expr_list()?;
            } else if self.eat_kw("HAVING")? {
                if select.having.is_some() {
                    return Err(duplicate(self, "HAVING"));
                }
                select.having = Some(self.parse_expr(0)?);
            } else if self.eat_two_word("ORDERBY", "ORDER")? {
                if !select.order_by.is_empty() {
                    return Err(duplicate(self, "ORDERBY"));
                }
                select.order_by = self.order_keys()?;
            } else if self.eat_kw("LIMIT")? {
                if select.limit.is_some() {
                    return Err(duplicate(self, "LIMIT"));
                }
                select.limit = Some(self.limit()?);
            } else if self.eat_kw("OFFSET")? {
                if select.offset.is_some() {
                    return Err(duplicate(self, "OFFSET"));
                }
                select.offset = Some(self.parse_expr(0)?);
            } else if self.eat_kw("GIVING")? || self.eat_kw("INTO")? {
                if select.giving.is_some() {
                    return Err(duplicate(self, "GIVING"));
                }
                select.giving = Some(match self.bump()?.token {
                    Token::Ident(name) => Giving::Name(name),
                    Token::Str(path) => Giving::Path(path),
                    _ => return Err(self.error("expected a table name after GIVING")),
                });
            } else {
                break;
            }
        }
        Ok(select)
    }

    fn at_join(&self) -> bool {
        ["JOIN", "INNER", "LEFT", "RIGHT", "CROSS"]
            .iter()
            .any(|kw| self.is_kw(kw))
    }

    /// `GROUPBY` or `GROUP BY`.
    fn eat_two_word(&mut self, joined: &str, first: &str) -> TaqlResult<bool> {
        if self.eat_kw(joined)? {
            return Ok(true);
        }
        if self.eat_kw(first)? {
            self.expect_kw("BY")?;
            return Ok(true);
        }
        Ok(false)
    }

    fn expr_list(&mut self) -> TaqlResult<Vec<Expr>> {
        let mut exprs = vec![self.parse_expr(0)?];
        while self.eat(&Token::Comma)? {
            exprs.push(self.parse_expr(0)?);
        }
        Ok(exprs)
    }

    fn order_keys(&mut self) -> TaqlResult<Vec<OrderKey>> {
        let mut keys = Vec::new();
        loop {
            let expr = self.parse_expr(0)?;
            let descending = if self.eat_kw("DESC")? {
                true
            } else {
                self.eat_kw("ASC")?;
                false
            };
            keys.push(OrderKey { expr, descending });
            if !self.eat(&Token::Comma)? {
                return Ok(keys);
            }
        }
    }

    fn optional_expr(&mut self) -> TaqlResult<Option<Expr>> {
        if self.at(&Token::Colon) || self.at(&Token::Comma) || self.at_end() || self.at_clause_keyword() {
            Ok(None)
        } else {
            self.parse_expr(0).map(Some)
        }
    }

    fn limit(&mut self) -> TaqlResult<Limit> {
        let start = self.optional_expr()?;
        if !self.eat(&Token::Colon)? {
            return match start {
                Some(count) => Ok(Limit::Count(count)),
                None => Err(self.error("expected a row count after LIMIT")),
            };
        }
        let end = self.optional_expr()?;
        let step = if self.eat(&Token::Colon)? {
            self.optional_expr()?
        } else {
            None
        };
        Ok(Limit::Slice { start, end, step })
    }

    fn table_ref(&mut self) -> TaqlResult<TableRef> {
        let source = match self.lookahead.token.clone() {
            Token::Ident(name) => {
                self.bump()?;
                TableSource::Name(name)
            }
            Token::Str(path) => {
                self.bump()?;
                TableSource::Path(path)
            }
            Token::LParen | Token::LBracket => {
                let close = if self.at(&Token::LParen) {
                    Token::RParen
                } else {
                    Token::RBracket
                };
                self.bump()?;
                let select = self.select()?;
                self.expect(close, "the end of the subquery")?;
                TableSource::Subquery(Box::new(select))
            }
            _ => return Err(self.error("expected a table")),
        };
        let alias = if self.eat_kw("AS")? {
            Some(self.ident("a table alias")?)
        } else {
            match &self.lookahead.token {
                Token::Ident(name) if !self.at_clause_keyword() => {
                    let name = name.clone();
                    self.bump()?;
                    Some(name)
                }
                _ => None,
            }
        };
        Ok(TableRef { source, alias })
    }

    fn where_and_limit(&mut self) -> TaqlResult<(Option<Expr>, Option<Limit>)> {
        let where_clause = if self.eat_kw("WHERE")? {
            Some(self.parse_expr(0)?)
        } else {
            None
        };
        let limit = if self.eat_kw("LIMIT")? {
            Some(self.limit()?)
        } else {
            None
        };
        Ok((where_clause, limit))
    }

    fn assignments(&mut self) -> TaqlResult<Vec<Assignment>> {
        let mut assignments = Vec::new();
        loop {
            let column = self.ident("a column name")?;
            if self.at(&Token::LBracket) {
                return Err(TaqlError::Unsupported(format!(
                    "assigning to array elements of column {column}"
                )));
            }
            self.expect(Token::Eq, "=")?;
            let value = self.parse_expr(0)?;
            assignments.push(Assignment { column, value });
            if !self.eat(&Token::Comma)? {
                return Ok(assignments);
            }
        }
    }

    fn update(&mut self) -> TaqlResult<Update> {
        let table = self.table_ref()?;
        self.expect_kw("SET")?;
        let assignments = self.assignments()?;
        let (where_clause, limit) = self.where_and_limit()?;
        Ok(Update {
            table,
            assignments,
            where_clause,
            limit,
        })
    }

    fn insert(&mut self) -> TaqlResult<Insert> {
        self.expect_kw("INTO")?;
        let table = self.table_ref()?;
        if self.eat_kw("SET")? {
            let (columns, row) = self
                .assignments()?
                .into_iter()
                .map(|a| (a.column, a.value))
                .unzip();
            return Ok(Insert {
                table,
                columns,
                rows: vec![row],
            });
        }
        let mut columns = Vec::new();
        if let Some(close) = self.open_group()? {
            loop {
                columns.push(self.ident("a column name")?);
                if !self.eat(&Token::Comma)? {
                    break;
                }
            }
            self.expect(close, "the end of the column list")?;
        }
        self.expect_kw("VALUES")?;
        let mut rows = Vec::new();
        loop {
            let Some(close) = self.open_group()? else {
                return Err(self.error("expected ( or [ around a row of values"));
            };
            let row = self.expr_list()?;
            self.expect(close, "the end of the row")?;
            rows.push(row);
            if !self.eat(&Token::Comma)? {
                break;
            }
        }
        Ok(Insert {
            table,
            columns,
            rows,
        })
    }

    /// Consumes `(` or `[` and returns the matching closing token.
    fn open_group(&mut self) -> TaqlResult<Option<Token>> {
        if self.eat(&Token::LParen)? {
            Ok(Some(Token::RParen))
        } else if self.eat(&Token::LBracket)? {
            Ok(Some(Token::RBracket))
        } else {
            Ok(None)
        }
    }

    fn delete(&mut self) -> TaqlResult<Delete> {
        self.expect_kw("FROM")?;
        let table = self.table_ref()?;
        let (where_clause, limit) = self.where_and_limit()?;
        Ok(Delete {
            table,
            where_clause,
            limit,
        })
    }

    fn column_spec(&mut self) -> TaqlResult<ColumnSpec> {
        let name = self.ident("a column name")?;
        let type_code = self.ident("a data type")?;
        let mut properties = Vec::new();
        if self.eat(&Token::LBracket)? {
            loop {
                let key = self.ident("a column property")?.to_ascii_uppercase();
                self.expect(Token::Eq, "=")?;
                properties.push((key, self.parse_expr(0)?));
                if !self.eat(&Token::Comma)? {
                    break;
                }
            }
            self.expect(Token::RBracket, "]")?;
        }
        Ok(ColumnSpec {
            name,
            type_code,
            properties,
        })
    }

    fn column_specs(&mut self) -> TaqlResult<Vec<ColumnSpec>> {
        let mut specs = vec![self.column_spec()?];
        while self.eat(&Token::Comma)? {
            specs.push(self.column_spec()?);
        }
        Ok(specs)
    }

    fn create_table(&mut self) -> TaqlResult<CreateTable> {
        let name = match self.bump()?.token {
            Token::Ident(name) => TableSource::Name(name),
            Token::Str(path) => TableSource::Path(path),
            _ => return Err(self.error("expected a table name")),
        };
        let columns = if self.eat(&Token::LParen)? {
            let specs = if self.at(&Token::RParen) {
                Vec::new()
            } else {
                self.column_specs()?
            };
            self.expect(Token::RParen, ")")?;
            specs
        } else if matches!(self.lookahead.token, Token::Ident(_)) && !self.is_kw("LIMIT") {
            self.column_specs()?
        } else {
            Vec::new()
        };
        let limit = if self.eat_kw("LIMIT")? {
            Some(self.parse_expr(0)?)
        } else {
            None
        };
        Ok(CreateTable {
            name,
            columns,
            limit,
        })
    }

    fn alter_table(&mut self) -> TaqlResult<AlterTable> {
        let table = self.table_ref()?;
        let mut actions = Vec::new();
        while !self.at(&Token::Eof) && !self.at(&Token::Semicolon) {
            let action = if self.eat_kw("ADD")? {
                if self.eat_kw("ROW")? || self.eat_kw("ROWS")? {
                    AlterAction::AddRow(self.parse_expr(0)?)
                } else if self.eat_kw("COLUMN")? || self.eat_kw("COLUMNS")? {
                    AlterAction::AddColumn(self.column_specs()?)
                } else {
                    return Err(self.error("expected COLUMN or ROW after ADD"));
                }
            } else if self.eat_kw("RENAME")? {
                self.expect_any(&["COLUMN", "COLUMNS"])?;
                let mut pairs = Vec::new();
                loop {
                    let old = self.ident("a column name")?;
                    self.expect_kw("TO")?;
                    pairs.push((old, self.ident("a new column name")?));
                    if !self.eat(&Token::Comma)? {
                        break;
                    }
                }
                AlterAction::RenameColumn(pairs)
            } else if self.eat_kw("DROP")? || self.eat_kw("DELETE")? {
                self.expect_any(&["COLUMN", "COLUMNS"])?;
                let mut names = vec![self.ident("a column name")?];
                while self.eat(&Token::Comma)? {
                    names.push(self.ident("a column name")?);
                }
                AlterAction::DropColumn(names)
            } else if self.eat_kw("SET")? {
                self.expect_any(&["KEYWORD", "KEYWORDS"])?;
                let mut keywords = Vec::new();
                loop {
                    let key = self.ident("a keyword name")?;
                    self.expect(Token::Eq, "=")?;
                    keywords.push((key, self.parse_expr(0)?));
                    if !self.eat(&Token::Comma)? {
                        break;
                    }
                }
                AlterAction::SetKeyword(keywords)
            } else {
                return Err(self.error("expected ADD, RENAME, DROP or SET"));
            };
            actions.push(action);
        }
        if actions.is_empty() {
            return Err(self.error("expected an ALTER TABLE action"));
        }
        Ok(AlterTable { table, actions })
    }

    fn expect_any(&mut self, keywords: &[&str]) -> TaqlResult<()> {
        for kw in keywords {
            if self.eat_kw(kw)? {
                return Ok(());
            }
        }
        Err(self.error(format!("expected {}", keywords[0])))
    }

    pub(crate) fn parse_expr(&mut self, min_prec: u8) -> TaqlResult<Expr> {
        let mut left = self.parse_prefix()?;
        while let Some((infix, prec)) = self.infix_binding_power() {
            if prec < min_prec {
                break;
            }
            left = match infix {
                Infix::Binary(op) => {
                    self.bump()?;
                    // `**` is right associative.
                    let next = if op == BinaryOp::Pow { prec } else { prec + 1 };
                    let right = self.parse_expr(next)?;
                    Expr::Binary(op, Box::new(left), Box::new(right))
                }
                Infix::Keyword => self.parse_keyword_infix(left)?,
            };
        }
        Ok(left)
    }

    fn infix_binding_power(&self) -> Option<(Infix, u8)> {
        let binary = |op| Some((Infix::Binary(op), binary_prec(op)));
        match &self.lookahead.token {
            Token::OrOr => binary(BinaryOp::Or),
            Token::AndAnd => binary(BinaryOp::And),
            Token::Eq => binary(BinaryOp::Eq),
            Token::Ne => binary(BinaryOp::Ne),
            Token::Lt => binary(BinaryOp::Lt),
            Token::Le => binary(BinaryOp::Le),
            Token::Gt => binary(BinaryOp::Gt),
            Token::Ge => binary(BinaryOp::Ge),
            Token::Near => binary(BinaryOp::Near),
            Token::NotNear => binary(BinaryOp::NotNear),
            Token::Tilde => binary(BinaryOp::Match),
            Token::NotTilde => binary(BinaryOp::NotMatch),
            Token::Pipe => binary(BinaryOp::BitOr),
            Token::Caret => binary(BinaryOp::BitXor),
            Token::Amp => binary(BinaryOp::BitAnd),
            Token::Plus => binary(BinaryOp::Add),
            Token::Minus => binary(BinaryOp::Sub),
            Token::Star => binary(BinaryOp::Mul),
            Token::Slash => binary(BinaryOp::Div),
            Token::SlashSlash => binary(BinaryOp::IntDiv),
            Token::Percent => binary(BinaryOp::Mod),
            Token::StarStar => binary(BinaryOp::Pow),
            Token::Ident(word) => {
                let word = word.to_ascii_uppercase();
                match word.as_str() {
                    "OR" => binary(BinaryOp::Or),
                    "XOR" => binary(BinaryOp::Xor),
                    "AND" => binary(BinaryOp::And),
                    "IN" | "NOT" | "BETWEEN" | "AROUND" | "LIKE" | "ILIKE" => {
                        Some((Infix::Keyword, COMPARISON_PREC))
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn parse_keyword_infix(&mut self, left: Expr) -> TaqlResult<Expr> {
        let negate = self.eat_kw("NOT")?;
        let expr = Box::new(left);
        if self.eat_kw("IN")? {
            let set = self.in_set()?;
            Ok(Expr::In { expr, set, negate })
        } else if self.eat_kw("BETWEEN")? {
            let lower = Box::new(self.parse_expr(OPERAND_PREC)?);
            self.expect_kw("AND")?;
            let upper = Box::new(self.parse_expr(OPERAND_PREC)?);
            Ok(Expr::Between {
                expr,
                lower,
                upper,
                negate,
            })
        } else if self.eat_kw("AROUND")? {
            let mid = Box::new(self.parse_expr(OPERAND_PREC)?);
            self.expect_kw("IN")?;
            let width = Box::new(self.parse_expr(OPERAND_PREC)?);
            Ok(Expr::Around {
                expr,
                mid,
                width,
                negate,
            })
        } else if self.is_kw("LIKE") || self.is_kw("ILIKE") {
            let case_insensitive = self.is_kw("ILIKE");
            self.bump()?;
            let pattern = Box::new(self.parse_expr(OPERAND_PREC)?);
            Ok(Expr::Like {
                expr,
                pattern,
                case_insensitive,
                negate,
            })
        } else {
            Err(self.error("expected IN, BETWEEN, AROUND or LIKE"))
        }
    }

    fn in_set(&mut self) -> TaqlResult<Vec<SetItem>> {
        match self.lookahead.token {
            Token::LBracket => {
                self.bump()?;
                if self.is_kw("SELECT") {
                    let select = self.select()?;
                    self.expect(Token::RBracket, "]")?;
                    return Ok(vec![SetItem::Value(Expr::Subquery(Box::new(select)))]);
                }
                self.set_items(Token::RBracket)
            }
            Token::LBrace | Token::Lt => Ok(vec![self.interval()?]),
            _ => Ok(vec![SetItem::Value(self.parse_expr(OPERAND_PREC)?)]),
        }
    }

    fn set_items(&mut self, close: Token) -> TaqlResult<Vec<SetItem>> {
        let mut items = Vec::new();
        if self.eat(&close)? {
            return Ok(items);
        }
        loop {
            items.push(self.set_item(&close)?);
            if !self.eat(&Token::Comma)? {
                break;
            }
        }
        self.expect(close, "the end of the set")?;
        Ok(items)
    }

    fn set_item(&mut self, close: &Token) -> TaqlResult<SetItem> {
        if matches!(self.lookahead.token, Token::LBrace | Token::Lt) {
            return self.interval();
        }
        let bound_end = |p: &Self| p.at(&Token::Colon) || p.at(&Token::Comma) || p.at(close);
        let start = if self.at(&Token::Colon) {
            None
        } else {
            Some(self.parse_expr(0)?)
        };
        if !self.eat(&Token::Colon)? {
            return start
                .map(SetItem::Value)
                .ok_or_else(|| self.error("expected a set element"));
        }
        let end = if bound_end(self) {
            None
        } else {
            Some(self.parse_expr(0)?)
        };
        let step = if self.eat(&Token::Colon)? {
            Some(self.parse_expr(0)?)
        } else {
            None
        };
        Ok(SetItem::Range { start, end, step })
    }

    /// `{a,b}`, `<a,b>`, `{a,b>`, `<a,b}`; either bound may be left out.
    fn interval(&mut self) -> TaqlResult<SetItem> {
        let lower_closed = match self.bump()?.token {
            Token::LBrace => true,
            Token::Lt => false,
            _ => return Err(self.error("expected { or <")),
        };
        let lower = if self.at(&Token::Comma) {
            None
        } else {
            Some(self.parse_expr(OPERAND_PREC)?)
        };
        self.expect(Token::Comma, ", in interval")?;
        let upper = if matches!(self.lookahead.token, Token::RBrace | Token::Gt) {
            None
        } else {
            Some(self.parse_expr(OPERAND_PREC)?)
        };
        let upper_closed = match self.lookahead.token {
            Token::RBrace => true,
            Token::Gt => false,
            _ => return Err(self.error("expected } or > to close the interval")),
        };
        self.bump()?;
        Ok(SetItem::Interval {
            lower,
            upper,
            lower_closed,
            upper_closed,
        })
    }

    fn parse_prefix(&mut self) -> TaqlResult<Expr> {
        let unary = |parser: &mut Self, op: UnaryOp, prec: u8| -> TaqlResult<Expr> {
            parser.bump()?;
            let operand = parser.parse_expr(prec)?;
            Ok(Expr::Unary(op, Box::new(operand)))
        };
        match self.lookahead.token {
            Token::Minus => return unary(self, UnaryOp::Neg, UNARY_PREC),
            Token::Bang => return unary(self, UnaryOp::Not, UNARY_PREC),
            Token::Tilde => return unary(self, UnaryOp::BitNot, UNARY_PREC),
            Token::Plus => {
                self.bump()?;
                return self.parse_expr(UNARY_PREC);
            }
            _ if self.is_kw("NOT") => return unary(self, UnaryOp::Not, COMPARISON_PREC),
            _ => {}
        }
        let primary = self.parse_primary()?;
        self.parse_postfix(primary)
    }

    fn parse_primary(&mut self) -> TaqlResult<Expr> {
        let literal = |parser: &mut Self, lit: Literal| -> TaqlResult<Expr> {
            parser.bump()?;
            Ok(Expr::Literal(lit))
        };
        match self.lookahead.token.clone() {
            Token::Int(v) => literal(self, Literal::Int(v)),
            Token::Double(v) => literal(self, Literal::Double(v)),
            Token::Imaginary(v) => literal(self, Literal::Imaginary(v)),
            Token::Str(s) => literal(self, Literal::String(s)),
            Token::DateTime(v) => literal(self, Literal::DateTime(v)),
            Token::Angle(v) => literal(self, Literal::Angle(v)),
            Token::Pattern {
                source,
                kind,
                case_insensitive,
            } => literal(
                self,
                Literal::Pattern {
                    source,
                    kind,
                    case_insensitive,
                },
            ),
            Token::Ident(name) => {
                self.bump()?;
                if self.at(&Token::LParen) {
                    return self.call(name);
                }
                match name.to_ascii_uppercase().as_str() {
                    "TRUE" | "T" => Ok(Expr::Literal(Literal::Bool(true))),
                    "FALSE" | "F" => Ok(Expr::Literal(Literal::Bool(false))),
                    _ => Ok(Expr::Name(name)),
                }
            }
            Token::LParen => {
                self.bump()?;
                if self.is_kw("SELECT") {
                    let select = self.select()?;
                    self.expect(Token::RParen, ")")?;
                    return Ok(Expr::Subquery(Box::new(select)));
                }
                let expr = self.parse_expr(0)?;
                self.expect(Token::RParen, ")")?;
                Ok(self.unit_suffix(expr)?)
            }
            Token::LBracket => {
                self.bump()?;
                if self.is_kw("SELECT") {
                    let select = self.select()?;
                    self.expect(Token::RBracket, "]")?;
                    return Ok(Expr::Subquery(Box::new(select)));
                }
                Ok(Expr::Array(self.set_items(Token::RBracket)?))
            }
            _ => Err(self.error("expected an expression")),
        }
    }

    fn call(&mut self, name: String) -> TaqlResult<Expr> {
        self.expect(Token::LParen, "(")?;
        let mut args = Vec::new();
        // `gcount(*)` counts rows.
        if self.at(&Token::Star) {
            self.bump()?;
        } else if !self.at(&Token::RParen) {
            args = self.expr_list()?;
        }
        self.expect(Token::RParen, ")")?;
        Ok(Expr::Call { name, args })
    }

    /// A unit glued to a number or a closing parenthesis: `10km`, `(a+b)deg`, `5'km/s'`.
    fn unit_suffix(&mut self, expr: Expr) -> TaqlResult<Expr> {
        if !self.lookahead.glued {
            return Ok(expr);
        }
        match self.lookahead.token.clone() {
            Token::Ident(unit) | Token::Str(unit) if !self.at_clause_keyword() => {
                self.bump()?;
                Ok(Expr::WithUnit(Box::new(expr), unit))
            }
            _ => Ok(expr),
        }
    }

    fn parse_postfix(&mut self, mut expr: Expr) -> TaqlResult<Expr> {
        if matches!(
            expr,
            Expr::Literal(Literal::Int(_) | Literal::Double(_) | Literal::Imaginary(_))
        ) {
            expr = self.unit_suffix(expr)?;
        }
        while self.at(&Token::LBracket) {
            self.bump()?;
            let mut indices = Vec::new();
            loop {
                indices.push(self.index_item()?);
                if !self.eat(&Token::Comma)? {
                    break;
                }
            }
            self.expect(Token::RBracket, "]")?;
            expr = Expr::Index {
                array: Box::new(expr),
                indices,
            };
        }
        Ok(expr)
    }

    fn index_item(&mut self) -> TaqlResult<IndexItem> {
        let slice_end = |p: &Self| p.at(&Token::Colon) || p.at(&Token::Comma) || p.at(&Token::RBracket);
        let start = if slice_end(self) {
            None
        } else {
            Some(self.parse_expr(0)?)
        };
        if !self.eat(&Token::Colon)? {
            return start
                .map(IndexItem::Single)
                .ok_or_else(|| self.error("expected an index"));
        }
        let end = if slice_end(self) {
            None
        } else {
            Some(self.parse_expr(0)?)
        };
        let step = if self.eat(&Token::Colon)? && !slice_end(self) {
            Some(self.parse_expr(0)?)
        } else {
            None
        };
        Ok(IndexItem::Slice { start, end, step })
    }
}

fn binary_prec(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Or | BinaryOp::Xor => 1,
        BinaryOp::And => 2,
        BinaryOp::Eq
        | BinaryOp::Ne
        | BinaryOp::Lt
        | BinaryOp::Le
        | BinaryOp::Gt
        | BinaryOp::Ge
        | BinaryOp::Near
        | BinaryOp::NotNear
        | BinaryOp::Match
        | BinaryOp::NotMatch => COMPARISON_PREC,
        BinaryOp::BitOr => 4,
        BinaryOp::BitXor => 5,
        BinaryOp::BitAnd => 6,
        BinaryOp::Add | BinaryOp::Sub => 7,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::IntDiv | BinaryOp::Mod => 8,
        BinaryOp::Pow => 10,
    }
}

/// Parses one TaQL command.
pub fn parse_statement(text: &str) -> TaqlResult<Statement> {
    Parser::new(text)?.statement()
}

/// Parses a standalone expression, as used for record selection.
pub fn parse_expression(text: &str) -> TaqlResult<Expr> {
    Parser::new(text)?.standalone_expr()
}
