//! Statement execution.
//!
//! A [`TaqlSession`] owns a catalog of named tables and reference tables. Statements refer to
//! catalog entries by name, or to table directories on disk by path. Everything a statement
//! needs lives in the session and the statement itself; nothing is shared between sessions.

use crate::ast::{
    AlterAction, AlterTable, Calc, ColumnSpec, CreateTable, Delete, Expr, Giving, Insert, Limit,
    Select, SelectColumn, Statement, TableRef, TableSource, Update,
};
use crate::bind::Binder;
use crate::error::{TaqlError, TaqlResult};
use crate::functions::{self, FuncCategory};
use crate::node::{column_unit, epoch_scale, ColumnData, EvalContext, TableExprNode};
use crate::parser::parse_statement;
use crate::udf::FunctionRegistry;
use crate::units::Unit;
use crate::value::{ArrayDatum, Datum, Value, ValueKind, ValueType};
use log::debug;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use tabula_tables::{
    ArrayValue, Cell, ColumnDesc, DataType, Record, RecordField, RefTable, Scalar, Shape, SharedTable,
    StorageKind, StorageOptions, Table, TableColumnMut, TableDesc, TableOptions, TableView,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct TaqlOptions {
    /// Storage of tables made by CREATE TABLE. Computed SELECT results are always kept in
    /// memory.
    pub storage: StorageOptions,
}

/// What a statement produced.
#[derive(Debug)]
pub enum QueryResult {
    /// Selected rows and columns of an existing table, by reference.
    View(RefTable),
    /// A new table: computed SELECT columns, CREATE TABLE, ALTER TABLE.
    Table(SharedTable),
    /// CALC results, one per row of the table (or a single value).
    Values(Vec<Datum>),
    /// Rows touched by UPDATE, INSERT or DELETE.
    Count(u64),
    Text(String),
}

impl QueryResult {
    pub fn nrow(&self) -> Option<u64> {
        match self {
            QueryResult::View(view) => Some(view.nrow()),
            QueryResult::Table(table) => Some(table.nrow()),
            _ => None,
        }
    }

    /// Root row numbers of a view result.
    pub fn row_numbers(&self) -> Option<Vec<u64>> {
        match self {
            QueryResult::View(view) => Some(view.row_numbers()),
            _ => None,
        }
    }

    pub fn count(&self) -> Option<u64> {
        match self {
            QueryResult::Count(n) => Some(*n),
            _ => None,
        }
    }

    pub fn values(&self) -> Option<&[Datum]> {
        match self {
            QueryResult::Values(values) => Some(values),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            QueryResult::Text(text) => Some(text),
            _ => None,
        }
    }

    /// All values of one column of a table or view result; epoch columns yield dates.
    pub fn column_values(&self, name: &str) -> TaqlResult<Vec<Datum>> {
        match self {
            QueryResult::View(view) => column_datums(view, name),
            QueryResult::Table(table) => column_datums(&*table.read(), name),
            _ => Err(TaqlError::eval("the result is not a table")),
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        match self {
            QueryResult::View(view) => view.column_names(),
            QueryResult::Table(table) => table.read().column_names(),
            _ => Vec::new(),
        }
    }
}

fn column_datums(table: &dyn TableView, name: &str) -> TaqlResult<Vec<Datum>> {
    let node = TableExprNode::column(table, name)?;
    let rows = all_rows(table.nrow());
    Ok(node.get_column(&EvalContext::table(table), &rows)?.into_datums())
}

#[derive(Debug)]
enum Source {
    Table(SharedTable),
    View(RefTable),
}

impl Source {
    /// A fresh view on all rows.
    fn view(&self) -> TaqlResult<RefTable> {
        match self {
            Source::Table(table) => Ok(RefTable::full(table)),
            Source::View(view) => Ok(view.select_rows(&all_rows(view.nrow()))?),
        }
    }

    fn duplicate(&self) -> TaqlResult<Source> {
        Ok(match self {
            Source::Table(table) => Source::Table(table.clone()),
            Source::View(_) => Source::View(self.view()?),
        })
    }
}

fn all_rows(nrow: u64) -> Vec<u64> {
    (0..nrow).collect()
}

/// A TaQL session: a catalog of tables plus the user-defined functions statements may call.
#[derive(Debug, Default)]
pub struct TaqlSession {
    tables: HashMap<String, Source>,
    options: TaqlOptions,
    functions: FunctionRegistry,
}

impl TaqlSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: TaqlOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> TaqlOptions {
        self.options
    }

    /// Makes `table` available to statements under `name`, replacing an earlier entry.
    pub fn register_table(&mut self, name: impl Into<String>, table: SharedTable) {
        self.tables.insert(name.into(), Source::Table(table));
    }

    pub fn register_view(&mut self, name: impl Into<String>, view: RefTable) {
        self.tables.insert(name.into(), Source::View(view));
    }

    pub fn table(&self, name: &str) -> Option<SharedTable> {
        match self.tables.get(name)? {
            Source::Table(table) => Some(table.clone()),
            Source::View(_) => None,
        }
    }

    pub fn view(&self, name: &str) -> Option<&RefTable> {
        match self.tables.get(name)? {
            Source::View(view) => Some(view),
            Source::Table(_) => None,
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.tables.remove(name).is_some()
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn functions_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.functions
    }

    /// Parses and runs one statement.
    pub fn execute(&mut self, text: &str) -> TaqlResult<QueryResult> {
        let statement = parse_statement(text)?;
        debug!("executing {}", text.trim());
        match &statement {
            Statement::Select(select) => {
                let result = self.select(select)?;
                if let Some(Giving::Name(name)) = &select.giving {
                    let entry = match &result {
                        QueryResult::View(view) => Source::View(view.select_rows(&all_rows(view.nrow()))?),
                        QueryResult::Table(table) => Source::Table(table.clone()),
                        _ => return Err(TaqlError::eval("GIVING needs a table result")),
                    };
                    debug!("registered SELECT result as {name}");
                    self.tables.insert(name.clone(), entry);
                }
                Ok(result)
            }
            Statement::Update(update) => self.update(update),
            Statement::Insert(insert) => self.insert(insert),
            Statement::Delete(delete) => self.delete(delete),
            Statement::Calc(calc) => self.calc(calc),
            Statement::CreateTable(create) => self.create_table(create),
            Statement::AlterTable(alter) => self.alter_table(alter),
            Statement::ShowFunctions(category) => {
                let category = category
                    .as_deref()
                    .map(|name| {
                        FuncCategory::from_name(name)
                            .ok_or_else(|| TaqlError::eval(format!("unknown function category {name}")))
                    })
                    .transpose()?;
                Ok(QueryResult::Text(functions::describe(category)))
            }
        }
    }

    fn lookup(&self, source: &TableSource) -> TaqlResult<Source> {
        match source {
            TableSource::Name(name) | TableSource::Path(name) => match self.tables.get(name) {
                Some(entry) => entry.duplicate(),
                None => open_path(name),
            },
            TableSource::Subquery(select) => match self.select(select)? {
                QueryResult::View(view) => Ok(Source::View(view)),
                QueryResult::Table(table) => Ok(Source::Table(table)),
                _ => Err(TaqlError::eval("a subquery in FROM must produce a table")),
            },
        }
    }

    fn source_view(&self, table: &TableRef) -> TaqlResult<RefTable> {
        match self.lookup(&table.source)? {
            Source::View(view) => Ok(view),
            source => source.view(),
        }
    }

    /// Target of INSERT, DELETE and ALTER TABLE, which change the table itself.
    fn target_table(&self, table: &TableRef, statement: &str) -> TaqlResult<SharedTable> {
        match self.lookup(&table.source)? {
            Source::Table(table) => Ok(table),
            Source::View(_) => Err(TaqlError::Unsupported(format!(
                "{statement} on a reference table"
            ))),
        }
    }

    /// Runs a subquery and returns its only column as a vector.
    fn subquery(&self, select: &Select) -> TaqlResult<Datum> {
        let values = match self.select(select)? {
            QueryResult::View(view) => single_column(&view)?,
            QueryResult::Table(table) => single_column(&*table.read())?,
            _ => return Err(TaqlError::eval("a subquery must produce a table")),
        };
        Ok(Datum::Array(ArrayDatum::vector(values)))
    }

    fn constant(&self, expr: &Expr, what: &str) -> TaqlResult<Datum> {
        let node = Binder::new(&self.functions).bind(expr)?;
        match node.constant_value() {
            Some(datum) => Ok(datum.clone()),
            None => Err(TaqlError::type_error(format!("{what} must be a constant"))),
        }
    }

    fn constant_int(&self, expr: &Expr, what: &str) -> TaqlResult<i64> {
        let value = self.constant(expr, what)?.into_scalar()?;
        match value {
            Value::Int(n) => Ok(n),
            other => Err(TaqlError::type_error(format!(
                "{what} must be an integer, not {}",
                other.value_type()
            ))),
        }
    }

    fn constant_count(&self, expr: &Expr, what: &str) -> TaqlResult<u64> {
        let n = self.constant_int(expr, what)?;
        u64::try_from(n).map_err(|_| TaqlError::eval(format!("{what} cannot be negative ({n})")))
    }

    /// Rows of `ctx`'s table satisfying `condition`, in row order.
    fn selected_rows(
        &self,
        binder: &Binder<'_>,
        ctx: &EvalContext<'_>,
        condition: Option<&Expr>,
        nrow: u64,
    ) -> TaqlResult<Vec<u64>> {
        let rows = all_rows(nrow);
        let Some(condition) = condition else {
            return Ok(rows);
        };
        let node = binder.bind(condition)?;
        if node.value_type() != ValueType::Bool || node.value_kind() != ValueKind::Scalar {
            return Err(TaqlError::type_error(format!(
                "WHERE needs a scalar bool expression, not a {} {:?}",
                node.value_type(),
                node.value_kind()
            )));
        }
        let ranges = node.ranges();
        let candidates = if ranges.is_unconstrained() {
            rows
        } else {
            ranges.filter_rows(ctx, &rows)?
        };
        let flags = bools(node.get_column(ctx, &candidates)?)?;
        let selected: Vec<u64> = candidates
            .into_iter()
            .zip(flags)
            .filter_map(|(row, keep)| keep.then_some(row))
            .collect();
        debug!("WHERE selected {} of {nrow} rows", selected.len());
        Ok(selected)
    }

    /// Applies OFFSET and then LIMIT.
    fn window<T: Clone>(
        &self,
        mut items: Vec<T>,
        offset: Option<&Expr>,
        limit: Option<&Limit>,
    ) -> TaqlResult<Vec<T>> {
        if let Some(offset) = offset {
            let n = self.constant_count(offset, "OFFSET")?;
            items.drain(..(n as usize).min(items.len()));
        }
        match limit {
            None => Ok(items),
            Some(Limit::Count(expr)) => {
                items.truncate(self.constant_count(expr, "LIMIT")? as usize);
                Ok(items)
            }
            Some(Limit::Slice { start, end, step }) => {
                let part = |e: &Option<Expr>| {
                    e.as_ref()
                        .map(|e| self.constant_int(e, "LIMIT"))
                        .transpose()
                };
                let positions = slice_positions(items.len(), part(start)?, part(end)?, part(step)?)?;
                Ok(positions.into_iter().map(|p| items[p].clone()).collect())
            }
        }
    }

    fn select(&self, select: &Select) -> TaqlResult<QueryResult> {
        let (view, alias) = match &select.from {
            Some(from) => (self.source_view(from)?, from.alias.as_deref()),
            None => (self.scratch_view(select)?, None),
        };
        let runner = |query: &Select| self.subquery(query);
        let binder = Binder::new(&self.functions)
            .with_table(&view, alias)
            .with_subqueries(&runner);
        let ctx = EvalContext::table(&view);
        let rows = self.selected_rows(&binder, &ctx, select.where_clause.as_ref(), view.nrow())?;

        let columns = output_columns(&binder.aggregates(true), &view, &select.columns)?;
        let aliases: Vec<(String, TableExprNode)> = columns
            .iter()
            .filter(|c| c.aliased)
            .map(|c| (c.name.clone(), c.node.clone()))
            .collect();
        let having = select
            .having
            .as_ref()
            .map(|expr| binder.aggregates(true).with_aliases(aliases.clone()).bind(expr))
            .transpose()?;
        let aggregate = !select.group_by.is_empty()
            || columns.iter().any(|c| c.node.uses_aggregate())
            || having.as_ref().is_some_and(TableExprNode::uses_aggregate);

        let mut out: Vec<OutRow> = if aggregate {
            let keys = select
                .group_by
                .iter()
                .map(|expr| binder.with_aliases(aliases.clone()).bind(expr))
                .collect::<TaqlResult<Vec<_>>>()?;
            group_rows(&keys, &ctx, &rows)?
                .into_iter()
                .filter_map(|group| {
                    let row = *group.last()?;
                    Some(OutRow {
                        row,
                        group: Some(group),
                    })
                })
                .collect()
        } else {
            rows.iter().map(|&row| OutRow { row, group: None }).collect()
        };
        if let Some(having) = &having {
            let mut kept = Vec::with_capacity(out.len());
            for row in out {
                if eval_at(having, &ctx, &row)?.into_scalar()?.as_bool()? {
                    kept.push(row);
                }
            }
            out = kept;
        }

        if !select.order_by.is_empty() {
            let order_binder = binder.aggregates(aggregate).with_aliases(aliases.clone());
            let keys = select
                .order_by
                .iter()
                .map(|key| order_binder.bind(&key.expr))
                .collect::<TaqlResult<Vec<_>>>()?;
            let descending: Vec<bool> = select.order_by.iter().map(|key| key.descending).collect();
            let values = out
                .iter()
                .map(|row| {
                    keys.iter()
                        .map(|key| eval_at(key, &ctx, row)?.into_scalar())
                        .collect::<TaqlResult<Vec<_>>>()
                })
                .collect::<TaqlResult<Vec<_>>>()?;
            let mut order: Vec<usize> = (0..out.len()).collect();
            order.sort_by(|&a, &b| compare_ordered(&values[a], &values[b], &descending));
            out = order.into_iter().map(|i| out[i].clone()).collect();
        }

        if select.distinct {
            out = distinct(&columns, &ctx, out)?;
        }
        let out = self.window(out, select.offset.as_ref(), select.limit.as_ref())?;

        let by_reference = select.from.is_some()
            && !aggregate
            && columns.iter().all(|c| c.node.column_name().is_some());
        let result = if by_reference {
            let rows: Vec<u64> = out.iter().map(|row| row.row).collect();
            let mut result = view.select_rows(&rows)?;
            let names: Vec<&str> = columns.iter().filter_map(|c| c.node.column_name()).collect();
            if names.len() != view.column_descs().len() || names.iter().zip(view.column_names()).any(|(a, b)| *a != b) {
                result = result.select_columns(&names)?;
            }
            for column in &columns {
                if let Some(source) = column.node.column_name() {
                    if source != column.name {
                        result.rename_column(source, &column.name)?;
                    }
                }
            }
            if let Some(Giving::Name(name)) = &select.giving {
                result.set_name(name.clone());
            }
            if let Some(Giving::Path(path)) = &select.giving {
                result.save(path)?;
            }
            QueryResult::View(result)
        } else {
            let name = match &select.giving {
                Some(Giving::Name(name) | Giving::Path(name)) => name.clone(),
                None => view.name().to_string(),
            };
            let table = self.materialize(&name, &columns, &ctx, &out, aggregate)?;
            if let Some(Giving::Path(path)) = &select.giving {
                table.write().save(path)?;
            }
            QueryResult::Table(table)
        };
        Ok(result)
    }

    /// Source of a SELECT without FROM: a table without columns, one row per LIMIT.
    fn scratch_view(&self, select: &Select) -> TaqlResult<RefTable> {
        let nrow = match &select.limit {
            Some(Limit::Count(expr)) => self.constant_count(expr, "LIMIT")?,
            _ => 1,
        };
        let options = TableOptions {
            storage: memory_storage(self.options.storage),
            initial_rows: nrow,
        };
        let table = Table::create("", TableDesc::new(), options)?.into_shared();
        Ok(RefTable::full(&table))
    }

    fn materialize(
        &self,
        name: &str,
        columns: &[OutputColumn],
        ctx: &EvalContext<'_>,
        out: &[OutRow],
        aggregate: bool,
    ) -> TaqlResult<SharedTable> {
        let mut desc = TableDesc::new();
        for column in columns {
            desc.add_column(result_column_desc(&column.name, &column.node)?)?;
        }
        let options = TableOptions {
            storage: memory_storage(self.options.storage),
            initial_rows: out.len() as u64,
        };
        let mut table = Table::create(name, desc, options)?;
        let rows: Vec<u64> = out.iter().map(|row| row.row).collect();
        for column in columns {
            let datums = if !aggregate && column.node.is_column_evaluable() {
                column.node.get_column(ctx, &rows)?.into_datums()
            } else {
                out.iter()
                    .map(|row| eval_at(&column.node, ctx, row))
                    .collect::<TaqlResult<Vec<_>>>()?
            };
            let desc = table.column_desc(&column.name)?;
            let scale = epoch_scale(&desc)?;
            let cells = datums
                .into_iter()
                .map(|datum| cell_for(&desc, datum, scale, None))
                .collect::<TaqlResult<Vec<_>>>()?;
            let all: Vec<u64> = (0..cells.len() as u64).collect();
            table.column_mut(&column.name)?.put_cells(&all, cells)?;
        }
        debug!(
            "materialized {} rows and {} columns as {name}",
            out.len(),
            columns.len()
        );
        Ok(table.into_shared())
    }

    fn update(&self, update: &Update) -> TaqlResult<QueryResult> {
        let mut view = self.source_view(&update.table)?;
        let (rows, planned) = {
            let runner = |query: &Select| self.subquery(query);
            let binder = Binder::new(&self.functions)
                .with_table(&view, update.table.alias.as_deref())
                .with_subqueries(&runner);
            let ctx = EvalContext::table(&view);
            let rows = self.selected_rows(&binder, &ctx, update.where_clause.as_ref(), view.nrow())?;
            let rows = self.window(rows, None, update.limit.as_ref())?;
            // Everything is evaluated before the first write, so assignments see the old values.
            let mut planned = Vec::with_capacity(update.assignments.len());
            for assignment in &update.assignments {
                let desc = view
                    .column_desc(&assignment.column)
                    .map_err(|_| TaqlError::UnknownColumn(assignment.column.clone()))?;
                if !desc.writable {
                    return Err(TaqlError::eval(format!("column {} is not writable", desc.name)));
                }
                let node = assignable(binder.bind(&assignment.value)?, &desc)?;
                let datums = node.get_column(&ctx, &rows)?.into_datums();
                planned.push((desc, datums));
            }
            (rows, planned)
        };
        // Every value is converted and checked before the first write.
        let mut cells = Vec::with_capacity(planned.len());
        for (desc, datums) in planned {
            let scale = epoch_scale(&desc)?;
            let reader = view.column(&desc.name)?;
            let refills = desc.is_array() && desc.fixed_shape().is_none();
            let converted = rows
                .iter()
                .zip(datums)
                .map(|(&row, datum)| {
                    let current = if refills { Some(reader.get_cell(row)?) } else { None };
                    cell_for(&desc, datum, scale, current.as_ref())
                })
                .collect::<TaqlResult<Vec<_>>>()?;
            cells.push((desc.name, converted));
        }
        write_cells(&mut view, &rows, cells)?;
        debug!("updated {} rows of {}", rows.len(), view.name());
        Ok(QueryResult::Count(rows.len() as u64))
    }

    fn insert(&self, insert: &Insert) -> TaqlResult<QueryResult> {
        let shared = self.target_table(&insert.table, "INSERT")?;
        let columns: Vec<ColumnDesc> = {
            let table = shared.read();
            if insert.columns.is_empty() {
                table.column_descs()
            } else {
                insert
                    .columns
                    .iter()
                    .map(|name| {
                        table
                            .column_desc(name)
                            .map_err(|_| TaqlError::UnknownColumn(name.clone()))
                    })
                    .collect::<TaqlResult<_>>()?
            }
        };
        let runner = |query: &Select| self.subquery(query);
        let binder = Binder::new(&self.functions).with_subqueries(&runner);
        let ctx = EvalContext::default();
        let mut values = Vec::with_capacity(insert.rows.len());
        for row in &insert.rows {
            if row.len() != columns.len() {
                return Err(TaqlError::eval(format!(
                    "INSERT row has {} values for {} columns",
                    row.len(),
                    columns.len()
                )));
            }
            let datums = row
                .iter()
                .zip(&columns)
                .map(|(expr, desc)| assignable(binder.bind(expr)?, desc)?.get(&ctx, 0))
                .collect::<TaqlResult<Vec<_>>>()?;
            values.push(datums);
        }

        // Converted and checked before the table grows, so a bad value adds no rows.
        let nnew = values.len() as u64;
        let mut cells: Vec<(String, Vec<Cell>)> = columns
            .iter()
            .map(|desc| (desc.name.clone(), Vec::with_capacity(values.len())))
            .collect();
        for row in values {
            for ((desc, datum), (_, out)) in columns.iter().zip(row).zip(cells.iter_mut()) {
                out.push(cell_for(desc, datum, epoch_scale(desc)?, None)?);
            }
        }

        let mut table = shared.write();
        let start = table.nrow();
        table.add_rows(nnew)?;
        let rows: Vec<u64> = (start..start + nnew).collect();
        if let Err(err) = write_cells(&mut *table, &rows, cells) {
            table.remove_rows(&rows)?;
            return Err(err);
        }
        debug!("inserted {nnew} rows into {}", table.name());
        Ok(QueryResult::Count(nnew))
    }

    fn delete(&self, delete: &Delete) -> TaqlResult<QueryResult> {
        let shared = self.target_table(&delete.table, "DELETE")?;
        let rows = {
            let view = RefTable::full(&shared);
            let runner = |query: &Select| self.subquery(query);
            let binder = Binder::new(&self.functions)
                .with_table(&view, delete.table.alias.as_deref())
                .with_subqueries(&runner);
            let ctx = EvalContext::table(&view);
            let rows = self.selected_rows(&binder, &ctx, delete.where_clause.as_ref(), view.nrow())?;
            self.window(rows, None, delete.limit.as_ref())?
        };
        shared.write().remove_rows(&rows)?;
        debug!("deleted {} rows from {}", rows.len(), shared.name());
        Ok(QueryResult::Count(rows.len() as u64))
    }

    fn calc(&self, calc: &Calc) -> TaqlResult<QueryResult> {
        let runner = |query: &Select| self.subquery(query);
        let Some(from) = &calc.from else {
            let node = Binder::new(&self.functions)
                .with_subqueries(&runner)
                .bind(&calc.expr)?;
            return Ok(QueryResult::Values(vec![node.get(&EvalContext::default(), 0)?]));
        };
        let view = self.source_view(from)?;
        let binder = Binder::new(&self.functions)
            .with_table(&view, from.alias.as_deref())
            .with_subqueries(&runner)
            .aggregates(true);
        let node = binder.bind(&calc.expr)?;
        let ctx = EvalContext::table(&view);
        let rows = all_rows(view.nrow());
        let values = if node.uses_aggregate() {
            let row = rows.last().copied().unwrap_or(0);
            vec![node.get(&ctx.with_group(&rows), row)?]
        } else if node.uses_table() {
            node.get_column(&ctx, &rows)?.into_datums()
        } else {
            vec![node.get(&ctx, 0)?]
        };
        Ok(QueryResult::Values(values))
    }

    fn create_table(&mut self, create: &CreateTable) -> TaqlResult<QueryResult> {
        let (key, path) = match &create.name {
            TableSource::Name(name) => (name.clone(), None),
            TableSource::Path(path) => (path.clone(), Some(Path::new(path))),
            TableSource::Subquery(_) => {
                return Err(TaqlError::Unsupported("CREATE TABLE from a subquery".into()))
            }
        };
        if self.tables.contains_key(&key) {
            return Err(TaqlError::eval(format!("table {key} already exists")));
        }
        let mut desc = TableDesc::new();
        for spec in &create.columns {
            desc.add_column(self.column_from_spec(spec)?)?;
        }
        let initial_rows = create
            .limit
            .as_ref()
            .map(|expr| self.constant_count(expr, "LIMIT"))
            .transpose()?
            .unwrap_or(0);
        let name = path
            .and_then(Path::file_name)
            .map_or_else(|| key.clone(), |name| name.to_string_lossy().into_owned());
        let mut table = Table::create(
            name,
            desc,
            TableOptions {
                storage: self.options.storage,
                initial_rows,
            },
        )?;
        if let Some(path) = path {
            table.save(path)?;
        }
        let shared = table.into_shared();
        self.tables.insert(key, Source::Table(shared.clone()));
        Ok(QueryResult::Table(shared))
    }

    fn column_from_spec(&self, spec: &ColumnSpec) -> TaqlResult<ColumnDesc> {
        let (data_type, epoch) = data_type_code(&spec.type_code)?;
        let mut ndim = None;
        let mut shape = None;
        let mut unit = None;
        let mut comment = None;
        for (key, expr) in &spec.properties {
            let value = self.constant(expr, key)?;
            match key.as_str() {
                "NDIM" => ndim = Some(to_usize(value.as_scalar()?, key)?),
                "SHAPE" => {
                    let dims = value
                        .flatten()
                        .iter()
                        .map(|v| to_usize(v, key))
                        .collect::<TaqlResult<Vec<_>>>()?;
                    shape = Some(Shape::new(dims));
                }
                "UNIT" => unit = Some(value.as_scalar()?.as_str()?.to_string()),
                "COMMENT" => comment = Some(value.as_scalar()?.as_str()?.to_string()),
                other => {
                    return Err(TaqlError::eval(format!(
                        "unknown property {other} of column {}",
                        spec.name
                    )))
                }
            }
        }
        let mut desc = match (shape, ndim) {
            (Some(shape), _) => ColumnDesc::array(&spec.name, data_type).with_shape(shape),
            (None, Some(ndim)) => ColumnDesc::array(&spec.name, data_type).with_ndim(ndim),
            (None, None) => ColumnDesc::scalar(&spec.name, data_type),
        };
        if epoch {
            desc = epoch_column(desc);
        }
        if let Some(unit) = unit {
            Unit::parse(&unit)?;
            desc = desc.with_unit(unit);
        }
        if let Some(comment) = comment {
            desc = desc.with_keyword("COMMENT", Scalar::String(comment));
        }
        Ok(desc)
    }

    fn alter_table(&self, alter: &AlterTable) -> TaqlResult<QueryResult> {
        let shared = self.target_table(&alter.table, "ALTER TABLE")?;
        for action in &alter.actions {
            match action {
                AlterAction::AddColumn(specs) => {
                    for spec in specs {
                        let desc = self.column_from_spec(spec)?;
                        shared.write().add_column(desc)?;
                    }
                }
                AlterAction::RenameColumn(pairs) => {
                    for (old, new) in pairs {
                        shared.write().rename_column(old, new)?;
                    }
                }
                AlterAction::DropColumn(names) => {
                    for name in names {
                        shared.write().remove_column(name)?;
                    }
                }
                AlterAction::SetKeyword(pairs) => {
                    for (key, expr) in pairs {
                        let field = record_field(self.constant(expr, key)?)?;
                        set_keyword(&mut shared.write(), key, field)?;
                    }
                }
                AlterAction::AddRow(expr) => {
                    let count = self.constant_count(expr, "ADD ROW")?;
                    shared.write().add_rows(count)?;
                }
            }
        }
        debug!("altered table {}", shared.name());
        Ok(QueryResult::Table(shared))
    }
}

fn open_path(path: &str) -> TaqlResult<Source> {
    let dir = Path::new(path);
    if !dir.is_dir() {
        return Err(TaqlError::UnknownTable(path.to_string()));
    }
    match Table::open(dir) {
        Ok(table) => Ok(Source::Table(table.into_shared())),
        Err(_) => Ok(Source::View(RefTable::open(dir)?)),
    }
}

fn memory_storage(options: StorageOptions) -> StorageOptions {
    StorageOptions {
        kind: StorageKind::Memory,
        ..options
    }
}

#[derive(Debug)]
struct OutputColumn {
    name: String,
    node: TableExprNode,
    /// Named with AS.
    aliased: bool,
}

/// One result row: the row it is evaluated on and, for aggregates, its group.
#[derive(Clone, Debug)]
struct OutRow {
    row: u64,
    group: Option<Vec<u64>>,
}

fn eval_at(node: &TableExprNode, ctx: &EvalContext<'_>, out: &OutRow) -> TaqlResult<Datum> {
    match &out.group {
        Some(group) => node.get(&ctx.with_group(group), out.row),
        None => node.get(ctx, out.row),
    }
}

/// Binds the SELECT list; `*` and an empty list stand for all columns.
fn output_columns(
    binder: &Binder<'_>,
    table: &dyn TableView,
    columns: &[SelectColumn],
) -> TaqlResult<Vec<OutputColumn>> {
    let all = || -> TaqlResult<Vec<OutputColumn>> {
        table
            .column_names()
            .into_iter()
            .map(|name| {
                let node = TableExprNode::column(table, &name)?;
                Ok(OutputColumn {
                    name,
                    node,
                    aliased: false,
                })
            })
            .collect()
    };
    if columns.is_empty() {
        return all();
    }
    let mut out = Vec::new();
    for column in columns {
        match column {
            SelectColumn::All => out.extend(all()?),
            SelectColumn::Expr { expr, alias } => {
                let node = binder.bind(expr)?;
                let name = match (alias, node.column_name(), expr) {
                    (Some(alias), _, _) => alias.clone(),
                    (None, Some(column), _) => column.to_string(),
                    (None, None, Expr::Name(name)) => name.clone(),
                    _ => format!("Col_{}", out.len() + 1),
                };
                out.push(OutputColumn {
                    name,
                    node,
                    aliased: alias.is_some(),
                });
            }
        }
    }
    Ok(out)
}

fn bools(data: ColumnData) -> TaqlResult<Vec<bool>> {
    match data {
        ColumnData::Bool(flags) => Ok(flags),
        other => other
            .into_datums()
            .iter()
            .map(|datum| datum.as_scalar()?.as_bool())
            .collect(),
    }
}

fn compare_keys(a: &[Value], b: &[Value]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.sort_cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or_else(|| a.len().cmp(&b.len()))
}

fn compare_ordered(a: &[Value], b: &[Value], descending: &[bool]) -> Ordering {
    a.iter()
        .zip(b)
        .zip(descending)
        .map(|((x, y), &desc)| {
            let ord = x.sort_cmp(y);
            if desc {
                ord.reverse()
            } else {
                ord
            }
        })
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Partitions `rows` by the values of `keys`; groups come out in key order, rows within a
/// group in row order. Without keys all rows form one group.
fn group_rows(keys: &[TableExprNode], ctx: &EvalContext<'_>, rows: &[u64]) -> TaqlResult<Vec<Vec<u64>>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    if keys.is_empty() {
        return Ok(vec![rows.to_vec()]);
    }
    let values = rows
        .iter()
        .map(|&row| {
            keys.iter()
                .map(|key| key.get(ctx, row)?.into_scalar())
                .collect::<TaqlResult<Vec<_>>>()
        })
        .collect::<TaqlResult<Vec<_>>>()?;
    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.sort_by(|&a, &b| compare_keys(&values[a], &values[b]));
    let mut groups: Vec<Vec<u64>> = Vec::new();
    let mut previous: Option<usize> = None;
    for index in order {
        match (previous, groups.last_mut()) {
            (Some(p), Some(group)) if compare_keys(&values[p], &values[index]).is_eq() => {
                group.push(rows[index]);
            }
            _ => groups.push(vec![rows[index]]),
        }
        previous = Some(index);
    }
    Ok(groups)
}

/// Keeps the first of every run of rows with equal output values.
fn distinct(columns: &[OutputColumn], ctx: &EvalContext<'_>, out: Vec<OutRow>) -> TaqlResult<Vec<OutRow>> {
    let keys = out
        .iter()
        .map(|row| {
            let mut key = Vec::new();
            for column in columns {
                key.extend(eval_at(&column.node, ctx, row)?.flatten());
            }
            Ok(key)
        })
        .collect::<TaqlResult<Vec<Vec<Value>>>>()?;
    let mut order: Vec<usize> = (0..out.len()).collect();
    order.sort_by(|&a, &b| compare_keys(&keys[a], &keys[b]));
    let mut keep = vec![false; out.len()];
    let mut previous: Option<usize> = None;
    for index in order {
        if previous.map_or(true, |p| compare_keys(&keys[p], &keys[index]).is_ne()) {
            keep[index] = true;
            previous = Some(index);
        }
    }
    Ok(out
        .into_iter()
        .zip(keep)
        .filter_map(|(row, k)| k.then_some(row))
        .collect())
}

/// Positions `start:end:step` of a sequence of `len` items; negative bounds count from the
/// end.
fn slice_positions(
    len: usize,
    start: Option<i64>,
    end: Option<i64>,
    step: Option<i64>,
) -> TaqlResult<Vec<usize>> {
    let len = len as i64;
    let clamp = |v: i64| if v < 0 { (v + len).max(0) } else { v.min(len) };
    let step = step.unwrap_or(1);
    if step <= 0 {
        return Err(TaqlError::eval(format!("LIMIT step must be positive, not {step}")));
    }
    let start = start.map_or(0, clamp);
    let end = end.map_or(len, clamp);
    Ok((start..end).step_by(step as usize).map(|p| p as usize).collect())
}

fn single_column(table: &dyn TableView) -> TaqlResult<Vec<Value>> {
    let names = table.column_names();
    let [name] = names.as_slice() else {
        return Err(TaqlError::eval(format!(
            "a subquery must select one column, not {}",
            names.len()
        )));
    };
    Ok(column_datums(table, name)?
        .iter()
        .flat_map(Datum::flatten)
        .collect())
}

fn epoch_column(desc: ColumnDesc) -> ColumnDesc {
    let mut measinfo = Record::new();
    measinfo.set("type", Scalar::from("epoch"));
    measinfo.set("Ref", Scalar::from("UTC"));
    desc.with_unit("d").with_keyword("MEASINFO", measinfo)
}

fn result_column_desc(name: &str, node: &TableExprNode) -> TaqlResult<ColumnDesc> {
    let data_type = node.value_type().storage_type()?;
    let desc = match node.value_kind() {
        ValueKind::Array => ColumnDesc::array(name, data_type),
        ValueKind::Scalar => ColumnDesc::scalar(name, data_type),
    };
    Ok(match (node.value_type(), node.unit()) {
        (ValueType::Date, _) => epoch_column(desc),
        (_, Some(unit)) => desc.with_unit(unit.to_string()),
        (_, None) => desc,
    })
}

/// Checks that `node` can be stored in the column and converts it to the column's unit.
fn assignable(node: TableExprNode, desc: &ColumnDesc) -> TaqlResult<TableExprNode> {
    let t = node.value_type();
    let ok = match ValueType::of_data_type(desc.data_type) {
        ValueType::Bool => t == ValueType::Bool,
        ValueType::String => t == ValueType::String,
        ValueType::Int | ValueType::Double => t.is_real() || t == ValueType::Date,
        ValueType::Complex => t.is_numeric(),
        _ => false,
    };
    if !ok {
        return Err(TaqlError::type_error(format!(
            "cannot store a {t} value in column {} of type {}",
            desc.name, desc.data_type
        )));
    }
    if t == ValueType::Date || epoch_scale(desc)?.is_some() {
        return Ok(node);
    }
    match (column_unit(desc)?, node.unit()) {
        (Some(unit), Some(_)) => node.with_unit(unit.name()),
        _ => Ok(node),
    }
}

fn stored_value(value: Value, epoch_scale: Option<f64>) -> Value {
    match (value, epoch_scale) {
        (Value::Date(mjd), Some(scale)) => Value::Double(mjd / scale),
        (value, _) => value,
    }
}

/// Writes one evaluated value into a cell. A scalar written into an array cell fills it.
/// Converts an evaluated value into a cell of `desc`, checking its type and shape.
///
/// A scalar assigned to a variable-shape array column fills `current`, the cell it replaces.
fn cell_for(
    desc: &ColumnDesc,
    datum: Datum,
    epoch_scale: Option<f64>,
    current: Option<&Cell>,
) -> TaqlResult<Cell> {
    match datum {
        Datum::Scalar(value) => {
            let scalar = stored_value(value, epoch_scale).to_scalar(desc.data_type)?;
            if !desc.is_array() {
                return Ok(Cell::Scalar(scalar));
            }
            let shape = match (desc.fixed_shape(), current) {
                (Some(shape), _) => shape.clone(),
                (None, Some(Cell::Array(array))) => array.shape().clone(),
                (None, _) => {
                    return Err(TaqlError::type_error(format!(
                        "cannot fill an undefined array cell of column {} with a scalar",
                        desc.name
                    )))
                }
            };
            Ok(Cell::Array(ArrayValue::filled(shape, &scalar)))
        }
        Datum::Array(array) => {
            if !desc.is_array() {
                return Err(TaqlError::type_error(format!(
                    "column {} holds scalars, not arrays",
                    desc.name
                )));
            }
            let array = match epoch_scale {
                Some(scale) => {
                    let values = array
                        .values()
                        .iter()
                        .map(|v| stored_value(v.clone(), Some(scale)))
                        .collect();
                    array.with_values(ValueType::Double, values)?
                }
                None => array,
            };
            let array = array.to_array_value(desc.data_type)?;
            desc.check_shape(array.shape())?;
            Ok(Cell::Array(array))
        }
    }
}

/// Writes prepared cells column by column.
fn write_cells(
    table: &mut dyn TableView,
    rows: &[u64],
    cells: Vec<(String, Vec<Cell>)>,
) -> TaqlResult<()> {
    for (name, column_cells) in cells {
        TableColumnMut::new(table, &name)?.put_cells(rows, column_cells)?;
    }
    Ok(())
}

/// Column type of a CREATE TABLE type code; `EPOCH` is a double column holding dates.
fn data_type_code(code: &str) -> TaqlResult<(DataType, bool)> {
    let data_type = match code.to_ascii_uppercase().as_str() {
        "B" | "BOOL" | "BOOLEAN" => DataType::Bool,
        "U1" | "UCHAR" | "BYTE" => DataType::UInt8,
        "I1" | "CHAR" => DataType::Int8,
        "I2" | "SHORT" | "SMALLINT" => DataType::Int16,
        "U2" | "USHORT" => DataType::UInt16,
        "I4" | "INT" | "INTEGER" => DataType::Int32,
        "U4" | "UINT" => DataType::UInt32,
        "I8" | "INT64" | "BIGINT" => DataType::Int64,
        "U8" | "UINT64" => DataType::UInt64,
        "R4" | "FLT" | "FLOAT" => DataType::Float,
        "R8" | "DBL" | "DOUBLE" => DataType::Double,
        "C4" | "FC" | "FCOMPLEX" | "COMPLEX" => DataType::Complex,
        "C8" | "DC" | "DCOMPLEX" => DataType::DComplex,
        "S" | "STRING" => DataType::String,
        "EPOCH" => return Ok((DataType::Double, true)),
        other => return Err(TaqlError::eval(format!("unknown column type {other}"))),
    };
    Ok((data_type, false))
}

fn to_usize(value: &Value, what: &str) -> TaqlResult<usize> {
    let n = value.as_int()?;
    usize::try_from(n).map_err(|_| TaqlError::eval(format!("{what} cannot be negative ({n})")))
}

fn record_field(datum: Datum) -> TaqlResult<RecordField> {
    Ok(match datum {
        Datum::Scalar(value) => {
            let data_type = value.value_type().storage_type()?;
            RecordField::Scalar(value.to_scalar(data_type)?)
        }
        Datum::Array(array) => {
            let data_type = array.value_type().storage_type()?;
            RecordField::Array(array.to_array_value(data_type)?)
        }
    })
}

/// `key`, `::key` (table keyword) or `col::key` (column keyword); `key` may be a path `a.b`
/// whose intermediate records are created as needed.
fn set_keyword(table: &mut Table, key: &str, field: RecordField) -> TaqlResult<()> {
    match key.split_once("::") {
        Some(("", path)) => set_path(table.keywords_mut(), path, field),
        Some((column, path)) => set_path(table.column_keywords_mut(column)?, path, field),
        None => set_path(table.keywords_mut(), key, field),
    }
}

fn set_path(record: &mut Record, path: &str, field: RecordField) -> TaqlResult<()> {
    match path.split_once('.') {
        None => {
            record.set(path, field);
            Ok(())
        }
        Some((head, rest)) => {
            if !record.contains(head) {
                record.set(head, Record::new());
            }
            match record.get_mut(head) {
                Some(RecordField::Record(sub)) => set_path(sub, rest, field),
                _ => Err(TaqlError::type_error(format!("keyword {head} is not a record"))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_count_negative_bounds_from_the_end() {
        assert_eq!(slice_positions(5, Some(-2), None, None).unwrap(), vec![3, 4]);
        assert_eq!(slice_positions(5, None, None, Some(2)).unwrap(), vec![0, 2, 4]);
        assert_eq!(slice_positions(5, Some(1), Some(-1), None).unwrap(), vec![1, 2, 3]);
        assert!(slice_positions(5, None, None, Some(0)).is_err());
    }

    #[test]
    fn nested_keyword_paths_create_records() {
        let mut record = Record::new();
        set_path(&mut record, "a.b.c", RecordField::Scalar(Scalar::Int32(1))).unwrap();
        assert_eq!(
            record.get_path("a.b.c"),
            Some(&RecordField::Scalar(Scalar::Int32(1)))
        );
    }
}
