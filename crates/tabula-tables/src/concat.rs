//! Concatenation of root tables with the same columns into one view.
//!
//! Rows of the view are the rows of the first part, followed by those of the second, and so
//! on. Nothing is copied: reads and writes go to the part that owns the row.

use crate::column::{ColumnDesc, ColumnKind, TableDesc};
use crate::error::{TableError, TableResult};
use crate::record::Record;
use crate::storage::{check_row, Cell};
use crate::table::{SharedTable, TableView};
use log::debug;

#[derive(Debug)]
pub struct ConcatTable {
    name: String,
    parts: Vec<SharedTable>,
    desc: TableDesc,
    keywords: Record,
}

impl ConcatTable {
    /// Concatenates `parts` in order. Keywords are taken from the first part.
    pub fn new(name: impl Into<String>, parts: Vec<SharedTable>) -> TableResult<Self> {
        let first = parts
            .first()
            .ok_or_else(|| TableError::Invalid("concatenation needs at least one table".into()))?;
        let (mut desc, keywords) = {
            let table = first.read();
            (table.desc().clone(), table.keywords().clone())
        };
        for part in &parts[1..] {
            let table = part.read();
            conform(&mut desc, table.desc(), table.name())?;
        }
        let name = name.into();
        debug!("concatenated {} tables into {name}", parts.len());
        Ok(Self {
            name,
            parts,
            desc,
            keywords,
        })
    }

    pub fn parts(&self) -> &[SharedTable] {
        &self.parts
    }

    pub fn desc(&self) -> &TableDesc {
        &self.desc
    }

    /// Part index and row within that part holding row `row` of the view.
    pub fn locate(&self, row: u64) -> TableResult<(usize, u64)> {
        let mut first = 0;
        for (index, part) in self.parts.iter().enumerate() {
            let nrow = part.nrow();
            if row < first + nrow {
                return Ok((index, row - first));
            }
            first += nrow;
        }
        Err(TableError::RowOutOfRange { row, nrow: first })
    }

    fn check_column(&self, column: &str) -> TableResult<()> {
        match self.desc.column(column) {
            Some(_) => Ok(()),
            None => Err(TableError::UnknownColumn(column.to_string())),
        }
    }
}

/// Checks that `other` has the columns of `desc`; fixed shapes that differ between parts
/// become variable shapes of the view.
fn conform(desc: &mut TableDesc, other: &TableDesc, part: &str) -> TableResult<()> {
    let mismatch = |what: String| {
        TableError::Invalid(format!("table {part} cannot be concatenated: {what}"))
    };
    if desc.len() != other.len() {
        return Err(mismatch(format!(
            "it has {} columns instead of {}",
            other.len(),
            desc.len()
        )));
    }
    let mut relaxed = Vec::new();
    for column in desc.columns() {
        let theirs = other
            .column(&column.name)
            .ok_or_else(|| mismatch(format!("column {} is missing", column.name)))?;
        if theirs.data_type != column.data_type {
            return Err(mismatch(format!(
                "column {} has type {:?} instead of {:?}",
                column.name, theirs.data_type, column.data_type
            )));
        }
        match (&column.kind, &theirs.kind) {
            (ColumnKind::Scalar, ColumnKind::Scalar) => {}
            (ColumnKind::FixedArray(ours), ColumnKind::FixedArray(shape)) if ours == shape => {}
            (ColumnKind::Scalar, _) | (_, ColumnKind::Scalar) => {
                return Err(mismatch(format!(
                    "column {} is a scalar column in one table only",
                    column.name
                )));
            }
            _ => relaxed.push(column.name.clone()),
        }
    }
    for name in relaxed {
        if let Some(column) = desc.column_mut(&name) {
            column.kind = ColumnKind::VarArray { ndim: None };
        }
    }
    Ok(())
}

impl TableView for ConcatTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn nrow(&self) -> u64 {
        self.parts.iter().map(SharedTable::nrow).sum()
    }

    fn column_descs(&self) -> Vec<ColumnDesc> {
        self.desc.columns().to_vec()
    }

    fn column_desc(&self, name: &str) -> TableResult<ColumnDesc> {
        self.desc
            .column(name)
            .cloned()
            .ok_or_else(|| TableError::UnknownColumn(name.to_string()))
    }

    fn get_cell(&self, column: &str, row: u64) -> TableResult<Cell> {
        self.check_column(column)?;
        let (part, local) = self.locate(row)?;
        self.parts[part].read().get_cell(column, local)
    }

    fn get_cells(&self, column: &str, rows: &[u64]) -> TableResult<Vec<Cell>> {
        self.check_column(column)?;
        let mut wanted: Vec<Vec<(usize, u64)>> = vec![Vec::new(); self.parts.len()];
        for (position, &row) in rows.iter().enumerate() {
            let (part, local) = self.locate(row)?;
            wanted[part].push((position, local));
        }
        let mut cells = vec![Cell::Undefined; rows.len()];
        for (part, wanted) in self.parts.iter().zip(wanted) {
            if wanted.is_empty() {
                continue;
            }
            let local: Vec<u64> = wanted.iter().map(|&(_, row)| row).collect();
            let found = part.read().get_cells(column, &local)?;
            for ((position, _), cell) in wanted.into_iter().zip(found) {
                cells[position] = cell;
            }
        }
        Ok(cells)
    }

    fn put_cell(&mut self, column: &str, row: u64, cell: Cell) -> TableResult<()> {
        self.check_column(column)?;
        let (part, local) = self.locate(row)?;
        self.parts[part].write().put_cell(column, local, cell)
    }

    fn keywords(&self) -> &Record {
        &self.keywords
    }

    fn row_numbers(&self) -> Vec<u64> {
        (0..self.nrow()).collect()
    }

    fn root_row(&self, row: u64) -> TableResult<u64> {
        check_row(row, self.nrow())?;
        Ok(row)
    }
}
