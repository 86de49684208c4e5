use crate::codec::{decode_cell, encode_cell, put_u64, ByteReader};
use crate::error::{TableError, TableResult};
use crate::storage::{check_column, check_row, Cell, ColumnLayout, StorageKind, StorageManager};

/// Keeps every cell in memory; used for query results and scratch tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    layouts: Vec<ColumnLayout>,
    columns: Vec<Vec<Cell>>,
    nrow: u64,
}

impl MemoryStore {
    pub fn new(layouts: Vec<ColumnLayout>) -> Self {
        let columns = layouts.iter().map(|_| Vec::new()).collect();
        Self {
            layouts,
            columns,
            nrow: 0,
        }
    }

    pub(crate) fn read(reader: &mut ByteReader<'_>, layouts: Vec<ColumnLayout>) -> TableResult<Self> {
        let nrow = reader.read_u64()?;
        let ncol = reader.read_len()?;
        if ncol != layouts.len() {
            return Err(TableError::Corrupt(format!(
                "memory store holds {ncol} columns, table describes {}",
                layouts.len()
            )));
        }
        let mut columns = Vec::with_capacity(ncol);
        for layout in &layouts {
            let mut cells = Vec::new();
            for _ in 0..nrow {
                cells.push(decode_cell(layout.data_type, reader)?);
            }
            columns.push(cells);
        }
        Ok(Self {
            layouts,
            columns,
            nrow,
        })
    }
}

impl StorageManager for MemoryStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Memory
    }

    fn nrow(&self) -> u64 {
        self.nrow
    }

    fn ncolumn(&self) -> usize {
        self.layouts.len()
    }

    fn get(&self, column: usize, row: u64) -> TableResult<Cell> {
        check_column(column, self.columns.len())?;
        check_row(row, self.nrow)?;
        Ok(self.columns[column][row as usize].clone())
    }

    fn put(&mut self, column: usize, row: u64, cell: &Cell) -> TableResult<()> {
        check_column(column, self.columns.len())?;
        check_row(row, self.nrow)?;
        self.columns[column][row as usize] = cell.clone();
        Ok(())
    }

    fn add_rows(&mut self, count: u64) -> TableResult<()> {
        for (layout, cells) in self.layouts.iter().zip(self.columns.iter_mut()) {
            let initial = layout.initial_cell();
            cells.extend(std::iter::repeat(initial).take(count as usize));
        }
        self.nrow += count;
        Ok(())
    }

    fn remove_row(&mut self, row: u64) -> TableResult<()> {
        check_row(row, self.nrow)?;
        for cells in &mut self.columns {
            cells.remove(row as usize);
        }
        self.nrow -= 1;
        Ok(())
    }

    fn add_column(&mut self, layout: ColumnLayout) -> TableResult<()> {
        let initial = layout.initial_cell();
        self.columns.push(vec![initial; self.nrow as usize]);
        self.layouts.push(layout);
        Ok(())
    }

    fn remove_column(&mut self, column: usize) -> TableResult<()> {
        check_column(column, self.columns.len())?;
        self.columns.remove(column);
        self.layouts.remove(column);
        Ok(())
    }

    fn write(&self, buf: &mut Vec<u8>) -> TableResult<()> {
        put_u64(buf, self.nrow);
        put_u64(buf, self.columns.len() as u64);
        for cells in &self.columns {
            for cell in cells {
                encode_cell(cell, buf)?;
            }
        }
        Ok(())
    }
}
