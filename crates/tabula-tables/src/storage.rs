use crate::array::ArrayValue;
use crate::codec::ByteReader;
use crate::column::ColumnKind;
use crate::error::{TableError, TableResult};
use crate::ism::IncrementalStore;
use crate::memory::MemoryStore;
use crate::types::{DataType, Scalar};
use std::fmt;

/// The value held by one (row, column) position.
#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    /// A variable-shape array cell that was never written.
    Undefined,
    Scalar(Scalar),
    Array(ArrayValue),
}

impl Cell {
    pub fn is_defined(&self) -> bool {
        !matches!(self, Cell::Undefined)
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Cell::Scalar(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayValue> {
        match self {
            Cell::Array(value) => Some(value),
            _ => None,
        }
    }
}

/// What a storage manager needs to know about one column.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnLayout {
    pub data_type: DataType,
    pub kind: ColumnKind,
    pub default: Option<Scalar>,
}

impl ColumnLayout {
    pub fn new(data_type: DataType, kind: ColumnKind) -> Self {
        Self {
            data_type,
            kind,
            default: None,
        }
    }

    /// Value of a freshly added row.
    pub fn initial_cell(&self) -> Cell {
        let value = self
            .default
            .clone()
            .unwrap_or_else(|| Scalar::default_for(self.data_type));
        match &self.kind {
            ColumnKind::Scalar => Cell::Scalar(value),
            ColumnKind::FixedArray(shape) => Cell::Array(ArrayValue::filled(shape.clone(), &value)),
            ColumnKind::VarArray { .. } => Cell::Undefined,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StorageKind {
    /// Run-length buckets; the one storage manager persisted page by page.
    #[default]
    Incremental,
    /// Plain per-cell vectors.
    Memory,
}

impl StorageKind {
    fn code(self) -> u8 {
        match self {
            StorageKind::Incremental => 1,
            StorageKind::Memory => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageOptions {
    pub kind: StorageKind,
    /// Bucket size in bytes for the incremental manager.
    pub bucket_size: usize,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            kind: StorageKind::Incremental,
            bucket_size: 32_768,
        }
    }
}

/// Contract between a table and whatever physically holds its cells.
///
/// Cells handed to `put` have already been type- and shape-checked by the column layer.
pub trait StorageManager: fmt::Debug + Send + Sync {
    fn kind(&self) -> StorageKind;

    fn nrow(&self) -> u64;

    fn ncolumn(&self) -> usize;

    fn get(&self, column: usize, row: u64) -> TableResult<Cell>;

    /// Reads many rows of one column; managers may share lookups across rows.
    fn get_rows(&self, column: usize, rows: &[u64]) -> TableResult<Vec<Cell>> {
        rows.iter().map(|&row| self.get(column, row)).collect()
    }

    fn put(&mut self, column: usize, row: u64, cell: &Cell) -> TableResult<()>;

    fn add_rows(&mut self, count: u64) -> TableResult<()>;

    fn remove_row(&mut self, row: u64) -> TableResult<()>;

    fn add_column(&mut self, layout: ColumnLayout) -> TableResult<()>;

    fn remove_column(&mut self, column: usize) -> TableResult<()>;

    /// Serializes the whole store; read back with [`read_storage`].
    fn write(&self, buf: &mut Vec<u8>) -> TableResult<()>;
}

pub fn create_storage(
    options: StorageOptions,
    layouts: Vec<ColumnLayout>,
) -> TableResult<Box<dyn StorageManager>> {
    Ok(match options.kind {
        StorageKind::Incremental => Box::new(IncrementalStore::new(options.bucket_size, layouts)?),
        StorageKind::Memory => Box::new(MemoryStore::new(layouts)),
    })
}

pub(crate) fn write_storage(storage: &dyn StorageManager, buf: &mut Vec<u8>) -> TableResult<()> {
    buf.push(storage.kind().code());
    storage.write(buf)
}

pub(crate) fn read_storage(
    reader: &mut ByteReader<'_>,
    layouts: Vec<ColumnLayout>,
) -> TableResult<Box<dyn StorageManager>> {
    match reader.read_u8()? {
        1 => Ok(Box::new(IncrementalStore::read(reader, layouts)?)),
        2 => Ok(Box::new(MemoryStore::read(reader, layouts)?)),
        code => Err(TableError::Corrupt(format!("unknown storage manager {code}"))),
    }
}

pub(crate) fn check_row(row: u64, nrow: u64) -> TableResult<()> {
    if row >= nrow {
        return Err(TableError::RowOutOfRange { row, nrow });
    }
    Ok(())
}

pub(crate) fn check_column(column: usize, ncolumn: usize) -> TableResult<()> {
    if column >= ncolumn {
        return Err(TableError::Invalid(format!(
            "storage column {column} out of range ({ncolumn} columns)"
        )));
    }
    Ok(())
}
