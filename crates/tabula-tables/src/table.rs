use crate::codec::{put_string, put_u32, ByteReader};
use crate::column::{ColumnDesc, TableColumn, TableColumnMut, TableDesc};
use crate::error::{TableError, TableResult};
use crate::record::Record;
use crate::storage::{check_row, create_storage, read_storage, write_storage, Cell, StorageManager, StorageOptions};
use log::{debug, warn};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

const TABLE_MAGIC: &[u8] = b"TABULATB";
const TABLE_VERSION: u32 = 1;
pub(crate) const TABLE_FILE: &str = "table.dat";

#[derive(Debug, Clone, Copy, Default)]
pub struct TableOptions {
    pub storage: StorageOptions,
    /// Rows added when the table is created.
    pub initial_rows: u64,
}

/// Free-form description of what a table holds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableInfo {
    pub kind: String,
    pub subtype: String,
    pub readme: String,
}

impl TableInfo {
    pub(crate) fn encode(&self, buf: &mut Vec<u8>) -> TableResult<()> {
        put_string(buf, &self.kind)?;
        put_string(buf, &self.subtype)?;
        put_string(buf, &self.readme)
    }

    pub(crate) fn decode(reader: &mut ByteReader<'_>) -> TableResult<Self> {
        Ok(Self {
            kind: reader.read_string()?,
            subtype: reader.read_string()?,
            readme: reader.read_string()?,
        })
    }
}

/// Row and column access shared by plain tables and reference tables.
///
/// Column and row arguments are in terms of this table; a reference table translates them to
/// its root.
pub trait TableView: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn nrow(&self) -> u64;

    fn column_descs(&self) -> Vec<ColumnDesc>;

    fn column_desc(&self, name: &str) -> TableResult<ColumnDesc> {
        self.column_descs()
            .into_iter()
            .find(|desc| desc.name == name)
            .ok_or_else(|| TableError::UnknownColumn(name.to_string()))
    }

    fn column_names(&self) -> Vec<String> {
        self.column_descs().into_iter().map(|desc| desc.name).collect()
    }

    fn get_cell(&self, column: &str, row: u64) -> TableResult<Cell>;

    fn get_cells(&self, column: &str, rows: &[u64]) -> TableResult<Vec<Cell>> {
        rows.iter().map(|&row| self.get_cell(column, row)).collect()
    }

    fn put_cell(&mut self, column: &str, row: u64, cell: Cell) -> TableResult<()>;

    fn keywords(&self) -> &Record;

    /// Row numbers of this table's rows in its root table.
    fn row_numbers(&self) -> Vec<u64>;

    fn root_row(&self, row: u64) -> TableResult<u64>;

    fn is_reference(&self) -> bool {
        false
    }
}

impl dyn TableView + '_ {
    pub fn column(&self, name: &str) -> TableResult<TableColumn<'_>> {
        TableColumn::new(self, name)
    }

    pub fn column_mut(&mut self, name: &str) -> TableResult<TableColumnMut<'_>> {
        TableColumnMut::new(self, name)
    }
}

/// A table of record: owns its schema, keywords and storage.
pub struct Table {
    name: String,
    path: Option<PathBuf>,
    desc: TableDesc,
    keywords: Record,
    info: TableInfo,
    options: TableOptions,
    storage: Box<dyn StorageManager>,
    changed: bool,
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("nrow", &self.storage.nrow())
            .field("columns", &self.desc.len())
            .field("storage", &self.storage.kind())
            .finish()
    }
}

impl Table {
    pub fn create(name: impl Into<String>, desc: TableDesc, options: TableOptions) -> TableResult<Self> {
        let layouts = desc.columns().iter().map(ColumnDesc::layout).collect();
        let mut storage = create_storage(options.storage, layouts)?;
        storage.add_rows(options.initial_rows)?;
        let name = name.into();
        debug!(
            "created table {name} with {} columns and {} rows",
            desc.len(),
            options.initial_rows
        );
        Ok(Self {
            name,
            path: None,
            desc,
            keywords: Record::new(),
            info: TableInfo::default(),
            options,
            storage,
            changed: true,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn desc(&self) -> &TableDesc {
        &self.desc
    }

    pub fn options(&self) -> TableOptions {
        self.options
    }

    pub fn storage(&self) -> &dyn StorageManager {
        self.storage.as_ref()
    }

    pub fn info(&self) -> &TableInfo {
        &self.info
    }

    pub fn info_mut(&mut self) -> &mut TableInfo {
        self.changed = true;
        &mut self.info
    }

    pub fn keywords_mut(&mut self) -> &mut Record {
        self.changed = true;
        &mut self.keywords
    }

    pub fn column_keywords_mut(&mut self, column: &str) -> TableResult<&mut Record> {
        self.changed = true;
        self.desc
            .column_mut(column)
            .map(|desc| &mut desc.keywords)
            .ok_or_else(|| TableError::UnknownColumn(column.to_string()))
    }

    pub fn column(&self, name: &str) -> TableResult<TableColumn<'_>> {
        TableColumn::new(self, name)
    }

    pub fn column_mut(&mut self, name: &str) -> TableResult<TableColumnMut<'_>> {
        TableColumnMut::new(self, name)
    }

    fn column_index(&self, name: &str) -> TableResult<usize> {
        self.desc
            .index_of(name)
            .ok_or_else(|| TableError::UnknownColumn(name.to_string()))
    }

    pub fn add_rows(&mut self, count: u64) -> TableResult<()> {
        self.storage.add_rows(count)?;
        self.changed = true;
        Ok(())
    }

    pub fn remove_row(&mut self, row: u64) -> TableResult<()> {
        self.storage.remove_row(row)?;
        self.changed = true;
        Ok(())
    }

    /// Removes several rows; row numbers refer to the table before the removal.
    pub fn remove_rows(&mut self, rows: &[u64]) -> TableResult<()> {
        let nrow = self.nrow();
        let mut rows = rows.to_vec();
        rows.sort_unstable();
        rows.dedup();
        for &row in &rows {
            check_row(row, nrow)?;
        }
        for &row in rows.iter().rev() {
            self.storage.remove_row(row)?;
        }
        self.changed = true;
        Ok(())
    }

    pub fn add_column(&mut self, column: ColumnDesc) -> TableResult<()> {
        column.validate()?;
        if self.desc.column(&column.name).is_some() {
            return Err(TableError::DuplicateColumn(column.name));
        }
        self.storage.add_column(column.layout())?;
        debug!("added column {} to table {}", column.name, self.name);
        self.desc.add_column(column)?;
        self.changed = true;
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> TableResult<()> {
        let index = self.column_index(name)?;
        self.storage.remove_column(index)?;
        self.desc.remove_column(name)?;
        self.changed = true;
        Ok(())
    }

    pub fn rename_column(&mut self, old: &str, new: &str) -> TableResult<()> {
        self.desc.rename_column(old, new)?;
        self.changed = true;
        Ok(())
    }

    /// Writes the table into directory `dir` and remembers it as the table's home.
    pub fn save(&mut self, dir: impl AsRef<Path>) -> TableResult<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let mut buf = Vec::new();
        buf.extend_from_slice(TABLE_MAGIC);
        put_u32(&mut buf, TABLE_VERSION);
        put_string(&mut buf, &self.name)?;
        self.info.encode(&mut buf)?;
        self.keywords.encode(&mut buf)?;
        put_u32(&mut buf, self.desc.len() as u32);
        for column in self.desc.columns() {
            column.encode(&mut buf)?;
        }
        write_storage(self.storage.as_ref(), &mut buf)?;
        fs::write(dir.join(TABLE_FILE), &buf)?;
        debug!(
            "saved table {} ({} rows, {} bytes) to {}",
            self.name,
            self.nrow(),
            buf.len(),
            dir.display()
        );
        self.path = Some(dir.to_path_buf());
        self.changed = false;
        Ok(())
    }

    pub fn open(dir: impl AsRef<Path>) -> TableResult<Self> {
        let dir = dir.as_ref();
        let bytes = fs::read(dir.join(TABLE_FILE))?;
        let mut reader = ByteReader::new(&bytes);
        reader.expect_magic(TABLE_MAGIC)?;
        let version = reader.read_u32()?;
        if version != TABLE_VERSION {
            return Err(TableError::UnsupportedVersion(version));
        }
        let name = reader.read_string()?;
        let info = TableInfo::decode(&mut reader)?;
        let keywords = Record::decode(&mut reader)?;
        let ncol = reader.read_u32()? as usize;
        let mut desc = TableDesc::new();
        for _ in 0..ncol {
            desc.add_column(ColumnDesc::decode(&mut reader)?)?;
        }
        let layouts = desc.columns().iter().map(ColumnDesc::layout).collect();
        let storage = read_storage(&mut reader, layouts)?;
        debug!("opened table {name} ({} rows) from {}", storage.nrow(), dir.display());
        let options = TableOptions {
            storage: StorageOptions {
                kind: storage.kind(),
                ..StorageOptions::default()
            },
            initial_rows: 0,
        };
        Ok(Self {
            name,
            path: Some(dir.to_path_buf()),
            desc,
            keywords,
            info,
            options,
            storage,
            changed: false,
        })
    }

    /// Writes pending changes of a table that lives on disk.
    pub fn flush(&mut self) -> TableResult<()> {
        match self.path.clone() {
            Some(path) if self.changed => self.save(path),
            _ => Ok(()),
        }
    }

    /// Copies schema, keywords, info and every cell into a new in-memory table using
    /// `storage`. The copy has no home on disk until it is saved.
    pub fn deep_copy(&self, name: impl Into<String>, storage: StorageOptions) -> TableResult<Table> {
        let nrow = self.nrow();
        let options = TableOptions {
            storage,
            initial_rows: nrow,
        };
        let mut copy = Table::create(name, self.desc.clone(), options)?;
        copy.keywords = self.keywords.clone();
        copy.info = self.info.clone();
        let rows = self.row_numbers();
        for index in 0..self.desc.len() {
            let cells = self.storage.get_rows(index, &rows)?;
            for (row, cell) in rows.iter().zip(cells) {
                if !matches!(cell, Cell::Undefined) {
                    copy.storage.put(index, *row, &cell)?;
                }
            }
        }
        debug!("copied table {} ({nrow} rows) into {}", self.name, copy.name);
        Ok(copy)
    }

    pub fn into_shared(self) -> SharedTable {
        SharedTable::new(self)
    }
}

impl TableView for Table {
    fn name(&self) -> &str {
        &self.name
    }

    fn nrow(&self) -> u64 {
        self.storage.nrow()
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
        self.storage.get(self.column_index(column)?, row)
    }

    fn get_cells(&self, column: &str, rows: &[u64]) -> TableResult<Vec<Cell>> {
        self.storage.get_rows(self.column_index(column)?, rows)
    }

    fn put_cell(&mut self, column: &str, row: u64, cell: Cell) -> TableResult<()> {
        let index = self.column_index(column)?;
        self.storage.put(index, row, &cell)?;
        self.changed = true;
        Ok(())
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

impl Drop for Table {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!("failed to flush table {} on close: {err}", self.name);
        }
    }
}

/// Shared handle on a table; reference tables keep their root alive through it.
#[derive(Clone, Debug)]
pub struct SharedTable(Arc<RwLock<Table>>);

impl SharedTable {
    pub fn new(table: Table) -> Self {
        Self(Arc::new(RwLock::new(table)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.0.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.0.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn ptr_eq(&self, other: &SharedTable) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn name(&self) -> String {
        self.read().name.clone()
    }

    pub fn nrow(&self) -> u64 {
        self.read().nrow()
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.read().path.clone()
    }
}
