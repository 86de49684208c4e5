//! Reference tables: row and column views over a root table.
//!
//! A view never nests storage. Whatever it is built from, its row numbers are always expressed
//! in terms of the physical root table, and its columns map to root columns by name.

use crate::codec::{put_string, put_u32, put_u64, ByteReader};
use crate::column::{ColumnDesc, TableColumn, TableColumnMut, TableDesc};
use crate::error::{TableError, TableResult};
use crate::record::Record;
use crate::rowset::{is_strictly_ascending, row_and, row_not, row_or, row_sub, row_xor};
use crate::storage::{check_row, Cell};
use crate::table::{SharedTable, Table, TableInfo, TableView};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

const REF_MAGIC: &[u8] = b"RefTable";
pub(crate) const REF_FILE: &str = "reftable.dat";

/// Maximum number of row numbers written or read in one piece.
pub const ROW_CHUNK: usize = 1 << 20;

const NARROW_LIMIT: u64 = u32::MAX as u64;

/// On-disk form of a reference table.
///
/// Version 1 has no column-order list, version 2 stores row counts and row numbers in 32 bits
/// and version 3 in 64 bits.
#[derive(Clone, Debug, PartialEq)]
pub struct RefTableDescriptor {
    pub version: u32,
    /// Path of the root table, relative to the directory holding the descriptor.
    pub root_path: String,
    /// View column name to root column name.
    pub name_map: BTreeMap<String, String>,
    /// View column names in order of appearance.
    pub columns: Vec<String>,
    pub root_nrow: u64,
    pub row_order: bool,
    pub rows: Vec<u64>,
    pub info: TableInfo,
}

impl RefTableDescriptor {
    /// Picks the narrowest version that can hold the row numbers.
    pub fn select_version(nrrow: u64, root_nrow: u64, rows: &[u64]) -> u32 {
        if nrrow < NARROW_LIMIT
            && root_nrow < NARROW_LIMIT
            && rows.iter().all(|&row| row < NARROW_LIMIT)
        {
            2
        } else {
            3
        }
    }

    pub fn encode(&self) -> TableResult<Vec<u8>> {
        if !(1..=3).contains(&self.version) {
            return Err(TableError::UnsupportedVersion(self.version));
        }
        let mut buf = Vec::with_capacity(64 + self.rows.len() * 8);
        buf.extend_from_slice(REF_MAGIC);
        put_u32(&mut buf, self.version);
        put_string(&mut buf, &self.root_path)?;
        put_u32(&mut buf, self.name_map.len() as u32);
        for (name, root_name) in &self.name_map {
            put_string(&mut buf, name)?;
            put_string(&mut buf, root_name)?;
        }
        if self.version > 1 {
            put_u32(&mut buf, self.columns.len() as u32);
            for name in &self.columns {
                put_string(&mut buf, name)?;
            }
        }
        let nrrow = self.rows.len() as u64;
        if self.version > 2 {
            put_u64(&mut buf, self.root_nrow);
            buf.push(self.row_order as u8);
            put_u64(&mut buf, nrrow);
            for chunk in self.rows.chunks(ROW_CHUNK) {
                for &row in chunk {
                    put_u64(&mut buf, row);
                }
            }
        } else {
            put_u32(&mut buf, narrow(self.root_nrow)?);
            buf.push(self.row_order as u8);
            put_u32(&mut buf, narrow(nrrow)?);
            for chunk in self.rows.chunks(ROW_CHUNK) {
                for &row in chunk {
                    put_u32(&mut buf, narrow(row)?);
                }
            }
        }
        self.info.encode(&mut buf)?;
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> TableResult<Self> {
        let mut reader = ByteReader::new(bytes);
        reader.expect_magic(REF_MAGIC)?;
        let version = reader.read_u32()?;
        if version == 0 || version > 3 {
            return Err(TableError::UnsupportedVersion(version));
        }
        let root_path = reader.read_string()?;
        let nmap = reader.read_u32()? as usize;
        let mut name_map = BTreeMap::new();
        for _ in 0..nmap {
            let name = reader.read_string()?;
            let root_name = reader.read_string()?;
            name_map.insert(name, root_name);
        }
        let mut columns = Vec::new();
        if version > 1 {
            let ncol = reader.read_u32()? as usize;
            for _ in 0..ncol {
                columns.push(reader.read_string()?);
            }
        }
        let (root_nrow, row_order, nrrow) = if version > 2 {
            let root_nrow = reader.read_u64()?;
            let row_order = reader.read_u8()? != 0;
            (root_nrow, row_order, reader.read_u64()?)
        } else {
            let root_nrow = u64::from(reader.read_u32()?);
            let row_order = reader.read_u8()? != 0;
            (root_nrow, row_order, u64::from(reader.read_u32()?))
        };
        let width = if version > 2 { 8 } else { 4 };
        let nrrow = usize::try_from(nrrow)
            .ok()
            .filter(|&n| n.checked_mul(width).is_some_and(|len| len <= reader.remaining()))
            .ok_or_else(|| TableError::Corrupt(format!("reference table claims {nrrow} rows")))?;
        let mut rows = Vec::with_capacity(nrrow);
        while rows.len() < nrrow {
            let todo = (nrrow - rows.len()).min(ROW_CHUNK);
            for _ in 0..todo {
                let row = if version > 2 {
                    reader.read_u64()?
                } else {
                    u64::from(reader.read_u32()?)
                };
                rows.push(row);
            }
        }
        let info = TableInfo::decode(&mut reader)?;
        Ok(Self {
            version,
            root_path,
            name_map,
            columns,
            root_nrow,
            row_order,
            rows,
            info,
        })
    }
}

fn narrow(value: u64) -> TableResult<u32> {
    u32::try_from(value)
        .map_err(|_| TableError::Invalid(format!("row number {value} does not fit in 32 bits")))
}

/// A view selecting and possibly reordering rows, and projecting or renaming columns, of a
/// root table.
#[derive(Debug)]
pub struct RefTable {
    name: String,
    path: Option<PathBuf>,
    root: SharedTable,
    desc: TableDesc,
    name_map: BTreeMap<String, String>,
    keywords: Record,
    info: TableInfo,
    rows: Vec<u64>,
    row_order: bool,
    changed: bool,
}

/// What a new view inherits from the table it is built from.
struct Parent {
    root: SharedTable,
    name: String,
    desc: TableDesc,
    name_map: BTreeMap<String, String>,
    keywords: Record,
    info: TableInfo,
    rows: Vec<u64>,
    row_order: bool,
}

impl Parent {
    fn of_root(root: &SharedTable) -> Self {
        let table = root.read();
        let desc = table.desc().clone();
        let name_map = desc
            .columns()
            .iter()
            .map(|column| (column.name.clone(), column.name.clone()))
            .collect();
        Self {
            root: root.clone(),
            name: table.name().to_string(),
            desc,
            name_map,
            keywords: table.keywords().clone(),
            info: table.info().clone(),
            rows: table.row_numbers(),
            row_order: true,
        }
    }

    fn of_view(view: &RefTable) -> Self {
        Self {
            root: view.root.clone(),
            name: view.name.clone(),
            desc: view.desc.clone(),
            name_map: view.name_map.clone(),
            keywords: view.keywords.clone(),
            info: view.info.clone(),
            rows: view.rows.clone(),
            row_order: view.row_order,
        }
    }

    fn nrow(&self) -> u64 {
        self.rows.len() as u64
    }

    /// Re-expresses row numbers of the parent as row numbers of the root.
    fn adjust(&self, rows: &mut [u64]) {
        for row in rows.iter_mut() {
            *row = self.rows[*row as usize];
        }
    }

    fn into_view(self, rows: Vec<u64>, row_order: bool) -> RefTable {
        RefTable {
            name: self.name,
            path: None,
            root: self.root,
            desc: self.desc,
            name_map: self.name_map,
            keywords: self.keywords,
            info: self.info,
            rows,
            row_order,
            changed: true,
        }
    }

    fn select(self, rows: &[u64]) -> TableResult<RefTable> {
        let nrow = self.nrow();
        for &row in rows {
            check_row(row, nrow)?;
        }
        let mut rows = rows.to_vec();
        self.adjust(&mut rows);
        let row_order = is_strictly_ascending(&rows);
        Ok(self.into_view(rows, row_order))
    }

    fn select_mask(self, mask: &[bool]) -> RefTable {
        let count = mask.len().min(self.rows.len());
        let mut rows: Vec<u64> = mask[..count]
            .iter()
            .enumerate()
            .filter(|(_, &keep)| keep)
            .map(|(row, _)| row as u64)
            .collect();
        self.adjust(&mut rows);
        let row_order = self.row_order || is_strictly_ascending(&rows);
        self.into_view(rows, row_order)
    }

    fn project(mut self, columns: &[&str]) -> TableResult<RefTable> {
        let mut desc = TableDesc::new();
        let mut name_map = BTreeMap::new();
        for &name in columns {
            let column = self
                .desc
                .column(name)
                .ok_or_else(|| TableError::UnknownColumn(name.to_string()))?;
            desc.add_column(column.clone())?;
            let root_name = self
                .name_map
                .get(name)
                .ok_or_else(|| TableError::UnknownColumn(name.to_string()))?;
            name_map.insert(name.to_string(), root_name.clone());
        }
        self.desc = desc;
        self.name_map = name_map;
        let rows = std::mem::take(&mut self.rows);
        let row_order = self.row_order;
        Ok(self.into_view(rows, row_order))
    }
}

impl RefTable {
    /// View on all rows and columns of `root`.
    pub fn full(root: &SharedTable) -> Self {
        let parent = Parent::of_root(root);
        let rows = parent.rows.clone();
        parent.into_view(rows, true)
    }

    /// View on the given rows of `root`, in the given order.
    pub fn from_rows(root: &SharedTable, rows: &[u64]) -> TableResult<Self> {
        Parent::of_root(root).select(rows)
    }

    /// View on the rows of `root` whose mask entry is set; a short mask selects nothing past
    /// its end and a long one is cut at the row count.
    pub fn from_mask(root: &SharedTable, mask: &[bool]) -> Self {
        Parent::of_root(root).select_mask(mask)
    }

    /// View on all rows of `root` showing only `columns`.
    pub fn project(root: &SharedTable, columns: &[&str]) -> TableResult<Self> {
        Parent::of_root(root).project(columns)
    }

    /// View on some rows of this view; row numbers refer to this view.
    pub fn select_rows(&self, rows: &[u64]) -> TableResult<Self> {
        Parent::of_view(self).select(rows)
    }

    pub fn select_mask(&self, mask: &[bool]) -> Self {
        Parent::of_view(self).select_mask(mask)
    }

    pub fn select_columns(&self, columns: &[&str]) -> TableResult<Self> {
        Parent::of_view(self).project(columns)
    }

    pub fn root(&self) -> &SharedTable {
        &self.root
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn desc(&self) -> &TableDesc {
        &self.desc
    }

    pub fn info(&self) -> &TableInfo {
        &self.info
    }

    pub fn info_mut(&mut self) -> &mut TableInfo {
        self.changed = true;
        &mut self.info
    }

    /// Root column name behind a view column.
    pub fn root_column(&self, name: &str) -> TableResult<&str> {
        self.name_map
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| TableError::UnknownColumn(name.to_string()))
    }

    pub fn name_map(&self) -> &BTreeMap<String, String> {
        &self.name_map
    }

    /// True when the row numbers are strictly ascending.
    pub fn row_order(&self) -> bool {
        self.row_order
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn column(&self, name: &str) -> TableResult<TableColumn<'_>> {
        TableColumn::new(self, name)
    }

    pub fn column_mut(&mut self, name: &str) -> TableResult<TableColumnMut<'_>> {
        TableColumnMut::new(self, name)
    }

    /// Appends a root row number.
    pub fn add_rownr(&mut self, row: u64) -> TableResult<()> {
        check_row(row, self.root.nrow())?;
        let len = self.rows.len();
        if len == self.rows.capacity() {
            let target = (len + 1024).max(len + len / 5);
            self.rows.reserve_exact(target - len);
        }
        if self.rows.last().is_some_and(|&last| last >= row) {
            self.row_order = false;
        }
        self.rows.push(row);
        self.changed = true;
        Ok(())
    }

    /// Appends the root rows `start..=end`.
    pub fn add_rownr_range(&mut self, start: u64, end: u64) -> TableResult<()> {
        if start > end {
            return Err(TableError::Invalid(format!("empty row range {start}..={end}")));
        }
        check_row(end, self.root.nrow())?;
        if self.rows.last().is_some_and(|&last| last >= start) {
            self.row_order = false;
        }
        self.rows.extend(start..=end);
        self.changed = true;
        Ok(())
    }

    /// Keeps only the first `nrrow` rows.
    pub fn set_nrrow(&mut self, nrrow: u64) -> TableResult<()> {
        if nrrow > self.nrow() {
            return Err(TableError::Invalid(format!(
                "cannot grow reference table from {} to {nrrow} rows",
                self.nrow()
            )));
        }
        self.rows.truncate(nrrow as usize);
        self.changed = true;
        Ok(())
    }

    /// Removes a row from the view; the root is untouched.
    pub fn remove_row(&mut self, row: u64) -> TableResult<()> {
        check_row(row, self.nrow())?;
        self.rows.remove(row as usize);
        self.changed = true;
        Ok(())
    }

    pub fn remove_all_rows(&mut self) {
        self.rows.clear();
        self.row_order = true;
        self.changed = true;
    }

    /// Root row numbers of the given rows of this view.
    pub fn root_rownrs(&self, rows: &[u64]) -> TableResult<Vec<u64>> {
        rows.iter().map(|&row| self.root_row(row)).collect()
    }

    /// Rewrites `rows` in place from row numbers of this view to root row numbers and, when
    /// asked, reports whether the result is strictly ascending.
    pub fn adjust_rownrs(&self, rows: &mut [u64], determine_order: bool) -> TableResult<bool> {
        let nrow = self.nrow();
        for row in rows.iter_mut() {
            check_row(*row, nrow)?;
            *row = self.rows[*row as usize];
        }
        Ok(determine_order && is_strictly_ascending(rows))
    }

    /// Adds a column to the view. A column the root lacks is added to the root as well when
    /// `add_to_root` is set.
    pub fn add_column(&mut self, column: ColumnDesc, add_to_root: bool) -> TableResult<()> {
        if self.desc.column(&column.name).is_some() {
            return Err(TableError::DuplicateColumn(column.name));
        }
        let in_root = self.root.read().desc().column(&column.name).is_some();
        if !in_root {
            if !add_to_root {
                return Err(TableError::Invalid(format!(
                    "column {} does not exist in the root table and may not be added to it",
                    column.name
                )));
            }
            self.root.write().add_column(column.clone())?;
        }
        self.name_map.insert(column.name.clone(), column.name.clone());
        self.desc.add_column(column)?;
        self.changed = true;
        Ok(())
    }

    /// Removes a column from the view only.
    pub fn remove_column(&mut self, name: &str) -> TableResult<()> {
        self.desc.remove_column(name)?;
        self.name_map.remove(name);
        self.changed = true;
        Ok(())
    }

    pub fn rename_column(&mut self, old: &str, new: &str) -> TableResult<()> {
        self.desc.rename_column(old, new)?;
        if let Some(root_name) = self.name_map.remove(old) {
            self.name_map.insert(new.to_string(), root_name);
        }
        self.changed = true;
        Ok(())
    }

    fn combine(&self, other: &RefTable, op: fn(&[u64], &[u64]) -> Vec<u64>) -> TableResult<RefTable> {
        if !self.root.ptr_eq(&other.root) {
            return Err(TableError::DifferentRoot);
        }
        let left = self.sorted_rows();
        let right = other.sorted_rows();
        let rows = op(&left, &right);
        Ok(Parent::of_view(self).into_view(rows, true))
    }

    fn sorted_rows(&self) -> Vec<u64> {
        let mut rows = self.rows.clone();
        if !self.row_order {
            rows.sort_unstable();
            rows.dedup();
        }
        rows
    }

    /// Rows in both views.
    pub fn and(&self, other: &RefTable) -> TableResult<RefTable> {
        self.combine(other, row_and)
    }

    /// Rows in either view.
    pub fn or(&self, other: &RefTable) -> TableResult<RefTable> {
        self.combine(other, row_or)
    }

    /// Rows of this view that are not in `other`.
    pub fn sub(&self, other: &RefTable) -> TableResult<RefTable> {
        self.combine(other, row_sub)
    }

    /// Rows in exactly one of the views.
    pub fn xor(&self, other: &RefTable) -> TableResult<RefTable> {
        self.combine(other, row_xor)
    }

    /// Root rows that are not in this view.
    pub fn not(&self) -> RefTable {
        let rows = row_not(&self.sorted_rows(), self.root.nrow());
        Parent::of_view(self).into_view(rows, true)
    }

    pub fn descriptor(&self, root_path: impl Into<String>) -> RefTableDescriptor {
        let root_nrow = self.root.nrow();
        RefTableDescriptor {
            version: RefTableDescriptor::select_version(self.nrow(), root_nrow, &self.rows),
            root_path: root_path.into(),
            name_map: self.name_map.clone(),
            columns: self.desc.columns().iter().map(|c| c.name.clone()).collect(),
            root_nrow,
            row_order: self.row_order,
            rows: self.rows.clone(),
            info: self.info.clone(),
        }
    }

    /// Writes the view descriptor into directory `dir`. The root must have been saved.
    pub fn save(&mut self, dir: impl AsRef<Path>) -> TableResult<()> {
        let dir = dir.as_ref();
        let root_dir = self
            .root
            .path()
            .ok_or_else(|| TableError::NotPersistent(self.root.name()))?;
        fs::create_dir_all(dir)?;
        let root_path = relative_path(dir, &root_dir);
        let descriptor = self.descriptor(root_path.to_string_lossy());
        let bytes = descriptor.encode()?;
        fs::write(dir.join(REF_FILE), &bytes)?;
        debug!(
            "saved reference table {} (version {}, {} rows) to {}",
            self.name,
            descriptor.version,
            self.rows.len(),
            dir.display()
        );
        self.path = Some(dir.to_path_buf());
        self.changed = false;
        Ok(())
    }

    /// Opens a saved view together with its root table.
    pub fn open(dir: impl AsRef<Path>) -> TableResult<Self> {
        let dir = dir.as_ref();
        let descriptor = RefTableDescriptor::decode(&fs::read(dir.join(REF_FILE))?)?;
        let root = Table::open(dir.join(&descriptor.root_path))?.into_shared();
        Self::from_descriptor(descriptor, root, dir)
    }

    /// Opens a saved view on a root table that is already open.
    pub fn open_with_root(dir: impl AsRef<Path>, root: &SharedTable) -> TableResult<Self> {
        let dir = dir.as_ref();
        let descriptor = RefTableDescriptor::decode(&fs::read(dir.join(REF_FILE))?)?;
        Self::from_descriptor(descriptor, root.clone(), dir)
    }

    fn from_descriptor(descriptor: RefTableDescriptor, root: SharedTable, dir: &Path) -> TableResult<Self> {
        let root_nrow = root.nrow();
        if descriptor.root_nrow > root_nrow {
            return Err(TableError::RootShrunk {
                expected: descriptor.root_nrow,
                actual: root_nrow,
            });
        }
        let RefTableDescriptor {
            mut name_map,
            mut columns,
            rows,
            row_order,
            info,
            ..
        } = descriptor;
        if columns.is_empty() {
            columns = name_map.keys().cloned().collect();
        }
        let (name, keywords, desc) = {
            let table = root.read();
            let mut desc = TableDesc::new();
            for view_name in &columns {
                let Some(root_name) = name_map.get(view_name) else {
                    return Err(TableError::Corrupt(format!(
                        "column {view_name} missing from the name map"
                    )));
                };
                match table.desc().column(root_name) {
                    Some(column) => {
                        let mut column = column.clone();
                        column.name = view_name.clone();
                        desc.add_column(column)?;
                    }
                    None => {
                        warn!("column {root_name} disappeared from root table {}", table.name());
                        name_map.remove(view_name);
                    }
                }
            }
            (table.name().to_string(), table.keywords().clone(), desc)
        };
        debug!("opened reference table on {name} ({} rows) from {}", rows.len(), dir.display());
        Ok(Self {
            name,
            path: Some(dir.to_path_buf()),
            root,
            desc,
            name_map,
            keywords,
            info,
            rows,
            row_order,
            changed: false,
        })
    }

    /// Writes pending changes of a view that lives on disk.
    pub fn flush(&mut self) -> TableResult<()> {
        match self.path.clone() {
            Some(path) if self.changed => self.save(path),
            _ => Ok(()),
        }
    }
}

impl TableView for RefTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn nrow(&self) -> u64 {
        self.rows.len() as u64
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
        let root_name = self.root_column(column)?;
        let root_row = self.root_row(row)?;
        self.root.read().get_cell(root_name, root_row)
    }

    fn get_cells(&self, column: &str, rows: &[u64]) -> TableResult<Vec<Cell>> {
        let root_name = self.root_column(column)?;
        let root_rows = self.root_rownrs(rows)?;
        self.root.read().get_cells(root_name, &root_rows)
    }

    fn put_cell(&mut self, column: &str, row: u64, cell: Cell) -> TableResult<()> {
        let root_name = self.root_column(column)?.to_string();
        let root_row = self.root_row(row)?;
        self.root.write().put_cell(&root_name, root_row, cell)
    }

    fn keywords(&self) -> &Record {
        &self.keywords
    }

    fn row_numbers(&self) -> Vec<u64> {
        self.rows.clone()
    }

    fn root_row(&self, row: u64) -> TableResult<u64> {
        check_row(row, self.nrow())?;
        Ok(self.rows[row as usize])
    }

    fn is_reference(&self) -> bool {
        true
    }
}

impl Drop for RefTable {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!("failed to flush reference table {} on close: {err}", self.name);
        }
    }
}

/// Path of `target` relative to directory `base`.
fn relative_path(base: &Path, target: &Path) -> PathBuf {
    let base = fs::canonicalize(base).unwrap_or_else(|_| base.to_path_buf());
    let target = fs::canonicalize(target).unwrap_or_else(|_| target.to_path_buf());
    let base: Vec<Component<'_>> = base.components().collect();
    let target: Vec<Component<'_>> = target.components().collect();
    let common = base
        .iter()
        .zip(&target)
        .take_while(|(left, right)| left == right)
        .count();
    let mut path = PathBuf::new();
    for _ in common..base.len() {
        path.push("..");
    }
    for component in &target[common..] {
        path.push(component.as_os_str());
    }
    if path.as_os_str().is_empty() {
        path.push(".");
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths() {
        assert_eq!(
            relative_path(Path::new("/data/views/sel"), Path::new("/data/tables/main")),
            PathBuf::from("../../tables/main")
        );
        assert_eq!(relative_path(Path::new("/data"), Path::new("/data/t")), PathBuf::from("t"));
    }

    #[test]
    fn version_boundaries() {
        let limit = u32::MAX as u64;
        assert_eq!(RefTableDescriptor::select_version(3, limit - 1, &[0, 1, limit - 1]), 2);
        assert_eq!(RefTableDescriptor::select_version(3, limit, &[0, 1, 2]), 3);
        assert_eq!(RefTableDescriptor::select_version(1, limit + 1, &[limit]), 3);
    }
}
