//! Fixed-size pages of run-length encoded column values.
//!
//! A bucket holds, for every column of its storage manager, a sorted index of runs: the
//! (bucket-relative) row where each run starts and the offset of the run's value in the data
//! area. The first run of a column always starts at row 0. Page layout on disk:
//!
//! ```text
//! u32  offset of the index (high bit set when row numbers are 64-bit)
//! ..   data area
//! per column: u32 count, count row numbers (u32 or u64), count u32 offsets
//! ```

use crate::codec::{read_u32_at, write_u32_at, ByteReader};
use crate::error::{TableError, TableResult};
use log::trace;
use std::fmt;
use std::sync::Arc;

const UINT_SIZE: usize = 4;
const ROWNR_SIZE: usize = 8;
/// Index cost of one run: its start row and its data offset.
const ENTRY_SIZE: usize = UINT_SIZE + ROWNR_SIZE;
const WIDE_ROWS: u32 = 0x8000_0000;
const TYPE_MASK: u32 = 0xf000_0000;
const MAX_ROWNR32: u64 = u32::MAX as u64;

/// Length of one encoded value of a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemLength {
    Fixed(usize),
    /// The item starts with its own total length as a little-endian `u32`.
    Variable,
}

/// Page size and per-column item lengths shared by all buckets of one store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketLayout {
    pub bucket_size: usize,
    pub items: Vec<ItemLength>,
}

impl BucketLayout {
    pub fn new(bucket_size: usize, items: Vec<ItemLength>) -> Arc<Self> {
        Arc::new(Self { bucket_size, items })
    }

    pub fn ncolumn(&self) -> usize {
        self.items.len()
    }

    fn empty_index_len(&self) -> usize {
        UINT_SIZE + self.items.len() * UINT_SIZE
    }

    /// Largest item that can ever be stored in a page next to one minimal entry per column.
    pub fn max_item_len(&self) -> usize {
        self.bucket_size
            .saturating_sub(self.empty_index_len() + self.items.len() * ENTRY_SIZE)
    }
}

/// The run that contains a row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interval {
    /// First row of the run (bucket relative).
    pub start: u64,
    /// Last row of the run, inclusive.
    pub end: u64,
    /// Offset of the run's value in the data area.
    pub offset: usize,
    /// Position where `row` would be inserted in the row index.
    pub index: usize,
    /// Position of the run in the row index.
    pub run: usize,
}

/// First place where a column's row index is not strictly increasing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexViolation {
    pub column: usize,
    pub index: usize,
    pub row: u64,
    pub prev_row: u64,
}

/// Outcome of [`Bucket::split`].
#[derive(Clone, Debug)]
pub struct BucketSplit {
    pub left: Bucket,
    pub right: Bucket,
    /// Bucket-relative row where the right bucket starts.
    pub split_row: u64,
    /// Per column: whether the right bucket's first value is a copy of a value that also
    /// continues at the end of the left bucket.
    pub duplicated: Vec<bool>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bucket {
    layout: Arc<BucketLayout>,
    data: Vec<u8>,
    index_len: usize,
    rows: Vec<Vec<u64>>,
    offsets: Vec<Vec<u32>>,
}

impl Bucket {
    pub fn new(layout: Arc<BucketLayout>) -> Self {
        let ncol = layout.ncolumn();
        Self {
            index_len: layout.empty_index_len(),
            data: Vec::new(),
            rows: vec![Vec::new(); ncol],
            offsets: vec![Vec::new(); ncol],
            layout,
        }
    }

    pub fn layout(&self) -> &Arc<BucketLayout> {
        &self.layout
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    pub fn index_len(&self) -> usize {
        self.index_len
    }

    pub fn free_space(&self) -> usize {
        self.layout
            .bucket_size
            .saturating_sub(self.data.len() + self.index_len)
    }

    pub fn nused(&self, column: usize) -> usize {
        self.rows[column].len()
    }

    pub fn row_index(&self, column: usize) -> &[u64] {
        &self.rows[column]
    }

    pub fn offset_index(&self, column: usize) -> &[u32] {
        &self.offsets[column]
    }

    fn item_len_at(&self, column: usize, offset: usize) -> usize {
        match self.layout.items[column] {
            ItemLength::Fixed(len) => len,
            ItemLength::Variable => read_u32_at(&self.data, offset).unwrap_or(0) as usize,
        }
    }

    /// Raw bytes of the value of run `run` of `column`.
    pub fn item(&self, column: usize, run: usize) -> &[u8] {
        let offset = self.offsets[column][run] as usize;
        let len = self.item_len_at(column, offset);
        &self.data[offset..offset + len]
    }

    /// Finds the run holding `row`; `bucket_nrrow` closes the last run.
    pub fn get_interval(&self, column: usize, row: u64, bucket_nrrow: u64) -> Interval {
        let rows = &self.rows[column];
        let (index, run) = match rows.binary_search(&row) {
            Ok(i) => (i, i),
            Err(i) => (i, i.saturating_sub(1)),
        };
        let end = rows.get(run + 1).copied().unwrap_or(bucket_nrrow);
        Interval {
            start: rows[run],
            end: end - 1,
            offset: self.offsets[column][run] as usize,
            index,
            run,
        }
    }

    pub fn can_add_data(&self, len: usize) -> bool {
        self.data.len() + len + self.index_len + ENTRY_SIZE <= self.layout.bucket_size
    }

    /// Inserts a run starting at `row` at position `index` of the column's index.
    ///
    /// When the run at `index` starts at the same row, it is narrowed by one row at its front.
    /// Panics when the page cannot hold the item; callers check [`Bucket::can_add_data`].
    pub fn add_data(&mut self, column: usize, row: u64, index: usize, data: &[u8]) {
        assert!(
            self.can_add_data(data.len()),
            "bucket overflow adding {} bytes",
            data.len()
        );
        let rows = &mut self.rows[column];
        debug_assert!(index == 0 || rows[index - 1] < row);
        debug_assert!(index <= rows.len());
        if index < rows.len() && rows[index] == row {
            rows[index] += 1;
        }
        rows.insert(index, row);
        self.index_len += ENTRY_SIZE;
        let offset = self.insert_data(data);
        self.offsets[column].insert(index, offset);
    }

    pub fn can_replace_data(&self, new_len: usize, old_len: usize) -> bool {
        self.data.len() + new_len + self.index_len <= self.layout.bucket_size + old_len
    }

    /// Replaces the value of run `run`; panics when it does not fit.
    pub fn replace_data(&mut self, column: usize, run: usize, data: &[u8]) {
        let offset = self.offsets[column][run] as usize;
        let old_len = self.item_len_at(column, offset);
        assert!(
            self.can_replace_data(data.len(), old_len),
            "bucket overflow replacing {old_len} by {} bytes",
            data.len()
        );
        if old_len == data.len() {
            self.data[offset..offset + old_len].copy_from_slice(data);
        } else {
            self.remove_data(offset, old_len);
            let offset = self.insert_data(data);
            self.offsets[column][run] = offset;
        }
    }

    fn insert_data(&mut self, data: &[u8]) -> u32 {
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(data);
        offset
    }

    /// Compacts the data area, moving every later offset down by `len`.
    fn remove_data(&mut self, offset: usize, len: usize) {
        self.data.drain(offset..offset + len);
        if self.data.len() > offset {
            for offsets in &mut self.offsets {
                for item in offsets.iter_mut() {
                    if *item as usize > offset {
                        *item -= len as u32;
                    }
                }
            }
        }
    }

    /// Removes `nr` runs of `column` starting at index `index`, data included.
    pub fn shift_left(&mut self, column: usize, index: usize, nr: usize) {
        for i in 0..nr {
            let offset = self.offsets[column][index + i] as usize;
            let len = self.item_len_at(column, offset);
            self.remove_data(offset, len);
        }
        self.rows[column].drain(index..index + nr);
        self.offsets[column].drain(index..index + nr);
        self.index_len -= nr * ENTRY_SIZE;
    }

    /// Moves the start of run `run` to `row`, widening or narrowing it and its predecessor.
    pub fn set_run_start(&mut self, column: usize, run: usize, row: u64) {
        self.rows[column][run] = row;
    }

    /// Deletes one row from every column, dropping single-row runs and merging the runs that
    /// become adjacent when they hold identical bytes.
    pub fn remove_row(&mut self, row: u64, bucket_nrrow: u64) {
        for column in 0..self.rows.len() {
            let interval = self.get_interval(column, row, bucket_nrrow);
            let mut next = interval.run + 1;
            if interval.start == interval.end {
                self.shift_left(column, interval.run, 1);
                next = interval.run;
            }
            for start in &mut self.rows[column][next..] {
                *start -= 1;
            }
            if interval.start == interval.end
                && next > 0
                && next < self.rows[column].len()
                && self.item(column, next - 1) == self.item(column, next)
            {
                self.shift_left(column, next, 1);
            }
        }
    }

    /// Copies run `from_index` of `column` into `other` as a run at `to_row`/`to_index`.
    pub fn copy_data(
        &self,
        other: &mut Bucket,
        column: usize,
        to_row: u64,
        from_index: usize,
        to_index: usize,
    ) -> usize {
        let item = self.item(column, from_index);
        other.add_data(column, to_row, to_index, item);
        item.len()
    }

    fn last_row(&self) -> u64 {
        self.rows
            .iter()
            .filter_map(|rows| rows.last().copied())
            .max()
            .unwrap_or(0)
    }

    /// Split for appends: only possible when `row` is at or beyond the last run start.
    ///
    /// The left bucket is a copy of this one minus any run starting exactly at `row`; the
    /// right bucket starts at `row` with each column's last value.
    pub fn simple_split(&self, row: u64) -> Option<BucketSplit> {
        if row < self.last_row() {
            return None;
        }
        let mut left = self.clone();
        let mut right = Bucket::new(self.layout.clone());
        let mut duplicated = vec![true; self.rows.len()];
        for column in 0..self.rows.len() {
            let index = self.rows[column].len() - 1;
            self.copy_data(&mut right, column, 0, index, 0);
            if self.rows[column][index] == row {
                left.shift_left(column, index, 1);
                duplicated[column] = false;
            }
        }
        trace!("simple bucket split at row {row}");
        Some(BucketSplit {
            left,
            right,
            split_row: row,
            duplicated,
        })
    }

    /// Splits a full bucket in two so that a value of `len_to_add` bytes can be stored for
    /// `row` of `column`. `at_end` tells whether this is the last bucket of the store.
    pub fn split(
        &self,
        column: usize,
        row: u64,
        len_to_add: usize,
        bucket_nrrow: u64,
        at_end: bool,
    ) -> BucketSplit {
        assert!(bucket_nrrow > 1, "cannot split a bucket holding one row");
        if at_end {
            if let Some(split) = self.simple_split(row) {
                return split;
            }
        }
        let ncol = self.rows.len();
        let mut rows: Vec<u64> = Vec::with_capacity(1 + self.rows.iter().map(Vec::len).sum::<usize>());
        rows.push(row);
        for column_rows in &self.rows {
            rows.extend_from_slice(column_rows);
        }
        rows.sort_unstable();
        rows.dedup();
        let nruniq = rows.len();
        if nruniq == 1 {
            if let Some(split) = self.simple_split(row) {
                return split;
            }
        }

        // Encoded size of every (column, row) item, including its index entry.
        let mut item_len = vec![0usize; ncol * nruniq];
        let mut cursor = vec![0usize; ncol];
        let mut new_index = 0;
        for (j, &r) in rows.iter().enumerate() {
            for i in 0..ncol {
                if cursor[i] < self.rows[i].len() && self.rows[i][cursor[i]] == r {
                    let offset = self.offsets[i][cursor[i]] as usize;
                    item_len[j * ncol + i] = 2 * UINT_SIZE + self.item_len_at(i, offset);
                    cursor[i] += 1;
                }
            }
            if r == row {
                new_index = j;
            }
        }
        let slot = new_index * ncol + column;
        if item_len[slot] == 0 {
            item_len[slot] = len_to_add + 2 * UINT_SIZE;
        } else {
            item_len[slot] += len_to_add;
        }

        let mut size = vec![0usize; ncol];
        let mut row_len = vec![0usize; nruniq];
        let mut cum_len = vec![0usize; nruniq];
        let mut total = 0usize;
        for j in 0..nruniq {
            for i in 0..ncol {
                let len = item_len[j * ncol + i];
                if len != 0 {
                    size[i] = len;
                    total += len;
                }
                row_len[j] += size[i];
            }
            cum_len[j] = total;
        }
        let mut index = Self::get_split(total, &row_len, &cum_len);

        let mut left = Bucket::new(self.layout.clone());
        let mut right = Bucket::new(self.layout.clone());
        let mut cursor = vec![0usize; ncol];
        for &r in &rows[..index] {
            for (i, at) in cursor.iter_mut().enumerate() {
                if *at < self.rows[i].len() && self.rows[i][*at] == r {
                    self.copy_data(&mut left, i, r, *at, *at);
                    *at += 1;
                }
            }
        }

        let split_row = rows[index];
        let mut duplicated = vec![false; ncol];
        for (i, at) in cursor.iter_mut().enumerate() {
            if *at < self.rows[i].len() && self.rows[i][*at] == split_row {
                self.copy_data(&mut right, i, 0, *at, 0);
                *at += 1;
            } else {
                self.copy_data(&mut right, i, 0, *at - 1, 0);
                duplicated[i] = true;
            }
        }
        let mut to_cursor = vec![1usize; ncol];
        index += 1;
        while index < nruniq {
            let r = rows[index];
            for i in 0..ncol {
                if cursor[i] < self.rows[i].len() && self.rows[i][cursor[i]] == r {
                    self.copy_data(&mut right, i, r - split_row, cursor[i], to_cursor[i]);
                    cursor[i] += 1;
                    to_cursor[i] += 1;
                }
            }
            index += 1;
        }
        trace!("general bucket split at row {split_row} of {nruniq} distinct rows");
        BucketSplit {
            left,
            right,
            split_row,
            duplicated,
        }
    }

    /// Index in `row_len`/`cum_len` where left and right halves have about the same size.
    ///
    /// Splitting at `i` gives a left bucket of `cum_len[i-1]` bytes and a right bucket of
    /// `row_len[i] + total - cum_len[i]` bytes (its start values included).
    pub fn get_split(total: usize, row_len: &[usize], cum_len: &[usize]) -> usize {
        let nr = row_len.len();
        if nr <= 2 {
            return 1;
        }
        let total = total as i64;
        let row = |i: usize| row_len[i] as i64;
        let cum = |i: usize| cum_len[i] as i64;
        let mut i = 1;
        let mut diff = 0i64;
        while cum(i - 1) < row(i) + total - cum(i) && i < nr - 1 {
            diff = row(i) + total - cum(i) - cum(i - 1);
            i += 1;
        }
        if diff > 0 && cum(i - 1) + cum(i) - row(i) - total > diff {
            i -= 1;
        }
        i
    }

    /// Serializes into a page of exactly `bucket_size` bytes.
    pub fn write(&self) -> Vec<u8> {
        let use32 = self
            .rows
            .iter()
            .all(|rows| rows.last().map_or(true, |&last| last <= MAX_ROWNR32));
        let mut page = Vec::with_capacity(self.layout.bucket_size);
        let index_offset = (self.data.len() + UINT_SIZE) as u32;
        let word = if use32 {
            index_offset
        } else {
            index_offset | WIDE_ROWS
        };
        page.extend_from_slice(&word.to_le_bytes());
        page.extend_from_slice(&self.data);
        for (rows, offsets) in self.rows.iter().zip(&self.offsets) {
            page.extend_from_slice(&(rows.len() as u32).to_le_bytes());
            for &row in rows {
                if use32 {
                    page.extend_from_slice(&(row as u32).to_le_bytes());
                } else {
                    page.extend_from_slice(&row.to_le_bytes());
                }
            }
            for &offset in offsets {
                page.extend_from_slice(&offset.to_le_bytes());
            }
        }
        debug_assert!(page.len() <= self.layout.bucket_size);
        page.resize(self.layout.bucket_size.max(page.len()), 0);
        page
    }

    pub fn read(layout: Arc<BucketLayout>, page: &[u8]) -> TableResult<Bucket> {
        let mut reader = ByteReader::new(page);
        let word = reader.read_u32()?;
        let use32 = word & TYPE_MASK == 0;
        let index_offset = (word & !TYPE_MASK) as usize;
        let data_len = index_offset
            .checked_sub(UINT_SIZE)
            .ok_or_else(|| TableError::Corrupt(format!("bucket index offset {index_offset}")))?;
        let data = reader.read_bytes(data_len)?.to_vec();
        let ncol = layout.ncolumn();
        let mut index_len = UINT_SIZE;
        let mut rows = Vec::with_capacity(ncol);
        let mut offsets = Vec::with_capacity(ncol);
        for column in 0..ncol {
            let nused = reader.read_u32()? as usize;
            index_len += UINT_SIZE + nused * ENTRY_SIZE;
            if nused > reader.remaining() / 8 {
                return Err(TableError::Corrupt(format!(
                    "bucket column {column} claims {nused} runs"
                )));
            }
            let mut column_rows = Vec::with_capacity(nused);
            for _ in 0..nused {
                column_rows.push(if use32 {
                    u64::from(reader.read_u32()?)
                } else {
                    reader.read_u64()?
                });
            }
            let mut column_offsets = Vec::with_capacity(nused);
            for _ in 0..nused {
                let offset = reader.read_u32()?;
                if offset as usize > data_len {
                    return Err(TableError::Corrupt(format!(
                        "bucket offset {offset} beyond data of {data_len} bytes"
                    )));
                }
                column_offsets.push(offset);
            }
            rows.push(column_rows);
            offsets.push(column_offsets);
        }
        Ok(Bucket {
            layout,
            data,
            index_len,
            rows,
            offsets,
        })
    }

    pub fn first_violation(&self) -> Option<IndexViolation> {
        self.rows.iter().enumerate().find_map(|(column, rows)| {
            rows.windows(2)
                .position(|pair| pair[1] <= pair[0])
                .map(|i| IndexViolation {
                    column,
                    index: i + 1,
                    row: rows[i + 1],
                    prev_row: rows[i],
                })
        })
    }

    /// Whether every column's row index is strictly increasing.
    pub fn check(&self) -> bool {
        self.first_violation().is_none()
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (rows, offsets) in self.rows.iter().zip(&self.offsets) {
            writeln!(f, "  rows: {rows:?}")?;
            writeln!(f, "  offs: {offsets:?}")?;
        }
        Ok(())
    }
}

/// Prefixes a variable-length payload with the item's total length.
pub(crate) fn frame_variable(payload: &[u8]) -> Vec<u8> {
    let mut item = vec![0u8; UINT_SIZE];
    item.extend_from_slice(payload);
    let len = item.len() as u32;
    write_u32_at(&mut item, 0, len);
    item
}

/// Payload of a variable-length item, without its length word.
pub(crate) fn unframe_variable(item: &[u8]) -> &[u8] {
    item.get(UINT_SIZE..).unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_point_balances_cumulative_lengths() {
        assert_eq!(Bucket::get_split(30, &[10, 10], &[10, 20]), 1);
        // Five equal rows of 10 bytes: left gets three rows (30 bytes), right gets two plus
        // its start values (20 bytes).
        let row_len = [10; 5];
        let cum_len = [10, 20, 30, 40, 50];
        assert_eq!(Bucket::get_split(50, &row_len, &cum_len), 3);
    }
}
