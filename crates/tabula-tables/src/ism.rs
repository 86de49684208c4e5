use crate::array::ArrayValue;
use crate::bucket::{frame_variable, unframe_variable, Bucket, BucketLayout, IndexViolation, ItemLength};
use crate::codec::{decode_array_data, decode_scalar, encode_array_data, encode_scalar, put_u64, ByteReader};
use crate::column::ColumnKind;
use crate::error::{TableError, TableResult};
use crate::indirect::ArrayHeap;
use crate::storage::{check_column, check_row, Cell, ColumnLayout, StorageKind, StorageManager};
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

const SLOT_SIZE: usize = 8;

/// Incremental storage manager: each column is stored as runs of equal values.
///
/// Rows are partitioned over buckets keyed by their first row. A value is only stored again
/// when it differs from the value of the previous row, which makes slowly changing columns
/// (time stamps, flags, ids) very cheap. Variable-shape arrays live in a per-column
/// [`ArrayHeap`]; the buckets hold their slot numbers.
#[derive(Debug, Clone)]
pub struct IncrementalStore {
    layout: Arc<BucketLayout>,
    columns: Vec<ColumnLayout>,
    buckets: BTreeMap<u64, Bucket>,
    heaps: Vec<ArrayHeap>,
    nrow: u64,
}

fn item_length(column: &ColumnLayout) -> ItemLength {
    match &column.kind {
        ColumnKind::Scalar => column
            .data_type
            .fixed_size()
            .map_or(ItemLength::Variable, ItemLength::Fixed),
        ColumnKind::FixedArray(shape) => column
            .data_type
            .fixed_size()
            .map_or(ItemLength::Variable, |size| {
                ItemLength::Fixed(size * shape.nelements())
            }),
        ColumnKind::VarArray { .. } => ItemLength::Fixed(SLOT_SIZE),
    }
}

impl IncrementalStore {
    pub fn new(bucket_size: usize, columns: Vec<ColumnLayout>) -> TableResult<Self> {
        let layout = BucketLayout::new(bucket_size, columns.iter().map(item_length).collect());
        for item in &layout.items {
            if let ItemLength::Fixed(len) = *item {
                if len > layout.max_item_len() {
                    return Err(TableError::ValueTooLarge { len, bucket_size });
                }
            }
        }
        let heaps = columns.iter().map(|_| ArrayHeap::new()).collect();
        Ok(Self {
            layout,
            columns,
            buckets: BTreeMap::new(),
            heaps,
            nrow: 0,
        })
    }

    pub fn bucket_size(&self) -> usize {
        self.layout.bucket_size
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Buckets with the first row they hold.
    pub fn buckets(&self) -> impl Iterator<Item = (u64, &Bucket)> {
        self.buckets.iter().map(|(&start, bucket)| (start, bucket))
    }

    /// First bucket whose row index is not strictly increasing, if any.
    /// Array heap of a variable-shape column.
    pub fn heap(&self, column: usize) -> Option<&ArrayHeap> {
        match self.columns.get(column)?.kind {
            ColumnKind::VarArray { .. } => self.heaps.get(column),
            _ => None,
        }
    }

    pub fn first_violation(&self) -> Option<(u64, IndexViolation)> {
        self.buckets
            .iter()
            .find_map(|(&start, bucket)| bucket.first_violation().map(|v| (start, v)))
    }

    pub fn check(&self) -> bool {
        self.first_violation().is_none()
    }

    /// Start row and row count of the bucket holding `row`.
    fn locate(&self, row: u64) -> TableResult<(u64, u64)> {
        let (&start, _) = self
            .buckets
            .range(..=row)
            .next_back()
            .ok_or_else(|| TableError::Corrupt(format!("no bucket holds row {row}")))?;
        let end = self
            .buckets
            .range(start + 1..)
            .next()
            .map_or(self.nrow, |(&next, _)| next);
        Ok((start, end - start))
    }

    fn bucket(&self, start: u64) -> TableResult<&Bucket> {
        self.buckets
            .get(&start)
            .ok_or_else(|| TableError::Corrupt(format!("missing bucket at row {start}")))
    }

    fn bucket_mut(&mut self, start: u64) -> TableResult<&mut Bucket> {
        self.buckets
            .get_mut(&start)
            .ok_or_else(|| TableError::Corrupt(format!("missing bucket at row {start}")))
    }

    fn decode(&self, column: usize, item: &[u8]) -> TableResult<Cell> {
        let layout = &self.columns[column];
        let payload = match self.layout.items[column] {
            ItemLength::Fixed(_) => item,
            ItemLength::Variable => unframe_variable(item),
        };
        let mut reader = ByteReader::new(payload);
        match &layout.kind {
            ColumnKind::Scalar => Ok(Cell::Scalar(decode_scalar(layout.data_type, &mut reader)?)),
            ColumnKind::FixedArray(shape) => {
                let data = decode_array_data(layout.data_type, shape.nelements(), &mut reader)?;
                Ok(Cell::Array(ArrayValue::new(shape.clone(), data)?))
            }
            ColumnKind::VarArray { .. } => match reader.read_u64()? {
                0 => Ok(Cell::Undefined),
                slot => self.heaps[column]
                    .get(slot)
                    .cloned()
                    .map(Cell::Array)
                    .ok_or_else(|| TableError::Corrupt(format!("dangling array slot {slot}"))),
            },
        }
    }

    fn encode(&self, column: usize, cell: &Cell, slot: u64) -> TableResult<Vec<u8>> {
        let mut payload = Vec::new();
        match (&self.columns[column].kind, cell) {
            (ColumnKind::VarArray { .. }, _) => put_u64(&mut payload, slot),
            (ColumnKind::Scalar, Cell::Scalar(value)) => encode_scalar(value, &mut payload)?,
            (ColumnKind::FixedArray(_), Cell::Array(array)) => {
                encode_array_data(array.data(), &mut payload)?
            }
            _ => {
                return Err(TableError::Invalid(format!(
                    "cell does not fit storage column {column}"
                )))
            }
        }
        Ok(match self.layout.items[column] {
            ItemLength::Fixed(_) => payload,
            ItemLength::Variable => frame_variable(&payload),
        })
    }

    /// Heap slot for a variable-shape array written to `row`.
    ///
    /// The slot of a single-row run is overwritten in place when nothing else refers to it.
    fn assign_slot(&mut self, column: usize, row: u64, cell: &Cell) -> TableResult<u64> {
        let (ColumnKind::VarArray { .. }, Cell::Array(array)) = (&self.columns[column].kind, cell)
        else {
            return Ok(0);
        };
        let (start, nrrow) = self.locate(row)?;
        let bucket = self.bucket(start)?;
        let interval = bucket.get_interval(column, row - start, nrrow);
        let mut slot_bytes = ByteReader::new(bucket.item(column, interval.run));
        let current = slot_bytes.read_u64()?;
        if current != 0 && interval.start == interval.end && self.slot_users(column, current) == 1 {
            return Ok(self.heaps[column].replace(current, array.clone()));
        }
        Ok(self.heaps[column].allocate(array.clone()))
    }

    /// Heap slot stored for `row`; 0 for undefined cells and columns without a heap.
    fn slot_at(&self, column: usize, row: u64) -> TableResult<u64> {
        if !matches!(self.columns[column].kind, ColumnKind::VarArray { .. }) {
            return Ok(0);
        }
        let (start, nrrow) = self.locate(row)?;
        let bucket = self.bucket(start)?;
        let interval = bucket.get_interval(column, row - start, nrrow);
        ByteReader::new(bucket.item(column, interval.run)).read_u64()
    }

    /// Hands `slot` back to the heap once no run refers to it.
    fn release_if_unused(&mut self, column: usize, slot: u64) {
        if slot != 0 && self.slot_users(column, slot) == 0 {
            self.heaps[column].release(slot);
        }
    }

    fn slot_users(&self, column: usize, slot: u64) -> usize {
        let needle = slot.to_le_bytes();
        self.buckets
            .values()
            .map(|bucket| {
                (0..bucket.nused(column))
                    .filter(|&run| bucket.item(column, run) == &needle[..])
                    .count()
            })
            .sum()
    }

    /// Applies a put inside one bucket; `false` when the bucket is too full.
    fn try_put(
        &mut self,
        column: usize,
        start: u64,
        nrrow: u64,
        row: u64,
        item: &[u8],
        cell: &Cell,
    ) -> TableResult<bool> {
        let bucket = self.bucket(start)?;
        let interval = bucket.get_interval(column, row, nrrow);
        let run = interval.run;
        let nused = bucket.nused(column);
        let prev_equal = run > 0 && self.decode(column, bucket.item(column, run - 1))? == *cell;
        let next_equal =
            run + 1 < nused && self.decode(column, bucket.item(column, run + 1))? == *cell;
        let old = bucket.item(column, run).to_vec();

        let bucket = self.bucket_mut(start)?;
        if interval.start == interval.end {
            match (prev_equal, next_equal) {
                (true, true) => bucket.shift_left(column, run, 2),
                (true, false) => bucket.shift_left(column, run, 1),
                (false, true) => {
                    bucket.shift_left(column, run, 1);
                    bucket.set_run_start(column, run, row);
                }
                (false, false) => {
                    if !bucket.can_replace_data(item.len(), old.len()) {
                        return Ok(false);
                    }
                    bucket.replace_data(column, run, item);
                }
            }
        } else if row == interval.start {
            if prev_equal {
                bucket.set_run_start(column, run, row + 1);
            } else {
                if !bucket.can_add_data(item.len()) {
                    return Ok(false);
                }
                bucket.add_data(column, row, run, item);
            }
        } else if row == interval.end {
            if next_equal {
                bucket.set_run_start(column, run + 1, row);
            } else {
                if !bucket.can_add_data(item.len()) {
                    return Ok(false);
                }
                bucket.add_data(column, row, run + 1, item);
            }
        } else {
            // The run is cut in three: the old value continues after `row`.
            if bucket.free_space() < old.len() + item.len() + 24 {
                return Ok(false);
            }
            bucket.add_data(column, row + 1, run + 1, &old);
            bucket.add_data(column, row, run + 1, item);
        }
        Ok(true)
    }

    fn split_bucket(&mut self, column: usize, start: u64, nrrow: u64, row: u64, len: usize) -> TableResult<()> {
        let at_end = start + nrrow >= self.nrow;
        let bucket = self
            .buckets
            .remove(&start)
            .ok_or_else(|| TableError::Corrupt(format!("missing bucket at row {start}")))?;
        // Splitting at relative row 0 would leave the left bucket empty.
        let split_at = row.max(1);
        let split = bucket.split(column, split_at, len, nrrow, at_end);
        debug!(
            "split bucket at row {start} ({nrrow} rows) into {} + {} rows",
            split.split_row,
            nrrow - split.split_row
        );
        self.buckets.insert(start, split.left);
        self.buckets.insert(start + split.split_row, split.right);
        Ok(())
    }

    /// Bucket holding one run per column, all starting at row 0.
    fn initial_bucket(&self) -> TableResult<Bucket> {
        let mut bucket = Bucket::new(self.layout.clone());
        for (column, layout) in self.columns.iter().enumerate() {
            let item = self.encode(column, &layout.initial_cell(), 0)?;
            if !bucket.can_add_data(item.len()) {
                return Err(TableError::ValueTooLarge {
                    len: item.len(),
                    bucket_size: self.layout.bucket_size,
                });
            }
            bucket.add_data(column, 0, 0, &item);
        }
        Ok(bucket)
    }

    fn read_all(&self) -> TableResult<Vec<Vec<Cell>>> {
        let rows: Vec<u64> = (0..self.nrow).collect();
        (0..self.columns.len())
            .map(|column| self.get_rows(column, &rows))
            .collect()
    }

    fn rebuild(&mut self, columns: Vec<ColumnLayout>, cells: Vec<(usize, Vec<Cell>)>) -> TableResult<()> {
        let mut store = IncrementalStore::new(self.layout.bucket_size, columns)?;
        store.add_rows(self.nrow)?;
        for (column, values) in cells {
            for (row, cell) in values.iter().enumerate() {
                store.put(column, row as u64, cell)?;
            }
        }
        *self = store;
        Ok(())
    }

    pub(crate) fn read(reader: &mut ByteReader<'_>, columns: Vec<ColumnLayout>) -> TableResult<Self> {
        let bucket_size = reader.read_len()?;
        let nrow = reader.read_u64()?;
        let ncol = reader.read_len()?;
        if ncol != columns.len() {
            return Err(TableError::Corrupt(format!(
                "incremental store holds {ncol} columns, table describes {}",
                columns.len()
            )));
        }
        let mut store = IncrementalStore::new(bucket_size, columns)?;
        store.nrow = nrow;
        let nbucket = reader.read_len()?;
        for _ in 0..nbucket {
            let start = reader.read_u64()?;
            let page = reader.read_bytes(bucket_size)?;
            let bucket = Bucket::read(store.layout.clone(), page)?;
            store.buckets.insert(start, bucket);
        }
        for column in 0..ncol {
            if reader.read_u8()? == 1 {
                let data_type = store.columns[column].data_type;
                store.heaps[column] = ArrayHeap::read(data_type, reader)?;
            }
        }
        Ok(store)
    }
}

impl StorageManager for IncrementalStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Incremental
    }

    fn nrow(&self) -> u64 {
        self.nrow
    }

    fn ncolumn(&self) -> usize {
        self.columns.len()
    }

    fn get(&self, column: usize, row: u64) -> TableResult<Cell> {
        check_column(column, self.columns.len())?;
        check_row(row, self.nrow)?;
        let (start, nrrow) = self.locate(row)?;
        let bucket = self.bucket(start)?;
        let interval = bucket.get_interval(column, row - start, nrrow);
        self.decode(column, bucket.item(column, interval.run))
    }

    fn get_rows(&self, column: usize, rows: &[u64]) -> TableResult<Vec<Cell>> {
        check_column(column, self.columns.len())?;
        let mut cells = Vec::with_capacity(rows.len());
        let mut cached: Option<(u64, u64, Cell)> = None;
        for &row in rows {
            if let Some((first, last, cell)) = &cached {
                if (*first..=*last).contains(&row) {
                    cells.push(cell.clone());
                    continue;
                }
            }
            check_row(row, self.nrow)?;
            let (start, nrrow) = self.locate(row)?;
            let bucket = self.bucket(start)?;
            let interval = bucket.get_interval(column, row - start, nrrow);
            let cell = self.decode(column, bucket.item(column, interval.run))?;
            cached = Some((start + interval.start, start + interval.end, cell.clone()));
            cells.push(cell);
        }
        Ok(cells)
    }

    fn put(&mut self, column: usize, row: u64, cell: &Cell) -> TableResult<()> {
        check_column(column, self.columns.len())?;
        check_row(row, self.nrow)?;
        if self.get(column, row)? == *cell {
            return Ok(());
        }
        let previous = self.slot_at(column, row)?;
        let slot = self.assign_slot(column, row, cell)?;
        let item = self.encode(column, cell, slot)?;
        if item.len() > self.layout.max_item_len() {
            return Err(TableError::ValueTooLarge {
                len: item.len(),
                bucket_size: self.layout.bucket_size,
            });
        }
        loop {
            let (start, nrrow) = self.locate(row)?;
            if self.try_put(column, start, nrrow, row - start, &item, cell)? {
                break;
            }
            if nrrow <= 1 {
                return Err(TableError::ValueTooLarge {
                    len: item.len(),
                    bucket_size: self.layout.bucket_size,
                });
            }
            self.split_bucket(column, start, nrrow, row - start, item.len())?;
        }
        if previous != slot {
            self.release_if_unused(column, previous);
        }
        Ok(())
    }

    fn add_rows(&mut self, count: u64) -> TableResult<()> {
        if count == 0 {
            return Ok(());
        }
        let first_new = self.nrow;
        let Some(start) = self.buckets.keys().next_back().copied() else {
            let bucket = self.initial_bucket()?;
            self.buckets.insert(0, bucket);
            self.nrow = count;
            return Ok(());
        };
        let last = self.bucket(start)?;
        let mut items = Vec::new();
        for (column, layout) in self.columns.iter().enumerate() {
            let initial = layout.initial_cell();
            let tail = self.decode(column, last.item(column, last.nused(column) - 1))?;
            if tail != initial {
                items.push((column, self.encode(column, &initial, 0)?));
            }
        }
        let needed: usize = items.iter().map(|(_, item)| item.len() + 12).sum();
        if last.free_space() >= needed {
            let bucket = self.bucket_mut(start)?;
            for (column, item) in items {
                let run = bucket.nused(column);
                bucket.add_data(column, first_new - start, run, &item);
            }
        } else {
            let bucket = self.initial_bucket()?;
            self.buckets.insert(first_new, bucket);
        }
        self.nrow += count;
        Ok(())
    }

    fn remove_row(&mut self, row: u64) -> TableResult<()> {
        check_row(row, self.nrow)?;
        let slots = (0..self.columns.len())
            .map(|column| Ok((column, self.slot_at(column, row)?)))
            .collect::<TableResult<Vec<_>>>()?;
        let (start, nrrow) = self.locate(row)?;
        if nrrow == 1 {
            self.buckets.remove(&start);
        } else {
            self.bucket_mut(start)?.remove_row(row - start, nrrow);
        }
        let tail = self.buckets.split_off(&(start + 1));
        for (key, bucket) in tail {
            self.buckets.insert(key - 1, bucket);
        }
        self.nrow -= 1;
        for (column, slot) in slots {
            self.release_if_unused(column, slot);
        }
        Ok(())
    }

    fn add_column(&mut self, layout: ColumnLayout) -> TableResult<()> {
        let cells = self.read_all()?.into_iter().enumerate().collect();
        let mut columns = self.columns.clone();
        columns.push(layout);
        debug!("rebuilding incremental store with {} columns", columns.len());
        self.rebuild(columns, cells)
    }

    fn remove_column(&mut self, column: usize) -> TableResult<()> {
        check_column(column, self.columns.len())?;
        let cells = self
            .read_all()?
            .into_iter()
            .enumerate()
            .filter(|(c, _)| *c != column)
            .map(|(c, values)| (if c > column { c - 1 } else { c }, values))
            .collect();
        let mut columns = self.columns.clone();
        columns.remove(column);
        self.rebuild(columns, cells)
    }

    fn write(&self, buf: &mut Vec<u8>) -> TableResult<()> {
        put_u64(buf, self.layout.bucket_size as u64);
        put_u64(buf, self.nrow);
        put_u64(buf, self.columns.len() as u64);
        put_u64(buf, self.buckets.len() as u64);
        for (&start, bucket) in &self.buckets {
            put_u64(buf, start);
            buf.extend_from_slice(&bucket.write());
        }
        for (layout, heap) in self.columns.iter().zip(&self.heaps) {
            if matches!(layout.kind, ColumnKind::VarArray { .. }) {
                buf.push(1);
                heap.write(buf)?;
            } else {
                buf.push(0);
            }
        }
        Ok(())
    }
}
