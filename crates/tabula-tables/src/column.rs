use crate::array::{ArrayData, ArrayValue, Shape, Slicer};
use crate::codec::{decode_scalar, decode_shape, encode_scalar, encode_shape, put_string, put_u32, ByteReader};
use crate::error::{TableError, TableResult};
use crate::record::{Record, RecordField};
use crate::storage::{Cell, ColumnLayout};
use crate::table::TableView;
use crate::types::{DataType, Scalar};
use num_complex::Complex64;
use ordered_float::OrderedFloat;

/// Whether a column holds scalars or arrays, and how array shapes are constrained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Scalar,
    /// Every cell has this shape.
    FixedArray(Shape),
    /// Each cell has its own shape (optionally of a fixed dimensionality) and may be undefined.
    VarArray { ndim: Option<usize> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDesc {
    pub name: String,
    pub data_type: DataType,
    pub kind: ColumnKind,
    pub default: Option<Scalar>,
    pub unit: Option<String>,
    pub keywords: Record,
    pub writable: bool,
}

impl ColumnDesc {
    pub fn scalar(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            kind: ColumnKind::Scalar,
            default: None,
            unit: None,
            keywords: Record::new(),
            writable: true,
        }
    }

    /// Variable-shape array column.
    pub fn array(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            kind: ColumnKind::VarArray { ndim: None },
            ..Self::scalar(name, data_type)
        }
    }

    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.kind = ColumnKind::FixedArray(shape);
        self
    }

    pub fn with_ndim(mut self, ndim: usize) -> Self {
        self.kind = ColumnKind::VarArray { ndim: Some(ndim) };
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_default(mut self, value: Scalar) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_keyword(mut self, name: impl Into<String>, value: impl Into<RecordField>) -> Self {
        self.keywords.set(name, value);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn is_array(&self) -> bool {
        !matches!(self.kind, ColumnKind::Scalar)
    }

    pub fn fixed_shape(&self) -> Option<&Shape> {
        match &self.kind {
            ColumnKind::FixedArray(shape) => Some(shape),
            _ => None,
        }
    }

    /// Checks an array shape against the column's shape constraints.
    pub fn check_shape(&self, shape: &Shape) -> TableResult<()> {
        match &self.kind {
            ColumnKind::Scalar => Err(not_array(self)),
            ColumnKind::FixedArray(fixed) if fixed != shape => Err(TableError::ShapeMismatch {
                column: self.name.clone(),
                expected: fixed.clone(),
                actual: shape.clone(),
            }),
            ColumnKind::VarArray { ndim: Some(ndim) } if *ndim != shape.ndim() => {
                Err(TableError::Conformance(format!(
                    "column {} holds {ndim}-dimensional arrays, got shape {shape}",
                    self.name
                )))
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn layout(&self) -> ColumnLayout {
        ColumnLayout {
            data_type: self.data_type,
            kind: self.kind.clone(),
            default: self
                .default
                .as_ref()
                .and_then(|value| value.promote_to(self.data_type).ok()),
        }
    }

    pub(crate) fn validate(&self) -> TableResult<()> {
        if self.name.is_empty() {
            return Err(TableError::Invalid("column name is empty".to_string()));
        }
        if let Some(default) = &self.default {
            if !default.data_type().can_promote_to(self.data_type) {
                return Err(self.type_mismatch(default.data_type()));
            }
        }
        Ok(())
    }

    fn type_mismatch(&self, actual: DataType) -> TableError {
        TableError::TypeMismatch {
            column: self.name.clone(),
            expected: self.data_type.to_string(),
            actual: actual.to_string(),
        }
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) -> TableResult<()> {
        put_string(buf, &self.name)?;
        buf.push(self.data_type.code());
        match &self.kind {
            ColumnKind::Scalar => buf.push(0),
            ColumnKind::FixedArray(shape) => {
                buf.push(1);
                encode_shape(shape, buf);
            }
            ColumnKind::VarArray { ndim } => {
                buf.push(2);
                put_u32(buf, ndim.map_or(0, |n| n as u32 + 1));
            }
        }
        match &self.default {
            Some(value) => {
                buf.push(1);
                encode_scalar(value, buf)?;
            }
            None => buf.push(0),
        }
        match &self.unit {
            Some(unit) => {
                buf.push(1);
                put_string(buf, unit)?;
            }
            None => buf.push(0),
        }
        self.keywords.encode(buf)?;
        buf.push(u8::from(self.writable));
        Ok(())
    }

    pub(crate) fn decode(reader: &mut ByteReader<'_>) -> TableResult<Self> {
        let name = reader.read_string()?;
        let data_type = DataType::from_code(reader.read_u8()?)?;
        let kind = match reader.read_u8()? {
            0 => ColumnKind::Scalar,
            1 => ColumnKind::FixedArray(decode_shape(reader)?),
            2 => ColumnKind::VarArray {
                ndim: match reader.read_u32()? {
                    0 => None,
                    n => Some(n as usize - 1),
                },
            },
            tag => return Err(TableError::Corrupt(format!("unknown column kind {tag}"))),
        };
        let default = match reader.read_u8()? {
            0 => None,
            _ => Some(decode_scalar(data_type, reader)?),
        };
        let unit = match reader.read_u8()? {
            0 => None,
            _ => Some(reader.read_string()?),
        };
        let keywords = Record::decode(reader)?;
        let writable = reader.read_u8()? != 0;
        Ok(Self {
            name,
            data_type,
            kind,
            default,
            unit,
            keywords,
            writable,
        })
    }
}

/// Ordered set of column descriptions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableDesc {
    columns: Vec<ColumnDesc>,
}

impl TableDesc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`TableDesc::add_column`] for descriptions known to be valid.
    pub fn with_column(mut self, column: ColumnDesc) -> TableResult<Self> {
        self.add_column(column)?;
        Ok(self)
    }

    pub fn add_column(&mut self, column: ColumnDesc) -> TableResult<()> {
        column.validate()?;
        if self.column(&column.name).is_some() {
            return Err(TableError::DuplicateColumn(column.name));
        }
        self.columns.push(column);
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> TableResult<ColumnDesc> {
        let index = self
            .index_of(name)
            .ok_or_else(|| TableError::UnknownColumn(name.to_string()))?;
        Ok(self.columns.remove(index))
    }

    pub fn rename_column(&mut self, old: &str, new: &str) -> TableResult<()> {
        if self.column(new).is_some() {
            return Err(TableError::DuplicateColumn(new.to_string()));
        }
        let column = self
            .column_mut(old)
            .ok_or_else(|| TableError::UnknownColumn(old.to_string()))?;
        column.name = new.to_string();
        Ok(())
    }

    pub fn columns(&self) -> &[ColumnDesc] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDesc> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut ColumnDesc> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// `len` rows starting at `start`, `stride` apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowRange {
    pub start: u64,
    pub len: u64,
    pub stride: u64,
}

impl RowRange {
    pub fn new(start: u64, len: u64, stride: u64) -> Self {
        Self { start, len, stride }
    }

    pub fn rows(&self) -> Vec<u64> {
        (0..self.len).map(|i| self.start + i * self.stride.max(1)).collect()
    }
}

/// Totally ordered image of a scalar, for sorting.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SortKey {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Real(OrderedFloat<f64>),
    Complex(OrderedFloat<f64>, OrderedFloat<f64>),
    String(String),
}

impl From<&Scalar> for SortKey {
    fn from(value: &Scalar) -> Self {
        match value {
            Scalar::Bool(v) => SortKey::Bool(*v),
            Scalar::UInt64(v) => SortKey::UInt(*v),
            Scalar::Float(v) => SortKey::Real(OrderedFloat(f64::from(*v))),
            Scalar::Double(v) => SortKey::Real(OrderedFloat(*v)),
            Scalar::Complex(_) | Scalar::DComplex(_) => {
                let c = value.as_complex().unwrap_or(Complex64::new(0.0, 0.0));
                SortKey::Complex(OrderedFloat(c.norm()), OrderedFloat(c.arg()))
            }
            Scalar::String(v) => SortKey::String(v.clone()),
            other => SortKey::Int(other.as_i64().unwrap_or_default()),
        }
    }
}

fn scalar_of(desc: &ColumnDesc, row: u64, cell: Cell) -> TableResult<Scalar> {
    match cell {
        Cell::Scalar(value) => Ok(value),
        Cell::Undefined => Err(TableError::UndefinedCell {
            column: desc.name.clone(),
            row,
        }),
        Cell::Array(_) => Err(not_scalar(desc)),
    }
}

fn array_of(desc: &ColumnDesc, row: u64, cell: Cell) -> TableResult<ArrayValue> {
    match cell {
        Cell::Array(value) => Ok(value),
        Cell::Undefined => Err(TableError::UndefinedCell {
            column: desc.name.clone(),
            row,
        }),
        Cell::Scalar(_) => Err(not_array(desc)),
    }
}

fn not_scalar(desc: &ColumnDesc) -> TableError {
    TableError::TypeMismatch {
        column: desc.name.clone(),
        expected: "scalar column".to_string(),
        actual: "array column".to_string(),
    }
}

fn not_array(desc: &ColumnDesc) -> TableError {
    TableError::TypeMismatch {
        column: desc.name.clone(),
        expected: "array column".to_string(),
        actual: "scalar column".to_string(),
    }
}

/// Read access to one column of a table or view.
#[derive(Debug)]
pub struct TableColumn<'a> {
    table: &'a dyn TableView,
    desc: ColumnDesc,
}

impl<'a> TableColumn<'a> {
    pub fn new(table: &'a dyn TableView, name: &str) -> TableResult<Self> {
        let desc = table.column_desc(name)?;
        Ok(Self { table, desc })
    }

    pub fn desc(&self) -> &ColumnDesc {
        &self.desc
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn nrow(&self) -> u64 {
        self.table.nrow()
    }

    pub fn get_cell(&self, row: u64) -> TableResult<Cell> {
        self.table.get_cell(&self.desc.name, row)
    }

    pub fn get(&self, row: u64) -> TableResult<Scalar> {
        if self.desc.is_array() {
            return Err(not_scalar(&self.desc));
        }
        scalar_of(&self.desc, row, self.get_cell(row)?)
    }

    /// Reads a value converted to `data_type`.
    pub fn get_as(&self, row: u64, data_type: DataType) -> TableResult<Scalar> {
        self.get(row)?
            .promote_to(data_type)
            .map_err(|_| self.desc.type_mismatch(data_type))
    }

    pub fn get_column(&self) -> TableResult<Vec<Scalar>> {
        let rows: Vec<u64> = (0..self.nrow()).collect();
        self.get_column_cells(&rows)
    }

    pub fn get_column_range(&self, range: RowRange) -> TableResult<Vec<Scalar>> {
        self.get_column_cells(&range.rows())
    }

    pub fn get_column_cells(&self, rows: &[u64]) -> TableResult<Vec<Scalar>> {
        if self.desc.is_array() {
            return Err(not_scalar(&self.desc));
        }
        let cells = self.table.get_cells(&self.desc.name, rows)?;
        cells
            .into_iter()
            .zip(rows)
            .map(|(cell, &row)| scalar_of(&self.desc, row, cell))
            .collect()
    }

    pub fn is_defined(&self, row: u64) -> TableResult<bool> {
        Ok(self.get_cell(row)?.is_defined())
    }

    pub fn shape(&self, row: u64) -> TableResult<Shape> {
        if let Some(shape) = self.desc.fixed_shape() {
            if row >= self.nrow() {
                return Err(TableError::RowOutOfRange {
                    row,
                    nrow: self.nrow(),
                });
            }
            return Ok(shape.clone());
        }
        Ok(self.get_array(row)?.shape().clone())
    }

    pub fn get_array(&self, row: u64) -> TableResult<ArrayValue> {
        if !self.desc.is_array() {
            return Err(not_array(&self.desc));
        }
        array_of(&self.desc, row, self.get_cell(row)?)
    }

    pub fn get_slice(&self, row: u64, slicer: &Slicer) -> TableResult<ArrayValue> {
        self.get_array(row)?.slice(slicer)
    }

    /// All cells stacked along a trailing axis; every cell must have the same shape.
    pub fn get_array_column(&self) -> TableResult<ArrayValue> {
        let rows: Vec<u64> = (0..self.nrow()).collect();
        self.get_array_column_cells(&rows)
    }

    pub fn get_array_column_cells(&self, rows: &[u64]) -> TableResult<ArrayValue> {
        if !self.desc.is_array() {
            return Err(not_array(&self.desc));
        }
        let cells = self.table.get_cells(&self.desc.name, rows)?;
        let mut cell_shape: Option<Shape> = self.desc.fixed_shape().cloned();
        let mut data = ArrayData::empty(self.desc.data_type);
        for (cell, &row) in cells.into_iter().zip(rows) {
            let array = array_of(&self.desc, row, cell)?;
            match &cell_shape {
                Some(shape) if shape != array.shape() => {
                    return Err(TableError::Conformance(format!(
                        "column {} has cells of shape {shape} and {}",
                        self.desc.name,
                        array.shape()
                    )))
                }
                Some(_) => {}
                None => cell_shape = Some(array.shape().clone()),
            }
            data.extend_from(array.data())?;
        }
        let mut dims = cell_shape.map(|s| s.0).unwrap_or_default();
        dims.push(rows.len());
        ArrayValue::new(Shape(dims), data)
    }

    /// Sort keys of a scalar column, one per row.
    pub fn sort_keys(&self) -> TableResult<Vec<SortKey>> {
        Ok(self.get_column()?.iter().map(SortKey::from).collect())
    }

    /// Row numbers ordered by the column's values (stable for equal values).
    pub fn sorted_rows(&self, ascending: bool) -> TableResult<Vec<u64>> {
        let keys = self.sort_keys()?;
        let mut rows: Vec<u64> = (0..keys.len() as u64).collect();
        rows.sort_by(|&a, &b| {
            let ord = keys[a as usize].cmp(&keys[b as usize]);
            if ascending {
                ord
            } else {
                ord.reverse()
            }
        });
        Ok(rows)
    }
}

/// Write access to one column of a table or view.
///
/// Every write checks type and shape before anything is stored, so a failed call leaves the
/// column untouched.
#[derive(Debug)]
pub struct TableColumnMut<'a> {
    table: &'a mut dyn TableView,
    desc: ColumnDesc,
}

impl<'a> TableColumnMut<'a> {
    pub fn new(table: &'a mut dyn TableView, name: &str) -> TableResult<Self> {
        let desc = table.column_desc(name)?;
        if !desc.writable {
            return Err(TableError::NotWritable(desc.name));
        }
        Ok(Self { table, desc })
    }

    pub fn desc(&self) -> &ColumnDesc {
        &self.desc
    }

    pub fn nrow(&self) -> u64 {
        self.table.nrow()
    }

    /// Read-only view on the same column.
    pub fn reader(&self) -> TableColumn<'_> {
        TableColumn {
            table: &*self.table,
            desc: self.desc.clone(),
        }
    }

    fn check_row(&self, row: u64) -> TableResult<()> {
        let nrow = self.nrow();
        if row >= nrow {
            return Err(TableError::RowOutOfRange { row, nrow });
        }
        Ok(())
    }

    fn promote(&self, value: Scalar) -> TableResult<Scalar> {
        let actual = value.data_type();
        value
            .promote_to(self.desc.data_type)
            .map_err(|_| self.desc.type_mismatch(actual))
    }

    fn promote_array(&self, array: &ArrayValue) -> TableResult<ArrayValue> {
        array
            .promote_to(self.desc.data_type)
            .map_err(|_| self.desc.type_mismatch(array.data_type()))
    }

    fn check_shape(&self, shape: &Shape) -> TableResult<()> {
        self.desc.check_shape(shape)
    }

    pub fn put(&mut self, row: u64, value: Scalar) -> TableResult<()> {
        if self.desc.is_array() {
            return Err(not_scalar(&self.desc));
        }
        self.check_row(row)?;
        let value = self.promote(value)?;
        self.table.put_cell(&self.desc.name, row, Cell::Scalar(value))
    }

    pub fn put_column(&mut self, values: &[Scalar]) -> TableResult<()> {
        let nrow = self.nrow();
        if values.len() as u64 != nrow {
            return Err(TableError::LengthMismatch {
                expected: nrow,
                actual: values.len() as u64,
            });
        }
        let rows: Vec<u64> = (0..nrow).collect();
        self.put_column_cells(&rows, values)
    }

    pub fn put_column_range(&mut self, range: RowRange, values: &[Scalar]) -> TableResult<()> {
        self.put_column_cells(&range.rows(), values)
    }

    pub fn put_column_cells(&mut self, rows: &[u64], values: &[Scalar]) -> TableResult<()> {
        if self.desc.is_array() {
            return Err(not_scalar(&self.desc));
        }
        if rows.len() != values.len() {
            return Err(TableError::LengthMismatch {
                expected: rows.len() as u64,
                actual: values.len() as u64,
            });
        }
        let mut promoted = Vec::with_capacity(values.len());
        for (&row, value) in rows.iter().zip(values) {
            self.check_row(row)?;
            promoted.push(self.promote(value.clone())?);
        }
        for (&row, value) in rows.iter().zip(promoted) {
            self.table.put_cell(&self.desc.name, row, Cell::Scalar(value))?;
        }
        Ok(())
    }

    /// Writes scalar or array cells at `rows`; all of them are checked before the first write.
    pub fn put_cells(&mut self, rows: &[u64], cells: Vec<Cell>) -> TableResult<()> {
        if rows.len() != cells.len() {
            return Err(TableError::LengthMismatch {
                expected: rows.len() as u64,
                actual: cells.len() as u64,
            });
        }
        let mut checked = Vec::with_capacity(cells.len());
        for (&row, cell) in rows.iter().zip(cells) {
            self.check_row(row)?;
            checked.push(match cell {
                Cell::Scalar(_) if self.desc.is_array() => return Err(not_scalar(&self.desc)),
                Cell::Scalar(value) => Cell::Scalar(self.promote(value)?),
                Cell::Array(array) => {
                    self.check_shape(array.shape())?;
                    Cell::Array(self.promote_array(&array)?)
                }
                Cell::Undefined => {
                    return Err(TableError::Invalid(format!(
                        "cannot write an undefined cell into column {}",
                        self.desc.name
                    )))
                }
            });
        }
        for (&row, cell) in rows.iter().zip(checked) {
            self.table.put_cell(&self.desc.name, row, cell)?;
        }
        Ok(())
    }

    /// Gives a cell a shape, filling it with the column default.
    ///
    /// Returns `false` when the cell already had that shape (its values are kept).
    pub fn set_shape(&mut self, row: u64, shape: &Shape) -> TableResult<bool> {
        self.check_row(row)?;
        if let Some(fixed) = self.desc.fixed_shape() {
            if fixed != shape {
                return Err(TableError::FixedShape(self.desc.name.clone()));
            }
            return Ok(false);
        }
        self.check_shape(shape)?;
        let current = self.table.get_cell(&self.desc.name, row)?;
        if current.as_array().is_some_and(|a| a.shape() == shape) {
            return Ok(false);
        }
        let fill = self
            .desc
            .default
            .clone()
            .unwrap_or_else(|| Scalar::default_for(self.desc.data_type));
        let fill = self.promote(fill)?;
        self.table.put_cell(
            &self.desc.name,
            row,
            Cell::Array(ArrayValue::filled(shape.clone(), &fill)),
        )?;
        Ok(true)
    }

    pub fn put_array(&mut self, row: u64, array: &ArrayValue) -> TableResult<()> {
        self.check_row(row)?;
        self.check_shape(array.shape())?;
        let array = self.promote_array(array)?;
        self.table.put_cell(&self.desc.name, row, Cell::Array(array))
    }

    /// Writes a section of a defined cell.
    pub fn put_slice(&mut self, row: u64, slicer: &Slicer, values: &ArrayValue) -> TableResult<()> {
        self.check_row(row)?;
        let mut current = array_of(&self.desc, row, self.table.get_cell(&self.desc.name, row)?)?;
        let values = self.promote_array(values)?;
        current.put_slice(slicer, &values)?;
        self.table.put_cell(&self.desc.name, row, Cell::Array(current))
    }

    /// Writes every cell from an array whose last axis runs over the rows.
    pub fn put_array_column(&mut self, array: &ArrayValue) -> TableResult<()> {
        let nrow = self.nrow();
        let dims = array.shape().dims();
        let Some((&count, cell_dims)) = dims.split_last() else {
            return Err(TableError::Conformance("empty array shape".to_string()));
        };
        if count as u64 != nrow {
            return Err(TableError::LengthMismatch {
                expected: nrow,
                actual: count as u64,
            });
        }
        let cell_shape = Shape(cell_dims.to_vec());
        self.check_shape(&cell_shape)?;
        let array = self.promote_array(array)?;
        let per_cell = cell_shape.nelements();
        let mut cells = Vec::with_capacity(count);
        for row in 0..count {
            let offsets: Vec<usize> = (row * per_cell..(row + 1) * per_cell).collect();
            cells.push(ArrayValue::new(
                cell_shape.clone(),
                array.data().select(&offsets),
            )?);
        }
        for (row, cell) in cells.into_iter().enumerate() {
            self.table.put_cell(&self.desc.name, row as u64, Cell::Array(cell))?;
        }
        Ok(())
    }

    /// Copies every cell of `source` (same row count) into this column, promoting types.
    pub fn copy_from(&mut self, source: &TableColumn<'_>) -> TableResult<()> {
        let nrow = self.nrow();
        if source.nrow() != nrow {
            return Err(TableError::LengthMismatch {
                expected: nrow,
                actual: source.nrow(),
            });
        }
        let mut cells = Vec::with_capacity(nrow as usize);
        for row in 0..nrow {
            let cell = match source.get_cell(row)? {
                Cell::Scalar(value) => {
                    if self.desc.is_array() {
                        return Err(not_array(&self.desc));
                    }
                    Cell::Scalar(self.promote(value)?)
                }
                Cell::Array(array) => {
                    self.check_shape(array.shape())?;
                    Cell::Array(self.promote_array(&array)?)
                }
                Cell::Undefined => {
                    if self.desc.fixed_shape().is_some() || !self.desc.is_array() {
                        return Err(TableError::UndefinedCell {
                            column: source.name().to_string(),
                            row,
                        });
                    }
                    Cell::Undefined
                }
            };
            cells.push(cell);
        }
        for (row, cell) in cells.into_iter().enumerate() {
            self.table.put_cell(&self.desc.name, row as u64, cell)?;
        }
        Ok(())
    }
}
