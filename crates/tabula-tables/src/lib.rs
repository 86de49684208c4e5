//! Columnar table storage for tabula.
//!
//! This crate focuses on:
//! - Typed cells (scalars and N-dimensional arrays, fixed or variable shape) with a compact
//!   little-endian codec.
//! - An incremental storage manager that keeps per-column runs of equal values in fixed-size
//!   buckets, splitting buckets when they fill up.
//! - Tables with typed column access, keywords and on-disk persistence.
//! - Reference tables: row/column views over a root table, combined with row-set algebra, that
//!   never copy the underlying data, and concatenations of tables with the same columns.

#![forbid(unsafe_code)]

mod array;
mod bucket;
mod codec;
mod column;
mod concat;
mod error;
mod indirect;
mod ism;
mod memory;
mod record;
mod reftable;
mod rowset;
mod storage;
mod table;
mod types;

pub use crate::array::{ArrayData, ArrayValue, Shape, Slicer};
pub use crate::bucket::{Bucket, BucketLayout, BucketSplit, IndexViolation, Interval, ItemLength};
pub use crate::codec::{decode_scalar, encode_scalar, ByteReader};
pub use crate::column::{
    ColumnDesc, ColumnKind, RowRange, SortKey, TableColumn, TableColumnMut, TableDesc,
};
pub use crate::concat::ConcatTable;
pub use crate::error::{TableError, TableResult};
pub use crate::indirect::ArrayHeap;
pub use crate::ism::IncrementalStore;
pub use crate::memory::MemoryStore;
pub use crate::record::{Record, RecordField};
pub use crate::reftable::{RefTable, RefTableDescriptor, ROW_CHUNK};
pub use crate::rowset::{is_strictly_ascending, row_and, row_not, row_or, row_sub, row_xor};
pub use crate::storage::{
    create_storage, Cell, ColumnLayout, StorageKind, StorageManager, StorageOptions,
};
pub use crate::table::{SharedTable, Table, TableInfo, TableOptions, TableView};
pub use crate::types::{DataType, Scalar};
