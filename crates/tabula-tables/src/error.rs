use crate::array::Shape;
use crate::types::DataType;

pub type TableResult<T> = Result<T, TableError>;

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("row {row} out of range (table has {nrow} rows)")]
    RowOutOfRange { row: u64, nrow: u64 },

    #[error("type mismatch for column {column}: expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: String,
        actual: String,
    },

    #[error("invalid promotion from {from:?} to {to:?}")]
    InvalidPromotion { from: DataType, to: DataType },

    #[error("shape mismatch for column {column}: expected {expected}, got {actual}")]
    ShapeMismatch {
        column: String,
        expected: Shape,
        actual: Shape,
    },

    #[error("array conformance error: {0}")]
    Conformance(String),

    #[error("cell in row {row} of column {column} is undefined")]
    UndefinedCell { column: String, row: u64 },

    #[error("column {0} has a fixed shape")]
    FixedShape(String),

    #[error("length mismatch: expected {expected} values, got {actual}")]
    LengthMismatch { expected: u64, actual: u64 },

    #[error("column {0} is not writable")]
    NotWritable(String),

    #[error("value of {len} bytes does not fit in a bucket of {bucket_size} bytes")]
    ValueTooLarge { len: usize, bucket_size: usize },

    #[error("reference table version {0} is not supported")]
    UnsupportedVersion(u32),

    #[error("#rows in referenced table decreased from {expected} to {actual}")]
    RootShrunk { expected: u64, actual: u64 },

    #[error("tables do not share the same root table")]
    DifferentRoot,

    #[error("table {0} has not been saved to disk")]
    NotPersistent(String),

    #[error("invalid operation: {0}")]
    Invalid(String),
}
