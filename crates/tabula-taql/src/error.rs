use tabula_tables::TableError;

pub type TaqlResult<T> = Result<T, TaqlError>;

#[derive(Debug, thiserror::Error)]
pub enum TaqlError {
    /// Malformed query text, with the offending token and the text scanned before it.
    #[error("parse error: {message} at or near '{near}'\nScanned so far: {prefix}")]
    Parse {
        message: String,
        near: String,
        prefix: String,
    },

    #[error("type error: {0}")]
    Type(String),

    #[error("unit error: {0}")]
    Unit(String),

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("unknown record field: {0}")]
    UnknownField(String),

    #[error("unknown function {name} with {nargs} argument(s)")]
    UnknownFunction { name: String, nargs: usize },

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("{0} can only be used with a table")]
    NoTable(String),

    #[error("conformance error: {0}")]
    Conformance(String),

    #[error("evaluation error: {0}")]
    Eval(String),

    #[error("not supported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Table(#[from] TableError),
}

impl TaqlError {
    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        TaqlError::Type(message.into())
    }

    pub(crate) fn eval(message: impl Into<String>) -> Self {
        TaqlError::Eval(message.into())
    }
}
