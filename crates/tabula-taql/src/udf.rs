//! User-defined functions.
//!
//! Functions are registered per session under a qualified name such as `geo.distance` and are
//! called from TaQL with that name. They are resolved after the built-ins.

use crate::error::{TaqlError, TaqlResult};
use crate::value::{Datum, ValueKind, ValueType};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub trait UserFunction: fmt::Debug + Send + Sync {
    /// Result type and kind for the given argument types, or a type error.
    fn result_type(&self, args: &[(ValueType, ValueKind)]) -> TaqlResult<(ValueType, ValueKind)>;

    fn evaluate(&self, args: &[Datum]) -> TaqlResult<Datum>;

    /// Unit of the result, if any.
    fn unit(&self) -> Option<&str> {
        None
    }

    /// Deterministic functions of constant arguments are folded when the expression is built.
    fn is_deterministic(&self) -> bool {
        true
    }
}

#[derive(Clone, Debug, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn UserFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `function` under `name` (case-insensitive). Replaces an earlier registration.
    pub fn register(&mut self, name: &str, function: Arc<dyn UserFunction>) -> TaqlResult<()> {
        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
            return Err(TaqlError::eval(format!("invalid function name {name:?}")));
        }
        self.functions.insert(name.to_ascii_lowercase(), function);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn UserFunction>> {
        self.functions.get(&name.to_ascii_lowercase())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}
