//! Runtime values and errors of the cell language

use super::parser::FunctionDef;
use crate::posterior::PosteriorTrace;
use crate::sampler::ModelSpec;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Error raised by cell code.
///
/// Mirrors the `ename`/`evalue` pair of a notebook error output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellError {
    /// Error name, e.g. `NameError`
    pub ename: String,
    /// Error message
    pub evalue: String,
}

impl CellError {
    /// Build an error
    #[must_use]
    pub fn new(ename: impl Into<String>, evalue: impl Into<String>) -> Self {
        Self {
            ename: ename.into(),
            evalue: evalue.into(),
        }
    }

    /// `NameError`
    #[must_use]
    pub fn name(name: &str) -> Self {
        Self::new("NameError", format!("name '{name}' is not defined"))
    }

    /// `TypeError`
    #[must_use]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    /// `ValueError`
    #[must_use]
    pub fn value(message: impl Into<String>) -> Self {
        Self::new("ValueError", message)
    }

    /// `AttributeError`
    #[must_use]
    pub fn attribute(type_name: &str, attr: &str) -> Self {
        Self::new(
            "AttributeError",
            format!("'{type_name}' object has no attribute '{attr}'"),
        )
    }

    /// Failure reported by the inference library
    #[must_use]
    pub fn sampling(err: &anyhow::Error) -> Self {
        Self::new("SamplingError", format!("{err:#}"))
    }
}

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.ename, self.evalue)
    }
}

impl std::error::Error for CellError {}

impl From<crate::Error> for CellError {
    fn from(err: crate::Error) -> Self {
        let ename = match &err {
            crate::Error::Serialization(_) => "SerializationError",
            crate::Error::CorruptArchive(_) => "CorruptArchiveError",
            crate::Error::InvalidInput(_) => "ValueError",
            crate::Error::Io(_) => "IOError",
            _ => "RuntimeError",
        };
        Self::new(ename, err.to_string())
    }
}

/// Result of evaluating cell code
pub type EvalResult<T> = std::result::Result<T, CellError>;

/// Kernel state visible to native functions
pub struct NativeContext<'a> {
    /// Captured stdout of the running cell
    pub stdout: &'a mut String,
    /// Directory relative paths resolve against
    pub working_dir: &'a Path,
    /// Files written as a side effect of execution
    pub artifacts: &'a mut Vec<PathBuf>,
}

impl NativeContext<'_> {
    /// Resolve a path against the kernel working directory
    #[must_use]
    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }

    /// Record a written artifact (once)
    pub fn record_artifact(&mut self, path: PathBuf) {
        if !self.artifacts.contains(&path) {
            self.artifacts.push(path);
        }
    }
}

/// Call arguments
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Positional arguments
    pub positional: Vec<Value>,
    /// Keyword arguments in call order
    pub keyword: Vec<(String, Value)>,
}

impl Args {
    /// Positional-only arguments
    #[must_use]
    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            positional: values,
            keyword: Vec::new(),
        }
    }

    /// Add a keyword argument
    #[must_use]
    pub fn kw(mut self, name: impl Into<String>, value: Value) -> Self {
        self.keyword.push((name.into(), value));
        self
    }

    /// Match arguments to parameter names, positional first.
    ///
    /// # Errors
    /// `TypeError` on surplus, unknown, or doubly-bound arguments
    pub fn bind(self, function: &str, params: &[&str]) -> EvalResult<Vec<Option<Value>>> {
        if self.positional.len() > params.len() {
            return Err(CellError::type_error(format!(
                "{function}() takes {} arguments but {} were given",
                params.len(),
                self.positional.len()
            )));
        }
        let mut bound: Vec<Option<Value>> = vec![None; params.len()];
        for (slot, value) in bound.iter_mut().zip(self.positional) {
            *slot = Some(value);
        }
        for (name, value) in self.keyword {
            let Some(i) = params.iter().position(|p| *p == name) else {
                return Err(CellError::type_error(format!(
                    "{function}() got an unexpected keyword argument '{name}'"
                )));
            };
            if bound[i].is_some() {
                return Err(CellError::type_error(format!(
                    "{function}() got multiple values for argument '{name}'"
                )));
            }
            bound[i] = Some(value);
        }
        Ok(bound)
    }
}

/// Take a required bound argument
///
/// # Errors
/// `TypeError` when missing
pub fn required(slot: Option<Value>, function: &str, param: &str) -> EvalResult<Value> {
    slot.ok_or_else(|| {
        CellError::type_error(format!(
            "{function}() missing required argument '{param}'"
        ))
    })
}

/// Signature of functions implemented in Rust
pub type NativeFn = fn(&mut NativeContext<'_>, Args) -> EvalResult<Value>;

/// A function implemented in Rust
#[derive(Clone, Copy)]
pub struct NativeFunction {
    /// Name shown in errors and reprs
    pub name: &'static str,
    /// Implementation
    pub call: NativeFn,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<builtin {}>", self.name)
    }
}

/// An importable module
#[derive(Debug, Clone)]
pub struct Module {
    name: String,
    version: String,
    members: BTreeMap<String, Value>,
}

impl Module {
    /// Create an empty module
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            members: BTreeMap::new(),
        }
    }

    /// Add a member
    #[must_use]
    pub fn with_member(mut self, name: impl Into<String>, value: Value) -> Self {
        self.members.insert(name.into(), value);
        self
    }

    /// Add a native function member
    #[must_use]
    pub fn with_function(self, name: &'static str, call: NativeFn) -> Self {
        self.with_member(name, Value::Native(NativeFunction { name, call }))
    }

    /// Module name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module version
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Look up a member; `__name__` and `__version__` are always present
    #[must_use]
    pub fn member(&self, name: &str) -> Option<Value> {
        match name {
            "__name__" => Some(Value::Str(self.name.clone())),
            "__version__" => Some(Value::Str(self.version.clone())),
            _ => self.members.get(name).cloned(),
        }
    }
}

/// Runtime value
#[derive(Debug, Clone)]
pub enum Value {
    /// `none`
    None,
    /// Boolean
    Bool(bool),
    /// 64-bit integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// String
    Str(String),
    /// List
    List(Vec<Value>),
    /// Named fields
    Record(Arc<BTreeMap<String, Value>>),
    /// User-defined function
    Function(Arc<FunctionDef>),
    /// Function implemented in Rust
    Native(NativeFunction),
    /// Imported module
    Module(Arc<Module>),
    /// Inference model under construction
    Model(Arc<Mutex<ModelSpec>>),
    /// Posterior samples
    Trace(Arc<PosteriorTrace>),
}

impl Value {
    /// Build a record from fields
    #[must_use]
    pub fn record<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::Record(Arc::new(
            fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// List of floats
    #[must_use]
    pub fn floats(values: &[f64]) -> Self {
        Self::List(values.iter().copied().map(Self::Float).collect())
    }

    /// Type name as reported by `type()`
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Record(_) => "record",
            Self::Function(_) => "function",
            Self::Native(_) => "builtin",
            Self::Module(_) => "module",
            Self::Model(_) => "Model",
            Self::Trace(_) => "PosteriorTrace",
        }
    }

    /// Truthiness
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Record(fields) => !fields.is_empty(),
            _ => true,
        }
    }

    /// Numeric view
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Numeric argument or `TypeError`
    ///
    /// # Errors
    /// `TypeError` when not a number
    pub fn expect_f64(&self, what: &str) -> EvalResult<f64> {
        self.as_f64().ok_or_else(|| {
            CellError::type_error(format!("{what} must be a number, not {}", self.type_name()))
        })
    }

    /// Integer argument or `TypeError`
    ///
    /// # Errors
    /// `TypeError` when not an integer
    pub fn expect_int(&self, what: &str) -> EvalResult<i64> {
        match self {
            Self::Int(i) => Ok(*i),
            other => Err(CellError::type_error(format!(
                "{what} must be an int, not {}",
                other.type_name()
            ))),
        }
    }

    /// String argument or `TypeError`
    ///
    /// # Errors
    /// `TypeError` when not a string
    pub fn expect_str(&self, what: &str) -> EvalResult<&str> {
        match self {
            Self::Str(s) => Ok(s),
            other => Err(CellError::type_error(format!(
                "{what} must be a str, not {}",
                other.type_name()
            ))),
        }
    }

    /// List of numbers or `TypeError`
    ///
    /// # Errors
    /// `TypeError` when not a list of numbers
    pub fn expect_floats(&self, what: &str) -> EvalResult<Vec<f64>> {
        match self {
            Self::List(items) => items.iter().map(|v| v.expect_f64(what)).collect(),
            other => Err(CellError::type_error(format!(
                "{what} must be a list, not {}",
                other.type_name()
            ))),
        }
    }

    /// Source-like representation used for cell results
    #[must_use]
    pub fn repr(&self) -> String {
        match self {
            Self::Str(s) => format!("{s:?}"),
            Self::List(items) => {
                let inner: Vec<String> = items.iter().map(Self::repr).collect();
                format!("[{}]", inner.join(", "))
            }
            Self::Record(fields) => {
                let inner: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{k}={}", v.repr()))
                    .collect();
                format!("record({})", inner.join(", "))
            }
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::List(_) | Self::Record(_) => write!(f, "{}", self.repr()),
            Self::Function(def) => write!(f, "<function {}>", def.name),
            Self::Native(native) => write!(f, "<builtin {}>", native.name),
            Self::Module(module) => write!(f, "<module {} {}>", module.name, module.version),
            Self::Model(model) => match model.lock() {
                Ok(spec) => write!(f, "<Model [{}]>", spec.variable_names().join(", ")),
                Err(_) => write!(f, "<Model>"),
            },
            Self::Trace(trace) => write!(
                f,
                "<PosteriorTrace {} rows x [{}]>",
                trace.num_rows(),
                trace.column_names().join(", ")
            ),
        }
    }
}

impl PartialEq for Value {
    #[allow(clippy::float_cmp)]
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Record(a), Self::Record(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => Arc::ptr_eq(a, b),
            (Self::Native(a), Self::Native(b)) => a.name == b.name,
            (Self::Module(a), Self::Module(b)) => a.name == b.name,
            (Self::Model(a), Self::Model(b)) => Arc::ptr_eq(a, b),
            (Self::Trace(a), Self::Trace(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_equality_across_types() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_ne!(Value::Int(2), Value::Str("2".to_string()));
    }

    #[test]
    fn test_repr_and_display() {
        assert_eq!(Value::Float(1.0).to_string(), "1.0");
        assert_eq!(Value::Str("a".to_string()).repr(), "\"a\"");
        assert_eq!(Value::Str("a".to_string()).to_string(), "a");
        let list = Value::List(vec![Value::Int(1), Value::Str("b".to_string())]);
        assert_eq!(list.repr(), "[1, \"b\"]");
    }

    #[test]
    fn test_bind_arguments() {
        let args = Args::positional(vec![Value::Int(1)]).kw("c", Value::Int(3));
        let bound = args.bind("f", &["a", "b", "c"]).unwrap();
        assert_eq!(bound, vec![Some(Value::Int(1)), None, Some(Value::Int(3))]);
    }

    #[test]
    fn test_bind_rejects_duplicates_and_unknowns() {
        let dup = Args::positional(vec![Value::Int(1)]).kw("a", Value::Int(2));
        assert_eq!(dup.bind("f", &["a"]).unwrap_err().ename, "TypeError");
        let unknown = Args::default().kw("zzz", Value::None);
        assert!(unknown.bind("f", &["a"]).unwrap_err().evalue.contains("zzz"));
    }

    #[test]
    fn test_module_dunder_members() {
        let module = Module::new("transit", "1.2.3");
        assert_eq!(module.member("__version__"), Some(Value::Str("1.2.3".to_string())));
        assert_eq!(module.member("missing"), None);
    }

    #[test]
    fn test_error_mapping() {
        let err: CellError = crate::Error::CorruptArchive("bad".to_string()).into();
        assert_eq!(err.ename, "CorruptArchiveError");
    }
}
