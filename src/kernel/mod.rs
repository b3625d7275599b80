//! Notebook kernel: a small interpreter for analysis cells
//!
//! A [`Kernel`] holds the global namespace of one notebook run. Cells are
//! executed one at a time with [`Kernel::execute_cell`], which captures
//! printed text, the value of a trailing expression, and any raised error
//! as notebook outputs.
//!
//! ## Example
//!
//! ```rust
//! use tess_atlas::kernel::Kernel;
//!
//! let mut kernel = Kernel::new();
//! let run = kernel.execute_cell("import transit\nprint(transit.__name__)");
//! assert!(run.error.is_none());
//! assert_eq!(run.stdout(), "transit\n");
//! ```

pub mod builtins;
pub mod lexer;
pub mod parser;
pub mod transit;
pub mod value;

pub use parser::{parse_program, ParseError, MAX_BRACKET_NESTING, MAX_EXPR_DEPTH};
pub use value::{Args, CellError, EvalResult, Module, NativeContext, NativeFunction, Value};

use crate::notebook::Output;
use crate::posterior::PosteriorTrace;
use crate::sampler::split_rhat;
use parser::{BinOp, Expr, FunctionDef, Literal, Stmt};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use value::required;

/// Maximum nesting of user function calls
pub const MAX_CALL_DEPTH: usize = 64;

/// Maximum nesting of expression evaluation, across all active calls
pub const MAX_EVAL_DEPTH: usize = 512;

/// Builds a module on import
pub type ModuleFactory = fn() -> Module;

/// Modules a kernel can import, by name
#[derive(Debug, Clone)]
pub struct ModuleRegistry {
    factories: BTreeMap<String, ModuleFactory>,
}

impl ModuleRegistry {
    /// Registry with no modules
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Register (or replace) a module
    pub fn register(&mut self, name: impl Into<String>, factory: ModuleFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Builder form of [`register`](Self::register)
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, factory: ModuleFactory) -> Self {
        self.register(name, factory);
        self
    }

    /// Instantiate a module
    #[must_use]
    pub fn load(&self, name: &str) -> Option<Module> {
        self.factories.get(name).map(|factory| factory())
    }

    /// Registered module names
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::empty().with(transit::MODULE_NAME, transit::module)
    }
}

/// Outcome of executing one cell
#[derive(Debug, Clone, PartialEq)]
pub struct CellRun {
    /// Execution counter assigned to the cell
    pub execution_count: u32,
    /// Outputs in display order
    pub outputs: Vec<Output>,
    /// Error raised by the cell, if any
    pub error: Option<CellError>,
}

impl CellRun {
    /// True if the cell raised no error
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Concatenated stdout text
    #[must_use]
    pub fn stdout(&self) -> String {
        self.outputs
            .iter()
            .filter_map(|o| match o {
                Output::Stream { name, text } if name == "stdout" => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

enum Flow {
    Normal,
    Return(Value),
}

enum Callee<'a> {
    Value(Value),
    Method(Value, &'a str),
}

type Locals = HashMap<String, Value>;

/// Interpreter state for one notebook run
#[derive(Debug)]
pub struct Kernel {
    globals: HashMap<String, Value>,
    modules: HashMap<String, Arc<Module>>,
    registry: ModuleRegistry,
    working_dir: PathBuf,
    execution_count: u32,
    artifacts: Vec<PathBuf>,
    stdout: String,
    depth: usize,
    nesting: usize,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    /// Kernel with the default module registry, rooted at the current directory
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(ModuleRegistry::default())
    }

    /// Kernel with a custom module registry
    #[must_use]
    pub fn with_registry(registry: ModuleRegistry) -> Self {
        Self {
            globals: HashMap::new(),
            modules: HashMap::new(),
            registry,
            working_dir: PathBuf::from("."),
            execution_count: 0,
            artifacts: Vec::new(),
            stdout: String::new(),
            depth: 0,
            nesting: 0,
        }
    }

    /// Set the directory relative paths resolve against
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Directory relative paths resolve against
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Number of cells executed so far
    #[must_use]
    pub const fn execution_count(&self) -> u32 {
        self.execution_count
    }

    /// Files written by cell code
    #[must_use]
    pub fn artifacts(&self) -> &[PathBuf] {
        &self.artifacts
    }

    /// Read a global
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    /// Bind a global
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    /// Global names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.globals.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Drain text printed outside of [`execute_cell`](Self::execute_cell)
    pub fn take_stdout(&mut self) -> String {
        std::mem::take(&mut self.stdout)
    }

    /// Call a global (or builtin) function by name.
    ///
    /// Printed text accumulates until [`take_stdout`](Self::take_stdout).
    ///
    /// # Errors
    /// `NameError` if unbound, otherwise whatever the function raises
    pub fn call(&mut self, name: &str, args: Args) -> EvalResult<Value> {
        let callee = self.lookup(name, None)?;
        self.depth = 0;
        self.nesting = 0;
        self.call_value(callee, args)
    }

    /// Execute one cell's source
    pub fn execute_cell(&mut self, source: &str) -> CellRun {
        self.execution_count += 1;
        self.stdout.clear();
        self.depth = 0;
        self.nesting = 0;
        let execution_count = self.execution_count;

        let result = parse_program(source)
            .map_err(|e| CellError::new("SyntaxError", format!("{} (line {})", e.message, e.line)))
            .and_then(|stmts| self.run_cell(&stmts));

        let mut outputs = Vec::new();
        if !self.stdout.is_empty() {
            outputs.push(Output::stdout(std::mem::take(&mut self.stdout)));
        }
        let error = match result {
            Ok(Some(value)) => {
                outputs.push(Output::execute_result(execution_count, value.repr()));
                None
            }
            Ok(None) => None,
            Err(err) => {
                debug!(execution_count, ename = %err.ename, "cell raised");
                outputs.push(Output::error(
                    err.ename.clone(),
                    err.evalue.clone(),
                    vec![err.to_string()],
                ));
                Some(err)
            }
        };

        CellRun {
            execution_count,
            outputs,
            error,
        }
    }

    fn run_cell(&mut self, stmts: &[Stmt]) -> EvalResult<Option<Value>> {
        let Some((last, body)) = stmts.split_last() else {
            return Ok(None);
        };
        for stmt in body {
            self.top_level(stmt)?;
        }
        if let Stmt::Expr(expr) = last {
            let value = self.eval(expr, &mut None)?;
            return Ok((!matches!(value, Value::None)).then_some(value));
        }
        self.top_level(last)?;
        Ok(None)
    }

    fn top_level(&mut self, stmt: &Stmt) -> EvalResult<()> {
        match self.exec(stmt, &mut None)? {
            Flow::Normal => Ok(()),
            Flow::Return(_) => Err(CellError::new(
                "SyntaxError",
                "'return' outside function",
            )),
        }
    }

    fn bind(&mut self, locals: &mut Option<Locals>, name: &str, value: Value) {
        match locals {
            Some(frame) => {
                frame.insert(name.to_string(), value);
            }
            None => self.set(name, value),
        }
    }

    fn lookup(&self, name: &str, locals: Option<&Locals>) -> EvalResult<Value> {
        if let Some(v) = locals.and_then(|frame| frame.get(name)) {
            return Ok(v.clone());
        }
        if let Some(v) = self.globals.get(name) {
            return Ok(v.clone());
        }
        builtins::lookup(name)
            .map(Value::Native)
            .ok_or_else(|| CellError::name(name))
    }

    fn exec_block(&mut self, stmts: &[Stmt], locals: &mut Option<Locals>) -> EvalResult<Flow> {
        for stmt in stmts {
            if let Flow::Return(v) = self.exec(stmt, locals)? {
                return Ok(Flow::Return(v));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, locals: &mut Option<Locals>) -> EvalResult<Flow> {
        match stmt {
            Stmt::Import { module, alias } => {
                let loaded = self.import(module)?;
                self.bind(locals, alias, Value::Module(loaded));
            }
            Stmt::FnDef(def) => {
                self.bind(locals, &def.name, Value::Function(Arc::clone(def)));
            }
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(e) => self.eval(e, locals)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                let branch = if self.eval(cond, locals)?.truthy() {
                    then
                } else {
                    otherwise
                };
                return self.exec_block(branch, locals);
            }
            Stmt::For { var, iter, body } => {
                for item in iterate(self.eval(iter, locals)?)? {
                    self.bind(locals, var, item);
                    if let Flow::Return(v) = self.exec_block(body, locals)? {
                        return Ok(Flow::Return(v));
                    }
                }
            }
            Stmt::Assign { name, value } => {
                let value = self.eval(value, locals)?;
                self.bind(locals, name, value);
            }
            Stmt::Expr(expr) => {
                self.eval(expr, locals)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn import(&mut self, name: &str) -> EvalResult<Arc<Module>> {
        if let Some(module) = self.modules.get(name) {
            return Ok(Arc::clone(module));
        }
        let module = self.registry.load(name).map(Arc::new).ok_or_else(|| {
            CellError::new("ModuleNotFoundError", format!("No module named '{name}'"))
        })?;
        self.modules.insert(name.to_string(), Arc::clone(&module));
        Ok(module)
    }

    fn eval(&mut self, expr: &Expr, locals: &mut Option<Locals>) -> EvalResult<Value> {
        if self.nesting >= MAX_EVAL_DEPTH {
            return Err(CellError::new(
                "RecursionError",
                "maximum recursion depth exceeded",
            ));
        }
        self.nesting += 1;
        let result = self.eval_expr(expr, locals);
        self.nesting -= 1;
        result
    }

    fn eval_expr(&mut self, expr: &Expr, locals: &mut Option<Locals>) -> EvalResult<Value> {
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::Str(s.clone()),
            }),
            Expr::Name(name) => self.lookup(name, locals.as_ref()),
            Expr::List(items) => items
                .iter()
                .map(|e| self.eval(e, locals))
                .collect::<EvalResult<Vec<_>>>()
                .map(Value::List),
            Expr::Attr(obj, attr) => {
                let target = self.eval(obj, locals)?;
                get_attr(&target, attr)
            }
            Expr::Index(obj, key) => {
                let target = self.eval(obj, locals)?;
                let key = self.eval(key, locals)?;
                index(&target, &key)
            }
            Expr::Call {
                callee,
                args,
                kwargs,
            } => {
                let target = match callee.as_ref() {
                    Expr::Attr(obj, name) => match self.eval(obj, locals)? {
                        receiver @ (Value::Model(_) | Value::Trace(_)) => {
                            Callee::Method(receiver, name)
                        }
                        other => Callee::Value(get_attr(&other, name)?),
                    },
                    other => Callee::Value(self.eval(other, locals)?),
                };
                let mut call_args = Args::default();
                for arg in args {
                    call_args.positional.push(self.eval(arg, locals)?);
                }
                for (name, arg) in kwargs {
                    let value = self.eval(arg, locals)?;
                    call_args.keyword.push((name.clone(), value));
                }
                match target {
                    Callee::Method(receiver, name) => call_method(&receiver, name, call_args),
                    Callee::Value(function) => self.call_value(function, call_args),
                }
            }
            Expr::Neg(inner) => match self.eval(inner, locals)? {
                Value::Int(i) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| CellError::new("OverflowError", "integer overflow")),
                other => Ok(Value::Float(-other.expect_f64("operand of unary -")?)),
            },
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner, locals)?.truthy())),
            Expr::And(lhs, rhs) => {
                let left = self.eval(lhs, locals)?;
                if left.truthy() {
                    self.eval(rhs, locals)
                } else {
                    Ok(left)
                }
            }
            Expr::Or(lhs, rhs) => {
                let left = self.eval(lhs, locals)?;
                if left.truthy() {
                    Ok(left)
                } else {
                    self.eval(rhs, locals)
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let left = self.eval(lhs, locals)?;
                let right = self.eval(rhs, locals)?;
                binary(*op, &left, &right)
            }
        }
    }

    fn call_value(&mut self, callee: Value, args: Args) -> EvalResult<Value> {
        match callee {
            Value::Function(def) => self.call_function(&def, args),
            Value::Native(native) => {
                let mut ctx = NativeContext {
                    stdout: &mut self.stdout,
                    working_dir: &self.working_dir,
                    artifacts: &mut self.artifacts,
                };
                (native.call)(&mut ctx, args)
            }
            other => Err(CellError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, def: &FunctionDef, args: Args) -> EvalResult<Value> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(CellError::new(
                "RecursionError",
                "maximum recursion depth exceeded",
            ));
        }
        let names: Vec<&str> = def.params.iter().map(|p| p.name.as_str()).collect();
        let bound = args.bind(&def.name, &names)?;

        let mut frame = Locals::new();
        for (param, slot) in def.params.iter().zip(bound) {
            let value = match (slot, &param.default) {
                (Some(v), _) => v,
                (None, Some(default)) => self.eval(default, &mut None)?,
                (None, None) => {
                    return Err(CellError::type_error(format!(
                        "{}() missing required argument '{}'",
                        def.name, param.name
                    )))
                }
            };
            frame.insert(param.name.clone(), value);
        }

        self.depth += 1;
        let mut locals = Some(frame);
        let flow = self.exec_block(&def.body, &mut locals);
        self.depth -= 1;
        Ok(match flow? {
            Flow::Return(v) => v,
            Flow::Normal => Value::None,
        })
    }
}

fn iterate(value: Value) -> EvalResult<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Value::Record(fields) => Ok(fields.keys().cloned().map(Value::Str).collect()),
        other => Err(CellError::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

fn key_error(key: &str) -> CellError {
    CellError::new("KeyError", format!("'{key}'"))
}

fn get_attr(target: &Value, attr: &str) -> EvalResult<Value> {
    match target {
        Value::Module(module) => module.member(attr).ok_or_else(|| {
            CellError::new(
                "AttributeError",
                format!("module '{}' has no attribute '{attr}'", module.name()),
            )
        }),
        Value::Record(fields) => fields
            .get(attr)
            .cloned()
            .ok_or_else(|| CellError::attribute("record", attr)),
        Value::Trace(trace) => match attr {
            "columns" => Ok(Value::List(
                trace
                    .column_names()
                    .into_iter()
                    .map(|n| Value::Str(n.to_string()))
                    .collect(),
            )),
            "num_rows" => Ok(Value::Int(
                i64::try_from(trace.num_rows()).unwrap_or(i64::MAX),
            )),
            _ => Err(CellError::attribute("PosteriorTrace", attr)),
        },
        other => Err(CellError::attribute(other.type_name(), attr)),
    }
}

fn call_method(receiver: &Value, method: &str, args: Args) -> EvalResult<Value> {
    match receiver {
        Value::Model(spec) => transit::model_method(spec, method, args),
        Value::Trace(trace) => trace_method(trace, method, args),
        other => Err(CellError::attribute(other.type_name(), method)),
    }
}

fn trace_method(trace: &PosteriorTrace, method: &str, args: Args) -> EvalResult<Value> {
    if !matches!(method, "mean" | "column" | "rhat") {
        return Err(CellError::attribute("PosteriorTrace", method));
    }
    let name = required(args.bind(method, &["name"])?.pop().flatten(), method, "name")?;
    let name = name.expect_str("name")?;
    let values = trace.column(name).ok_or_else(|| key_error(name))?;
    Ok(match method {
        "column" => Value::floats(values),
        // none when the trace has no chains or they are too short to split
        "rhat" => trace
            .chains(name)
            .and_then(|chains| split_rhat(&chains))
            .map_or(Value::None, Value::Float),
        _ => trace.mean(name).map_or(Value::None, Value::Float),
    })
}

fn position(i: i64, len: usize) -> EvalResult<usize> {
    let signed_len = i64::try_from(len).unwrap_or(i64::MAX);
    let p = if i < 0 { i + signed_len } else { i };
    usize::try_from(p)
        .ok()
        .filter(|p| *p < len)
        .ok_or_else(|| CellError::new("IndexError", "index out of range"))
}

fn index(target: &Value, key: &Value) -> EvalResult<Value> {
    match (target, key) {
        (Value::List(items), Value::Int(i)) => position(*i, items.len()).map(|p| items[p].clone()),
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            position(*i, chars.len()).map(|p| Value::Str(chars[p].to_string()))
        }
        (Value::Record(fields), Value::Str(k)) => {
            fields.get(k).cloned().ok_or_else(|| key_error(k))
        }
        (Value::Trace(trace), Value::Str(k)) => {
            trace.column(k).map(Value::floats).ok_or_else(|| key_error(k))
        }
        (t, k) => Err(CellError::type_error(format!(
            "'{}' object cannot be indexed by {}",
            t.type_name(),
            k.type_name()
        ))),
    }
}

const fn symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Rem => "%",
        BinOp::Eq => "==",
        BinOp::NotEq => "!=",
        BinOp::Lt => "<",
        BinOp::LtEq => "<=",
        BinOp::Gt => ">",
        BinOp::GtEq => ">=",
    }
}

fn zero_division() -> CellError {
    CellError::new("ZeroDivisionError", "division by zero")
}

#[allow(clippy::cast_precision_loss)]
fn int_arith(op: BinOp, a: i64, b: i64) -> EvalResult<Value> {
    let overflow = || CellError::new("OverflowError", "integer overflow");
    match op {
        BinOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
        BinOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
        BinOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
        BinOp::Div if b == 0 => Err(zero_division()),
        BinOp::Div => Ok(Value::Float(a as f64 / b as f64)),
        BinOp::Rem if b == 0 => Err(zero_division()),
        BinOp::Rem => {
            let r = a.checked_rem(b).ok_or_else(overflow)?;
            // result takes the sign of the divisor
            Ok(Value::Int(if r != 0 && (r < 0) != (b < 0) { r + b } else { r }))
        }
        _ => Err(CellError::type_error(format!(
            "unsupported operator {}",
            symbol(op)
        ))),
    }
}

fn float_arith(op: BinOp, a: f64, b: f64) -> EvalResult<Value> {
    match op {
        BinOp::Add => Ok(Value::Float(a + b)),
        BinOp::Sub => Ok(Value::Float(a - b)),
        BinOp::Mul => Ok(Value::Float(a * b)),
        BinOp::Div | BinOp::Rem if b == 0.0 => Err(zero_division()),
        BinOp::Div => Ok(Value::Float(a / b)),
        BinOp::Rem => Ok(Value::Float(a - b * (a / b).floor())),
        _ => Err(CellError::type_error(format!(
            "unsupported operator {}",
            symbol(op)
        ))),
    }
}

fn binary(op: BinOp, left: &Value, right: &Value) -> EvalResult<Value> {
    let unsupported = || {
        CellError::type_error(format!(
            "unsupported operand types for {}: '{}' and '{}'",
            symbol(op),
            left.type_name(),
            right.type_name()
        ))
    };

    match op {
        BinOp::Eq => return Ok(Value::Bool(left == right)),
        BinOp::NotEq => return Ok(Value::Bool(left != right)),
        BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq => {
            let ordering = match (left, right) {
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => match (left.as_f64(), right.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => return Err(unsupported()),
                },
            };
            return Ok(Value::Bool(ordering.is_some_and(|o| match op {
                BinOp::Lt => o == Ordering::Less,
                BinOp::LtEq => o != Ordering::Greater,
                BinOp::Gt => o == Ordering::Greater,
                _ => o != Ordering::Less,
            })));
        }
        _ => {}
    }

    match (left, right) {
        (Value::Str(a), Value::Str(b)) if op == BinOp::Add => Ok(Value::Str(format!("{a}{b}"))),
        (Value::List(a), Value::List(b)) if op == BinOp::Add => {
            Ok(Value::List(a.iter().chain(b).cloned().collect()))
        }
        (Value::Int(a), Value::Int(b)) => int_arith(op, *a, *b),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => float_arith(op, a, b),
            _ => Err(unsupported()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(kernel: &mut Kernel, source: &str) -> CellRun {
        kernel.execute_cell(source)
    }

    fn result_text(run: &CellRun) -> Option<String> {
        run.outputs.iter().find_map(|o| match o {
            Output::ExecuteResult { .. } => o.text(),
            _ => None,
        })
    }

    #[test]
    fn test_trailing_expression_is_result() {
        let mut kernel = Kernel::new();
        let cell = run(&mut kernel, "x = 2\nx * 3");
        assert!(cell.succeeded());
        assert_eq!(cell.execution_count, 1);
        assert_eq!(result_text(&cell).as_deref(), Some("6"));
    }

    #[test]
    fn test_print_captured_as_stream() {
        let mut kernel = Kernel::new();
        let cell = run(&mut kernel, "print(\"a\", 1)\nprint(2.5)");
        assert_eq!(cell.stdout(), "a 1\n2.5\n");
        assert_eq!(cell.outputs.len(), 1);
    }

    #[test]
    fn test_globals_persist_between_cells() {
        let mut kernel = Kernel::new();
        run(&mut kernel, "fn double(x) { return x * 2 }");
        let cell = run(&mut kernel, "double(21)");
        assert_eq!(result_text(&cell).as_deref(), Some("42"));
        assert_eq!(kernel.execution_count(), 2);
    }

    #[test]
    fn test_error_stops_cell_and_keeps_prior_output() {
        let mut kernel = Kernel::new();
        let cell = run(&mut kernel, "print(1)\nundefined_name\nprint(2)");
        let err = cell.error.clone().unwrap();
        assert_eq!(err.ename, "NameError");
        assert_eq!(cell.stdout(), "1\n");
        assert!(cell.outputs.last().unwrap().is_error());
    }

    #[test]
    fn test_defaults_and_keywords() {
        let mut kernel = Kernel::new();
        run(&mut kernel, "fn f(a, b=10) { return a + b }");
        assert_eq!(
            result_text(&run(&mut kernel, "f(1)")).as_deref(),
            Some("11")
        );
        assert_eq!(
            result_text(&run(&mut kernel, "f(b=2, a=1)")).as_deref(),
            Some("3")
        );
        let missing = run(&mut kernel, "f()");
        assert_eq!(missing.error.unwrap().ename, "TypeError");
    }

    #[test]
    fn test_control_flow() {
        let mut kernel = Kernel::new();
        let source = "total = 0\nfor i in range(5) {\n  if i % 2 == 0 { total = total + i } else { total = total - 1 }\n}\ntotal";
        assert_eq!(result_text(&run(&mut kernel, source)).as_deref(), Some("4"));
    }

    #[test]
    fn test_function_locals_do_not_leak() {
        let mut kernel = Kernel::new();
        run(&mut kernel, "fn f() { inner = 1\n return inner }\nf()");
        assert_eq!(kernel.get("inner"), None);
    }

    #[test]
    fn test_recursion_limit() {
        let mut kernel = Kernel::new();
        let cell = run(&mut kernel, "fn down(n) { return down(n + 1) }\ndown(0)");
        assert_eq!(cell.error.unwrap().ename, "RecursionError");
    }

    #[test]
    fn test_return_outside_function() {
        let mut kernel = Kernel::new();
        let cell = run(&mut kernel, "return 1");
        assert_eq!(cell.error.unwrap().ename, "SyntaxError");
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let mut kernel = Kernel::new();
        let err = run(&mut kernel, "x = 1\ny = (").error.unwrap();
        assert_eq!(err.ename, "SyntaxError");
        assert!(err.evalue.contains("line 2"), "{}", err.evalue);
    }

    #[test]
    fn test_import_and_version() {
        let mut kernel = Kernel::new();
        let cell = run(&mut kernel, "import transit as tr\nprint(tr.__version__)");
        assert_eq!(cell.stdout(), format!("{}\n", env!("CARGO_PKG_VERSION")));
        let missing = run(&mut kernel, "import numpy");
        assert_eq!(missing.error.unwrap().ename, "ModuleNotFoundError");
    }

    #[test]
    fn test_empty_registry() {
        let mut kernel = Kernel::with_registry(ModuleRegistry::empty());
        let cell = run(&mut kernel, "import transit");
        assert!(!cell.succeeded());
    }

    #[test]
    fn test_model_and_trace_methods() {
        let mut kernel = Kernel::new();
        let source = "import transit\nm = transit.Model()\nm.uniform(\"y\", 0, 1)\n\
                      t = transit.sample(m, draws=20, tune=20, chains=2, seed=1)\n\
                      print(t.columns, t.num_rows, len(t[\"y\"]))";
        let cell = run(&mut kernel, source);
        assert!(cell.succeeded(), "{:?}", cell.error);
        assert_eq!(cell.stdout(), "[\"y\"] 40 40\n");
    }

    #[test]
    fn test_trace_rhat() {
        let mut kernel = Kernel::new();
        let source = "import transit\nm = transit.Model()\nm.uniform(\"y\", 0, 1)\n\
                      t = transit.sample(m, draws=200, tune=100, chains=4, seed=7)\n\
                      r = t.rhat(\"y\")";
        let cell = run(&mut kernel, source);
        assert!(cell.succeeded(), "{:?}", cell.error);
        let Some(Value::Float(rhat)) = kernel.get("r") else {
            panic!("rhat not a float");
        };
        assert!(rhat > 0.9 && rhat < 1.2, "rhat {rhat}");

        let cell = run(&mut kernel, "t.rhat(\"missing\")");
        assert_eq!(cell.error.unwrap().ename, "KeyError");
    }

    #[test]
    fn test_call_api() {
        let mut kernel = Kernel::new();
        run(&mut kernel, "fn greet(name) { print(\"hi\", name)\n return len(name) }");
        let value = kernel
            .call("greet", Args::positional(vec![Value::Str("toi".to_string())]))
            .unwrap();
        assert_eq!(value, Value::Int(3));
        assert_eq!(kernel.take_stdout(), "hi toi\n");
        assert_eq!(
            kernel.call("nope", Args::default()).unwrap_err().ename,
            "NameError"
        );
    }

    #[test]
    fn test_arithmetic_semantics() {
        assert_eq!(binary(BinOp::Rem, &Value::Int(-7), &Value::Int(3)).unwrap(), Value::Int(2));
        assert_eq!(binary(BinOp::Div, &Value::Int(7), &Value::Int(2)).unwrap(), Value::Float(3.5));
        assert_eq!(
            binary(BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err().ename,
            "ZeroDivisionError"
        );
        assert_eq!(
            binary(BinOp::Add, &Value::Str("a".into()), &Value::Int(1)).unwrap_err().ename,
            "TypeError"
        );
        assert_eq!(
            binary(BinOp::Lt, &Value::Float(f64::NAN), &Value::Int(1)).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_negative_index() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(index(&list, &Value::Int(-1)).unwrap(), Value::Int(2));
        assert_eq!(index(&list, &Value::Int(2)).unwrap_err().ename, "IndexError");
    }
}
