//! Tagged execution: run selected template cells and keep the kernel alive.
//!
//! This is the test harness over the production path. Cells are chosen by the
//! same [`CellCategory`] metadata the Template Resolver exposes, and the
//! resulting [`LiveSession`] answers `reference`/`inject` queries until it is
//! torn down.

use super::worker::KernelWorker;
use super::{apply_death, apply_run, ExecutionMode, ExecutionRecord, ExecutionStatus, NOTEBOOK_GLOBAL};
use crate::error::{Error, Result};
use crate::kernel::{Args, CellError, ModuleRegistry, Value};
use crate::notebook::Cell;
use crate::template::{CellCategory, TemplateNotebook, TemplateResolver};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Builder for a tagged run over a template
#[derive(Debug, Clone)]
pub struct TaggedExecution {
    template: Arc<TemplateNotebook>,
    source: PathBuf,
    tags: Vec<CellCategory>,
    allow_errors: bool,
    registry: ModuleRegistry,
    working_dir: PathBuf,
}

impl TaggedExecution {
    /// Tagged run over `template`, selecting `def` cells by default
    #[must_use]
    pub fn new(template: Arc<TemplateNotebook>) -> Self {
        Self {
            template,
            source: PathBuf::from("template.ipynb"),
            tags: vec![CellCategory::Definition],
            allow_errors: false,
            registry: ModuleRegistry::default(),
            working_dir: PathBuf::from("."),
        }
    }

    /// Tagged run over the template a resolver loads
    ///
    /// # Errors
    /// Returns the resolver's error
    pub fn from_resolver(resolver: &TemplateResolver) -> Result<Self> {
        let mut run = Self::new(resolver.load()?);
        run.source = resolver.path().to_path_buf();
        Ok(run)
    }

    /// Run cells carrying any of `tags`
    #[must_use]
    pub fn tags(mut self, tags: impl IntoIterator<Item = CellCategory>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }

    /// Keep going after a failing cell
    #[must_use]
    pub const fn allow_errors(mut self, allow: bool) -> Self {
        self.allow_errors = allow;
        self
    }

    /// Modules the kernel may import
    #[must_use]
    pub fn modules(mut self, registry: ModuleRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Directory relative paths resolve against
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Execute the selected cells and return the live session.
    ///
    /// # Errors
    /// `CellExecution` for the first failing cell unless errors are allowed,
    /// or if the kernel dies; `Io` if the kernel cannot be started
    #[instrument(skip_all, fields(tags = ?self.tags, allow_errors = self.allow_errors))]
    pub fn run(self) -> Result<LiveSession> {
        let mut record = ExecutionRecord::new(&self.source, "", ExecutionMode::Tagged);
        record.start()?;

        let file_name = self
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut worker = KernelWorker::spawn(
            "kernel-tagged",
            self.registry,
            self.working_dir,
            vec![(NOTEBOOK_GLOBAL.to_string(), Value::Str(file_name))],
        )?;

        let mut cells = Vec::new();
        for (index, cell) in self.template.cells_with_any(&self.tags) {
            let mut cell = cell.clone();
            if cell.as_code().is_none() {
                continue;
            }
            match worker.execute(cell.source()) {
                Ok(run) => {
                    let failed = run.error.clone();
                    apply_run(&mut cell, run);
                    cells.push(cell);
                    if let Some(err) = failed {
                        record.mark_failed_cell(index);
                        if !self.allow_errors {
                            return Err(cell_error(index, err));
                        }
                        debug!(cell = index, ename = %err.ename, "tolerated cell error");
                    }
                }
                Err(died) => {
                    let err = CellError::from(died);
                    apply_death(&mut cell, &err);
                    return Err(cell_error(index, err));
                }
            }
        }

        record.complete(ExecutionStatus::Ready)?;
        info!(cells = cells.len(), "tagged execution ready");
        Ok(LiveSession {
            worker,
            cells,
            record,
        })
    }
}

fn cell_error(cell: usize, err: CellError) -> Error {
    Error::CellExecution {
        cell,
        ename: err.ename,
        evalue: err.evalue,
    }
}

/// A kernel left running after a tagged execution
pub struct LiveSession {
    worker: KernelWorker,
    cells: Vec<Cell>,
    record: ExecutionRecord,
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession")
            .field("cells", &self.cells.len())
            .field("status", &self.record.status())
            .finish_non_exhaustive()
    }
}

impl LiveSession {
    /// Always `Ready` for a session that exists
    #[must_use]
    pub const fn status(&self) -> ExecutionStatus {
        self.record.status()
    }

    /// Lifecycle record of the tagged run
    #[must_use]
    pub const fn record(&self) -> &ExecutionRecord {
        &self.record
    }

    /// Executed cells (including injected ones) with their outputs
    #[must_use]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Current value bound to `name`.
    ///
    /// # Errors
    /// `NameNotFound` if never bound; `CellExecution` if the kernel died
    pub fn reference(&mut self, name: &str) -> Result<Value> {
        self.worker
            .get(name)
            .map_err(|died| cell_error(self.cells.len(), died.into()))?
            .ok_or_else(|| Error::NameNotFound(name.to_string()))
    }

    /// Call a function defined in the session.
    ///
    /// # Errors
    /// `NameNotFound` if `name` is unbound, `CellExecution` if the call raises
    pub fn call(&mut self, name: &str, args: Args) -> Result<Value> {
        let next = self.cells.len();
        let (result, _stdout) = self
            .worker
            .call(name, args)
            .map_err(|died| cell_error(next, died.into()))?;
        result.map_err(|err| {
            if err == CellError::name(name) {
                Error::NameNotFound(name.to_string())
            } else {
                cell_error(next, err)
            }
        })
    }

    /// Run one more fragment and return its text output.
    ///
    /// # Errors
    /// `CellExecution` if the fragment raises
    pub fn inject(&mut self, code: &str) -> Result<String> {
        let index = self.cells.len();
        let mut cell = Cell::code(format!("injected-{index}"), code, &[]);
        let run = self
            .worker
            .execute(code)
            .map_err(|died| cell_error(index, died.into()))?;
        let error = run.error.clone();
        apply_run(&mut cell, run);
        let text: String = cell.outputs().iter().filter_map(|o| o.text()).collect();
        self.cells.push(cell);
        match error {
            Some(err) => Err(cell_error(index, err)),
            None => Ok(text),
        }
    }

    /// Stop the kernel
    pub fn teardown(self) {
        debug!(cells = self.cells.len(), "tearing down live session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notebook::Notebook;

    fn template(cells: Vec<Cell>) -> Arc<TemplateNotebook> {
        Arc::new(TemplateNotebook::from_notebook(Notebook::new(cells)).unwrap())
    }

    fn sample() -> Arc<TemplateNotebook> {
        template(vec![
            Cell::code("params", "n = 2", &["parameters"]),
            Cell::code("d1", "fn sq(x) { return x * x }", &["def"]),
            Cell::code("boom", "fail(\"broken def\")", &["def"]),
            Cell::code("d2", "after = sq(3)", &["def"]),
            Cell::code("slow", "print(\"expensive\")", &["exe"]),
        ])
    }

    #[test]
    fn test_only_tagged_cells_run() {
        let mut session = TaggedExecution::new(sample())
            .allow_errors(true)
            .run()
            .unwrap();
        assert_eq!(session.status(), ExecutionStatus::Ready);
        let ids: Vec<&str> = session.cells().iter().filter_map(Cell::id).collect();
        assert_eq!(ids, vec!["d1", "boom", "d2"]);
        assert!(matches!(session.reference("n"), Err(Error::NameNotFound(_))));
        assert_eq!(session.reference("after").unwrap(), Value::Int(9));
    }

    #[test]
    fn test_errors_abort_unless_allowed() {
        let err = TaggedExecution::new(sample()).run().unwrap_err();
        assert!(matches!(err, Error::CellExecution { cell: 2, .. }), "{err}");
    }

    #[test]
    fn test_parameters_and_definitions() {
        let mut session = TaggedExecution::new(sample())
            .tags([CellCategory::Parameters, CellCategory::Definition])
            .allow_errors(true)
            .run()
            .unwrap();
        assert_eq!(session.reference("n").unwrap(), Value::Int(2));
        assert_eq!(session.inject("print(sq(n))").unwrap(), "4\n");
        assert_eq!(session.cells().len(), 5);
    }

    #[test]
    fn test_call_and_inject_errors() {
        let mut session = TaggedExecution::new(sample())
            .allow_errors(true)
            .run()
            .unwrap();
        let value = session
            .call("sq", Args::positional(vec![Value::Int(5)]))
            .unwrap();
        assert_eq!(value, Value::Int(25));
        assert!(matches!(
            session.call("missing", Args::default()),
            Err(Error::NameNotFound(_))
        ));
        assert!(matches!(
            session.inject("sq()"),
            Err(Error::CellExecution { .. })
        ));
        session.teardown();
    }
}
