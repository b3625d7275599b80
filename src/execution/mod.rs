//! Execution Engine
//!
//! Runs a materialized notebook in a fresh kernel and classifies the outcome.
//!
//! ## Outcome policy
//!
//! | Situation                                  | Result                        |
//! |--------------------------------------------|-------------------------------|
//! | notebook missing, unparseable, invalid     | `Err(Error::ExecutionSetup)`  |
//! | every code cell completes                  | `Ok`, status `Succeeded`      |
//! | a cell raises (e.g. sampler not converged) | `Ok`, status `Failed`         |
//! | the kernel dies                            | `Ok`, status `Failed`         |
//!
//! The executed notebook, with outputs, is written back in every `Ok` case.
//! Cells after the first failure keep empty outputs. A previous run's
//! sidecar is removed before the kernel starts, and artifacts written by a
//! failed run are removed afterwards, so a sidecar only ever belongs to the
//! last successful execution.

mod record;
mod tagged;
mod worker;

pub use record::{ArtifactRecord, ExecutionMode, ExecutionRecord, ExecutionStatus};
pub use tagged::{LiveSession, TaggedExecution};
pub use worker::KernelDied;

use crate::error::{Error, Result};
use crate::kernel::{CellError, CellRun, ModuleRegistry, Value};
use crate::materialize::{sidecar_path, validate_version};
use crate::notebook::{validate, Cell, Notebook, Output};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use worker::KernelWorker;

/// Global holding the executed notebook's file name
pub const NOTEBOOK_GLOBAL: &str = "__notebook__";

/// Outcome of one full execution
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// `Succeeded` or `Failed`
    pub status: ExecutionStatus,
    /// Executed document, outputs populated
    pub notebook: Notebook,
    /// Files written by the notebook
    pub artifacts: Vec<PathBuf>,
    /// Lifecycle record
    pub record: ExecutionRecord,
}

impl ExecutionResult {
    /// True if every cell completed
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }

    /// First error output in the executed notebook
    #[must_use]
    pub fn first_error(&self) -> Option<&Output> {
        self.notebook
            .cells
            .iter()
            .flat_map(Cell::outputs)
            .find(|o| o.is_error())
    }
}

/// Record a cell's run on the document cell
pub(crate) fn apply_run(cell: &mut Cell, run: CellRun) {
    if let Some(code) = cell.as_code_mut() {
        code.execution_count = Some(run.execution_count);
        code.outputs = run.outputs;
    }
}

/// Mark a cell as the one running when the kernel died
pub(crate) fn apply_death(cell: &mut Cell, err: &CellError) {
    if let Some(code) = cell.as_code_mut() {
        code.outputs.push(Output::error(
            err.ename.clone(),
            err.evalue.clone(),
            vec![err.to_string()],
        ));
    }
}

/// Clear outputs left by a previous run
pub(crate) fn reset_outputs(notebook: &mut Notebook) {
    for cell in &mut notebook.cells {
        if let Some(code) = cell.as_code_mut() {
            code.outputs.clear();
            code.execution_count = None;
        }
    }
}

fn setup_error(path: &Path, detail: impl std::fmt::Display) -> Error {
    Error::ExecutionSetup(format!("{}: {detail}", path.display()))
}

/// Remove an artifact file; a file that is already gone is fine
fn remove_artifact(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(artifact = %path.display(), "artifact removed");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Runs notebooks, one fresh kernel per execution
#[derive(Debug, Clone, Default)]
pub struct ExecutionEngine {
    registry: ModuleRegistry,
    sidecar_extension: Option<String>,
}

impl ExecutionEngine {
    /// Engine using the default module registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine whose kernels import from `registry`
    #[must_use]
    pub const fn with_modules(registry: ModuleRegistry) -> Self {
        Self {
            registry,
            sidecar_extension: None,
        }
    }

    /// Remove the notebook's `<stem>.<extension>` sidecar before each run
    #[must_use]
    pub fn sidecar_extension(mut self, extension: impl Into<String>) -> Self {
        self.sidecar_extension = Some(extension.into());
        self
    }

    /// Modules available to executed notebooks
    #[must_use]
    pub const fn modules(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Execute the notebook at `path`; `Ok(false)` means the analysis failed.
    ///
    /// # Errors
    /// `ExecutionSetup` if the notebook cannot be prepared; `Io` if the
    /// executed notebook cannot be written back
    pub fn execute(&self, path: impl AsRef<Path>, version: &str) -> Result<bool> {
        Ok(self.run(path, version)?.success())
    }

    /// Execute the notebook at `path` and return the full result.
    ///
    /// # Errors
    /// Same as [`execute`](Self::execute)
    #[instrument(skip_all, fields(path = %path.as_ref().display(), version = %version))]
    pub fn run(&self, path: impl AsRef<Path>, version: &str) -> Result<ExecutionResult> {
        let path = path.as_ref();
        validate_version(version).map_err(|e| setup_error(path, e))?;
        if !path.is_file() {
            return Err(setup_error(path, "notebook not found"));
        }
        let mut notebook = Notebook::read(path).map_err(|e| setup_error(path, e))?;
        validate(&notebook).map_err(|e| setup_error(path, e))?;
        reset_outputs(&mut notebook);

        let mut record = ExecutionRecord::new(path, version, ExecutionMode::Full);
        record.start()?;

        if let Some(extension) = &self.sidecar_extension {
            let sidecar = sidecar_path(path, extension);
            if sidecar != path {
                remove_artifact(&sidecar)?;
            }
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let working_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut worker = KernelWorker::spawn(
            format!("kernel-{stem}"),
            self.registry.clone(),
            working_dir,
            vec![(NOTEBOOK_GLOBAL.to_string(), Value::Str(file_name))],
        )?;

        let code_cells: Vec<usize> = notebook.code_cells().map(|(i, _)| i).collect();
        for index in code_cells {
            let source = notebook.cells[index].source().to_string();
            match worker.execute(&source) {
                Ok(run) => {
                    let failed = run.error.clone();
                    apply_run(&mut notebook.cells[index], run);
                    if let Some(err) = failed {
                        warn!(cell = index, ename = %err.ename, evalue = %err.evalue, "cell failed");
                        record.mark_failed_cell(index);
                        break;
                    }
                }
                Err(died) => {
                    apply_death(&mut notebook.cells[index], &died.into());
                    record.mark_failed_cell(index);
                    break;
                }
            }
        }

        let written = if worker.is_dead() {
            Vec::new()
        } else {
            worker.artifacts().unwrap_or_default()
        };
        drop(worker);

        let status = if record.failed_cell().is_some() {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Succeeded
        };

        let mut artifacts = Vec::new();
        if status == ExecutionStatus::Failed {
            for artifact in &written {
                remove_artifact(artifact)?;
            }
        } else {
            for artifact in written {
                match ArtifactRecord::from_file(&artifact) {
                    Ok(entry) => record.add_artifact(entry),
                    Err(e) => warn!(artifact = %artifact.display(), error = %e, "artifact vanished"),
                }
                artifacts.push(artifact);
            }
        }

        notebook.write(path)?;
        record.complete(status)?;
        info!(?status, artifacts = artifacts.len(), "notebook executed");

        Ok(ExecutionResult {
            status,
            notebook,
            artifacts,
            record,
        })
    }
}
