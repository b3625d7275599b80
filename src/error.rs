//! Error types for tess-atlas
//!
//! Setup and serialization problems are errors. A model that fails to
//! converge is not: it is reported through [`crate::execution::ExecutionStatus`].

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// tess-atlas error types
#[derive(Error, Debug)]
pub enum Error {
    /// Template notebook file is absent
    #[error("Template notebook not found: {}", .0.display())]
    TemplateNotFound(PathBuf),

    /// Template loaded but does not have the expected structure
    #[error("Template schema error: {0}")]
    TemplateSchema(String),

    /// Template could not be resolved while materializing a notebook
    #[error("Materialization failed: {0}")]
    Materialization(String),

    /// Document failed general notebook (nbformat v4) validation
    #[error("Invalid notebook document: {0}")]
    NotebookSchema(String),

    /// Notebook could not be prepared for execution (missing, unparseable, invalid)
    #[error("Execution setup failed: {0}")]
    ExecutionSetup(String),

    /// A cell raised during a run that does not tolerate errors
    #[error("Cell {cell} raised {ename}: {evalue}")]
    CellExecution {
        /// Index of the failing cell in the executed document
        cell: usize,
        /// Error name (e.g. `NameError`)
        ename: String,
        /// Error message
        evalue: String,
    },

    /// A name was looked up in a live kernel but never bound
    #[error("Name not found in kernel: {0}")]
    NameNotFound(String),

    /// Posterior archive could not be written
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Posterior archive unreadable or missing the expected key
    #[error("Corrupt posterior archive: {0}")]
    CorruptArchive(String),

    /// Invalid caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
