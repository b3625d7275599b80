//! # tess-atlas: per-target transit analysis notebooks
//!
//! Generates one analysis notebook per TESS Object of Interest (TOI) from a
//! template, executes it in an isolated kernel, classifies the run as
//! succeeded or failed, and archives the posterior samples it produces.
//!
//! ```text
//! TemplateResolver ──► Materializer ──► ExecutionEngine ──► <toi>.parquet
//!   (template)        (toi_<id>.ipynb)   (kernel thread)     (posterior store)
//! ```
//!
//! ## Failure model
//!
//! - Setup problems (missing template, unwritable path, malformed notebook)
//!   are [`Error`]s.
//! - Analysis failure (a cell raised, the sampler did not converge) is not an
//!   error: [`ExecutionEngine::execute`] returns `Ok(false)`, so batch code
//!   can move on to the next target.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tess_atlas::Pipeline;
//!
//! let pipeline = Pipeline::builder().notebook_root("notebooks").build();
//! let path = pipeline.materialize(178, "TEST", true)?;
//! if pipeline.execute(&path, "TEST")? {
//!     let trace = tess_atlas::load_posteriors(path.with_extension("parquet"))?;
//!     println!("{} samples of {:?}", trace.num_rows(), trace.column_names());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod error;
pub mod execution;
pub mod kernel;
pub mod logging;
pub mod materialize;
pub mod notebook;
pub mod pipeline;
pub mod posterior;
pub mod sampler;
pub mod template;

pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use execution::{
    ExecutionEngine, ExecutionRecord, ExecutionResult, ExecutionStatus, LiveSession,
    TaggedExecution,
};
pub use materialize::{Materializer, RunParameters, TargetId};
pub use notebook::Notebook;
pub use pipeline::{BatchOutcome, Pipeline, PipelineBuilder};
pub use posterior::{load_posteriors, save_posteriors, PosteriorTrace, SampleIndex};
pub use template::{CellCategory, TemplateNotebook, TemplateResolver};
