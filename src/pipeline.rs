//! Orchestration: materialize and execute notebooks for many targets
//!
//! Each target gets its own kernel, so a batch parallelizes across targets
//! (with the `rayon` feature) without shared state. Targets that would
//! write the same `(version, target)` pair must not run concurrently: the
//! last writer wins.

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::execution::{ExecutionEngine, ExecutionResult, TaggedExecution};
use crate::kernel::ModuleRegistry;
use crate::materialize::{notebook_path, sidecar_path, validate_version, Materializer, RunParameters, TargetId};
use crate::template::TemplateResolver;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Outcome for one target of a batch
#[derive(Debug)]
pub struct BatchOutcome {
    /// TOI number
    pub target: u32,
    /// Execution result, or the setup error that prevented it
    pub result: Result<ExecutionResult>,
}

impl BatchOutcome {
    /// True if the notebook ran to completion
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.result.as_ref().is_ok_and(ExecutionResult::success)
    }
}

/// Template resolver, materializer and execution engine wired together
#[derive(Debug)]
pub struct Pipeline {
    materializer: Materializer,
    engine: ExecutionEngine,
    posterior_extension: String,
}

impl Pipeline {
    /// Create a pipeline builder
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Pipeline from a config, with the default module registry
    #[must_use]
    pub fn from_config(config: PipelineConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Notebook root directory
    #[must_use]
    pub fn notebook_root(&self) -> &Path {
        self.materializer.root()
    }

    /// The template resolver
    #[must_use]
    pub const fn resolver(&self) -> &TemplateResolver {
        self.materializer.resolver()
    }

    /// The execution engine
    #[must_use]
    pub const fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// Where the notebook for `(target, version)` lives
    ///
    /// # Errors
    /// Returns `InvalidInput` for a zero target or bad version label
    pub fn notebook_path(&self, target: u32, version: &str) -> Result<PathBuf> {
        validate_version(version)?;
        Ok(notebook_path(self.notebook_root(), version, TargetId::new(target)?))
    }

    /// Where the posterior sidecar for `(target, version)` lives
    ///
    /// # Errors
    /// Same as [`notebook_path`](Self::notebook_path)
    pub fn sidecar_path(&self, target: u32, version: &str) -> Result<PathBuf> {
        Ok(sidecar_path(
            &self.notebook_path(target, version)?,
            &self.posterior_extension,
        ))
    }

    /// Materialize the notebook for one target
    ///
    /// # Errors
    /// `InvalidInput` for bad parameters, otherwise see [`Materializer::materialize`]
    pub fn materialize(&self, target: u32, version: &str, quickrun: bool) -> Result<PathBuf> {
        self.materializer
            .materialize(&RunParameters::new(target, version, quickrun)?)
    }

    /// Execute a materialized notebook; `Ok(false)` means the analysis failed
    ///
    /// # Errors
    /// See [`ExecutionEngine::execute`]
    pub fn execute(&self, path: impl AsRef<Path>, version: &str) -> Result<bool> {
        self.engine.execute(path, version)
    }

    /// Materialize then execute one target
    ///
    /// # Errors
    /// Setup errors from either step
    pub fn run_toi(&self, target: u32, version: &str, quickrun: bool) -> Result<ExecutionResult> {
        let path = self.materialize(target, version, quickrun)?;
        self.engine.run(&path, version)
    }

    fn batch_one(&self, target: u32, version: &str, quickrun: bool) -> BatchOutcome {
        let result = self.run_toi(target, version, quickrun);
        match &result {
            Ok(r) if r.success() => info!(toi = target, "target succeeded"),
            Ok(_) => warn!(toi = target, "analysis failed"),
            Err(e) => warn!(toi = target, error = %e, "target could not run"),
        }
        BatchOutcome { target, result }
    }

    /// Run many targets; outcomes are returned in input order
    #[instrument(skip(self, targets), fields(targets = targets.len()))]
    pub fn run_batch(&self, targets: &[u32], version: &str, quickrun: bool) -> Vec<BatchOutcome> {
        #[cfg(feature = "rayon")]
        let outcomes: Vec<BatchOutcome> = {
            use rayon::prelude::*;
            targets
                .par_iter()
                .map(|&target| self.batch_one(target, version, quickrun))
                .collect()
        };
        #[cfg(not(feature = "rayon"))]
        let outcomes: Vec<BatchOutcome> = targets
            .iter()
            .map(|&target| self.batch_one(target, version, quickrun))
            .collect();

        let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
        info!(succeeded, failed = outcomes.len() - succeeded, "batch finished");
        outcomes
    }

    /// Tagged execution over this pipeline's template
    ///
    /// # Errors
    /// Returns the template resolver's error
    pub fn tagged(&self) -> Result<TaggedExecution> {
        Ok(TaggedExecution::from_resolver(self.resolver())?.modules(self.engine.modules().clone()))
    }

    /// Delete a version namespace; returns false if it did not exist
    ///
    /// # Errors
    /// `InvalidInput` for a bad version label, `Io` if removal fails
    pub fn remove_namespace(&self, version: &str) -> Result<bool> {
        validate_version(version)?;
        let dir = self.notebook_root().join(version);
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir)?;
        info!(namespace = %dir.display(), "namespace removed");
        Ok(true)
    }
}

/// Builder for [`Pipeline`]
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    config: PipelineConfig,
    modules: Option<ModuleRegistry>,
}

impl PipelineBuilder {
    /// Replace the whole config
    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the notebook root
    #[must_use]
    pub fn notebook_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.notebook_root = root.into();
        self
    }

    /// Set the template path
    #[must_use]
    pub fn template(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.template_path = path.into();
        self
    }

    /// Set the sidecar extension
    #[must_use]
    pub fn posterior_extension(mut self, extension: impl Into<String>) -> Self {
        self.config.posterior_extension = extension.into();
        self
    }

    /// Set the modules notebooks may import
    #[must_use]
    pub fn modules(mut self, registry: ModuleRegistry) -> Self {
        self.modules = Some(registry);
        self
    }

    /// Build the pipeline; the template is loaded on first use
    #[must_use]
    pub fn build(self) -> Pipeline {
        let resolver = TemplateResolver::new(self.config.template_path);
        Pipeline {
            materializer: Materializer::new(resolver, self.config.notebook_root),
            engine: ExecutionEngine::with_modules(self.modules.unwrap_or_default())
                .sidecar_extension(self.config.posterior_extension.clone()),
            posterior_extension: self.config.posterior_extension,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn pipeline(root: &Path) -> Pipeline {
        Pipeline::builder().notebook_root(root).build()
    }

    #[test]
    fn test_paths() {
        let p = pipeline(Path::new("/nb"));
        assert_eq!(
            p.sidecar_path(178, "TEST").unwrap(),
            PathBuf::from("/nb/TEST/toi_178.parquet")
        );
        assert!(matches!(p.notebook_path(0, "TEST"), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_batch_reports_each_target() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let outcomes = p.run_batch(&[103, 0], "TEST", true);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].target, 103);
        assert!(outcomes[0].succeeded(), "{:?}", outcomes[0].result);
        assert!(matches!(outcomes[1].result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_remove_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        p.materialize(723, "TEST", true).unwrap();
        assert!(p.remove_namespace("TEST").unwrap());
        assert!(!dir.path().join("TEST").exists());
        assert!(!p.remove_namespace("TEST").unwrap());
        assert!(p.remove_namespace("..").is_err());
    }
}
