//! Notebook Materializer
//!
//! Turns the template into one concrete notebook per target:
//!
//! ```text
//! <root>/<version>/toi_<id>.ipynb        materialized notebook
//! <root>/<version>/toi_<id>.parquet      posterior sidecar, written by execution
//! ```
//!
//! Only the parameter cell changes; every other cell is copied from the
//! template as-is. Re-materializing the same parameters overwrites the file
//! and produces the same cells; only `metadata.tess_atlas.generated_at`
//! differs.

use crate::error::{Error, Result};
use crate::notebook::{validate, Cell, Notebook, Source};
use crate::template::{TemplateNotebook, TemplateResolver};
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Extension of materialized notebooks
pub const NOTEBOOK_EXTENSION: &str = "ipynb";

/// Notebook metadata key holding the run parameters
pub const METADATA_KEY: &str = "tess_atlas";

/// Positive TESS Object of Interest number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u32);

impl TargetId {
    /// Wrap a TOI number
    ///
    /// # Errors
    /// Returns `InvalidInput` for zero
    pub fn new(id: u32) -> Result<Self> {
        if id == 0 {
            return Err(Error::InvalidInput(
                "target identifier must be positive".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// The TOI number
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for TargetId {
    type Error = Error;

    fn try_from(id: u32) -> Result<Self> {
        Self::new(id)
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Check that a version label is usable as a single directory name
///
/// # Errors
/// Returns `InvalidInput` for empty labels, `.`/`..`, and labels containing
/// path separators or NUL
pub fn validate_version(version: &str) -> Result<()> {
    let bad = version.is_empty()
        || version == "."
        || version == ".."
        || version.contains(['/', '\\', '\0']);
    if bad {
        return Err(Error::InvalidInput(format!(
            "version label {version:?} is not a valid directory name"
        )));
    }
    Ok(())
}

/// Parameters of one notebook run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunParameters {
    target: TargetId,
    version: String,
    quickrun: bool,
}

impl RunParameters {
    /// Build and validate run parameters
    ///
    /// # Errors
    /// Returns `InvalidInput` for a zero target or a bad version label
    pub fn new(target: u32, version: impl Into<String>, quickrun: bool) -> Result<Self> {
        let version = version.into();
        validate_version(&version)?;
        Ok(Self {
            target: TargetId::new(target)?,
            version,
            quickrun,
        })
    }

    /// Target
    #[must_use]
    pub const fn target(&self) -> TargetId {
        self.target
    }

    /// Version label
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Quickrun flag
    #[must_use]
    pub const fn quickrun(&self) -> bool {
        self.quickrun
    }

    /// Source text of the parameter cell
    #[must_use]
    pub fn parameter_source(&self) -> String {
        format!(
            "# parameters for TOI {}\ntoi_number = {}\nquickrun = {}",
            self.target, self.target, self.quickrun
        )
    }
}

/// `root/<version>/toi_<id>.ipynb`
#[must_use]
pub fn notebook_path(root: &Path, version: &str, target: TargetId) -> PathBuf {
    root.join(version)
        .join(format!("toi_{target}.{NOTEBOOK_EXTENSION}"))
}

/// Sidecar next to `notebook`: same stem, different extension
#[must_use]
pub fn sidecar_path(notebook: &Path, extension: &str) -> PathBuf {
    notebook.with_extension(extension)
}

/// Copy the template with the parameter cell rewritten for `params`
///
/// # Errors
/// Returns `Materialization` if the template's parameter cell is not code
pub fn render(template: &TemplateNotebook, params: &RunParameters) -> Result<Notebook> {
    let mut notebook = template.document().clone();
    let index = template.parameter_cell_index();
    let cell = notebook
        .cells
        .get_mut(index)
        .and_then(Cell::as_code_mut)
        .ok_or_else(|| {
            Error::Materialization(format!("parameter cell {index} is not a code cell"))
        })?;
    cell.source = Source::new(params.parameter_source());
    cell.outputs.clear();
    cell.execution_count = None;

    notebook.metadata.insert(
        METADATA_KEY.to_string(),
        json!({
            "toi": params.target.get(),
            "version": params.version,
            "quickrun": params.quickrun,
            "generated_at": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }),
    );
    Ok(notebook)
}

/// Writes parameterized notebooks under a notebook root
#[derive(Debug)]
pub struct Materializer {
    resolver: TemplateResolver,
    root: PathBuf,
}

impl Materializer {
    /// Materializer writing under `root`
    #[must_use]
    pub fn new(resolver: TemplateResolver, root: impl Into<PathBuf>) -> Self {
        Self {
            resolver,
            root: root.into(),
        }
    }

    /// Notebook root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The template resolver
    #[must_use]
    pub const fn resolver(&self) -> &TemplateResolver {
        &self.resolver
    }

    /// Where the notebook for `params` is written
    #[must_use]
    pub fn path_for(&self, params: &RunParameters) -> PathBuf {
        notebook_path(&self.root, &params.version, params.target)
    }

    /// Write the notebook for `params`, replacing any earlier one.
    ///
    /// # Errors
    /// `Materialization` if the template cannot be resolved, `NotebookSchema`
    /// if the result is not a valid notebook, `Io` if it cannot be written
    #[instrument(
        skip_all,
        fields(toi = params.target.get(), version = %params.version, quickrun = params.quickrun)
    )]
    pub fn materialize(&self, params: &RunParameters) -> Result<PathBuf> {
        let template = self
            .resolver
            .load()
            .map_err(|e| Error::Materialization(e.to_string()))?;
        let notebook = render(&template, params)?;
        validate(&notebook)?;

        let path = self.path_for(params);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        notebook.write(&path)?;
        info!(path = %path.display(), "notebook materialized");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::CellCategory;

    fn bundled(root: &Path) -> Materializer {
        Materializer::new(TemplateResolver::bundled(), root)
    }

    #[test]
    fn test_target_id_rejects_zero() {
        assert!(matches!(TargetId::new(0), Err(Error::InvalidInput(_))));
        assert_eq!(TargetId::try_from(723).unwrap().get(), 723);
    }

    #[test]
    fn test_version_labels() {
        assert!(validate_version("TEST").is_ok());
        assert!(validate_version("v0.2.1-rc1").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b"] {
            assert!(validate_version(bad).is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn test_paths() {
        let target = TargetId::new(723).unwrap();
        let path = notebook_path(Path::new("/nb"), "TEST", target);
        assert_eq!(path, PathBuf::from("/nb/TEST/toi_723.ipynb"));
        assert_eq!(
            sidecar_path(&path, "parquet"),
            PathBuf::from("/nb/TEST/toi_723.parquet")
        );
    }

    #[test]
    fn test_render_only_touches_parameter_cell() {
        let template = TemplateResolver::bundled().load().unwrap();
        let params = RunParameters::new(178, "TEST", true).unwrap();
        let notebook = render(&template, &params).unwrap();

        let index = template.parameter_cell_index();
        for (i, (rendered, original)) in notebook
            .cells
            .iter()
            .zip(&template.document().cells)
            .enumerate()
        {
            if i == index {
                assert!(rendered.source().contains("toi_number = 178"));
                assert!(rendered.source().contains("quickrun = true"));
                assert_eq!(rendered.tags(), original.tags());
            } else {
                assert_eq!(rendered, original);
            }
        }
        assert_eq!(notebook.metadata[METADATA_KEY]["toi"], 178);
        assert_eq!(notebook.metadata[METADATA_KEY]["version"], "TEST");
        assert!(template
            .categories(index)
            .contains(&CellCategory::Parameters));
    }

    #[test]
    fn test_materialize_creates_namespace_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let params = RunParameters::new(723, "TEST", true).unwrap();
        let path = bundled(dir.path()).materialize(&params).unwrap();
        assert_eq!(path, dir.path().join("TEST").join("toi_723.ipynb"));
        let written = Notebook::read(&path).unwrap();
        validate(&written).unwrap();
    }

    #[test]
    fn test_materialize_missing_template() {
        let dir = tempfile::tempdir().unwrap();
        let materializer =
            Materializer::new(TemplateResolver::new(dir.path().join("none.ipynb")), dir.path());
        let params = RunParameters::new(1, "TEST", true).unwrap();
        assert!(matches!(
            materializer.materialize(&params),
            Err(Error::Materialization(_))
        ));
    }

    #[test]
    fn test_materialize_unwritable_root() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"not a directory").unwrap();
        let params = RunParameters::new(1, "TEST", false).unwrap();
        assert!(matches!(
            bundled(&blocker).materialize(&params),
            Err(Error::Io(_))
        ));
    }
}
