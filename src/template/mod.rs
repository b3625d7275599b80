//! Template Resolver
//!
//! Loads the analysis template once and exposes its structure: which cells
//! belong to which [`CellCategory`], and where the parameter cell is.
//! A [`TemplateResolver`] is an ordinary value owned by its caller; the
//! loaded template is cached inside it, never in global state.

use crate::error::{Error, Result};
use crate::notebook::{validate, Cell, Notebook};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Path of the template shipped with the crate
pub const BUNDLED_TEMPLATE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/templates/template.ipynb");

/// Role of a template cell, parsed from its tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CellCategory {
    /// The single cell that receives run parameters (`parameters`)
    Parameters,
    /// Definitions safe to run without the full analysis (`def`)
    Definition,
    /// The expensive analysis itself (`exe`)
    Analysis,
}

impl CellCategory {
    /// All categories
    pub const ALL: [Self; 3] = [Self::Parameters, Self::Definition, Self::Analysis];

    /// Tag string in cell metadata
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Parameters => "parameters",
            Self::Definition => "def",
            Self::Analysis => "exe",
        }
    }

    /// Category for a tag, `None` for tags with no role
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.tag() == tag)
    }
}

impl fmt::Display for CellCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for CellCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_tag(s).ok_or_else(|| Error::InvalidInput(format!("unknown cell tag '{s}'")))
    }
}

/// A loaded, schema-checked template
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateNotebook {
    document: Notebook,
    categories: Vec<Vec<CellCategory>>,
    parameter_cell: usize,
}

impl TemplateNotebook {
    /// Check a document against the template rules.
    ///
    /// The document must be a valid notebook with exactly one `parameters`
    /// cell, which must be a code cell, and at least one `def` cell.
    ///
    /// # Errors
    /// Returns `TemplateSchema` describing the first violated rule
    pub fn from_notebook(document: Notebook) -> Result<Self> {
        validate(&document).map_err(|e| Error::TemplateSchema(e.to_string()))?;

        let categories: Vec<Vec<CellCategory>> = document
            .cells
            .iter()
            .map(|cell| {
                cell.tags()
                    .iter()
                    .filter_map(|t| CellCategory::from_tag(t))
                    .collect()
            })
            .collect();

        let tagged = |category: CellCategory| -> Vec<usize> {
            categories
                .iter()
                .enumerate()
                .filter(|(_, cats)| cats.contains(&category))
                .map(|(i, _)| i)
                .collect()
        };

        let parameter_cell = match tagged(CellCategory::Parameters).as_slice() {
            [index] => *index,
            [] => {
                return Err(Error::TemplateSchema(
                    "template has no 'parameters' cell".to_string(),
                ))
            }
            many => {
                return Err(Error::TemplateSchema(format!(
                    "template has {} 'parameters' cells, expected exactly one",
                    many.len()
                )))
            }
        };
        if document.cells[parameter_cell].as_code().is_none() {
            return Err(Error::TemplateSchema(format!(
                "'parameters' cell {parameter_cell} is not a code cell"
            )));
        }
        if tagged(CellCategory::Definition).is_empty() {
            return Err(Error::TemplateSchema(
                "template has no 'def' cells".to_string(),
            ));
        }

        Ok(Self {
            document,
            categories,
            parameter_cell,
        })
    }

    /// The template document
    #[must_use]
    pub const fn document(&self) -> &Notebook {
        &self.document
    }

    /// Index of the parameter cell
    #[must_use]
    pub const fn parameter_cell_index(&self) -> usize {
        self.parameter_cell
    }

    /// Categories of the cell at `index`
    #[must_use]
    pub fn categories(&self, index: usize) -> &[CellCategory] {
        self.categories.get(index).map(Vec::as_slice).unwrap_or_default()
    }

    /// Cells carrying `category`, in document order, with their indices
    #[must_use]
    pub fn cells_with_tag(&self, category: CellCategory) -> Vec<(usize, &Cell)> {
        self.cells_with_any(&[category])
    }

    /// Cells carrying at least one of `categories`, in document order
    #[must_use]
    pub fn cells_with_any(&self, categories: &[CellCategory]) -> Vec<(usize, &Cell)> {
        self.document
            .cells
            .iter()
            .enumerate()
            .filter(|(i, _)| self.categories(*i).iter().any(|c| categories.contains(c)))
            .collect()
    }
}

/// Loads a template file on first use and caches it
#[derive(Debug)]
pub struct TemplateResolver {
    path: PathBuf,
    cache: OnceLock<Arc<TemplateNotebook>>,
}

impl TemplateResolver {
    /// Resolver for a template at `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: OnceLock::new(),
        }
    }

    /// Resolver for the template shipped with the crate
    #[must_use]
    pub fn bundled() -> Self {
        Self::new(BUNDLED_TEMPLATE)
    }

    /// Template file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load (once) and return the template.
    ///
    /// # Errors
    /// `TemplateNotFound` if the file is absent, `TemplateSchema` if it is
    /// not a notebook or breaks the template rules
    pub fn load(&self) -> Result<Arc<TemplateNotebook>> {
        if let Some(template) = self.cache.get() {
            return Ok(Arc::clone(template));
        }

        let text = fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::TemplateNotFound(self.path.clone()),
            _ => Error::Io(e),
        })?;
        let document = Notebook::from_json_str(&text).map_err(|e| {
            Error::TemplateSchema(format!("{}: {e}", self.path.display()))
        })?;
        let template = Arc::new(TemplateNotebook::from_notebook(document)?);
        debug!(
            path = %self.path.display(),
            cells = template.document.cells.len(),
            "template loaded"
        );

        // A concurrent loader may have won; keep whichever landed first
        Ok(Arc::clone(self.cache.get_or_init(|| template)))
    }
}
