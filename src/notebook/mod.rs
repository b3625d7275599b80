//! Notebook documents (nbformat v4)
//!
//! A serde model of the Jupyter notebook format, restricted to the parts the
//! pipeline reads or writes:
//!
//! ```text
//! Notebook
//!   ├── metadata   (free-form JSON object)
//!   ├── nbformat / nbformat_minor
//!   └── cells[]    code | markdown | raw
//!         ├── metadata.tags[]
//!         ├── source           (string or list of lines on disk)
//!         └── outputs[]        code cells only: stream | execute_result | display_data | error
//! ```
//!
//! Unknown cell metadata keys are kept so that re-serializing a document does
//! not drop information written by other tools.

mod output;
mod validate;

pub use output::Output;
pub use validate::validate;

use crate::Result;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Major notebook format version written and accepted
pub const NBFORMAT: u32 = 4;

/// Minor notebook format version written for new documents
pub const NBFORMAT_MINOR: u32 = 5;

/// Multi-line text as stored in a notebook.
///
/// On disk nbformat allows either a single string or a list of lines; both are
/// accepted and a list of lines (each keeping its trailing `\n`) is written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Source(String);

impl Source {
    /// Wrap a string
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// The joined text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Source {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

impl From<String> for Source {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl Serialize for Source {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let lines: Vec<&str> = self.0.split_inclusive('\n').collect();
        lines.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Source {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Lines(Vec<String>),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::One(text) => Self(text),
            Raw::Lines(lines) => Self(lines.concat()),
        })
    }
}

/// Cell-level metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellMetadata {
    /// Category labels attached to the cell
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Any other metadata, preserved as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An executable cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeCell {
    /// Cell id (mandatory from nbformat 4.5)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Metadata
    #[serde(default)]
    pub metadata: CellMetadata,
    /// Code
    pub source: Source,
    /// Execution counter, `None` when never executed
    #[serde(default)]
    pub execution_count: Option<u32>,
    /// Outputs produced by the last execution
    #[serde(default)]
    pub outputs: Vec<Output>,
}

/// A markdown or raw cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCell {
    /// Cell id (mandatory from nbformat 4.5)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Metadata
    #[serde(default)]
    pub metadata: CellMetadata,
    /// Text
    pub source: Source,
}

/// A notebook cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cell_type", rename_all = "lowercase")]
pub enum Cell {
    /// Executable code
    Code(CodeCell),
    /// Markdown prose
    Markdown(TextCell),
    /// Raw passthrough text
    Raw(TextCell),
}

impl Cell {
    /// Build an unexecuted code cell
    #[must_use]
    pub fn code(id: impl Into<String>, source: impl Into<Source>, tags: &[&str]) -> Self {
        Self::Code(CodeCell {
            id: Some(id.into()),
            metadata: CellMetadata {
                tags: tags.iter().map(|t| (*t).to_string()).collect(),
                extra: Map::new(),
            },
            source: source.into(),
            execution_count: None,
            outputs: Vec::new(),
        })
    }

    /// Build a markdown cell
    #[must_use]
    pub fn markdown(id: impl Into<String>, source: impl Into<Source>) -> Self {
        Self::Markdown(TextCell {
            id: Some(id.into()),
            metadata: CellMetadata::default(),
            source: source.into(),
        })
    }

    /// Cell id, if any
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Code(c) => c.id.as_deref(),
            Self::Markdown(c) | Self::Raw(c) => c.id.as_deref(),
        }
    }

    /// Cell metadata
    #[must_use]
    pub const fn metadata(&self) -> &CellMetadata {
        match self {
            Self::Code(c) => &c.metadata,
            Self::Markdown(c) | Self::Raw(c) => &c.metadata,
        }
    }

    /// Tags attached to the cell
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.metadata().tags
    }

    /// Cell text
    #[must_use]
    pub fn source(&self) -> &str {
        match self {
            Self::Code(c) => c.source.as_str(),
            Self::Markdown(c) | Self::Raw(c) => c.source.as_str(),
        }
    }

    /// Code cell view
    #[must_use]
    pub const fn as_code(&self) -> Option<&CodeCell> {
        match self {
            Self::Code(c) => Some(c),
            _ => None,
        }
    }

    /// Mutable code cell view
    pub fn as_code_mut(&mut self) -> Option<&mut CodeCell> {
        match self {
            Self::Code(c) => Some(c),
            _ => None,
        }
    }

    /// Outputs of a code cell (empty for text cells)
    #[must_use]
    pub fn outputs(&self) -> &[Output] {
        self.as_code().map(|c| c.outputs.as_slice()).unwrap_or_default()
    }
}

/// A notebook document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    /// Ordered cells
    pub cells: Vec<Cell>,
    /// Notebook-level metadata
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Major format version
    pub nbformat: u32,
    /// Minor format version
    pub nbformat_minor: u32,
}

impl Default for Notebook {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Notebook {
    /// Create a v4.5 notebook from cells
    #[must_use]
    pub fn new(cells: Vec<Cell>) -> Self {
        Self {
            cells,
            metadata: Map::new(),
            nbformat: NBFORMAT,
            nbformat_minor: NBFORMAT_MINOR,
        }
    }

    /// Parse a notebook from JSON text
    ///
    /// # Errors
    /// Returns error if the text is not a notebook document
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a notebook file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Serialize with nbformat's layout (one-space indent, trailing newline)
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_json_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut serializer)?;
        buf.push(b'\n');
        // serde_json only emits UTF-8
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Write the notebook to `path`, replacing any existing file
    ///
    /// # Errors
    /// Returns error if the file cannot be written
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path.as_ref(), self.to_json_string()?)?;
        Ok(())
    }

    /// Code cells with their document indices
    pub fn code_cells(&self) -> impl Iterator<Item = (usize, &CodeCell)> {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(i, cell)| cell.as_code().map(|c| (i, c)))
    }
}
