//! Cell outputs

use super::Source;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An output attached to an executed code cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    /// Text written to stdout/stderr
    Stream {
        /// `stdout` or `stderr`
        name: String,
        /// Captured text
        text: Source,
    },
    /// Value of the trailing expression of a cell
    ExecuteResult {
        /// Execution counter of the producing cell
        execution_count: Option<u32>,
        /// Mime bundle
        data: Map<String, Value>,
        /// Output metadata
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    /// Rich display payload
    DisplayData {
        /// Mime bundle
        data: Map<String, Value>,
        /// Output metadata
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    /// Raised error
    Error {
        /// Error name
        ename: String,
        /// Error message
        evalue: String,
        /// Traceback lines
        #[serde(default)]
        traceback: Vec<String>,
    },
}

impl Output {
    /// Captured stdout
    #[must_use]
    pub fn stdout(text: impl Into<String>) -> Self {
        Self::Stream {
            name: "stdout".to_string(),
            text: Source::new(text),
        }
    }

    /// Trailing-expression result rendered as `text/plain`
    #[must_use]
    pub fn execute_result(execution_count: u32, text: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("text/plain".to_string(), Value::String(text.into()));
        Self::ExecuteResult {
            execution_count: Some(execution_count),
            data,
            metadata: Map::new(),
        }
    }

    /// Error output
    #[must_use]
    pub fn error(ename: impl Into<String>, evalue: impl Into<String>, traceback: Vec<String>) -> Self {
        Self::Error {
            ename: ename.into(),
            evalue: evalue.into(),
            traceback,
        }
    }

    /// Plain-text view: stream text, `text/plain` data, or `ename: evalue`
    #[must_use]
    pub fn text(&self) -> Option<String> {
        match self {
            Self::Stream { text, .. } => Some(text.as_str().to_string()),
            Self::ExecuteResult { data, .. } | Self::DisplayData { data, .. } => data
                .get("text/plain")
                .and_then(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Array(lines) => Some(
                        lines
                            .iter()
                            .filter_map(Value::as_str)
                            .collect::<String>(),
                    ),
                    _ => None,
                }),
            Self::Error { ename, evalue, .. } => Some(format!("{ename}: {evalue}")),
        }
    }

    /// Whether this is an error output
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}
