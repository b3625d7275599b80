//! General nbformat v4 validity checks

use super::{Cell, Notebook, Output, NBFORMAT};
use crate::{Error, Result};
use std::collections::HashSet;

const MAX_CELL_ID_LEN: usize = 64;

fn valid_cell_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_CELL_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn validate_output(cell: usize, output: &Output) -> Result<()> {
    match output {
        Output::Stream { name, .. } if name != "stdout" && name != "stderr" => Err(
            Error::NotebookSchema(format!("cell {cell}: invalid stream name '{name}'")),
        ),
        Output::ExecuteResult {
            execution_count: None,
            ..
        } => Err(Error::NotebookSchema(format!(
            "cell {cell}: execute_result without execution_count"
        ))),
        Output::Error { ename, .. } if ename.is_empty() => Err(Error::NotebookSchema(
            format!("cell {cell}: error output without a name"),
        )),
        _ => Ok(()),
    }
}

/// Validate a document against the general notebook schema.
///
/// # Errors
/// Returns [`Error::NotebookSchema`] describing the first violation found
pub fn validate(notebook: &Notebook) -> Result<()> {
    if notebook.nbformat != NBFORMAT {
        return Err(Error::NotebookSchema(format!(
            "unsupported nbformat {} (expected {NBFORMAT})",
            notebook.nbformat
        )));
    }

    let ids_required = notebook.nbformat_minor >= 5;
    let mut seen_ids = HashSet::new();

    for (index, cell) in notebook.cells.iter().enumerate() {
        match cell.id() {
            Some(id) => {
                if !valid_cell_id(id) {
                    return Err(Error::NotebookSchema(format!(
                        "cell {index}: invalid id '{id}'"
                    )));
                }
                if !seen_ids.insert(id) {
                    return Err(Error::NotebookSchema(format!(
                        "cell {index}: duplicate id '{id}'"
                    )));
                }
            }
            None if ids_required => {
                return Err(Error::NotebookSchema(format!(
                    "cell {index}: missing id (required from nbformat 4.5)"
                )));
            }
            None => {}
        }

        let mut seen_tags = HashSet::new();
        for tag in cell.tags() {
            if !seen_tags.insert(tag.as_str()) {
                return Err(Error::NotebookSchema(format!(
                    "cell {index}: duplicate tag '{tag}'"
                )));
            }
        }

        if let Cell::Code(code) = cell {
            for output in &code.outputs {
                validate_output(index, output)?;
            }
        }
    }

    Ok(())
}
