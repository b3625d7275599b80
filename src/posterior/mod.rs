//! Posterior store (Arrow/Parquet)
//!
//! A posterior trace is a table: one row per (chain, draw) sample, one
//! `Float64` column per model variable. On disk the whole table lives under a
//! single top-level struct column, [`POSTERIOR_KEY`]:
//!
//! ```text
//! posterior: Struct<
//!     chain: UInt32,      (only when the trace carries a sample index)
//!     draw:  UInt32,
//!     <var>: Float64,     (one per variable, in trace order)
//!     ...
//! >
//! ```
//!
//! Loading needs no side metadata: the reader looks up the fixed key and
//! unpacks its children.

use crate::{Error, Result};
use arrow::array::{Array, ArrayRef, Float64Array, RecordBatch, StructArray, UInt32Array};
use arrow::datatypes::{DataType, Field, Fields, Schema};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Top-level key holding the full table in an archive
pub const POSTERIOR_KEY: &str = "posterior";

/// Index column naming the chain of a sample
pub const CHAIN_COLUMN: &str = "chain";

/// Index column naming the draw of a sample within its chain
pub const DRAW_COLUMN: &str = "draw";

/// Row index identifying each sample
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SampleIndex {
    /// Chain of each row
    pub chain: Vec<u32>,
    /// Draw of each row within its chain
    pub draw: Vec<u32>,
}

impl SampleIndex {
    /// Index for `chains` chains of `draws` draws each, chain-major
    #[must_use]
    pub fn grid(chains: u32, draws: u32) -> Self {
        let mut index = Self::default();
        for c in 0..chains {
            for d in 0..draws {
                index.chain.push(c);
                index.draw.push(d);
            }
        }
        index
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Whether the index is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

/// One model variable
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    values: Vec<f64>,
}

impl Column {
    /// Variable name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sample values
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// Posterior sample table
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PosteriorTrace {
    index: Option<SampleIndex>,
    columns: Vec<Column>,
}

impl PosteriorTrace {
    /// Empty trace without a sample index
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty trace with a chain/draw index
    ///
    /// # Errors
    /// Returns error if `chain` and `draw` differ in length
    pub fn with_index(index: SampleIndex) -> Result<Self> {
        if index.chain.len() != index.draw.len() {
            return Err(Error::InvalidInput(format!(
                "chain index has {} rows but draw index has {}",
                index.chain.len(),
                index.draw.len()
            )));
        }
        Ok(Self {
            index: Some(index),
            columns: Vec::new(),
        })
    }

    /// Append a variable column
    ///
    /// # Errors
    /// Returns error if the name is reserved or already present, or the
    /// length disagrees with existing rows
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let name = name.into();
        if name == CHAIN_COLUMN || name == DRAW_COLUMN {
            return Err(Error::InvalidInput(format!(
                "'{name}' is reserved for the sample index"
            )));
        }
        if self.column(&name).is_some() {
            return Err(Error::InvalidInput(format!("duplicate column '{name}'")));
        }
        let expected = self
            .index
            .as_ref()
            .map(SampleIndex::len)
            .or_else(|| self.columns.first().map(|c| c.values.len()));
        if let Some(expected) = expected {
            if values.len() != expected {
                return Err(Error::InvalidInput(format!(
                    "column '{name}' has {} rows, expected {expected}",
                    values.len()
                )));
            }
        }
        self.columns.push(Column { name, values });
        Ok(())
    }

    /// Builder-style [`push_column`](Self::push_column)
    ///
    /// # Errors
    /// See [`push_column`](Self::push_column)
    pub fn column_with(mut self, name: impl Into<String>, values: Vec<f64>) -> Result<Self> {
        self.push_column(name, values)?;
        Ok(self)
    }

    /// Sample index, if any
    #[must_use]
    pub const fn index(&self) -> Option<&SampleIndex> {
        self.index.as_ref()
    }

    /// Variable columns in order
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Variable names in order
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(Column::name).collect()
    }

    /// Values of one variable
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(Column::values)
    }

    /// Number of samples
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.index.as_ref().map_or_else(
            || self.columns.first().map_or(0, |c| c.values.len()),
            SampleIndex::len,
        )
    }

    /// Mean of one variable
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self, name: &str) -> Option<f64> {
        let values = self.column(name)?;
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }

    /// Values of one variable grouped by chain, in chain order.
    ///
    /// `None` if the variable is missing or the trace has no sample index.
    #[must_use]
    pub fn chains(&self, name: &str) -> Option<Vec<Vec<f64>>> {
        let index = self.index.as_ref()?;
        let values = self.column(name)?;
        let mut by_chain: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
        for (chain, value) in index.chain.iter().zip(values) {
            by_chain.entry(*chain).or_default().push(*value);
        }
        Some(by_chain.into_values().collect())
    }

    fn struct_fields(&self) -> Fields {
        let mut fields = Vec::with_capacity(self.columns.len() + 2);
        if self.index.is_some() {
            fields.push(Field::new(CHAIN_COLUMN, DataType::UInt32, false));
            fields.push(Field::new(DRAW_COLUMN, DataType::UInt32, false));
        }
        for column in &self.columns {
            fields.push(Field::new(column.name.as_str(), DataType::Float64, false));
        }
        Fields::from(fields)
    }

    /// Convert to a single-column record batch keyed by [`POSTERIOR_KEY`]
    ///
    /// # Errors
    /// Returns error if the trace has no variables or Arrow rejects the arrays
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        if self.columns.is_empty() {
            return Err(Error::Serialization(
                "posterior trace has no variables".to_string(),
            ));
        }

        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.columns.len() + 2);
        if let Some(index) = &self.index {
            arrays.push(Arc::new(UInt32Array::from(index.chain.clone())));
            arrays.push(Arc::new(UInt32Array::from(index.draw.clone())));
        }
        for column in &self.columns {
            arrays.push(Arc::new(Float64Array::from(column.values.clone())));
        }

        let fields = self.struct_fields();
        let table = StructArray::try_new(fields.clone(), arrays, None)?;
        let schema = Schema::new(vec![Field::new(
            POSTERIOR_KEY,
            DataType::Struct(fields),
            false,
        )]);
        Ok(RecordBatch::try_new(Arc::new(schema), vec![Arc::new(table)])?)
    }

    fn from_struct_fields(fields: &Fields) -> Result<Self> {
        let mut trace = Self::new();
        let names: Vec<&str> = fields.iter().map(|f| f.name().as_str()).collect();
        match (names.contains(&CHAIN_COLUMN), names.contains(&DRAW_COLUMN)) {
            (true, true) => trace.index = Some(SampleIndex::default()),
            (false, false) => {}
            (true, false) => {
                return Err(Error::CorruptArchive(format!(
                    "archive has '{CHAIN_COLUMN}' without '{DRAW_COLUMN}'"
                )))
            }
            (false, true) => {
                return Err(Error::CorruptArchive(format!(
                    "archive has '{DRAW_COLUMN}' without '{CHAIN_COLUMN}'"
                )))
            }
        }
        for field in fields.iter() {
            let name = field.name().as_str();
            if name == CHAIN_COLUMN || name == DRAW_COLUMN {
                continue;
            }
            if field.data_type() != &DataType::Float64 {
                return Err(Error::CorruptArchive(format!(
                    "variable '{name}' has type {}, expected Float64",
                    field.data_type()
                )));
            }
            trace.columns.push(Column {
                name: name.to_string(),
                values: Vec::new(),
            });
        }
        Ok(trace)
    }

    fn append_struct(&mut self, table: &StructArray) -> Result<()> {
        if let Some(index) = self.index.as_mut() {
            index.chain.extend(u32_child(table, CHAIN_COLUMN)?.values().iter());
            index.draw.extend(u32_child(table, DRAW_COLUMN)?.values().iter());
        }
        for column in &mut self.columns {
            let values = table
                .column_by_name(&column.name)
                .and_then(|a| a.as_any().downcast_ref::<Float64Array>())
                .ok_or_else(|| {
                    Error::CorruptArchive(format!("variable '{}' is unreadable", column.name))
                })?;
            column.values.extend(values.values().iter());
        }
        Ok(())
    }
}

fn u32_child<'a>(table: &'a StructArray, name: &str) -> Result<&'a UInt32Array> {
    table
        .column_by_name(name)
        .and_then(|a| a.as_any().downcast_ref::<UInt32Array>())
        .ok_or_else(|| Error::CorruptArchive(format!("index column '{name}' is unreadable")))
}

fn posterior_fields(schema: &Schema) -> Result<Fields> {
    let field = schema.field_with_name(POSTERIOR_KEY).map_err(|_| {
        Error::CorruptArchive(format!("archive has no top-level '{POSTERIOR_KEY}' key"))
    })?;
    match field.data_type() {
        DataType::Struct(fields) => Ok(fields.clone()),
        other => Err(Error::CorruptArchive(format!(
            "'{POSTERIOR_KEY}' is {other}, expected a table"
        ))),
    }
}

/// Serialize a posterior trace to a single archive file at `path`.
///
/// Any existing file at `path` is replaced.
///
/// # Errors
/// Returns [`Error::Serialization`] if the trace is empty or the file cannot
/// be written
#[instrument(skip_all, fields(path = %path.as_ref().display(), rows = trace.num_rows()))]
pub fn save_posteriors<P: AsRef<Path>>(trace: &PosteriorTrace, path: P) -> Result<()> {
    let batch = trace.to_record_batch()?;

    let file = File::create(path.as_ref()).map_err(|e| {
        Error::Serialization(format!(
            "Failed to create archive {}: {e}",
            path.as_ref().display()
        ))
    })?;

    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .map_err(|e| Error::Serialization(format!("Failed to create Parquet writer: {e}")))?;
    writer
        .write(&batch)
        .map_err(|e| Error::Serialization(format!("Failed to write posterior table: {e}")))?;
    writer
        .close()
        .map_err(|e| Error::Serialization(format!("Failed to finalize archive: {e}")))?;

    debug!(columns = trace.columns().len(), "posterior archive written");
    Ok(())
}

/// Load a posterior trace written by [`save_posteriors`].
///
/// # Errors
/// Returns [`Error::CorruptArchive`] if the file is missing, unreadable, or
/// lacks the [`POSTERIOR_KEY`] table
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn load_posteriors<P: AsRef<Path>>(path: P) -> Result<PosteriorTrace> {
    let file = File::open(path.as_ref()).map_err(|e| {
        Error::CorruptArchive(format!(
            "Failed to open archive {}: {e}",
            path.as_ref().display()
        ))
    })?;

    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| Error::CorruptArchive(format!("Failed to parse archive: {e}")))?;

    let fields = posterior_fields(builder.schema())?;
    let mut trace = PosteriorTrace::from_struct_fields(&fields)?;

    let reader = builder
        .build()
        .map_err(|e| Error::CorruptArchive(format!("Failed to create archive reader: {e}")))?;

    for batch in reader {
        let batch = batch
            .map_err(|e| Error::CorruptArchive(format!("Failed to read record batch: {e}")))?;
        let table = batch
            .column_by_name(POSTERIOR_KEY)
            .and_then(|a| a.as_any().downcast_ref::<StructArray>())
            .ok_or_else(|| {
                Error::CorruptArchive(format!("'{POSTERIOR_KEY}' column is not a table"))
            })?;
        trace.append_struct(table)?;
    }

    debug!(rows = trace.num_rows(), "posterior archive loaded");
    Ok(trace)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexed_trace() -> PosteriorTrace {
        PosteriorTrace::with_index(SampleIndex::grid(2, 3))
            .unwrap()
            .column_with("period", vec![1.0, 1.1, 1.2, 1.3, 1.4, 1.5])
            .unwrap()
            .column_with("depth", vec![0.01, 0.02, 0.03, 0.04, 0.05, 0.06])
            .unwrap()
    }

    #[test]
    fn test_chains_split_by_index() {
        let trace = indexed_trace();
        assert_eq!(
            trace.chains("period"),
            Some(vec![vec![1.0, 1.1, 1.2], vec![1.3, 1.4, 1.5]])
        );
        assert_eq!(trace.chains("missing"), None);

        let flat = PosteriorTrace::new().column_with("y", vec![1.0]).unwrap();
        assert_eq!(flat.chains("y"), None);
    }

    #[test]
    fn test_grid_index() {
        let index = SampleIndex::grid(2, 3);
        assert_eq!(index.chain, vec![0, 0, 0, 1, 1, 1]);
        assert_eq!(index.draw, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_push_column_length_mismatch() {
        let mut trace = PosteriorTrace::new();
        trace.push_column("a", vec![1.0, 2.0]).unwrap();
        let err = trace.push_column("b", vec![1.0]).unwrap_err();
        assert!(err.to_string().contains("expected 2"));
    }

    #[test]
    fn test_reserved_and_duplicate_names() {
        let mut trace = PosteriorTrace::new();
        assert!(trace.push_column(CHAIN_COLUMN, vec![]).is_err());
        trace.push_column("y", vec![1.0]).unwrap();
        assert!(trace.push_column("y", vec![2.0]).is_err());
    }

    #[test]
    fn test_record_batch_has_single_key() {
        let batch = indexed_trace().to_record_batch().unwrap();
        assert_eq!(batch.num_columns(), 1);
        assert_eq!(batch.schema().field(0).name(), POSTERIOR_KEY);
        assert_eq!(batch.num_rows(), 6);
    }

    #[test]
    fn test_empty_trace_not_serializable() {
        let err = PosteriorTrace::new().to_record_batch().unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_round_trip_with_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.parquet");
        let trace = indexed_trace();

        save_posteriors(&trace, &path).unwrap();
        let loaded = load_posteriors(&path).unwrap();

        assert_eq!(loaded, trace);
        assert_eq!(loaded.column_names(), vec!["period", "depth"]);
    }

    #[test]
    fn test_round_trip_zero_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.parquet");
        let trace = PosteriorTrace::new().column_with("y", vec![]).unwrap();

        save_posteriors(&trace, &path).unwrap();
        let loaded = load_posteriors(&path).unwrap();
        assert_eq!(loaded.num_rows(), 0);
        assert_eq!(loaded.column_names(), vec!["y"]);
    }

    #[test]
    fn test_mean() {
        let trace = PosteriorTrace::new()
            .column_with("y", vec![1.0, 2.0, 3.0])
            .unwrap();
        assert_eq!(trace.mean("y"), Some(2.0));
        assert_eq!(trace.mean("missing"), None);
    }

    #[test]
    fn test_load_missing_file_is_corrupt_archive() {
        let err = load_posteriors("/nonexistent/trace.parquet").unwrap_err();
        assert!(matches!(err, Error::CorruptArchive(_)));
    }
}
