//! Execution Record - lifecycle of one execution attempt

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Status of an execution attempt.
///
/// Full runs go `Pending -> Running -> Succeeded | Failed`; tagged runs go
/// `Pending -> Running -> Ready`. Each transition happens at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Created but not yet started.
    Pending,
    /// Cells are executing.
    Running,
    /// Every cell completed without error.
    Succeeded,
    /// A cell raised, or the kernel died.
    Failed,
    /// Tagged run finished; the live kernel accepts further requests.
    Ready,
}

impl ExecutionStatus {
    /// True once the attempt can no longer change state
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Ready)
    }
}

/// Kind of execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Every cell, stop at first error
    Full,
    /// Cells selected by tag, errors tolerated on request
    Tagged,
}

/// A file produced as a side effect of execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    path: PathBuf,
    size_bytes: u64,
    created_at: DateTime<Utc>,
}

impl ArtifactRecord {
    /// Record an artifact with the current timestamp.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            size_bytes,
            created_at: Utc::now(),
        }
    }

    /// Record an existing file, taking size and time from its metadata.
    ///
    /// # Errors
    /// Returns error if the file cannot be inspected
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let meta = fs::metadata(&path)?;
        let created_at = meta
            .modified()
            .map_or_else(|_| Utc::now(), DateTime::<Utc>::from);
        Ok(Self {
            path,
            size_bytes: meta.len(),
            created_at,
        })
    }

    /// Artifact path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size in bytes.
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Creation (last modification) time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Execution Record tracks one attempt at running a notebook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionRecord {
    notebook: PathBuf,
    version: String,
    mode: ExecutionMode,
    status: ExecutionStatus,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    failed_cell: Option<usize>,
    artifacts: Vec<ArtifactRecord>,
}

impl ExecutionRecord {
    /// Create a record in Pending status.
    #[must_use]
    pub fn new(notebook: impl Into<PathBuf>, version: impl Into<String>, mode: ExecutionMode) -> Self {
        Self {
            notebook: notebook.into(),
            version: version.into(),
            mode,
            status: ExecutionStatus::Pending,
            started_at: None,
            ended_at: None,
            failed_cell: None,
            artifacts: Vec::new(),
        }
    }

    /// Notebook being executed.
    #[must_use]
    pub fn notebook(&self) -> &Path {
        &self.notebook
    }

    /// Version label of the run.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Execution mode.
    #[must_use]
    pub const fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> ExecutionStatus {
        self.status
    }

    /// Start timestamp, once started.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// End timestamp, once finished.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Document index of the first failing cell, if any.
    #[must_use]
    pub const fn failed_cell(&self) -> Option<usize> {
        self.failed_cell
    }

    /// Artifacts produced by the run.
    #[must_use]
    pub fn artifacts(&self) -> &[ArtifactRecord] {
        &self.artifacts
    }

    /// Transition Pending -> Running.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the attempt was already started
    pub fn start(&mut self) -> Result<()> {
        if self.status != ExecutionStatus::Pending {
            return Err(Error::InvalidInput(format!(
                "cannot start execution in state {:?}",
                self.status
            )));
        }
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Note the first failing cell.
    pub fn mark_failed_cell(&mut self, index: usize) {
        self.failed_cell.get_or_insert(index);
    }

    /// Attach an artifact.
    pub fn add_artifact(&mut self, artifact: ArtifactRecord) {
        self.artifacts.push(artifact);
    }

    /// Transition Running -> `status`.
    ///
    /// # Errors
    /// Returns `InvalidInput` if not running, or if `status` is not a final
    /// state for this mode
    pub fn complete(&mut self, status: ExecutionStatus) -> Result<()> {
        let allowed = match self.mode {
            ExecutionMode::Full => {
                matches!(status, ExecutionStatus::Succeeded | ExecutionStatus::Failed)
            }
            ExecutionMode::Tagged => status == ExecutionStatus::Ready,
        };
        if self.status != ExecutionStatus::Running || !allowed {
            return Err(Error::InvalidInput(format!(
                "cannot move {:?} execution from {:?} to {status:?}",
                self.mode, self.status
            )));
        }
        self.status = status;
        self.ended_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_status_default() {
        let record = ExecutionRecord::new("toi_1.ipynb", "TEST", ExecutionMode::Full);
        assert_eq!(record.status(), ExecutionStatus::Pending);
        assert!(record.started_at().is_none());
    }

    #[test]
    fn test_full_lifecycle() {
        let mut record = ExecutionRecord::new("toi_1.ipynb", "TEST", ExecutionMode::Full);
        record.start().unwrap();
        assert_eq!(record.status(), ExecutionStatus::Running);
        record.complete(ExecutionStatus::Succeeded).unwrap();
        assert!(record.status().is_terminal());
        assert!(record.ended_at().unwrap() >= record.started_at().unwrap());
    }

    #[test]
    fn test_transitions_are_single_shot() {
        let mut record = ExecutionRecord::new("toi_1.ipynb", "TEST", ExecutionMode::Full);
        assert!(record.complete(ExecutionStatus::Failed).is_err());
        record.start().unwrap();
        assert!(record.start().is_err());
        record.complete(ExecutionStatus::Failed).unwrap();
        assert!(record.complete(ExecutionStatus::Succeeded).is_err());
    }

    #[test]
    fn test_tagged_run_ends_ready() {
        let mut record = ExecutionRecord::new("t.ipynb", "TEST", ExecutionMode::Tagged);
        record.start().unwrap();
        assert!(record.complete(ExecutionStatus::Succeeded).is_err());
        record.complete(ExecutionStatus::Ready).unwrap();
    }

    #[test]
    fn test_first_failed_cell_wins() {
        let mut record = ExecutionRecord::new("t.ipynb", "TEST", ExecutionMode::Tagged);
        record.mark_failed_cell(3);
        record.mark_failed_cell(5);
        assert_eq!(record.failed_cell(), Some(3));
    }

    #[test]
    fn test_artifact_from_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"12345").unwrap();
        let artifact = ArtifactRecord::from_file(file.path()).unwrap();
        assert_eq!(artifact.size_bytes(), 5);
        assert_eq!(artifact.path(), file.path());
    }

    #[test]
    fn test_record_serializes() {
        let mut record = ExecutionRecord::new("toi_1.ipynb", "TEST", ExecutionMode::Full);
        record.add_artifact(ArtifactRecord::new("toi_1.parquet", 10));
        let json = serde_json::to_string(&record).unwrap();
        let back: ExecutionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
