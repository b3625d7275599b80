//! Pipeline configuration
//!
//! Defaults, a JSON file, or environment overrides:
//!
//! | Variable                   | Field           |
//! |----------------------------|-----------------|
//! | `TESS_ATLAS_NOTEBOOK_ROOT` | `notebook_root` |
//! | `TESS_ATLAS_TEMPLATE`      | `template_path` |

use crate::error::{Error, Result};
use crate::template::BUNDLED_TEMPLATE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding `notebook_root`
pub const ENV_NOTEBOOK_ROOT: &str = "TESS_ATLAS_NOTEBOOK_ROOT";

/// Environment variable overriding `template_path`
pub const ENV_TEMPLATE: &str = "TESS_ATLAS_TEMPLATE";

/// Settings shared by every run of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Parent directory of all version namespaces
    pub notebook_root: PathBuf,
    /// Template notebook
    pub template_path: PathBuf,
    /// Extension of posterior sidecars
    pub posterior_extension: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            notebook_root: PathBuf::from("notebooks"),
            template_path: PathBuf::from(BUNDLED_TEMPLATE),
            posterior_extension: "parquet".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Defaults with environment overrides applied
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var_os(key).map(PathBuf::from))
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<PathBuf>) -> Self {
        if let Some(root) = lookup(ENV_NOTEBOOK_ROOT) {
            self.notebook_root = root;
        }
        if let Some(template) = lookup(ENV_TEMPLATE) {
            self.template_path = template;
        }
        self
    }

    /// Read a JSON config file; missing fields take their defaults
    ///
    /// # Errors
    /// Returns `Io` if unreadable, `InvalidInput` if not valid config JSON
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| Error::InvalidInput(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.notebook_root, PathBuf::from("notebooks"));
        assert!(config.template_path.ends_with("templates/template.ipynb"));
        assert_eq!(config.posterior_extension, "parquet");
    }

    #[test]
    fn test_overrides() {
        let config = PipelineConfig::default().with_overrides(|key| {
            (key == ENV_NOTEBOOK_ROOT).then(|| PathBuf::from("/data/nb"))
        });
        assert_eq!(config.notebook_root, PathBuf::from("/data/nb"));
        assert_eq!(config.template_path, PipelineConfig::default().template_path);
    }

    #[test]
    fn test_json_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "notebook_root": "/scratch" }"#).unwrap();
        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.notebook_root, PathBuf::from("/scratch"));
        assert_eq!(config.posterior_extension, "parquet");
    }

    #[test]
    fn test_json_file_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(
            PipelineConfig::from_json_file(&path),
            Err(Error::InvalidInput(_))
        ));
    }
}
