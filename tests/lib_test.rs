//! Tests for the top-level Pipeline API

use std::path::Path;
use tess_atlas::kernel::ModuleRegistry;
use tess_atlas::{CellCategory, Pipeline, PipelineConfig, RunParameters, TargetId};

#[test]
fn test_pipeline_builder_defaults() {
    let pipeline = Pipeline::builder().build();
    assert_eq!(pipeline.notebook_root(), Path::new("notebooks"));
    assert!(pipeline.resolver().path().ends_with("templates/template.ipynb"));
}

#[test]
fn test_pipeline_builder_chain() {
    let pipeline = Pipeline::builder()
        .notebook_root("/scratch/notebooks")
        .posterior_extension("pq")
        .modules(ModuleRegistry::default())
        .build();
    assert_eq!(
        pipeline.sidecar_path(42, "v2").unwrap(),
        Path::new("/scratch/notebooks/v2/toi_42.pq")
    );
    assert!(pipeline.engine().modules().names().contains(&"transit"));
}

#[test]
fn test_pipeline_from_config() {
    let config = PipelineConfig {
        notebook_root: "/tmp/atlas".into(),
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::from_config(config);
    assert_eq!(
        pipeline.notebook_path(7, "TEST").unwrap(),
        Path::new("/tmp/atlas/TEST/toi_7.ipynb")
    );
}

#[test]
fn test_run_parameters() {
    let params = RunParameters::new(723, "TEST", true).unwrap();
    assert_eq!(params.target(), TargetId::new(723).unwrap());
    assert_eq!(params.version(), "TEST");
    assert!(params.quickrun());
    assert!(RunParameters::new(723, "", true).is_err());
}

#[test]
fn test_cell_category_tags() {
    for category in CellCategory::ALL {
        assert_eq!(CellCategory::from_tag(category.tag()), Some(category));
    }
    assert_eq!("exe".parse::<CellCategory>().unwrap(), CellCategory::Analysis);
    assert!("unknown".parse::<CellCategory>().is_err());
}
