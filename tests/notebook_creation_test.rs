//! Notebook materialization from the bundled template

use proptest::prelude::*;
use tess_atlas::notebook::{validate, Notebook};
use tess_atlas::{CellCategory, Error, Pipeline};

#[test]
fn test_materialize_writes_valid_notebook() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::builder().notebook_root(dir.path()).build();

    let path = pipeline.materialize(723, "TEST", true).unwrap();

    assert_eq!(path, dir.path().join("TEST").join("toi_723.ipynb"));
    assert!(path.is_file());
    let notebook = Notebook::read(&path).unwrap();
    validate(&notebook).unwrap();
}

#[test]
fn test_parameters_substituted() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::builder().notebook_root(dir.path()).build();

    let path = pipeline.materialize(178, "v1", false).unwrap();
    let notebook = Notebook::read(&path).unwrap();

    let params: Vec<_> = notebook
        .cells
        .iter()
        .filter(|c| c.tags().iter().any(|t| t == CellCategory::Parameters.tag()))
        .collect();
    assert_eq!(params.len(), 1);
    assert!(params[0].source().contains("toi_number = 178"));
    assert!(params[0].source().contains("quickrun = false"));

    let meta = &notebook.metadata["tess_atlas"];
    assert_eq!(meta["toi"], 178);
    assert_eq!(meta["version"], "v1");
    assert_eq!(meta["quickrun"], false);
}

#[test]
fn test_outputs_start_empty() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::builder().notebook_root(dir.path()).build();
    let path = pipeline.materialize(103, "TEST", true).unwrap();
    let notebook = Notebook::read(&path).unwrap();
    assert!(notebook.code_cells().all(|(_, c)| c.outputs.is_empty()));
}

#[test]
fn test_missing_template() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::builder()
        .notebook_root(dir.path())
        .template(dir.path().join("nope.ipynb"))
        .build();
    let err = pipeline.materialize(723, "TEST", true).unwrap_err();
    assert!(matches!(err, Error::Materialization(_)), "{err}");
    assert!(!dir.path().join("TEST").join("toi_723.ipynb").exists());
}

#[test]
fn test_invalid_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::builder().notebook_root(dir.path()).build();
    assert!(matches!(
        pipeline.materialize(0, "TEST", true),
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        pipeline.materialize(723, "../escape", true),
        Err(Error::InvalidInput(_))
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: materializing twice yields the same cells
    #[test]
    fn prop_materialize_idempotent(target in 1u32..5000, quickrun in any::<bool>()) {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::builder().notebook_root(dir.path()).build();

        let first = Notebook::read(pipeline.materialize(target, "TEST", quickrun).unwrap()).unwrap();
        let second = Notebook::read(pipeline.materialize(target, "TEST", quickrun).unwrap()).unwrap();

        prop_assert_eq!(first.cells, second.cells);
        prop_assert_eq!(
            &first.metadata["tess_atlas"]["toi"],
            &second.metadata["tess_atlas"]["toi"]
        );
    }
}
