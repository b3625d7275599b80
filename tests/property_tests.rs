//! Property-based tests for tess-atlas
//!
//! - Archive integrity: whatever is saved loads back unchanged
//! - Kernel arithmetic agrees with the host language
//! - Run with `ProptestConfig::with_cases(32)` to keep file IO bounded

use proptest::prelude::*;
use tess_atlas::kernel::{Kernel, Value};
use tess_atlas::{load_posteriors, save_posteriors, PosteriorTrace, SampleIndex};

// ============================================================================
// Strategies
// ============================================================================

/// Trace with 1..4 variables over a `chains x draws` grid
fn arb_trace() -> impl Strategy<Value = PosteriorTrace> {
    (1u32..4, 1u32..30, 1usize..4).prop_flat_map(|(chains, draws, vars)| {
        let rows = (chains * draws) as usize;
        proptest::collection::vec(
            proptest::collection::vec(-1.0e6f64..1.0e6, rows),
            vars,
        )
        .prop_map(move |columns| {
            let mut trace = PosteriorTrace::with_index(SampleIndex::grid(chains, draws)).unwrap();
            for (i, values) in columns.into_iter().enumerate() {
                trace.push_column(format!("var_{i}"), values).unwrap();
            }
            trace
        })
    })
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: load(save(trace)) == trace
    #[test]
    fn prop_archive_preserves_trace(trace in arb_trace()) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.parquet");
        save_posteriors(&trace, &path).unwrap();
        let loaded = load_posteriors(&path).unwrap();
        prop_assert_eq!(loaded, trace);
    }

    /// Property: column means match a direct computation
    #[test]
    fn prop_mean_matches(values in proptest::collection::vec(-1.0e3f64..1.0e3, 1..200)) {
        let expected = values.iter().sum::<f64>() / values.len() as f64;
        let trace = PosteriorTrace::new().column_with("x", values).unwrap();
        let mean = trace.mean("x").unwrap();
        prop_assert!((mean - expected).abs() < 1e-9);
    }

    /// Property: integer arithmetic in a cell matches i64 arithmetic
    #[test]
    fn prop_kernel_integer_arithmetic(a in -10_000i64..10_000, b in 1i64..1000) {
        let mut kernel = Kernel::new();
        let run = kernel.execute_cell(&format!("x = {a} * {b} + {b}\ny = x - {b}"));
        prop_assert!(run.succeeded());
        prop_assert_eq!(kernel.get("y"), Some(Value::Int(a * b)));
    }

    /// Property: `%` takes the sign of the divisor
    #[test]
    fn prop_kernel_modulo_sign(a in -1000i64..1000, b in 1i64..50) {
        let mut kernel = Kernel::new();
        let run = kernel.execute_cell(&format!("r = {a} % {b}"));
        prop_assert!(run.succeeded());
        prop_assert_eq!(kernel.get("r"), Some(Value::Int(a.rem_euclid(b))));
    }
}
