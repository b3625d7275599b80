//! `transit` module: the inference library analysis notebooks import.
//!
//! Targets come from a small built-in catalog and their light curves are
//! synthesized deterministically, so notebooks run offline and reproducibly.

use super::value::{required, Args, CellError, EvalResult, Module, NativeContext, Value};
use crate::sampler::{self, ModelSpec, Prior, SamplerOptions};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Import name of the module
pub const MODULE_NAME: &str = "transit";

/// Per-measurement noise of synthesized depths
const DEPTH_NOISE: f64 = 5e-4;

/// Orbital periods (days) of catalogued multi- and single-planet targets
const CATALOG: &[(i64, &[f64])] = &[
    (103, &[3.547_854]),
    (178, &[1.914_558, 3.238_450, 6.557_700]),
    (723, &[0.766_980]),
];

/// Build a fresh `transit` module
#[must_use]
pub fn module() -> Module {
    Module::new(MODULE_NAME, env!("CARGO_PKG_VERSION"))
        .with_function("toi", toi)
        .with_function("TOI", toi)
        .with_function("lightcurve", lightcurve)
        .with_function("Model", model)
        .with_function("sample", sample)
}

#[allow(clippy::cast_precision_loss)]
fn periods_for(toi_number: i64) -> Vec<f64> {
    CATALOG
        .iter()
        .find(|(n, _)| *n == toi_number)
        .map_or_else(
            || vec![1.0 + (toi_number % 50) as f64 * 0.25],
            |(_, periods)| periods.to_vec(),
        )
}

#[allow(clippy::cast_precision_loss)]
fn true_depth(planet: usize) -> f64 {
    1e-3 + 1.5e-3 * planet as f64
}

fn toi(_: &mut NativeContext<'_>, args: Args) -> EvalResult<Value> {
    let number = required(args.bind("toi", &["toi_number"])?.pop().flatten(), "toi", "toi_number")?
        .expect_int("toi_number")?;
    if number <= 0 {
        return Err(CellError::value(format!(
            "toi_number must be positive, got {number}"
        )));
    }
    let periods = periods_for(number);
    let planet_count = i64::try_from(periods.len()).unwrap_or(i64::MAX);
    Ok(Value::record([
        ("toi_number", Value::Int(number)),
        ("planet_count", Value::Int(planet_count)),
        ("periods", Value::floats(&periods)),
    ]))
}

fn lightcurve(_: &mut NativeContext<'_>, args: Args) -> EvalResult<Value> {
    let bound = args.bind("lightcurve", &["toi", "points"])?;
    let mut it = bound.into_iter();
    let target = required(it.next().flatten(), "lightcurve", "toi")?;
    let points = match it.next().flatten() {
        Some(v) => usize::try_from(v.expect_int("points")?)
            .map_err(|_| CellError::value("points must be non-negative"))?,
        None => 40,
    };

    let Value::Record(fields) = &target else {
        return Err(CellError::type_error(format!(
            "lightcurve() expects a toi record, not {}",
            target.type_name()
        )));
    };
    let number = fields
        .get("toi_number")
        .ok_or_else(|| CellError::value("toi record has no toi_number"))?
        .expect_int("toi_number")?;
    let planets = periods_for(number).len();

    let mut rng = StdRng::seed_from_u64(number.unsigned_abs());
    let depths: Vec<Value> = (0..planets)
        .map(|planet| {
            let truth = true_depth(planet);
            let samples: Vec<f64> = (0..points)
                .map(|_| truth + DEPTH_NOISE * 3f64.sqrt() * (2.0 * rng.gen::<f64>() - 1.0))
                .collect();
            Value::floats(&samples)
        })
        .collect();

    Ok(Value::record([
        ("toi_number", Value::Int(number)),
        ("depths", Value::List(depths)),
        ("noise", Value::Float(DEPTH_NOISE)),
    ]))
}

fn model(_: &mut NativeContext<'_>, args: Args) -> EvalResult<Value> {
    args.bind("Model", &[])?;
    Ok(Value::Model(Arc::new(Mutex::new(ModelSpec::new()))))
}

fn count(value: Option<Value>, what: &str, default: usize) -> EvalResult<usize> {
    match value {
        None | Some(Value::None) => Ok(default),
        Some(v) => usize::try_from(v.expect_int(what)?)
            .map_err(|_| CellError::value(format!("{what} must be non-negative"))),
    }
}

fn sample(_: &mut NativeContext<'_>, args: Args) -> EvalResult<Value> {
    let bound = args.bind(
        "sample",
        &["model", "draws", "tune", "chains", "seed", "max_rhat"],
    )?;
    let mut it = bound.into_iter();
    let target = required(it.next().flatten(), "sample", "model")?;
    let defaults = SamplerOptions::default();
    let draws = count(it.next().flatten(), "draws", defaults.draws)?;
    let tune = count(it.next().flatten(), "tune", defaults.tune)?;
    let chains = count(it.next().flatten(), "chains", defaults.chains)?;
    let seed = match it.next().flatten() {
        None | Some(Value::None) => None,
        Some(v) => Some(v.expect_int("seed")?.unsigned_abs()),
    };
    let max_rhat = match it.next().flatten() {
        None | Some(Value::None) => None,
        Some(v) => Some(v.expect_f64("max_rhat")?),
    };

    let Value::Model(spec) = &target else {
        return Err(CellError::type_error(format!(
            "sample() expects a Model, not {}",
            target.type_name()
        )));
    };
    let spec = lock(spec)?.clone();

    let options = SamplerOptions {
        draws,
        tune,
        chains,
        seed,
        max_rhat,
    };
    let result = sampler::sample(&spec, &options).map_err(|e| CellError::sampling(&e))?;
    for d in &result.diagnostics {
        debug!(variable = %d.name, rhat = d.rhat, mean = d.mean, sd = d.sd, "posterior summary");
    }
    Ok(Value::Trace(Arc::new(result.trace)))
}

fn lock(spec: &Mutex<ModelSpec>) -> EvalResult<std::sync::MutexGuard<'_, ModelSpec>> {
    spec.lock()
        .map_err(|_| CellError::new("RuntimeError", "model state poisoned"))
}

fn three(args: Args, method: &str, params: &[&str; 3]) -> EvalResult<[Value; 3]> {
    let bound = args.bind(method, params)?;
    let mut it = bound.into_iter().zip(params.iter());
    let mut next = || {
        it.next()
            .map_or_else(
                || Err(CellError::type_error(format!("{method}() argument missing"))),
                |(slot, param)| required(slot, method, param),
            )
    };
    Ok([next()?, next()?, next()?])
}

/// Call a method on a `Model` value
///
/// # Errors
/// `AttributeError` for unknown methods; argument and model errors otherwise
pub fn model_method(spec: &Mutex<ModelSpec>, method: &str, args: Args) -> EvalResult<Value> {
    match method {
        "uniform" | "normal" => {
            let names = if method == "uniform" {
                ["name", "lower", "upper"]
            } else {
                ["name", "mu", "sigma"]
            };
            let [name, a, b] = three(args, method, &names)?;
            let (a, b) = (a.expect_f64(names[1])?, b.expect_f64(names[2])?);
            let prior = if method == "uniform" {
                Prior::Uniform { lower: a, upper: b }
            } else {
                Prior::Normal { mu: a, sigma: b }
            };
            lock(spec)?
                .add_variable(name.expect_str("name")?, prior)
                .map_err(|e| CellError::value(e.to_string()))?;
            Ok(Value::None)
        }
        "observe" => {
            let [name, data, sigma] = three(args, method, &["name", "data", "sigma"])?;
            lock(spec)?
                .observe(
                    name.expect_str("name")?,
                    data.expect_floats("data")?,
                    sigma.expect_f64("sigma")?,
                )
                .map_err(|e| CellError::value(e.to_string()))?;
            Ok(Value::None)
        }
        "variables" => {
            args.bind(method, &[])?;
            let names = lock(spec)?
                .variable_names()
                .into_iter()
                .map(|n| Value::Str(n.to_string()))
                .collect();
            Ok(Value::List(names))
        }
        other => Err(CellError::attribute("Model", other)),
    }
}
