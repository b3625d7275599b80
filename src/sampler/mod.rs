//! Posterior sampling for notebook models
//!
//! Adaptive random-walk Metropolis over a small prior/likelihood
//! specification. This is the offline stand-in for the external inference
//! library that analysis notebooks drive; everything it produces is a
//! [`PosteriorTrace`] with a chain/draw index.
//!
//! Convergence is judged with split-R̂ (Gelman et al. 2013, §11.4).

use crate::posterior::{PosteriorTrace, SampleIndex};
use anyhow::{bail, ensure, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Iterations between step-size adaptations during tuning
const ADAPT_INTERVAL: usize = 25;

/// Prior over one model variable
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Prior {
    /// Flat on `[lower, upper]`
    Uniform {
        /// Lower bound
        lower: f64,
        /// Upper bound
        upper: f64,
    },
    /// Gaussian
    Normal {
        /// Mean
        mu: f64,
        /// Standard deviation
        sigma: f64,
    },
}

impl Prior {
    fn log_density(&self, x: f64) -> f64 {
        match *self {
            Self::Uniform { lower, upper } => {
                if (lower..=upper).contains(&x) {
                    0.0
                } else {
                    f64::NEG_INFINITY
                }
            }
            Self::Normal { mu, sigma } => {
                let z = (x - mu) / sigma;
                -0.5 * z * z
            }
        }
    }

    fn initial_value(&self) -> f64 {
        match *self {
            Self::Uniform { lower, upper } => 0.5 * (lower + upper),
            Self::Normal { mu, .. } => mu,
        }
    }

    fn initial_step(&self) -> f64 {
        match *self {
            Self::Uniform { lower, upper } => 0.1 * (upper - lower),
            Self::Normal { sigma, .. } => 0.5 * sigma,
        }
    }
}

/// Gaussian measurements of one variable
#[derive(Debug, Clone, PartialEq)]
struct Observation {
    variable: usize,
    data: Vec<f64>,
    sigma: f64,
}

/// Model specification: named variables with priors, plus observations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelSpec {
    variables: Vec<(String, Prior)>,
    observations: Vec<Observation>,
}

impl ModelSpec {
    /// Empty model
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a variable
    ///
    /// # Errors
    /// Returns error if the name is taken or the prior is degenerate
    pub fn add_variable(&mut self, name: impl Into<String>, prior: Prior) -> Result<()> {
        let name = name.into();
        ensure!(
            !self.variables.iter().any(|(n, _)| *n == name),
            "variable '{name}' already declared"
        );
        match prior {
            Prior::Uniform { lower, upper } => ensure!(
                lower.is_finite() && upper.is_finite() && lower < upper,
                "uniform prior for '{name}' needs finite lower < upper, got [{lower}, {upper}]"
            ),
            Prior::Normal { mu, sigma } => ensure!(
                mu.is_finite() && sigma.is_finite() && sigma > 0.0,
                "normal prior for '{name}' needs finite mu and sigma > 0"
            ),
        }
        self.variables.push((name, prior));
        Ok(())
    }

    /// Attach Gaussian measurements of a declared variable
    ///
    /// # Errors
    /// Returns error if the variable is unknown or `sigma` is not positive
    pub fn observe(&mut self, name: &str, data: Vec<f64>, sigma: f64) -> Result<()> {
        let Some(variable) = self.variables.iter().position(|(n, _)| n == name) else {
            bail!("cannot observe undeclared variable '{name}'");
        };
        ensure!(
            sigma.is_finite() && sigma > 0.0,
            "observation noise for '{name}' must be positive"
        );
        ensure!(
            data.iter().all(|d| d.is_finite()),
            "observations of '{name}' must be finite"
        );
        self.observations.push(Observation {
            variable,
            data,
            sigma,
        });
        Ok(())
    }

    /// Variable names in declaration order
    #[must_use]
    pub fn variable_names(&self) -> Vec<&str> {
        self.variables.iter().map(|(n, _)| n.as_str()).collect()
    }

    fn log_density(&self, point: &[f64]) -> f64 {
        let mut total: f64 = self
            .variables
            .iter()
            .zip(point)
            .map(|((_, prior), x)| prior.log_density(*x))
            .sum();
        if !total.is_finite() {
            return total;
        }
        for obs in &self.observations {
            let x = point[obs.variable];
            for d in &obs.data {
                let z = (d - x) / obs.sigma;
                total -= 0.5 * z * z;
            }
        }
        total
    }
}

/// Sampler settings
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerOptions {
    /// Retained draws per chain
    pub draws: usize,
    /// Tuning iterations per chain (discarded)
    pub tune: usize,
    /// Independent chains
    pub chains: usize,
    /// Base seed; chain `c` uses `seed + c`
    pub seed: Option<u64>,
    /// Fail unless every variable's split-R̂ is at most this
    pub max_rhat: Option<f64>,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            draws: 1000,
            tune: 1000,
            chains: 4,
            seed: None,
            max_rhat: None,
        }
    }
}

/// Per-variable summary
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDiagnostics {
    /// Variable name
    pub name: String,
    /// Split-R̂ (should be < 1.01 for convergence)
    pub rhat: f64,
    /// Mean across all chains
    pub mean: f64,
    /// Standard deviation across all chains
    pub sd: f64,
}

/// Result of sampling
#[derive(Debug, Clone)]
pub struct SampleResult {
    /// Retained draws, chain-major
    pub trace: PosteriorTrace,
    /// Diagnostics per variable, in declaration order
    pub diagnostics: Vec<ParamDiagnostics>,
}

fn run_chain(model: &ModelSpec, options: &SamplerOptions, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let dims = model.variables.len();
    let mut point: Vec<f64> = model.variables.iter().map(|(_, p)| p.initial_value()).collect();
    let mut steps: Vec<f64> = model.variables.iter().map(|(_, p)| p.initial_step()).collect();
    let mut current = model.log_density(&point);
    let mut accepted = vec![0usize; dims];
    let mut draws = vec![Vec::with_capacity(options.draws); dims];

    for iteration in 0..options.tune + options.draws {
        // Component-wise updates keep the acceptance rate usable in higher dimensions
        for d in 0..dims {
            let old = point[d];
            point[d] = old + steps[d] * (2.0 * rng.gen::<f64>() - 1.0);
            let proposed = model.log_density(&point);
            if proposed.is_finite() && proposed - current >= rng.gen::<f64>().ln() {
                current = proposed;
                accepted[d] += 1;
            } else {
                point[d] = old;
            }
        }

        if iteration < options.tune && (iteration + 1) % ADAPT_INTERVAL == 0 {
            for d in 0..dims {
                #[allow(clippy::cast_precision_loss)]
                let rate = accepted[d] as f64 / ADAPT_INTERVAL as f64;
                if rate < 0.2 {
                    steps[d] *= 0.7;
                } else if rate > 0.5 {
                    steps[d] *= 1.4;
                }
                accepted[d] = 0;
            }
        }

        if iteration >= options.tune {
            for d in 0..dims {
                draws[d].push(point[d]);
            }
        }
    }
    draws
}

#[allow(clippy::cast_precision_loss)]
fn mean_var(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = if values.len() > 1 {
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
    } else {
        0.0
    };
    (mean, var)
}

/// Split-R̂ over per-chain draws of one variable.
///
/// Returns `None` when chains are too short to split.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn split_rhat(chains: &[Vec<f64>]) -> Option<f64> {
    let half = chains.iter().map(Vec::len).min()? / 2;
    if half < 2 {
        return None;
    }
    let halves: Vec<&[f64]> = chains
        .iter()
        .flat_map(|c| [&c[..half], &c[half..2 * half]])
        .collect();
    let stats: Vec<(f64, f64)> = halves.iter().map(|h| mean_var(h)).collect();
    let m = stats.len() as f64;
    let n = half as f64;

    let within = stats.iter().map(|(_, v)| v).sum::<f64>() / m;
    let grand = stats.iter().map(|(mu, _)| mu).sum::<f64>() / m;
    let between = n * stats.iter().map(|(mu, _)| (mu - grand).powi(2)).sum::<f64>() / (m - 1.0);

    if within <= 0.0 {
        // A chain that never moved has not explored anything
        return Some(f64::INFINITY);
    }
    let var_hat = (n - 1.0) / n * within + between / n;
    Some((var_hat / within).sqrt())
}

/// Draw posterior samples for `model`.
///
/// # Errors
/// Returns error if the options are degenerate, a sample is non-finite, or
/// `max_rhat` is set and some variable did not converge
pub fn sample(model: &ModelSpec, options: &SamplerOptions) -> Result<SampleResult> {
    ensure!(!model.variables.is_empty(), "model has no free variables");
    ensure!(options.draws > 0, "draws must be positive");
    ensure!(options.chains > 0, "chains must be positive");

    let per_chain: Vec<Vec<Vec<f64>>> = (0..options.chains)
        .map(|chain| {
            let mut rng = match options.seed {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(chain as u64)),
                None => StdRng::from_entropy(),
            };
            run_chain(model, options, &mut rng)
        })
        .collect();

    let chains = u32::try_from(options.chains)?;
    let draws = u32::try_from(options.draws)?;
    let mut trace = PosteriorTrace::with_index(SampleIndex::grid(chains, draws))?;
    let mut diagnostics = Vec::with_capacity(model.variables.len());

    for (d, (name, _)) in model.variables.iter().enumerate() {
        let by_chain: Vec<Vec<f64>> = per_chain.iter().map(|c| c[d].clone()).collect();
        let flat: Vec<f64> = by_chain.concat();
        if let Some(bad) = flat.iter().find(|v| !v.is_finite()) {
            bail!("sampler produced non-finite value {bad} for '{name}'");
        }

        let (mean, var) = mean_var(&flat);
        let rhat = split_rhat(&by_chain).unwrap_or(f64::NAN);
        if let Some(max_rhat) = options.max_rhat {
            // NaN (chains too short to split) counts as not converged
            if !(rhat <= max_rhat) {
                bail!("sampler did not converge: R-hat for '{name}' is {rhat:.3} (max {max_rhat})");
            }
        }

        diagnostics.push(ParamDiagnostics {
            name: name.clone(),
            rhat,
            mean,
            sd: var.sqrt(),
        });
        trace.push_column(name.as_str(), flat)?;
    }

    Ok(SampleResult { trace, diagnostics })
}
